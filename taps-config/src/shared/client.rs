use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{StreamConfig, ValidationError};

/// Chunk size used when none is configured.
pub const DEFAULT_CHUNKSIZE: usize = 1000;

/// Smallest chunk size accepted from the command line.
pub const MIN_CLI_CHUNKSIZE: usize = 10;

/// Configuration for the push/pull client.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", default)]
pub struct ClientConfig {
    /// Initial chunk size of every table stream.
    pub default_chunksize: usize,
    /// When disabled, every batch of a table uses the initial chunk size.
    pub adaptive_chunksize: bool,
    /// Timeout applied to every HTTP request, in seconds.
    pub request_timeout_secs: u64,
    /// Tuning of the local data streams.
    pub stream: StreamConfig,
}

impl ClientConfig {
    /// Clamps a chunk size given on the command line to the accepted minimum.
    pub fn clamp_cli_chunksize(chunksize: usize) -> usize {
        chunksize.max(MIN_CLI_CHUNKSIZE)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.default_chunksize == 0 {
            return Err(ValidationError::ChunksizeZero);
        }

        self.stream.validate()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_chunksize: DEFAULT_CHUNKSIZE,
            adaptive_chunksize: true,
            request_timeout_secs: 120,
            stream: StreamConfig::standalone(),
        }
    }
}

impl Config for ClientConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_chunksize_has_a_floor() {
        assert_eq!(ClientConfig::clamp_cli_chunksize(3), 10);
        assert_eq!(ClientConfig::clamp_cli_chunksize(5000), 5000);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(ClientConfig::default().validate().is_ok());
    }
}
