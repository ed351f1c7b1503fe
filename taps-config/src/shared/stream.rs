use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Read-ahead factor used by a keyed stream running in a standalone client.
pub const STANDALONE_BUFFER_FACTOR: f64 = 3.0;

/// Read-ahead factor used by a keyed stream running inside a request handler.
///
/// Kept close to 1 so a single request never reads much more than it returns.
pub const REQUEST_SERVING_BUFFER_FACTOR: f64 = 1.1;

/// Tuning knobs for data streams.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StreamConfig {
    /// Multiplier applied to the requested chunk size when a keyed stream refills its buffer.
    pub buffer_factor: f64,
}

impl StreamConfig {
    /// Configuration for streams driven by a local client process.
    pub fn standalone() -> Self {
        Self {
            buffer_factor: STANDALONE_BUFFER_FACTOR,
        }
    }

    /// Configuration for streams created while serving a single HTTP request.
    pub fn request_serving() -> Self {
        Self {
            buffer_factor: REQUEST_SERVING_BUFFER_FACTOR,
        }
    }

    /// Number of rows a keyed stream should read when it needs `chunksize` rows.
    pub fn buffer_limit(&self, chunksize: usize) -> usize {
        ((chunksize as f64) * self.buffer_factor).ceil().max(1.0) as usize
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.buffer_factor < 1.0 {
            return Err(ValidationError::BufferFactorTooSmall(self.buffer_factor));
        }

        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::standalone()
    }
}
