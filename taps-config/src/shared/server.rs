use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::shared::{StreamConfig, ValidationError};
use crate::{Config, SerializableSecretString};

/// Complete configuration for the taps server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listener settings.
    pub application: ApplicationSettings,
    /// Database every session is bound to. When absent, clients supply the URL when opening a
    /// session.
    #[serde(default)]
    pub database_url: Option<SerializableSecretString>,
    /// Login expected in the HTTP basic credentials.
    pub login: String,
    /// Password expected in the HTTP basic credentials.
    pub password: SerializableSecretString,
    /// Session lifecycle settings.
    #[serde(default)]
    pub session: SessionSettings,
    /// Tuning of streams created while serving requests.
    #[serde(default = "StreamConfig::request_serving")]
    pub stream: StreamConfig,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.session.validate()?;
        self.stream.validate()
    }
}

impl Config for ServerConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

/// HTTP server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Host address the server listens on.
    pub host: String,
    /// Port number the server listens on.
    pub port: u16,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl fmt::Display for ApplicationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "    host: {}", self.host)?;
        writeln!(f, "    port: {}", self.port)
    }
}

/// Server-side session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct SessionSettings {
    /// Seconds a pooled connection may stay unused before it is evicted.
    pub idle_timeout_secs: u64,
    /// Seconds between two runs of the idle sweep.
    pub sweep_interval_secs: u64,
    /// Seconds a session may stay unused before it is destroyed. A session whose connection
    /// was evicted reconnects on its next request until then.
    pub expire_after_secs: u64,
}

impl SessionSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn expire_after(&self) -> Duration {
        Duration::from_secs(self.expire_after_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.idle_timeout_secs == 0 {
            return Err(ValidationError::IdleTimeoutZero);
        }

        if self.sweep_interval_secs == 0 {
            return Err(ValidationError::SweepIntervalZero);
        }

        if self.expire_after_secs < self.idle_timeout_secs {
            return Err(ValidationError::ExpiryBeforeIdleTimeout(
                self.expire_after_secs,
                self.idle_timeout_secs,
            ));
        }

        Ok(())
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 600,
            sweep_interval_secs: 60,
            expire_after_secs: 86_400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"{
            "application": { "host": "127.0.0.1", "port": 5000 },
            "login": "taps",
            "password": "tpass"
        }"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();

        assert!(config.database_url.is_none());
        assert_eq!(config.session, SessionSettings::default());
        assert_eq!(config.stream, StreamConfig::request_serving());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_idle_timeout() {
        let settings = SessionSettings {
            idle_timeout_secs: 0,
            sweep_interval_secs: 1,
            expire_after_secs: 10,
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn sessions_cannot_expire_before_their_connections() {
        let settings = SessionSettings {
            idle_timeout_secs: 600,
            sweep_interval_secs: 60,
            expire_after_secs: 60,
        };
        assert!(matches!(
            settings.validate(),
            Err(ValidationError::ExpiryBeforeIdleTimeout(60, 600))
        ));
    }
}
