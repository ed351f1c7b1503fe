use std::error;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Convenient result type for transfer operations using [`TapsError`] as the error type.
pub type TapsResult<T> = Result<T, TapsError>;

/// Main error type for transfer operations.
///
/// A [`TapsError`] always carries an [`ErrorKind`] and a static description. Errors that
/// originate from a driver, the network or the remote server additionally carry a dynamic
/// detail string.
#[derive(Debug, Clone)]
pub struct TapsError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
}

/// Categories of failures that can happen while moving data between two databases.
///
/// The kind drives recovery: the batch loop retries some kinds in place, some kinds
/// trigger a stream resynchronization and everything else is fatal for the operation.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorKind {
    // Batch integrity errors
    CorruptedData,
    DuplicatePrimaryKey,
    InvalidData,

    // Protocol errors
    VersionMismatch,
    AuthenticationFailed,
    SessionNotFound,
    TransportFailed,
    ServerError,

    // Database errors
    DatabaseConnectionFailed,
    DatabaseQueryFailed,
    SchemaError,

    // IO & serialization errors
    IoError,
    SerializationError,
    DeserializationError,
    ConfigError,

    // Workflow errors
    InvalidState,
    Cancelled,

    Unknown,
}

impl ErrorKind {
    /// Returns `true` when a failure of this kind should be retried through the
    /// chunksize controller with a collapsed batch size.
    pub fn is_transport_retriable(self) -> bool {
        matches!(self, ErrorKind::TransportFailed)
    }
}

impl TapsError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
        }
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &'static str {
        match self.repr {
            ErrorRepr::WithDescription(_, desc)
            | ErrorRepr::WithDescriptionAndDetail(_, desc, _) => desc,
        }
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::WithDescription(..) => None,
        }
    }
}

impl PartialEq for TapsError {
    fn eq(&self, other: &TapsError) -> bool {
        self.kind() == other.kind()
    }
}

impl fmt::Display for TapsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;
                f.write_str(" -> ")?;
                detail.fmt(f)
            }
        }
    }
}

impl error::Error for TapsError {}

impl From<(ErrorKind, &'static str)> for TapsError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> TapsError {
        TapsError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for TapsError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> TapsError {
        TapsError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl From<std::io::Error> for TapsError {
    fn from(err: std::io::Error) -> TapsError {
        TapsError::from((ErrorKind::IoError, "I/O error occurred", err.to_string()))
    }
}

impl From<serde_json::Error> for TapsError {
    fn from(err: serde_json::Error) -> TapsError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        TapsError::from((kind, description, err.to_string()))
    }
}

impl From<std::string::FromUtf8Error> for TapsError {
    fn from(err: std::string::FromUtf8Error) -> TapsError {
        TapsError::from((
            ErrorKind::DeserializationError,
            "UTF-8 string conversion failed",
            err.to_string(),
        ))
    }
}

impl From<regex::Error> for TapsError {
    fn from(err: regex::Error) -> TapsError {
        TapsError::from((
            ErrorKind::ConfigError,
            "Invalid table filter expression",
            err.to_string(),
        ))
    }
}

/// Maps driver errors to kinds using the SQLSTATE class of the failure.
impl From<sqlx::Error> for TapsError {
    fn from(err: sqlx::Error) -> TapsError {
        let (kind, description) = match &err {
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some("23505") => (
                    ErrorKind::DuplicatePrimaryKey,
                    "Row with the same primary key already exists",
                ),
                Some("22001") | Some("22003") => (
                    ErrorKind::InvalidData,
                    "Value does not fit the destination column",
                ),
                Some(code) if code.starts_with("28") => (
                    ErrorKind::AuthenticationFailed,
                    "PostgreSQL authentication failed",
                ),
                Some(code) if code.starts_with("08") => (
                    ErrorKind::DatabaseConnectionFailed,
                    "PostgreSQL connection error",
                ),
                Some(code) if code.starts_with("42") => (
                    ErrorKind::SchemaError,
                    "PostgreSQL schema object error",
                ),
                _ => (ErrorKind::DatabaseQueryFailed, "PostgreSQL query failed"),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => (
                ErrorKind::DatabaseConnectionFailed,
                "Could not reach the database",
            ),
            sqlx::Error::Configuration(_) => {
                (ErrorKind::ConfigError, "Invalid database connection URL")
            }
            sqlx::Error::RowNotFound => (ErrorKind::DatabaseQueryFailed, "Row not found"),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => (
                ErrorKind::DeserializationError,
                "Could not decode database value",
            ),
            _ => (ErrorKind::DatabaseQueryFailed, "Database operation failed"),
        };

        TapsError::from((kind, description, err.to_string()))
    }
}

impl From<reqwest::Error> for TapsError {
    fn from(err: reqwest::Error) -> TapsError {
        let (kind, description) = if err.is_decode() {
            (
                ErrorKind::DeserializationError,
                "Could not decode server response",
            )
        } else if err.is_builder() {
            (ErrorKind::ConfigError, "Invalid remote request")
        } else {
            (ErrorKind::TransportFailed, "Request to remote server failed")
        };

        TapsError::from((kind, description, err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, taps_error};

    #[test]
    fn test_simple_error_creation() {
        let err = TapsError::from((ErrorKind::CorruptedData, "Checksum mismatch"));
        assert_eq!(err.kind(), ErrorKind::CorruptedData);
        assert_eq!(err.description(), "Checksum mismatch");
        assert_eq!(err.detail(), None);
    }

    #[test]
    fn test_error_display_with_detail() {
        let err = TapsError::from((
            ErrorKind::InvalidData,
            "Value exceeds column length",
            "widgets.name".to_string(),
        ));
        let display_str = format!("{err}");
        assert!(display_str.contains("InvalidData"));
        assert!(display_str.contains("Value exceeds column length"));
        assert!(display_str.contains("widgets.name"));
    }

    #[test]
    fn test_equality_compares_kinds() {
        let err1 = TapsError::from((ErrorKind::TransportFailed, "a"));
        let err2 = TapsError::from((ErrorKind::TransportFailed, "b", "c".to_string()));
        let err3 = TapsError::from((ErrorKind::ServerError, "a"));

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }

    #[test]
    fn test_only_transport_failures_are_retriable() {
        assert!(ErrorKind::TransportFailed.is_transport_retriable());
        assert!(!ErrorKind::CorruptedData.is_transport_retriable());
        assert!(!ErrorKind::DuplicatePrimaryKey.is_transport_retriable());
        assert!(!ErrorKind::VersionMismatch.is_transport_retriable());
    }

    #[test]
    fn test_json_error_maps_to_deserialization() {
        let err: TapsError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::DeserializationError);
    }

    #[test]
    fn test_macro_usage() {
        let err = taps_error!(ErrorKind::InvalidState, "Stream already complete");
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let err_with_detail = taps_error!(ErrorKind::SessionNotFound, "Unknown session", "abc");
        assert_eq!(err_with_detail.detail(), Some("abc"));
    }

    #[test]
    fn test_bail_macro() {
        fn test_function() -> TapsResult<i32> {
            bail!(ErrorKind::Cancelled, "Interrupted");
        }

        let err = test_function().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
