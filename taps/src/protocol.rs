//! Messages exchanged between the client and the server.

use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::checksum;
use crate::error::{ErrorKind, TapsError, TapsResult};
use crate::state::TransferState;
use crate::taps_error;

/// Error body returned by the server for every failed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    /// Name of the error category on the server.
    pub class: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<String>,
}

impl ErrorPayload {
    pub fn from_error(err: &TapsError) -> Self {
        let backtrace = std::backtrace::Backtrace::capture();
        let backtrace = match backtrace.status() {
            std::backtrace::BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };

        Self {
            kind: err.kind(),
            class: format!("{:?}", err.kind()),
            message: err.to_string(),
            backtrace,
        }
    }

    /// Rebuilds the error on the client, keeping the server's message and backtrace as
    /// detail.
    pub fn into_error(self) -> TapsError {
        let mut detail = format!("{}: {}", self.class, self.message);
        if let Some(backtrace) = self.backtrace {
            detail.push('\n');
            detail.push_str(&backtrace);
        }

        TapsError::from((self.kind, "Server reported an error", detail))
    }
}

/// Reply to a pushed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushTableResponse {
    /// State of the server-side stream after the import.
    pub state: TransferState,
    pub row_count: usize,
    /// Seconds the server spent importing the batch.
    pub elapsed_time: f64,
}

impl PushTableResponse {
    /// Server time as a [`Duration`]. Values that are negative or out of range count as
    /// zero.
    pub fn elapsed(&self) -> Duration {
        Duration::try_from_secs_f64(self.elapsed_time).unwrap_or_default()
    }
}

/// Reply to `POST /sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResponse {
    pub key: String,
    pub session_uri: String,
}

/// A raw multipart body together with its `Content-Type`.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartBody {
    pub data: Bytes,
    pub content_type: String,
}

/// Serializes `value` for a checksummed request body, returning the body and the value
/// of the checksum header.
pub fn checked_json<T: Serialize>(value: &T) -> TapsResult<(Vec<u8>, String)> {
    let body = serde_json::to_vec(value)?;
    let crc = checksum::checksum(&body);

    Ok((body, crc.to_string()))
}

/// Parses a checksummed request body. A missing or wrong checksum is reported as
/// [`ErrorKind::CorruptedData`].
pub fn parse_checked_json<T: DeserializeOwned>(
    body: &[u8],
    checksum_header: Option<&str>,
) -> TapsResult<T> {
    let Some(header) = checksum_header else {
        return Err(taps_error!(
            ErrorKind::CorruptedData,
            "Request body has no checksum"
        ));
    };
    checksum::verify(body, checksum::parse(header)?)?;

    let value = serde_json::from_slice(body)?;
    Ok(value)
}
