//! Multipart envelope carrying one encoded batch and its JSON sidecar.
//!
//! The body is a two-part `multipart/form-data` document: `encoded_data` holds the
//! compressed batch and `json` holds the [`Sidecar`]. Anything that prevents reading the
//! sidecar back is reported as [`ErrorKind::CorruptedData`] so it goes through the same
//! retry path as a checksum mismatch.

use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::checksum;
use crate::error::{ErrorKind, TapsResult};
use crate::state::TransferState;
use crate::{bail, taps_error};

const DATA_PART: &str = "encoded_data";
const SIDECAR_PART: &str = "json";
const BOUNDARY_LENGTH: usize = 32;

/// Metadata sent next to a batch payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    /// Stream state after the batch was fetched.
    pub state: TransferState,
    /// CRC-32 of the payload bytes.
    pub checksum: u32,
    /// Seconds the sender spent in its database producing the batch.
    #[serde(default)]
    pub elapsed_time: f64,
}

/// One batch payload plus its sidecar.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub encoded_data: Bytes,
    pub sidecar: Sidecar,
}

impl Envelope {
    /// Wraps a payload, computing its checksum.
    pub fn new(encoded_data: impl Into<Bytes>, state: TransferState, elapsed: Duration) -> Self {
        let encoded_data = encoded_data.into();
        let sidecar = Sidecar {
            state,
            checksum: checksum::checksum(&encoded_data),
            elapsed_time: elapsed.as_secs_f64(),
        };

        Self {
            encoded_data,
            sidecar,
        }
    }

    /// Fails with [`ErrorKind::CorruptedData`] unless the payload matches its checksum.
    pub fn verify(&self) -> TapsResult<()> {
        checksum::verify(&self.encoded_data, self.sidecar.checksum)
    }

    pub fn elapsed(&self) -> Duration {
        Duration::try_from_secs_f64(self.sidecar.elapsed_time).unwrap_or_default()
    }

    /// Serializes the envelope, returning the body and its `Content-Type` header value.
    pub fn to_multipart(&self) -> TapsResult<(Vec<u8>, String)> {
        let boundary: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(BOUNDARY_LENGTH)
            .map(char::from)
            .collect();
        let sidecar = serde_json::to_vec(&self.sidecar)?;

        let mut body = Vec::with_capacity(self.encoded_data.len() + sidecar.len() + 512);
        write_part(
            &mut body,
            &boundary,
            &format!("form-data; name=\"{DATA_PART}\"; filename=\"{DATA_PART}\""),
            "application/octet-stream",
            &self.encoded_data,
        );
        write_part(
            &mut body,
            &boundary,
            &format!("form-data; name=\"{SIDECAR_PART}\""),
            "application/json",
            &sidecar,
        );
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

        Ok((body, format!("multipart/form-data; boundary={boundary}")))
    }

    /// Parses a body produced by [`Envelope::to_multipart`].
    ///
    /// The checksum is not verified here; call [`Envelope::verify`] before trusting the
    /// payload.
    pub fn from_multipart(body: &[u8], content_type: &str) -> TapsResult<Envelope> {
        let boundary = boundary_from_content_type(content_type)?;
        let parts = parse_parts(body, &boundary)?;

        let mut encoded_data = None;
        let mut sidecar = None;
        for (name, content) in parts {
            match name.as_str() {
                DATA_PART => encoded_data = Some(Bytes::copy_from_slice(content)),
                SIDECAR_PART => {
                    let parsed: Sidecar = serde_json::from_slice(content).map_err(|err| {
                        taps_error!(
                            ErrorKind::CorruptedData,
                            "Envelope sidecar is not valid",
                            err
                        )
                    })?;
                    sidecar = Some(parsed);
                }
                _ => {}
            }
        }

        match (encoded_data, sidecar) {
            (Some(encoded_data), Some(sidecar)) => Ok(Envelope {
                encoded_data,
                sidecar,
            }),
            _ => bail!(
                ErrorKind::CorruptedData,
                "Envelope is missing a part",
                format!("expected `{DATA_PART}` and `{SIDECAR_PART}`")
            ),
        }
    }
}

fn write_part(
    body: &mut Vec<u8>,
    boundary: &str,
    disposition: &str,
    content_type: &str,
    content: &[u8],
) {
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Disposition: {disposition}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(b"\r\n");
}

fn boundary_from_content_type(content_type: &str) -> TapsResult<String> {
    let mut params = content_type.split(';').map(str::trim);
    let is_multipart = params
        .next()
        .is_some_and(|mime| mime.eq_ignore_ascii_case("multipart/form-data"));
    if !is_multipart {
        bail!(
            ErrorKind::CorruptedData,
            "Envelope has an unexpected content type",
            content_type
        );
    }

    for param in params {
        if let Some((key, value)) = param.split_once('=')
            && key.trim().eq_ignore_ascii_case("boundary")
        {
            let value = value.trim().trim_matches('"');
            if !value.is_empty() {
                return Ok(value.to_string());
            }
        }
    }

    bail!(
        ErrorKind::CorruptedData,
        "Envelope content type has no boundary",
        content_type
    )
}

fn parse_parts<'a>(body: &'a [u8], boundary: &str) -> TapsResult<Vec<(String, &'a [u8])>> {
    let delimiter = format!("--{boundary}").into_bytes();
    let Some(first) = find(body, &delimiter) else {
        bail!(ErrorKind::CorruptedData, "Envelope has no parts");
    };

    let separator = format!("\r\n--{boundary}").into_bytes();
    let mut rest = &body[first + delimiter.len()..];
    let mut parts = Vec::new();

    loop {
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        let Some(after_newline) = rest.strip_prefix(b"\r\n") else {
            bail!(ErrorKind::CorruptedData, "Envelope delimiter is malformed");
        };
        let Some(headers_end) = find(after_newline, b"\r\n\r\n") else {
            bail!(
                ErrorKind::CorruptedData,
                "Envelope part has no header block"
            );
        };
        let headers = std::str::from_utf8(&after_newline[..headers_end]).map_err(|err| {
            taps_error!(
                ErrorKind::CorruptedData,
                "Envelope part headers are not UTF-8",
                err
            )
        })?;
        let content_start = &after_newline[headers_end + 4..];
        let Some(content_end) = find(content_start, &separator) else {
            bail!(ErrorKind::CorruptedData, "Envelope part is truncated");
        };

        let name = part_name(headers).unwrap_or_default();
        parts.push((name, &content_start[..content_end]));
        rest = &content_start[content_end + separator.len()..];
    }
}

fn part_name(headers: &str) -> Option<String> {
    headers
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .filter(|(key, _)| key.trim().eq_ignore_ascii_case("content-disposition"))
        .flat_map(|(_, value)| value.split(';'))
        .filter_map(|param| param.trim().strip_prefix("name="))
        .map(|name| name.trim_matches('"').to_string())
        .next()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }

    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
