//! Protocol version negotiation between client and server.

/// Header carrying the `MAJOR.MINOR` protocol version on every request.
pub const VERSION_HEADER: &str = "taps-version";

/// Header carrying the CRC-32 checksum of a raw request body.
pub const CHECKSUM_HEADER: &str = "taps-checksum";

/// Full crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the `MAJOR.MINOR` part of the version, which both sides must agree on.
pub fn compatible_version() -> &'static str {
    major_minor(VERSION)
}

/// Returns `true` if a peer advertising `version` can talk to this build.
///
/// Only the major and minor components are compared, so `0.6` and `0.6.9` are both
/// compatible with `0.6.3`.
pub fn is_compatible(version: &str) -> bool {
    major_minor(version.trim()) == compatible_version()
}

fn major_minor(version: &str) -> &str {
    match version.match_indices('.').nth(1) {
        Some((idx, _)) => &version[..idx],
        None => version,
    }
}
