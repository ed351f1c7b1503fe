//! Logging setup shared by the taps binaries and tests.

pub mod tracing;
