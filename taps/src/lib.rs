//! Resumable transfer of whole databases over HTTP.
//!
//! A local process pushes its database to, or pulls a database from, a remote server in
//! adaptive batches. Every batch is compressed, checksummed and only committed once the
//! destination applied it, so an interrupted [`operation::Operation`] can be continued from
//! its resume file without losing or duplicating rows.

pub mod checksum;
pub mod chunksize;
pub mod client;
pub mod codec;
pub mod concurrency;
pub mod db;
pub mod error;
mod macros;
pub mod multipart;
pub mod operation;
pub mod protocol;
pub mod service;
pub mod state;
pub mod stream;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod url;
pub mod version;
