use std::future::Future;

use crate::error::TapsResult;
use crate::multipart::Envelope;
use crate::protocol::{MultipartBody, PushTableResponse};
use crate::state::TransferState;
use crate::types::{IndexDefinition, TableSchema};

/// Requests an operation can send to a remote server.
///
/// Push and pull only ever talk to the server through this trait, which keeps them
/// independent of the actual transport.
pub trait SessionClient {
    /// Checks that the server is reachable, accepts our credentials and speaks a
    /// compatible protocol version.
    fn verify_server(&self) -> impl Future<Output = TapsResult<()>> + Send;

    /// Opens a session on the server and remembers its URI.
    fn open_session(&mut self) -> impl Future<Output = TapsResult<String>> + Send;

    /// Reattaches to a session opened by an earlier run.
    fn resume_session(&mut self, session_uri: String);

    fn session_uri(&self) -> Option<&str>;

    fn close_session(&mut self) -> impl Future<Output = TapsResult<()>> + Send;

    fn push_schema(&self, schema: &TableSchema) -> impl Future<Output = TapsResult<()>> + Send;

    fn push_indexes(
        &self,
        indexes: &[IndexDefinition],
    ) -> impl Future<Output = TapsResult<()>> + Send;

    fn push_table(
        &self,
        envelope: &Envelope,
    ) -> impl Future<Output = TapsResult<PushTableResponse>> + Send;

    fn push_verify_stream(
        &self,
        state: &TransferState,
    ) -> impl Future<Output = TapsResult<TransferState>> + Send;

    fn push_reset_sequences(&self) -> impl Future<Output = TapsResult<()>> + Send;

    fn pull_schema(&self, table: &str) -> impl Future<Output = TapsResult<TableSchema>> + Send;

    fn pull_indexes(&self) -> impl Future<Output = TapsResult<Vec<IndexDefinition>>> + Send;

    fn pull_table_names(&self) -> impl Future<Output = TapsResult<Vec<String>>> + Send;

    fn pull_table_count(&self, table: &str) -> impl Future<Output = TapsResult<u64>> + Send;

    fn pull_table(
        &self,
        state: &TransferState,
    ) -> impl Future<Output = TapsResult<MultipartBody>> + Send;
}
