use std::sync::Arc;

use bytes::Bytes;
use taps_config::shared::StreamConfig;
use tokio::sync::Mutex;

use crate::client::SessionClient;
use crate::codec::decode_batch;
use crate::concurrency::cancel::CancelTx;
use crate::db::MemoryDatabase;
use crate::error::{ErrorKind, TapsResult};
use crate::multipart::Envelope;
use crate::protocol::{MultipartBody, PushTableResponse};
use crate::service;
use crate::state::TransferState;
use crate::types::{IndexDefinition, TableSchema};
use crate::{bail, taps_error};

#[derive(Debug, Default)]
struct Faults {
    version_mismatch: bool,
    corrupt: usize,
    transport_failures: usize,
    fail_after_apply: usize,
    cancel_after: Option<(usize, CancelTx)>,
    reported_elapsed: Option<f64>,
}

/// What the loopback server observed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopbackStats {
    pub sessions_opened: usize,
    pub sessions_closed: usize,
    /// Row counts of the data batches the server served or applied.
    pub batches: Vec<usize>,
    pub corrupted_batches: usize,
    pub transport_failures: usize,
}

#[derive(Debug, Default)]
struct Inner {
    faults: Faults,
    stats: LoopbackStats,
}

/// A [`SessionClient`] answering every request in process from a memory database.
///
/// Requests go through [`crate::service`], the same code the HTTP server runs. Clones share
/// their faults and statistics.
#[derive(Debug, Clone)]
pub struct LoopbackClient {
    server: MemoryDatabase,
    config: StreamConfig,
    session_uri: Option<String>,
    inner: Arc<Mutex<Inner>>,
}

impl LoopbackClient {
    pub fn new(server: MemoryDatabase) -> Self {
        Self {
            server,
            config: StreamConfig::request_serving(),
            session_uri: None,
            inner: Arc::default(),
        }
    }

    /// The database behind the simulated server.
    pub fn server(&self) -> &MemoryDatabase {
        &self.server
    }

    pub async fn stats(&self) -> LoopbackStats {
        self.inner.lock().await.stats.clone()
    }

    /// Makes the server answer with an incompatible protocol version.
    pub async fn reject_version(&self) {
        self.inner.lock().await.faults.version_mismatch = true;
    }

    /// Flips a payload byte in the next `count` data batches.
    pub async fn corrupt_next(&self, count: usize) {
        self.inner.lock().await.faults.corrupt = count;
    }

    /// Fails the next `count` data requests before they reach the server.
    pub async fn fail_next(&self, count: usize) {
        self.inner.lock().await.faults.transport_failures = count;
    }

    /// Applies the next `count` pushed batches and then loses the response.
    pub async fn fail_after_apply(&self, count: usize) {
        self.inner.lock().await.faults.fail_after_apply = count;
    }

    /// Makes the server report `seconds` as its processing time for every data batch.
    pub async fn report_elapsed(&self, seconds: f64) {
        self.inner.lock().await.faults.reported_elapsed = Some(seconds);
    }

    /// Requests cancellation once `batches` data batches succeeded.
    pub async fn cancel_after(&self, batches: usize, cancel: CancelTx) {
        self.inner.lock().await.faults.cancel_after = Some((batches, cancel));
    }

    fn require_session(&self) -> TapsResult<()> {
        if self.session_uri.is_none() {
            bail!(ErrorKind::SessionNotFound, "Session does not exist");
        }

        Ok(())
    }

    /// Consumes the faults that apply to the next data request.
    async fn take_faults(&self) -> TapsResult<(bool, bool)> {
        let mut inner = self.inner.lock().await;

        if inner.faults.transport_failures > 0 {
            inner.faults.transport_failures -= 1;
            inner.stats.transport_failures += 1;
            bail!(ErrorKind::TransportFailed, "Connection reset by peer");
        }

        let corrupt = take_one(&mut inner.faults.corrupt);
        if corrupt {
            inner.stats.corrupted_batches += 1;
        }
        let fail_after_apply = take_one(&mut inner.faults.fail_after_apply);

        Ok((corrupt, fail_after_apply))
    }

    async fn reported_elapsed(&self) -> Option<f64> {
        self.inner.lock().await.faults.reported_elapsed
    }

    async fn record_batch(&self, rows: usize) {
        let mut inner = self.inner.lock().await;
        inner.stats.batches.push(rows);

        let successful = inner.stats.batches.iter().filter(|&&rows| rows > 0).count();
        if let Some((after, cancel)) = &inner.faults.cancel_after
            && successful >= *after
        {
            cancel.cancel();
        }
    }
}

fn take_one(counter: &mut usize) -> bool {
    if *counter == 0 {
        return false;
    }

    *counter -= 1;
    true
}

fn tamper(envelope: &mut Envelope) {
    let mut data = envelope.encoded_data.to_vec();
    if let Some(byte) = data.first_mut() {
        *byte ^= 0x55;
    }
    envelope.encoded_data = Bytes::from(data);
}

impl SessionClient for LoopbackClient {
    async fn verify_server(&self) -> TapsResult<()> {
        if self.inner.lock().await.faults.version_mismatch {
            bail!(
                ErrorKind::VersionMismatch,
                "Remote server speaks an incompatible protocol version",
                "server speaks 0.0"
            );
        }

        Ok(())
    }

    async fn open_session(&mut self) -> TapsResult<String> {
        let mut inner = self.inner.lock().await;
        inner.stats.sessions_opened += 1;

        let session_uri = format!("/sessions/loopback-{}", inner.stats.sessions_opened);
        self.session_uri = Some(session_uri.clone());

        Ok(session_uri)
    }

    fn resume_session(&mut self, session_uri: String) {
        self.session_uri = Some(session_uri);
    }

    fn session_uri(&self) -> Option<&str> {
        self.session_uri.as_deref()
    }

    async fn close_session(&mut self) -> TapsResult<()> {
        if self.session_uri.take().is_some() {
            self.inner.lock().await.stats.sessions_closed += 1;
        }

        Ok(())
    }

    async fn push_schema(&self, schema: &TableSchema) -> TapsResult<()> {
        self.require_session()?;
        service::push_schema(&self.server, schema).await
    }

    async fn push_indexes(&self, indexes: &[IndexDefinition]) -> TapsResult<()> {
        self.require_session()?;
        service::push_indexes(&self.server, indexes).await
    }

    async fn push_table(&self, envelope: &Envelope) -> TapsResult<PushTableResponse> {
        self.require_session()?;
        let (corrupt, fail_after_apply) = self.take_faults().await?;

        let mut envelope = envelope.clone();
        if corrupt {
            tamper(&mut envelope);
        }

        let mut response = service::push_table(&self.server, &self.config, &envelope).await?;
        if let Some(seconds) = self.reported_elapsed().await {
            response.elapsed_time = seconds;
        }
        if fail_after_apply {
            self.inner.lock().await.stats.transport_failures += 1;
            return Err(taps_error!(
                ErrorKind::TransportFailed,
                "Response lost after the batch was applied"
            ));
        }

        self.record_batch(response.row_count).await;

        Ok(response)
    }

    async fn push_verify_stream(&self, state: &TransferState) -> TapsResult<TransferState> {
        self.require_session()?;
        service::push_verify_stream(&self.server, &self.config, state.clone()).await
    }

    async fn push_reset_sequences(&self) -> TapsResult<()> {
        self.require_session()?;
        service::push_reset_sequences(&self.server).await
    }

    async fn pull_schema(&self, table: &str) -> TapsResult<TableSchema> {
        self.require_session()?;
        service::pull_schema(&self.server, table).await
    }

    async fn pull_indexes(&self) -> TapsResult<Vec<IndexDefinition>> {
        self.require_session()?;
        service::pull_indexes(&self.server).await
    }

    async fn pull_table_names(&self) -> TapsResult<Vec<String>> {
        self.require_session()?;
        service::pull_table_names(&self.server).await
    }

    async fn pull_table_count(&self, table: &str) -> TapsResult<u64> {
        self.require_session()?;
        service::pull_table_count(&self.server, table).await
    }

    async fn pull_table(&self, state: &TransferState) -> TapsResult<MultipartBody> {
        self.require_session()?;
        let (corrupt, _) = self.take_faults().await?;

        let body = service::pull_table(&self.server, &self.config, state.clone()).await?;
        let mut envelope = Envelope::from_multipart(&body.data, &body.content_type)?;
        if corrupt {
            tamper(&mut envelope);
        } else {
            let rows = decode_batch(&envelope.encoded_data)?
                .map_or(0, |batch| batch.len());
            self.record_batch(rows).await;
        }
        if let Some(seconds) = self.reported_elapsed().await {
            envelope.sidecar.elapsed_time = seconds;
        }

        let (data, content_type) = envelope.to_multipart()?;

        Ok(MultipartBody {
            data: Bytes::from(data),
            content_type,
        })
    }
}
