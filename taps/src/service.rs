//! Server side of every session request.
//!
//! Each function serves one request against the database bound to a session. They are
//! independent of the HTTP layer so the same code backs the real server and in-process
//! transports.

use std::time::Instant;

use bytes::Bytes;
use taps_config::shared::StreamConfig;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::TapsResult;
use crate::multipart::Envelope;
use crate::protocol::{MultipartBody, PushTableResponse};
use crate::state::TransferState;
use crate::stream::DataStream;
use crate::types::{IndexDefinition, TableSchema};

pub async fn push_schema<D: Database>(db: &D, schema: &TableSchema) -> TapsResult<()> {
    db.load_schema(schema).await?;
    info!(table = %schema.name, "loaded pushed schema");

    Ok(())
}

pub async fn push_indexes<D: Database>(db: &D, indexes: &[IndexDefinition]) -> TapsResult<()> {
    db.load_indexes(indexes).await?;
    info!(count = indexes.len(), "loaded pushed indexes");

    Ok(())
}

/// Imports one pushed batch into a stream rebuilt from the batch's own state.
pub async fn push_table<D: Database + Clone>(
    db: &D,
    config: &StreamConfig,
    envelope: &Envelope,
) -> TapsResult<PushTableResponse> {
    let started = Instant::now();
    let mut stream =
        DataStream::factory(db.clone(), envelope.sidecar.state.clone(), config).await?;
    let imported = stream.fetch_remote_in_server(envelope).await?;

    debug!(
        table = %stream.table_name(),
        rows = imported.row_count,
        "imported pushed batch"
    );

    Ok(PushTableResponse {
        row_count: imported.row_count,
        state: stream.into_state(),
        elapsed_time: started.elapsed().as_secs_f64(),
    })
}

/// Returns `state` resynchronized with what the destination table contains.
pub async fn push_verify_stream<D: Database + Clone>(
    db: &D,
    config: &StreamConfig,
    state: TransferState,
) -> TapsResult<TransferState> {
    let mut stream = DataStream::factory(db.clone(), state, config).await?;
    stream.verify_stream().await?;

    info!(table = %stream.table_name(), state = ?stream.state(), "verified pushed stream");

    Ok(stream.into_state())
}

pub async fn push_reset_sequences<D: Database>(db: &D) -> TapsResult<()> {
    db.reset_sequences().await
}

pub async fn pull_schema<D: Database>(db: &D, table: &str) -> TapsResult<TableSchema> {
    db.dump_schema(table).await
}

pub async fn pull_indexes<D: Database>(db: &D) -> TapsResult<Vec<IndexDefinition>> {
    db.dump_indexes().await
}

pub async fn pull_table_names<D: Database>(db: &D) -> TapsResult<Vec<String>> {
    db.table_names().await
}

pub async fn pull_table_count<D: Database>(db: &D, table: &str) -> TapsResult<u64> {
    db.count_rows(table).await
}

/// Serves one batch of a pulled table as a multipart envelope.
pub async fn pull_table<D: Database + Clone>(
    db: &D,
    config: &StreamConfig,
    state: TransferState,
) -> TapsResult<MultipartBody> {
    let mut stream = DataStream::factory(db.clone(), state, config).await?;
    let envelope = stream.fetch_envelope().await?;
    let (data, content_type) = envelope.to_multipart()?;

    Ok(MultipartBody {
        data: Bytes::from(data),
        content_type,
    })
}
