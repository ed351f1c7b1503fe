//! Per-table data streams.
//!
//! A [`DataStream`] owns the [`TransferState`] of one table and produces or consumes encoded
//! row batches. The variant is picked once from the table schema: tables with a single
//! integer primary key are streamed by key, everything else by offset.

mod keyed;
mod offset;

use std::time::{Duration, Instant};

use bytes::Bytes;
use taps_config::shared::StreamConfig;
use tracing::debug;

pub use keyed::KeyedStream;
pub use offset::OffsetStream;

use crate::client::SessionClient;
use crate::codec::{decode_batch, encode_batch, validate_batch};
use crate::db::Database;
use crate::error::TapsResult;
use crate::multipart::Envelope;
use crate::state::TransferState;
use crate::types::{RowBatch, TableSchema};

/// Result of reading one batch from the source database.
#[derive(Debug, Clone)]
pub struct FetchedBatch {
    /// Compressed batch, or the completion marker.
    pub encoded: Bytes,
    pub row_count: usize,
    /// Time spent reading and encoding rows.
    pub elapsed: Duration,
}

/// Result of applying one batch to the destination database.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportedBatch {
    pub row_count: usize,
    /// Time spent in the databases on both ends, as far as it is known.
    pub time_in_db: Duration,
}

#[derive(Debug)]
pub enum DataStream<D> {
    Offset(OffsetStream<D>),
    Keyed(KeyedStream<D>),
}

impl<D: Database> DataStream<D> {
    /// Builds the stream matching the key shape of the table in `db`.
    pub async fn factory(db: D, state: TransferState, config: &StreamConfig) -> TapsResult<Self> {
        let schema = db.table_schema(&state.table_name).await?;
        Ok(Self::from_schema(db, schema, state, config))
    }

    pub fn from_schema(
        db: D,
        schema: TableSchema,
        state: TransferState,
        config: &StreamConfig,
    ) -> Self {
        let key = schema
            .single_integer_key()
            .map(str::to_string)
            .and_then(|key| schema.column_index(&key).map(|idx| (key, idx)));

        match key {
            Some((key, key_index)) => DataStream::Keyed(KeyedStream::new(
                db,
                schema,
                key,
                key_index,
                state,
                config.clone(),
            )),
            None => DataStream::Offset(OffsetStream::new(db, schema, state)),
        }
    }

    pub fn state(&self) -> &TransferState {
        match self {
            DataStream::Offset(stream) => &stream.state,
            DataStream::Keyed(stream) => &stream.state,
        }
    }

    pub fn state_mut(&mut self) -> &mut TransferState {
        match self {
            DataStream::Offset(stream) => &mut stream.state,
            DataStream::Keyed(stream) => &mut stream.state,
        }
    }

    pub fn into_state(self) -> TransferState {
        match self {
            DataStream::Offset(stream) => stream.state,
            DataStream::Keyed(stream) => stream.state,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.state().table_name
    }

    pub fn is_keyed(&self) -> bool {
        matches!(self, DataStream::Keyed(_))
    }

    pub fn is_complete(&self) -> bool {
        match self {
            DataStream::Offset(stream) => stream.complete,
            DataStream::Keyed(stream) => stream.complete,
        }
    }

    fn set_complete(&mut self) {
        match self {
            DataStream::Offset(stream) => stream.complete = true,
            DataStream::Keyed(stream) => stream.complete = true,
        }
    }

    fn parts(&self) -> (&D, &TableSchema) {
        match self {
            DataStream::Offset(stream) => (&stream.db, &stream.schema),
            DataStream::Keyed(stream) => (&stream.db, &stream.schema),
        }
    }

    /// Reads the next `chunksize` rows without moving the committed position.
    ///
    /// Once the table is exhausted the stream is marked complete and the completion marker
    /// is returned with a row count of zero.
    pub async fn fetch(&mut self, chunksize: usize) -> TapsResult<FetchedBatch> {
        self.state_mut().chunksize = chunksize.max(1);

        let started = Instant::now();
        let batch = match self {
            DataStream::Offset(stream) => stream.fetch_rows().await?,
            DataStream::Keyed(stream) => stream.fetch_rows().await?,
        };
        let row_count = batch.as_ref().map_or(0, RowBatch::len);
        let encoded = encode_batch(batch.as_ref())?;

        Ok(FetchedBatch {
            encoded: Bytes::from(encoded),
            row_count,
            elapsed: started.elapsed(),
        })
    }

    /// Commits `row_count` rows of the last fetch after the destination applied them.
    pub fn increment(&mut self, row_count: usize) {
        match self {
            DataStream::Offset(stream) => stream.increment(row_count),
            DataStream::Keyed(stream) => stream.increment(row_count),
        }
    }

    /// Inserts `batch` into the destination with a single statement and advances the
    /// state only once the insert committed.
    ///
    /// Values are validated against the destination schema first, so oversized data never
    /// reaches the database.
    pub async fn import_rows(&mut self, batch: RowBatch) -> TapsResult<Duration> {
        if batch.is_empty() {
            return Ok(Duration::ZERO);
        }

        let started = Instant::now();
        {
            let (db, schema) = self.parts();
            validate_batch(schema, &batch)?;
            db.insert_rows(&schema.name, &batch.header, &batch.data).await?;
        }
        let elapsed = started.elapsed();

        match self {
            DataStream::Offset(stream) => stream.advance_after_import(&batch),
            DataStream::Keyed(stream) => stream.advance_after_import(&batch),
        }

        debug!(table = %self.table_name(), rows = batch.len(), "imported rows");

        Ok(elapsed)
    }

    /// Re-derives the position from what the destination actually contains.
    pub async fn verify_stream(&mut self) -> TapsResult<()> {
        match self {
            DataStream::Offset(stream) => stream.verify().await?,
            DataStream::Keyed(stream) => stream.verify().await?,
        }

        debug!(table = %self.table_name(), state = ?self.state(), "verified stream");

        Ok(())
    }

    /// Fetches one batch at the state's chunk size and wraps it for the wire.
    pub async fn fetch_envelope(&mut self) -> TapsResult<Envelope> {
        let chunksize = self.state().chunksize;
        let fetched = self.fetch(chunksize).await?;

        Ok(Envelope::new(
            fetched.encoded,
            self.state().clone(),
            fetched.elapsed,
        ))
    }

    /// Pulls one batch from the remote server and imports it locally.
    pub async fn fetch_remote<C: SessionClient>(
        &mut self,
        client: &C,
    ) -> TapsResult<ImportedBatch> {
        let body = client.pull_table(self.state()).await?;
        let envelope = Envelope::from_multipart(&body.data, &body.content_type)?;

        let imported = self.import_envelope(&envelope).await?;
        Ok(ImportedBatch {
            row_count: imported.row_count,
            time_in_db: imported.time_in_db.saturating_add(envelope.elapsed()),
        })
    }

    /// Imports a batch pushed by a client.
    pub async fn fetch_remote_in_server(
        &mut self,
        envelope: &Envelope,
    ) -> TapsResult<ImportedBatch> {
        self.import_envelope(envelope).await
    }

    async fn import_envelope(&mut self, envelope: &Envelope) -> TapsResult<ImportedBatch> {
        envelope.verify()?;

        match decode_batch(&envelope.encoded_data)? {
            None => {
                self.set_complete();
                Ok(ImportedBatch {
                    row_count: 0,
                    time_in_db: Duration::ZERO,
                })
            }
            Some(batch) => {
                let row_count = batch.len();
                let time_in_db = self.import_rows(batch).await?;
                Ok(ImportedBatch {
                    row_count,
                    time_in_db,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDatabase;
    use crate::error::ErrorKind;
    use crate::types::{Cell, ColumnSchema, TableRow};

    fn keyed_schema() -> TableSchema {
        TableSchema::new(
            "widgets",
            vec![
                ColumnSchema::new("id", "integer").primary_key(),
                ColumnSchema::new("name", "varchar(10)").with_max_length(10),
            ],
        )
    }

    fn unkeyed_schema() -> TableSchema {
        TableSchema::new(
            "events",
            vec![
                ColumnSchema::new("at", "bigint"),
                ColumnSchema::new("name", "text"),
            ],
        )
    }

    fn rows(ids: impl IntoIterator<Item = i64>) -> Vec<TableRow> {
        ids.into_iter()
            .map(|id| TableRow::new(vec![Cell::I64(id), Cell::String(format!("w{id}"))]))
            .collect()
    }

    async fn database(schema: TableSchema, ids: impl IntoIterator<Item = i64>) -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.create_table(schema, rows(ids)).await;
        db
    }

    async fn open(db: MemoryDatabase, state: TransferState) -> DataStream<MemoryDatabase> {
        let config = StreamConfig::standalone();
        DataStream::factory(db, state, &config).await.unwrap()
    }

    async fn open_serving(db: MemoryDatabase, state: TransferState) -> DataStream<MemoryDatabase> {
        let config = StreamConfig::request_serving();
        DataStream::factory(db, state, &config).await.unwrap()
    }

    fn decode(fetched: &FetchedBatch) -> Option<RowBatch> {
        decode_batch(&fetched.encoded).unwrap()
    }

    #[tokio::test]
    async fn variant_follows_key_shape() {
        let db = database(keyed_schema(), 1..=3).await;
        let stream = open(db, TransferState::new("widgets", 2)).await;
        assert!(stream.is_keyed());
        assert_eq!(stream.state().primary_key.as_deref(), Some("id"));

        let db = database(unkeyed_schema(), 1..=3).await;
        let stream = open(db, TransferState::new("events", 2)).await;
        assert!(!stream.is_keyed());
    }

    #[tokio::test]
    async fn keyed_fetch_does_not_commit_until_increment() {
        let db = database(keyed_schema(), 1..=5).await;
        let mut stream = open(db, TransferState::new("widgets", 2)).await;

        let first = stream.fetch(2).await.unwrap();
        assert_eq!(first.row_count, 2);
        assert_eq!(stream.state().filter, None);
        assert_eq!(stream.state().last_fetched, Some(2));

        // Fetching again without an acknowledgement yields the same rows.
        let again = stream.fetch(2).await.unwrap();
        assert_eq!(decode(&again), decode(&first));

        stream.increment(2);
        assert_eq!(stream.state().filter, Some(2));
        assert_eq!(stream.state().last_fetched, None);

        let second = stream.fetch(2).await.unwrap();
        assert_eq!(decode(&second).unwrap().data[0][0], Cell::I64(3));
    }

    #[tokio::test]
    async fn keyed_buffer_reads_ahead_by_the_configured_factor() {
        let db = database(keyed_schema(), 1..=100).await;
        let mut stream = open(db, TransferState::new("widgets", 10)).await;

        stream.fetch(10).await.unwrap();
        let DataStream::Keyed(keyed) = &stream else {
            panic!("expected a keyed stream");
        };
        assert_eq!(keyed.buffered_rows(), 30);
    }

    #[tokio::test]
    async fn keyed_stream_picks_up_rows_inserted_during_transfer() {
        let db = database(keyed_schema(), 1..=4).await;
        let mut stream = open_serving(db.clone(), TransferState::new("widgets", 2)).await;

        let mut seen = Vec::new();
        loop {
            let fetched = stream.fetch(2).await.unwrap();
            let Some(batch) = decode(&fetched) else {
                break;
            };
            seen.extend(batch.data.iter().map(|row| row[0].as_i64().unwrap()));
            stream.increment(fetched.row_count);

            if seen.len() == 2 {
                db.append_rows("widgets", rows([10, 11])).await.unwrap();
                db.delete_keys("widgets", "id", &[1]).await.unwrap();
            }
        }

        assert_eq!(seen, vec![1, 2, 3, 4, 10, 11]);
        assert!(stream.is_complete());
    }

    #[tokio::test]
    async fn offset_stream_completes_on_empty_page() {
        let db = database(unkeyed_schema(), 1..=3).await;
        let mut stream = open(db, TransferState::new("events", 2)).await;

        assert_eq!(stream.fetch(2).await.unwrap().row_count, 2);
        stream.increment(2);
        assert_eq!(stream.fetch(2).await.unwrap().row_count, 1);
        stream.increment(1);
        assert!(!stream.is_complete());

        let last = stream.fetch(2).await.unwrap();
        assert_eq!(last.row_count, 0);
        assert_eq!(decode(&last), None);
        assert!(stream.is_complete());
        assert_eq!(stream.state().offset, 3);
    }

    #[tokio::test]
    async fn import_advances_state_only_after_insert() {
        let destination = MemoryDatabase::new();
        destination.load_schema(&keyed_schema()).await.unwrap();
        let mut stream = open(destination.clone(), TransferState::new("widgets", 10)).await;

        let batch = RowBatch::new(
            vec!["id".into(), "name".into()],
            vec![
                vec![Cell::I64(1), Cell::String("ok".into())],
                vec![Cell::I64(2), Cell::String("ok".into())],
            ],
        );
        stream.import_rows(batch.clone()).await.unwrap();
        assert_eq!(stream.state().filter, Some(2));

        let err = stream.import_rows(batch).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicatePrimaryKey);
        assert_eq!(stream.state().filter, Some(2));
        assert_eq!(destination.count_rows("widgets").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn oversized_values_never_reach_the_destination() {
        let destination = MemoryDatabase::new();
        destination.load_schema(&keyed_schema()).await.unwrap();
        let mut stream = open(destination.clone(), TransferState::new("widgets", 10)).await;

        let batch = RowBatch::new(
            vec!["id".into(), "name".into()],
            vec![vec![Cell::I64(1), Cell::String("much too long".into())]],
        );
        let err = stream.import_rows(batch).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert_eq!(destination.insert_statements("widgets").await.unwrap(), 0);
        assert_eq!(stream.state().filter, None);
    }

    #[tokio::test]
    async fn verify_stream_resynchronizes_with_destination() {
        let destination = database(keyed_schema(), 1..=7).await;
        let mut state = TransferState::new("widgets", 10);
        state.filter = Some(3);
        state.last_fetched = Some(5);
        let mut keyed = open(destination, state).await;
        keyed.verify_stream().await.unwrap();
        assert_eq!(keyed.state().filter, Some(7));
        assert_eq!(keyed.state().last_fetched, None);

        let destination = database(unkeyed_schema(), 1..=4).await;
        let mut offset = open(destination, TransferState::new("events", 10)).await;
        offset.verify_stream().await.unwrap();
        assert_eq!(offset.state().offset, 4);
    }

    #[tokio::test]
    async fn server_side_import_rejects_corrupted_envelopes() {
        let source = database(keyed_schema(), 1..=3).await;
        let mut source_stream = open(source, TransferState::new("widgets", 10)).await;
        let mut envelope = source_stream.fetch_envelope().await.unwrap();

        let destination = MemoryDatabase::new();
        destination.load_schema(&keyed_schema()).await.unwrap();
        let state = envelope.sidecar.state.clone();
        let mut server_stream = open_serving(destination.clone(), state).await;

        let mut tampered = envelope.encoded_data.to_vec();
        tampered[0] ^= 0x55;
        let pristine = std::mem::replace(&mut envelope.encoded_data, Bytes::from(tampered));
        let err = server_stream
            .fetch_remote_in_server(&envelope)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptedData);
        assert_eq!(destination.count_rows("widgets").await.unwrap(), 0);

        envelope.encoded_data = pristine;
        let imported = server_stream
            .fetch_remote_in_server(&envelope)
            .await
            .unwrap();
        assert_eq!(imported.row_count, 3);
        assert_eq!(server_stream.state().filter, Some(3));
    }
}
