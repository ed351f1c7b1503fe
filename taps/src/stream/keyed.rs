use std::collections::VecDeque;

use taps_config::shared::StreamConfig;
use tracing::debug;

use crate::codec::format_rows;
use crate::db::Database;
use crate::error::TapsResult;
use crate::state::TransferState;
use crate::types::{RowBatch, TableRow, TableSchema};

/// Streams a table with a single integer primary key in key order.
///
/// Rows are read ahead into a buffer holding a multiple of the chunk size. A fetch hands
/// out the front of the buffer without removing it; only [`KeyedStream::increment`] drops
/// rows, once the destination acknowledged them. Paging by key instead of offset keeps the
/// stream stable while rows are inserted or deleted behind the cursor.
#[derive(Debug)]
pub struct KeyedStream<D> {
    pub(super) db: D,
    pub(super) schema: TableSchema,
    pub(super) state: TransferState,
    pub(super) complete: bool,
    key: String,
    key_index: usize,
    buffer: VecDeque<TableRow>,
    /// Largest key loaded into the buffer so far.
    buffer_high: Option<i64>,
    config: StreamConfig,
}

impl<D: Database> KeyedStream<D> {
    pub fn new(
        db: D,
        schema: TableSchema,
        key: String,
        key_index: usize,
        mut state: TransferState,
        config: StreamConfig,
    ) -> Self {
        state.primary_key = Some(key.clone());

        Self {
            db,
            schema,
            state,
            complete: false,
            key,
            key_index,
            buffer: VecDeque::new(),
            buffer_high: None,
            config,
        }
    }

    pub fn buffered_rows(&self) -> usize {
        self.buffer.len()
    }

    fn row_key(&self, row: &TableRow) -> Option<i64> {
        row.values.get(self.key_index).and_then(|cell| cell.as_i64())
    }

    async fn load_buffer(&mut self) -> TapsResult<()> {
        let limit = self.config.buffer_limit(self.state.chunksize);
        let after = self.buffer_high.or(self.state.filter);
        let rows = self
            .db
            .fetch_rows_after_key(&self.schema, &self.key, after, limit)
            .await?;

        debug!(
            table = %self.state.table_name,
            after = ?after,
            limit,
            rows = rows.len(),
            "loaded keyed buffer"
        );

        if let Some(high) = rows.last().and_then(|row| self.row_key(row)) {
            self.buffer_high = Some(high);
        }
        self.buffer.extend(rows);

        Ok(())
    }

    pub(super) async fn fetch_rows(&mut self) -> TapsResult<Option<RowBatch>> {
        let chunksize = self.state.chunksize;
        if self.buffer.len() < chunksize {
            self.load_buffer().await?;
        }

        if self.buffer.is_empty() {
            self.complete = true;
            return Ok(None);
        }

        let rows: Vec<TableRow> = self.buffer.iter().take(chunksize).cloned().collect();
        self.state.last_fetched = rows.last().and_then(|row| self.row_key(row));

        format_rows(&self.schema, rows).map(Some)
    }

    /// Drops `row_count` acknowledged rows from the buffer and commits their keys.
    pub(super) fn increment(&mut self, row_count: usize) {
        let mut last = None;
        for _ in 0..row_count {
            match self.buffer.pop_front() {
                Some(row) => last = self.row_key(&row),
                None => break,
            }
        }

        if let Some(last) = last {
            self.state.filter = Some(last);
        }
        self.state.last_fetched = None;
    }

    pub(super) fn advance_after_import(&mut self, batch: &RowBatch) {
        if let Some(max) = batch.max_key(&self.key) {
            self.state.filter = Some(self.state.filter.map_or(max, |filter| filter.max(max)));
        }
        self.state.last_fetched = None;
    }

    /// Moves the cursor to the largest key present in the table and discards the buffer.
    pub(super) async fn verify(&mut self) -> TapsResult<()> {
        self.state.filter = self.db.max_key(&self.state.table_name, &self.key).await?;
        self.state.last_fetched = None;
        self.buffer.clear();
        self.buffer_high = None;

        Ok(())
    }
}
