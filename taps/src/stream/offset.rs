use tracing::debug;

use crate::codec::format_rows;
use crate::db::Database;
use crate::error::TapsResult;
use crate::state::TransferState;
use crate::types::{RowBatch, TableSchema};

/// Pages through a table with `LIMIT`/`OFFSET`, ordered by the primary key or, without
/// one, by every column.
#[derive(Debug)]
pub struct OffsetStream<D> {
    pub(super) db: D,
    pub(super) schema: TableSchema,
    pub(super) state: TransferState,
    pub(super) complete: bool,
}

impl<D: Database> OffsetStream<D> {
    pub fn new(db: D, schema: TableSchema, mut state: TransferState) -> Self {
        state.primary_key = None;
        state.filter = None;
        state.last_fetched = None;

        Self {
            db,
            schema,
            state,
            complete: false,
        }
    }

    pub(super) async fn fetch_rows(&mut self) -> TapsResult<Option<RowBatch>> {
        let rows = self
            .db
            .fetch_rows_by_offset(
                &self.schema,
                &self.schema.order_by(),
                self.state.offset,
                self.state.chunksize,
            )
            .await?;

        debug!(
            table = %self.state.table_name,
            offset = self.state.offset,
            rows = rows.len(),
            "fetched rows by offset"
        );

        if rows.is_empty() {
            self.complete = true;
            return Ok(None);
        }

        format_rows(&self.schema, rows).map(Some)
    }

    pub(super) fn increment(&mut self, row_count: usize) {
        self.state.offset += row_count as u64;
    }

    pub(super) fn advance_after_import(&mut self, batch: &RowBatch) {
        self.increment(batch.len());
    }

    pub(super) async fn verify(&mut self) -> TapsResult<()> {
        self.state.offset = self.db.count_rows(&self.state.table_name).await?;

        Ok(())
    }
}
