use std::time::Instant;

use tracing::info;

use crate::client::SessionClient;
use crate::db::Database;
use crate::error::TapsResult;
use crate::multipart::Envelope;
use crate::operation::{BatchError, BatchTiming, Flow, Operation, indexes_for};
use crate::stream::DataStream;

impl<D, C> Operation<D, C>
where
    D: Database + Clone,
    C: SessionClient,
{
    pub(super) async fn run_push(&mut self) -> TapsResult<Flow> {
        let selected = self.select_tables(self.db.table_names().await?)?;
        for table in &selected {
            let rows = self.db.count_rows(table).await?;
            self.state.tables.insert(table.clone(), rows);
        }
        self.log_selection();

        if self.transfers_schema() {
            for table in &selected {
                let schema = self.db.dump_schema(table).await?;
                self.client.push_schema(&schema).await?;
            }
            info!(tables = selected.len(), "pushed schemas");
        }

        if !self.resuming && self.options.indexes_first {
            self.push_indexes(&selected).await?;
        }

        if self.transfer_tables(&selected).await? == Flow::Interrupted {
            return Ok(Flow::Interrupted);
        }

        if !self.options.indexes_first {
            self.push_indexes(&selected).await?;
        }

        self.client.push_reset_sequences().await?;
        self.client.close_session().await?;

        Ok(Flow::Continue)
    }

    async fn push_indexes(&self, tables: &[String]) -> TapsResult<()> {
        let indexes = indexes_for(self.db.dump_indexes().await?, tables);
        self.client.push_indexes(&indexes).await?;
        info!(indexes = indexes.len(), "pushed indexes");

        Ok(())
    }

    /// Sends one batch read from the local database.
    ///
    /// The local stream only commits the rows once the server acknowledged them.
    pub(super) async fn push_batch(
        &self,
        stream: &mut DataStream<D>,
        chunksize: usize,
    ) -> Result<BatchTiming, BatchError> {
        let started = Instant::now();
        let fetched = stream.fetch(chunksize).await?;
        if stream.is_complete() {
            return Ok(BatchTiming {
                row_count: 0,
                elapsed: started.elapsed(),
                time_in_db: fetched.elapsed,
            });
        }

        let envelope = Envelope::new(fetched.encoded, stream.state().clone(), fetched.elapsed);
        let response = self.client.push_table(&envelope).await?;
        stream.increment(fetched.row_count);

        Ok(BatchTiming {
            row_count: fetched.row_count,
            elapsed: started.elapsed(),
            time_in_db: fetched.elapsed.saturating_add(response.elapsed()),
        })
    }
}
