use std::time::Instant;

use tracing::info;

use crate::client::SessionClient;
use crate::db::Database;
use crate::error::TapsResult;
use crate::operation::{BatchError, BatchTiming, Flow, Operation, indexes_for};
use crate::stream::DataStream;

impl<D, C> Operation<D, C>
where
    D: Database + Clone,
    C: SessionClient,
{
    pub(super) async fn run_pull(&mut self) -> TapsResult<Flow> {
        let selected = self.select_tables(self.client.pull_table_names().await?)?;
        for table in &selected {
            let rows = self.client.pull_table_count(table).await?;
            self.state.tables.insert(table.clone(), rows);
        }
        self.log_selection();

        if self.transfers_schema() {
            for table in &selected {
                let schema = self.client.pull_schema(table).await?;
                self.db.load_schema(&schema).await?;
            }
            info!(tables = selected.len(), "pulled schemas");
        }

        if !self.resuming && self.options.indexes_first {
            self.pull_indexes(&selected).await?;
        }

        if self.transfer_tables(&selected).await? == Flow::Interrupted {
            return Ok(Flow::Interrupted);
        }

        if !self.options.indexes_first {
            self.pull_indexes(&selected).await?;
        }

        self.db.reset_sequences().await?;
        self.client.close_session().await?;

        Ok(Flow::Continue)
    }

    async fn pull_indexes(&self, tables: &[String]) -> TapsResult<()> {
        let indexes = indexes_for(self.client.pull_indexes().await?, tables);
        self.db.load_indexes(&indexes).await?;
        info!(indexes = indexes.len(), "pulled indexes");

        Ok(())
    }

    /// Asks the server for the next batch and imports it into the local database.
    pub(super) async fn pull_batch(
        &self,
        stream: &mut DataStream<D>,
        chunksize: usize,
    ) -> Result<BatchTiming, BatchError> {
        let started = Instant::now();
        stream.state_mut().chunksize = chunksize;
        let imported = stream.fetch_remote(&self.client).await?;

        Ok(BatchTiming {
            row_count: imported.row_count,
            elapsed: started.elapsed(),
            time_in_db: imported.time_in_db,
        })
    }
}
