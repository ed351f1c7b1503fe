//! Whole-database transfers.
//!
//! An [`Operation`] sequences one push or pull: it verifies the server, opens a session,
//! transfers schemas, indexes and then every selected table batch by batch, resets sequences
//! and closes the session. The [`OperationState`] it maintains is written to a resume file
//! whenever the operation stops before completing, and [`Operation::resume`] continues from
//! such a file.

mod pull;
mod push;
mod tables;

use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use taps_config::shared::{ClientConfig, StreamConfig};
use tracing::{debug, error, info, warn};

pub use tables::TableFilter;

use crate::chunksize::ChunksizeController;
use crate::client::SessionClient;
use crate::concurrency::cancel::CancelRx;
use crate::db::Database;
use crate::error::{ErrorKind, TapsError, TapsResult};
use crate::state::{Direction, OperationState, TransferState};
use crate::stream::DataStream;
use crate::types::IndexDefinition;
use crate::url::safe_url;

/// Knobs of a single operation.
#[derive(Debug, Clone)]
pub struct OperationOptions {
    /// Chunk size of the first batch of every table.
    pub default_chunksize: usize,
    pub adaptive_chunksize: bool,
    pub skip_schema: bool,
    pub indexes_first: bool,
    /// Pattern a table name has to match to be transferred.
    pub table_filter: Option<String>,
    pub exclude_tables: Vec<String>,
    pub stream: StreamConfig,
    /// Directory receiving resume files.
    pub resume_dir: PathBuf,
}

impl OperationOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            default_chunksize: config.default_chunksize,
            adaptive_chunksize: config.adaptive_chunksize,
            skip_schema: false,
            indexes_first: false,
            table_filter: None,
            exclude_tables: Vec::new(),
            stream: config.stream.clone(),
            resume_dir: PathBuf::from("."),
        }
    }
}

/// How an operation ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Completed,
    /// Cancellation was requested; the operation can be continued from `resume_file`.
    Interrupted { resume_file: PathBuf },
}

/// A fatal error together with the resume file written for it, if any.
#[derive(Debug)]
pub struct OperationFailure {
    pub error: TapsError,
    pub resume_file: Option<PathBuf>,
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(resume_file) = &self.resume_file {
            write!(f, " (resume with {})", resume_file.display())?;
        }

        Ok(())
    }
}

impl Error for OperationFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

/// Whether a step ran to completion or stopped at a cancellation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Interrupted,
}

/// Timing of one successful batch.
#[derive(Debug, Clone, Copy)]
struct BatchTiming {
    row_count: usize,
    elapsed: Duration,
    time_in_db: Duration,
}

/// Rows transferred for one table, reported through tracing.
#[derive(Debug)]
struct TableProgress {
    table: String,
    total: u64,
    done: u64,
    started: Instant,
}

impl TableProgress {
    fn start(table: &str, total: u64, done: u64) -> Self {
        info!(table, total, "transferring table");

        Self {
            table: table.to_string(),
            total,
            done,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, rows: usize, chunksize: usize) {
        self.done += rows as u64;
        debug!(
            table = %self.table,
            rows,
            done = self.done,
            total = self.total,
            chunksize,
            "transferred batch"
        );
    }

    fn finish(self) {
        info!(
            table = %self.table,
            rows = self.done,
            total = self.total,
            elapsed_secs = self.started.elapsed().as_secs_f64(),
            "table complete"
        );
    }
}

/// A push or pull between a local database and a remote server.
#[derive(Debug)]
pub struct Operation<D, C> {
    db: D,
    client: C,
    state: OperationState,
    options: OperationOptions,
    cancel: CancelRx,
    resuming: bool,
    verified: bool,
}

impl<D, C> Operation<D, C>
where
    D: Database + Clone,
    C: SessionClient,
{
    /// Prepares a fresh operation. `remote_url` is only kept, masked, for the resume file.
    pub fn new(
        direction: Direction,
        db: D,
        client: C,
        database_url: &str,
        remote_url: &str,
        options: OperationOptions,
        cancel: CancelRx,
    ) -> Self {
        let mut state = OperationState::new(direction, database_url, remote_url);
        state.table_filter = options.table_filter.clone();
        state.exclude_tables = options.exclude_tables.clone();
        state.indexes_first = options.indexes_first;

        Self {
            db,
            client,
            state,
            options,
            cancel,
            resuming: false,
            verified: false,
        }
    }

    /// Prepares the continuation of an operation loaded from a resume file.
    ///
    /// The table selection and index ordering of the original run win over `options`.
    pub fn resume(
        db: D,
        mut client: C,
        state: OperationState,
        mut options: OperationOptions,
        cancel: CancelRx,
    ) -> Self {
        options.table_filter = state.table_filter.clone();
        options.exclude_tables = state.exclude_tables.clone();
        options.indexes_first = state.indexes_first;

        if let Some(session_uri) = &state.session_uri {
            client.resume_session(session_uri.clone());
        }

        Self {
            db,
            client,
            state,
            options,
            cancel,
            resuming: true,
            verified: false,
        }
    }

    pub fn state(&self) -> &OperationState {
        &self.state
    }

    pub fn direction(&self) -> Direction {
        self.state.direction
    }

    /// Runs the operation until it completes, is cancelled, or fails.
    ///
    /// A resume file is written on cancellation and on every failure after the server was
    /// verified.
    pub async fn run(&mut self) -> Result<OperationOutcome, OperationFailure> {
        info!(
            direction = %self.state.direction,
            database_url = %safe_url(&self.state.database_url),
            remote_url = %self.state.remote_url,
            resuming = self.resuming,
            "starting operation"
        );

        match self.execute().await {
            Ok(Flow::Continue) => {
                info!(direction = %self.state.direction, "operation complete");
                Ok(OperationOutcome::Completed)
            }
            Ok(Flow::Interrupted) => {
                warn!(direction = %self.state.direction, "operation interrupted");
                let resume_file = self
                    .state
                    .save(&self.options.resume_dir)
                    .await
                    .map_err(|error| OperationFailure {
                        error,
                        resume_file: None,
                    })?;

                Ok(OperationOutcome::Interrupted { resume_file })
            }
            Err(error) => {
                error!(direction = %self.state.direction, error = %error, "operation failed");
                let resume_file = self.save_after_failure().await;

                Err(OperationFailure { error, resume_file })
            }
        }
    }

    async fn save_after_failure(&self) -> Option<PathBuf> {
        if !self.verified {
            return None;
        }

        match self.state.save(&self.options.resume_dir).await {
            Ok(path) => Some(path),
            Err(err) => {
                error!(error = %err, "failed to save resume file");
                None
            }
        }
    }

    async fn execute(&mut self) -> TapsResult<Flow> {
        self.client.verify_server().await?;
        self.verified = true;

        if self.client.session_uri().is_none() {
            let session_uri = self.client.open_session().await?;
            self.state.session_uri = Some(session_uri);
        }

        match self.state.direction {
            Direction::Push => self.run_push().await,
            Direction::Pull => self.run_pull().await,
        }
    }

    fn table_filter(&self) -> TapsResult<TableFilter> {
        TableFilter::new(
            self.options.table_filter.as_deref(),
            &self.options.exclude_tables,
        )
    }

    /// Resumed runs never transfer schemas again.
    fn transfers_schema(&self) -> bool {
        !self.resuming && !self.options.skip_schema
    }

    fn new_transfer_state(&self, table: &str) -> TransferState {
        TransferState::new(table, self.options.default_chunksize)
    }

    /// Applies the table selection. Completed tables stay selected so that the index step
    /// still covers them on resume.
    fn select_tables(&self, names: Vec<String>) -> TapsResult<Vec<String>> {
        Ok(self.table_filter()?.apply(names, &BTreeSet::new()))
    }

    fn log_selection(&self) {
        let records: u64 = self.state.tables.values().sum();
        info!(tables = self.state.tables.len(), records, "selected tables");
    }

    /// Transfers the in-flight table of a resumed run and then every selected table that
    /// is not complete yet.
    async fn transfer_tables(&mut self, selected: &[String]) -> TapsResult<Flow> {
        if self.transfer_partial_data().await? == Flow::Interrupted {
            return Ok(Flow::Interrupted);
        }

        for table in selected {
            if self.state.completed_tables.contains(table) {
                continue;
            }

            let state = self.new_transfer_state(table);
            if self.transfer_table(state, false).await? == Flow::Interrupted {
                return Ok(Flow::Interrupted);
            }
        }

        Ok(Flow::Continue)
    }

    /// Re-attaches to the table that was in flight when a previous run stopped.
    async fn transfer_partial_data(&mut self) -> TapsResult<Flow> {
        let partial = self
            .state
            .stream_state
            .clone()
            .filter(|state| !self.state.completed_tables.contains(&state.table_name));

        let Some(state) = partial else {
            return Ok(Flow::Continue);
        };

        info!(table = %state.table_name, "resuming partially transferred table");
        self.transfer_table(state, true).await
    }

    /// Moves one table batch by batch until its stream completes.
    ///
    /// Cancellation is only observed between batches. The state stored in the operation
    /// before each batch is the checkpoint written to the resume file.
    async fn transfer_table(&mut self, state: TransferState, resumed: bool) -> TapsResult<Flow> {
        let table = state.table_name.clone();
        let mut stream = DataStream::factory(self.db.clone(), state, &self.options.stream).await?;
        if resumed {
            stream = self.resynchronize(stream).await?;
        }

        let total = self.state.tables.get(&table).copied().unwrap_or_default();
        let mut progress = TableProgress::start(&table, total, stream.state().offset);
        let mut chunksize = stream.state().chunksize;

        loop {
            self.state.stream_state = Some(stream.state().clone());
            if self.cancel.is_cancelled() {
                info!(table = %table, "cancellation requested, stopping before the next batch");
                return Ok(Flow::Interrupted);
            }

            let mut controller = ChunksizeController::new(chunksize);
            let timing = loop {
                let attempt = match self.state.direction {
                    Direction::Push => self.push_batch(&mut stream, controller.chunksize()).await,
                    Direction::Pull => self.pull_batch(&mut stream, controller.chunksize()).await,
                };

                match attempt {
                    Ok(timing) => break timing,
                    Err(BatchError::Corrupted(err)) => {
                        warn!(
                            table = %table,
                            error = %err,
                            "batch rejected as corrupted, retrying"
                        );
                        stream.state_mut().error = true;
                    }
                    Err(BatchError::Duplicate(err)) => {
                        warn!(
                            table = %table,
                            error = %err,
                            "duplicate key, resynchronizing stream"
                        );
                        stream = self.resynchronize(stream).await?;
                    }
                    Err(BatchError::Transport(err)) => {
                        controller.register_transport_failure(err)?;
                    }
                    Err(BatchError::Fatal(err)) => return Err(err),
                }
            };

            if stream.is_complete() {
                break;
            }

            progress.advance(timing.row_count, stream.state().chunksize);
            chunksize = self.finish_batch(stream.state_mut(), controller, timing, chunksize);
        }

        progress.finish();
        self.state.completed_tables.insert(table);
        self.state.stream_state = None;

        Ok(Flow::Continue)
    }

    /// Re-derives the stream position from what the destination contains.
    async fn resynchronize(&self, stream: DataStream<D>) -> TapsResult<DataStream<D>> {
        match self.state.direction {
            Direction::Push => {
                let verified = self.client.push_verify_stream(stream.state()).await?;
                DataStream::factory(self.db.clone(), verified, &self.options.stream).await
            }
            Direction::Pull => {
                let mut stream = stream;
                stream.verify_stream().await?;
                Ok(stream)
            }
        }
    }

    /// Records the outcome of a successful batch and returns the size of the next one.
    fn finish_batch(
        &self,
        state: &mut TransferState,
        controller: ChunksizeController,
        timing: BatchTiming,
        chunksize: usize,
    ) -> usize {
        state.record_chunksize();
        state.error = false;

        let next = if self.options.adaptive_chunksize {
            controller.finish(timing.elapsed, timing.time_in_db)
        } else {
            chunksize
        };
        state.chunksize = next;

        next
    }
}

/// Keeps only the indexes of transferred tables.
fn indexes_for(indexes: Vec<IndexDefinition>, tables: &[String]) -> Vec<IndexDefinition> {
    indexes
        .into_iter()
        .filter(|index| tables.contains(&index.table))
        .collect()
}

/// Splits batch errors into the ones retried in place and the ones that end the operation.
#[derive(Debug)]
enum BatchError {
    Corrupted(TapsError),
    Duplicate(TapsError),
    Transport(TapsError),
    Fatal(TapsError),
}

impl From<TapsError> for BatchError {
    fn from(err: TapsError) -> Self {
        match err.kind() {
            ErrorKind::CorruptedData => BatchError::Corrupted(err),
            ErrorKind::DuplicatePrimaryKey => BatchError::Duplicate(err),
            kind if kind.is_transport_retriable() => BatchError::Transport(err),
            _ => BatchError::Fatal(err),
        }
    }
}
