use serde::{Deserialize, Serialize};

/// Number of batches of a table whose chunk sizes feed the rolling statistics.
pub const CHUNKSIZE_TRAINING_WINDOW: usize = 5;

/// Progress of one table transfer.
///
/// The state is shipped with every batch and stored in resume files, so both sides of a
/// transfer can rebuild the same stream from it. `offset` and `filter` only move after the
/// destination confirmed a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferState {
    pub table_name: String,
    #[serde(default)]
    pub offset: u64,
    pub chunksize: usize,
    #[serde(default)]
    pub avg_chunksize: usize,
    #[serde(default)]
    pub num_chunksize: usize,
    #[serde(default)]
    pub total_chunksize: usize,
    /// Set when the last attempt was rejected as corrupted.
    #[serde(default)]
    pub error: bool,
    /// Key column, present only for tables streamed by key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    /// Largest key known to be committed at the destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<i64>,
    /// Largest key handed to the transport but not acknowledged yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fetched: Option<i64>,
}

impl TransferState {
    pub fn new(table_name: impl Into<String>, chunksize: usize) -> Self {
        Self {
            table_name: table_name.into(),
            offset: 0,
            chunksize: chunksize.max(1),
            avg_chunksize: 0,
            num_chunksize: 0,
            total_chunksize: 0,
            error: false,
            primary_key: None,
            filter: None,
            last_fetched: None,
        }
    }

    /// Folds the current chunk size into the rolling statistics while the training window
    /// is open.
    pub fn record_chunksize(&mut self) {
        if self.num_chunksize >= CHUNKSIZE_TRAINING_WINDOW {
            return;
        }

        self.num_chunksize += 1;
        self.total_chunksize += self.chunksize;
        self.avg_chunksize = self.total_chunksize / self.num_chunksize;
    }
}
