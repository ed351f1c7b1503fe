use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::TapsResult;
use crate::state::TransferState;
use crate::url::safe_url;

/// Which side of the transfer is the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Local database to remote server.
    Push,
    /// Remote server to local database.
    Pull,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Push => f.write_str("push"),
            Direction::Pull => f.write_str("pull"),
        }
    }
}

/// Everything needed to continue an interrupted operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationState {
    pub direction: Direction,
    pub database_url: String,
    /// Remote URL with credentials masked. The real URL is supplied again on resume.
    pub remote_url: String,
    #[serde(default)]
    pub session_uri: Option<String>,
    #[serde(default)]
    pub completed_tables: BTreeSet<String>,
    #[serde(default)]
    pub stream_state: Option<TransferState>,
    #[serde(default)]
    pub table_filter: Option<String>,
    #[serde(default)]
    pub exclude_tables: Vec<String>,
    /// Row counts of the tables selected when the operation started.
    #[serde(default)]
    pub tables: BTreeMap<String, u64>,
    #[serde(default)]
    pub indexes_first: bool,
}

impl OperationState {
    pub fn new(direction: Direction, database_url: &str, remote_url: &str) -> Self {
        Self {
            direction,
            database_url: database_url.to_string(),
            remote_url: safe_url(remote_url),
            session_uri: None,
            completed_tables: BTreeSet::new(),
            stream_state: None,
            table_filter: None,
            exclude_tables: Vec::new(),
            tables: BTreeMap::new(),
            indexes_first: false,
        }
    }

    /// Writes the state as JSON into `dir` and returns the path of the resume file.
    pub async fn save(&self, dir: &Path) -> TapsResult<PathBuf> {
        let path = dir.join(resume_file_name(self.direction, Utc::now()));
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&path, json).await?;

        info!(
            path = %path.display(),
            database_url = %safe_url(&self.database_url),
            "saved resume file"
        );

        Ok(path)
    }

    pub async fn load(path: &Path) -> TapsResult<OperationState> {
        let json = tokio::fs::read(path).await?;
        let state = serde_json::from_slice(&json)?;

        Ok(state)
    }
}

/// Name of the resume file written at `at`, e.g. `push_202410171530.dat`.
pub fn resume_file_name(direction: Direction, at: DateTime<Utc>) -> String {
    format!("{direction}_{}.dat", at.format("%Y%m%d%H%M"))
}
