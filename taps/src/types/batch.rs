use serde::{Deserialize, Serialize};

use crate::types::Cell;

/// A batch of rows as it travels on the wire: a column header and one value list per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowBatch {
    pub header: Vec<String>,
    pub data: Vec<Vec<Cell>>,
}

impl RowBatch {
    pub fn new(header: Vec<String>, data: Vec<Vec<Cell>>) -> Self {
        Self { header, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|column| column == name)
    }

    /// Largest integer value of `column` in this batch.
    pub fn max_key(&self, column: &str) -> Option<i64> {
        let idx = self.column_index(column)?;
        self.data
            .iter()
            .filter_map(|row| row.get(idx).and_then(Cell::as_i64))
            .max()
    }
}
