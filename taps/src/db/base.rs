use std::future::Future;

use crate::error::TapsResult;
use crate::types::{Cell, IndexDefinition, TableRow, TableSchema};

/// Row and schema access needed to move a database.
///
/// Every method maps to a handful of statements on the underlying database. Rows are
/// always returned with values in the column order of [`Database::table_schema`].
pub trait Database {
    fn table_names(&self) -> impl Future<Output = TapsResult<Vec<String>>> + Send;

    fn table_schema(&self, table: &str) -> impl Future<Output = TapsResult<TableSchema>> + Send;

    fn count_rows(&self, table: &str) -> impl Future<Output = TapsResult<u64>> + Send;

    /// Reads `limit` rows after skipping `offset`, ordered by `order_by`.
    ///
    /// `schema` is the one the caller obtained from [`Database::table_schema`]; rows are
    /// returned in its column order.
    fn fetch_rows_by_offset(
        &self,
        schema: &TableSchema,
        order_by: &[String],
        offset: u64,
        limit: usize,
    ) -> impl Future<Output = TapsResult<Vec<TableRow>>> + Send;

    /// Reads up to `limit` rows with `key > after`, ordered by `key`. `None` reads from the
    /// start of the table.
    fn fetch_rows_after_key(
        &self,
        schema: &TableSchema,
        key: &str,
        after: Option<i64>,
        limit: usize,
    ) -> impl Future<Output = TapsResult<Vec<TableRow>>> + Send;

    fn max_key(&self, table: &str, key: &str)
    -> impl Future<Output = TapsResult<Option<i64>>> + Send;

    /// Inserts all rows with a single statement inside a single transaction.
    fn insert_rows(
        &self,
        table: &str,
        header: &[String],
        rows: &[Vec<Cell>],
    ) -> impl Future<Output = TapsResult<()>> + Send;

    /// Alias for [`Database::table_schema`] used by the schema transfer step.
    fn dump_schema(&self, table: &str) -> impl Future<Output = TapsResult<TableSchema>> + Send {
        self.table_schema(table)
    }

    /// Creates the table described by `schema` unless it already exists.
    fn load_schema(&self, schema: &TableSchema) -> impl Future<Output = TapsResult<()>> + Send;

    fn dump_indexes(&self) -> impl Future<Output = TapsResult<Vec<IndexDefinition>>> + Send;

    fn load_indexes(
        &self,
        indexes: &[IndexDefinition],
    ) -> impl Future<Output = TapsResult<()>> + Send;

    /// Moves every sequence past the largest value of the column it feeds.
    fn reset_sequences(&self) -> impl Future<Output = TapsResult<()>> + Send;
}
