use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::codec::validate_batch;
use crate::db::base::Database;
use crate::error::{ErrorKind, TapsResult};
use crate::taps_error;
use crate::types::{Cell, IndexDefinition, RowBatch, TableRow, TableSchema};

#[derive(Debug)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<TableRow>,
    indexes: Vec<IndexDefinition>,
    insert_statements: usize,
}

#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<String, MemoryTable>,
    sequence_resets: usize,
}

/// A database kept entirely in memory.
///
/// Tables enforce their declared column bounds and primary key uniqueness the way a real
/// database would, which makes this adapter suitable for exercising the transfer logic
/// end to end. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `schema` and fills it with `rows` without going through [`Database::insert_rows`].
    pub async fn create_table(&self, schema: TableSchema, rows: Vec<TableRow>) {
        let mut inner = self.inner.lock().await;
        inner.tables.insert(
            schema.name.clone(),
            MemoryTable {
                schema,
                rows,
                indexes: Vec::new(),
                insert_statements: 0,
            },
        );
    }

    /// Appends rows to an existing table, bypassing every constraint.
    pub async fn append_rows(&self, table: &str, rows: Vec<TableRow>) -> TapsResult<()> {
        let mut inner = self.inner.lock().await;
        let table = table_mut(&mut inner, table)?;
        table.rows.extend(rows);

        Ok(())
    }

    /// Removes every row whose `key` column is in `keys`.
    pub async fn delete_keys(&self, table: &str, key: &str, keys: &[i64]) -> TapsResult<usize> {
        let mut inner = self.inner.lock().await;
        let table = table_mut(&mut inner, table)?;
        let idx = key_index(&table.schema, key)?;

        let before = table.rows.len();
        table
            .rows
            .retain(|row| !row.values[idx].as_i64().is_some_and(|k| keys.contains(&k)));

        Ok(before - table.rows.len())
    }

    /// All rows of `table` in insertion order.
    pub async fn rows(&self, table: &str) -> TapsResult<Vec<TableRow>> {
        let inner = self.inner.lock().await;
        let table = table_ref(&inner, table)?;

        Ok(table.rows.clone())
    }

    /// Number of successful [`Database::insert_rows`] calls against `table`.
    pub async fn insert_statements(&self, table: &str) -> TapsResult<usize> {
        let inner = self.inner.lock().await;
        Ok(table_ref(&inner, table)?.insert_statements)
    }

    pub async fn indexes(&self, table: &str) -> TapsResult<Vec<IndexDefinition>> {
        let inner = self.inner.lock().await;
        Ok(table_ref(&inner, table)?.indexes.clone())
    }

    pub async fn sequence_resets(&self) -> usize {
        self.inner.lock().await.sequence_resets
    }
}

fn table_ref<'a>(inner: &'a Inner, table: &str) -> TapsResult<&'a MemoryTable> {
    inner
        .tables
        .get(table)
        .ok_or_else(|| taps_error!(ErrorKind::SchemaError, "Table does not exist", table))
}

fn table_mut<'a>(inner: &'a mut Inner, table: &str) -> TapsResult<&'a mut MemoryTable> {
    inner
        .tables
        .get_mut(table)
        .ok_or_else(|| taps_error!(ErrorKind::SchemaError, "Table does not exist", table))
}

fn key_index(schema: &TableSchema, key: &str) -> TapsResult<usize> {
    schema.column_index(key).ok_or_else(|| {
        taps_error!(
            ErrorKind::SchemaError,
            "Column does not exist",
            format!("{}.{key}", schema.name)
        )
    })
}

fn compare_rows(a: &[Cell], b: &[Cell], columns: &[usize]) -> Ordering {
    columns
        .iter()
        .map(|&idx| a[idx].total_cmp(&b[idx]))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Primary key values of one row, ordered with [`Cell::total_cmp`].
#[derive(Debug)]
struct RowKey(Vec<Cell>);

impl PartialEq for RowKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for RowKey {}

impl PartialOrd for RowKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RowKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let columns: Vec<usize> = (0..self.0.len()).collect();
        compare_rows(&self.0, &other.0, &columns)
    }
}

fn row_key(values: &[Cell], key_columns: &[usize]) -> RowKey {
    RowKey(key_columns.iter().map(|&idx| values[idx].clone()).collect())
}

impl Database for MemoryDatabase {
    async fn table_names(&self) -> TapsResult<Vec<String>> {
        let inner = self.inner.lock().await;
        Ok(inner.tables.keys().cloned().collect())
    }

    async fn table_schema(&self, table: &str) -> TapsResult<TableSchema> {
        let inner = self.inner.lock().await;
        Ok(table_ref(&inner, table)?.schema.clone())
    }

    async fn count_rows(&self, table: &str) -> TapsResult<u64> {
        let inner = self.inner.lock().await;
        Ok(table_ref(&inner, table)?.rows.len() as u64)
    }

    async fn fetch_rows_by_offset(
        &self,
        schema: &TableSchema,
        order_by: &[String],
        offset: u64,
        limit: usize,
    ) -> TapsResult<Vec<TableRow>> {
        let inner = self.inner.lock().await;
        let table = table_ref(&inner, &schema.name)?;
        let columns = order_by
            .iter()
            .map(|column| key_index(&table.schema, column))
            .collect::<TapsResult<Vec<_>>>()?;

        let mut rows = table.rows.clone();
        rows.sort_by(|a, b| compare_rows(&a.values, &b.values, &columns));

        Ok(rows
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit)
            .collect())
    }

    async fn fetch_rows_after_key(
        &self,
        schema: &TableSchema,
        key: &str,
        after: Option<i64>,
        limit: usize,
    ) -> TapsResult<Vec<TableRow>> {
        let inner = self.inner.lock().await;
        let table = table_ref(&inner, &schema.name)?;
        let idx = key_index(&table.schema, key)?;

        let mut rows: Vec<TableRow> = table
            .rows
            .iter()
            .filter(|row| match (row.values[idx].as_i64(), after) {
                (Some(value), Some(after)) => value > after,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.values[idx].as_i64());
        rows.truncate(limit);

        Ok(rows)
    }

    async fn max_key(&self, table: &str, key: &str) -> TapsResult<Option<i64>> {
        let inner = self.inner.lock().await;
        let table = table_ref(&inner, table)?;
        let idx = key_index(&table.schema, key)?;

        Ok(table.rows.iter().filter_map(|row| row.values[idx].as_i64()).max())
    }

    async fn insert_rows(
        &self,
        table: &str,
        header: &[String],
        rows: &[Vec<Cell>],
    ) -> TapsResult<()> {
        let mut inner = self.inner.lock().await;
        let table = table_mut(&mut inner, table)?;
        let schema = &table.schema;

        let batch = RowBatch::new(header.to_vec(), rows.to_vec());
        validate_batch(schema, &batch)?;

        let positions = header
            .iter()
            .map(|column| key_index(schema, column))
            .collect::<TapsResult<Vec<_>>>()?;
        let key_columns: Vec<usize> = schema
            .columns
            .iter()
            .enumerate()
            .filter(|(_, column)| column.primary)
            .map(|(idx, _)| idx)
            .collect();

        let mut new_rows = Vec::with_capacity(rows.len());
        for row in batch.data {
            let mut values = vec![Cell::Null; schema.columns.len()];
            for (cell, &position) in row.into_iter().zip(positions.iter()) {
                values[position] = cell;
            }
            new_rows.push(TableRow::new(values));
        }

        if !key_columns.is_empty() {
            let mut keys: BTreeSet<RowKey> = table
                .rows
                .iter()
                .map(|row| row_key(&row.values, &key_columns))
                .collect();
            for row in &new_rows {
                if !keys.insert(row_key(&row.values, &key_columns)) {
                    bail!(
                        ErrorKind::DuplicatePrimaryKey,
                        "Row with the same primary key already exists",
                        format!("table {}", schema.name)
                    );
                }
            }
        }

        debug!(table = %schema.name, rows = new_rows.len(), "inserted rows into memory table");
        table.rows.extend(new_rows);
        table.insert_statements += 1;

        Ok(())
    }

    async fn load_schema(&self, schema: &TableSchema) -> TapsResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .tables
            .entry(schema.name.clone())
            .or_insert_with(|| MemoryTable {
                schema: schema.clone(),
                rows: Vec::new(),
                indexes: Vec::new(),
                insert_statements: 0,
            });

        Ok(())
    }

    async fn dump_indexes(&self) -> TapsResult<Vec<IndexDefinition>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tables
            .values()
            .flat_map(|table| table.indexes.iter().cloned())
            .collect())
    }

    async fn load_indexes(&self, indexes: &[IndexDefinition]) -> TapsResult<()> {
        let mut inner = self.inner.lock().await;
        for index in indexes {
            let table = table_mut(&mut inner, &index.table)?;
            if !table.indexes.iter().any(|existing| existing.name == index.name) {
                table.indexes.push(index.clone());
            }
        }

        Ok(())
    }

    async fn reset_sequences(&self) -> TapsResult<()> {
        let mut inner = self.inner.lock().await;
        inner.sequence_resets += 1;

        Ok(())
    }
}
