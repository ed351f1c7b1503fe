use crate::db::{Database, MemoryDatabase};
use crate::types::{Cell, ColumnSchema, IndexDefinition, TableRow, TableSchema};

/// Longest name accepted by the `widgets` table.
pub const WIDGET_NAME_LENGTH: usize = 32;

/// A table with a single integer primary key, streamed by key.
pub fn widgets_schema() -> TableSchema {
    TableSchema::new(
        "widgets",
        vec![
            ColumnSchema::new("id", "integer").primary_key().auto_increment(),
            ColumnSchema::new("name", format!("varchar({WIDGET_NAME_LENGTH})"))
                .with_max_length(WIDGET_NAME_LENGTH),
            ColumnSchema::new("price", "bigint"),
        ],
    )
}

pub fn widget_row(id: i64) -> TableRow {
    TableRow::new(vec![
        Cell::I64(id),
        Cell::String(format!("widget {id}")),
        Cell::I64(id * 100),
    ])
}

pub fn widget_rows(ids: impl IntoIterator<Item = i64>) -> Vec<TableRow> {
    ids.into_iter().map(widget_row).collect()
}

/// A table without a primary key, streamed by offset.
pub fn events_schema() -> TableSchema {
    TableSchema::new(
        "events",
        vec![
            ColumnSchema::new("at", "bigint"),
            ColumnSchema::new("kind", "text"),
        ],
    )
}

pub fn event_rows(count: i64) -> Vec<TableRow> {
    (1..=count)
        .map(|at| TableRow::new(vec![Cell::I64(at), Cell::String(format!("kind {}", at % 7))]))
        .collect()
}

/// A keyed table whose `code` column only accepts five characters.
pub fn short_codes_schema() -> TableSchema {
    TableSchema::new(
        "short_codes",
        vec![
            ColumnSchema::new("id", "integer").primary_key(),
            ColumnSchema::new("code", "varchar(5)").with_max_length(5),
        ],
    )
}

pub fn widgets_name_index() -> IndexDefinition {
    IndexDefinition {
        name: "widgets_name_idx".to_string(),
        table: "widgets".to_string(),
        columns: vec!["name".to_string()],
        unique: false,
    }
}

/// A memory database holding the given tables.
pub async fn memory_database(tables: Vec<(TableSchema, Vec<TableRow>)>) -> MemoryDatabase {
    let db = MemoryDatabase::new();
    for (schema, rows) in tables {
        db.create_table(schema, rows).await;
    }

    db
}

/// A memory database with empty copies of the given tables.
pub async fn empty_database(schemas: Vec<TableSchema>) -> MemoryDatabase {
    let db = MemoryDatabase::new();
    for schema in schemas {
        // Creating a table in a fresh memory database cannot fail.
        let _ = db.load_schema(&schema).await;
    }

    db
}

/// Values of the `id` column of `table`, sorted.
pub async fn sorted_ids(db: &MemoryDatabase, table: &str) -> Vec<i64> {
    let mut ids: Vec<i64> = db
        .rows(table)
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|row| row.values.first().and_then(Cell::as_i64))
        .collect();
    ids.sort_unstable();

    ids
}
