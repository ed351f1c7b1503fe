use pg_escape::quote_identifier;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use tracing::{debug, info};

use crate::bail;
use crate::db::base::Database;
use crate::error::{ErrorKind, TapsResult};
use crate::taps_error;
use crate::types::{Cell, ColumnSchema, IndexDefinition, TableRow, TableSchema};

const MAX_CONNECTIONS: u32 = 2;

const TABLE_NAMES_QUERY: &str = r#"
select c.relname::text
from pg_class c
join pg_namespace n on n.oid = c.relnamespace
where c.relkind in ('r', 'p') and n.nspname = current_schema()
order by c.relname
"#;

const TABLE_SCHEMA_QUERY: &str = r#"
select a.attname::text as name,
       format_type(a.atttypid, a.atttypmod) as data_type,
       case when a.atttypid in (1042, 1043) and a.atttypmod > 4 then a.atttypmod - 4 end as max_length,
       not a.attnotnull as nullable,
       coalesce(a.attnum = any(i.indkey), false) as is_primary,
       pg_get_serial_sequence($1, a.attname) is not null as auto_increment
from pg_attribute a
left join pg_index i on i.indrelid = a.attrelid and i.indisprimary
where a.attrelid = $1::regclass and a.attnum > 0 and not a.attisdropped
order by a.attnum
"#;

const INDEXES_QUERY: &str = r#"
select i.relname::text as index_name,
       t.relname::text as table_name,
       ix.indisunique as is_unique,
       array(
           select a.attname::text
           from unnest(ix.indkey::int2[]) with ordinality as k(attnum, ord)
           join pg_attribute a on a.attrelid = t.oid and a.attnum = k.attnum
           order by k.ord
       ) as columns
from pg_index ix
join pg_class i on i.oid = ix.indexrelid
join pg_class t on t.oid = ix.indrelid
join pg_namespace n on n.oid = t.relnamespace
where n.nspname = current_schema()
  and t.relkind in ('r', 'p')
  and not ix.indisprimary
  and not (0 = any(ix.indkey::int2[]))
order by t.relname, i.relname
"#;

/// A PostgreSQL database reached through a small `sqlx` pool.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Creates the pool without opening a connection.
    pub fn connect_lazy(url: &str) -> TapsResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_lazy(url)?;

        Ok(Self { pool })
    }

    /// Opens a connection and runs a trivial query, surfacing bad URLs and credentials early.
    pub async fn ping(&self) -> TapsResult<()> {
        sqlx::query("select 1").execute(&self.pool).await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch_json_rows(
        &self,
        schema: &TableSchema,
        sql: &str,
        binds: Binds,
    ) -> TapsResult<Vec<TableRow>> {
        let mut query = sqlx::query_scalar::<_, String>(sql);
        query = match binds {
            Binds::Offset { limit, offset } => query.bind(limit).bind(offset),
            Binds::After { after, limit } => query.bind(after).bind(limit),
            Binds::Limit { limit } => query.bind(limit),
        };
        let rows = query.fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|json| json_to_row(schema, &json))
            .collect()
    }
}

enum Binds {
    Offset { limit: i64, offset: i64 },
    After { after: i64, limit: i64 },
    Limit { limit: i64 },
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn json_to_row(schema: &TableSchema, json: &str) -> TapsResult<TableRow> {
    let mut object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)?;
    let values = schema
        .columns
        .iter()
        .map(|column| {
            object
                .remove(&column.name)
                .map(Cell::from_json)
                .unwrap_or(Cell::Null)
        })
        .collect();

    Ok(TableRow::new(values))
}

/// Select list for reading `schema` through `row_to_json`, with every column qualified by
/// `alias`.
///
/// Arbitrary precision values are read as text so that JSON never turns them into floats.
/// `json_populate_recordset` parses the text back into the column type on insert.
fn select_list(schema: &TableSchema, alias: &str) -> String {
    schema
        .columns
        .iter()
        .map(|column| {
            let ident = quote_identifier(&column.name);
            if column.is_exact_numeric() {
                format!("{alias}.{ident}::text as {ident}")
            } else {
                format!("{alias}.{ident}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn qualified_columns(alias: &str, columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| format!("{alias}.{}", quote_identifier(column)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn offset_query(schema: &TableSchema, order_by: &[String]) -> String {
    format!(
        "select row_to_json(t)::text from (select {} from {} s order by {} limit $1 offset $2) t",
        select_list(schema, "s"),
        quote_identifier(&schema.name),
        qualified_columns("s", order_by)
    )
}

fn after_key_query(schema: &TableSchema, key: &str, from_start: bool) -> String {
    let columns = select_list(schema, "s");
    let table_ident = quote_identifier(&schema.name);
    let key_ident = format!("s.{}", quote_identifier(key));

    if from_start {
        format!(
            "select row_to_json(t)::text from (select {columns} from {table_ident} s order by {key_ident} limit $1) t"
        )
    } else {
        format!(
            "select row_to_json(t)::text from (select {columns} from {table_ident} s where {key_ident} > $1 order by {key_ident} limit $2) t"
        )
    }
}

fn quoted_columns(columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| quote_identifier(column).into_owned())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Type names are embedded in DDL, so only characters that appear in PostgreSQL type
/// names are accepted.
fn checked_type(column: &ColumnSchema) -> TapsResult<String> {
    let valid = column
        .data_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || " _(),[].\"".contains(c));
    if !valid || column.data_type.trim().is_empty() {
        bail!(
            ErrorKind::SchemaError,
            "Unsupported column type",
            format!("{}: {}", column.name, column.data_type)
        );
    }

    if column.auto_increment {
        match column.integer_bounds() {
            Some((min, _)) if min == i16::MIN as i64 => return Ok("smallserial".to_string()),
            Some((min, _)) if min == i32::MIN as i64 => return Ok("serial".to_string()),
            Some(_) => return Ok("bigserial".to_string()),
            None => {}
        }
    }

    match column.max_length {
        Some(max_length) if column.is_text() && !column.data_type.contains('(') => {
            Ok(format!("{}({max_length})", column.data_type))
        }
        _ => Ok(column.data_type.clone()),
    }
}

fn create_table_sql(schema: &TableSchema) -> TapsResult<String> {
    let mut definitions = Vec::with_capacity(schema.columns.len() + 1);
    for column in &schema.columns {
        let mut definition = format!(
            "{} {}",
            quote_identifier(&column.name),
            checked_type(column)?
        );
        if !column.nullable {
            definition.push_str(" not null");
        }
        definitions.push(definition);
    }

    let primary_key: Vec<String> = schema
        .primary_key()
        .iter()
        .map(|c| c.name.clone())
        .collect();
    if !primary_key.is_empty() {
        definitions.push(format!("primary key ({})", quoted_columns(&primary_key)));
    }

    Ok(format!(
        "create table if not exists {} ({})",
        quote_identifier(&schema.name),
        definitions.join(", ")
    ))
}

impl Database for PgDatabase {
    async fn table_names(&self) -> TapsResult<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(TABLE_NAMES_QUERY)
            .fetch_all(&self.pool)
            .await?;

        Ok(names)
    }

    async fn table_schema(&self, table: &str) -> TapsResult<TableSchema> {
        let rows: Vec<PgRow> = sqlx::query(TABLE_SCHEMA_QUERY)
            .bind(quote_identifier(table).into_owned())
            .fetch_all(&self.pool)
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let max_length: Option<i32> = row.try_get("max_length")?;
            columns.push(ColumnSchema {
                name: row.try_get("name")?,
                data_type: row.try_get("data_type")?,
                max_length: max_length.and_then(|len| usize::try_from(len).ok()),
                nullable: row.try_get("nullable")?,
                primary: row.try_get("is_primary")?,
                auto_increment: row.try_get("auto_increment")?,
            });
        }

        if columns.is_empty() {
            bail!(ErrorKind::SchemaError, "Table has no columns", table);
        }

        Ok(TableSchema::new(table, columns))
    }

    async fn count_rows(&self, table: &str) -> TapsResult<u64> {
        let sql = format!("select count(*) from {}", quote_identifier(table));
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn fetch_rows_by_offset(
        &self,
        schema: &TableSchema,
        order_by: &[String],
        offset: u64,
        limit: usize,
    ) -> TapsResult<Vec<TableRow>> {
        let sql = offset_query(schema, order_by);
        let binds = Binds::Offset {
            limit: to_i64(limit),
            offset: i64::try_from(offset).unwrap_or(i64::MAX),
        };

        self.fetch_json_rows(schema, &sql, binds).await
    }

    async fn fetch_rows_after_key(
        &self,
        schema: &TableSchema,
        key: &str,
        after: Option<i64>,
        limit: usize,
    ) -> TapsResult<Vec<TableRow>> {
        let sql = after_key_query(schema, key, after.is_none());
        let limit = to_i64(limit);
        let binds = match after {
            Some(after) => Binds::After { after, limit },
            None => Binds::Limit { limit },
        };

        self.fetch_json_rows(schema, &sql, binds).await
    }

    async fn max_key(&self, table: &str, key: &str) -> TapsResult<Option<i64>> {
        let sql = format!(
            "select max({})::bigint from {}",
            quote_identifier(key),
            quote_identifier(table)
        );
        let max: Option<i64> = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;

        Ok(max)
    }

    async fn insert_rows(
        &self,
        table: &str,
        header: &[String],
        rows: &[Vec<Cell>],
    ) -> TapsResult<()> {
        let records: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| {
                let object = header
                    .iter()
                    .zip(row.iter())
                    .map(|(column, cell)| (column.clone(), cell.to_json()))
                    .collect::<serde_json::Map<_, _>>();
                serde_json::Value::Object(object)
            })
            .collect();
        let payload = serde_json::to_string(&records)?;

        let table_ident = quote_identifier(table);
        let columns = quoted_columns(header);
        let sql = format!(
            "insert into {table_ident} ({columns}) select {columns} from json_populate_recordset(null::{table_ident}, $1::json)"
        );

        let mut tx = self.pool.begin().await?;
        sqlx::query(&sql).bind(payload).execute(&mut *tx).await?;
        tx.commit().await?;

        debug!(table, rows = rows.len(), "inserted rows");

        Ok(())
    }

    async fn load_schema(&self, schema: &TableSchema) -> TapsResult<()> {
        let sql = create_table_sql(schema)?;
        sqlx::query(&sql).execute(&self.pool).await?;

        info!(table = %schema.name, "created table");

        Ok(())
    }

    async fn dump_indexes(&self) -> TapsResult<Vec<IndexDefinition>> {
        let rows: Vec<PgRow> = sqlx::query(INDEXES_QUERY).fetch_all(&self.pool).await?;

        let mut indexes = Vec::with_capacity(rows.len());
        for row in rows {
            indexes.push(IndexDefinition {
                name: row.try_get("index_name")?,
                table: row.try_get("table_name")?,
                columns: row.try_get("columns")?,
                unique: row.try_get("is_unique")?,
            });
        }

        Ok(indexes)
    }

    async fn load_indexes(&self, indexes: &[IndexDefinition]) -> TapsResult<()> {
        for index in indexes {
            if index.columns.is_empty() {
                return Err(taps_error!(
                    ErrorKind::SchemaError,
                    "Index has no columns",
                    &index.name
                ));
            }

            let sql = format!(
                "create {}index if not exists {} on {} ({})",
                if index.unique { "unique " } else { "" },
                quote_identifier(&index.name),
                quote_identifier(&index.table),
                quoted_columns(&index.columns)
            );
            sqlx::query(&sql).execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn reset_sequences(&self) -> TapsResult<()> {
        for table in self.table_names().await? {
            let schema = self.table_schema(&table).await?;
            let table_ident = quote_identifier(&table).into_owned();

            for column in schema.columns.iter().filter(|c| c.auto_increment) {
                let sql = format!(
                    "select setval(pg_get_serial_sequence($1, $2), coalesce((select max({}) from {table_ident}), 0) + 1, false)",
                    quote_identifier(&column.name)
                );
                sqlx::query(&sql)
                    .bind(&table_ident)
                    .bind(&column.name)
                    .execute(&self.pool)
                    .await?;

                debug!(table, column = %column.name, "reset sequence");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_keeps_types_and_key() {
        let schema = TableSchema::new(
            "widgets",
            vec![
                ColumnSchema::new("id", "integer").primary_key().auto_increment(),
                ColumnSchema::new("sku", "character varying").with_max_length(5),
                ColumnSchema::new("cost", "numeric(10,2)"),
            ],
        );

        assert_eq!(
            create_table_sql(&schema).unwrap(),
            "create table if not exists widgets (id serial not null, sku character varying(5), cost numeric(10,2), primary key (id))"
        );
    }

    #[test]
    fn suspicious_types_are_rejected() {
        let column = ColumnSchema::new("id", "integer); drop table users; --");
        assert_eq!(
            checked_type(&column).unwrap_err().kind(),
            ErrorKind::SchemaError
        );
    }

    #[test]
    fn json_rows_follow_schema_order() {
        let schema = TableSchema::new(
            "widgets",
            vec![
                ColumnSchema::new("id", "integer"),
                ColumnSchema::new("name", "text"),
            ],
        );
        let row = json_to_row(&schema, r#"{"name": "bolt", "id": 7}"#).unwrap();

        assert_eq!(row.values, vec![Cell::I64(7), Cell::String("bolt".into())]);
    }

    fn payments() -> TableSchema {
        TableSchema::new(
            "payments",
            vec![
                ColumnSchema::new("id", "integer").primary_key(),
                ColumnSchema::new("amount", "numeric(20,2)"),
            ],
        )
    }

    #[test]
    fn numeric_columns_are_read_as_text() {
        assert_eq!(
            offset_query(&payments(), &["id".to_string()]),
            "select row_to_json(t)::text from (select s.id, s.amount::text as amount from payments s order by s.id limit $1 offset $2) t"
        );
        assert_eq!(
            after_key_query(&payments(), "id", false),
            "select row_to_json(t)::text from (select s.id, s.amount::text as amount from payments s where s.id > $1 order by s.id limit $2) t"
        );
    }

    #[test]
    fn numeric_values_keep_every_digit() {
        let json = r#"{"id": 1, "amount": "12345678901234567.89"}"#;
        let row = json_to_row(&payments(), json).unwrap();
        assert_eq!(row.values[1], Cell::String("12345678901234567.89".into()));
        assert_eq!(
            row.values[1].to_json(),
            serde_json::json!("12345678901234567.89")
        );

        let huge = format!("1{}", "0".repeat(400));
        let json = format!(r#"{{"id": 2, "amount": "{huge}"}}"#);
        let row = json_to_row(&payments(), &json).unwrap();
        assert_eq!(row.values[1], Cell::String(huge));
    }
}
