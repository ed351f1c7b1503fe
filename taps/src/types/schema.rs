use serde::{Deserialize, Serialize};

/// Describes one column of a table.
///
/// Schemas are exchanged between client and server, so the data type is kept as the
/// database's own type name rather than a closed enum.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    /// Type name as reported by the database, e.g. `integer` or `character varying(5)`.
    pub data_type: String,
    /// Maximum length in characters for bounded text columns.
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub primary: bool,
    /// Whether values are generated by a sequence.
    #[serde(default)]
    pub auto_increment: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> ColumnSchema {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            max_length: None,
            nullable: true,
            primary: false,
            auto_increment: false,
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary = true;
        self.nullable = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    fn base_type(&self) -> String {
        let lowered = self.data_type.to_ascii_lowercase();
        match lowered.find('(') {
            Some(idx) => lowered[..idx].trim().to_string(),
            None => lowered.trim().to_string(),
        }
    }

    /// Returns `true` for character columns.
    pub fn is_text(&self) -> bool {
        matches!(
            self.base_type().as_str(),
            "text" | "varchar" | "character varying" | "char" | "character" | "bpchar" | "citext"
        )
    }

    /// Returns `true` for arbitrary precision columns, whose values may not fit a float.
    pub fn is_exact_numeric(&self) -> bool {
        matches!(self.base_type().as_str(), "numeric" | "decimal")
    }

    /// Returns `true` for integer columns of any width.
    pub fn is_integer(&self) -> bool {
        self.integer_bounds().is_some()
    }

    /// Range of values an integer column can hold.
    pub fn integer_bounds(&self) -> Option<(i64, i64)> {
        match self.base_type().as_str() {
            "smallint" | "int2" | "smallserial" => Some((i16::MIN as i64, i16::MAX as i64)),
            "integer" | "int" | "int4" | "serial" => Some((i32::MIN as i64, i32::MAX as i64)),
            "bigint" | "int8" | "bigserial" => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }
}

/// Describes a table: its name and columns in physical order.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSchema>) -> TableSchema {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Vec<&ColumnSchema> {
        self.columns.iter().filter(|c| c.primary).collect()
    }

    /// Columns that give the table a stable order: the primary key if there is one,
    /// otherwise every column.
    pub fn order_by(&self) -> Vec<String> {
        let primary_key = self.primary_key();
        if primary_key.is_empty() {
            self.column_names()
        } else {
            primary_key.into_iter().map(|c| c.name.clone()).collect()
        }
    }

    /// Returns the key column when the primary key is a single integer column.
    ///
    /// Only such tables can be streamed by key; composite and non-integer keys fall back
    /// to offset paging.
    pub fn single_integer_key(&self) -> Option<&str> {
        match self.primary_key().as_slice() {
            [column] if column.is_integer() => Some(column.name.as_str()),
            _ => None,
        }
    }
}

/// A secondary index, in a form any adapter can recreate.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widgets() -> TableSchema {
        TableSchema::new(
            "widgets",
            vec![
                ColumnSchema::new("id", "integer").primary_key(),
                ColumnSchema::new("name", "character varying(5)").with_max_length(5),
            ],
        )
    }

    #[test]
    fn single_integer_key_is_detected() {
        assert_eq!(widgets().single_integer_key(), Some("id"));
        assert_eq!(widgets().order_by(), vec!["id".to_string()]);
    }

    #[test]
    fn composite_and_text_keys_are_not_streamable_by_key() {
        let composite = TableSchema::new(
            "pairs",
            vec![
                ColumnSchema::new("a", "integer").primary_key(),
                ColumnSchema::new("b", "integer").primary_key(),
            ],
        );
        assert_eq!(composite.single_integer_key(), None);

        let text_key = TableSchema::new(
            "tags",
            vec![ColumnSchema::new("tag", "text").primary_key()],
        );
        assert_eq!(text_key.single_integer_key(), None);
    }

    #[test]
    fn tables_without_key_order_by_every_column() {
        let schema = TableSchema::new(
            "log",
            vec![
                ColumnSchema::new("at", "timestamp"),
                ColumnSchema::new("msg", "text"),
            ],
        );
        assert_eq!(schema.order_by(), vec!["at".to_string(), "msg".to_string()]);
    }

    #[test]
    fn type_families() {
        assert!(ColumnSchema::new("a", "character varying(5)").is_text());
        assert!(ColumnSchema::new("a", "TEXT").is_text());
        assert!(!ColumnSchema::new("a", "bytea").is_text());
        assert!(ColumnSchema::new("a", "numeric(20,2)").is_exact_numeric());
        let float = ColumnSchema::new("a", "double precision");
        assert!(!float.is_exact_numeric());
        assert_eq!(
            ColumnSchema::new("a", "smallint").integer_bounds(),
            Some((-32768, 32767))
        );
    }
}
