use std::cmp::Ordering;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// A single value of a row.
///
/// Cells travel inside JSON batches, so the variants mirror what JSON can carry plus an
/// explicit binary variant. Binary values are written as `{"$binary": "<base64>"}` so they
/// can be told apart from text on the other side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Bytes {
        #[serde(rename = "$binary", with = "binary")]
        data: Vec<u8>,
    },
    Json(serde_json::Value),
}

impl Cell {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Cell {
        Cell::Bytes { data: data.into() }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::I64(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::String(value) => Some(value),
            _ => None,
        }
    }

    /// Builds a cell out of a JSON value returned by the database.
    pub fn from_json(value: serde_json::Value) -> Cell {
        match value {
            serde_json::Value::Null => Cell::Null,
            serde_json::Value::Bool(value) => Cell::Bool(value),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(value) => Cell::I64(value),
                None => number
                    .as_f64()
                    .map(Cell::F64)
                    .unwrap_or_else(|| Cell::Json(serde_json::Value::Number(number))),
            },
            serde_json::Value::String(value) => Cell::String(value),
            other => Cell::Json(other),
        }
    }

    /// Converts the cell into the JSON value PostgreSQL accepts on input.
    ///
    /// Binary values use the `\x` hex notation of `bytea`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Null => serde_json::Value::Null,
            Cell::Bool(value) => serde_json::Value::Bool(*value),
            Cell::I64(value) => serde_json::Value::from(*value),
            Cell::F64(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Cell::String(value) => serde_json::Value::String(value.clone()),
            Cell::Bytes { data } => {
                let mut hex = String::with_capacity(2 + data.len() * 2);
                hex.push_str("\\x");
                for byte in data {
                    let _ = write!(hex, "{byte:02x}");
                }
                serde_json::Value::String(hex)
            }
            Cell::Json(value) => value.clone(),
        }
    }

    /// Total order used to sort rows of in-memory tables.
    ///
    /// Nulls sort first, then values are ordered by variant and within a variant by value.
    pub fn total_cmp(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Bool(a), Cell::Bool(b)) => a.cmp(b),
            (Cell::I64(a), Cell::I64(b)) => a.cmp(b),
            (Cell::F64(a), Cell::F64(b)) => a.total_cmp(b),
            (Cell::I64(a), Cell::F64(b)) => (*a as f64).total_cmp(b),
            (Cell::F64(a), Cell::I64(b)) => a.total_cmp(&(*b as f64)),
            (Cell::String(a), Cell::String(b)) => a.cmp(b),
            (Cell::Bytes { data: a }, Cell::Bytes { data: b }) => a.cmp(b),
            (Cell::Json(a), Cell::Json(b)) => a.to_string().cmp(&b.to_string()),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Cell::Null => 0,
            Cell::Bool(_) => 1,
            Cell::I64(_) | Cell::F64(_) => 2,
            Cell::String(_) => 3,
            Cell::Bytes { .. } => 4,
            Cell::Json(_) => 5,
        }
    }
}

/// A row as returned by a database adapter, with values in table column order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub values: Vec<Cell>,
}

impl TableRow {
    pub fn new(values: Vec<Cell>) -> Self {
        Self { values }
    }
}

mod binary {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_decode_into_the_narrowest_variant() {
        let cells: Vec<Cell> =
            serde_json::from_str(r#"[null, true, 7, 1.5, "x", {"$binary": "AAE="}, {"a": 1}]"#)
                .unwrap();

        assert_eq!(
            cells,
            vec![
                Cell::Null,
                Cell::Bool(true),
                Cell::I64(7),
                Cell::F64(1.5),
                Cell::String("x".to_string()),
                Cell::bytes(vec![0u8, 1]),
                Cell::Json(serde_json::json!({"a": 1})),
            ]
        );
    }

    #[test]
    fn binary_cells_are_tagged() {
        let encoded = serde_json::to_string(&Cell::bytes(b"hi".to_vec())).unwrap();
        assert_eq!(encoded, r#"{"$binary":"aGk="}"#);
    }

    #[test]
    fn bytes_convert_to_bytea_hex() {
        assert_eq!(
            Cell::bytes(vec![0xde, 0xad]).to_json(),
            serde_json::json!("\\xdead")
        );
    }

    #[test]
    fn ordering_puts_nulls_first() {
        let mut cells = vec![Cell::I64(3), Cell::Null, Cell::I64(-1)];
        cells.sort_by(Cell::total_cmp);
        assert_eq!(cells, vec![Cell::Null, Cell::I64(-1), Cell::I64(3)]);
    }
}
