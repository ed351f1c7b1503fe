//! Row batch encoding.
//!
//! A batch is serialized as JSON and compressed with zstd. The end of a table is signalled
//! by an encoded empty object instead of a batch.

use crate::bail;
use crate::error::{ErrorKind, TapsResult};
use crate::taps_error;
use crate::types::{Cell, RowBatch, TableRow, TableSchema};

const COMPRESSION_LEVEL: i32 = 3;

pub fn compress(data: &[u8]) -> TapsResult<Vec<u8>> {
    zstd::encode_all(data, COMPRESSION_LEVEL).map_err(|err| {
        taps_error!(
            ErrorKind::SerializationError,
            "Batch compression failed",
            err
        )
    })
}

/// Decompresses a payload. A payload that is not valid zstd is treated as corrupted.
pub fn decompress(data: &[u8]) -> TapsResult<Vec<u8>> {
    zstd::decode_all(data).map_err(|err| {
        taps_error!(ErrorKind::CorruptedData, "Batch decompression failed", err)
    })
}

/// Encodes a batch, or the completion marker when `batch` is `None`.
pub fn encode_batch(batch: Option<&RowBatch>) -> TapsResult<Vec<u8>> {
    let json = match batch {
        Some(batch) => serde_json::to_vec(batch)?,
        None => b"{}".to_vec(),
    };

    compress(&json)
}

/// Decodes a payload produced by [`encode_batch`].
pub fn decode_batch(data: &[u8]) -> TapsResult<Option<RowBatch>> {
    let json = decompress(data)?;
    let value: serde_json::Value = serde_json::from_slice(&json).map_err(|err| {
        taps_error!(
            ErrorKind::CorruptedData,
            "Batch payload is not valid JSON",
            err
        )
    })?;

    if value.as_object().is_some_and(|object| object.is_empty()) {
        return Ok(None);
    }

    let batch = serde_json::from_value(value)?;
    Ok(Some(batch))
}

/// Turns rows read from a table into a wire batch.
///
/// Drivers sometimes hand out text columns as binary values; those are turned back into
/// strings here, and bytes that are not UTF-8 fail the batch. Every value is then checked
/// against the column bounds so oversized data is rejected before it leaves the source.
pub fn format_rows(schema: &TableSchema, rows: Vec<TableRow>) -> TapsResult<RowBatch> {
    let header = schema.column_names();
    let mut data = Vec::with_capacity(rows.len());

    for row in rows {
        let mut values = row.values;
        for (cell, column) in values.iter_mut().zip(schema.columns.iter()) {
            if let Cell::Bytes { data: bytes } = cell
                && column.is_text()
            {
                let text = String::from_utf8(std::mem::take(bytes)).map_err(|err| {
                    taps_error!(
                        ErrorKind::InvalidData,
                        "Text value is not valid UTF-8",
                        format!("{}.{}: {err}", schema.name, column.name)
                    )
                })?;
                *cell = Cell::String(text);
            }
        }
        data.push(values);
    }

    let batch = RowBatch::new(header, data);
    validate_batch(schema, &batch)?;

    Ok(batch)
}

/// Checks that every value of `batch` fits the column it is destined for.
pub fn validate_batch(schema: &TableSchema, batch: &RowBatch) -> TapsResult<()> {
    let mut columns = Vec::with_capacity(batch.header.len());
    for name in &batch.header {
        let Some(column) = schema.column(name) else {
            bail!(
                ErrorKind::InvalidData,
                "Batch references an unknown column",
                format!("{}.{name}", schema.name)
            );
        };
        columns.push(column);
    }

    for row in &batch.data {
        if row.len() != columns.len() {
            bail!(
                ErrorKind::InvalidData,
                "Row width does not match the batch header",
                format!(
                    "table {}: expected {} values, got {}",
                    schema.name,
                    columns.len(),
                    row.len()
                )
            );
        }

        for (cell, column) in row.iter().zip(columns.iter()) {
            match cell {
                Cell::String(value) => {
                    if let Some(max_length) = column.max_length {
                        let length = value.chars().count();
                        if length > max_length {
                            bail!(
                                ErrorKind::InvalidData,
                                "Value exceeds the column length",
                                format!(
                                    "{}.{}: value of length {length} does not fit {}",
                                    schema.name, column.name, column.data_type
                                )
                            );
                        }
                    }
                }
                Cell::I64(value) => {
                    if let Some((min, max)) = column.integer_bounds() {
                        if *value < min || *value > max {
                            bail!(
                                ErrorKind::InvalidData,
                                "Value is out of range for the column",
                                format!(
                                    "{}.{}: {value} does not fit {}",
                                    schema.name, column.name, column.data_type
                                )
                            );
                        }
                    }
                }
                Cell::Null if !column.nullable => {
                    bail!(
                        ErrorKind::InvalidData,
                        "Null value in a non-nullable column",
                        format!("{}.{}", schema.name, column.name)
                    );
                }
                _ => {}
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnSchema;

    fn schema() -> TableSchema {
        TableSchema::new(
            "widgets",
            vec![
                ColumnSchema::new("id", "integer").primary_key(),
                ColumnSchema::new("name", "varchar").with_max_length(3),
            ],
        )
    }

    #[test]
    fn completion_marker_decodes_to_none() {
        let encoded = encode_batch(None).unwrap();
        assert_eq!(decode_batch(&encoded).unwrap(), None);
    }

    #[test]
    fn batches_survive_encoding() {
        let batch = RowBatch::new(
            vec!["id".into(), "name".into()],
            vec![vec![Cell::I64(1), Cell::String("abc".into())]],
        );
        let encoded = encode_batch(Some(&batch)).unwrap();
        assert_eq!(decode_batch(&encoded).unwrap(), Some(batch));
    }

    #[test]
    fn garbage_payload_is_corruption() {
        let err = decode_batch(b"definitely not zstd").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptedData);
    }

    #[test]
    fn oversized_value_is_rejected() {
        let rows = vec![TableRow::new(vec![
            Cell::I64(1),
            Cell::String("abcd".into()),
        ])];
        let err = format_rows(&schema(), rows).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.detail().unwrap().contains("widgets.name"));
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let rows = vec![TableRow::new(vec![
            Cell::I64(1),
            Cell::String("äöü".into()),
        ])];
        assert!(format_rows(&schema(), rows).is_ok());
    }

    #[test]
    fn binary_text_is_coerced_to_string() {
        let rows = vec![TableRow::new(vec![
            Cell::I64(1),
            Cell::bytes(b"ab".to_vec()),
        ])];
        let batch = format_rows(&schema(), rows).unwrap();
        assert_eq!(batch.data[0][1], Cell::String("ab".into()));
    }

    #[test]
    fn binary_text_that_is_not_utf8_is_rejected() {
        let rows = vec![TableRow::new(vec![
            Cell::I64(1),
            Cell::bytes(vec![b'a', 0xff]),
        ])];
        let err = format_rows(&schema(), rows).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.detail().unwrap().contains("widgets.name"));
    }

    #[test]
    fn out_of_range_integer_is_rejected() {
        let batch = RowBatch::new(
            vec!["id".into()],
            vec![vec![Cell::I64(i64::from(i32::MAX) + 1)]],
        );
        let err = validate_batch(&schema(), &batch).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn unknown_column_is_rejected() {
        let batch = RowBatch::new(vec!["colour".into()], vec![]);
        assert_eq!(
            validate_batch(&schema(), &batch).unwrap_err().kind(),
            ErrorKind::InvalidData
        );
    }
}
