//! Row codec: encodes rows against a fixed schema and back.
//!
//! The payload is laid out per column in schema order: int as 4 bytes
//! little-endian, float as the 8-byte IEEE-754 bit pattern, string as a
//! u16 length prefix plus bytes.

use crate::row::MAX_COLUMNS;
use bytes::{BufMut, Bytes, BytesMut};
use larch_common::error::{LarchError, Result};
use larch_common::types::{ColumnType, ColumnValue, MAX_INLINE_LEN};

/// Encodes a row, checking it against the schema column by column.
pub fn encode_row(schema: &[ColumnType], values: &[ColumnValue]) -> Result<Bytes> {
    if schema.len() != values.len() {
        return Err(LarchError::SchemaMismatch(format!(
            "schema has {} columns, row has {}",
            schema.len(),
            values.len()
        )));
    }

    let mut buf = BytesMut::with_capacity(128);
    for (i, (column, value)) in schema.iter().zip(values).enumerate() {
        match (column, value) {
            (ColumnType::Int, ColumnValue::Int(v)) => buf.put_i32_le(*v),
            (ColumnType::Float, ColumnValue::Float(v)) => buf.put_u64_le(v.to_bits()),
            (ColumnType::Str, ColumnValue::Str(s)) => {
                if s.len() > MAX_INLINE_LEN {
                    return Err(LarchError::PayloadTooLarge {
                        size: s.len(),
                        max: MAX_INLINE_LEN,
                    });
                }
                buf.put_u16_le(s.len() as u16);
                buf.put_slice(s.as_bytes());
            }
            _ => {
                return Err(LarchError::SchemaMismatch(format!(
                    "column {}: expected {}, got {}",
                    i,
                    column,
                    value.column_type()
                )));
            }
        }
    }

    if buf.len() > MAX_INLINE_LEN {
        return Err(LarchError::PayloadTooLarge {
            size: buf.len(),
            max: MAX_INLINE_LEN,
        });
    }
    Ok(buf.freeze())
}

/// Decodes a row payload against the schema.
///
/// The payload must be consumed exactly; leftover bytes indicate the
/// row was written under a different schema.
pub fn decode_row(schema: &[ColumnType], payload: &[u8]) -> Result<Vec<ColumnValue>> {
    let mut values = Vec::with_capacity(schema.len());
    let mut pos = 0usize;

    for column in schema {
        match column {
            ColumnType::Int => {
                let b = take(payload, &mut pos, 4, "int column")?;
                values.push(ColumnValue::Int(i32::from_le_bytes([b[0], b[1], b[2], b[3]])));
            }
            ColumnType::Float => {
                let b = take(payload, &mut pos, 8, "float column")?;
                let bits = u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
                values.push(ColumnValue::Float(f64::from_bits(bits)));
            }
            ColumnType::Str => {
                let b = take(payload, &mut pos, 2, "string column length")?;
                let len = u16::from_le_bytes([b[0], b[1]]) as usize;
                let b = take(payload, &mut pos, len, "string column bytes")?;
                let s = std::str::from_utf8(b).map_err(|_| {
                    LarchError::Corrupted("string column is not valid UTF-8".to_string())
                })?;
                values.push(ColumnValue::Str(s.to_string()));
            }
        }
    }

    if pos != payload.len() {
        return Err(LarchError::SchemaMismatch(format!(
            "payload has {} trailing bytes after {} columns",
            payload.len() - pos,
            schema.len()
        )));
    }
    Ok(values)
}

fn take<'a>(
    payload: &'a [u8],
    pos: &mut usize,
    n: usize,
    context: &'static str,
) -> Result<&'a [u8]> {
    if payload.len() - *pos < n {
        return Err(LarchError::DecodeTruncated(context));
    }
    let slice = &payload[*pos..*pos + n];
    *pos += n;
    Ok(slice)
}

/// Parses a comma-separated schema string, e.g. `"int, string, float"`.
///
/// Type names are case-insensitive and may carry surrounding whitespace.
pub fn parse_schema(schema: &str) -> Result<Vec<ColumnType>> {
    let trimmed = schema.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let parts: Vec<&str> = trimmed.split(',').collect();
    if parts.len() > MAX_COLUMNS {
        return Err(LarchError::SchemaMismatch(format!(
            "too many columns: {} (max {})",
            parts.len(),
            MAX_COLUMNS
        )));
    }

    let mut columns = Vec::with_capacity(parts.len());
    for (i, part) in parts.iter().enumerate() {
        let name = part.trim();
        if name.is_empty() {
            return Err(LarchError::SchemaMismatch(format!(
                "empty column type at position {}",
                i
            )));
        }
        let column = ColumnType::parse(name)
            .ok_or_else(|| LarchError::UnsupportedValueKind(name.to_string()))?;
        columns.push(column);
    }
    Ok(columns)
}

/// Renders schema codes back to the comma-separated string form.
pub fn schema_string(schema: &[ColumnType]) -> String {
    schema
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
