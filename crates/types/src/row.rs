//! Row codec: packs a slice of [`Value`]s into the fixed on-disk layout a
//! table's data pages store, and unpacks them back out.
//!
//! Layout: `[u16 column_count][column]*`, where each column is
//! `[u8 type_tag]` followed by nothing (`Null`), a `[i32 LE]` (`Integer`),
//! or a `[u32 LE size][size bytes]` (`Text`/`Blob`).

use common::le::{read_i32, read_u16, read_u32, write_i32, write_u16, write_u32};
use common::{DbError, DbResult};

use crate::Value;

/// Columns per row, matching the catalog's column-definition cap.
pub const MAX_COLUMNS: usize = 32;

/// Bytes a row's encoding will occupy, not counting any page framing.
pub fn serialized_size(values: &[Value]) -> usize {
    2 + values.iter().map(|v| 1 + v.payload_len()).sum::<usize>()
}

/// Encode `values` into `buf`, returning the number of bytes written.
///
/// `buf` must be at least [`serialized_size`] bytes; excess capacity is
/// left untouched.
pub fn encode(values: &[Value], buf: &mut [u8]) -> DbResult<usize> {
    if values.len() > MAX_COLUMNS {
        return Err(DbError::InvalidArgument(format!(
            "row has {} columns, max is {MAX_COLUMNS}",
            values.len()
        )));
    }
    let needed = serialized_size(values);
    if buf.len() < needed {
        return Err(DbError::InvalidArgument(format!(
            "row buffer too small: need {needed}, have {}",
            buf.len()
        )));
    }

    let mut offset = 0;
    write_u16(&mut buf[offset..], values.len() as u16);
    offset += 2;

    for value in values {
        buf[offset] = value.tag();
        offset += 1;
        match value {
            Value::Null => {}
            Value::Integer(i) => {
                write_i32(&mut buf[offset..], *i);
                offset += 4;
            }
            Value::Text(bytes) | Value::Blob(bytes) => {
                write_u32(&mut buf[offset..], bytes.len() as u32);
                offset += 4;
                buf[offset..offset + bytes.len()].copy_from_slice(bytes);
                offset += bytes.len();
            }
        }
    }
    Ok(offset)
}

/// Decode a row previously written by [`encode`].
pub fn decode(buf: &[u8]) -> DbResult<Vec<Value>> {
    if buf.len() < 2 {
        return Err(DbError::Corruption("row buffer shorter than column count".into()));
    }
    let column_count = read_u16(&buf[0..2]) as usize;
    if column_count > MAX_COLUMNS {
        return Err(DbError::Corruption(format!(
            "row claims {column_count} columns, max is {MAX_COLUMNS}"
        )));
    }

    let mut offset = 2;
    let mut values = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        if offset >= buf.len() {
            return Err(DbError::Corruption("row truncated before column type tag".into()));
        }
        let tag = buf[offset];
        offset += 1;
        let value = match tag {
            Value::TAG_NULL => Value::Null,
            Value::TAG_INTEGER => {
                if offset + 4 > buf.len() {
                    return Err(DbError::Corruption("row truncated in integer column".into()));
                }
                let v = read_i32(&buf[offset..offset + 4]);
                offset += 4;
                Value::Integer(v)
            }
            Value::TAG_TEXT | Value::TAG_BLOB => {
                if offset + 4 > buf.len() {
                    return Err(DbError::Corruption("row truncated before column size".into()));
                }
                let size = read_u32(&buf[offset..offset + 4]) as usize;
                offset += 4;
                if offset + size > buf.len() {
                    return Err(DbError::Corruption("row truncated in text/blob column".into()));
                }
                let bytes = buf[offset..offset + size].to_vec();
                offset += size;
                if tag == Value::TAG_TEXT {
                    Value::Text(bytes)
                } else {
                    Value::Blob(bytes)
                }
            }
            other => return Err(DbError::Corruption(format!("unknown column type tag {other}"))),
        };
        values.push(value);
    }
    Ok(values)
}
