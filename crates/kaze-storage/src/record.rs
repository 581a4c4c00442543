//! Self-describing row serialization.
//!
//! Encoding:
//! ```text
//! [field_count u16][null bitmap ceil(n/8), LSB-first]
//! [per field: type_tag u8, payload]
//! ```
//! Numeric and temporal payloads are fixed-width little-endian; strings
//! carry a `u32` length prefix. Null fields write only the type tag.
//! Index keys use the same encoding, which is what lets the B+ tree stay
//! type-agnostic and compare keys as raw bytes.

use kaze_common::types::DataType;
use kaze_common::{KazeError, Result};

/// A single decoded field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub data_type: DataType,
    pub is_null: bool,
    pub payload: Vec<u8>,
}

impl Field {
    /// A NULL field carrying its declared type.
    pub fn null(data_type: DataType) -> Self {
        Self {
            data_type,
            is_null: true,
            payload: Vec::new(),
        }
    }

    pub fn from_bool(value: bool) -> Self {
        Self {
            data_type: DataType::Boolean,
            is_null: false,
            payload: vec![value as u8],
        }
    }

    pub fn from_int32(value: i32) -> Self {
        Self {
            data_type: DataType::Integer,
            is_null: false,
            payload: value.to_le_bytes().to_vec(),
        }
    }

    pub fn from_int64(value: i64) -> Self {
        Self {
            data_type: DataType::BigInt,
            is_null: false,
            payload: value.to_le_bytes().to_vec(),
        }
    }

    pub fn from_float(value: f32) -> Self {
        Self {
            data_type: DataType::Float,
            is_null: false,
            payload: value.to_le_bytes().to_vec(),
        }
    }

    pub fn from_double(value: f64) -> Self {
        Self {
            data_type: DataType::Double,
            is_null: false,
            payload: value.to_le_bytes().to_vec(),
        }
    }

    pub fn from_date(epoch_days: i64) -> Self {
        Self {
            data_type: DataType::Date,
            is_null: false,
            payload: epoch_days.to_le_bytes().to_vec(),
        }
    }

    pub fn from_timestamp(value: i64) -> Self {
        Self {
            data_type: DataType::Timestamp,
            is_null: false,
            payload: value.to_le_bytes().to_vec(),
        }
    }

    pub fn from_string(text: &str) -> Self {
        Self {
            data_type: DataType::Varchar,
            is_null: false,
            payload: text.as_bytes().to_vec(),
        }
    }

    /// Like [`Field::from_string`] but keeps the declared string type.
    pub fn from_text(text: &str) -> Self {
        Self {
            data_type: DataType::Text,
            is_null: false,
            payload: text.as_bytes().to_vec(),
        }
    }
}

/// Encodes a field vector.
pub fn encode(fields: &[Field]) -> Vec<u8> {
    let bitmap_len = fields.len().div_ceil(8);
    let mut out = Vec::with_capacity(2 + bitmap_len + fields.len() * 8);
    out.extend_from_slice(&(fields.len() as u16).to_le_bytes());

    let mut bitmap = vec![0u8; bitmap_len];
    for (i, field) in fields.iter().enumerate() {
        if field.is_null {
            bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    out.extend_from_slice(&bitmap);

    for field in fields {
        out.push(field.data_type as u8);
        if field.is_null {
            continue;
        }
        match field.data_type {
            DataType::Varchar | DataType::Text => {
                out.extend_from_slice(&(field.payload.len() as u32).to_le_bytes());
                out.extend_from_slice(&field.payload);
            }
            _ => out.extend_from_slice(&field.payload),
        }
    }
    out
}

/// Decodes a field vector in a single forward pass.
pub fn decode(buf: &[u8]) -> Result<Vec<Field>> {
    let mut pos = 0usize;
    let field_count = read_u16(buf, &mut pos)? as usize;
    let bitmap_len = field_count.div_ceil(8);
    if buf.len() < pos + bitmap_len {
        return Err(truncated("null bitmap"));
    }
    let bitmap = &buf[pos..pos + bitmap_len];
    pos += bitmap_len;

    let mut fields = Vec::with_capacity(field_count);
    for i in 0..field_count {
        if pos >= buf.len() {
            return Err(truncated("field tag"));
        }
        let tag = buf[pos];
        pos += 1;
        let data_type = DataType::from_tag(tag)
            .ok_or_else(|| KazeError::InvalidRecordFormat(format!("unknown type tag {tag}")))?;

        let is_null = bitmap[i / 8] & (1 << (i % 8)) != 0;
        if is_null {
            fields.push(Field::null(data_type));
            continue;
        }

        let payload = match data_type.fixed_size() {
            Some(width) => {
                if buf.len() < pos + width {
                    return Err(truncated("fixed-width payload"));
                }
                let payload = buf[pos..pos + width].to_vec();
                pos += width;
                payload
            }
            None => {
                let len = read_u32(buf, &mut pos)? as usize;
                if buf.len() < pos + len {
                    return Err(truncated("string payload"));
                }
                let payload = buf[pos..pos + len].to_vec();
                pos += len;
                payload
            }
        };
        fields.push(Field {
            data_type,
            is_null: false,
            payload,
        });
    }

    if pos != buf.len() {
        return Err(KazeError::InvalidRecordFormat(format!(
            "{} trailing bytes after {field_count} fields",
            buf.len() - pos
        )));
    }
    Ok(fields)
}

fn read_u16(buf: &[u8], pos: &mut usize) -> Result<u16> {
    if buf.len() < *pos + 2 {
        return Err(truncated("u16"));
    }
    let value = u16::from_le_bytes([buf[*pos], buf[*pos + 1]]);
    *pos += 2;
    Ok(value)
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    if buf.len() < *pos + 4 {
        return Err(truncated("u32"));
    }
    let value = u32::from_le_bytes([buf[*pos], buf[*pos + 1], buf[*pos + 2], buf[*pos + 3]]);
    *pos += 4;
    Ok(value)
}

fn truncated(what: &str) -> KazeError {
    KazeError::InvalidRecordFormat(format!("truncated buffer reading {what}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_all_types() {
        let fields = vec![
            Field::from_bool(true),
            Field::from_int32(-42),
            Field::from_int64(1 << 40),
            Field::from_float(1.5),
            Field::from_double(-2.25),
            Field::from_date(19_000),
            Field::from_timestamp(1_700_000_000),
            Field::from_string("hello"),
            Field::from_text(""),
        ];
        let encoded = encode(&fields);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, fields);
    }

    #[test]
    fn test_roundtrip_nulls() {
        let fields = vec![
            Field::null(DataType::Integer),
            Field::from_string("live"),
            Field::null(DataType::Varchar),
        ];
        let encoded = encode(&fields);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, fields);
        assert!(decoded[0].is_null);
        assert_eq!(decoded[0].data_type, DataType::Integer);
        assert!(decoded[2].is_null);
    }

    #[test]
    fn test_nine_fields_spill_bitmap() {
        // Nine fields force a two-byte bitmap; field 8 null lives in byte 1.
        let mut fields: Vec<Field> = (0..8).map(Field::from_int32).collect();
        fields.push(Field::null(DataType::Text));
        let decoded = decode(&encode(&fields)).unwrap();
        assert_eq!(decoded, fields);
    }

    #[test]
    fn test_empty_record() {
        let encoded = encode(&[]);
        assert_eq!(encoded, vec![0, 0]);
        assert!(decode(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_decode_truncated() {
        let fields = vec![Field::from_int64(7), Field::from_string("abc")];
        let encoded = encode(&fields);
        for cut in 1..encoded.len() {
            assert!(decode(&encoded[..cut]).is_err(), "cut at {cut}");
        }
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_decode_unknown_tag() {
        let mut encoded = encode(&[Field::from_bool(false)]);
        // Overwrite the type tag (count u16 + 1 bitmap byte precede it).
        encoded[3] = 0xEE;
        let err = decode(&encoded).unwrap_err();
        assert!(err.to_string().contains("unknown type tag"));
    }

    #[test]
    fn test_decode_rejects_trailing_garbage() {
        let mut encoded = encode(&[Field::from_int32(1)]);
        encoded.push(0xAA);
        assert!(decode(&encoded).is_err());
    }

    #[test]
    fn test_key_encoding_is_comparable() {
        // Equal field vectors encode to equal bytes, which the B+ tree
        // relies on for exact-match lookups.
        let a = encode(&[Field::from_string("sku-1"), Field::from_int32(5)]);
        let b = encode(&[Field::from_string("sku-1"), Field::from_int32(5)]);
        let c = encode(&[Field::from_string("sku-2"), Field::from_int32(5)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
