//! Row and index-key encoding, plus column-directed coercions.
//!
//! These helpers sit between the executors and the record codec: every row
//! or key that reaches storage is typed against the catalog's column
//! definitions here.

use std::collections::HashMap;

use kaze_catalog::{ColumnCatalogEntry, ColumnDef};
use kaze_common::types::{ColumnId, DataType};
use kaze_common::value::{parse_date, Value};
use kaze_common::{KazeError, Result};
use kaze_storage::record::{self, Field};

use crate::ast::Literal;

/// Maps column ids to their position in the active schema.
pub(crate) fn build_column_lookup(columns: &[ColumnCatalogEntry]) -> HashMap<ColumnId, usize> {
    columns
        .iter()
        .enumerate()
        .map(|(i, entry)| (entry.column_id, i))
        .collect()
}

/// Decodes a row payload into typed values, one per active column.
pub(crate) fn decode_row_values(
    columns: &[ColumnCatalogEntry],
    payload: &[u8],
) -> Result<Vec<Value>> {
    let fields = record::decode(payload)?;
    if fields.len() != columns.len() {
        return Err(KazeError::SchemaMismatch(format!(
            "row has {} fields, schema has {}",
            fields.len(),
            columns.len()
        )));
    }

    let mut values = Vec::with_capacity(columns.len());
    for (entry, field) in columns.iter().zip(fields) {
        let data_type = entry.column.data_type;
        if field.is_null {
            values.push(Value::null(data_type));
            continue;
        }
        let value = match data_type {
            DataType::Boolean => Value::Boolean(!field.payload.is_empty() && field.payload[0] != 0),
            DataType::Integer => Value::Integer(i32::from_le_bytes(
                field.payload.as_slice().try_into().map_err(bad_width)?,
            )),
            DataType::BigInt => Value::BigInt(i64::from_le_bytes(
                field.payload.as_slice().try_into().map_err(bad_width)?,
            )),
            DataType::Date => Value::Date(i64::from_le_bytes(
                field.payload.as_slice().try_into().map_err(bad_width)?,
            )),
            DataType::Timestamp => Value::Timestamp(i64::from_le_bytes(
                field.payload.as_slice().try_into().map_err(bad_width)?,
            )),
            DataType::Float => Value::Double(f32::from_le_bytes(
                field.payload.as_slice().try_into().map_err(bad_width)?,
            ) as f64),
            DataType::Double => Value::Double(f64::from_le_bytes(
                field.payload.as_slice().try_into().map_err(bad_width)?,
            )),
            DataType::Varchar | DataType::Text => {
                let text = String::from_utf8(field.payload).map_err(|_| {
                    KazeError::InvalidRecordFormat("string field not UTF-8".to_string())
                })?;
                Value::string(text, data_type)
            }
            DataType::Null => Value::null(DataType::Null),
        };
        values.push(value);
    }
    Ok(values)
}

fn bad_width<E>(_: E) -> KazeError {
    KazeError::InvalidRecordFormat("field payload has wrong width".to_string())
}

/// Converts a typed value into a record field for the given column.
///
/// Applies VARCHAR length limits; NULL handling (NOT NULL rejection vs a
/// null field) is the caller's concern.
pub(crate) fn field_from_value(column: &ColumnDef, value: &Value) -> Result<Field> {
    let type_error = || {
        KazeError::type_error(
            "value",
            column.data_type.to_string(),
            value.to_string(),
        )
    };

    match column.data_type {
        DataType::Boolean => match value {
            Value::Boolean(b) => Ok(Field::from_bool(*b)),
            Value::Integer(v) => Ok(Field::from_bool(*v != 0)),
            Value::BigInt(v) => Ok(Field::from_bool(*v != 0)),
            _ => Err(type_error()),
        },
        DataType::Integer => match value {
            Value::Integer(v) => Ok(Field::from_int32(*v)),
            Value::BigInt(v) => {
                let narrowed = i32::try_from(*v)
                    .map_err(|_| KazeError::type_error("value", "INTEGER", v.to_string()))?;
                Ok(Field::from_int32(narrowed))
            }
            _ => Err(type_error()),
        },
        DataType::BigInt => match value.as_i64() {
            Some(v) => Ok(Field::from_int64(v)),
            None => Err(type_error()),
        },
        DataType::Float => match value.as_f64() {
            Some(v) => Ok(Field::from_float(v as f32)),
            None => Err(type_error()),
        },
        DataType::Double => match value.as_f64() {
            Some(v) => Ok(Field::from_double(v)),
            None => Err(type_error()),
        },
        DataType::Date => match value {
            Value::Date(days) => Ok(Field::from_date(*days)),
            Value::Str { text, .. } => {
                let days = parse_date(text).ok_or_else(type_error)?;
                Ok(Field::from_date(days))
            }
            _ => match value.as_i64() {
                Some(v) => Ok(Field::from_date(v)),
                None => Err(type_error()),
            },
        },
        DataType::Timestamp => match value.as_i64() {
            Some(v) => Ok(Field::from_timestamp(v)),
            None => Err(type_error()),
        },
        DataType::Varchar | DataType::Text => match value {
            Value::Str { text, .. } => {
                check_varchar_length(column, text)?;
                if column.data_type == DataType::Text {
                    Ok(Field::from_text(text))
                } else {
                    Ok(Field::from_string(text))
                }
            }
            _ => Err(type_error()),
        },
        DataType::Null => Err(KazeError::UnsupportedType(
            "NULL is not a storable column type".to_string(),
        )),
    }
}

fn check_varchar_length(column: &ColumnDef, text: &str) -> Result<()> {
    if column.data_type == DataType::Varchar && column.length > 0 && text.len() > column.length as usize
    {
        return Err(KazeError::InvalidConstraint(format!(
            "value too long for column '{}'",
            column.name
        )));
    }
    Ok(())
}

/// Encodes a full row of typed values against the active schema.
pub(crate) fn encode_values(columns: &[ColumnCatalogEntry], values: &[Value]) -> Result<Vec<u8>> {
    let mut fields = Vec::with_capacity(columns.len());
    for (entry, value) in columns.iter().zip(values) {
        if value.is_null() {
            if entry.column.constraint.not_null {
                return Err(KazeError::InvalidConstraint(format!(
                    "column '{}' is NOT NULL",
                    entry.column.name
                )));
            }
            fields.push(Field::null(entry.column.data_type));
            continue;
        }
        fields.push(field_from_value(&entry.column, value)?);
    }
    Ok(record::encode(&fields))
}

/// Encodes an index key from the key columns' values.
///
/// NULLs are permitted in keys; they encode as null fields.
pub(crate) fn encode_index_key(
    key_columns: &[ColumnCatalogEntry],
    values: &[Value],
) -> Result<Vec<u8>> {
    let mut fields = Vec::with_capacity(key_columns.len());
    for (entry, value) in key_columns.iter().zip(values) {
        if value.is_null() {
            fields.push(Field::null(entry.column.data_type));
            continue;
        }
        fields.push(field_from_value(&entry.column, value)?);
    }
    Ok(record::encode(&fields))
}

/// Coerces an UPDATE assignment result toward its column's type.
pub(crate) fn coerce_value_for_column(
    entry: &ColumnCatalogEntry,
    value: &Value,
) -> Result<Value> {
    let column = &entry.column;
    if value.is_null() {
        if column.constraint.not_null {
            return Err(KazeError::InvalidConstraint(format!(
                "column '{}' is NOT NULL",
                column.name
            )));
        }
        return Ok(Value::null(column.data_type));
    }

    let type_error = |expected: &str| {
        KazeError::type_error("UPDATE", expected, value.to_string())
    };

    match column.data_type {
        DataType::Boolean => match value {
            Value::Boolean(_) => Ok(value.clone()),
            Value::Integer(v) => Ok(Value::Boolean(*v != 0)),
            Value::BigInt(v) => Ok(Value::Boolean(*v != 0)),
            _ => Err(type_error("BOOLEAN")),
        },
        DataType::Integer => match value {
            Value::Integer(_) => Ok(value.clone()),
            Value::BigInt(v) => {
                let narrowed =
                    i32::try_from(*v).map_err(|_| type_error("INTEGER"))?;
                Ok(Value::Integer(narrowed))
            }
            _ => Err(type_error("INTEGER")),
        },
        DataType::BigInt => match value {
            Value::BigInt(_) => Ok(value.clone()),
            Value::Integer(v) => Ok(Value::BigInt(*v as i64)),
            _ => Err(type_error("BIGINT")),
        },
        DataType::Float | DataType::Double => match value.as_f64() {
            Some(v) => Ok(Value::Double(v)),
            None => Err(type_error("DOUBLE")),
        },
        DataType::Date => match value {
            Value::Date(_) => Ok(value.clone()),
            Value::Str { text, .. } => {
                let days = parse_date(text).ok_or_else(|| type_error("DATE"))?;
                Ok(Value::Date(days))
            }
            _ => Err(type_error("DATE")),
        },
        DataType::Timestamp => match value.as_i64() {
            Some(v) => Ok(Value::Timestamp(v)),
            None => Err(type_error("TIMESTAMP")),
        },
        DataType::Varchar | DataType::Text => match value {
            Value::Str { text, .. } => Ok(Value::string(text.clone(), column.data_type)),
            _ => Err(type_error("STRING")),
        },
        DataType::Null => Err(KazeError::UnsupportedType(
            "NULL is not a storable column type".to_string(),
        )),
    }
}

/// Types a predicate literal toward a column for plan extraction.
pub(crate) fn literal_to_value_for_column(
    entry: &ColumnCatalogEntry,
    literal: &Literal,
) -> Result<Value> {
    let column = &entry.column;
    let type_error = |expected: &str, got: &str| {
        KazeError::type_error("literal comparison", expected, got)
    };

    match literal {
        Literal::Null => Ok(Value::null(column.data_type)),
        Literal::Boolean(b) => match column.data_type {
            DataType::Boolean => Ok(Value::Boolean(*b)),
            DataType::Integer => Ok(Value::Integer(*b as i32)),
            DataType::BigInt => Ok(Value::BigInt(*b as i64)),
            _ => Err(type_error(&column.data_type.to_string(), "BOOLEAN")),
        },
        Literal::Integer(text) => {
            let parsed: i64 = text
                .parse()
                .map_err(|_| KazeError::type_error("literal", "INTEGER", text))?;
            match column.data_type {
                DataType::Boolean => Ok(Value::Boolean(parsed != 0)),
                DataType::Integer => {
                    let narrowed = i32::try_from(parsed)
                        .map_err(|_| KazeError::type_error("literal", "INTEGER", text))?;
                    Ok(Value::Integer(narrowed))
                }
                DataType::BigInt => Ok(Value::BigInt(parsed)),
                DataType::Float | DataType::Double => Ok(Value::Double(parsed as f64)),
                _ => Err(type_error(&column.data_type.to_string(), text)),
            }
        }
        Literal::Float(text) => {
            let parsed: f64 = text
                .parse()
                .map_err(|_| KazeError::type_error("literal", "DOUBLE", text))?;
            match column.data_type {
                DataType::Float | DataType::Double => Ok(Value::Double(parsed)),
                DataType::Integer => {
                    if parsed < i32::MIN as f64 || parsed > i32::MAX as f64 {
                        return Err(KazeError::type_error("literal", "INTEGER", text));
                    }
                    Ok(Value::Integer(parsed as i32))
                }
                DataType::BigInt => Ok(Value::BigInt(parsed as i64)),
                _ => Err(type_error(&column.data_type.to_string(), text)),
            }
        }
        Literal::String(text) => match column.data_type {
            DataType::Date => {
                let days = parse_date(text)
                    .ok_or_else(|| KazeError::type_error("literal", "DATE", text))?;
                Ok(Value::Date(days))
            }
            DataType::Varchar | DataType::Text => {
                check_varchar_length(column, text)?;
                Ok(Value::string(text.clone(), column.data_type))
            }
            _ => Err(type_error(&column.data_type.to_string(), text)),
        },
    }
}

/// Builds a row payload from INSERT literals.
///
/// `column_names` permutes the values; it must still cover every column of
/// the table. Literal typing is strict: an INTEGER column takes integer
/// literals only, DATE columns take `YYYY-MM-DD` strings, and so on.
pub(crate) fn encode_row(
    columns: &[ColumnCatalogEntry],
    row: &[Literal],
    column_names: &[String],
    table_name: &str,
) -> Result<Vec<u8>> {
    let mut value_lookup: HashMap<&str, &Literal> = HashMap::with_capacity(column_names.len());
    for (name, literal) in column_names.iter().zip(row) {
        value_lookup.insert(name.as_str(), literal);
    }

    let mut fields = Vec::with_capacity(columns.len());
    for entry in columns {
        let column = &entry.column;
        let literal = value_lookup.get(column.name.as_str()).ok_or_else(|| {
            KazeError::column_not_found_in(
                column.name.clone(),
                format!("INSERT column list for {table_name}"),
            )
        })?;

        if matches!(literal, Literal::Null) {
            if column.constraint.not_null {
                return Err(KazeError::InvalidConstraint(format!(
                    "column '{}' is NOT NULL",
                    column.name
                )));
            }
            fields.push(Field::null(column.data_type));
            continue;
        }

        let field = match column.data_type {
            DataType::Boolean => match literal {
                Literal::Boolean(b) => Field::from_bool(*b),
                other => {
                    return Err(KazeError::type_error(
                        "INSERT",
                        "BOOLEAN",
                        other.to_string(),
                    ))
                }
            },
            DataType::Integer | DataType::BigInt | DataType::Timestamp => match literal {
                Literal::Integer(text) => {
                    let parsed: i64 = text
                        .parse()
                        .map_err(|_| KazeError::type_error("INSERT", "INTEGER", text))?;
                    match column.data_type {
                        DataType::Integer => {
                            let narrowed = i32::try_from(parsed)
                                .map_err(|_| KazeError::type_error("INSERT", "INTEGER", text))?;
                            Field::from_int32(narrowed)
                        }
                        DataType::Timestamp => Field::from_timestamp(parsed),
                        _ => Field::from_int64(parsed),
                    }
                }
                other => {
                    return Err(KazeError::type_error(
                        "INSERT",
                        "INTEGER",
                        other.to_string(),
                    ))
                }
            },
            DataType::Float | DataType::Double => match literal {
                Literal::Float(text) | Literal::Integer(text) => {
                    let parsed: f64 = text
                        .parse()
                        .map_err(|_| KazeError::type_error("INSERT", "DOUBLE", text))?;
                    if column.data_type == DataType::Float {
                        Field::from_float(parsed as f32)
                    } else {
                        Field::from_double(parsed)
                    }
                }
                other => {
                    return Err(KazeError::type_error(
                        "INSERT",
                        "DOUBLE",
                        other.to_string(),
                    ))
                }
            },
            DataType::Date => match literal {
                Literal::String(text) => {
                    let days = parse_date(text)
                        .ok_or_else(|| KazeError::type_error("INSERT", "DATE", text))?;
                    Field::from_date(days)
                }
                other => {
                    return Err(KazeError::type_error("INSERT", "DATE", other.to_string()))
                }
            },
            DataType::Varchar | DataType::Text => match literal {
                Literal::String(text) => {
                    check_varchar_length(column, text)?;
                    if column.data_type == DataType::Text {
                        Field::from_text(text)
                    } else {
                        Field::from_string(text)
                    }
                }
                other => {
                    return Err(KazeError::type_error(
                        "INSERT",
                        "STRING",
                        other.to_string(),
                    ))
                }
            },
            DataType::Null => {
                return Err(KazeError::UnsupportedType(
                    "NULL is not a storable column type".to_string(),
                ))
            }
        };
        fields.push(field);
    }

    Ok(record::encode(&fields))
}

/// Canonical `type|text` signature used by DISTINCT and aggregate dedupe.
pub(crate) fn value_signature(value: &Value) -> String {
    if value.is_null() {
        format!("{}|NULL", value.data_type() as u8)
    } else {
        format!("{}|{}", value.data_type() as u8, value)
    }
}

/// Joins the projected values' signatures with a non-printable separator.
pub(crate) fn row_signature(row: &[Value], projection: &[usize]) -> String {
    let mut signature = String::new();
    for (i, &index) in projection.iter().enumerate() {
        if i > 0 {
            signature.push('\x1f');
        }
        signature.push_str(&value_signature(&row[index]));
    }
    signature
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaze_catalog::ColumnConstraint;

    fn entry(name: &str, data_type: DataType, not_null: bool) -> ColumnCatalogEntry {
        ColumnCatalogEntry {
            table_id: 1,
            column_id: 1,
            ordinal_position: 0,
            schema_version: 1,
            is_dropped: false,
            column: ColumnDef {
                id: 1,
                name: name.to_string(),
                data_type,
                length: if data_type == DataType::Varchar { 8 } else { 0 },
                constraint: ColumnConstraint {
                    not_null,
                    ..Default::default()
                },
            },
        }
    }

    #[test]
    fn test_encode_decode_row_roundtrip() {
        let columns = vec![
            entry("id", DataType::Integer, true),
            entry("name", DataType::Varchar, false),
            entry("score", DataType::Double, false),
            entry("born", DataType::Date, false),
        ];
        let values = vec![
            Value::Integer(7),
            Value::varchar("kaze"),
            Value::Double(1.25),
            Value::Date(parse_date("2020-05-01").unwrap()),
        ];
        let payload = encode_values(&columns, &values).unwrap();
        let decoded = decode_row_values(&columns, &payload).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_not_null_rejected() {
        let columns = vec![entry("id", DataType::Integer, true)];
        let err = encode_values(&columns, &[Value::null(DataType::Integer)]).unwrap_err();
        assert!(matches!(err, KazeError::InvalidConstraint(_)));
    }

    #[test]
    fn test_varchar_length_enforced() {
        let columns = vec![entry("name", DataType::Varchar, false)];
        let err = encode_values(&columns, &[Value::varchar("way too long text")]).unwrap_err();
        assert!(err.to_string().contains("too long"));
    }

    #[test]
    fn test_float_column_roundtrips_via_f32() {
        let columns = vec![entry("ratio", DataType::Float, false)];
        let payload = encode_values(&columns, &[Value::Double(1.5)]).unwrap();
        let decoded = decode_row_values(&columns, &payload).unwrap();
        assert_eq!(decoded, vec![Value::Double(1.5)]);
    }

    #[test]
    fn test_index_key_permits_null() {
        let columns = vec![entry("nick", DataType::Varchar, false)];
        let with_null = encode_index_key(&columns, &[Value::null(DataType::Varchar)]).unwrap();
        let with_text = encode_index_key(&columns, &[Value::varchar("x")]).unwrap();
        assert_ne!(with_null, with_text);
    }

    #[test]
    fn test_key_encoding_matches_between_rows_and_literals() {
        let columns = vec![entry("sku", DataType::Varchar, false)];
        let from_literal =
            literal_to_value_for_column(&columns[0], &Literal::string("s1")).unwrap();
        let key_a = encode_index_key(&columns, &[from_literal]).unwrap();
        let key_b = encode_index_key(&columns, &[Value::varchar("s1")]).unwrap();
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn test_coerce_for_update() {
        let int_col = entry("id", DataType::Integer, false);
        assert_eq!(
            coerce_value_for_column(&int_col, &Value::BigInt(12)).unwrap(),
            Value::Integer(12)
        );
        assert!(coerce_value_for_column(&int_col, &Value::BigInt(i64::MAX)).is_err());
        assert!(coerce_value_for_column(&int_col, &Value::varchar("nope")).is_err());

        let date_col = entry("born", DataType::Date, false);
        assert_eq!(
            coerce_value_for_column(&date_col, &Value::varchar("1970-01-02")).unwrap(),
            Value::Date(1)
        );
    }

    #[test]
    fn test_insert_literal_strictness() {
        let columns = vec![entry("id", DataType::Integer, false)];
        let names = vec!["id".to_string()];
        assert!(encode_row(&columns, &[Literal::string("1")], &names, "t").is_err());
        assert!(encode_row(&columns, &[Literal::int(1)], &names, "t").is_ok());
        assert!(encode_row(
            &columns,
            &[Literal::Integer("99999999999".to_string())],
            &names,
            "t"
        )
        .is_err());
    }

    #[test]
    fn test_signatures_distinguish_types() {
        assert_ne!(
            value_signature(&Value::Integer(1)),
            value_signature(&Value::BigInt(1))
        );
        assert_ne!(
            value_signature(&Value::varchar("NULL")),
            value_signature(&Value::null(DataType::Varchar))
        );

        let row = vec![Value::Integer(1), Value::varchar("a")];
        let sig = row_signature(&row, &[0, 1]);
        assert!(sig.contains('\x1f'));
    }
}
