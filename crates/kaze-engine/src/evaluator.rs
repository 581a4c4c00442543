//! Name binding and three-valued expression evaluation.

use std::collections::HashMap;

use kaze_catalog::ColumnCatalogEntry;
use kaze_common::types::DataType;
use kaze_common::value::{compare, parse_date, CompareResult, TriBool, Value};
use kaze_common::{KazeError, Result};

use crate::ast::{BinaryOp, ColumnRef, Expression, Literal};

/// One name visible to an expression: a column of some bound table.
#[derive(Debug, Clone)]
pub struct BindingEntry {
    pub column_name: String,
    /// Position of the column's value in the row vector.
    pub index: usize,
    pub data_type: DataType,
    /// Table name and/or alias prefixes this column resolves under.
    pub qualifiers: Vec<String>,
}

/// Result of resolving a column reference.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedColumn {
    pub index: usize,
    pub data_type: DataType,
}

#[derive(Debug, Clone, Copy)]
struct ColumnBinding {
    index: usize,
    data_type: DataType,
    ambiguous: bool,
}

/// Evaluates expressions over row vectors under SQL three-valued logic.
///
/// Lookup resolves `table.column` exactly, or a bare `column` when it is
/// unambiguous across all bound tables; a duplicated bare name raises
/// `AMBIGUOUS_COLUMN` only if the query actually uses it.
pub struct ExpressionEvaluator {
    column_map: HashMap<String, ColumnBinding>,
}

impl ExpressionEvaluator {
    /// Bindings for a single table's active columns in ordinal order.
    pub fn from_columns(columns: &[ColumnCatalogEntry], table_name: &str) -> Self {
        let bindings: Vec<BindingEntry> = columns
            .iter()
            .enumerate()
            .map(|(i, entry)| BindingEntry {
                column_name: entry.column.name.clone(),
                index: i,
                data_type: entry.column.data_type,
                qualifiers: if table_name.is_empty() {
                    Vec::new()
                } else {
                    vec![table_name.to_string()]
                },
            })
            .collect();
        Self::new(&bindings)
    }

    pub fn new(bindings: &[BindingEntry]) -> Self {
        let mut column_map = HashMap::with_capacity(bindings.len() * 2);
        for binding in bindings {
            Self::register(&mut column_map, &binding.column_name, binding);
            for qualifier in &binding.qualifiers {
                if qualifier.is_empty() {
                    continue;
                }
                let key = format!("{qualifier}.{}", binding.column_name);
                Self::register(&mut column_map, &key, binding);
            }
        }
        Self { column_map }
    }

    fn register(map: &mut HashMap<String, ColumnBinding>, key: &str, binding: &BindingEntry) {
        match map.get_mut(key) {
            Some(existing) => {
                if existing.index != binding.index {
                    existing.ambiguous = true;
                }
            }
            None => {
                map.insert(
                    key.to_string(),
                    ColumnBinding {
                        index: binding.index,
                        data_type: binding.data_type,
                        ambiguous: false,
                    },
                );
            }
        }
    }

    fn lookup(&self, reference: &ColumnRef, clause: &str) -> Result<Option<ColumnBinding>> {
        if let Some(table) = &reference.table {
            let qualified = format!("{table}.{}", reference.column);
            if let Some(binding) = self.column_map.get(&qualified) {
                if binding.ambiguous {
                    return Err(KazeError::AmbiguousColumn {
                        name: qualified,
                        clause: clause.to_string(),
                    });
                }
                return Ok(Some(*binding));
            }
        }
        if let Some(binding) = self.column_map.get(&reference.column) {
            if binding.ambiguous {
                return Err(KazeError::AmbiguousColumn {
                    name: reference.column.clone(),
                    clause: clause.to_string(),
                });
            }
            return Ok(Some(*binding));
        }
        Ok(None)
    }

    /// Resolves a column reference or fails with `COLUMN_NOT_FOUND`.
    pub fn resolve_column(&self, reference: &ColumnRef, clause: &str) -> Result<ResolvedColumn> {
        let binding = self
            .lookup(reference, clause)?
            .ok_or_else(|| KazeError::column_not_found_in(reference.to_string(), clause))?;
        Ok(ResolvedColumn {
            index: binding.index,
            data_type: binding.data_type,
        })
    }

    /// Converts a literal to a value, coercing toward the target type.
    pub fn literal_to_value(
        &self,
        literal: &Literal,
        target: Option<DataType>,
        clause: &str,
    ) -> Result<Value> {
        match literal {
            Literal::Null => Ok(Value::null(target.unwrap_or(DataType::Null))),
            Literal::Boolean(b) => Ok(Value::Boolean(*b)),
            Literal::Integer(text) => {
                let parsed: i64 = text
                    .parse()
                    .map_err(|_| KazeError::type_error(clause, "INTEGER", text))?;
                match target {
                    Some(DataType::Boolean) => Ok(Value::Boolean(parsed != 0)),
                    Some(DataType::Integer) => {
                        let narrowed = i32::try_from(parsed)
                            .map_err(|_| KazeError::type_error(clause, "INTEGER", text))?;
                        Ok(Value::Integer(narrowed))
                    }
                    Some(DataType::BigInt | DataType::Date | DataType::Timestamp) => {
                        Ok(Value::BigInt(parsed))
                    }
                    _ => {
                        if let Ok(narrowed) = i32::try_from(parsed) {
                            Ok(Value::Integer(narrowed))
                        } else {
                            Ok(Value::BigInt(parsed))
                        }
                    }
                }
            }
            Literal::Float(text) => {
                let parsed: f64 = text
                    .parse()
                    .map_err(|_| KazeError::type_error(clause, "DOUBLE", text))?;
                Ok(Value::Double(parsed))
            }
            Literal::String(text) => match target {
                Some(DataType::Date) => {
                    let days = parse_date(text)
                        .ok_or_else(|| KazeError::type_error(clause, "DATE", text))?;
                    Ok(Value::Date(days))
                }
                Some(DataType::Boolean) => match text.as_str() {
                    "TRUE" | "true" => Ok(Value::Boolean(true)),
                    "FALSE" | "false" => Ok(Value::Boolean(false)),
                    _ => Err(KazeError::type_error(clause, "BOOLEAN", text)),
                },
                _ => Ok(Value::varchar(text.clone())),
            },
        }
    }

    /// Best-effort coercion of a value toward a column's type.
    fn coerce_to_type(&self, value: Value, target: DataType, clause: &str) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::null(target));
        }
        if value.data_type() == target {
            return Ok(value);
        }
        match target {
            DataType::Boolean => match value {
                Value::Integer(v) => Ok(Value::Boolean(v != 0)),
                Value::BigInt(v) => Ok(Value::Boolean(v != 0)),
                other => Ok(other),
            },
            DataType::Integer => match value {
                Value::BigInt(v) => {
                    let narrowed = i32::try_from(v)
                        .map_err(|_| KazeError::type_error(clause, "INTEGER", v.to_string()))?;
                    Ok(Value::Integer(narrowed))
                }
                other => Ok(other),
            },
            DataType::BigInt => match value {
                Value::Integer(v) => Ok(Value::BigInt(v as i64)),
                other => Ok(other),
            },
            DataType::Float | DataType::Double => match value.as_f64() {
                Some(v) => Ok(Value::Double(v)),
                None => Ok(value),
            },
            _ => Ok(value),
        }
    }

    fn evaluate_value(
        &self,
        expression: &Expression,
        row: &[Value],
        target_hint: Option<DataType>,
        clause: &str,
    ) -> Result<Value> {
        match expression {
            Expression::Literal(literal) => self.literal_to_value(literal, target_hint, clause),
            Expression::Column(reference) => {
                let binding = self
                    .lookup(reference, clause)?
                    .ok_or_else(|| KazeError::column_not_found_in(reference.to_string(), clause))?;
                row.get(binding.index).cloned().ok_or_else(|| {
                    KazeError::SchemaMismatch(format!(
                        "row does not contain column {}",
                        reference.column
                    ))
                })
            }
            Expression::Not(_) | Expression::Binary { .. } | Expression::NullTest { .. } => {
                Err(KazeError::type_error(clause, "scalar", "predicate"))
            }
        }
    }

    /// Evaluates a scalar expression (UPDATE SET right-hand sides).
    pub fn evaluate_scalar(
        &self,
        expression: &Expression,
        row: &[Value],
        clause: &str,
    ) -> Result<Value> {
        self.evaluate_value(expression, row, None, clause)
    }

    fn truthiness(value: &Value, clause: &str) -> Result<TriBool> {
        value.truthiness().ok_or_else(|| {
            KazeError::type_error(clause, "BOOLEAN", value.data_type().to_string())
        })
    }

    /// Evaluates a predicate under three-valued logic.
    pub fn evaluate_predicate(
        &self,
        expression: &Expression,
        row: &[Value],
        clause: &str,
    ) -> Result<TriBool> {
        match expression {
            Expression::Literal(literal) => {
                let value = self.literal_to_value(literal, None, clause)?;
                Self::truthiness(&value, clause)
            }
            Expression::Column(_) => {
                let value = self.evaluate_value(expression, row, None, clause)?;
                Self::truthiness(&value, clause)
            }
            Expression::Not(inner) => {
                Ok(self.evaluate_predicate(inner, row, clause)?.negate())
            }
            Expression::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    let lhs = self.evaluate_predicate(left, row, clause)?;
                    let rhs = self.evaluate_predicate(right, row, clause)?;
                    Ok(lhs.and(rhs))
                }
                BinaryOp::Or => {
                    let lhs = self.evaluate_predicate(left, row, clause)?;
                    let rhs = self.evaluate_predicate(right, row, clause)?;
                    Ok(lhs.or(rhs))
                }
                comparison => self.evaluate_comparison(*comparison, left, right, row, clause),
            },
            Expression::NullTest { operand, negated } => {
                let value = self.evaluate_value(operand, row, None, clause)?;
                let is_null = value.is_null();
                Ok((if *negated { !is_null } else { is_null }).into())
            }
        }
    }

    fn evaluate_comparison(
        &self,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
        row: &[Value],
        clause: &str,
    ) -> Result<TriBool> {
        let left_binding = match left {
            Expression::Column(reference) => self.lookup(reference, clause)?,
            _ => None,
        };
        let right_binding = match right {
            Expression::Column(reference) => self.lookup(reference, clause)?,
            _ => None,
        };

        // A literal facing a column is parsed toward the column's type.
        let left_hint = match (left, right_binding) {
            (Expression::Literal(_), Some(binding)) => Some(binding.data_type),
            _ => None,
        };
        let right_hint = match (right, left_binding) {
            (Expression::Literal(_), Some(binding)) => Some(binding.data_type),
            _ => None,
        };

        let mut left_value = self.evaluate_value(left, row, left_hint, clause)?;
        let mut right_value = self.evaluate_value(right, row, right_hint, clause)?;
        if let Some(binding) = left_binding {
            left_value = self.coerce_to_type(left_value, binding.data_type, clause)?;
        }
        if let Some(binding) = right_binding {
            right_value = self.coerce_to_type(right_value, binding.data_type, clause)?;
        }

        let result = match compare(&left_value, &right_value) {
            CompareResult::Unknown => return Ok(TriBool::Unknown),
            CompareResult::Equal => matches!(
                op,
                BinaryOp::Equal | BinaryOp::LessEqual | BinaryOp::GreaterEqual
            ),
            CompareResult::Less => matches!(
                op,
                BinaryOp::NotEqual | BinaryOp::Less | BinaryOp::LessEqual
            ),
            CompareResult::Greater => matches!(
                op,
                BinaryOp::NotEqual | BinaryOp::Greater | BinaryOp::GreaterEqual
            ),
        };
        Ok(result.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> Vec<BindingEntry> {
        vec![
            BindingEntry {
                column_name: "id".to_string(),
                index: 0,
                data_type: DataType::Integer,
                qualifiers: vec!["t".to_string()],
            },
            BindingEntry {
                column_name: "nick".to_string(),
                index: 1,
                data_type: DataType::Varchar,
                qualifiers: vec!["t".to_string()],
            },
            BindingEntry {
                column_name: "born".to_string(),
                index: 2,
                data_type: DataType::Date,
                qualifiers: vec!["t".to_string()],
            },
        ]
    }

    fn row(id: i32, nick: Option<&str>) -> Vec<Value> {
        vec![
            Value::Integer(id),
            match nick {
                Some(text) => Value::varchar(text),
                None => Value::null(DataType::Varchar),
            },
            Value::Date(parse_date("2000-01-01").unwrap()),
        ]
    }

    #[test]
    fn test_resolve_qualified_and_bare() {
        let eval = ExpressionEvaluator::new(&bindings());
        assert_eq!(eval.resolve_column(&ColumnRef::bare("id"), "t").unwrap().index, 0);
        assert_eq!(
            eval.resolve_column(&ColumnRef::qualified("t", "nick"), "t")
                .unwrap()
                .index,
            1
        );
        assert!(eval.resolve_column(&ColumnRef::bare("missing"), "t").is_err());
    }

    #[test]
    fn test_ambiguous_bare_name() {
        let mut entries = bindings();
        entries.push(BindingEntry {
            column_name: "id".to_string(),
            index: 3,
            data_type: DataType::Integer,
            qualifiers: vec!["u".to_string()],
        });
        let eval = ExpressionEvaluator::new(&entries);

        let err = eval.resolve_column(&ColumnRef::bare("id"), "x").unwrap_err();
        assert!(matches!(err, KazeError::AmbiguousColumn { .. }));

        // Qualified lookup still works.
        assert_eq!(
            eval.resolve_column(&ColumnRef::qualified("u", "id"), "x")
                .unwrap()
                .index,
            3
        );
    }

    #[test]
    fn test_simple_comparison() {
        let eval = ExpressionEvaluator::new(&bindings());
        let pred = Expression::binary(
            BinaryOp::GreaterEqual,
            Expression::column("id"),
            Expression::literal(Literal::int(40)),
        );
        assert_eq!(
            eval.evaluate_predicate(&pred, &row(50, Some("a")), "WHERE clause").unwrap(),
            TriBool::True
        );
        assert_eq!(
            eval.evaluate_predicate(&pred, &row(30, Some("a")), "WHERE clause").unwrap(),
            TriBool::False
        );
    }

    #[test]
    fn test_literal_flipped_comparison() {
        let eval = ExpressionEvaluator::new(&bindings());
        // 40 < id
        let pred = Expression::binary(
            BinaryOp::Less,
            Expression::literal(Literal::int(40)),
            Expression::column("id"),
        );
        assert_eq!(
            eval.evaluate_predicate(&pred, &row(50, None), "WHERE clause").unwrap(),
            TriBool::True
        );
    }

    #[test]
    fn test_null_comparison_is_unknown() {
        let eval = ExpressionEvaluator::new(&bindings());
        let pred = Expression::eq(
            Expression::column("nick"),
            Expression::literal(Literal::string("a")),
        );
        assert_eq!(
            eval.evaluate_predicate(&pred, &row(1, None), "WHERE clause").unwrap(),
            TriBool::Unknown
        );
        // NOT Unknown stays Unknown.
        let negated = Expression::negate(pred);
        assert_eq!(
            eval.evaluate_predicate(&negated, &row(1, None), "WHERE clause").unwrap(),
            TriBool::Unknown
        );
    }

    #[test]
    fn test_null_test_is_two_valued() {
        let eval = ExpressionEvaluator::new(&bindings());
        let is_null = Expression::is_null(Expression::column("nick"));
        assert_eq!(
            eval.evaluate_predicate(&is_null, &row(1, None), "WHERE clause").unwrap(),
            TriBool::True
        );
        assert_eq!(
            eval.evaluate_predicate(&is_null, &row(1, Some("x")), "WHERE clause").unwrap(),
            TriBool::False
        );
        let not_null = Expression::is_not_null(Expression::column("nick"));
        assert_eq!(
            eval.evaluate_predicate(&not_null, &row(1, None), "WHERE clause").unwrap(),
            TriBool::False
        );
    }

    #[test]
    fn test_kleene_and_or() {
        let eval = ExpressionEvaluator::new(&bindings());
        let unknown = Expression::eq(
            Expression::column("nick"),
            Expression::literal(Literal::string("a")),
        );
        let truthy = Expression::eq(
            Expression::column("id"),
            Expression::literal(Literal::int(1)),
        );

        let and = Expression::and(unknown.clone(), truthy.clone());
        assert_eq!(
            eval.evaluate_predicate(&and, &row(1, None), "WHERE clause").unwrap(),
            TriBool::Unknown
        );
        let or = Expression::or(unknown, truthy);
        assert_eq!(
            eval.evaluate_predicate(&or, &row(1, None), "WHERE clause").unwrap(),
            TriBool::True
        );
    }

    #[test]
    fn test_date_literal_coerced() {
        let eval = ExpressionEvaluator::new(&bindings());
        let pred = Expression::eq(
            Expression::column("born"),
            Expression::literal(Literal::string("2000-01-01")),
        );
        assert_eq!(
            eval.evaluate_predicate(&pred, &row(1, None), "WHERE clause").unwrap(),
            TriBool::True
        );

        let bad = Expression::eq(
            Expression::column("born"),
            Expression::literal(Literal::string("not-a-date")),
        );
        assert!(eval.evaluate_predicate(&bad, &row(1, None), "WHERE clause").is_err());
    }

    #[test]
    fn test_incompatible_types_are_unknown() {
        let eval = ExpressionEvaluator::new(&bindings());
        // nick (varchar) compared to an integer literal parsed as VARCHAR?
        // The hint types the literal toward VARCHAR, so both are strings.
        let pred = Expression::eq(Expression::column("id"), Expression::column("nick"));
        assert_eq!(
            eval.evaluate_predicate(&pred, &row(1, Some("1")), "WHERE clause").unwrap(),
            TriBool::Unknown
        );
    }

    #[test]
    fn test_scalar_rejects_predicate_shape() {
        let eval = ExpressionEvaluator::new(&bindings());
        let pred = Expression::is_null(Expression::column("nick"));
        assert!(eval.evaluate_scalar(&pred, &row(1, None), "SET clause").is_err());
    }

    #[test]
    fn test_out_of_range_literal() {
        let eval = ExpressionEvaluator::new(&bindings());
        let pred = Expression::eq(
            Expression::column("id"),
            Expression::literal(Literal::Integer("99999999999".to_string())),
        );
        let err = eval
            .evaluate_predicate(&pred, &row(1, None), "WHERE clause")
            .unwrap_err();
        assert!(matches!(err, KazeError::TypeError { .. }));
    }
}
