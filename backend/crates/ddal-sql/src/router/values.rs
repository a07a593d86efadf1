//! Shard value extraction from the right-hand side of shard-key predicates.

use crate::error::{Result, RoutingError};
use crate::params::{BoundParams, ParamKey};
use crate::parser::StatementScan;
use ddal_sharding::ShardValue;
use serde::Serialize;
use sqlparser::ast::{DataType, Expr, UnaryOperator, Value};

/// Where a routed value came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    Literal(ShardValue),
    Param(ParamKey),
}

impl ValueSource {
    /// Value under `params`: literals stay, parameters are looked up.
    pub fn resolve<'a>(&'a self, params: &'a BoundParams) -> Option<&'a ShardValue> {
        match self {
            ValueSource::Literal(value) => Some(value),
            ValueSource::Param(key) => params.get(key),
        }
    }
}

/// Predicate occurrence that routed a table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    /// `=`, one `IN` item or an INSERT column value
    Value(ValueSource),
    /// `BETWEEN low AND high`
    Range { low: ValueSource, high: ValueSource },
}

/// Outcome of evaluating a value expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Extracted {
    Known(ShardValue, ValueSource),
    /// Parameter without a bound value; routing is deferred
    Unknown(ParamKey),
}

/// Inputs shared by every extraction of one routing call.
pub(crate) struct ValueReader<'a> {
    pub sql: &'a str,
    pub scan: &'a StatementScan,
    pub params: Option<&'a BoundParams>,
}

impl ValueReader<'_> {
    pub fn read(&self, column: &str, expr: &Expr) -> Result<Extracted> {
        match expr {
            Expr::Value(value) => match &value.value {
                Value::Placeholder(text) => {
                    let key = match text.as_str() {
                        "?" => self
                            .scan
                            .placeholder_index(&value.span)
                            .map(ParamKey::Index)
                            .ok_or_else(|| self.unsupported(column, expr))?,
                        _ => ParamKey::parse(text),
                    };
                    Ok(self.bound(key))
                }
                other => literal(other)
                    .map(|v| Extracted::Known(v.clone(), ValueSource::Literal(v)))
                    .ok_or_else(|| self.unsupported(column, expr)),
            },
            Expr::UnaryOp { op, expr: inner } => {
                let negate = match op {
                    UnaryOperator::Minus => true,
                    UnaryOperator::Plus => false,
                    _ => return Err(self.unsupported(column, expr)),
                };
                match self.read(column, inner)? {
                    Extracted::Known(value, ValueSource::Literal(_)) => {
                        let value = match negate {
                            true => negate_value(value),
                            false => Some(value),
                        }
                        .ok_or_else(|| self.unsupported(column, expr))?;
                        Ok(Extracted::Known(value.clone(), ValueSource::Literal(value)))
                    }
                    _ => Err(self.unsupported(column, expr)),
                }
            }
            Expr::Nested(inner) => self.read(column, inner),
            Expr::TypedString {
                data_type, value, ..
            } => match data_type {
                DataType::Date | DataType::Time(..) | DataType::Timestamp(..) | DataType::Datetime(..) => {
                    let text = value.to_string().trim_matches('\'').to_string();
                    let value = ShardValue::Temporal(text);
                    Ok(Extracted::Known(value.clone(), ValueSource::Literal(value)))
                }
                _ => Err(self.unsupported(column, expr)),
            },
            _ => Err(self.unsupported(column, expr)),
        }
    }

    fn bound(&self, key: ParamKey) -> Extracted {
        match self.params.and_then(|params| params.get(&key)) {
            Some(value) => Extracted::Known(value.clone(), ValueSource::Param(key)),
            None => Extracted::Unknown(key),
        }
    }

    fn unsupported(&self, column: &str, expr: &Expr) -> RoutingError {
        RoutingError::UnsupportedValueType(format!(
            "expression '{}' is not supported for shard key '{}', source sql is [{}]",
            expr, column, self.sql
        ))
    }
}

fn literal(value: &Value) -> Option<ShardValue> {
    match value {
        Value::Number(text, _) => {
            let text = text.to_string();
            if let Ok(int) = text.parse::<i64>() {
                Some(ShardValue::Int(int))
            } else {
                text.parse::<f64>().ok().filter(|f| f.is_finite()).map(ShardValue::Float)
            }
        }
        Value::SingleQuotedString(text) | Value::DoubleQuotedString(text) => {
            Some(ShardValue::Text(text.clone()))
        }
        Value::HexStringLiteral(hex) => i64::from_str_radix(hex, 16).ok().map(ShardValue::Int),
        _ => None,
    }
}

fn negate_value(value: ShardValue) -> Option<ShardValue> {
    match value {
        ShardValue::Int(int) => int.checked_neg().map(ShardValue::Int),
        ShardValue::Float(float) => Some(ShardValue::Float(-float)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_statement, SqlDialect};
    use sqlparser::ast::{SetExpr, Statement};

    /// Parse `SELECT <expr>` and read its single projected expression.
    fn read(expr_sql: &str, params: Option<&BoundParams>) -> Result<Extracted> {
        let sql = format!("SELECT {}", expr_sql);
        let (statement, scan) = parse_statement(&sql, SqlDialect::MySql, 64)?;
        let Statement::Query(query) = statement else {
            panic!("not a query");
        };
        let SetExpr::Select(select) = *query.body else {
            panic!("not a select");
        };
        let expr = match &select.projection[0] {
            sqlparser::ast::SelectItem::UnnamedExpr(expr) => expr.clone(),
            other => panic!("unexpected item {:?}", other),
        };
        let reader = ValueReader {
            sql: &sql,
            scan: &scan,
            params,
        };
        reader.read("uid", &expr)
    }

    fn known(extracted: Extracted) -> ShardValue {
        match extracted {
            Extracted::Known(value, _) => value,
            other => panic!("expected a known value, got {:?}", other),
        }
    }

    #[test]
    fn test_literals() {
        assert_eq!(known(read("42", None).unwrap()), ShardValue::Int(42));
        assert_eq!(known(read("-42", None).unwrap()), ShardValue::Int(-42));
        assert_eq!(known(read("(7)", None).unwrap()), ShardValue::Int(7));
        assert_eq!(known(read("1.5", None).unwrap()), ShardValue::Float(1.5));
        assert_eq!(
            known(read("'alice'", None).unwrap()),
            ShardValue::Text("alice".to_string())
        );
        assert_eq!(known(read("X'1F'", None).unwrap()), ShardValue::Int(31));
    }

    #[test]
    fn test_temporal_literal() {
        assert_eq!(
            known(read("DATE '2024-01-31'", None).unwrap()),
            ShardValue::Temporal("2024-01-31".to_string())
        );
    }

    #[test]
    fn test_positional_placeholders() {
        let mut params = BoundParams::new();
        params.insert(ParamKey::Index(2), ShardValue::Int(9));

        let sql_expr = "?, ?";
        let sql = format!("SELECT {}", sql_expr);
        let (statement, scan) = parse_statement(&sql, SqlDialect::MySql, 64).unwrap();
        let Statement::Query(query) = statement else {
            panic!("not a query");
        };
        let SetExpr::Select(select) = *query.body else {
            panic!("not a select");
        };
        let reader = ValueReader {
            sql: &sql,
            scan: &scan,
            params: Some(&params),
        };
        let exprs: Vec<Expr> = select
            .projection
            .iter()
            .filter_map(|item| match item {
                sqlparser::ast::SelectItem::UnnamedExpr(expr) => Some(expr.clone()),
                _ => None,
            })
            .collect();

        assert_eq!(
            reader.read("uid", &exprs[0]).unwrap(),
            Extracted::Unknown(ParamKey::Index(1))
        );
        assert_eq!(
            reader.read("uid", &exprs[1]).unwrap(),
            Extracted::Known(ShardValue::Int(9), ValueSource::Param(ParamKey::Index(2)))
        );
    }

    #[test]
    fn test_named_placeholder() {
        let mut params = BoundParams::new();
        params.insert(ParamKey::name("uid"), ShardValue::Int(3));
        assert_eq!(known(read(":uid", Some(&params)).unwrap()), ShardValue::Int(3));
        assert_eq!(
            read(":other", Some(&params)).unwrap(),
            Extracted::Unknown(ParamKey::name("other"))
        );
    }

    #[test]
    fn test_unsupported_expressions() {
        for expr in ["other_col", "1 + 2", "NOW()", "NULL", "TRUE"] {
            let err = read(expr, None).unwrap_err();
            assert!(
                matches!(err, RoutingError::UnsupportedValueType(_)),
                "{} gave {:?}",
                expr,
                err
            );
        }
    }
}
