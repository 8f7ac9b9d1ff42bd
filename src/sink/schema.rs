//! Column type inference and identifier-column detection.
//!
//! Pure functions over a representative JSON record — no connection
//! required, which is what makes them unit-testable without a live SQL
//! Server. Infers one SQL Server column type per field from a single
//! representative record, rather than a full streamed-schema inference
//! pass over the whole result set.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// Reserved identifier column names checked in this exact priority order.
pub const RESERVED_IDENTIFIER_COLUMNS: &[&str] =
    &["id", "ID", "codigo", "Codigo", "codigoEmpresa", "CodigoEmpresa"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    BigInt,
    Real,
    DateTime,
    NvarcharMax,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Real => "REAL",
            ColumnType::DateTime => "DATETIME",
            ColumnType::NvarcharMax => "NVARCHAR(MAX)",
        }
    }
}

fn datetime_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}").expect("valid regex")
    })
}

/// Infers a column type for a single field value.
pub fn infer_column_type(value: &Value) -> ColumnType {
    match value {
        Value::Null => ColumnType::Text,
        Value::Bool(_) => ColumnType::Integer,
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if (i32::MIN as i64..=i32::MAX as i64).contains(&i) {
                    ColumnType::Integer
                } else {
                    ColumnType::BigInt
                }
            } else if n.is_u64() {
                ColumnType::BigInt
            } else {
                ColumnType::Real
            }
        }
        Value::String(s) => {
            if datetime_prefix_re().is_match(s) {
                ColumnType::DateTime
            } else {
                ColumnType::Text
            }
        }
        Value::Array(_) | Value::Object(_) => ColumnType::NvarcharMax,
    }
}

/// Infers one column per field of a representative record, in field
/// declaration order. Non-object records infer no columns.
pub fn infer_columns(record: &Value) -> Vec<(String, ColumnType)> {
    match record {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), infer_column_type(v)))
            .collect(),
        _ => Vec::new(),
    }
}

/// Returns the first reserved identifier key present on `record`, in
/// priority order, or `None` if the record carries no such column.
pub fn detect_identifier_column(record: &Value) -> Option<String> {
    let Value::Object(map) = record else {
        return None;
    };
    RESERVED_IDENTIFIER_COLUMNS
        .iter()
        .find(|key| map.contains_key(**key))
        .map(|key| key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_infers_text() {
        assert_eq!(infer_column_type(&Value::Null), ColumnType::Text);
    }

    #[test]
    fn int32_range_infers_integer() {
        assert_eq!(infer_column_type(&json!(42)), ColumnType::Integer);
        assert_eq!(infer_column_type(&json!(-2147483648)), ColumnType::Integer);
    }

    #[test]
    fn out_of_int32_range_infers_bigint() {
        assert_eq!(infer_column_type(&json!(5_000_000_000i64)), ColumnType::BigInt);
    }

    #[test]
    fn fractional_number_infers_real() {
        assert_eq!(infer_column_type(&json!(3.14)), ColumnType::Real);
    }

    #[test]
    fn bool_infers_integer() {
        assert_eq!(infer_column_type(&json!(true)), ColumnType::Integer);
    }

    #[test]
    fn iso_datetime_string_infers_datetime() {
        assert_eq!(
            infer_column_type(&json!("2024-01-15T10:30:00Z")),
            ColumnType::DateTime
        );
    }

    #[test]
    fn plain_string_infers_text() {
        assert_eq!(infer_column_type(&json!("hello")), ColumnType::Text);
    }

    #[test]
    fn nested_object_infers_nvarchar_max() {
        assert_eq!(infer_column_type(&json!({"a": 1})), ColumnType::NvarcharMax);
        assert_eq!(infer_column_type(&json!([1, 2])), ColumnType::NvarcharMax);
    }

    #[test]
    fn infer_columns_covers_every_field() {
        let record = json!({"id": 1, "name": "x", "active": true});
        let columns = infer_columns(&record);
        assert_eq!(columns.len(), 3);
    }

    #[test]
    fn detect_identifier_column_prefers_declared_priority() {
        let record = json!({"codigo": "C1", "id": 1});
        assert_eq!(detect_identifier_column(&record), Some("id".to_string()));
    }

    #[test]
    fn detect_identifier_column_absent_when_no_reserved_key() {
        let record = json!({"name": "x"});
        assert_eq!(detect_identifier_column(&record), None);
    }
}
