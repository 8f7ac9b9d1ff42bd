//! Row projection for the database sink.
//!
//! Pure functions turning one response record into the column map that
//! gets inserted: default projection (record's own fields, nested values
//! JSON-stringified, timestamps dropped) or explicit `columns` mapping
//! (dotted-path extraction), then the identifier-drop and metadata-attach
//! passes.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::template::get_path;

/// Projects one record into a column map. With an empty `columns_mapping`
/// this uses the record's own top-level fields (serializing nested
/// array/object values to JSON strings, and dropping `created_at`/
/// `updated_at`); otherwise each `columns_mapping` entry extracts a
/// dotted path from the record into the named column.
pub fn project_row(record: &Value, columns_mapping: &std::collections::HashMap<String, String>) -> Map<String, Value> {
    if columns_mapping.is_empty() {
        match record {
            Value::Object(map) => map
                .iter()
                .filter(|(k, _)| k.as_str() != "created_at" && k.as_str() != "updated_at")
                .map(|(k, v)| (k.clone(), serialize_nested(v)))
                .collect(),
            _ => Map::new(),
        }
    } else {
        columns_mapping
            .iter()
            .map(|(from, to)| {
                let value = get_path(record, from).unwrap_or(Value::Null);
                (to.clone(), serialize_nested(&value))
            })
            .collect()
    }
}

fn serialize_nested(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        other => other.clone(),
    }
}

/// Drops an `id` field from the row when no identifier column was
/// declared for the table, so the identity column can assign one.
pub fn maybe_drop_id(mut row: Map<String, Value>, identifier_declared: bool) -> Map<String, Value> {
    if !identifier_declared {
        row.remove("id");
    }
    row
}

/// Fills `job_id`/`timestamp`/`origin` only for columns the target table
/// actually has — this never adds new columns, it only populates ones
/// that already exist (freshly created or pre-existing).
pub fn attach_metadata(
    mut row: Map<String, Value>,
    job_id: &str,
    origin: &str,
    timestamp: &DateTime<Utc>,
    target_columns: &HashSet<String>,
) -> Map<String, Value> {
    if target_columns.contains("job_id") {
        row.insert("job_id".to_string(), Value::String(job_id.to_string()));
    }
    if target_columns.contains("timestamp") {
        row.insert("timestamp".to_string(), Value::String(timestamp.to_rfc3339()));
    }
    if target_columns.contains("origin") {
        row.insert("origin".to_string(), Value::String(origin.to_string()));
    }
    row
}

/// Selects the row set from a response body: navigates `data_path` when
/// given, then coerces an object with consecutive decimal-integer keys
/// into an array ordered by key.
pub fn select_rows(body: &Value, data_path: Option<&str>) -> Vec<Value> {
    let target = match data_path {
        Some(path) => get_path(body, path).unwrap_or(Value::Null),
        None => body.clone(),
    };
    match target {
        Value::Array(items) => items,
        Value::Object(map) => {
            if is_consecutive_integer_keyed(&map) {
                let mut entries: Vec<(usize, Value)> = map
                    .into_iter()
                    .filter_map(|(k, v)| k.parse::<usize>().ok().map(|n| (n, v)))
                    .collect();
                entries.sort_by_key(|(n, _)| *n);
                entries.into_iter().map(|(_, v)| v).collect()
            } else {
                vec![Value::Object(map)]
            }
        }
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn is_consecutive_integer_keyed(map: &Map<String, Value>) -> bool {
    if map.is_empty() {
        return false;
    }
    let mut keys: Vec<usize> = match map.keys().map(|k| k.parse::<usize>()).collect() {
        Ok(v) => v,
        Err(_) => return false,
    };
    keys.sort_unstable();
    keys.iter().enumerate().all(|(i, k)| *k == i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn default_projection_serializes_nested_values_and_drops_timestamps() {
        let record = json!({
            "id": 1,
            "name": "x",
            "meta": {"a": 1},
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-02T00:00:00Z",
        });
        let row = project_row(&record, &HashMap::new());
        assert_eq!(row.get("id"), Some(&json!(1)));
        assert_eq!(row.get("meta"), Some(&Value::String("{\"a\":1}".to_string())));
        assert!(!row.contains_key("created_at"));
        assert!(!row.contains_key("updated_at"));
    }

    #[test]
    fn explicit_columns_mapping_extracts_dotted_paths() {
        let record = json!({"profile": {"name": "ada"}});
        let mut mapping = HashMap::new();
        mapping.insert("profile.name".to_string(), "full_name".to_string());
        let row = project_row(&record, &mapping);
        assert_eq!(row.get("full_name"), Some(&Value::String("ada".to_string())));
    }

    #[test]
    fn maybe_drop_id_removes_id_when_no_identifier_declared() {
        let mut row = Map::new();
        row.insert("id".to_string(), json!(1));
        row.insert("name".to_string(), json!("x"));
        let row = maybe_drop_id(row, false);
        assert!(!row.contains_key("id"));
        assert!(row.contains_key("name"));
    }

    #[test]
    fn maybe_drop_id_keeps_id_when_declared() {
        let mut row = Map::new();
        row.insert("id".to_string(), json!(1));
        let row = maybe_drop_id(row, true);
        assert!(row.contains_key("id"));
    }

    #[test]
    fn attach_metadata_only_fills_existing_target_columns() {
        let row = Map::new();
        let mut target_columns = HashSet::new();
        target_columns.insert("job_id".to_string());
        let ts = Utc::now();
        let row = attach_metadata(row, "fetch", "api", &ts, &target_columns);
        assert!(row.contains_key("job_id"));
        assert!(!row.contains_key("timestamp"));
        assert!(!row.contains_key("origin"));
    }

    #[test]
    fn select_rows_navigates_data_path() {
        let body = json!({"data": [{"id": 1}, {"id": 2}]});
        let rows = select_rows(&body, Some("data"));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn select_rows_coerces_consecutive_integer_keyed_object() {
        let body = json!({"0": {"id": 1}, "1": {"id": 2}});
        let rows = select_rows(&body, None);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], 1);
        assert_eq!(rows[1]["id"], 2);
    }

    #[test]
    fn select_rows_non_consecutive_keyed_object_is_single_row() {
        let body = json!({"0": 1, "2": 2});
        let rows = select_rows(&body, None);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn select_rows_empty_data_path_result_is_zero_rows() {
        let body = json!({"data": []});
        let rows = select_rows(&body, Some("data"));
        assert_eq!(rows.len(), 0);
    }

    #[test]
    fn select_rows_missing_data_path_is_zero_rows() {
        let body = json!({"other": 1});
        let rows = select_rows(&body, Some("data"));
        assert_eq!(rows.len(), 0);
    }
}
