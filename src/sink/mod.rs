//! Sink dispatch.
//!
//! A closed variant set with one path per driver: file and database are
//! the only two `output.type` values, and there is no runtime plugin
//! mechanism or dynamic dispatch between sink kinds.

pub mod database;
pub mod file;
pub mod row;
pub mod schema;

use std::collections::HashSet;

use serde_json::Value;

use crate::config::{OutputConfig, OutputType};
use crate::errors::{ApiloomError, Result};
use crate::template::Substitutor;

/// Dispatches a completed request job's response to its configured sink.
/// Whether a sink failure should downgrade to a warning is the caller's
/// concern — this returns the error so the executor can decide.
pub async fn dispatch(
    data: &Value,
    content_type: Option<&str>,
    job_id: &str,
    origin_name: &str,
    origin_connection_string: Option<&str>,
    config: &OutputConfig,
    substitutor: &Substitutor<'_>,
) -> Result<()> {
    match config.output_type {
        OutputType::File => {
            file::write_file(data, content_type, job_id, config)?;
            Ok(())
        }
        OutputType::Database => {
            run_database_sink(data, job_id, origin_name, origin_connection_string, config, substitutor).await
        }
    }
}

async fn run_database_sink(
    body: &Value,
    job_id: &str,
    origin_name: &str,
    origin_connection_string: Option<&str>,
    config: &OutputConfig,
    substitutor: &Substitutor<'_>,
) -> Result<()> {
    let driver = config.driver.as_deref().unwrap_or("sqlserver");
    if driver != "sqlserver" {
        return Err(ApiloomError::UnsupportedSink(format!(
            "unsupported database driver: {driver}"
        )));
    }

    let raw_connection_string = config
        .connection_string
        .clone()
        .or_else(|| origin_connection_string.map(str::to_string))
        .ok_or_else(|| ApiloomError::ConfigError("no connection_string configured for database sink".to_string()))?;
    let connection_string = substitutor.substitute_string(&raw_connection_string);
    if connection_string.trim().is_empty() {
        return Err(ApiloomError::ConfigError(
            "resolved connection_string is empty".to_string(),
        ));
    }

    let table = config
        .table
        .as_deref()
        .ok_or_else(|| ApiloomError::ConfigError("database sink missing 'table'".to_string()))?;

    let sink = database::DatabaseSink::connect(&connection_string)
        .await
        .map_err(|e| ApiloomError::WriterError(format!("database connection failed: {e}")))?;

    let rows = row::select_rows(body, config.data_path.as_deref());
    let identifier_column = rows.first().and_then(schema::detect_identifier_column);

    if config.clear_before_insert {
        // Drop unconditionally so the table is re-created with freshly
        // inferred schema.
        sink.drop_table(table).await?;
    }

    let existed_before_drop = !config.clear_before_insert && sink.table_exists(table).await?;

    let target_columns: HashSet<String> = if !existed_before_drop {
        let inferred = rows.first().map(schema::infer_columns).unwrap_or_default();
        sink.create_table(table, &inferred, identifier_column.as_deref()).await?;
        let mut columns: HashSet<String> = inferred.into_iter().map(|(name, _)| name).collect();
        columns.insert(
            identifier_column
                .clone()
                .unwrap_or_else(|| "id".to_string()),
        );
        columns.insert("created_at".to_string());
        columns
    } else {
        sink.table_columns(table).await?
    };

    let timestamp = chrono::Utc::now();
    let mut inserted = 0usize;
    let total = rows.len();
    for record in &rows {
        let projected = row::project_row(record, &config.columns);
        let projected = row::maybe_drop_id(projected, identifier_column.is_some());
        let projected = row::attach_metadata(projected, job_id, origin_name, &timestamp, &target_columns);
        match sink.insert_row(table, &projected).await {
            Ok(()) => inserted += 1,
            Err(err) => {
                tracing::warn!(error = %err, table, job_id, "row insert failed, skipping");
            }
        }
    }
    tracing::info!(table, inserted, total, "database sink complete");

    Ok(())
}
