//! File sink.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::OutputConfig;
use crate::errors::{ApiloomError, Result};

/// Resolves `$JOBID` and `$TS` (timestamp `YYYY-MM-DD_HH-MM-SS`) in a
/// filename template.
pub fn resolve_filename(template: &str, job_id: &str) -> String {
    let ts = chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    template.replace("$JOBID", job_id).replace("$TS", &ts)
}

/// Determines the output format: an explicit non-`"auto"` config value
/// wins; otherwise infer from the response `Content-Type`.
pub fn determine_format(explicit: Option<&str>, content_type: Option<&str>) -> &'static str {
    match explicit {
        Some("json") => "json",
        Some("xml") => "xml",
        Some("txt") => "txt",
        Some("auto") | None => infer_format_from_content_type(content_type),
        Some(_) => "txt",
    }
}

fn infer_format_from_content_type(content_type: Option<&str>) -> &'static str {
    match content_type {
        Some(ct) if ct.starts_with("application/json") => "json",
        Some(ct) if ct.starts_with("application/xml") || ct.starts_with("text/xml") => "xml",
        Some(ct) if ct.starts_with("text/") => "txt",
        _ => "txt",
    }
}

fn serialize(data: &Value, format: &str) -> Result<String> {
    if format == "json" {
        return Ok(serde_json::to_string_pretty(data)?);
    }
    match data {
        Value::String(s) => Ok(s.clone()),
        other => Ok(serde_json::to_string_pretty(other)?),
    }
}

/// Writes `data` to a templated path under `config.path`. Fails if the
/// target already exists and `config.overwrite` is false. Writes
/// atomically: the content lands in a sibling temp file, then is renamed
/// into place.
pub fn write_file(
    data: &Value,
    content_type: Option<&str>,
    job_id: &str,
    config: &OutputConfig,
) -> Result<PathBuf> {
    let dir = config.path.as_deref().unwrap_or(".");
    std::fs::create_dir_all(dir)?;

    let format = determine_format(config.format.as_deref(), content_type);
    let template = config
        .filename
        .clone()
        .unwrap_or_else(|| format!("{job_id}_$TS"));
    let mut filename = resolve_filename(&template, job_id);
    if Path::new(&filename).extension().is_none() {
        filename = format!("{filename}.{format}");
    }

    let target = Path::new(dir).join(&filename);
    if target.exists() && !config.overwrite {
        return Err(ApiloomError::WriterError(format!(
            "file already exists: {}",
            target.display()
        )));
    }

    let content = serialize(data, format)?;
    let tmp = target.with_extension(format!("{format}.tmp"));
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, &target)?;
    Ok(target)
}
