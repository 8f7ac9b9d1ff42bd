//! Swagger-to-configuration generator.
//!
//! A thin, best-effort transform: for every `path × method` in an
//! OpenAPI/Swagger document, emit one skeleton `request` Job (method,
//! path, empty headers/params) into a single generated [`Origin`], then
//! serialize the resulting [`Group`] to YAML. No attempt at full OpenAPI
//! fidelity — parameter schemas, request bodies, and auth schemes are not
//! translated; an operator is expected to hand-edit the result.

use std::path::Path;

use serde_json::Value;

use crate::config::{Group, Job, JobMode, JobType, Origin, ResponseFormat, RetryPolicy};
use crate::errors::{ApiloomError, Result};

const METHODS: &[&str] = &["get", "post", "put", "patch", "delete", "head", "options"];

/// Reads an OpenAPI/Swagger JSON document at `swagger_path` and writes a
/// generated YAML configuration to `output_path`.
pub fn generate_config(swagger_path: &Path, output_path: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(swagger_path)?;
    let doc: Value = serde_json::from_str(&contents).map_err(ApiloomError::SerdeJson)?;
    let group = build_group(&doc)?;
    let yaml = serde_yaml::to_string(&group)?;
    std::fs::write(output_path, yaml)?;
    Ok(())
}

fn build_group(doc: &Value) -> Result<Group> {
    let base_url = infer_base_url(doc);
    let paths = doc
        .get("paths")
        .and_then(Value::as_object)
        .ok_or_else(|| ApiloomError::ConfigError("swagger document has no 'paths' object".to_string()))?;

    let mut jobs = Vec::new();
    for (path, operations) in paths {
        let Some(operations) = operations.as_object() else {
            continue;
        };
        for method in METHODS {
            if !operations.contains_key(*method) {
                continue;
            }
            jobs.push(job_skeleton(path, method));
        }
    }

    Ok(Group {
        name: "generated".to_string(),
        origins: vec![Origin {
            name: "generated".to_string(),
            base_url,
            connection_string: None,
            jobs,
        }],
    })
}

/// OpenAPI 3 carries `servers[0].url`; Swagger 2 carries `host` +
/// `basePath`. Falls back to an empty string (operator fills it in) when
/// neither is present.
fn infer_base_url(doc: &Value) -> String {
    if let Some(url) = doc
        .get("servers")
        .and_then(Value::as_array)
        .and_then(|servers| servers.first())
        .and_then(|server| server.get("url"))
        .and_then(Value::as_str)
    {
        return url.to_string();
    }
    if let Some(host) = doc.get("host").and_then(Value::as_str) {
        let base_path = doc.get("basePath").and_then(Value::as_str).unwrap_or("");
        let scheme = doc
            .get("schemes")
            .and_then(Value::as_array)
            .and_then(|s| s.first())
            .and_then(Value::as_str)
            .unwrap_or("https");
        return format!("{scheme}://{host}{base_path}");
    }
    String::new()
}

fn job_skeleton(path: &str, method: &str) -> Job {
    Job {
        id: sanitize_job_id(path, method),
        job_type: JobType::Request,
        mode: JobMode::Production,
        method: Some(method.to_uppercase()),
        path: Some(path.to_string()),
        headers: None,
        params: None,
        payload: None,
        timeout: None,
        retry_policy: RetryPolicy::default(),
        dependencies: Vec::new(),
        session_name: None,
        token_identifier: None,
        token_expiration_identifier: None,
        token_expiration_time: None,
        auth: None,
        response_format: ResponseFormat::default(),
        output: None,
    }
}

fn non_alnum_run_re() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"[^A-Za-z0-9]+").expect("valid regex"))
}

/// `/users/{id}` + `get` → `get_users_id_`: each run of non-alphanumeric
/// characters collapses to a single underscore; only the leading one
/// (from the path's own leading `/`) is trimmed.
fn sanitize_job_id(path: &str, method: &str) -> String {
    let cleaned = non_alnum_run_re().replace_all(path, "_");
    let cleaned = cleaned.trim_start_matches('_');
    format!("{method}_{cleaned}")
}
