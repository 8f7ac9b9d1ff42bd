//! Configuration data model and YAML loader.
//!
//! A single YAML document describes one [`Group`]: a name and an ordered
//! list of [`Origin`]s, each holding an ordered list of [`Job`]s. Loading
//! also validates job-id uniqueness per origin and collects every dangling
//! `dependencies` reference across the whole document before handing
//! anything to the resolver — the resolver's own DFS only sees cycles
//! within the closure of one target, so the full-set dangling-reference
//! scan belongs here.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ApiloomError, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Group {
    #[serde(rename = "group")]
    pub name: String,
    pub origins: Vec<Origin>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Origin {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(alias = "job", default)]
    pub jobs: Vec<Job>,
}

impl Origin {
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Auth,
    Request,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    Production,
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    Json,
    Xml,
    Text,
}

impl Default for ResponseFormat {
    fn default() -> Self {
        ResponseFormat::Json
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default)]
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 0,
            delay_ms: 0,
        }
    }
}

fn default_auth_type() -> String {
    "Bearer".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthRef {
    #[serde(rename = "type", default = "default_auth_type")]
    pub auth_type: String,
}

impl Default for AuthRef {
    fn default() -> Self {
        AuthRef {
            auth_type: default_auth_type(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    File,
    Database,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "type")]
    pub output_type: OutputType,

    // file variant
    pub path: Option<String>,
    pub filename: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub overwrite: bool,

    // database variant
    pub driver: Option<String>,
    pub table: Option<String>,
    pub data_path: Option<String>,
    #[serde(default)]
    pub columns: HashMap<String, String>,
    #[serde(default)]
    pub clear_before_insert: bool,
    pub connection_string: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(default = "default_mode")]
    pub mode: JobMode,

    pub method: Option<String>,
    pub path: Option<String>,
    #[serde(default)]
    pub headers: Option<Value>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub payload: Option<Value>,
    pub timeout: Option<u64>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,

    #[serde(default)]
    pub dependencies: Vec<String>,

    // auth-only
    pub session_name: Option<String>,
    pub token_identifier: Option<String>,
    pub token_expiration_identifier: Option<String>,
    pub token_expiration_time: Option<u64>,

    // request-with-auth
    #[serde(default)]
    pub auth: Option<AuthRef>,

    #[serde(default)]
    pub response_format: ResponseFormat,

    pub output: Option<OutputConfig>,
}

fn default_mode() -> JobMode {
    JobMode::Production
}

/// Parses a single YAML document into a [`Group`]. Does not validate —
/// call [`validate_group`] before handing the result to the resolver.
pub fn parse_group(yaml: &str) -> Result<Group> {
    serde_yaml::from_str(yaml).map_err(ApiloomError::SerdeYaml)
}

/// Reads and parses a YAML configuration file, then validates it.
pub fn load_group(path: &Path) -> Result<Group> {
    let contents = std::fs::read_to_string(path)?;
    let group = parse_group(&contents)?;
    validate_group(&group)?;
    Ok(group)
}

/// Validates job-id uniqueness per origin and that every `dependencies`
/// reference resolves within the same origin. Collects all problems
/// across the whole document before failing.
pub fn validate_group(group: &Group) -> Result<()> {
    for origin in &group.origins {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for job in &origin.jobs {
            if !seen.insert(job.id.as_str()) {
                duplicates.push(job.id.clone());
            }
        }
        if !duplicates.is_empty() {
            return Err(ApiloomError::ConfigError(format!(
                "origin '{}' has duplicate job ids: {}",
                origin.name,
                duplicates.join(", ")
            )));
        }

        let ids: HashSet<&str> = origin.jobs.iter().map(|j| j.id.as_str()).collect();
        let mut dangling = Vec::new();
        for job in &origin.jobs {
            for dep in &job.dependencies {
                if !ids.contains(dep.as_str()) {
                    dangling.push(format!("{}->{}", job.id, dep));
                }
            }
        }
        if !dangling.is_empty() {
            return Err(ApiloomError::DependencyMissing(format!(
                "origin '{}' has dangling dependency references: {}",
                origin.name,
                dangling.join(", ")
            )));
        }
    }
    Ok(())
}

/// Filters jobs by `mode` in place: a `production`-moded job never runs
/// under test mode and vice versa.
pub fn filter_by_mode(group: &Group, mode: JobMode) -> Group {
    let mut filtered = group.clone();
    for origin in &mut filtered.origins {
        origin.jobs.retain(|j| j.mode == mode);
    }
    filtered
}
