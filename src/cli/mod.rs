//! CLI.
//!
//! `apiloom-run` is a single binary. With no subcommand it runs a target
//! job (`-j <id>`) against configuration discovered under `-d <dir>` (or
//! a single `-f <file>`), in `-p`/`-t` mode. The `encrypt`/`decrypt`/
//! `generate-config`/`list` subcommands are standalone utilities that
//! don't touch the orchestrator at all.

use std::io::Read as _;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use rand::RngCore;
use tokio_util::sync::CancellationToken;

use crate::config::{self, Group, JobMode};
use crate::errors::{ApiloomError, Result};
use crate::executor::{ExecutionOptions, JobExecutor};
use crate::http::HttpClient;
use crate::orchestrator::{self, RunOutcome};
use crate::session::SessionStore;
use crate::template::crypto;
use crate::{cache, log};

#[derive(Parser, Debug)]
#[command(
    name = "apiloom-run",
    version,
    about = "Declarative HTTP integration runner: REST extraction, auth lifecycles, and file/SQL Server sinks driven by YAML job graphs."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Run in production mode. Mutually exclusive with `-t`.
    #[arg(short = 'p', conflicts_with = "test_mode")]
    pub production: bool,

    /// Run in test mode (verbose by default). Mutually exclusive with `-p`.
    #[arg(short = 't')]
    pub test_mode: bool,

    /// Target job id to run.
    #[arg(short = 'j', value_name = "ID")]
    pub job: Option<String>,

    /// Validate configuration and copy it to the system config directory.
    #[arg(short = 'i')]
    pub import: bool,

    /// Validate configuration only; do not run anything.
    #[arg(short = 'v')]
    pub validate_only: bool,

    /// Configuration root directory (scanned for *.yml/*.yaml).
    #[arg(short = 'd', value_name = "DIR", default_value = "docs")]
    pub config_dir: PathBuf,

    /// A single configuration file, overriding `-d`.
    #[arg(short = 'f', value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Suppress stdout/stderr logging.
    #[arg(short = 's')]
    pub silent: bool,

    /// Overrides the target job's `payload` with the contents of this JSON file.
    #[arg(long = "payload-file", value_name = "PATH")]
    pub payload_file: Option<PathBuf>,

    /// Overrides the target job's `params` with the contents of this JSON file.
    #[arg(long = "params-file", value_name = "PATH")]
    pub params_file: Option<PathBuf>,

    /// Write response metadata (pagination fields, `succeeded`, `errors`,
    /// `message`) to `./output-response-params.js`, with `data` redacted.
    #[arg(long = "output-response-params")]
    pub output_response_params: bool,

    /// Emit logs in JSON format.
    #[arg(long = "log-json")]
    pub log_json: bool,

    /// Explicit log filter, overrides `LOG_LEVEL`/`RUST_LOG`.
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encrypts text into an `ENC:`-prefixed value (reads stdin if omitted).
    Encrypt { text: Option<String> },
    /// Decrypts an `ENC:`-prefixed value (reads stdin if omitted).
    Decrypt { text: Option<String> },
    /// Generates a skeleton configuration from a Swagger/OpenAPI document.
    GenerateConfig {
        #[arg(long)]
        swagger: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Lists an origin's job names or ids.
    List { kind: ListKind, origin: String },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListKind {
    Names,
    Ids,
}

/// Top-level dispatch. Returns `Err` for any failure; `main` maps that to
/// exit code 1.
pub async fn dispatch(cli: Cli) -> Result<()> {
    match &cli.command {
        Some(Command::Encrypt { text }) => {
            let plaintext = resolve_text_arg(text.as_deref())?;
            let key = master_key()?;
            println!("{}", crypto::encrypt(&plaintext, &key)?);
            Ok(())
        }
        Some(Command::Decrypt { text }) => {
            let ciphertext = resolve_text_arg(text.as_deref())?;
            let key = master_key()?;
            println!("{}", crypto::decrypt(&ciphertext, &key)?);
            Ok(())
        }
        Some(Command::GenerateConfig { swagger, output }) => {
            crate::codegen::generate_config(swagger, output)
        }
        Some(Command::List { kind, origin }) => run_list(&cli, *kind, origin),
        None => run_default(&cli).await,
    }
}

fn resolve_text_arg(text: Option<&str>) -> Result<String> {
    match text {
        Some(t) => Ok(t.to_string()),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf.trim_end_matches(['\n', '\r']).to_string())
        }
    }
}

/// Reads `ENV_ENCRYPTION_KEY`; generates and reports a fresh one if unset.
fn master_key() -> Result<Vec<u8>> {
    if let Ok(key) = std::env::var("ENV_ENCRYPTION_KEY") {
        return Ok(key.into_bytes());
    }
    let mut generated = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut generated);
    let hex: String = generated.iter().map(|b| format!("{b:02x}")).collect();
    tracing::warn!(
        generated_key = %hex,
        "ENV_ENCRYPTION_KEY not set; generated a one-off key for this invocation — set ENV_ENCRYPTION_KEY to reuse it"
    );
    Ok(hex.into_bytes())
}

fn run_list(cli: &Cli, kind: ListKind, origin_name: &str) -> Result<()> {
    let groups = load_groups(cli)?;
    let origin = groups
        .iter()
        .flat_map(|g| &g.origins)
        .find(|o| o.name == origin_name)
        .ok_or_else(|| ApiloomError::ConfigError(format!("origin '{origin_name}' not found")))?;

    for job in &origin.jobs {
        match kind {
            ListKind::Ids => println!("{}", job.id),
            ListKind::Names => println!("{} ({:?})", job.id, job.job_type),
        }
    }
    Ok(())
}

async fn run_default(cli: &Cli) -> Result<()> {
    let log_level = cli.log_level.clone().or_else(|| std::env::var("LOG_LEVEL").ok());
    let env_silent = std::env::var("LOG_SILENT")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    let log_dir = std::env::var("LOG_DIR").ok();
    let _guard = log::init_tracing_with(
        log_level.as_deref(),
        cli.log_json,
        cli.silent || env_silent,
        log_dir.as_deref().map(Path::new),
    );

    let groups = load_groups(cli)?;

    if cli.import {
        import_configs(cli)?;
    }
    if cli.validate_only {
        tracing::info!(groups = groups.len(), "configuration validated successfully");
        return Ok(());
    }

    let job_id = cli
        .job
        .as_deref()
        .ok_or_else(|| ApiloomError::ConfigError("-j <id> is required to run a job".to_string()))?;

    let mode = if cli.test_mode {
        JobMode::Test
    } else {
        // `-p` and bare invocations both default to production.
        JobMode::Production
    };

    let group = groups
        .iter()
        .find(|g| g.origins.iter().any(|o| o.job(job_id).is_some()))
        .ok_or_else(|| ApiloomError::ConfigError(format!("job '{job_id}' not found in any loaded configuration")))?;

    let payload_override = load_json_override(cli.payload_file.as_deref())?;
    let params_override = load_json_override(cli.params_file.as_deref())?;
    let options = ExecutionOptions {
        payload_override: payload_override.as_ref(),
        params_override: params_override.as_ref(),
    };

    let http = HttpClient::new()?;
    let session = SessionStore::new();
    let _sweeper = session.spawn_sweeper();
    let invocation_cache = cache::InvocationCache::new();
    let master_key = std::env::var("ENV_ENCRYPTION_KEY").ok().map(String::into_bytes);
    let executor = JobExecutor::new(http, session, invocation_cache.clone(), master_key);

    let cancel = CancellationToken::new();
    let watcher_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            watcher_token.cancel();
        }
    });

    let outcome = orchestrator::run(group, job_id, Some(mode), &executor, &options, &cancel).await?;

    if cli.output_response_params {
        write_response_params(&invocation_cache, job_id)?;
    }

    match outcome {
        RunOutcome::Completed { .. } => Ok(()),
        RunOutcome::Cancelled { .. } => Err(ApiloomError::ConfigError(
            "run cancelled before completion".to_string(),
        )),
    }
}

fn load_json_override(path: Option<&Path>) -> Result<Option<serde_json::Value>> {
    match path {
        Some(p) => {
            let contents = std::fs::read_to_string(p)?;
            Ok(Some(serde_json::from_str(&contents)?))
        }
        None => Ok(None),
    }
}

const RESPONSE_METADATA_FIELDS: &[&str] = &[
    "currentPage",
    "totalPages",
    "pageSize",
    "totalCount",
    "hasPrevious",
    "hasNext",
    "succeeded",
    "errors",
    "message",
];

/// Writes response metadata fields for `job_id`'s cached result to
/// `./output-response-params.js`, with the bulky `data` field redacted.
fn write_response_params(invocation_cache: &cache::InvocationCache, job_id: &str) -> Result<()> {
    let Some(entry) = invocation_cache.get(job_id) else {
        return Ok(());
    };
    let Some(data) = entry.data() else {
        return Ok(());
    };
    let mut metadata = serde_json::Map::new();
    for field in RESPONSE_METADATA_FIELDS {
        if let Some(value) = data.get(field) {
            metadata.insert((*field).to_string(), value.clone());
        }
    }
    metadata.insert("data".to_string(), serde_json::Value::String("<redacted>".to_string()));
    let body = serde_json::to_string_pretty(&metadata)?;
    std::fs::write("./output-response-params.js", format!("module.exports = {body};\n"))?;
    Ok(())
}

fn load_groups(cli: &Cli) -> Result<Vec<Group>> {
    if let Some(file) = &cli.config_file {
        return Ok(vec![config::load_group(file)?]);
    }
    discover_groups(&cli.config_dir)
}

fn discover_groups(dir: &Path) -> Result<Vec<Group>> {
    let mut groups = Vec::new();
    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(std::result::Result::ok) {
        let path = entry.path();
        let is_yaml = matches!(path.extension().and_then(|e| e.to_str()), Some("yml") | Some("yaml"));
        if path.is_file() && is_yaml {
            groups.push(config::load_group(path)?);
        }
    }
    if groups.is_empty() {
        return Err(ApiloomError::ConfigError(format!(
            "no configuration files found under '{}'",
            dir.display()
        )));
    }
    Ok(groups)
}

/// Copies every discovered configuration file byte-for-byte into the
/// system config directory, validating each one first. Falls back to a
/// per-user directory when the system path isn't writable (e.g. no root
/// on a dev machine).
fn import_configs(cli: &Cli) -> Result<()> {
    let files: Vec<PathBuf> = if let Some(file) = &cli.config_file {
        vec![file.clone()]
    } else {
        walkdir::WalkDir::new(&cli.config_dir)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .map(|e| e.into_path())
            .filter(|p| p.is_file() && matches!(p.extension().and_then(|e| e.to_str()), Some("yml") | Some("yaml")))
            .collect()
    };

    let target_dir = system_config_dir();
    std::fs::create_dir_all(&target_dir)?;
    for file in files {
        let Some(name) = file.file_name() else { continue };
        std::fs::copy(&file, target_dir.join(name))?;
    }
    tracing::info!(dir = %target_dir.display(), "configuration imported");
    Ok(())
}

fn system_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("APILOOM_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    let system_path = PathBuf::from("/etc/apiloom");
    if std::fs::create_dir_all(&system_path).is_ok() {
        return system_path;
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".apiloom")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_text_arg_prefers_explicit_text() {
        assert_eq!(resolve_text_arg(Some("hello")).unwrap(), "hello");
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::parse_from(["apiloom-run", "-p", "-j", "fetch", "-d", "configs"]);
        assert!(cli.production);
        assert!(!cli.test_mode);
        assert_eq!(cli.job.as_deref(), Some("fetch"));
        assert_eq!(cli.config_dir, PathBuf::from("configs"));
    }

    #[test]
    fn cli_rejects_p_and_t_together() {
        let result = Cli::try_parse_from(["apiloom-run", "-p", "-t", "-j", "fetch"]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_parses_encrypt_subcommand() {
        let cli = Cli::parse_from(["apiloom-run", "encrypt", "hello"]);
        match cli.command {
            Some(Command::Encrypt { text }) => assert_eq!(text.as_deref(), Some("hello")),
            _ => panic!("expected Encrypt"),
        }
    }

    #[test]
    fn cli_parses_list_subcommand() {
        let cli = Cli::parse_from(["apiloom-run", "list", "ids", "api"]);
        match cli.command {
            Some(Command::List { kind, origin }) => {
                assert_eq!(kind, ListKind::Ids);
                assert_eq!(origin, "api");
            }
            _ => panic!("expected List"),
        }
    }
}
