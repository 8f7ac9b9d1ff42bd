//! Tracing setup for apiloom.
//!
//! Recognized environment variables: `LOG_LEVEL`, `LOG_SILENT`, `LOG_DIR`.
//! CLI flags (`--log-json`, `--log-level`, `-s`) override the
//! corresponding env var when given.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

/// Guard returned by [`init_tracing`]; dropping it flushes the non-blocking
/// file writer. The caller must keep it alive for the process lifetime.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the global tracing subscriber from environment variables.
///
/// Reads `LOG_LEVEL` (falls back to `RUST_LOG`, then `"info"`), `LOG_SILENT`
/// (any truthy value suppresses the stdout layer), and `LOG_DIR` (enables a
/// rotated file layer under that directory).
pub fn init_tracing() -> LogGuard {
    let level = std::env::var("LOG_LEVEL").ok();
    let silent = std::env::var("LOG_SILENT")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    let log_dir = std::env::var("LOG_DIR").ok();
    init_tracing_with(level.as_deref(), false, silent, log_dir.as_deref().map(Path::new))
}

/// Initialize the global tracing subscriber with explicit configuration.
///
/// * `level` — explicit filter, overrides `RUST_LOG`/`LOG_LEVEL` when given.
/// * `use_json` — structured JSON output instead of the human-readable format.
/// * `silent` — suppress the stdout/stderr layer (file layer, if any, is unaffected).
/// * `log_dir` — when set, adds a daily-rotated file layer (a size-based
///   "10 MB × 5" rotation policy is approximated by daily rotation here;
///   see DESIGN.md).
pub fn init_tracing_with(
    level: Option<&str>,
    use_json: bool,
    silent: bool,
    log_dir: Option<&Path>,
) -> LogGuard {
    let filter = match level {
        Some(lvl) => EnvFilter::new(lvl),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let registry = Registry::default().with(filter).with(ErrorLayer::default());

    let stdout_layer = if silent {
        None
    } else if use_json {
        Some(
            fmt::layer()
                .json()
                .with_target(false)
                .with_file(false)
                .with_line_number(false)
                .boxed(),
        )
    } else {
        Some(
            fmt::layer()
                .with_target(false)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        )
    };

    let (file_layer, file_guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "app.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(non_blocking)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = registry.with(stdout_layer).with(file_layer);

    tracing::subscriber::set_global_default(subscriber)
        .expect("failed to set global tracing subscriber");

    LogGuard {
        _file_guard: file_guard,
    }
}

/// Renders a value for a log line without leaking secrets. Anything the
/// caller names as sensitive (connection strings, tokens, decrypted
/// `ENC:` payloads) should go through this instead of `Debug`/`Display`.
pub fn redact(_value: &str) -> &'static str {
    "<redacted>"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_never_returns_the_input() {
        assert_eq!(redact("server=db;password=hunter2"), "<redacted>");
    }
}
