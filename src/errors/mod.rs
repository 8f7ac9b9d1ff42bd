use thiserror::Error;
use tracing_subscriber::filter::FromEnvError;

/// Main error type for apiloom operations.
///
/// Each variant corresponds to one of the failure kinds enumerated in the
/// error-handling design: some are fatal at startup, some are retried in
/// place, some only warn. The enum itself carries no policy — callers
/// decide what to do with a given variant; the `executor` and
/// `orchestrator` modules encode the actual policy.
#[derive(Error, Debug)]
pub enum ApiloomError {
    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid header name: {0}")]
    HeaderName(#[from] reqwest::header::InvalidHeaderName),

    #[error("Invalid header value: {0}")]
    HeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    #[error("JSON serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("SQL Server error: {0}")]
    Tiberius(#[from] tiberius::error::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("Directory walk error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Dependency missing: {0}")]
    DependencyMissing(String),

    #[error("Dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("HTTP transport error: {0}")]
    HttpTransport(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Writer error: {0}")]
    WriterError(String),

    #[error("Unsupported sink: {0}")]
    UnsupportedSink(String),

    #[error("Job {job_id} is already running")]
    ReentrantExecution { job_id: String },

    #[error("Tracing from-env error: {0}")]
    FromEnvError(#[from] FromEnvError),
}

/// Convenience Result type that uses ApiloomError
pub type Result<T> = std::result::Result<T, ApiloomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ApiloomError::ConfigError("missing url".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing url");
    }

    #[test]
    fn test_writer_error() {
        let err = ApiloomError::WriterError("connection failed".to_string());
        assert!(err.to_string().contains("Writer error"));
    }

    #[test]
    fn test_reentrant_execution_display() {
        let err = ApiloomError::ReentrantExecution {
            job_id: "fetch_users".to_string(),
        };
        assert!(err.to_string().contains("fetch_users"));
    }
}
