//! Orchestrator.
//!
//! Top-level loop: given an already-loaded [`Group`], a target job id, and
//! an optional mode filter, resolves the execution order for the target's
//! dependency closure and walks it through the [`JobExecutor`], stopping
//! at the first hard failure. Mode filtering happens before resolution —
//! a `production`-moded job never runs under a `test`-mode invocation and
//! vice versa; if the target itself is filtered out, that is a
//! configuration error, not a silent no-op.

use tokio_util::sync::CancellationToken;

use crate::config::{filter_by_mode, Group, JobMode, Origin};
use crate::errors::{ApiloomError, Result};
use crate::executor::{ExecutionOptions, JobExecutor};
use crate::resolver;

/// Outcome of one orchestrator run.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Every job in the resolved order completed.
    Completed { order: Vec<String> },
    /// Cancellation was observed before the next job started; `completed`
    /// lists the jobs that finished before the stop.
    Cancelled { completed: Vec<String> },
}

impl RunOutcome {
    /// Exit-code-shaped view: only a fully completed run is a success —
    /// a cancellation stops before the next job and returns a non-zero
    /// status.
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }
}

/// Resolves execution order for `target_job_id`'s dependency closure and
/// runs it via `executor`. `mode` filters the whole group (all origins)
/// before the target is located, mirroring the CLI's `-p`/`-t` flags.
pub async fn run(
    group: &Group,
    target_job_id: &str,
    mode: Option<JobMode>,
    executor: &JobExecutor,
    options: &ExecutionOptions<'_>,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    let filtered = match mode {
        Some(m) => filter_by_mode(group, m),
        None => group.clone(),
    };

    let origin = find_origin_for_job(&filtered, target_job_id).ok_or_else(|| {
        ApiloomError::ConfigError(format!(
            "target job '{target_job_id}' not found (it may have been excluded by the mode filter)"
        ))
    })?;

    let order = resolver::resolve(&origin.jobs, Some(target_job_id))?;
    tracing::info!(target = target_job_id, order = ?order, "resolved execution order");

    let mut completed = Vec::with_capacity(order.len());
    for job_id in &order {
        if cancel.is_cancelled() {
            tracing::warn!(remaining = order.len() - completed.len(), "orchestrator cancelled");
            return Ok(RunOutcome::Cancelled { completed });
        }

        let job = origin.job(job_id).expect("resolver only returns known job ids");
        tracing::info!(job_id = %job_id, origin = %origin.name, "executing job");
        executor
            .execute_job(origin, job, &filtered.origins, options)
            .await
            .map_err(|err| {
                tracing::error!(job_id = %job_id, error = %err, "job failed; halting run");
                err
            })?;
        tracing::info!(job_id = %job_id, "job completed");
        completed.push(job_id.clone());
    }

    Ok(RunOutcome::Completed { order: completed })
}

fn find_origin_for_job<'g>(group: &'g Group, job_id: &str) -> Option<&'g Origin> {
    group.origins.iter().find(|o| o.job(job_id).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InvocationCache;
    use crate::config::{AuthRef, JobType, ResponseFormat, RetryPolicy};
    use crate::http::HttpClient;
    use crate::session::SessionStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job(id: &str, job_type: JobType, deps: &[&str], mode: JobMode) -> crate::config::Job {
        crate::config::Job {
            id: id.to_string(),
            job_type,
            mode,
            method: Some(if job_type == JobType::Auth { "POST".into() } else { "GET".into() }),
            path: Some(format!("/{id}")),
            headers: None,
            params: None,
            payload: None,
            timeout: None,
            retry_policy: RetryPolicy::default(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            session_name: if job_type == JobType::Auth { Some("S".into()) } else { None },
            token_identifier: if job_type == JobType::Auth { Some("access_token".into()) } else { None },
            token_expiration_identifier: None,
            token_expiration_time: None,
            auth: if job_type == JobType::Request {
                Some(AuthRef { auth_type: "Bearer".into() })
            } else {
                None
            },
            response_format: ResponseFormat::default(),
            output: None,
        }
    }

    fn executor() -> JobExecutor {
        JobExecutor::new(
            HttpClient::new().unwrap(),
            SessionStore::new(),
            InvocationCache::new(),
            None,
        )
    }

    #[tokio::test]
    async fn login_then_fetch_chain_runs_in_dependency_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "T", "expires_in": 60
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fetch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": []})))
            .mount(&server)
            .await;

        let mut login = job("login", JobType::Auth, &[], JobMode::Production);
        login.path = Some("/login".to_string());
        let mut fetch = job("fetch", JobType::Request, &["login"], JobMode::Production);
        fetch.path = Some("/fetch".to_string());
        fetch.session_name = Some("S".to_string());

        let group = Group {
            name: "demo".to_string(),
            origins: vec![Origin {
                name: "api".to_string(),
                base_url: server.uri(),
                connection_string: None,
                jobs: vec![login, fetch],
            }],
        };

        let exec = executor();
        let options = ExecutionOptions::default();
        let cancel = CancellationToken::new();
        let outcome = run(&group, "fetch", None, &exec, &options, &cancel).await.unwrap();
        match outcome {
            RunOutcome::Completed { order } => assert_eq!(order, vec!["login".to_string(), "fetch".to_string()]),
            _ => panic!("expected Completed"),
        }
    }

    #[tokio::test]
    async fn cycle_detection_surfaces_as_a_dependency_cycle_error() {
        let a = job("a", JobType::Request, &["b"], JobMode::Production);
        let b = job("b", JobType::Request, &["a"], JobMode::Production);
        let group = Group {
            name: "demo".to_string(),
            origins: vec![Origin {
                name: "api".to_string(),
                base_url: "https://unused.test".to_string(),
                connection_string: None,
                jobs: vec![a, b],
            }],
        };
        let exec = executor();
        let options = ExecutionOptions::default();
        let cancel = CancellationToken::new();
        let err = run(&group, "a", None, &exec, &options, &cancel).await.unwrap_err();
        assert!(matches!(err, ApiloomError::DependencyCycle(_)));
    }

    #[tokio::test]
    async fn mode_filter_excludes_target_with_a_config_error() {
        let a = job("a", JobType::Request, &[], JobMode::Test);
        let group = Group {
            name: "demo".to_string(),
            origins: vec![Origin {
                name: "api".to_string(),
                base_url: "https://unused.test".to_string(),
                connection_string: None,
                jobs: vec![a],
            }],
        };
        let exec = executor();
        let options = ExecutionOptions::default();
        let cancel = CancellationToken::new();
        let err = run(&group, "a", Some(JobMode::Production), &exec, &options, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiloomError::ConfigError(_)));
    }

    #[tokio::test]
    async fn cancellation_before_the_first_job_yields_cancelled_with_no_progress() {
        let a = job("a", JobType::Request, &[], JobMode::Production);
        let group = Group {
            name: "demo".to_string(),
            origins: vec![Origin {
                name: "api".to_string(),
                base_url: "https://unused.test".to_string(),
                connection_string: None,
                jobs: vec![a],
            }],
        };
        let exec = executor();
        let options = ExecutionOptions::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = run(&group, "a", None, &exec, &options, &cancel).await.unwrap();
        match outcome {
            RunOutcome::Cancelled { completed } => assert!(completed.is_empty()),
            _ => panic!("expected Cancelled"),
        }
    }
}
