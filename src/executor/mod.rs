//! Job Executor.
//!
//! `execute_job` runs one job through `PREPARE → AUTH_CHECK → REQUEST →
//! MAYBE_REAUTH → SINK → DONE`. Auth jobs stop after `AUTH_CHECK` (they
//! have no request or sink of their own); request jobs build a URL,
//! inject a bearer token when `session_name` is set, retry once on a 401
//! after a forced re-authentication, dispatch to the configured sink
//! (warning rather than failing on sink errors), and publish their result
//! to the invocation cache and the Session Store.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashSet;
use serde_json::Value;

use crate::auth::Authenticator;
use crate::cache::{CacheEntry, InvocationCache};
use crate::config::{Job, JobType, Origin};
use crate::errors::{ApiloomError, Result};
use crate::http::{build_url, value_to_headers, HttpClient, RequestSpec};
use crate::session::SessionStore;
use crate::sink;
use crate::template::Substitutor;

const JOB_RESULT_TTL_SECS: u64 = 3600;

/// External payload/params file overrides (`--payload-file`/`--params-file`).
/// These replace the corresponding job field wholesale, before
/// substitution runs.
#[derive(Default)]
pub struct ExecutionOptions<'a> {
    pub payload_override: Option<&'a Value>,
    pub params_override: Option<&'a Value>,
}

pub struct JobExecutor {
    http: HttpClient,
    session: SessionStore,
    cache: InvocationCache,
    master_key: Option<Vec<u8>>,
    running: Arc<DashSet<String>>,
}

impl JobExecutor {
    pub fn new(
        http: HttpClient,
        session: SessionStore,
        cache: InvocationCache,
        master_key: Option<Vec<u8>>,
    ) -> Self {
        JobExecutor {
            http,
            session,
            cache,
            master_key,
            running: Arc::new(DashSet::new()),
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn cache(&self) -> &InvocationCache {
        &self.cache
    }

    /// Runs one job to completion. `all_origins` is the full origin list,
    /// consulted when a request job's auth lookup doesn't find a match in
    /// its own origin.
    pub async fn execute_job(
        &self,
        origin: &Origin,
        job: &Job,
        all_origins: &[Origin],
        options: &ExecutionOptions<'_>,
    ) -> Result<CacheEntry> {
        let running_key = format!("{}_{}", origin.name, job.id);
        if !self.running.insert(running_key.clone()) {
            return Err(ApiloomError::ReentrantExecution {
                job_id: job.id.clone(),
            });
        }
        let _guard = RunningGuard {
            running: &self.running,
            key: running_key,
        };

        let substitutor = Substitutor::new(&self.session, &self.cache, self.master_key.as_deref());
        let authenticator = Authenticator::new(&self.http, &self.session);

        // PREPARE
        let raw_payload = options.payload_override.cloned().or_else(|| job.payload.clone());
        let raw_params = options.params_override.cloned().or_else(|| job.params.clone());
        let payload = raw_payload.map(|v| substitutor.substitute_value(&v));
        let params = raw_params.map(|v| substitutor.substitute_value(&v));
        let headers = job
            .headers
            .as_ref()
            .map(|h| substitutor.substitute_value(h))
            .unwrap_or(Value::Null);

        // AUTH_CHECK
        if job.job_type == JobType::Auth {
            authenticator.authenticate(origin, job, &substitutor).await?;
            let entry = CacheEntry::Auth {
                authenticated: true,
                timestamp: Utc::now(),
            };
            self.finish(job, entry.clone());
            return Ok(entry);
        }

        if let Some(session_name) = &job.session_name {
            if let Some((auth_origin, auth_job)) = find_auth_job(origin, all_origins, session_name) {
                authenticator
                    .refresh_authentication(auth_origin, auth_job, &substitutor)
                    .await?;
            }
        }

        // REQUEST
        let method = reqwest::Method::from_str(job.method.as_deref().unwrap_or("GET")).map_err(|_| {
            ApiloomError::ConfigError(format!("job '{}' has an invalid HTTP method", job.id))
        })?;
        let raw_path = job.path.clone().unwrap_or_default();
        let path = substitutor.substitute_string(&raw_path);
        let url = build_url(&origin.base_url, &path, params.as_ref())?;

        let mut request_headers = value_to_headers(&headers);
        let auth_type = job
            .auth
            .as_ref()
            .map(|a| a.auth_type.clone())
            .unwrap_or_else(|| "Bearer".to_string());
        let token = job.session_name.as_deref().and_then(|name| self.session.get(name));
        let has_authorization_header = request_headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("authorization"));
        if let (Some(token), false) = (&token, has_authorization_header) {
            request_headers.push(("Authorization".to_string(), format!("{auth_type} {token}")));
        }

        let mut spec = RequestSpec {
            method,
            url,
            headers: request_headers,
            body: payload.clone(),
            timeout_ms: job.timeout.unwrap_or(30_000),
            retries: job.retry_policy.max_attempts,
            retry_delay_ms: job.retry_policy.delay_ms,
        };

        // MAYBE_REAUTH: at most one forced re-authentication + replay.
        let mut reauthenticated = false;
        let response = loop {
            match self.http.request(&spec).await {
                Ok(response) => break response,
                Err(ApiloomError::HttpTransport(msg)) if msg.contains("401") && !reauthenticated => {
                    reauthenticated = true;
                    let Some(session_name) = &job.session_name else {
                        return Err(ApiloomError::HttpTransport(msg));
                    };
                    let Some((auth_origin, auth_job)) = find_auth_job(origin, all_origins, session_name)
                    else {
                        return Err(ApiloomError::HttpTransport(msg));
                    };
                    authenticator
                        .force_refresh(auth_origin, auth_job, &substitutor)
                        .await?;
                    let refreshed_token = self.session.get(session_name);
                    if let Some(token) = refreshed_token {
                        spec.headers
                            .retain(|(name, _)| !name.eq_ignore_ascii_case("authorization"));
                        spec.headers
                            .push(("Authorization".to_string(), format!("{auth_type} {token}")));
                    }
                }
                Err(err) => return Err(err),
            }
        };

        // SINK
        if let Some(output) = &job.output {
            if output.enabled {
                let body = response.data.as_json();
                let dispatch_result = sink::dispatch(
                    &body,
                    response.content_type(),
                    &job.id,
                    &origin.name,
                    origin.connection_string.as_deref(),
                    output,
                    &substitutor,
                )
                .await;
                if let Err(err) = dispatch_result {
                    tracing::warn!(error = %err, job_id = %job.id, "sink failed; job still reported successful");
                }
            }
        }

        // DONE
        let entry = CacheEntry::Request {
            data: response.data.as_json(),
            headers: response.headers.clone(),
            status: response.status,
            timestamp: Utc::now(),
        };
        self.finish(job, entry.clone());
        Ok(entry)
    }

    /// Publishes the job's result to the invocation cache and mirrors it
    /// into the Session Store under `job_result_<id>` with a 1-hour TTL.
    fn finish(&self, job: &Job, entry: CacheEntry) {
        let mirrored = cache_entry_to_json(&entry);
        if let Ok(serialized) = serde_json::to_string(&mirrored) {
            self.session
                .set(format!("job_result_{}", job.id), serialized, Some(JOB_RESULT_TTL_SECS));
        }
        self.cache.publish(job.id.clone(), entry);
    }
}

struct RunningGuard<'a> {
    running: &'a DashSet<String>,
    key: String,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.remove(&self.key);
    }
}

fn cache_entry_to_json(entry: &CacheEntry) -> Value {
    match entry {
        CacheEntry::Auth { authenticated, timestamp } => serde_json::json!({
            "authenticated": authenticated,
            "timestamp": timestamp.to_rfc3339(),
        }),
        CacheEntry::Request { data, headers, status, timestamp } => serde_json::json!({
            "data": data,
            "headers": headers,
            "status": status,
            "timestamp": timestamp.to_rfc3339(),
        }),
    }
}

fn resolved_session_name(job: &Job, origin: &Origin) -> String {
    job.session_name
        .clone()
        .unwrap_or_else(|| Authenticator::default_session_name(origin))
}

/// Finds the auth job publishing `session_name`'s token: the current
/// origin first, then the full origin set.
fn find_auth_job<'o>(
    origin: &'o Origin,
    all_origins: &'o [Origin],
    session_name: &str,
) -> Option<(&'o Origin, &'o Job)> {
    let in_current = origin
        .jobs
        .iter()
        .find(|j| j.job_type == JobType::Auth && resolved_session_name(j, origin) == session_name);
    if let Some(job) = in_current {
        return Some((origin, job));
    }
    for candidate_origin in all_origins {
        if let Some(job) = candidate_origin
            .jobs
            .iter()
            .find(|j| j.job_type == JobType::Auth && resolved_session_name(j, candidate_origin) == session_name)
        {
            return Some((candidate_origin, job));
        }
    }
    None
}
