//! Authenticator.
//!
//! Runs an `auth` job's login request, extracts a token and its expiry
//! from the response body by dotted path, and stores the token in the
//! Session Store. `refresh_authentication` is the idempotent entry point
//! jobs actually call: it no-ops when a live token already exists.

use std::str::FromStr;

use serde_json::Value;

use crate::config::{Job, Origin};
use crate::errors::{ApiloomError, Result};
use crate::http::{build_url, value_to_headers, HttpClient, RequestSpec};
use crate::session::SessionStore;
use crate::template::{get_path, Substitutor};

const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct AuthResult {
    pub session_name: String,
    pub ttl_secs: u64,
}

pub struct Authenticator<'a> {
    http: &'a HttpClient,
    session: &'a SessionStore,
}

impl<'a> Authenticator<'a> {
    pub fn new(http: &'a HttpClient, session: &'a SessionStore) -> Self {
        Authenticator { http, session }
    }

    /// Default session name when an auth job doesn't declare one.
    pub fn default_session_name(origin: &Origin) -> String {
        format!("SESSION_{}_TOKEN", origin.name.to_uppercase())
    }

    /// Issues the login request, extracts the token/expiry, and stores
    /// the token. Always re-authenticates, even if a live token exists —
    /// callers that want the idempotent behavior should call
    /// [`refresh_authentication`](Self::refresh_authentication) instead.
    pub async fn authenticate(
        &self,
        origin: &Origin,
        auth_job: &Job,
        substitutor: &Substitutor<'_>,
    ) -> Result<AuthResult> {
        let headers_value = auth_job
            .headers
            .as_ref()
            .map(|h| substitutor.substitute_value(h))
            .unwrap_or(Value::Null);
        let payload_value = auth_job
            .payload
            .as_ref()
            .map(|p| substitutor.substitute_value(p));
        let params_value = auth_job.params.as_ref().map(|p| substitutor.substitute_value(p));

        let method = reqwest::Method::from_str(auth_job.method.as_deref().unwrap_or("POST"))
            .map_err(|_| {
                ApiloomError::ConfigError(format!(
                    "auth job '{}' has an invalid HTTP method",
                    auth_job.id
                ))
            })?;
        let raw_path = auth_job.path.clone().unwrap_or_default();
        let path = substitutor.substitute_string(&raw_path);
        let url = build_url(&origin.base_url, &path, params_value.as_ref())?;

        let spec = RequestSpec {
            method,
            url,
            headers: value_to_headers(&headers_value),
            body: payload_value,
            timeout_ms: auth_job.timeout.unwrap_or(30_000),
            retries: auth_job.retry_policy.max_attempts,
            retry_delay_ms: auth_job.retry_policy.delay_ms,
        };

        let response = self.http.request(&spec).await?;
        let body = response.data.as_json();

        let token_identifier = auth_job.token_identifier.as_deref().ok_or_else(|| {
            ApiloomError::AuthFailed(format!(
                "auth job '{}' has no token_identifier configured",
                auth_job.id
            ))
        })?;
        let token = get_path(&body, token_identifier)
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| {
                ApiloomError::AuthFailed(format!(
                    "token_identifier '{token_identifier}' did not resolve to a string in auth job '{}'",
                    auth_job.id
                ))
            })?;

        let ttl_secs = auth_job
            .token_expiration_identifier
            .as_deref()
            .and_then(|path| get_path(&body, path))
            .and_then(value_as_u64)
            .or(auth_job.token_expiration_time)
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS);

        let session_name = auth_job
            .session_name
            .clone()
            .unwrap_or_else(|| Self::default_session_name(origin));

        self.session.set(session_name.clone(), token, Some(ttl_secs));

        Ok(AuthResult {
            session_name,
            ttl_secs,
        })
    }

    /// No-ops if a live (unexpired) token already exists under the auth
    /// job's session name; otherwise authenticates.
    pub async fn refresh_authentication(
        &self,
        origin: &Origin,
        auth_job: &Job,
        substitutor: &Substitutor<'_>,
    ) -> Result<AuthResult> {
        let session_name = auth_job
            .session_name
            .clone()
            .unwrap_or_else(|| Self::default_session_name(origin));
        if self.session.has(&session_name) {
            return Ok(AuthResult {
                session_name,
                ttl_secs: 0,
            });
        }
        self.authenticate(origin, auth_job, substitutor).await
    }

    /// Forces a fresh login regardless of any existing token, then
    /// replaces the stored value. Used by the executor's 401 replay path.
    pub async fn force_refresh(
        &self,
        origin: &Origin,
        auth_job: &Job,
        substitutor: &Substitutor<'_>,
    ) -> Result<AuthResult> {
        let session_name = auth_job
            .session_name
            .clone()
            .unwrap_or_else(|| Self::default_session_name(origin));
        self.session.delete(&session_name);
        self.authenticate(origin, auth_job, substitutor).await
    }

    pub fn get_token(&self, session_name: &str) -> Option<String> {
        self.session.get(session_name)
    }

    pub fn logout(&self, session_name: &str) {
        self.session.delete(session_name);
    }
}

fn value_as_u64(value: Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
