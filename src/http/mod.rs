//! HTTP Client.
//!
//! A single-request primitive: one logical call, races a timeout against
//! the in-flight request, retries a fixed number of times with a fixed
//! delay (never exponential backoff), and parses the response body by
//! `Content-Type`. Built directly on `reqwest::Client` rather than the
//! `reqwest-middleware`/`reqwest-retry` stack: that crate pair's built-in
//! policy is exponential backoff, and the fixed-delay loop it would
//! otherwise save us is a dozen lines.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Method, Url};
use serde_json::Value;

use crate::errors::{ApiloomError, Result};

#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout_ms: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl RequestSpec {
    pub fn get(url: Url) -> Self {
        RequestSpec {
            method: Method::GET,
            url,
            headers: Vec::new(),
            body: None,
            timeout_ms: 30_000,
            retries: 0,
            retry_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ResponseData {
    Json(Value),
    Text(String),
    Raw(Vec<u8>),
}

impl ResponseData {
    pub fn as_json(&self) -> Value {
        match self {
            ResponseData::Json(v) => v.clone(),
            ResponseData::Text(s) => Value::String(s.clone()),
            ResponseData::Raw(bytes) => Value::String(base64_preview(bytes)),
        }
    }
}

fn base64_preview(bytes: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    BASE64.encode(bytes)
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub data: ResponseData,
    pub url: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(|s| s.as_str())
    }
}

/// Joins a base URL and a path, then appends `params` (if an object) as a
/// query string. Shared by the Authenticator and the Job Executor's
/// `REQUEST` state.
pub fn build_url(base_url: &str, path: &str, params: Option<&Value>) -> Result<Url> {
    let base = base_url.trim_end_matches('/');
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let mut url = Url::parse(&format!("{base}{path}"))?;
    if let Some(Value::Object(map)) = params {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in map {
            pairs.append_pair(key, &scalar_to_string(value));
        }
    }
    Ok(url)
}

/// Flattens a substituted JSON object into a header list; non-object
/// inputs (including `Value::Null`, the "no headers configured" case)
/// yield no headers.
pub fn value_to_headers(value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), scalar_to_string(v)))
            .collect(),
        _ => Vec::new(),
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(HttpClient { client })
    }

    /// Issues `spec`, retrying up to `spec.retries` additional times
    /// (`retries + 1` attempts total) with a fixed delay between
    /// attempts. Retries on transport errors, on HTTP 408, and on 5xx;
    /// never on any other 4xx.
    pub async fn request(&self, spec: &RequestSpec) -> Result<HttpResponse> {
        let attempts = spec.retries + 1;
        let delay = Duration::from_millis(spec.retry_delay_ms);

        for attempt in 0..attempts {
            let is_last = attempt + 1 == attempts;
            match self.attempt(spec).await {
                Ok(response) => {
                    if response.is_success() {
                        return Ok(response);
                    }
                    let retryable =
                        response.status == 408 || (500..600).contains(&response.status);
                    if retryable && !is_last {
                        tracing::warn!(
                            status = response.status,
                            attempt,
                            "non-2xx response, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(ApiloomError::HttpTransport(format!(
                        "HTTP {} {}",
                        response.status, response.status_text
                    )));
                }
                Err(err) => {
                    if !is_last {
                        tracing::warn!(error = %err, attempt, "transport error, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
        unreachable!("loop always returns on its final iteration");
    }

    async fn attempt(&self, spec: &RequestSpec) -> Result<HttpResponse> {
        let mut builder = self.client.request(spec.method.clone(), spec.url.clone());

        let mut has_content_type = false;
        for (name, value) in &spec.headers {
            if name.eq_ignore_ascii_case("content-type") {
                has_content_type = true;
            }
            builder = builder.header(name, value);
        }

        let carries_body = !matches!(spec.method, Method::GET | Method::HEAD);
        if carries_body {
            if let Some(body) = &spec.body {
                builder = match body {
                    Value::String(s) => builder.body(s.clone()),
                    other => {
                        if !has_content_type {
                            builder = builder.header("content-type", "application/json");
                        }
                        builder.body(serde_json::to_vec(other)?)
                    }
                };
            }
        }

        let request = builder.build()?;
        let timeout = Duration::from_millis(spec.timeout_ms);

        let response = tokio::select! {
            result = self.client.execute(request) => result?,
            _ = tokio::time::sleep(timeout) => {
                return Err(ApiloomError::HttpTransport(format!(
                    "request to {} timed out after {}ms", spec.url, spec.timeout_ms
                )));
            }
        };

        let status = response.status().as_u16();
        let status_text = response
            .status()
            .canonical_reason()
            .unwrap_or("")
            .to_string();
        let url = response.url().to_string();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_lowercase(), v.to_str().unwrap_or("").to_string()))
            .collect();

        let content_type = headers.get("content-type").cloned().unwrap_or_default();
        let bytes = response.bytes().await?;

        let data = if content_type.starts_with("application/json") {
            let parsed: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            ResponseData::Json(parsed)
        } else if content_type.starts_with("text/") {
            ResponseData::Text(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            ResponseData::Raw(bytes.to_vec())
        };

        Ok(HttpResponse {
            status,
            status_text,
            headers,
            data,
            url,
        })
    }
}
