//! Invocation cache.
//!
//! Per-run, per-job record of what a job produced, keyed by job id. The
//! Substitutor reads into this via `{{jobId.field...}}` placeholders; the
//! Executor publishes one entry per completed job. Unlike the Session
//! Store this cache is scoped to a single orchestrator run and carries no
//! TTL — it is cleared by simply dropping the `InvocationCache` at the end
//! of the run.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;

/// What a completed job leaves behind for later jobs to reference.
#[derive(Debug, Clone)]
pub enum CacheEntry {
    /// An auth job's outcome. Carries no `data` — auth jobs are referenced
    /// by session key, not by `{{jobId...}}` path, but the entry still
    /// needs to exist so dependents can confirm the auth job ran.
    Auth {
        authenticated: bool,
        timestamp: DateTime<Utc>,
    },
    /// A request job's parsed response.
    Request {
        data: Value,
        headers: HashMap<String, String>,
        status: u16,
        timestamp: DateTime<Utc>,
    },
}

impl CacheEntry {
    /// The `data` field navigated by `{{jobId.field...}}` placeholders.
    /// `None` for auth entries — they have nothing to navigate into.
    pub fn data(&self) -> Option<&Value> {
        match self {
            CacheEntry::Request { data, .. } => Some(data),
            CacheEntry::Auth { .. } => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CacheEntry::Auth { timestamp, .. } => *timestamp,
            CacheEntry::Request { timestamp, .. } => *timestamp,
        }
    }
}

/// Shared, cloneable handle to the per-run invocation cache.
#[derive(Debug, Default, Clone)]
pub struct InvocationCache {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl InvocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, job_id: impl Into<String>, entry: CacheEntry) {
        self.entries.insert(job_id.into(), entry);
    }

    pub fn get(&self, job_id: &str) -> Option<CacheEntry> {
        self.entries.get(job_id).map(|e| e.clone())
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.entries.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_and_get_request_entry() {
        let cache = InvocationCache::new();
        cache.publish(
            "fetch_users",
            CacheEntry::Request {
                data: serde_json::json!({"items": [{"id": 1}]}),
                headers: HashMap::new(),
                status: 200,
                timestamp: Utc::now(),
            },
        );
        let entry = cache.get("fetch_users").expect("entry present");
        assert_eq!(entry.data().unwrap()["items"][0]["id"], 1);
    }

    #[test]
    fn auth_entry_has_no_data() {
        let cache = InvocationCache::new();
        cache.publish(
            "login",
            CacheEntry::Auth {
                authenticated: true,
                timestamp: Utc::now(),
            },
        );
        let entry = cache.get("login").unwrap();
        assert!(entry.data().is_none());
    }

    #[test]
    fn missing_entry_is_none() {
        let cache = InvocationCache::new();
        assert!(cache.get("nope").is_none());
        assert!(!cache.contains("nope"));
    }
}
