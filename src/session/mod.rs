//! Process-wide session store.
//!
//! A key→value map with per-entry TTL and lazy expiration, shared by the
//! Authenticator (writes tokens) and the Substitutor/Executor (reads them).
//! Staleness is `Instant`-based and re-checked on every read. Backed by
//! `DashMap` instead of a single `RwLock<HashMap>` so concurrent reads
//! from independent keys never contend.

use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    created_at: Instant,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(t) => Instant::now() >= t,
            None => false,
        }
    }
}

/// Process-wide key→value store with optional per-entry TTL.
///
/// Not safe for cross-process sharing — this is a within-process cache,
/// one instance per running orchestrator.
#[derive(Debug, Default, Clone)]
pub struct SessionStore {
    entries: std::sync::Arc<DashMap<String, Entry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`. `ttl_seconds = None` means the entry
    /// never expires.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>, ttl_seconds: Option<u64>) {
        let now = Instant::now();
        let expires_at = ttl_seconds.map(|secs| now + Duration::from_secs(secs));
        self.entries.insert(
            key.into(),
            Entry {
                value: value.into(),
                created_at: now,
                expires_at,
            },
        );
    }

    /// Returns the stored value, or `None` if absent or past expiry.
    /// Expired entries are evicted as a side effect of the read.
    pub fn get(&self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.value.clone())
    }

    /// Like [`get`](Self::get) but also returns the entry's creation time,
    /// useful for diagnostics.
    pub fn get_with_created_at(&self, key: &str) -> Option<(String, Instant)> {
        self.get(key)?;
        self.entries.get(key).map(|e| (e.value.clone(), e.created_at))
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Extends the TTL of an existing entry without changing its value.
    /// No-op if the key is absent or already expired.
    pub fn renew(&self, key: &str, ttl_seconds: u64) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired() {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_seconds));
            }
        }
    }

    /// Lists keys of all non-expired entries. Does not evict as a side
    /// effect (listing is read-only); use `sweep` for that.
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !e.is_expired())
            .map(|e| e.key().clone())
            .collect()
    }

    /// Evicts every expired entry. Called by the background sweep and by
    /// tests; ordinary reads already self-evict so this is advisory.
    pub fn sweep(&self) {
        self.entries.retain(|_, entry| !entry.is_expired());
    }

    /// Spawns a detached background task that sweeps expired entries every
    /// 60 seconds. The returned handle may be aborted by the caller on
    /// shutdown; dropping it leaves the sweep running.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                store.sweep();
            }
        })
    }
}
