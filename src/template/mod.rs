//! Variable Substitutor.
//!
//! Four placeholder forms, applied left to right on every string value in
//! a job's config: `ENC:` decryption, then `$ENV_NAME`, then
//! `$SESSION_NAME`, then `{{jobId.field[i]}}`, then `$DATE`. Applied
//! deeply over nested JSON-shaped values — arrays and objects recurse,
//! non-string scalars pass through untouched. Uses a regex-driven
//! placeholder matcher in the same style as other SQL/templating engines
//! that recognize `{{ fn() }}`-style tokens, generalized here to four
//! distinct placeholder grammars instead of one.

pub mod crypto;

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::cache::InvocationCache;
use crate::session::SessionStore;

fn env_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$(ENV_[A-Z0-9_]+)").expect("valid regex"))
}

fn session_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$(SESSION_[A-Z0-9_]+)").expect("valid regex"))
}

fn template_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").expect("valid regex"))
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$DATE").expect("valid regex"))
}

fn segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)((?:\[\d+\])*)$").expect("valid regex"))
}

fn index_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("valid regex"))
}

/// Everything the Substitutor needs to resolve a placeholder. Borrowed for
/// the duration of one substitution pass; cheap to construct per job.
pub struct Substitutor<'a> {
    session: &'a SessionStore,
    cache: &'a InvocationCache,
    master_key: Option<&'a [u8]>,
}

impl<'a> Substitutor<'a> {
    pub fn new(session: &'a SessionStore, cache: &'a InvocationCache, master_key: Option<&'a [u8]>) -> Self {
        Self {
            session,
            cache,
            master_key,
        }
    }

    /// Substitutes placeholders into every string reachable from `value`,
    /// recursing through arrays and objects. Non-string scalars (numbers,
    /// bools, null) pass through unchanged.
    pub fn substitute_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.substitute_string(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.substitute_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.substitute_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Substitutes placeholders into a single string, in the fixed order
    /// decrypt → `$ENV_` → `$SESSION_` → `{{path}}` → `$DATE`.
    pub fn substitute_string(&self, input: &str) -> String {
        let decrypted = self.maybe_decrypt(input);
        let after_env = self.substitute_env(&decrypted);
        let after_session = self.substitute_session(&after_env);
        let after_template = self.substitute_templates(&after_session);
        self.substitute_date(&after_template)
    }

    fn maybe_decrypt(&self, input: &str) -> String {
        if !crypto::is_encrypted(input) {
            return input.to_string();
        }
        let Some(key) = self.master_key else {
            tracing::warn!("encountered ENC: value with no master key configured; leaving literal");
            return input.to_string();
        };
        match crypto::decrypt(input, key) {
            Ok(plain) => plain,
            Err(err) => {
                tracing::warn!(error = %err, "failed to decrypt ENC: value; leaving literal");
                input.to_string()
            }
        }
    }

    fn substitute_env(&self, input: &str) -> String {
        env_re()
            .replace_all(input, |caps: &regex::Captures| {
                let name = &caps[1];
                match std::env::var(name) {
                    Ok(value) => value,
                    Err(_) => {
                        tracing::warn!(variable = name, "environment variable not set");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    fn substitute_session(&self, input: &str) -> String {
        session_re()
            .replace_all(input, |caps: &regex::Captures| {
                let key = &caps[1];
                match self.session.get(key) {
                    Some(value) => value,
                    None => {
                        tracing::warn!(key, "session key not set");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    fn substitute_templates(&self, input: &str) -> String {
        template_re()
            .replace_all(input, |caps: &regex::Captures| {
                let path = caps[1].trim();
                match self.resolve_path(path) {
                    Some(value) => value_to_display(&value),
                    None => {
                        tracing::warn!(path, "invocation cache path could not be resolved");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    fn substitute_date(&self, input: &str) -> String {
        if !date_re().is_match(input) {
            return input.to_string();
        }
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        date_re().replace_all(input, today.as_str()).into_owned()
    }

    /// Navigates `jobId.field.sub[i].sub` against the invocation cache.
    /// The first dotted segment names the job; the rest navigate into
    /// that job's cached `data`.
    fn resolve_path(&self, path: &str) -> Option<Value> {
        let mut parts = path.splitn(2, '.');
        let job_id = parts.next()?;
        let entry = self.cache.get(job_id)?;
        match parts.next() {
            Some(rest) => get_path(entry.data()?, rest),
            None => entry.data().cloned(),
        }
    }
}

/// Navigates a dotted path (with optional `[n]` array indices per segment)
/// from `root`. Shared by the Substitutor's `{{jobId.path}}` form, the
/// Authenticator's `token_identifier`/`token_expiration_identifier`
/// lookups, and the database sink's `data_path`/`columns` extraction.
pub fn get_path(root: &Value, path: &str) -> Option<Value> {
    let mut current = root.clone();
    for segment in path.split('.') {
        current = navigate_segment(&current, segment)?;
    }
    Some(current)
}

/// Navigates one dotted segment, which may carry trailing `[n]` indices
/// (e.g. `items[0]`, or `items[0][1]` for nested arrays).
fn navigate_segment(value: &Value, segment: &str) -> Option<Value> {
    let caps = segment_re().captures(segment)?;
    let name = &caps[1];
    let indices = &caps[2];

    let mut current = value.get(name)?.clone();
    for idx_caps in index_re().captures_iter(indices) {
        let idx: usize = idx_caps[1].parse().ok()?;
        current = current.get(idx)?.clone();
    }
    Some(current)
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use serde_json::json;

    fn fixture() -> (SessionStore, InvocationCache) {
        let session = SessionStore::new();
        let cache = InvocationCache::new();
        (session, cache)
    }

    #[test]
    fn env_placeholder_is_replaced() {
        std::env::set_var("ENV_APITOKEN_TEST", "secret-token");
        let (session, cache) = fixture();
        let sub = Substitutor::new(&session, &cache, None);
        assert_eq!(
            sub.substitute_string("Bearer $ENV_APITOKEN_TEST"),
            "Bearer secret-token"
        );
        std::env::remove_var("ENV_APITOKEN_TEST");
    }

    #[test]
    fn missing_env_var_left_literal() {
        let (session, cache) = fixture();
        let sub = Substitutor::new(&session, &cache, None);
        assert_eq!(
            sub.substitute_string("$ENV_DEFINITELY_NOT_SET_XYZ"),
            "$ENV_DEFINITELY_NOT_SET_XYZ"
        );
    }

    #[test]
    fn session_placeholder_is_replaced() {
        let (session, cache) = fixture();
        session.set("SESSION_ORIGIN_TOKEN", "abc123", None);
        let sub = Substitutor::new(&session, &cache, None);
        assert_eq!(
            sub.substitute_string("Bearer $SESSION_ORIGIN_TOKEN"),
            "Bearer abc123"
        );
    }

    #[test]
    fn missing_session_key_left_literal() {
        let (session, cache) = fixture();
        let sub = Substitutor::new(&session, &cache, None);
        assert_eq!(
            sub.substitute_string("$SESSION_MISSING"),
            "$SESSION_MISSING"
        );
    }

    #[test]
    fn template_placeholder_navigates_into_cached_data() {
        let (session, cache) = fixture();
        cache.publish(
            "fetch_users",
            CacheEntry::Request {
                data: json!({"items": [{"id": 7, "name": "ada"}]}),
                headers: Default::default(),
                status: 200,
                timestamp: chrono::Utc::now(),
            },
        );
        let sub = Substitutor::new(&session, &cache, None);
        assert_eq!(
            sub.substitute_string("{{fetch_users.items[0].name}}"),
            "ada"
        );
    }

    #[test]
    fn unresolvable_template_path_left_literal() {
        let (session, cache) = fixture();
        let sub = Substitutor::new(&session, &cache, None);
        assert_eq!(
            sub.substitute_string("{{nonexistent.field}}"),
            "{{nonexistent.field}}"
        );
    }

    #[test]
    fn date_placeholder_is_replaced_with_iso_date() {
        let (session, cache) = fixture();
        let sub = Substitutor::new(&session, &cache, None);
        let result = sub.substitute_string("as-of $DATE");
        let re = Regex::new(r"^as-of \d{4}-\d{2}-\d{2}$").unwrap();
        assert!(re.is_match(&result), "got: {result}");
    }

    #[test]
    fn encrypted_value_is_decrypted_before_further_substitution() {
        let (session, cache) = fixture();
        let key = b"test-master-key";
        let enc = crypto::encrypt("$DATE-suffix", key).unwrap();
        let sub = Substitutor::new(&session, &cache, Some(key));
        let result = sub.substitute_string(&enc);
        assert!(result.ends_with("-suffix"));
        assert!(!result.starts_with("ENC:"));
    }

    #[test]
    fn order_is_decrypt_then_env_then_session_then_template_then_date() {
        let (session, cache) = fixture();
        session.set("SESSION_S", "sess-value", None);
        std::env::set_var("ENV_ORDER_TEST", "env-value");
        cache.publish(
            "job1",
            CacheEntry::Request {
                data: json!({"field": "tmpl-value"}),
                headers: Default::default(),
                status: 200,
                timestamp: chrono::Utc::now(),
            },
        );
        let sub = Substitutor::new(&session, &cache, None);
        let result = sub.substitute_string("$ENV_ORDER_TEST|$SESSION_S|{{job1.field}}|$DATE");
        assert!(result.starts_with("env-value|sess-value|tmpl-value|"));
        std::env::remove_var("ENV_ORDER_TEST");
    }

    #[test]
    fn deep_substitution_recurses_into_arrays_and_objects() {
        let (session, cache) = fixture();
        session.set("SESSION_NESTED", "nested-value", None);
        let sub = Substitutor::new(&session, &cache, None);
        let input = json!({
            "headers": {"Authorization": "Bearer $SESSION_NESTED"},
            "items": ["$SESSION_NESTED", 42, null],
        });
        let out = sub.substitute_value(&input);
        assert_eq!(out["headers"]["Authorization"], "Bearer nested-value");
        assert_eq!(out["items"][0], "nested-value");
        assert_eq!(out["items"][1], 42);
        assert_eq!(out["items"][2], Value::Null);
    }

    #[test]
    fn non_string_scalars_pass_through_untouched() {
        let (session, cache) = fixture();
        let sub = Substitutor::new(&session, &cache, None);
        assert_eq!(sub.substitute_value(&json!(42)), json!(42));
        assert_eq!(sub.substitute_value(&json!(true)), json!(true));
        assert_eq!(sub.substitute_value(&Value::Null), Value::Null);
    }
}
