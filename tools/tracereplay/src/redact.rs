//! Best-effort secret scrubbing applied to step payloads before they are stored.

use crate::types::Payload;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::OnceLock;

pub const REDACTED: &str = "***REDACTED***";

pub const DEFAULT_SECRET_KEYS: &[&str] = &[
    "api_key",
    "apikey",
    "token",
    "secret",
    "password",
    "authorization",
];

/// Filter applied to `input`, `output` and `error` payloads. Must not fail:
/// anything it does not understand is returned unchanged.
pub trait Redactor: Send + Sync {
    fn redact(&self, payload: Payload) -> Payload;
}

/// Replaces values under well-known secret keys and scrubs bearer tokens
/// out of string values, at any nesting depth.
#[derive(Debug, Clone)]
pub struct SecretKeyRedactor {
    keys: BTreeSet<String>,
}

impl SecretKeyRedactor {
    pub fn new<I, S>(extra_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys = DEFAULT_SECRET_KEYS
            .iter()
            .map(|key| key.to_string())
            .collect::<BTreeSet<_>>();
        keys.extend(extra_keys.into_iter().map(|key| key.as_ref().to_lowercase()));
        Self { keys }
    }

    fn is_secret_key(&self, key: &str) -> bool {
        self.keys.contains(&key.to_lowercase())
    }

    fn redact_value(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.redact(map)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|item| self.redact_value(item)).collect())
            }
            Value::String(text) => Value::String(redact_bearer_tokens(&text)),
            other => other,
        }
    }
}

impl Default for SecretKeyRedactor {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

impl Redactor for SecretKeyRedactor {
    fn redact(&self, payload: Payload) -> Payload {
        payload
            .into_iter()
            .map(|(key, value)| {
                if self.is_secret_key(&key) {
                    (key, Value::String(REDACTED.to_string()))
                } else {
                    let value = self.redact_value(value);
                    (key, value)
                }
            })
            .collect()
    }
}

const BEARER_PATTERN: &str = r"Bearer\s+[A-Za-z0-9\-\._~\+/]+=*";

fn bearer_regex() -> Option<&'static Regex> {
    static BEARER: OnceLock<Option<Regex>> = OnceLock::new();
    BEARER.get_or_init(|| Regex::new(BEARER_PATTERN).ok()).as_ref()
}

/// `Bearer <token>` becomes `Bearer ***REDACTED***`; the scheme match is case-sensitive.
pub fn redact_bearer_tokens(text: &str) -> String {
    match bearer_regex() {
        Some(re) => re
            .replace_all(text, format!("Bearer {REDACTED}").as_str())
            .into_owned(),
        None => text.to_string(),
    }
}
