//! # Token Expansion
//!
//! Substitutes `{%key%}` placeholders in rule consequence templates.
//!
//! A token resolves through three sources, in order: the special-key table
//! (`~` prefix), a cross-module shared-state reference
//! (`~state.<module>/<key>`), or the triggering event's flattened payload.
//! Unresolvable tokens substitute the empty string — the literal token is
//! never left in place and expansion never fails. The `urlenc(...)`
//! wrapper applies URL-encoding after resolution.

use chrono::{Local, TimeZone, Utc};
use rand::Rng;
use regex::{Captures, Regex};
use serde_json::Value;
use tracing::trace;

use trellis_types::{flatten, get_flattened, Event};

use crate::StateProvider;

/// Expands tokens against one triggering event.
pub struct TokenExpander<'a> {
    event: &'a Event,
    state: &'a dyn StateProvider,
    sdk_version: &'a str,
    pattern: Regex,
}

impl<'a> TokenExpander<'a> {
    /// Create an expander for the given triggering event.
    #[must_use]
    pub fn new(event: &'a Event, state: &'a dyn StateProvider, sdk_version: &'a str) -> Self {
        // Either {%urlenc(key)%} or {%key%}.
        let pattern = Regex::new(r"\{%(?:urlenc\(([^%()]+)\)|([^%]+?))%\}")
            .unwrap_or_else(|_| unreachable!("token pattern is a valid literal regex"));
        Self {
            event,
            state,
            sdk_version,
            pattern,
        }
    }

    /// Expand every token in a string.
    #[must_use]
    pub fn expand_str(&self, input: &str) -> String {
        self.pattern
            .replace_all(input, |caps: &Captures<'_>| {
                if let Some(key) = caps.get(1) {
                    let resolved = self.resolve_text(key.as_str());
                    urlencoding::encode(&resolved).into_owned()
                } else if let Some(key) = caps.get(2) {
                    self.resolve_text(key.as_str())
                } else {
                    String::new()
                }
            })
            .into_owned()
    }

    /// Recursively expand tokens in a template value.
    ///
    /// Strings are expanded in place; maps and lists walk their children;
    /// non-string leaves pass through unchanged.
    #[must_use]
    pub fn expand(&self, template: &Value) -> Value {
        match template {
            Value::String(s) => Value::String(self.expand_str(s)),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.expand(v)))
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.expand(v)).collect()),
            other => other.clone(),
        }
    }

    /// Resolve a token key to a value.
    #[must_use]
    pub fn resolve_key(&self, key: &str) -> Option<Value> {
        if let Some(reference) = key.strip_prefix("~state.") {
            let (module, state_key) = reference.split_once('/')?;
            return self
                .state
                .shared_state_value(module, state_key, self.event.number());
        }
        if key.starts_with('~') {
            return self.resolve_special(key);
        }
        get_flattened(self.event.data(), key)
    }

    fn resolve_text(&self, key: &str) -> String {
        match self.resolve_key(key.trim()) {
            Some(value) => value_text(&value),
            None => {
                trace!(token = key, "[TokenParser] Unresolvable token replaced with empty string");
                String::new()
            }
        }
    }

    fn resolve_special(&self, key: &str) -> Option<Value> {
        let ts_ms = self.event.timestamp_ms();
        match key {
            "~type" => Some(Value::String(self.event.event_type().as_str().to_string())),
            "~source" => Some(Value::String(self.event.source().as_str().to_string())),
            "~timestampu" => Some(Value::from(ts_ms / 1000)),
            "~timestampz" => Utc
                .timestamp_millis_opt(ts_ms)
                .single()
                .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())),
            "~timestampp" => Local
                .timestamp_millis_opt(ts_ms)
                .single()
                .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S%z").to_string())),
            "~sdkver" => Some(Value::String(self.sdk_version.to_string())),
            "~cachebust" => {
                let bust = rand::thread_rng().gen_range(1..=100_000_000u64);
                Some(Value::String(bust.to_string()))
            }
            "~all_url" => Some(Value::String(self.payload_as_query())),
            "~all_json" => Some(Value::String(self.event.data().to_string())),
            _ => None,
        }
    }

    fn payload_as_query(&self) -> String {
        flatten(self.event.data())
            .iter()
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(key),
                    urlencoding::encode(&value_text(value))
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Render a payload value as substitution text. Null renders empty.
#[must_use]
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
