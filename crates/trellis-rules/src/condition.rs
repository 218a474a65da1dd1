//! # Rule Conditions
//!
//! The condition expression tree evaluated against a triggering event.
//!
//! Leaf matchers compare an extracted key's value against a constant set;
//! groups combine children with And/Or; historical conditions query the
//! event-history collaborator (wired in the engine, since they require a
//! bounded asynchronous wait).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use trellis_types::hash_kv;

/// Boolean combinator for condition groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionLogic {
    /// Every child must hold.
    And,
    /// At least one child must hold.
    Or,
}

/// How a leaf matcher compares the extracted value against its candidates.
///
/// Numeric comparisons parse leniently: a numeric string on either side
/// participates. String comparisons require both sides to render as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatcherKind {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Exists,
    NotExists,
}

impl MatcherKind {
    /// Evaluate the matcher against an extracted value.
    ///
    /// `actual` is `None` when the key did not resolve. A matcher holds if
    /// any candidate value satisfies it.
    #[must_use]
    pub fn matches(self, actual: Option<&Value>, values: &[Value]) -> bool {
        match self {
            Self::Exists => actual.is_some(),
            Self::NotExists => actual.is_none(),
            Self::Equals => Self::any(actual, values, value_eq),
            Self::NotEquals => !Self::any(actual, values, value_eq),
            Self::GreaterThan => Self::any_numeric(actual, values, |a, b| a > b),
            Self::GreaterThanOrEqual => Self::any_numeric(actual, values, |a, b| a >= b),
            Self::LessThan => Self::any_numeric(actual, values, |a, b| a < b),
            Self::LessThanOrEqual => Self::any_numeric(actual, values, |a, b| a <= b),
            Self::Contains => Self::any_text(actual, values, |a, b| a.contains(b)),
            Self::NotContains => !Self::any_text(actual, values, |a, b| a.contains(b)),
            Self::StartsWith => Self::any_text(actual, values, |a, b| a.starts_with(b)),
            Self::EndsWith => Self::any_text(actual, values, |a, b| a.ends_with(b)),
        }
    }

    fn any(actual: Option<&Value>, values: &[Value], pred: fn(&Value, &Value) -> bool) -> bool {
        let Some(actual) = actual else {
            return false;
        };
        values.iter().any(|candidate| pred(actual, candidate))
    }

    fn any_numeric(actual: Option<&Value>, values: &[Value], pred: fn(f64, f64) -> bool) -> bool {
        let Some(a) = actual.and_then(as_number) else {
            return false;
        };
        values
            .iter()
            .filter_map(as_number)
            .any(|candidate| pred(a, candidate))
    }

    fn any_text(actual: Option<&Value>, values: &[Value], pred: fn(&str, &str) -> bool) -> bool {
        let Some(a) = actual.and_then(as_text) else {
            return false;
        };
        values
            .iter()
            .filter_map(as_text)
            .any(|candidate| pred(&a, &candidate))
    }
}

/// Whether a historical condition counts any occurrence or requires an
/// ordered sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchType {
    /// Sum of match counts across all requests.
    Any,
    /// All requests occurred, each bounded below by the prior request's
    /// oldest match.
    Ordered,
}

/// One lookup of a historical condition.
///
/// `keys` describes the recorded event: the same flattened key→value pairs
/// that produced the history hash when the event was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalRequest {
    /// Flattened key→value pairs identifying the event.
    pub keys: BTreeMap<String, Value>,
    /// Inclusive lower bound, epoch milliseconds. 0 means unbounded.
    pub from_ts: i64,
    /// Inclusive upper bound, epoch milliseconds. 0 means "now".
    pub to_ts: i64,
}

impl HistoricalRequest {
    /// Create a request over the full retained range.
    #[must_use]
    pub fn new(keys: BTreeMap<String, Value>) -> Self {
        Self {
            keys,
            from_ts: 0,
            to_ts: 0,
        }
    }

    /// The history hash these keys resolve to.
    #[must_use]
    pub fn mask_hash(&self) -> u64 {
        hash_kv(&self.keys)
    }
}

/// A composable condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// Boolean combination of child conditions.
    Group {
        logic: ConditionLogic,
        conditions: Vec<Condition>,
    },
    /// Leaf matcher over an extracted key.
    ///
    /// The key resolves like a token: special keys (`~type`, `~source`,
    /// timestamps, `~sdkver`, ...), shared-state references
    /// (`~state.<module>/<key>`), or the event's flattened payload.
    Matcher {
        key: String,
        matcher: MatcherKind,
        values: Vec<Value>,
    },
    /// Query against the event-history collaborator.
    Historical {
        requests: Vec<HistoricalRequest>,
        search_type: SearchType,
        matcher: MatcherKind,
        value: u64,
    },
}

impl Condition {
    /// A condition that always holds.
    #[must_use]
    pub fn always() -> Self {
        Self::Group {
            logic: ConditionLogic::And,
            conditions: Vec::new(),
        }
    }

    /// Convenience constructor for a leaf matcher.
    #[must_use]
    pub fn matcher(key: impl Into<String>, matcher: MatcherKind, values: Vec<Value>) -> Self {
        Self::Matcher {
            key: key.into(),
            matcher,
            values,
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return (x - y).abs() < f64::EPSILON;
    }
    match (as_text(a), as_text(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}
