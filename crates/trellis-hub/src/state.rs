//! # Versioned Shared State
//!
//! [`RangedResolver`] answers "what was this module's state at version V"
//! over an append-only, totally version-ordered sequence of entries.
//!
//! Entries are an explicit sum type: concrete data, a promise of future
//! data ([`StateValue::Pending`]), a permanent hole
//! ([`StateValue::Invalid`]), or a directional marker
//! ([`StateValue::Next`]/[`StateValue::Prev`]) meaning "same value as the
//! nearest resolvable neighbor in that direction". History is immutable:
//! once a version holds data or `Invalid` it never changes; only `Pending`
//! entries are updatable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which of a module's two parallel state namespaces an operation targets.
///
/// The namespaces never interact; each has its own resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateNamespace {
    /// Standard extension state.
    Standard,
    /// XDM-formatted state.
    Xdm,
}

/// One entry in a module's shared-state history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateValue<T> {
    /// Concrete published state.
    Data(T),
    /// State is coming; consumers may wait for the update.
    Pending,
    /// Permanently unresolvable at this version.
    Invalid,
    /// Same value as the nearest resolvable entry at a higher version.
    Next,
    /// Same value as the nearest resolvable entry at a lower version.
    Prev,
}

impl<T> StateValue<T> {
    /// Whether this entry is the pending promise.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Whether this entry is a directional marker.
    #[must_use]
    pub fn is_marker(&self) -> bool {
        matches!(self, Self::Next | Self::Prev)
    }

    /// The concrete data, if any.
    #[must_use]
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Data(value) => Some(value),
            _ => None,
        }
    }
}

/// Sorted-by-version resolver for one (module, namespace) pair.
#[derive(Debug, Clone, Default)]
pub struct RangedResolver<T> {
    entries: BTreeMap<i64, StateValue<T>>,
}

impl<T: Clone> RangedResolver<T> {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Append an entry.
    ///
    /// Succeeds only if `version` is strictly greater than every previously
    /// added version and `value` is not a directional marker.
    pub fn add(&mut self, version: i64, value: StateValue<T>) -> bool {
        if value.is_marker() {
            return false;
        }
        if let Some((&newest, _)) = self.entries.last_key_value() {
            if version <= newest {
                return false;
            }
        }
        self.entries.insert(version, value);
        true
    }

    /// Replace the entry at `version`.
    ///
    /// Succeeds only if the stored entry is currently `Pending` and the
    /// replacement is not itself `Pending` (re-promising is a no-op so
    /// consumers never see a spurious change).
    pub fn update(&mut self, version: i64, value: StateValue<T>) -> bool {
        if value.is_pending() {
            return false;
        }
        match self.entries.get_mut(&version) {
            Some(entry) if entry.is_pending() => {
                *entry = value;
                true
            }
            _ => false,
        }
    }

    /// Resolve the state at a version.
    ///
    /// Negative queries clamp to the earliest version. The floor entry is
    /// taken; `Prev` walks to strictly lower versions, then `Next` walks to
    /// strictly higher ones, until a concrete/`Pending`/`Invalid` entry is
    /// found. Exhaustion in either direction resolves to `Pending`.
    #[must_use]
    pub fn resolve(&self, version: i64) -> StateValue<T> {
        let Some((&earliest, _)) = self.entries.first_key_value() else {
            return StateValue::Pending;
        };
        let version = if version < 0 { earliest } else { version };

        let Some((&floor, entry)) = self.entries.range(..=version).next_back() else {
            return StateValue::Pending;
        };

        let (position, entry) = if matches!(entry, StateValue::Prev) {
            match self
                .entries
                .range(..floor)
                .rev()
                .find(|(_, e)| !matches!(e, StateValue::Prev))
            {
                Some((&v, e)) => (v, e),
                // Nothing below: fall through to the upward walk.
                None => (floor, entry),
            }
        } else {
            (floor, entry)
        };

        if matches!(entry, StateValue::Next | StateValue::Prev) {
            use std::ops::Bound;
            return self
                .entries
                .range((Bound::Excluded(position), Bound::Unbounded))
                .find(|(_, e)| !e.is_marker())
                .map(|(_, e)| e.clone())
                .unwrap_or(StateValue::Pending);
        }

        entry.clone()
    }

    /// Whether any entry, scanning newest to oldest, is resolvable data or
    /// a pending promise.
    #[must_use]
    pub fn contains_valid_state(&self) -> bool {
        self.entries
            .values()
            .rev()
            .any(|entry| matches!(entry, StateValue::Data(_) | StateValue::Pending))
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
