//! # Trellis Rules Engine
//!
//! Per-module rule evaluation for the event hub.
//!
//! Each registered module owns an ordered list of [`Rule`]s. When the hub
//! processes an event, every module's rules are evaluated in registration
//! order; a matching rule's consequences may transform the in-flight event
//! (attach/modify) or emit further events (dispatch), with a per-trigger
//! chain budget guarding against dispatch cycles.
//!
//! The engine reaches outward through two seams: [`StateProvider`] for
//! cross-module shared-state lookups (`~state.<module>/<key>` tokens and
//! condition keys) and the `trellis-history` port for historical
//! conditions.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod condition;
pub mod consequence;
pub mod engine;
pub mod tokens;

// Re-export main types
pub use condition::{Condition, ConditionLogic, HistoricalRequest, MatcherKind, SearchType};
pub use consequence::{Consequence, CONSEQUENCE_ATTACH, CONSEQUENCE_DISPATCH, CONSEQUENCE_MODIFY};
pub use engine::{ProcessedEvent, Rule, RulesConfig, RulesEngine};
pub use tokens::TokenExpander;

use serde_json::Value;

/// Read-only view of shared state, implemented by the hub.
///
/// `version` is the triggering event's number; resolution follows the
/// hub's ranged-resolver semantics. Returns `None` when the module has no
/// resolvable state or the key is absent.
pub trait StateProvider: Send + Sync {
    /// Resolve a flattened key from a module's standard shared state.
    fn shared_state_value(&self, module: &str, key: &str, version: i64) -> Option<Value>;
}

/// A provider with no state, for contexts without a hub.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoState;

impl StateProvider for NoState {
    fn shared_state_value(&self, _module: &str, _key: &str, _version: i64) -> Option<Value> {
        None
    }
}
