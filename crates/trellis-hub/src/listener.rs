//! # Listener Tables
//!
//! Typed handler storage for event delivery. Regular listeners are keyed
//! by (type, source) — at most one per module, re-registration replaces —
//! and one-time listeners are keyed by correlation pair id, consumed on
//! first match or timeout.

use std::sync::Arc;

use trellis_types::{Event, EventSource, EventType, HubError};

/// Handler invoked for every matching event.
pub type ListenerFn = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handler invoked once with a matched response event.
pub type ResponseFn = Box<dyn FnOnce(Event) + Send>;

/// Handler invoked once with the error outcome of a response wait.
pub type ErrorFn = Box<dyn FnOnce(HubError) + Send>;

/// Callback invoked after boot completes.
pub type BootCallback = Box<dyn FnOnce() + Send>;

/// Registration key for a regular listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerKey {
    pub event_type: EventType,
    pub source: EventSource,
}

impl ListenerKey {
    /// Create a key; wildcard components match every event.
    #[must_use]
    pub fn new(event_type: EventType, source: EventSource) -> Self {
        Self { event_type, source }
    }

    /// Key matching all events.
    #[must_use]
    pub fn wildcard() -> Self {
        Self {
            event_type: EventType::wildcard(),
            source: EventSource::wildcard(),
        }
    }

    /// Whether this key matches an event's type and source.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        let type_hit = self.event_type.is_wildcard() || &self.event_type == event.event_type();
        let source_hit = self.source.is_wildcard() || &self.source == event.source();
        type_hit && source_hit
    }
}

/// A registered one-time listener awaiting its response or timeout.
///
/// The pair-id table entry is removed exactly once under its lock;
/// whichever of the heard/timeout paths removes it invokes its callback,
/// the other finds the entry gone and no-ops.
pub struct OneTimeEntry {
    pub on_response: ResponseFn,
    pub on_error: ErrorFn,
}
