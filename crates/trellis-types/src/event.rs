//! # Events
//!
//! The immutable [`Event`] and its consuming builder.
//!
//! Events are the only unit of communication between extensions. They are
//! frozen at construction: [`EventBuilder::build`] takes the builder by
//! value, so an event can never be mutated after it exists. The hub stamps
//! the sequence number exactly once via [`Event::with_number`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{SHARED_STATE_NEWEST, SHARED_STATE_OLDEST};

/// Case-insensitive event type name.
///
/// Normalized to lowercase at construction; equality and hashing operate
/// on the normalized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType(String);

impl EventType {
    /// Create a new event type, normalizing to lowercase.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase())
    }

    /// Hub-internal events (boot, shared-state changes).
    #[must_use]
    pub fn hub() -> Self {
        Self::new("hub")
    }

    /// Events synthesized by the rules engine.
    #[must_use]
    pub fn rules_engine() -> Self {
        Self::new("rules-engine")
    }

    /// Matches every event type.
    #[must_use]
    pub fn wildcard() -> Self {
        Self::new("wildcard")
    }

    /// The normalized name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the wildcard type.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.0 == "wildcard"
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Case-insensitive event source name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventSource(String);

impl EventSource {
    /// Create a new event source, normalizing to lowercase.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase())
    }

    /// The hub finished module registration.
    #[must_use]
    pub fn booted() -> Self {
        Self::new("booted")
    }

    /// A standard-namespace shared state changed.
    #[must_use]
    pub fn shared_state() -> Self {
        Self::new("shared-state")
    }

    /// An XDM-namespace shared state changed.
    #[must_use]
    pub fn xdm_shared_state() -> Self {
        Self::new("xdm-shared-state")
    }

    /// Request half of a request/response exchange.
    #[must_use]
    pub fn request_content() -> Self {
        Self::new("request-content")
    }

    /// Response half of a request/response exchange.
    #[must_use]
    pub fn response_content() -> Self {
        Self::new("response-content")
    }

    /// Matches every event source.
    #[must_use]
    pub fn wildcard() -> Self {
        Self::new("wildcard")
    }

    /// Placeholder source for marker events.
    #[must_use]
    pub fn none() -> Self {
        Self::new("none")
    }

    /// The normalized name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the wildcard source.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.0 == "wildcard"
    }
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable event flowing through the hub.
///
/// Built via [`EventBuilder`]; the hub assigns `number` before processing.
/// Two sentinel events ([`Event::shared_state_oldest`],
/// [`Event::shared_state_newest`]) exist purely as version-query markers
/// and are never dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    name: String,
    event_type: EventType,
    source: EventSource,
    id: Uuid,
    pair_id: Option<String>,
    response_pair_id: String,
    data: Value,
    number: i64,
    timestamp_ms: i64,
    mask: Option<Vec<String>>,
}

impl Event {
    /// Convenience constructor with an empty payload.
    #[must_use]
    pub fn new(name: impl Into<String>, event_type: EventType, source: EventSource) -> Self {
        EventBuilder::new(name, event_type, source).build()
    }

    /// Version-query marker for the oldest available shared state.
    #[must_use]
    pub fn shared_state_oldest() -> Self {
        EventBuilder::new("shared-state-oldest", EventType::hub(), EventSource::none())
            .build()
            .with_number(SHARED_STATE_OLDEST)
    }

    /// Version-query marker for the newest available shared state.
    #[must_use]
    pub fn shared_state_newest() -> Self {
        EventBuilder::new("shared-state-newest", EventType::hub(), EventSource::none())
            .build()
            .with_number(SHARED_STATE_NEWEST)
    }

    /// Event name (human-readable, not used for matching).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Event type, used for listener matching.
    #[must_use]
    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    /// Event source, used for listener matching.
    #[must_use]
    pub fn source(&self) -> &EventSource {
        &self.source
    }

    /// Unique identifier, assigned at construction.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Correlation id carried by a response event.
    #[must_use]
    pub fn pair_id(&self) -> Option<&str> {
        self.pair_id.as_deref()
    }

    /// Correlation id a response to this event must carry.
    #[must_use]
    pub fn response_pair_id(&self) -> &str {
        &self.response_pair_id
    }

    /// Event payload. Always a JSON object (possibly empty).
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Hub-assigned sequence number. 0 is reserved for the boot event.
    #[must_use]
    pub fn number(&self) -> i64 {
        self.number
    }

    /// Construction timestamp, epoch milliseconds.
    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    /// Field mask selecting the keys that participate in the history hash.
    #[must_use]
    pub fn mask(&self) -> Option<&[String]> {
        self.mask.as_deref()
    }

    /// Return a copy stamped with the given sequence number.
    ///
    /// Numbers are assigned by the hub exactly once, before processing.
    #[must_use]
    pub fn with_number(mut self, number: i64) -> Self {
        self.number = number;
        self
    }

    /// Return a copy carrying a replacement payload.
    ///
    /// Used by the rules engine when attach/modify consequences transform
    /// the in-flight event; identity (id, number, pair ids) is preserved.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Consuming builder for [`Event`].
///
/// `build()` takes `self`, so mutation after build is impossible by
/// construction.
#[derive(Debug)]
pub struct EventBuilder {
    name: String,
    event_type: EventType,
    source: EventSource,
    pair_id: Option<String>,
    data: Value,
    mask: Option<Vec<String>>,
}

impl EventBuilder {
    /// Start building an event with the required fields.
    #[must_use]
    pub fn new(name: impl Into<String>, event_type: EventType, source: EventSource) -> Self {
        Self {
            name: name.into(),
            event_type,
            source,
            pair_id: None,
            data: Value::Object(serde_json::Map::new()),
            mask: None,
        }
    }

    /// Set the payload. Non-object values are wrapped under `"value"`.
    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = match data {
            Value::Object(_) => data,
            other => serde_json::json!({ "value": other }),
        };
        self
    }

    /// Mark this event as the response to `request`.
    #[must_use]
    pub fn in_response_to(mut self, request: &Event) -> Self {
        self.pair_id = Some(request.response_pair_id.clone());
        self
    }

    /// Set an explicit correlation pair id.
    #[must_use]
    pub fn pair_id(mut self, pair_id: impl Into<String>) -> Self {
        self.pair_id = Some(pair_id.into());
        self
    }

    /// Set the history-hash field mask.
    #[must_use]
    pub fn mask(mut self, mask: Vec<String>) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Freeze the event. The sequence number is stamped later by the hub.
    #[must_use]
    pub fn build(self) -> Event {
        Event {
            name: self.name,
            event_type: self.event_type,
            source: self.source,
            id: Uuid::new_v4(),
            pair_id: self.pair_id,
            response_pair_id: Uuid::new_v4().to_string(),
            data: self.data,
            number: 0,
            timestamp_ms: Utc::now().timestamp_millis(),
            mask: self.mask,
        }
    }
}
