//! # Test Fixtures
//!
//! Shared extensions and helpers used across the integration flows.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use trellis_hub::{Extension, ExtensionApi};
use trellis_types::{Event, EventBuilder, EventSource, EventType};

/// Extension that records every event it sees through a wildcard listener.
pub struct Recorder {
    name: String,
    seen: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    /// Create a recorder and a handle to its captured events.
    pub fn new(name: impl Into<String>) -> (Self, Arc<Mutex<Vec<Event>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                name: name.into(),
                seen: Arc::clone(&seen),
            },
            seen,
        )
    }
}

impl Extension for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_registered(&mut self, api: &ExtensionApi) {
        let seen = Arc::clone(&self.seen);
        api.register_wildcard_listener(move |event| seen.lock().push(event.clone()));
    }
}

/// Poll until `predicate` holds or a generous timeout panics the test.
pub async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached within timeout");
}

/// A request-content event of the given type with a payload.
pub fn request(event_type: &str, data: serde_json::Value) -> Event {
    EventBuilder::new(
        "test request",
        EventType::new(event_type),
        EventSource::request_content(),
    )
    .data(data)
    .build()
}
