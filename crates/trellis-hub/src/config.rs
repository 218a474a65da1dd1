//! # Hub Configuration
//!
//! Explicit, constructor-owned configuration for the event hub. There is
//! no global state; a hub is built from one `HubConfig` and torn down with
//! [`crate::EventHub::shutdown`].

use std::time::Duration;

/// Tunables for one hub instance.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Default wait before a one-time listener's error callback fires.
    pub response_timeout: Duration,
    /// Bounded wait for historical-condition queries.
    pub history_timeout: Duration,
    /// Maximum chained dispatch consequences per root trigger.
    pub max_chained_events: u32,
    /// Optional cap on the pre-boot event buffer. `None` buffers without
    /// bound; when set, the oldest buffered event is dropped with a
    /// warning once the cap is exceeded.
    pub preboot_capacity: Option<usize>,
    /// Version string reported for the `~sdkver` token.
    pub sdk_version: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(5000),
            history_timeout: Duration::from_millis(1000),
            max_chained_events: 100,
            preboot_capacity: None,
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
