//! # Trellis Types - Event Model and Shared Vocabulary
//!
//! Defines the types shared by every hub crate: the immutable [`Event`],
//! its builder, the case-insensitive [`EventType`]/[`EventSource`] names,
//! payload helpers over `serde_json::Value`, and the common error types.
//!
//! All inter-extension communication flows through [`Event`] values; there
//! are no direct calls between extensions.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod data;
pub mod errors;
pub mod event;
pub mod hashing;

// Re-export main types
pub use data::{flatten, get_flattened, merge_missing, overwrite_with};
pub use errors::{HubError, RuleError};
pub use event::{Event, EventBuilder, EventSource, EventType};
pub use hashing::{hash_kv, history_hash};

/// Event number reserved for the synthetic boot event.
pub const BOOT_EVENT_NUMBER: i64 = 0;

/// Version marker resolving to the oldest available shared state.
pub const SHARED_STATE_OLDEST: i64 = -1;

/// Version marker resolving to the newest available shared state.
pub const SHARED_STATE_NEWEST: i64 = i64::MAX;
