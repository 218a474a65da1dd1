//! # Trellis Hub - Serialized Event Routing for Extensions
//!
//! The core of the SDK: a single-hub, in-process event router providing
//! ordered, versioned dispatch, a shared-state resolution protocol, and
//! rules-driven consequence processing.
//!
//! ## Architecture Rules
//!
//! - All inter-extension communication flows through the hub as events;
//!   direct calls between extensions are forbidden
//! - All registry and shared-state mutations execute on one serialized
//!   worker, in submission order
//! - A single bad extension, rule, or event can never leave the hub in a
//!   broken state: failures are logged signals, not panics
//!
//! ## Usage
//!
//! ```rust,ignore
//! let hub = EventHub::new(HubConfig::default());
//! hub.register_extension(|| Box::new(MyExtension::default()), None);
//! hub.finish_registration(None);
//! hub.dispatch(event);
//! // ...
//! hub.shutdown();
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod extension;
pub mod hub;
pub mod listener;
pub mod state;

// Re-export main types
pub use config::HubConfig;
pub use extension::{DynExtension, Extension, ExtensionApi, ExtensionFactory};
pub use hub::EventHub;
pub use listener::{BootCallback, ErrorFn, ListenerFn, ListenerKey, ResponseFn};
pub use state::{RangedResolver, StateNamespace, StateValue};

// The shared vocabulary is re-exported so extensions depend on one crate.
pub use trellis_types::{Event, EventBuilder, EventSource, EventType, HubError};
