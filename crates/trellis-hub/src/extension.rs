//! # Extensions
//!
//! The contract extensions implement to participate in the hub, and the
//! registry tables that track them.
//!
//! Extensions are constructed through factory closures at registration
//! time — there is no runtime type introspection. Names are unique
//! case-insensitively; a duplicate registration is rejected with a logged
//! error signal, never a panic.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use trellis_rules::Rule;
use trellis_types::{Event, EventSource, EventType, HubError};

use crate::hub::EventHub;
use crate::listener::{ListenerFn, ListenerKey};
use crate::state::{StateNamespace, StateValue};

/// The contract every extension implements.
///
/// Lifecycle hooks run on the hub's serialized worker, so implementations
/// may freely call back into the hub through the provided
/// [`ExtensionApi`]; those calls enqueue onto the same worker and execute
/// after the current hook returns.
pub trait Extension: Send + Sync {
    /// Unique extension name (case-insensitive).
    fn name(&self) -> &str;

    /// Extension version string.
    fn version(&self) -> &str {
        "0.1.0"
    }

    /// Called once after the extension is accepted by the registry.
    ///
    /// This is where listeners, rules, and initial shared state are
    /// registered.
    fn on_registered(&mut self, _api: &ExtensionApi) {}

    /// Called once when the extension is removed from the registry.
    fn on_unregistered(&mut self) {}
}

/// A type-erased extension handle for the registry.
pub type DynExtension = Box<dyn Extension>;

/// Factory function type for creating extensions at registration time.
pub type ExtensionFactory = Box<dyn FnOnce() -> DynExtension + Send>;

/// A registered extension's view of the hub.
///
/// Fills in the owning module name so extension code never names itself
/// twice; all operations enqueue onto the hub's serialized worker.
#[derive(Clone)]
pub struct ExtensionApi {
    hub: EventHub,
    module: String,
}

impl ExtensionApi {
    pub(crate) fn new(hub: EventHub, module: impl Into<String>) -> Self {
        Self {
            hub,
            module: module.into(),
        }
    }

    /// The owning module's name.
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module
    }

    /// The underlying hub handle.
    #[must_use]
    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Dispatch an event. Returns the assigned sequence number.
    pub fn dispatch(&self, event: Event) -> i64 {
        self.hub.dispatch(event)
    }

    /// Register (or replace) this module's listener for (type, source).
    pub fn register_listener(
        &self,
        event_type: EventType,
        source: EventSource,
        listener: impl Fn(&Event) + Send + Sync + 'static,
    ) {
        self.hub
            .register_listener(&self.module, event_type, source, listener);
    }

    /// Register a listener receiving every event.
    pub fn register_wildcard_listener(&self, listener: impl Fn(&Event) + Send + Sync + 'static) {
        self.hub.register_listener(
            &self.module,
            EventType::wildcard(),
            EventSource::wildcard(),
            listener,
        );
    }

    /// Remove this module's listener for (type, source). Idempotent.
    pub fn unregister_listener(&self, event_type: EventType, source: EventSource) {
        self.hub.unregister_listener(&self.module, event_type, source);
    }

    /// Replace this module's rules.
    pub fn register_rules(&self, rules: Vec<Rule>) {
        self.hub.register_rules(&self.module, rules);
    }

    /// Remove this module's rules.
    pub fn unregister_rules(&self) {
        self.hub.unregister_rules(&self.module);
    }

    /// Publish this module's shared state at a version.
    pub fn create_shared_state(
        &self,
        namespace: StateNamespace,
        version: i64,
        value: StateValue<Value>,
    ) {
        self.hub
            .create_shared_state(&self.module, namespace, version, value);
    }

    /// Resolve a previously pending shared state at a version.
    pub fn update_shared_state(
        &self,
        namespace: StateNamespace,
        version: i64,
        value: StateValue<Value>,
    ) {
        self.hub
            .update_shared_state(&self.module, namespace, version, value);
    }

    /// Read another module's shared state at an event's version.
    ///
    /// Passing `None` resolves the newest state. The read is attributed to
    /// this module for circular-dependency detection.
    #[must_use]
    pub fn get_shared_state(
        &self,
        module: &str,
        namespace: StateNamespace,
        event: Option<&Event>,
    ) -> StateValue<Value> {
        self.hub
            .shared_state_for(module, namespace, event, Some(&self.module))
    }

    /// Whether a module has any resolvable state in a namespace.
    #[must_use]
    pub fn has_shared_state(&self, module: &str, namespace: StateNamespace) -> bool {
        self.hub.has_shared_state(module, namespace)
    }

    /// Drop this module's entire shared-state history, both namespaces.
    pub fn clear_shared_states(&self) {
        self.hub.clear_shared_states(&self.module);
    }
}

/// One registered module.
pub(crate) struct ModuleRecord {
    pub display_name: String,
    pub version: String,
    pub extension: DynExtension,
    pub listeners: HashMap<ListenerKey, ListenerFn>,
}

/// Registry of modules by normalized name, preserving registration order.
#[derive(Default)]
pub(crate) struct ModuleTable {
    records: HashMap<String, ModuleRecord>,
    order: Vec<String>,
}

impl ModuleTable {
    /// Normalize a module name for lookups.
    pub fn normalize(name: &str) -> String {
        name.trim().to_ascii_lowercase()
    }

    pub fn contains(&self, normalized: &str) -> bool {
        self.records.contains_key(normalized)
    }

    pub fn insert(&mut self, normalized: String, record: ModuleRecord) -> Result<(), HubError> {
        if self.records.contains_key(&normalized) {
            return Err(HubError::DuplicateModule {
                name: record.display_name,
            });
        }
        self.order.push(normalized.clone());
        self.records.insert(normalized, record);
        Ok(())
    }

    pub fn remove(&mut self, normalized: &str) -> Option<ModuleRecord> {
        self.order.retain(|name| name != normalized);
        self.records.remove(normalized)
    }

    pub fn get_mut(&mut self, normalized: &str) -> Option<&mut ModuleRecord> {
        self.records.get_mut(normalized)
    }

    /// Version string of a registered module.
    pub fn version_of(&self, normalized: &str) -> Option<String> {
        self.records
            .get(normalized)
            .map(|record| record.version.clone())
    }

    /// Registered module display names, in registration order.
    pub fn registered_names(&self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|name| self.records.get(name))
            .map(|record| record.display_name.clone())
            .collect()
    }

    /// Snapshot the listeners matching an event, in registration order.
    pub fn matching_listeners(&self, event: &Event) -> Vec<ListenerFn> {
        let mut hits = Vec::new();
        for name in &self.order {
            let Some(record) = self.records.get(name) else {
                continue;
            };
            for (key, listener) in &record.listeners {
                if key.matches(event) {
                    hits.push(listener.clone());
                }
            }
        }
        if !hits.is_empty() {
            debug!(count = hits.len(), event = %event.name(), "[Registry] Listeners matched");
        }
        hits
    }
}
