//! # Event Hub
//!
//! The single-writer, multi-reader event router at the center of the SDK.
//!
//! A hub owns one serialized worker task: every dispatch, registration,
//! and shared-state mutation is enqueued as a unit of work and executed
//! one at a time, in submission order, so no two operations ever race.
//! Sequence numbers are assigned atomically at dispatch time — before the
//! hub is booted, numbered events buffer in memory and drain in original
//! order once [`EventHub::finish_registration`] runs.
//!
//! Per event processed, the rules engine evaluates first; dispatch
//! consequences are recursively processed (with new, later numbers)
//! before the triggering event reaches listeners.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use trellis_history::EventHistoryStore;
use trellis_rules::{Rule, RulesConfig, RulesEngine, StateProvider};
use trellis_types::{
    get_flattened, history_hash, Event, EventBuilder, EventSource, EventType, HubError,
    BOOT_EVENT_NUMBER, SHARED_STATE_NEWEST,
};

use crate::config::HubConfig;
use crate::extension::{DynExtension, ExtensionApi, ModuleRecord, ModuleTable};
use crate::listener::{BootCallback, ErrorFn, ListenerFn, ListenerKey, OneTimeEntry};
use crate::state::{RangedResolver, StateNamespace, StateValue};

/// One unit of serialized work.
enum WorkUnit {
    /// Process a dispatched event.
    Event(Event),
    /// Run a registration or state mutation.
    Task(Box<dyn FnOnce(&Arc<HubInner>) + Send>),
    /// Boot the hub: synthesize event 0, drain the pre-boot queue.
    Boot(Option<BootCallback>),
    /// Stop the worker.
    Shutdown,
}

/// Whether a state write creates a new version or resolves a pending one.
#[derive(Debug, Clone, Copy)]
enum StateOp {
    Create,
    Update,
}

/// Handle to a running event hub. Cheap to clone; all clones share the
/// same worker and tables.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

pub(crate) struct HubInner {
    config: HubConfig,
    /// Last assigned sequence number. 0 is reserved for the boot event.
    event_number: AtomicI64,
    events_dispatched: AtomicU64,
    booted: AtomicBool,
    /// Pre-boot FIFO. The boot flag only transitions under this lock so a
    /// dispatch can never slip between the flip and the drain.
    preboot: Mutex<VecDeque<Event>>,
    modules: RwLock<ModuleTable>,
    states: RwLock<HashMap<(String, StateNamespace), RangedResolver<Value>>>,
    /// In-flight (reader, owner) shared-state reads, for livelock detection.
    inflight_reads: Mutex<HashSet<(String, String)>>,
    onetime: Arc<Mutex<HashMap<String, OneTimeEntry>>>,
    rules: RulesEngine,
    history: Option<Arc<dyn EventHistoryStore>>,
    work_tx: mpsc::UnboundedSender<WorkUnit>,
}

impl EventHub {
    /// Create a hub with no event-history collaborator.
    ///
    /// Must be called within a tokio runtime; the worker task is spawned
    /// immediately.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a hub wired to an event-history store.
    #[must_use]
    pub fn with_history(config: HubConfig, history: Arc<dyn EventHistoryStore>) -> Self {
        Self::build(config, Some(history))
    }

    fn build(config: HubConfig, history: Option<Arc<dyn EventHistoryStore>>) -> Self {
        let (work_tx, work_rx) = mpsc::unbounded_channel();

        let rules = RulesEngine::new(
            RulesConfig {
                history_timeout: config.history_timeout,
                max_chained_events: config.max_chained_events,
                sdk_version: config.sdk_version.clone(),
            },
            history.clone(),
        );

        let inner = Arc::new(HubInner {
            config,
            event_number: AtomicI64::new(BOOT_EVENT_NUMBER),
            events_dispatched: AtomicU64::new(0),
            booted: AtomicBool::new(false),
            preboot: Mutex::new(VecDeque::new()),
            modules: RwLock::new(ModuleTable::default()),
            states: RwLock::new(HashMap::new()),
            inflight_reads: Mutex::new(HashSet::new()),
            onetime: Arc::new(Mutex::new(HashMap::new())),
            rules,
            history,
            work_tx,
        });

        tokio::spawn(run_worker(Arc::clone(&inner), work_rx));
        Self { inner }
    }

    /// Dispatch an event. Fire-and-forget: returns the assigned sequence
    /// number immediately; processing happens on the serialized worker.
    pub fn dispatch(&self, event: Event) -> i64 {
        self.inner.dispatch_event(event)
    }

    /// Dispatch a request event and wait for its response via callbacks.
    ///
    /// Exactly one of `on_response` / `on_error` is invoked: whichever of
    /// the matched-response and timeout paths wins removes the listener,
    /// so the other becomes a no-op. `timeout` defaults to the configured
    /// response timeout.
    pub fn dispatch_with_response_callback(
        &self,
        event: Event,
        timeout: Option<Duration>,
        on_response: impl FnOnce(Event) + Send + 'static,
        on_error: impl FnOnce(HubError) + Send + 'static,
    ) -> i64 {
        let timeout = timeout.unwrap_or(self.inner.config.response_timeout);
        let pair_id = event.response_pair_id().to_string();

        self.inner.onetime.lock().insert(
            pair_id.clone(),
            OneTimeEntry {
                on_response: Box::new(on_response),
                on_error: Box::new(on_error),
            },
        );

        // The timer runs on the tokio timer wheel, independent of the
        // worker, so a slow listener cannot starve the timeout.
        let onetime = Arc::clone(&self.inner.onetime);
        let timeout_ms = timeout.as_millis() as u64;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let entry = onetime.lock().remove(&pair_id);
            if let Some(entry) = entry {
                warn!(pair_id = %pair_id, timeout_ms, "[EventHub] One-time listener timed out");
                (entry.on_error)(HubError::CallbackTimeout { timeout_ms });
            }
        });

        self.dispatch(event)
    }

    /// Register an extension built by `factory`.
    ///
    /// Rejections (empty or duplicate name) are logged and delivered to
    /// `on_error`; they never abort the hub.
    pub fn register_extension(
        &self,
        factory: impl FnOnce() -> DynExtension + Send + 'static,
        on_error: Option<ErrorFn>,
    ) {
        let hub = self.clone();
        self.inner.send_task(move |inner| {
            let mut extension = factory();
            let display_name = extension.name().trim().to_string();
            if display_name.is_empty() {
                report_error(
                    on_error,
                    HubError::InvalidModule("extension name is empty".to_string()),
                );
                return;
            }

            let normalized = ModuleTable::normalize(&display_name);
            if inner.modules.read().contains(&normalized) {
                report_error(on_error, HubError::DuplicateModule { name: display_name });
                return;
            }

            let api = ExtensionApi::new(hub, display_name.clone());
            extension.on_registered(&api);

            let version = extension.version().to_string();
            info!(name = %display_name, version = %version, "[Registry] Registered extension");

            let record = ModuleRecord {
                display_name,
                version,
                extension,
                listeners: HashMap::new(),
            };
            if let Err(err) = inner.modules.write().insert(normalized, record) {
                report_error(on_error, err);
            }
        });
    }

    /// Unregister an extension: its listeners and rules are dropped, its
    /// shared-state history stays queryable, and the name becomes
    /// available again.
    pub fn unregister_extension(&self, name: &str) {
        let name = name.to_string();
        self.inner.send_task(move |inner| {
            let normalized = ModuleTable::normalize(&name);
            let record = inner.modules.write().remove(&normalized);
            match record {
                Some(mut record) => {
                    record.extension.on_unregistered();
                    inner.rules.unregister_rules(&normalized);
                    info!(name = %record.display_name, "[Registry] Unregistered extension");
                }
                None => warn!(name = %name, "[Registry] Cannot unregister unknown extension"),
            }
        });
    }

    /// Register (or replace) a module's listener for (type, source).
    pub fn register_listener(
        &self,
        module: &str,
        event_type: EventType,
        source: EventSource,
        listener: impl Fn(&Event) + Send + Sync + 'static,
    ) {
        let module = module.to_string();
        let listener: ListenerFn = Arc::new(listener);
        self.inner.send_task(move |inner| {
            let mut modules = inner.modules.write();
            match modules.get_mut(&ModuleTable::normalize(&module)) {
                Some(record) => {
                    let key = ListenerKey::new(event_type, source);
                    if record.listeners.insert(key, listener).is_some() {
                        debug!(module = %module, "[Registry] Listener replaced");
                    }
                }
                None => {
                    warn!(module = %module, "[Registry] Cannot register listener for unknown module");
                }
            }
        });
    }

    /// Remove a module's listener for (type, source). Idempotent.
    pub fn unregister_listener(&self, module: &str, event_type: EventType, source: EventSource) {
        let module = module.to_string();
        self.inner.send_task(move |inner| {
            let mut modules = inner.modules.write();
            let removed = modules
                .get_mut(&ModuleTable::normalize(&module))
                .and_then(|record| {
                    record
                        .listeners
                        .remove(&ListenerKey::new(event_type, source))
                });
            if removed.is_none() {
                debug!(module = %module, "[Registry] No listener to unregister");
            }
        });
    }

    /// Replace a module's rules.
    pub fn register_rules(&self, module: &str, rules: Vec<Rule>) {
        let module = module.to_string();
        self.inner
            .send_task(move |inner| inner.rules.register_rules(&module, rules));
    }

    /// Remove a module's rules. Idempotent.
    pub fn unregister_rules(&self, module: &str) {
        let module = module.to_string();
        self.inner
            .send_task(move |inner| inner.rules.unregister_rules(&module));
    }

    /// Publish a module's shared state at a version.
    ///
    /// Fires a hub state-change event unless the stored value is
    /// `Pending`.
    pub fn create_shared_state(
        &self,
        module: &str,
        namespace: StateNamespace,
        version: i64,
        value: StateValue<Value>,
    ) {
        let module = module.to_string();
        self.inner.send_task(move |inner| {
            inner.apply_state(&module, namespace, version, value, StateOp::Create);
        });
    }

    /// Resolve a previously pending shared state at a version.
    pub fn update_shared_state(
        &self,
        module: &str,
        namespace: StateNamespace,
        version: i64,
        value: StateValue<Value>,
    ) {
        let module = module.to_string();
        self.inner.send_task(move |inner| {
            inner.apply_state(&module, namespace, version, value, StateOp::Update);
        });
    }

    /// Resolve a module's shared state at an event's version.
    ///
    /// `event: None` resolves the newest state. `caller` attributes the
    /// read for circular-dependency detection.
    #[must_use]
    pub fn shared_state_for(
        &self,
        module: &str,
        namespace: StateNamespace,
        event: Option<&Event>,
        caller: Option<&str>,
    ) -> StateValue<Value> {
        let version = event.map_or(SHARED_STATE_NEWEST, Event::number);
        self.inner.resolve_state(module, namespace, version, caller)
    }

    /// Whether a module has any resolvable state in a namespace.
    #[must_use]
    pub fn has_shared_state(&self, module: &str, namespace: StateNamespace) -> bool {
        self.inner
            .states
            .read()
            .get(&(ModuleTable::normalize(module), namespace))
            .is_some_and(RangedResolver::contains_valid_state)
    }

    /// Drop a module's entire shared-state history, both namespaces.
    pub fn clear_shared_states(&self, module: &str) {
        let module = module.to_string();
        self.inner.send_task(move |inner| {
            let normalized = ModuleTable::normalize(&module);
            let mut states = inner.states.write();
            let standard = states.remove(&(normalized.clone(), StateNamespace::Standard));
            let xdm = states.remove(&(normalized, StateNamespace::Xdm));
            if standard.is_some() || xdm.is_some() {
                info!(module = %module, "[SharedState] Cleared shared states");
            }
        });
    }

    /// Mark registration finished and boot the hub.
    ///
    /// Boot synthesizes event 0, drains the pre-boot queue in original
    /// order, then invokes `callback`. Only the first call boots;
    /// subsequent calls are logged no-ops.
    pub fn finish_registration(&self, callback: Option<BootCallback>) {
        if self.inner.work_tx.send(WorkUnit::Boot(callback)).is_err() {
            warn!("[EventHub] finish_registration after shutdown, ignored");
        }
    }

    /// Whether the hub has booted.
    #[must_use]
    pub fn is_booted(&self) -> bool {
        self.inner.booted.load(Ordering::SeqCst)
    }

    /// Total events assigned a sequence number so far.
    #[must_use]
    pub fn events_dispatched(&self) -> u64 {
        self.inner.events_dispatched.load(Ordering::Relaxed)
    }

    /// Registered extension names, in registration order.
    #[must_use]
    pub fn registered_extensions(&self) -> Vec<String> {
        self.inner.modules.read().registered_names()
    }

    /// Version string of a registered extension, by case-insensitive name.
    #[must_use]
    pub fn extension_version(&self, name: &str) -> Option<String> {
        self.inner
            .modules
            .read()
            .version_of(&ModuleTable::normalize(name))
    }

    /// Stop the worker. Queued work submitted before the shutdown still
    /// runs; everything after is dropped with a warning.
    pub fn shutdown(&self) {
        if self.inner.work_tx.send(WorkUnit::Shutdown).is_err() {
            debug!("[EventHub] Already shut down");
        }
    }
}

impl HubInner {
    fn next_number(&self) -> i64 {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
        self.event_number.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn send_task(&self, task: impl FnOnce(&Arc<HubInner>) + Send + 'static) {
        if self.work_tx.send(WorkUnit::Task(Box::new(task))).is_err() {
            warn!("[EventHub] Operation after shutdown, ignored");
        }
    }

    /// Assign the next number and either buffer (pre-boot) or enqueue.
    fn dispatch_event(&self, event: Event) -> i64 {
        let number = self.next_number();
        let event = event.with_number(number);

        let mut preboot = self.preboot.lock();
        if !self.booted.load(Ordering::SeqCst) {
            if let Some(capacity) = self.config.preboot_capacity {
                if preboot.len() >= capacity {
                    let dropped = preboot.pop_front();
                    warn!(
                        capacity,
                        dropped = dropped.map(|e| e.number()).unwrap_or_default(),
                        "[EventHub] Pre-boot buffer full, dropped oldest event"
                    );
                }
            }
            debug!(number, "[EventHub] Buffered pre-boot event");
            preboot.push_back(event);
        } else {
            drop(preboot);
            if self.work_tx.send(WorkUnit::Event(event)).is_err() {
                warn!(number, "[EventHub] Dispatch after shutdown, event dropped");
            }
        }
        number
    }

    /// Boot: event 0 first, then the buffered queue in original order.
    async fn boot(&self, callback: Option<BootCallback>) {
        let drained = {
            let mut preboot = self.preboot.lock();
            if self.booted.swap(true, Ordering::SeqCst) {
                warn!("[EventHub] finish_registration called more than once, ignoring");
                return;
            }
            preboot.drain(..).collect::<Vec<_>>()
        };

        info!(buffered = drained.len(), "[EventHub] Booted");

        let boot_event = EventBuilder::new("hub booted", EventType::hub(), EventSource::booted())
            .build()
            .with_number(BOOT_EVENT_NUMBER);
        self.process_event(boot_event).await;

        for event in drained {
            self.process_event(event).await;
        }

        if let Some(callback) = callback {
            callback();
        }
    }

    /// Process one event: rules first, then recursive consequence
    /// dispatch, then listener fan-out, then history recording.
    fn process_event<'a>(
        &'a self,
        event: Event,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let processed = self.rules.evaluate(event, self).await;

            for spawned in processed.dispatches {
                let spawned = spawned.with_number(self.next_number());
                self.process_event(spawned).await;
            }

            let event = processed.event;
            self.deliver(&event);
            self.record_history(&event).await;
        })
    }

    fn deliver(&self, event: &Event) {
        // One-time listeners match on pair id alone, ignoring type/source.
        if let Some(pair_id) = event.pair_id() {
            let entry = self.onetime.lock().remove(pair_id);
            if let Some(entry) = entry {
                debug!(pair_id = %pair_id, "[EventHub] One-time listener heard response");
                (entry.on_response)(event.clone());
            }
        }

        let listeners = self.modules.read().matching_listeners(event);
        for listener in listeners {
            listener(event);
        }
    }

    async fn record_history(&self, event: &Event) {
        let (Some(history), Some(mask)) = (self.history.as_ref(), event.mask()) else {
            return;
        };
        let hash = history_hash(event, Some(mask));
        if !history.record_event(hash, event.timestamp_ms()).await {
            warn!(number = event.number(), "[EventHub] Event history recording failed");
        }
    }

    fn apply_state(
        &self,
        module: &str,
        namespace: StateNamespace,
        version: i64,
        value: StateValue<Value>,
        op: StateOp,
    ) {
        let normalized = ModuleTable::normalize(module);
        let pending = value.is_pending();

        let changed = {
            let mut states = self.states.write();
            let resolver = states
                .entry((normalized, namespace))
                .or_insert_with(RangedResolver::new);
            match op {
                StateOp::Create => resolver.add(version, value),
                StateOp::Update => resolver.update(version, value),
            }
        };

        if !changed {
            warn!(
                module = %module,
                version,
                ?namespace,
                ?op,
                "[SharedState] State change rejected"
            );
            return;
        }
        debug!(module = %module, version, ?namespace, "[SharedState] State stored");

        // A promise is not worth announcing; the concrete update will be.
        if pending {
            return;
        }

        let source = match namespace {
            StateNamespace::Standard => EventSource::shared_state(),
            StateNamespace::Xdm => EventSource::xdm_shared_state(),
        };
        let change_event = EventBuilder::new("shared state change", EventType::hub(), source)
            .data(json!({ "stateowner": module }))
            .build();
        self.dispatch_event(change_event);
    }

    fn resolve_state(
        &self,
        module: &str,
        namespace: StateNamespace,
        version: i64,
        caller: Option<&str>,
    ) -> StateValue<Value> {
        let owner = ModuleTable::normalize(module);

        let tracked = caller.map(|caller| (ModuleTable::normalize(caller), owner.clone()));
        if let Some((reader, owner)) = &tracked {
            let mut inflight = self.inflight_reads.lock();
            if inflight.contains(&(owner.clone(), reader.clone())) {
                // Symmetric read in flight: detect and log, never break.
                warn!(
                    reader = %reader,
                    owner = %owner,
                    "[SharedState] Circular shared-state dependency detected"
                );
            }
            inflight.insert((reader.clone(), owner.clone()));
        }

        let resolved = self
            .states
            .read()
            .get(&(owner, namespace))
            .map_or(StateValue::Pending, |resolver| resolver.resolve(version));

        if let Some(pair) = tracked {
            self.inflight_reads.lock().remove(&pair);
        }
        resolved
    }
}

impl StateProvider for HubInner {
    fn shared_state_value(&self, module: &str, key: &str, version: i64) -> Option<Value> {
        match self.resolve_state(module, StateNamespace::Standard, version, None) {
            StateValue::Data(data) => get_flattened(&data, key),
            _ => None,
        }
    }
}

fn report_error(on_error: Option<ErrorFn>, err: HubError) {
    warn!(error = %err, "[Registry] Registration rejected");
    if let Some(on_error) = on_error {
        on_error(err);
    }
}

async fn run_worker(inner: Arc<HubInner>, mut work_rx: mpsc::UnboundedReceiver<WorkUnit>) {
    while let Some(unit) = work_rx.recv().await {
        match unit {
            WorkUnit::Event(event) => inner.process_event(event).await,
            WorkUnit::Task(task) => task(&inner),
            WorkUnit::Boot(callback) => inner.boot(callback).await,
            WorkUnit::Shutdown => break,
        }
    }
    debug!("[EventHub] Worker stopped");
}
