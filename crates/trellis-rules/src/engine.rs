//! # Rules Engine
//!
//! Evaluates registered rules against events and drives the consequence
//! state machine.
//!
//! Evaluation order is deterministic: modules in registration order, rules
//! in insertion order. Attach/modify consequences transform the in-flight
//! event as evaluation proceeds, so later rules observe earlier
//! transformations. Dispatch consequences are returned to the hub for
//! recursive dispatch, guarded by a per-root-trigger chain budget.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use trellis_history::{EventHistoryRequest, EventHistoryStore};
use trellis_types::{merge_missing, overwrite_with, Event};

use crate::condition::{Condition, ConditionLogic, HistoricalRequest, MatcherKind, SearchType};
use crate::consequence::{self, Consequence, Outcome};
use crate::tokens::TokenExpander;
use crate::StateProvider;

/// Tunables for rule evaluation.
#[derive(Debug, Clone)]
pub struct RulesConfig {
    /// Bounded wait for historical-condition queries.
    pub history_timeout: Duration,
    /// Maximum chained dispatch consequences per root trigger.
    pub max_chained_events: u32,
    /// Version string substituted for the `~sdkver` token.
    pub sdk_version: String,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            history_timeout: Duration::from_millis(1000),
            max_chained_events: 100,
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A condition with the consequences it triggers.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Root of the condition tree.
    pub condition: Condition,
    /// Templated consequences, processed in order.
    pub consequences: Vec<Consequence>,
}

impl Rule {
    /// Create a rule.
    #[must_use]
    pub fn new(condition: Condition, consequences: Vec<Consequence>) -> Self {
        Self {
            condition,
            consequences,
        }
    }
}

/// Rules owned by one module.
#[derive(Debug, Clone)]
struct ModuleRules {
    module: String,
    rules: Vec<Rule>,
}

/// Result of evaluating one event.
#[derive(Debug)]
pub struct ProcessedEvent {
    /// The triggering event, after attach/modify transformations.
    pub event: Event,
    /// New events to dispatch, in production order.
    pub dispatches: Vec<Event>,
}

/// Per-module rule evaluation with chained-dispatch protection.
pub struct RulesEngine {
    config: RulesConfig,
    history: Option<Arc<dyn EventHistoryStore>>,
    rule_sets: RwLock<Vec<ModuleRules>>,
    /// Remaining-chain bookkeeping per event id. An entry is consumed when
    /// its event is evaluated; dispatched consequences inherit count + 1.
    chain_counts: Mutex<HashMap<Uuid, u32>>,
}

impl RulesEngine {
    /// Create an engine. `history` is optional; historical conditions
    /// evaluate to false without it.
    #[must_use]
    pub fn new(config: RulesConfig, history: Option<Arc<dyn EventHistoryStore>>) -> Self {
        Self {
            config,
            history,
            rule_sets: RwLock::new(Vec::new()),
            chain_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Replace a module's rules. First registration appends the module to
    /// the evaluation order; re-registration keeps its position.
    pub fn register_rules(&self, module: &str, rules: Vec<Rule>) {
        let module = module.trim().to_ascii_lowercase();
        let mut sets = self.rule_sets.write();
        if let Some(existing) = sets.iter_mut().find(|s| s.module == module) {
            debug!(module = %module, count = rules.len(), "[RulesEngine] Replacing rules");
            existing.rules = rules;
        } else {
            debug!(module = %module, count = rules.len(), "[RulesEngine] Registering rules");
            sets.push(ModuleRules { module, rules });
        }
    }

    /// Remove a module's rules. Idempotent.
    pub fn unregister_rules(&self, module: &str) {
        let module = module.trim().to_ascii_lowercase();
        let mut sets = self.rule_sets.write();
        let before = sets.len();
        sets.retain(|s| s.module != module);
        if sets.len() == before {
            debug!(module = %module, "[RulesEngine] No rules to unregister");
        }
    }

    /// Number of modules with registered rules.
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.rule_sets.read().len()
    }

    /// Evaluate an event against every module's rules.
    ///
    /// Returns the (possibly transformed) event and any events produced by
    /// dispatch/generic consequences. The caller dispatches each produced
    /// event before delivering the processed trigger to listeners.
    pub async fn evaluate(&self, event: Event, state: &dyn StateProvider) -> ProcessedEvent {
        // Consume this trigger's chain budget entry; depth resets per lineage.
        let chain = self
            .chain_counts
            .lock()
            .remove(&event.id())
            .unwrap_or(0);

        let rule_sets = self.rule_sets.read().clone();
        let mut current = event;
        let mut dispatches = Vec::new();

        for set in &rule_sets {
            for rule in &set.rules {
                if !self
                    .evaluate_condition(&rule.condition, &current, state)
                    .await
                {
                    continue;
                }
                trace!(module = %set.module, event = %current.name(), "[RulesEngine] Rule matched");

                for template in &rule.consequences {
                    let expanded = self.expand_consequence(template, &current, state);
                    match consequence::interpret(&expanded, &current) {
                        Ok(Outcome::Attach(data)) => {
                            let mut merged = current.data().clone();
                            merge_missing(&mut merged, &data);
                            current = current.with_data(merged);
                        }
                        Ok(Outcome::Modify(data)) => {
                            let mut overwritten = current.data().clone();
                            overwrite_with(&mut overwritten, &data);
                            current = current.with_data(overwritten);
                        }
                        Ok(Outcome::Dispatch(new_event)) => {
                            if chain >= self.config.max_chained_events {
                                warn!(
                                    consequence = %expanded.id,
                                    limit = self.config.max_chained_events,
                                    "[RulesEngine] Dispatch consequence suppressed, chain limit reached"
                                );
                                continue;
                            }
                            self.chain_counts
                                .lock()
                                .insert(new_event.id(), chain + 1);
                            dispatches.push(new_event);
                        }
                        Ok(Outcome::Generic(new_event)) => dispatches.push(new_event),
                        Err(err) => {
                            // One bad consequence never aborts the rest.
                            warn!(module = %set.module, error = %err, "[RulesEngine] Skipping malformed consequence");
                        }
                    }
                }
            }
        }

        ProcessedEvent {
            event: current,
            dispatches,
        }
    }

    fn expand_consequence(
        &self,
        template: &Consequence,
        event: &Event,
        state: &dyn StateProvider,
    ) -> Consequence {
        let expander = TokenExpander::new(event, state, &self.config.sdk_version);
        Consequence {
            id: template.id.clone(),
            kind: template.kind.clone(),
            detail: expander.expand(&template.detail),
        }
    }

    fn evaluate_condition<'a>(
        &'a self,
        condition: &'a Condition,
        event: &'a Event,
        state: &'a dyn StateProvider,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            match condition {
                Condition::Group { logic, conditions } => match logic {
                    ConditionLogic::And => {
                        for child in conditions {
                            if !self.evaluate_condition(child, event, state).await {
                                return false;
                            }
                        }
                        true
                    }
                    ConditionLogic::Or => {
                        for child in conditions {
                            if self.evaluate_condition(child, event, state).await {
                                return true;
                            }
                        }
                        false
                    }
                },
                Condition::Matcher {
                    key,
                    matcher,
                    values,
                } => {
                    let expander = TokenExpander::new(event, state, &self.config.sdk_version);
                    let actual = expander.resolve_key(key);
                    matcher.matches(actual.as_ref(), values)
                }
                Condition::Historical {
                    requests,
                    search_type,
                    matcher,
                    value,
                } => {
                    self.evaluate_historical(requests, *search_type, *matcher, *value)
                        .await
                }
            }
        })
    }

    async fn evaluate_historical(
        &self,
        requests: &[HistoricalRequest],
        search_type: SearchType,
        matcher: MatcherKind,
        value: u64,
    ) -> bool {
        let Some(history) = self.history.as_ref() else {
            debug!("[RulesEngine] No history store, historical condition is false");
            return false;
        };

        let lookup = timeout(self.config.history_timeout, async {
            match search_type {
                SearchType::Any => {
                    let mut total = 0u64;
                    for request in requests {
                        let result = history
                            .query(EventHistoryRequest {
                                mask_hash: request.mask_hash(),
                                from_ts: request.from_ts,
                                to_ts: request.to_ts,
                            })
                            .await;
                        total += result.count;
                    }
                    total
                }
                SearchType::Ordered => {
                    // Each request is bounded below by the prior request's
                    // oldest match.
                    let mut lower_bound = 0i64;
                    for (index, request) in requests.iter().enumerate() {
                        let from_ts = if index == 0 {
                            request.from_ts
                        } else {
                            lower_bound
                        };
                        let result = history
                            .query(EventHistoryRequest {
                                mask_hash: request.mask_hash(),
                                from_ts,
                                to_ts: request.to_ts,
                            })
                            .await;
                        if result.count == 0 {
                            return 0;
                        }
                        lower_bound = result.oldest_ts;
                    }
                    u64::from(!requests.is_empty())
                }
            }
        })
        .await;

        match lookup {
            Ok(total) => matcher.matches(Some(&Value::from(total)), &[Value::from(value)]),
            Err(_) => {
                warn!(
                    timeout_ms = self.config.history_timeout.as_millis() as u64,
                    "[RulesEngine] Historical condition timed out, evaluating to false"
                );
                false
            }
        }
    }
}
