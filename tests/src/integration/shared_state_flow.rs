//! # Shared State Flow
//!
//! Versioned shared state between live extensions: publication at event
//! versions, state-change notifications, pending resolution, and rules
//! reading another module's state.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use trellis_hub::{
        EventHub, Extension, ExtensionApi, HubConfig, StateNamespace, StateValue,
    };
    use trellis_rules::{Condition, Consequence, MatcherKind, Rule};
    use trellis_types::{EventSource, EventType};

    use crate::fixtures::{request, wait_until, Recorder};

    /// Extension that publishes its configuration as shared state at the
    /// version of each config request it handles.
    struct ConfigPublisher;

    impl Extension for ConfigPublisher {
        fn name(&self) -> &str {
            "config"
        }

        fn version(&self) -> &str {
            "2.0.0"
        }

        fn on_registered(&mut self, api: &ExtensionApi) {
            let publisher = api.clone();
            api.register_listener(
                EventType::new("configuration"),
                EventSource::request_content(),
                move |event| {
                    let privacy = event.data()["privacy"].clone();
                    publisher.create_shared_state(
                        StateNamespace::Standard,
                        event.number(),
                        StateValue::Data(json!({ "privacy": privacy })),
                    );
                },
            );
        }
    }

    #[tokio::test]
    async fn test_state_publication_fires_change_event() {
        let hub = EventHub::new(HubConfig::default());
        hub.register_extension(|| Box::new(ConfigPublisher), None);
        let (recorder, seen) = Recorder::new("monitor");
        hub.register_extension(move || Box::new(recorder), None);
        hub.finish_registration(None);

        hub.dispatch(request("configuration", json!({"privacy": "optedin"})));

        wait_until(|| {
            seen.lock()
                .iter()
                .any(|e| e.source() == &EventSource::shared_state())
        })
        .await;

        let seen = seen.lock();
        let change = seen
            .iter()
            .find(|e| e.source() == &EventSource::shared_state())
            .unwrap();
        assert_eq!(change.data()["stateowner"], json!("config"));
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_versioned_reads_see_state_at_event_version() {
        let hub = EventHub::new(HubConfig::default());
        hub.register_extension(|| Box::new(ConfigPublisher), None);
        hub.finish_registration(None);
        wait_until(|| hub.is_booted()).await;

        let opted_in = request("configuration", json!({"privacy": "optedin"}));
        let in_version = hub.dispatch(opted_in);
        wait_until(|| hub.has_shared_state("config", StateNamespace::Standard)).await;

        let opted_out = request("configuration", json!({"privacy": "optedout"}));
        let out_version = hub.dispatch(opted_out);
        wait_until(|| {
            hub.shared_state_for("config", StateNamespace::Standard, None, None)
                .data()
                .is_some_and(|d| d["privacy"] == json!("optedout"))
        })
        .await;

        // A read at the earlier version still sees the earlier state.
        let at_first = request("analytics", json!({})).with_number(in_version);
        let state = hub.shared_state_for(
            "config",
            StateNamespace::Standard,
            Some(&at_first),
            Some("analytics"),
        );
        assert_eq!(state.data().map(|d| d["privacy"].clone()), Some(json!("optedin")));

        let at_second = request("analytics", json!({})).with_number(out_version);
        let state =
            hub.shared_state_for("config", StateNamespace::Standard, Some(&at_second), None);
        assert_eq!(state.data().map(|d| d["privacy"].clone()), Some(json!("optedout")));
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_pending_then_update_flow() {
        let hub = EventHub::new(HubConfig::default());
        let (recorder, seen) = Recorder::new("monitor");
        hub.register_extension(move || Box::new(recorder), None);
        hub.finish_registration(None);

        hub.create_shared_state("identity", StateNamespace::Standard, 5, StateValue::Pending);
        wait_until(|| hub.has_shared_state("identity", StateNamespace::Standard)).await;

        // Consumers see the promise, not an absence.
        assert_eq!(
            hub.shared_state_for("identity", StateNamespace::Standard, None, None),
            StateValue::Pending
        );
        assert!(!seen
            .lock()
            .iter()
            .any(|e| e.source() == &EventSource::shared_state()));

        hub.update_shared_state(
            "identity",
            StateNamespace::Standard,
            5,
            StateValue::Data(json!({"mid": "42"})),
        );
        wait_until(|| {
            seen.lock()
                .iter()
                .any(|e| e.source() == &EventSource::shared_state())
        })
        .await;
        assert_eq!(
            hub.shared_state_for("identity", StateNamespace::Standard, None, None)
                .data()
                .map(|d| d["mid"].clone()),
            Some(json!("42"))
        );
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_rules_read_cross_module_state() {
        let hub = EventHub::new(HubConfig::default());
        hub.register_extension(|| Box::new(ConfigPublisher), None);
        let (recorder, seen) = Recorder::new("monitor");
        hub.register_extension(move || Box::new(recorder), None);

        // Analytics events are stamped only while privacy is opted in.
        hub.register_rules(
            "monitor",
            vec![Rule::new(
                Condition::Group {
                    logic: trellis_rules::ConditionLogic::And,
                    conditions: vec![
                        Condition::matcher("~type", MatcherKind::Equals, vec![json!("analytics")]),
                        Condition::matcher(
                            "~state.config/privacy",
                            MatcherKind::Equals,
                            vec![json!("optedin")],
                        ),
                    ],
                },
                vec![Consequence::attach(
                    "c",
                    json!({"collect": true, "consent": "{%~state.config/privacy%}"}),
                )],
            )],
        );
        hub.finish_registration(None);
        wait_until(|| hub.is_booted()).await;

        // Before any config state exists, the condition misses.
        let early = hub.dispatch(request("analytics", json!({})));
        wait_until(|| seen.lock().iter().any(|e| e.number() == early)).await;
        {
            let seen = seen.lock();
            let delivered = seen.iter().find(|e| e.number() == early).unwrap();
            assert!(delivered.data().get("collect").is_none());
        }

        hub.dispatch(request("configuration", json!({"privacy": "optedin"})));
        wait_until(|| hub.has_shared_state("config", StateNamespace::Standard)).await;

        let late = hub.dispatch(request("analytics", json!({})));
        wait_until(|| seen.lock().iter().any(|e| e.number() == late)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let seen = seen.lock();
        let delivered = seen.iter().find(|e| e.number() == late).unwrap();
        assert_eq!(delivered.data()["collect"], json!(true));
        assert_eq!(delivered.data()["consent"], json!("optedin"));
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_xdm_namespace_has_own_change_source() {
        let hub = EventHub::new(HubConfig::default());
        let (recorder, seen) = Recorder::new("monitor");
        hub.register_extension(move || Box::new(recorder), None);
        hub.finish_registration(None);

        hub.create_shared_state(
            "edge",
            StateNamespace::Xdm,
            1,
            StateValue::Data(json!({"identityMap": {}})),
        );

        wait_until(|| {
            seen.lock()
                .iter()
                .any(|e| e.source() == &EventSource::xdm_shared_state())
        })
        .await;
        assert!(!seen
            .lock()
            .iter()
            .any(|e| e.source() == &EventSource::shared_state()));
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_state_is_queryable_not_erroneous() {
        let hub = EventHub::new(HubConfig::default());
        hub.finish_registration(None);
        wait_until(|| hub.is_booted()).await;

        hub.create_shared_state("broken", StateNamespace::Standard, 1, StateValue::Invalid);
        wait_until(|| {
            hub.shared_state_for("broken", StateNamespace::Standard, None, None)
                == StateValue::Invalid
        })
        .await;

        // Invalid is a defined state, not valid data.
        assert!(!hub.has_shared_state("broken", StateNamespace::Standard));
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_symmetric_reads_are_detected_not_broken() {
        let hub = EventHub::new(HubConfig::default());
        hub.finish_registration(None);
        wait_until(|| hub.is_booted()).await;

        hub.create_shared_state(
            "a",
            StateNamespace::Standard,
            1,
            StateValue::Data(json!({"k": 1})),
        );
        hub.create_shared_state(
            "b",
            StateNamespace::Standard,
            2,
            StateValue::Data(json!({"k": 2})),
        );
        wait_until(|| hub.has_shared_state("b", StateNamespace::Standard)).await;

        // Both reads complete regardless of attribution; detection only logs.
        let from_a = hub.shared_state_for("b", StateNamespace::Standard, None, Some("a"));
        let from_b = hub.shared_state_for("a", StateNamespace::Standard, None, Some("b"));
        assert!(from_a.data().is_some());
        assert!(from_b.data().is_some());
        hub.shutdown();
    }
}
