//! # Rules Flow
//!
//! Rule evaluation through a live hub: attach/modify transformations as
//! listeners observe them, token expansion, chained dispatch cutoff, and
//! historical conditions against the event-history store.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use trellis_history::InMemoryEventHistory;
    use trellis_hub::{EventHub, HubConfig};
    use trellis_rules::{
        Condition, Consequence, HistoricalRequest, MatcherKind, Rule, SearchType,
    };
    use trellis_types::{EventBuilder, EventSource, EventType};

    use crate::fixtures::{request, wait_until, Recorder};

    fn hub_with_recorder() -> (EventHub, Arc<parking_lot::Mutex<Vec<trellis_types::Event>>>) {
        let hub = EventHub::new(HubConfig::default());
        let (recorder, seen) = Recorder::new("monitor");
        hub.register_extension(move || Box::new(recorder), None);
        (hub, seen)
    }

    #[tokio::test]
    async fn test_attach_consequence_reaches_listeners() {
        let (hub, seen) = hub_with_recorder();
        hub.register_rules(
            "monitor",
            vec![Rule::new(
                Condition::matcher("action", MatcherKind::Equals, vec![json!("launch")]),
                vec![Consequence::attach("c", json!({"a": 2, "b": 2}))],
            )],
        );
        hub.finish_registration(None);

        let number = hub.dispatch(request("analytics", json!({"action": "launch", "a": 1})));
        wait_until(|| seen.lock().iter().any(|e| e.number() == number)).await;

        let seen = seen.lock();
        let delivered = seen.iter().find(|e| e.number() == number).unwrap();
        // Existing key preserved, new key merged in.
        assert_eq!(delivered.data()["a"], json!(1));
        assert_eq!(delivered.data()["b"], json!(2));
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_modify_consequence_overwrites_and_deletes() {
        let (hub, seen) = hub_with_recorder();
        hub.register_rules(
            "monitor",
            vec![Rule::new(
                Condition::always(),
                vec![Consequence::modify("c", json!({"a": 2, "drop": null}))],
            )],
        );
        hub.finish_registration(None);

        let number = hub.dispatch(request("analytics", json!({"a": 1, "drop": "me"})));
        wait_until(|| seen.lock().iter().any(|e| e.number() == number)).await;

        let seen = seen.lock();
        let delivered = seen.iter().find(|e| e.number() == number).unwrap();
        assert_eq!(delivered.data()["a"], json!(2));
        assert!(delivered.data().get("drop").is_none());
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_token_expansion_round_trip() {
        let (hub, seen) = hub_with_recorder();
        hub.register_rules(
            "monitor",
            vec![Rule::new(
                Condition::always(),
                vec![Consequence::attach(
                    "c",
                    json!({"label": "{%~type%}-{%~source%}", "missing": "[{%nope%}]"}),
                )],
            )],
        );
        hub.finish_registration(None);

        let number = hub.dispatch(request("analytics", json!({})));
        wait_until(|| seen.lock().iter().any(|e| e.number() == number)).await;

        let seen = seen.lock();
        let delivered = seen.iter().find(|e| e.number() == number).unwrap();
        assert_eq!(delivered.data()["label"], json!("analytics-request-content"));
        assert_eq!(delivered.data()["missing"], json!("[]"));
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_dispatch_chain_stops_at_limit() {
        let (hub, seen) = hub_with_recorder();
        // Every analytics request dispatches another analytics request:
        // an intentional cycle that only the chain budget can stop.
        hub.register_rules(
            "monitor",
            vec![Rule::new(
                Condition::matcher("~source", MatcherKind::Equals, vec![json!("request-content")]),
                vec![Consequence::dispatch_copy(
                    "c",
                    &EventType::new("analytics"),
                    &EventSource::request_content(),
                )],
            )],
        );
        hub.finish_registration(None);

        hub.dispatch(request("analytics", json!({})));

        // Boot event + trigger + exactly 100 chained dispatches.
        wait_until(|| seen.lock().len() >= 102).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().len(), 102);
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_generic_consequence_becomes_outbound_event() {
        let (hub, seen) = hub_with_recorder();
        hub.register_rules(
            "monitor",
            vec![Rule::new(
                Condition::matcher("~type", MatcherKind::Equals, vec![json!("analytics")]),
                vec![Consequence {
                    id: "pii-1".to_string(),
                    kind: "pii".to_string(),
                    detail: json!({"url": "https://collect.example/{%user%}"}),
                }],
            )],
        );
        hub.finish_registration(None);

        hub.dispatch(request("analytics", json!({"user": "ada"})));
        wait_until(|| {
            seen.lock()
                .iter()
                .any(|e| e.event_type() == &EventType::rules_engine())
        })
        .await;

        let seen = seen.lock();
        let outbound = seen
            .iter()
            .find(|e| e.event_type() == &EventType::rules_engine())
            .unwrap();
        assert_eq!(
            outbound.data()["triggeredconsequence"]["detail"]["url"],
            json!("https://collect.example/ada")
        );
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_masked_events_feed_historical_conditions() {
        let history = Arc::new(InMemoryEventHistory::new());
        let hub = EventHub::with_history(HubConfig::default(), history.clone());
        let (recorder, seen) = Recorder::new("monitor");
        hub.register_extension(move || Box::new(recorder), None);

        let mut keys = BTreeMap::new();
        keys.insert("action".to_string(), json!("purchase"));
        hub.register_rules(
            "monitor",
            vec![Rule::new(
                Condition::Historical {
                    requests: vec![HistoricalRequest::new(keys)],
                    search_type: SearchType::Any,
                    matcher: MatcherKind::GreaterThanOrEqual,
                    value: 2,
                },
                vec![Consequence::attach("c", json!({"repeat_buyer": true}))],
            )],
        );
        hub.finish_registration(None);

        let purchase = || {
            EventBuilder::new(
                "purchase",
                EventType::new("analytics"),
                EventSource::request_content(),
            )
            .data(json!({"action": "purchase", "amount": 5}))
            .mask(vec!["action".to_string()])
            .build()
        };

        // First purchase: no prior history, condition misses.
        let first = hub.dispatch(purchase());
        wait_until(|| seen.lock().iter().any(|e| e.number() == first)).await;
        wait_until(|| history.len() == 1).await;
        {
            let seen = seen.lock();
            let delivered = seen.iter().find(|e| e.number() == first).unwrap();
            assert!(delivered.data().get("repeat_buyer").is_none());
        }

        // Third purchase: two recorded occurrences, condition hits.
        let second = hub.dispatch(purchase());
        wait_until(|| seen.lock().iter().any(|e| e.number() == second)).await;
        wait_until(|| history.len() == 2).await;
        let third = hub.dispatch(purchase());
        wait_until(|| seen.lock().iter().any(|e| e.number() == third)).await;

        let seen = seen.lock();
        let delivered = seen.iter().find(|e| e.number() == third).unwrap();
        assert_eq!(delivered.data()["repeat_buyer"], json!(true));
        hub.shutdown();
    }
}
