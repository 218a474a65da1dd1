//! # Response Flow
//!
//! Request/response correlation between extensions: one-time listeners,
//! pair-id matching, and timeout exclusivity.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use trellis_hub::{EventHub, Extension, ExtensionApi, HubConfig};
    use trellis_types::{EventBuilder, EventSource, EventType, HubError};

    use crate::fixtures::{request, wait_until};

    /// Extension answering identity requests with a canned profile.
    struct IdentityResponder;

    impl Extension for IdentityResponder {
        fn name(&self) -> &str {
            "identity"
        }

        fn on_registered(&mut self, api: &ExtensionApi) {
            let dispatcher = api.clone();
            api.register_listener(
                EventType::new("identity"),
                EventSource::request_content(),
                move |request| {
                    let response = EventBuilder::new(
                        "identity response",
                        EventType::new("identity"),
                        EventSource::response_content(),
                    )
                    .data(json!({"mid": "42"}))
                    .in_response_to(request)
                    .build();
                    dispatcher.dispatch(response);
                },
            );
        }
    }

    #[tokio::test]
    async fn test_response_reaches_exactly_one_callback() {
        let hub = EventHub::new(HubConfig::default());
        hub.register_extension(|| Box::new(IdentityResponder), None);
        hub.finish_registration(None);

        let responses = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let response_count = Arc::clone(&responses);
        let error_count = Arc::clone(&errors);

        hub.dispatch_with_response_callback(
            request("identity", json!({})),
            None,
            move |event| {
                assert_eq!(event.data()["mid"], json!("42"));
                response_count.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                error_count.fetch_add(1, Ordering::SeqCst);
            },
        );

        wait_until(|| responses.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(responses.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out_exactly_once() {
        let hub = EventHub::new(HubConfig::default());
        hub.finish_registration(None);

        let responses = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let response_count = Arc::clone(&responses);
        let error_count = Arc::clone(&errors);

        hub.dispatch_with_response_callback(
            request("identity", json!({})),
            Some(Duration::from_millis(40)),
            move |_| {
                response_count.fetch_add(1, Ordering::SeqCst);
            },
            move |err| {
                assert!(matches!(err, HubError::CallbackTimeout { .. }));
                error_count.fetch_add(1, Ordering::SeqCst);
            },
        );

        wait_until(|| errors.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(responses.load(Ordering::SeqCst), 0);
        hub.shutdown();
    }

    #[tokio::test]
    async fn test_pair_id_matching_ignores_type_and_source() {
        let hub = EventHub::new(HubConfig::default());
        hub.finish_registration(None);

        let responses = Arc::new(AtomicUsize::new(0));
        let response_count = Arc::clone(&responses);
        let request_event = request("identity", json!({}));
        let pair = request_event.response_pair_id().to_string();

        hub.dispatch_with_response_callback(
            request_event,
            None,
            move |_| {
                response_count.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {},
        );

        // Respond with a completely different type/source; only the pair
        // id matters.
        let response = EventBuilder::new(
            "odd response",
            EventType::new("lifecycle"),
            EventSource::new("some-other-source"),
        )
        .pair_id(pair)
        .build();
        hub.dispatch(response);

        wait_until(|| responses.load(Ordering::SeqCst) == 1).await;
        hub.shutdown();
    }
}
