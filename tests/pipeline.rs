// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end pipeline tests over a recording backend: client -> plugin
//! pipeline -> transport -> HTTP bodies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use mizzle::{
    AiCallOptions, AiCallOutput, BeginOptions, FeedbackOptions, FinishOptions, HttpBackend,
    Mizzle, MizzleConfig, Plugin, ProviderKind, SignalOptions, SignalType, SpanData, SpanKind,
    TokenUsage, UserTraits,
};

/// Backend that records every request and answers with a scripted status
/// sequence (default: always 200).
struct FakeBackend {
    calls: Mutex<Vec<(String, Value)>>,
    responses: Mutex<Vec<anyhow::Result<u16>>>,
    attempts: AtomicUsize,
}

impl FakeBackend {
    fn ok() -> Arc<Self> {
        Self::with_responses(Vec::new())
    }

    fn with_responses(mut responses: Vec<anyhow::Result<u16>>) -> Arc<Self> {
        responses.reverse();
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            responses: Mutex::new(responses),
            attempts: AtomicUsize::new(0),
        })
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    fn bodies_for(&self, endpoint: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(url, _)| url.ends_with(endpoint))
            .flat_map(|(_, body)| match body {
                Value::Array(items) => items,
                other => vec![other],
            })
            .collect()
    }
}

#[async_trait]
impl HttpBackend for FakeBackend {
    async fn post(&self, url: String, body: Value, _api_key: String) -> anyhow::Result<u16> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push((url, body));
        self.responses.lock().unwrap().pop().unwrap_or(Ok(200))
    }
}

fn client_with(backend: Arc<FakeBackend>, config: MizzleConfig) -> Mizzle {
    Mizzle::with_backend(config, backend)
}

fn base_config() -> MizzleConfig {
    MizzleConfig::new("test-key")
        .with_base_url("http://backend.test")
        .with_flush_interval(Duration::from_secs(60))
}

#[tokio::test]
async fn checkout_interaction_produces_one_payload_with_span_attachment() {
    let backend = FakeBackend::ok();
    let client = client_with(backend.clone(), base_config());

    let interaction = client.begin(BeginOptions::event("checkout"));
    let mut span = client.start_span("lookup_price", SpanKind::Tool);
    span.record_input("sku-42");
    span.record_output(1299);
    span.end(None);
    interaction.finish_with(FinishOptions::output("done"));

    client.flush().await;

    let events = backend.bodies_for("/v1/events/track");
    assert_eq!(events.len(), 1);
    let payload = &events[0];
    assert_eq!(payload["event"], "checkout");
    assert_eq!(payload["ai_data"]["output"], "done");

    let attachments = payload["attachments"].as_array().unwrap();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0]["name"], "tool:lookup_price");

    let span_value: Value =
        serde_json::from_str(attachments[0]["value"].as_str().unwrap()).unwrap();
    assert_eq!(span_value["input"], "sku-42");
    assert_eq!(span_value["output"], 1299);
}

#[tokio::test]
async fn finishing_twice_sends_exactly_one_interaction() {
    let backend = FakeBackend::ok();
    let client = client_with(backend.clone(), base_config());

    let interaction = client.begin(BeginOptions::event("checkout"));
    interaction.finish();
    interaction.finish();
    client.flush().await;

    assert_eq!(backend.bodies_for("/v1/events/track").len(), 1);
}

#[tokio::test]
async fn feedback_scores_map_to_sentiment() {
    let backend = FakeBackend::ok();
    let client = client_with(backend.clone(), base_config());

    client.feedback("trace_1", FeedbackOptions::score(0.75));
    client.feedback("trace_2", FeedbackOptions::score(0.3));
    client.feedback("trace_3", FeedbackOptions::score(0.5));
    client.flush().await;

    let signals = backend.bodies_for("/v1/signals/track");
    assert_eq!(signals.len(), 3);
    assert_eq!(signals[0]["sentiment"], "POSITIVE");
    assert_eq!(signals[1]["sentiment"], "NEGATIVE");
    // Boundary score of 0.5 is positive.
    assert_eq!(signals[2]["sentiment"], "POSITIVE");
}

#[tokio::test]
async fn signals_and_events_go_to_separate_endpoints() {
    let backend = FakeBackend::ok();
    let client = client_with(backend.clone(), base_config());

    let call = client.start_ai_call(
        AiCallOptions::new(ProviderKind::OpenAi, "gpt-4o").with_input("Hello"),
    );
    let trace_id = call.trace_id().to_string();
    call.succeed(AiCallOutput::text("Hi!").with_tokens(TokenUsage::new(10, 5)));

    client.track_signal(
        SignalOptions::new(trace_id.as_str(), "edit")
            .with_type(SignalType::Edit)
            .with_after("corrected text"),
    );
    client.identify(
        "user_1",
        Some(UserTraits {
            email: Some("test@example.com".to_string()),
            ..Default::default()
        }),
    );
    client.flush().await;

    assert_eq!(backend.bodies_for("/v1/events/track").len(), 1);
    let signals = backend.bodies_for("/v1/signals/track");
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0]["event_id"], trace_id.as_str());
    assert_eq!(signals[0]["properties"]["after"], "corrected text");

    let identifies = backend.bodies_for("/v1/users/identify");
    assert_eq!(identifies.len(), 1);
    assert_eq!(identifies[0]["user_id"], "user_1");
}

#[tokio::test]
async fn queue_overflow_drops_oldest_keeps_order() {
    let backend = FakeBackend::ok();
    let client = client_with(
        backend.clone(),
        base_config().with_max_queue_size(3),
    );

    for i in 1..=4 {
        let call = client.start_ai_call(
            AiCallOptions::new(ProviderKind::OpenAi, "gpt-4o")
                .with_trace_id(format!("trace_{i}")),
        );
        call.succeed(AiCallOutput::text("ok"));
    }
    client.flush().await;

    let events = backend.bodies_for("/v1/events/track");
    let ids: Vec<&str> = events
        .iter()
        .map(|e| e["event_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["trace_2", "trace_3", "trace_4"]);
}

#[tokio::test]
async fn oversized_event_never_reaches_a_batch() {
    let backend = FakeBackend::ok();
    let client = client_with(backend.clone(), base_config());

    let call = client.start_ai_call(
        AiCallOptions::new(ProviderKind::OpenAi, "gpt-4o")
            .with_trace_id("trace_big")
            .with_input("x".repeat(2 * 1024 * 1024)),
    );
    call.succeed(AiCallOutput::text("ok"));

    let call = client.start_ai_call(
        AiCallOptions::new(ProviderKind::OpenAi, "gpt-4o").with_trace_id("trace_small"),
    );
    call.succeed(AiCallOutput::text("ok"));
    client.flush().await;

    let events = backend.bodies_for("/v1/events/track");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event_id"], "trace_small");
}

#[tokio::test]
async fn failed_sends_retry_then_succeed() {
    let backend = FakeBackend::with_responses(vec![Ok(500), Ok(500), Ok(200)]);
    let client = client_with(backend.clone(), base_config());

    let call = client.start_ai_call(AiCallOptions::new(ProviderKind::OpenAi, "gpt-4o"));
    call.succeed(AiCallOutput::text("ok"));
    client.flush().await;

    // Two failures then a success: exactly three attempts, one delivered batch.
    assert_eq!(backend.attempts(), 3);
    assert_eq!(backend.calls().len(), 3);
}

#[tokio::test]
async fn retry_budget_exhaustion_drops_silently() {
    let backend = FakeBackend::with_responses(vec![
        Err(anyhow::anyhow!("refused")),
        Err(anyhow::anyhow!("refused")),
        Err(anyhow::anyhow!("refused")),
    ]);
    let client = client_with(backend.clone(), base_config().with_max_retries(2));

    let call = client.start_ai_call(AiCallOptions::new(ProviderKind::OpenAi, "gpt-4o"));
    call.succeed(AiCallOutput::text("ok"));
    // Exhausts the budget without raising.
    client.flush().await;
    assert_eq!(backend.attempts(), 3);

    // The batch is gone; nothing re-sends later.
    client.flush().await;
    assert_eq!(backend.attempts(), 3);
}

#[tokio::test]
async fn plugin_panic_does_not_stop_later_plugins_or_delivery() {
    struct Panicking;

    #[async_trait]
    impl Plugin for Panicking {
        fn name(&self) -> &str {
            "panics"
        }

        fn on_span(&self, _span: &mut SpanData) {
            panic!("intentional test panic");
        }
    }

    struct Tagging;

    #[async_trait]
    impl Plugin for Tagging {
        fn name(&self) -> &str {
            "tags"
        }

        fn on_span(&self, span: &mut SpanData) {
            span.properties
                .insert("tagged".to_string(), serde_json::json!(true));
        }
    }

    let backend = FakeBackend::ok();
    let config = base_config()
        .with_plugin(Arc::new(Panicking))
        .with_plugin(Arc::new(Tagging));
    let client = client_with(backend.clone(), config);

    let mut span = client.start_span("lookup", SpanKind::Tool);
    span.end(None);
    client.flush().await;

    // The second plugin ran and the span reached the transport.
    let events = backend.bodies_for("/v1/events/track");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["properties"]["tagged"], true);
}

#[tokio::test]
async fn redaction_runs_before_export() {
    let backend = FakeBackend::ok();
    let client = client_with(backend.clone(), base_config().with_redact_pii(true));

    let call = client.start_ai_call(
        AiCallOptions::new(ProviderKind::OpenAi, "gpt-4o")
            .with_input("my ssn is 123-45-6789"),
    );
    call.succeed(AiCallOutput::text("noted, alice@example.com"));
    client.flush().await;

    let events = backend.bodies_for("/v1/events/track");
    let input = events[0]["ai_data"]["input"].as_str().unwrap();
    let output = events[0]["ai_data"]["output"].as_str().unwrap();
    assert!(!input.contains("123-45-6789"));
    assert!(!output.contains("alice@example.com"));
}

#[tokio::test]
async fn debounced_flush_delivers_without_manual_flush() {
    let backend = FakeBackend::ok();
    let client = client_with(
        backend.clone(),
        base_config().with_flush_interval(Duration::from_millis(20)),
    );

    let call = client.start_ai_call(AiCallOptions::new(ProviderKind::OpenAi, "gpt-4o"));
    call.succeed(AiCallOutput::text("ok"));
    assert_eq!(backend.attempts(), 0);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(backend.attempts(), 1);
}

#[tokio::test]
async fn close_flushes_pending_events() {
    let backend = FakeBackend::ok();
    let client = client_with(backend.clone(), base_config());

    let interaction = client.begin(BeginOptions::event("checkout"));
    interaction.finish();
    client.close().await;

    assert_eq!(backend.bodies_for("/v1/events/track").len(), 1);
}

#[tokio::test]
async fn resume_unknown_interaction_is_an_error() {
    let backend = FakeBackend::ok();
    let client = client_with(backend.clone(), base_config());

    assert!(client.resume_interaction("trace_unknown").is_err());
}

#[tokio::test]
async fn resume_across_tasks_attaches_spans_to_same_interaction() {
    let backend = FakeBackend::ok();
    let client = client_with(backend.clone(), base_config());

    let interaction = client.begin(BeginOptions::event("webhook"));
    let id = interaction.id().to_string();

    // A separate task resumes the interaction by id and records a span
    // there, as a webhook continuation would.
    let worker = {
        let client = client.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let resumed = client.resume_interaction(&id).unwrap();
            let mut span = client.start_span("load_order", SpanKind::Tool);
            span.end(None);
            resumed.set_output("handled");
        })
    };
    worker.await.unwrap();

    client.resume_interaction(&id).unwrap().finish();
    client.flush().await;

    let events = backend.bodies_for("/v1/events/track");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["ai_data"]["output"], "handled");
    assert_eq!(events[0]["properties"]["span_count"], 1);
}
