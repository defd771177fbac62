// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wire payload formatting.
//!
//! Every outbound event is a JSON object carrying at minimum `event_id`, an
//! `event` name, an RFC 3339 `timestamp`, and a `properties` map with a
//! `$context` block identifying the SDK. AI-bearing events additionally
//! carry an `ai_data` object. Non-string input/output is serialized to a
//! JSON string before transmission; serialization failure degrades to a
//! best-effort string rather than failing the send.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::types::{
    FeedbackOptions, InteractionData, Sentiment, SignalOptions, SignalType, SpanData, TraceData,
    UserTraits,
};

/// SDK name reported in the `$context` block.
pub(crate) const SDK_NAME: &str = "mizzle";

/// SDK version reported in the `$context` block.
pub(crate) const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// SDK context metadata included on every event.
pub(crate) fn sdk_context() -> Value {
    json!({
        "library": {
            "name": SDK_NAME,
            "version": SDK_VERSION,
        },
        "metadata": {
            "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
        },
    })
}

/// Serialize a value to a compact JSON string, degrading to `to_string` on
/// failure instead of erroring.
pub(crate) fn safe_json_string(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}

/// Convert a value to the string form the API expects. Strings pass through
/// unquoted; everything else is serialized.
pub(crate) fn to_api_string(value: Option<&Value>) -> Value {
    match value {
        None => Value::Null,
        Some(Value::String(s)) => Value::String(s.clone()),
        Some(other) => Value::String(safe_json_string(other)),
    }
}

fn opt_string(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::String(s.clone()),
        None => Value::Null,
    }
}

/// Flatten a finished span into a code attachment on its parent's payload.
fn span_attachment(span: &SpanData) -> Value {
    json!({
        "type": "code",
        "name": format!("{}:{}", span.kind, span.name),
        "value": safe_json_string(&json!({
            "spanId": span.span_id,
            "input": span.input,
            "output": span.output,
            "latencyMs": span.latency_ms,
            "error": span.error,
            "properties": span.properties,
        })),
        "role": "output",
        "language": "json",
    })
}

/// Format a standalone trace for `/v1/events/track`.
pub(crate) fn format_trace(trace: &TraceData) -> Value {
    let mut properties = Map::new();
    properties.insert("$context".to_string(), sdk_context());
    properties.insert("provider".to_string(), json!(trace.provider));
    properties.insert("conversation_id".to_string(), opt_string(&trace.conversation_id));
    properties.insert("latency_ms".to_string(), json!(trace.latency_ms));
    if let Some(tokens) = &trace.tokens {
        properties.insert("input_tokens".to_string(), json!(tokens.input));
        properties.insert("output_tokens".to_string(), json!(tokens.output));
        properties.insert("total_tokens".to_string(), json!(tokens.total));
    }
    if let Some(error) = &trace.error {
        properties.insert("error".to_string(), json!(error));
    }
    for (key, value) in &trace.properties {
        properties.insert(key.clone(), value.clone());
    }

    let mut payload = json!({
        "event_id": trace.trace_id,
        "user_id": opt_string(&trace.user_id),
        "event": "ai_interaction",
        "timestamp": trace.start_time.to_rfc3339(),
        "properties": Value::Object(properties),
        "ai_data": {
            "model": trace.model,
            "input": to_api_string(trace.input.as_ref()),
            "output": to_api_string(trace.output.as_ref()),
            "convo_id": opt_string(&trace.conversation_id),
        },
    });

    if !trace.tool_calls.is_empty() {
        let attachments: Vec<Value> = trace
            .tool_calls
            .iter()
            .map(|tc| {
                json!({
                    "type": "code",
                    "name": format!("tool:{}", tc.name),
                    "value": safe_json_string(&json!({
                        "arguments": tc.arguments,
                        "result": tc.result,
                    })),
                    "role": "output",
                    "language": "json",
                })
            })
            .collect();
        payload["attachments"] = Value::Array(attachments);
    }

    payload
}

/// Format a finished interaction (with its spans flattened to attachments)
/// for `/v1/events/track`.
pub(crate) fn format_interaction(
    interaction: &InteractionData,
    latency_ms: i64,
    error: Option<&str>,
) -> Value {
    let mut properties = Map::new();
    properties.insert("$context".to_string(), sdk_context());
    properties.insert("latency_ms".to_string(), json!(latency_ms));
    properties.insert("span_count".to_string(), json!(interaction.spans.len()));
    if let Some(error) = error {
        properties.insert("error".to_string(), json!(error));
    }
    for (key, value) in &interaction.properties {
        properties.insert(key.clone(), value.clone());
    }

    let mut attachments: Vec<Value> = interaction
        .attachments
        .iter()
        .map(|a| serde_json::to_value(a).unwrap_or(Value::Null))
        .collect();
    attachments.extend(interaction.spans.iter().map(span_attachment));

    let mut ai_data = Map::new();
    ai_data.insert("input".to_string(), opt_string(&interaction.input));
    ai_data.insert("output".to_string(), opt_string(&interaction.output));
    ai_data.insert("convo_id".to_string(), opt_string(&interaction.conversation_id));
    if let Some(model) = &interaction.model {
        ai_data.insert("model".to_string(), json!(model));
    }

    let mut payload = json!({
        "event_id": interaction.interaction_id,
        "user_id": opt_string(&interaction.user_id),
        "event": interaction.event,
        "timestamp": interaction.start_time.to_rfc3339(),
        "properties": Value::Object(properties),
        "ai_data": Value::Object(ai_data),
    });

    if !attachments.is_empty() {
        payload["attachments"] = Value::Array(attachments);
    }

    payload
}

/// Format feedback for `/v1/signals/track`.
///
/// Sentiment follows the score when one is given (0.5 and above is
/// positive), otherwise the thumbs direction.
pub(crate) fn format_feedback(event_id: &str, feedback: &FeedbackOptions) -> Value {
    let (signal_name, sentiment) = match feedback.score {
        Some(score) => {
            let sentiment = Sentiment::from_score(score);
            let name = match sentiment {
                Sentiment::Positive => "positive",
                Sentiment::Negative => "negative",
            };
            (name.to_string(), sentiment)
        }
        None => match feedback.kind {
            Some(kind) => {
                let sentiment = match kind {
                    crate::types::FeedbackKind::ThumbsUp => Sentiment::Positive,
                    crate::types::FeedbackKind::ThumbsDown => Sentiment::Negative,
                };
                (kind.to_string(), sentiment)
            }
            None => ("negative".to_string(), Sentiment::Negative),
        },
    };

    let mut properties = Map::new();
    properties.insert("score".to_string(), json!(feedback.score));
    properties.insert("comment".to_string(), opt_string(&feedback.comment));
    for (key, value) in &feedback.properties {
        properties.insert(key.clone(), value.clone());
    }

    let timestamp = feedback.timestamp.unwrap_or_else(Utc::now);
    let signal_type = feedback.signal_type.unwrap_or(SignalType::Feedback);

    let mut payload = json!({
        "event_id": event_id,
        "signal_name": signal_name,
        "sentiment": sentiment,
        "signal_type": signal_type,
        "timestamp": timestamp.to_rfc3339(),
        "properties": Value::Object(properties),
    });

    if let Some(attachment_id) = &feedback.attachment_id {
        payload["attachment_id"] = json!(attachment_id);
    }

    payload
}

/// Format a full-control signal for `/v1/signals/track`.
pub(crate) fn format_signal(options: &SignalOptions) -> Value {
    let mut properties = Map::new();
    if let Some(comment) = &options.comment {
        properties.insert("comment".to_string(), json!(comment));
    }
    if let Some(after) = &options.after {
        properties.insert("after".to_string(), json!(after));
    }
    for (key, value) in &options.properties {
        properties.insert(key.clone(), value.clone());
    }

    let mut payload = json!({
        "event_id": options.event_id,
        "signal_name": options.name,
        "signal_type": options.signal_type,
        "sentiment": options.sentiment.unwrap_or(Sentiment::Negative),
        "timestamp": Utc::now().to_rfc3339(),
        "properties": Value::Object(properties),
    });

    if let Some(attachment_id) = &options.attachment_id {
        payload["attachment_id"] = json!(attachment_id);
    }

    payload
}

/// Format an identify payload for `/v1/users/identify`.
pub(crate) fn format_identify(user_id: &str, traits: &UserTraits) -> Value {
    json!({
        "user_id": user_id,
        "traits": traits.to_value(),
    })
}

/// Timestamp helper: milliseconds between two instants, never negative.
pub(crate) fn latency_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_milliseconds().max(0)
}
