// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core type definitions for the Mizzle SDK.
//!
//! The data model distinguishes three traced shapes:
//!
//! - [`InteractionData`] - one logical user-facing unit of work, carrying an
//!   ordered list of child [`SpanData`]
//! - [`SpanData`] - a nested tool or AI operation inside an interaction
//! - [`TraceData`] - a standalone AI call with no parent interaction,
//!   addressed directly to the transport
//!
//! Plus the option structs used by the client surface (begin/finish,
//! feedback, signals) and the user-identity types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a traced span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    /// A tool invocation (search, database lookup, shell command, ...).
    Tool,
    /// A model call.
    Ai,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tool => write!(f, "tool"),
            Self::Ai => write!(f, "ai"),
        }
    }
}

/// AI provider identity carried on standalone traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Google,
    Bedrock,
    Unknown,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::Google => write!(f, "google"),
            Self::Bedrock => write!(f, "bedrock"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Token usage for an AI call. All counts are independently optional since
/// providers report them inconsistently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: Option<u64>,
    pub output: Option<u64>,
    pub total: Option<u64>,
}

impl TokenUsage {
    /// Create usage with all three counts present.
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input: Some(input),
            output: Some(output),
            total: Some(input + output),
        }
    }
}

/// A tool call made by the model during an AI call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallInfo {
    /// Tool name as reported by the provider.
    pub name: String,
    /// Arguments the model supplied.
    pub arguments: Option<Value>,
    /// Result returned to the model, if captured.
    pub result: Option<Value>,
}

impl ToolCallInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: None,
            result: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = Some(arguments);
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }
}

/// Attachment content kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Code,
    Text,
    Image,
    Iframe,
}

/// Whether an attachment belongs to the input or output side of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentRole {
    Input,
    Output,
}

/// An attachment on an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub value: String,
    pub role: AttachmentRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Stable id so signals can target this attachment later.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
}

impl Attachment {
    /// Create a text attachment.
    pub fn text(value: impl Into<String>, role: AttachmentRole) -> Self {
        Self {
            kind: AttachmentKind::Text,
            value: value.into(),
            role,
            name: None,
            language: None,
            attachment_id: None,
        }
    }

    /// Create a code attachment.
    pub fn code(
        name: impl Into<String>,
        value: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            kind: AttachmentKind::Code,
            value: value.into(),
            role: AttachmentRole::Output,
            name: Some(name.into()),
            language: Some(language.into()),
            attachment_id: None,
        }
    }

    pub fn with_attachment_id(mut self, id: impl Into<String>) -> Self {
        self.attachment_id = Some(id.into());
        self
    }
}

/// A nested operation (tool or AI call) inside an interaction.
///
/// Once finalized (`end_time` set) a span is only touched by the plugin
/// pipeline, which runs exactly once before the span is stored or sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanData {
    pub span_id: String,
    /// Id of the owning interaction, if any. Always equals the parent
    /// interaction's id once the span has been appended to it.
    pub parent_id: Option<String>,
    pub name: String,
    pub kind: SpanKind,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// `end_time - start_time` in whole milliseconds.
    pub latency_ms: Option<i64>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub properties: HashMap<String, Value>,
}

impl SpanData {
    /// Create an unfinished span starting now.
    pub fn start(
        span_id: impl Into<String>,
        name: impl Into<String>,
        kind: SpanKind,
        parent_id: Option<String>,
    ) -> Self {
        Self {
            span_id: span_id.into(),
            parent_id,
            name: name.into(),
            kind,
            start_time: Utc::now(),
            end_time: None,
            latency_ms: None,
            input: None,
            output: None,
            error: None,
            properties: HashMap::new(),
        }
    }

    /// Finalize the span. An error wins over output: a failed span never
    /// carries a successful output value.
    pub fn finalize(&mut self, end_time: DateTime<Utc>, error: Option<String>) {
        let end_time = end_time.max(self.start_time);
        self.end_time = Some(end_time);
        self.latency_ms = Some((end_time - self.start_time).num_milliseconds());
        if error.is_some() {
            self.error = error;
            self.output = None;
        }
    }
}

/// A standalone AI call with no parent interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceData {
    pub trace_id: String,
    pub provider: ProviderKind,
    pub model: String,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub latency_ms: Option<i64>,
    pub tokens: Option<TokenUsage>,
    pub tool_calls: Vec<ToolCallInfo>,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub error: Option<String>,
    pub properties: HashMap<String, Value>,
}

/// State of one logical unit of work, owning its child spans.
///
/// The id is immutable once created. Finalization happens at most once; the
/// client enforces idempotence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionData {
    pub interaction_id: String,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub model: Option<String>,
    pub event: String,
    pub properties: HashMap<String, Value>,
    pub attachments: Vec<Attachment>,
    pub spans: Vec<SpanData>,
}

/// User traits attached to an identify event. Unknown traits go in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserTraits {
    pub name: Option<String>,
    pub email: Option<String>,
    pub plan: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl UserTraits {
    /// Serialize to a sparse JSON object, omitting unset fields.
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        if let Some(name) = &self.name {
            map.insert("name".to_string(), Value::String(name.clone()));
        }
        if let Some(email) = &self.email {
            map.insert("email".to_string(), Value::String(email.clone()));
        }
        if let Some(plan) = &self.plan {
            map.insert("plan".to_string(), Value::String(plan.clone()));
        }
        for (k, v) in &self.extra {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }
}

/// Thumbs-style feedback direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    ThumbsUp,
    ThumbsDown,
}

impl std::fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ThumbsUp => write!(f, "thumbs_up"),
            Self::ThumbsDown => write!(f, "thumbs_down"),
        }
    }
}

/// Signal category on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Default,
    Feedback,
    Edit,
    Standard,
}

/// Sentiment attached to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sentiment {
    Positive,
    Negative,
}

impl Sentiment {
    /// Map a numeric score to a sentiment. Scores of 0.5 and above are
    /// positive.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.5 {
            Self::Positive
        } else {
            Self::Negative
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Positive => write!(f, "POSITIVE"),
            Self::Negative => write!(f, "NEGATIVE"),
        }
    }
}

/// Options for sending feedback on a prior trace or interaction.
#[derive(Debug, Clone, Default)]
pub struct FeedbackOptions {
    pub kind: Option<FeedbackKind>,
    /// Score in `[0.0, 1.0]`. Takes precedence over `kind` for sentiment.
    pub score: Option<f64>,
    pub comment: Option<String>,
    pub signal_type: Option<SignalType>,
    pub attachment_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub properties: HashMap<String, Value>,
}

impl FeedbackOptions {
    pub fn thumbs_up() -> Self {
        Self {
            kind: Some(FeedbackKind::ThumbsUp),
            ..Default::default()
        }
    }

    pub fn thumbs_down() -> Self {
        Self {
            kind: Some(FeedbackKind::ThumbsDown),
            ..Default::default()
        }
    }

    pub fn score(score: f64) -> Self {
        Self {
            score: Some(score),
            ..Default::default()
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Options for tracking a signal with full control.
#[derive(Debug, Clone)]
pub struct SignalOptions {
    /// Trace or interaction id the signal refers to.
    pub event_id: String,
    /// Signal name, e.g. "edit" or "hallucination_detected".
    pub name: String,
    pub signal_type: SignalType,
    pub sentiment: Option<Sentiment>,
    pub comment: Option<String>,
    /// Corrected text for edit signals.
    pub after: Option<String>,
    pub attachment_id: Option<String>,
    pub properties: HashMap<String, Value>,
}

impl SignalOptions {
    pub fn new(event_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            name: name.into(),
            signal_type: SignalType::Default,
            sentiment: None,
            comment: None,
            after: None,
            attachment_id: None,
            properties: HashMap::new(),
        }
    }

    pub fn with_type(mut self, signal_type: SignalType) -> Self {
        self.signal_type = signal_type;
        self
    }

    pub fn with_sentiment(mut self, sentiment: Sentiment) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_after(mut self, after: impl Into<String>) -> Self {
        self.after = Some(after.into());
        self
    }
}

/// Options for [`crate::Mizzle::begin`].
#[derive(Debug, Clone, Default)]
pub struct BeginOptions {
    /// Caller-supplied interaction id. Generated when absent.
    pub event_id: Option<String>,
    pub user_id: Option<String>,
    /// Event name. Defaults to "interaction".
    pub event: Option<String>,
    pub input: Option<String>,
    pub model: Option<String>,
    pub conversation_id: Option<String>,
    pub properties: HashMap<String, Value>,
    pub attachments: Vec<Attachment>,
}

impl BeginOptions {
    pub fn event(name: impl Into<String>) -> Self {
        Self {
            event: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Options for finishing an interaction.
#[derive(Debug, Clone, Default)]
pub struct FinishOptions {
    pub output: Option<String>,
    pub properties: HashMap<String, Value>,
    pub attachments: Vec<Attachment>,
}

impl FinishOptions {
    pub fn output(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            ..Default::default()
        }
    }
}
