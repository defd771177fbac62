// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Provider wrapper contract.
//!
//! Per-provider adapters (the code that knows how to pull text, token
//! counts, and tool calls out of an OpenAI/Anthropic/Gemini/Bedrock
//! response) sit outside this crate. What they must do is fixed, and this
//! module is the surface they drive:
//!
//! 1. call [`crate::Mizzle::start_ai_call`] *before* the underlying request -
//!    this fixes the trace id, records the start time, and captures the
//!    call chain's current interaction;
//! 2. perform the provider call;
//! 3. on completion hand the extracted [`AiCallOutput`] to
//!    [`AiCall::succeed`]; on any error call [`AiCall::fail`] with the
//!    message. Both paths finalize - a wrapper never leaves a dangling
//!    unfinished span, and dropping an unfinished guard finalizes it with an
//!    error as a safety net.
//!
//! Finalization runs the plugin pipeline exactly once, then either appends
//! the finished unit as a span to the parent interaction or sends it to the
//! transport as a standalone trace.
//!
//! For streamed responses use [`AiCall::streaming`]: push output deltas as
//! they arrive and finalize only when the stream is fully consumed
//! ([`StreamingAiCall::finish`]) or aborted ([`StreamingAiCall::abort`],
//! which still reports the partial output collected so far).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::client::{InteractionRef, Mizzle};
use crate::types::{ProviderKind, SpanData, SpanKind, TokenUsage, ToolCallInfo, TraceData};

/// Options for starting a traced AI call.
#[derive(Debug, Clone)]
pub struct AiCallOptions {
    pub provider: ProviderKind,
    pub model: String,
    pub input: Option<Value>,
    /// Caller-supplied trace id. Generated when absent.
    pub trace_id: Option<String>,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub properties: HashMap<String, Value>,
}

impl AiCallOptions {
    pub fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            input: None,
            trace_id: None,
            user_id: None,
            conversation_id: None,
            properties: HashMap::new(),
        }
    }

    pub fn with_input(mut self, input: impl Into<Value>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
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

/// What a wrapper extracted from a successful provider response.
#[derive(Debug, Clone, Default)]
pub struct AiCallOutput {
    pub output: Option<Value>,
    pub tokens: Option<TokenUsage>,
    pub tool_calls: Vec<ToolCallInfo>,
}

impl AiCallOutput {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: Some(Value::String(output.into())),
            tokens: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tokens(mut self, tokens: TokenUsage) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn with_tool_call(mut self, tool_call: ToolCallInfo) -> Self {
        self.tool_calls.push(tool_call);
        self
    }
}

/// In-flight traced AI call. Created before the provider request starts;
/// finalized exactly once by [`succeed`](AiCall::succeed),
/// [`fail`](AiCall::fail), or - as a safety net - by drop.
pub struct AiCall {
    pub(crate) client: Mizzle,
    pub(crate) trace_id: String,
    pub(crate) provider: ProviderKind,
    pub(crate) model: String,
    pub(crate) input: Option<Value>,
    pub(crate) user_id: Option<String>,
    pub(crate) conversation_id: Option<String>,
    pub(crate) properties: HashMap<String, Value>,
    pub(crate) start_time: DateTime<Utc>,
    pub(crate) parent: Option<InteractionRef>,
    pub(crate) done: bool,
}

impl AiCall {
    /// The trace id fixed before the underlying call started.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Whether this call will attach to a parent interaction.
    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    /// Finalize successfully with the extracted response data.
    pub fn succeed(mut self, output: AiCallOutput) {
        self.finalize(Ok(output));
    }

    /// Finalize with an error. The unit is still recorded and sent.
    pub fn fail(mut self, error: impl Into<String>) {
        self.finalize(Err(error.into()));
    }

    /// Switch to streamed finalization.
    pub fn streaming(self) -> StreamingAiCall {
        StreamingAiCall {
            call: self,
            buffer: String::new(),
            tokens: None,
            tool_calls: Vec::new(),
        }
    }

    fn finalize(&mut self, outcome: Result<AiCallOutput, String>) {
        if self.done {
            return;
        }
        self.done = true;

        let end_time = Utc::now();
        let (output, tokens, tool_calls, error) = match outcome {
            Ok(out) => (out.output, out.tokens, out.tool_calls, None),
            Err(message) => (None, None, Vec::new(), Some(message)),
        };

        match self.parent.take() {
            Some(parent) => {
                let mut span = SpanData::start(
                    self.trace_id.clone(),
                    format!("{}:{}", self.provider, self.model),
                    SpanKind::Ai,
                    Some(parent.id.clone()),
                );
                span.start_time = self.start_time;
                span.input = self.input.take();
                span.output = output;
                span.properties = std::mem::take(&mut self.properties);
                if let Some(tokens) = tokens {
                    span.properties.insert("input_tokens".to_string(), json!(tokens.input));
                    span.properties.insert("output_tokens".to_string(), json!(tokens.output));
                }
                if !tool_calls.is_empty() {
                    span.properties.insert(
                        "tool_calls".to_string(),
                        serde_json::to_value(&tool_calls).unwrap_or(Value::Null),
                    );
                }
                span.finalize(end_time, error);

                self.client.notify_span(&mut span);
                self.client.append_span(&parent, span);
            }
            None => {
                let mut trace = TraceData {
                    trace_id: self.trace_id.clone(),
                    provider: self.provider,
                    model: self.model.clone(),
                    input: self.input.take(),
                    output,
                    start_time: self.start_time,
                    end_time: Some(end_time),
                    latency_ms: Some(crate::transport::latency_ms(self.start_time, end_time)),
                    tokens,
                    tool_calls,
                    user_id: self.user_id.take(),
                    conversation_id: self.conversation_id.take(),
                    error,
                    properties: std::mem::take(&mut self.properties),
                };
                self.client.send_ai_trace(&mut trace);
            }
        }
    }
}

impl Drop for AiCall {
    fn drop(&mut self) {
        if !self.done {
            self.finalize(Err("ai call dropped before completion".to_string()));
        }
    }
}

/// Traced AI call with deferred, streamed finalization.
pub struct StreamingAiCall {
    call: AiCall,
    buffer: String,
    tokens: Option<TokenUsage>,
    tool_calls: Vec<ToolCallInfo>,
}

impl StreamingAiCall {
    pub fn trace_id(&self) -> &str {
        self.call.trace_id()
    }

    /// Append an output text delta.
    pub fn push_text(&mut self, delta: &str) {
        self.buffer.push_str(delta);
    }

    /// Record token usage, typically from the terminal stream chunk.
    pub fn set_tokens(&mut self, tokens: TokenUsage) {
        self.tokens = Some(tokens);
    }

    /// Record a tool call observed in the stream.
    pub fn push_tool_call(&mut self, tool_call: ToolCallInfo) {
        self.tool_calls.push(tool_call);
    }

    /// Finalize after the stream was fully consumed.
    pub fn finish(mut self) {
        let output = if self.buffer.is_empty() {
            None
        } else {
            Some(Value::String(std::mem::take(&mut self.buffer)))
        };
        let tokens = self.tokens.take();
        let tool_calls = std::mem::take(&mut self.tool_calls);
        self.call.finalize(Ok(AiCallOutput {
            output,
            tokens,
            tool_calls,
        }));
    }

    /// Finalize after the stream was aborted. Partial output collected so
    /// far is reported under the `partial_output` property; the unit itself
    /// carries the error, never a success value.
    pub fn abort(mut self, error: impl Into<String>) {
        self.stash_partial_output();
        self.call.finalize(Err(error.into()));
    }

    fn stash_partial_output(&mut self) {
        if !self.buffer.is_empty() {
            self.call.properties.insert(
                "partial_output".to_string(),
                Value::String(std::mem::take(&mut self.buffer)),
            );
        }
    }
}

impl Drop for StreamingAiCall {
    fn drop(&mut self) {
        // An un-finalized stream dropped mid-flight still reports its
        // partial output through the AiCall drop path.
        if !self.call.done {
            self.stash_partial_output();
        }
    }
}

/// Manual span for workflows where start and end happen in different places.
///
/// ```rust,ignore
/// let mut span = client.start_span("process_document", SpanKind::Tool);
/// span.record_input(&doc_id);
/// match process_document(doc_id).await {
///     Ok(result) => {
///         span.record_output(&result);
///         span.end(None);
///     }
///     Err(e) => span.end(Some(e.to_string())),
/// }
/// ```
pub struct SpanHandle {
    pub(crate) client: Mizzle,
    pub(crate) span: SpanData,
    pub(crate) parent: Option<InteractionRef>,
    pub(crate) ended: bool,
}

impl SpanHandle {
    /// The span id.
    pub fn id(&self) -> &str {
        &self.span.span_id
    }

    /// Record input data.
    pub fn record_input(&mut self, input: impl serde::Serialize) -> &mut Self {
        self.span.input = Some(to_value_lossy(input));
        self
    }

    /// Record output data.
    pub fn record_output(&mut self, output: impl serde::Serialize) -> &mut Self {
        self.span.output = Some(to_value_lossy(output));
        self
    }

    /// Merge properties onto the span.
    pub fn set_properties(&mut self, properties: HashMap<String, Value>) -> &mut Self {
        self.span.properties.extend(properties);
        self
    }

    /// Set a single property.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.span.properties.insert(key.into(), value.into());
        self
    }

    /// End the span and record it. Idempotent. An error clears any recorded
    /// output.
    pub fn end(&mut self, error: Option<String>) {
        if self.ended {
            return;
        }
        self.ended = true;

        let mut span = std::mem::replace(
            &mut self.span,
            SpanData::start("", "", SpanKind::Tool, None),
        );
        span.finalize(Utc::now(), error);

        self.client.notify_span(&mut span);
        match self.parent.take() {
            Some(parent) => {
                self.client.append_span(&parent, span);
            }
            None => {
                self.client.send_tool_trace(span);
            }
        }
    }
}

/// Serialize to a JSON value, degrading to null instead of erroring.
pub(crate) fn to_value_lossy(value: impl serde::Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
