// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The Mizzle client.
//!
//! `Mizzle` is the entry point for instrumented applications: it owns the
//! plugin pipeline, the buffered transport, and the registry of active
//! interactions, and hands out the handles (interactions, spans, AI calls)
//! that provider wrappers and application code drive.
//!
//! ```rust,ignore
//! use mizzle::{Mizzle, MizzleConfig, BeginOptions, FinishOptions};
//!
//! let client = Mizzle::new(MizzleConfig::from_env()?);
//!
//! let interaction = client.begin(BeginOptions::event("checkout").with_user_id("user123"));
//! // ... wrapped AI and tool calls attach automatically ...
//! interaction.finish_with(FinishOptions::output("done"));
//!
//! client.close().await;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::config::MizzleConfig;
use crate::context;
use crate::error::{Error, Result};
use crate::plugins::{Plugin, PluginSet, RedactionPlugin};
use crate::transport::{latency_ms, HttpBackend, Transport};
use crate::types::{
    Attachment, BeginOptions, FeedbackOptions, FinishOptions, InteractionData, ProviderKind,
    SignalOptions, SpanData, SpanKind, TraceData, UserTraits,
};
use crate::wrappers::{to_value_lossy, AiCall, AiCallOptions, SpanHandle};

/// Shared state for one live interaction. The id is fixed at creation and
/// kept outside the data lock so context bookkeeping never blocks on it.
pub(crate) struct InteractionShared {
    pub(crate) id: String,
    pub(crate) data: Mutex<InteractionData>,
    pub(crate) finished: AtomicBool,
}

pub(crate) type InteractionRef = Arc<InteractionShared>;

/// Lock a mutex, recovering from poisoning; telemetry must not panic the
/// host.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct ClientInner {
    debug: bool,
    transport: Transport,
    plugins: PluginSet,
    active: Mutex<HashMap<String, InteractionRef>>,
    current_user: Mutex<Option<String>>,
    last_trace_id: Mutex<Option<String>>,
    closed: AtomicBool,
}

/// AI observability client.
///
/// Cheap to clone; all clones share the same pipeline and transport.
#[derive(Clone)]
pub struct Mizzle {
    inner: Arc<ClientInner>,
}

impl Mizzle {
    /// Create a client delivering over HTTP.
    pub fn new(config: MizzleConfig) -> Self {
        let transport = Transport::new(&config);
        Self::build(config, transport)
    }

    /// Create a client with a custom transport backend. Useful for tests
    /// and for hosts that route telemetry through their own delivery layer.
    pub fn with_backend(config: MizzleConfig, backend: Arc<dyn HttpBackend>) -> Self {
        let transport = Transport::with_backend(&config, backend);
        Self::build(config, transport)
    }

    fn build(config: MizzleConfig, transport: Transport) -> Self {
        let mut plugins: Vec<Arc<dyn Plugin>> = Vec::new();
        if config.redact_pii {
            // Redaction runs first so later plugins only see redacted text.
            plugins.push(Arc::new(RedactionPlugin::default()));
        }
        plugins.extend(config.plugins.iter().cloned());

        if config.debug {
            let names: Vec<&str> = plugins.iter().map(|p| p.name()).collect();
            debug!(
                base_url = %config.base_url,
                disabled = config.disabled,
                plugins = ?names,
                "mizzle initialized"
            );
        }

        Self {
            inner: Arc::new(ClientInner {
                debug: config.debug,
                transport,
                plugins: PluginSet::new(plugins, config.debug),
                active: Mutex::new(HashMap::new()),
                current_user: Mutex::new(None),
                last_trace_id: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    // ============================================
    // Interactions
    // ============================================

    /// Begin a new interaction with manual control and install it as the
    /// current interaction on this call chain.
    ///
    /// Use this when the interaction spans multiple functions or async
    /// boundaries; otherwise prefer [`with_interaction`](Self::with_interaction).
    pub fn begin(&self, options: BeginOptions) -> Interaction {
        let interaction = self.create_interaction(options);
        context::install(Arc::clone(&interaction.shared));
        interaction
    }

    /// Resume an existing interaction by id and re-install it as current on
    /// this call chain.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownInteraction`] if the id was never begun or has
    /// already finished.
    pub fn resume_interaction(&self, event_id: &str) -> Result<Interaction> {
        let shared = lock(&self.inner.active)
            .get(event_id)
            .cloned()
            .ok_or_else(|| Error::UnknownInteraction(event_id.to_string()))?;

        if self.inner.debug {
            debug!(interaction_id = event_id, "interaction resumed");
        }
        context::install(Arc::clone(&shared));
        Ok(Interaction {
            shared,
            client: self.clone(),
        })
    }

    /// Run a future inside a scoped interaction.
    ///
    /// The interaction is current for the duration of the future (across
    /// `.await` points, isolated from concurrent chains), and is finalized
    /// on both success and error paths - an error's message is recorded on
    /// the outbound payload and the error is returned unchanged. Leaving the
    /// scope restores whatever was current before.
    pub async fn with_interaction<F, Fut, T, E>(&self, options: BeginOptions, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Interaction) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        let interaction = self.create_interaction(options);
        let result = context::scope(Arc::clone(&interaction.shared), f(interaction.clone())).await;

        let error = result.as_ref().err().map(|e| e.to_string());
        interaction.finish_internal(FinishOptions::default(), error);
        result
    }

    fn create_interaction(&self, options: BeginOptions) -> Interaction {
        let interaction_id = options
            .event_id
            .unwrap_or_else(|| self.generate_trace_id());
        let user_id = options.user_id.or_else(|| self.current_user());

        let mut data = InteractionData {
            interaction_id: interaction_id.clone(),
            user_id,
            conversation_id: options.conversation_id,
            start_time: Utc::now(),
            input: options.input,
            output: None,
            model: options.model,
            event: options.event.unwrap_or_else(|| "interaction".to_string()),
            properties: options.properties,
            attachments: options.attachments,
            spans: Vec::new(),
        };

        self.inner.plugins.interaction_start(&mut data);

        let shared = Arc::new(InteractionShared {
            id: interaction_id.clone(),
            data: Mutex::new(data),
            finished: AtomicBool::new(false),
        });
        lock(&self.inner.active).insert(interaction_id.clone(), Arc::clone(&shared));

        if self.inner.debug {
            debug!(interaction_id = %interaction_id, "interaction began");
        }

        Interaction {
            shared,
            client: self.clone(),
        }
    }

    /// Finalize: deregister, clear the chain-local slot, run plugins, send.
    fn finish_interaction(&self, shared: &InteractionRef, error: Option<String>) {
        let end_time = Utc::now();
        lock(&self.inner.active).remove(&shared.id);
        context::clear_current(&shared.id);

        let latency = {
            let mut data = lock(&shared.data);
            self.inner.plugins.interaction_end(&mut data);
            let latency = latency_ms(data.start_time, end_time);
            self.inner
                .transport
                .send_interaction(&data, latency, error.as_deref());
            latency
        };

        self.note_trace_id(&shared.id);
        if self.inner.debug {
            debug!(interaction_id = %shared.id, latency_ms = latency, "interaction finished");
        }
    }

    // ============================================
    // Spans and AI calls
    // ============================================

    /// Start a manual span, attached to this chain's current interaction if
    /// one is active.
    pub fn start_span(&self, name: impl Into<String>, kind: SpanKind) -> SpanHandle {
        let parent = context::current();
        let span_id = self.generate_trace_id();
        let name = name.into();

        if self.inner.debug {
            debug!(span_id = %span_id, name = %name, "span started");
        }

        SpanHandle {
            client: self.clone(),
            span: SpanData::start(
                span_id,
                name,
                kind,
                parent.as_ref().map(|p| p.id.clone()),
            ),
            parent,
            ended: false,
        }
    }

    /// Run a closure as a traced tool span. The span records the input,
    /// the output on success or the error message on failure, and attaches
    /// to the current interaction when one is active.
    pub fn traced_tool<T, E, F>(
        &self,
        name: &str,
        input: impl serde::Serialize,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        T: serde::Serialize,
        E: std::fmt::Display,
    {
        self.run_traced(name, input, false, f)
    }

    /// Like [`traced_tool`](Self::traced_tool) for higher-level units of
    /// work; the span is marked as a task.
    pub fn traced_task<T, E, F>(
        &self,
        name: &str,
        input: impl serde::Serialize,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        T: serde::Serialize,
        E: std::fmt::Display,
    {
        self.run_traced(name, input, true, f)
    }

    fn run_traced<T, E, F>(
        &self,
        name: &str,
        input: impl serde::Serialize,
        is_task: bool,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        T: serde::Serialize,
        E: std::fmt::Display,
    {
        let mut span = self.start_span(name, SpanKind::Tool);
        span.record_input(input);
        if is_task {
            span.set_property("is_task", true);
        }

        match f() {
            Ok(value) => {
                span.record_output(&value);
                span.end(None);
                Ok(value)
            }
            Err(error) => {
                span.end(Some(error.to_string()));
                Err(error)
            }
        }
    }

    /// Start a traced AI call. Fixes the trace id before the provider
    /// request and captures this chain's current interaction as the parent.
    pub fn start_ai_call(&self, options: AiCallOptions) -> AiCall {
        let trace_id = options
            .trace_id
            .unwrap_or_else(|| self.generate_trace_id());
        let user_id = options.user_id.or_else(|| self.current_user());
        let parent = context::current();

        if self.inner.debug {
            debug!(
                trace_id = %trace_id,
                provider = %options.provider,
                model = %options.model,
                attached = parent.is_some(),
                "ai call started"
            );
        }

        AiCall {
            client: self.clone(),
            trace_id,
            provider: options.provider,
            model: options.model,
            input: options.input,
            user_id,
            conversation_id: options.conversation_id,
            properties: options.properties,
            start_time: Utc::now(),
            parent,
            done: false,
        }
    }

    // ============================================
    // Identity, feedback, signals
    // ============================================

    /// Identify the current user. Later events without an explicit user id
    /// are attributed to this user; traits, when given, are sent to the
    /// identify endpoint.
    pub fn identify(&self, user_id: impl Into<String>, traits: Option<UserTraits>) {
        let user_id = user_id.into();
        *lock(&self.inner.current_user) = Some(user_id.clone());

        if let Some(traits) = traits {
            self.inner.transport.send_identify(&user_id, &traits);
        }
        if self.inner.debug {
            debug!(user_id = %user_id, "user identified");
        }
    }

    /// Send feedback for a prior trace or interaction.
    pub fn feedback(&self, trace_id: &str, options: FeedbackOptions) {
        self.inner.transport.send_feedback(trace_id, &options);
        if self.inner.debug {
            debug!(trace_id, "feedback sent");
        }
    }

    /// Track a signal with full control over name, type, and sentiment.
    pub fn track_signal(&self, options: SignalOptions) {
        if self.inner.debug {
            debug!(event_id = %options.event_id, signal = %options.name, "signal tracked");
        }
        self.inner.transport.send_signal(&options);
    }

    /// The most recently finalized trace or interaction id.
    pub fn last_trace_id(&self) -> Option<String> {
        lock(&self.inner.last_trace_id).clone()
    }

    // ============================================
    // Lifecycle
    // ============================================

    /// Flush plugin buffers, then drain the transport queue.
    pub async fn flush(&self) {
        self.inner.plugins.flush_all().await;
        self.inner.transport.flush().await;
    }

    /// Flush and release everything. Idempotent; the host application owns
    /// process-lifecycle registration and must guarantee this runs once
    /// before exit.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.plugins.flush_all().await;
        self.inner.plugins.shutdown_all().await;
        self.inner.transport.close().await;
        if self.inner.debug {
            debug!("mizzle closed");
        }
    }

    // ============================================
    // Internals shared with the wrapper surface
    // ============================================

    pub(crate) fn generate_trace_id(&self) -> String {
        format!("trace_{}", Uuid::new_v4())
    }

    pub(crate) fn current_user(&self) -> Option<String> {
        lock(&self.inner.current_user).clone()
    }

    pub(crate) fn note_trace_id(&self, id: &str) {
        *lock(&self.inner.last_trace_id) = Some(id.to_string());
    }

    /// Run the span hooks; the pipeline may mutate the span in place.
    pub(crate) fn notify_span(&self, span: &mut SpanData) {
        self.inner.plugins.span(span);
    }

    /// Append a finished span to its parent interaction, fixing up the
    /// parent id so the invariant `span.parent_id == interaction.id` holds.
    pub(crate) fn append_span(&self, parent: &InteractionRef, mut span: SpanData) {
        span.parent_id = Some(parent.id.clone());
        lock(&parent.data).spans.push(span);
    }

    /// Run the trace hooks and hand a standalone AI trace to the transport.
    pub(crate) fn send_ai_trace(&self, trace: &mut TraceData) {
        self.inner.plugins.trace(trace);
        self.inner.transport.send_trace(trace);
        self.note_trace_id(&trace.trace_id);
    }

    /// Send a parentless finished span as a tool-shaped standalone trace.
    /// The span hooks already ran; the trace hooks do not run again.
    pub(crate) fn send_tool_trace(&self, span: SpanData) {
        let trace = TraceData {
            trace_id: span.span_id.clone(),
            provider: ProviderKind::Unknown,
            model: format!("tool:{}", span.name),
            input: span.input,
            output: span.output,
            start_time: span.start_time,
            end_time: span.end_time,
            latency_ms: span.latency_ms,
            tokens: None,
            tool_calls: Vec::new(),
            user_id: None,
            conversation_id: None,
            error: span.error,
            properties: span.properties,
        };
        self.inner.transport.send_trace(&trace);
        self.note_trace_id(&trace.trace_id);
    }
}

/// Handle for a manually-managed interaction.
///
/// Cheap to clone; all clones share the same underlying state, and
/// [`finish`](Interaction::finish) is idempotent across them.
#[derive(Clone)]
pub struct Interaction {
    shared: InteractionRef,
    client: Mizzle,
}

impl Interaction {
    /// The interaction id, immutable for the interaction's lifetime.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Whether the interaction has been finalized.
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::SeqCst)
    }

    /// Set the input text.
    pub fn set_input(&self, input: impl Into<String>) -> &Self {
        lock(&self.shared.data).input = Some(input.into());
        self
    }

    /// Set the output text.
    pub fn set_output(&self, output: impl Into<String>) -> &Self {
        lock(&self.shared.data).output = Some(output.into());
        self
    }

    /// Set a single property.
    pub fn set_property(&self, key: impl Into<String>, value: impl serde::Serialize) -> &Self {
        lock(&self.shared.data)
            .properties
            .insert(key.into(), to_value_lossy(value));
        self
    }

    /// Merge multiple properties.
    pub fn set_properties(&self, properties: HashMap<String, serde_json::Value>) -> &Self {
        lock(&self.shared.data).properties.extend(properties);
        self
    }

    /// Append attachments.
    pub fn add_attachments(&self, attachments: Vec<Attachment>) -> &Self {
        lock(&self.shared.data).attachments.extend(attachments);
        self
    }

    /// Finish the interaction and send it. Calling finish again is a no-op.
    pub fn finish(&self) {
        self.finish_internal(FinishOptions::default(), None);
    }

    /// Finish with final output, properties, and attachments.
    pub fn finish_with(&self, options: FinishOptions) {
        self.finish_internal(options, None);
    }

    fn finish_internal(&self, options: FinishOptions, error: Option<String>) {
        if self.shared.finished.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut data = lock(&self.shared.data);
            if let Some(output) = options.output {
                data.output = Some(output);
            }
            data.properties.extend(options.properties);
            data.attachments.extend(options.attachments);
        }

        self.client.finish_interaction(&self.shared, error);
    }
}
