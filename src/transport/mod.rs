// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Buffered HTTP transport.
//!
//! Accepts one event at a time and delivers it best-effort without blocking
//! the caller beyond enqueue time. Per event the lifecycle is
//! Queued -> Sending -> {Delivered | Retrying(n) | Dropped}: enqueue arms a
//! debounce timer that coalesces bursts into one round trip, a flush swaps
//! the queue out and partitions it by endpoint, and failed batches retry
//! with exponential backoff until the budget is exhausted. Delivery failures
//! are never surfaced to the original caller - by the time a retry budget
//! runs out, the originating call has long returned.
//!
//! Backpressure is the queue bound alone: oversized events are dropped at
//! enqueue, a full queue evicts its oldest entry, and crossing 80% capacity
//! emits a warning. Instrumentation never stalls the host application.

mod payload;

pub(crate) use payload::latency_ms;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::MizzleConfig;
use crate::types::{FeedbackOptions, InteractionData, SignalOptions, TraceData, UserTraits};

/// Events whose serialized form exceeds this are dropped at enqueue.
pub const MAX_EVENT_SIZE_BYTES: usize = 1024 * 1024;

/// Base delay for exponential backoff between retries.
const RETRY_BASE_DELAY_MS: u64 = 100;

/// Request timeout on the underlying HTTP client.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const EVENTS_ENDPOINT: &str = "/v1/events/track";
const SIGNALS_ENDPOINT: &str = "/v1/signals/track";
const IDENTIFY_ENDPOINT: &str = "/v1/users/identify";

/// HTTP delivery seam. The production implementation wraps `reqwest`;
/// tests substitute a double.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpBackend: Send + Sync {
    /// POST a JSON body with bearer auth, returning the response status.
    async fn post(&self, url: String, body: Value, api_key: String) -> anyhow::Result<u16>;
}

/// `reqwest`-backed production delivery.
pub struct ReqwestBackend {
    client: reqwest::Client,
}

impl ReqwestBackend {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");
        Self { client }
    }
}

impl Default for ReqwestBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn post(&self, url: String, body: Value, api_key: String) -> anyhow::Result<u16> {
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }
}

/// Type tag for queued events, deciding which endpoint batch they join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    Trace,
    Feedback,
    Identify,
    Interaction,
}

/// A formatted payload waiting in the queue. Owned exclusively by the queue
/// from enqueue until it is drained into a batch.
#[derive(Debug)]
pub(crate) struct QueuedEvent {
    kind: EventKind,
    data: Value,
    queued_at: DateTime<Utc>,
}

/// Buffered, batching, retrying delivery of telemetry events.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    api_key: String,
    base_url: String,
    debug: bool,
    disabled: bool,
    flush_interval: Duration,
    max_queue_size: usize,
    max_retries: u32,
    queue: Mutex<VecDeque<QueuedEvent>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    backend: Arc<dyn HttpBackend>,
    runtime: Option<tokio::runtime::Handle>,
}

/// Lock a mutex, recovering from poisoning. Telemetry must not panic the
/// host even after a panic elsewhere.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Transport {
    /// Create a transport delivering over `reqwest`.
    pub fn new(config: &MizzleConfig) -> Self {
        Self::with_backend(config, Arc::new(ReqwestBackend::new()))
    }

    /// Create a transport with a custom delivery backend.
    pub fn with_backend(config: &MizzleConfig, backend: Arc<dyn HttpBackend>) -> Self {
        Self {
            inner: Arc::new(Inner {
                api_key: config.api_key.clone(),
                base_url: config.base_url.trim_end_matches('/').to_string(),
                debug: config.debug,
                disabled: config.disabled,
                flush_interval: config.flush_interval,
                max_queue_size: config.max_queue_size.max(1),
                max_retries: config.max_retries,
                queue: Mutex::new(VecDeque::new()),
                timer: Mutex::new(None),
                closed: AtomicBool::new(false),
                backend,
                runtime: tokio::runtime::Handle::try_current().ok(),
            }),
        }
    }

    /// Queue a standalone trace.
    pub fn send_trace(&self, trace: &TraceData) {
        if self.inner.disabled {
            return;
        }
        self.enqueue(EventKind::Trace, payload::format_trace(trace));
    }

    /// Queue a finished interaction, with its spans flattened to
    /// attachments.
    pub fn send_interaction(
        &self,
        interaction: &InteractionData,
        latency_ms: i64,
        error: Option<&str>,
    ) {
        if self.inner.disabled {
            return;
        }
        self.enqueue(
            EventKind::Interaction,
            payload::format_interaction(interaction, latency_ms, error),
        );
    }

    /// Queue feedback for a prior trace or interaction.
    pub fn send_feedback(&self, event_id: &str, feedback: &FeedbackOptions) {
        if self.inner.disabled {
            return;
        }
        self.enqueue(
            EventKind::Feedback,
            payload::format_feedback(event_id, feedback),
        );
    }

    /// Queue a full-control signal.
    pub fn send_signal(&self, options: &SignalOptions) {
        if self.inner.disabled {
            return;
        }
        self.enqueue(EventKind::Feedback, payload::format_signal(options));
    }

    /// Queue a user identification.
    pub fn send_identify(&self, user_id: &str, traits: &UserTraits) {
        if self.inner.disabled {
            return;
        }
        self.enqueue(
            EventKind::Identify,
            payload::format_identify(user_id, traits),
        );
    }

    /// Cancel any pending flush timer and drain the queue now.
    pub async fn flush(&self) {
        if let Some(timer) = lock(&self.inner.timer).take() {
            timer.abort();
        }
        self.inner.flush_queue().await;
    }

    /// Flush remaining events and stop scheduling. Idempotent; the host
    /// application must guarantee this runs once before process exit.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.flush().await;
    }

    /// Size-check, admit (evicting the oldest on overflow), and arm the
    /// debounce timer. Non-blocking apart from the queue lock.
    fn enqueue(&self, kind: EventKind, data: Value) {
        let inner = &self.inner;
        let size = serde_json::to_string(&data).map(|s| s.len()).unwrap_or(0);
        if size > MAX_EVENT_SIZE_BYTES {
            if inner.debug {
                warn!(
                    kind = ?kind,
                    size_bytes = size,
                    "event exceeds 1MiB limit, skipping"
                );
            }
            return;
        }

        let warn_threshold = inner.max_queue_size * 8 / 10;
        {
            let mut queue = lock(&inner.queue);
            if queue.len() >= inner.max_queue_size {
                let evicted = queue.pop_front();
                if inner.debug {
                    let age_ms = evicted
                        .map(|e| latency_ms(e.queued_at, Utc::now()))
                        .unwrap_or(0);
                    warn!(age_ms, "queue full, discarding oldest event");
                }
            } else if queue.len() >= warn_threshold {
                if inner.debug {
                    let pct = queue.len() * 100 / inner.max_queue_size;
                    warn!(capacity_pct = pct, "queue nearing capacity");
                }
            }

            queue.push_back(QueuedEvent {
                kind,
                data,
                queued_at: Utc::now(),
            });

            if inner.debug {
                debug!(kind = ?kind, "queued event");
            }
        }

        self.schedule_flush();
    }

    /// Arm the debounce timer if none is pending. Without a tokio runtime
    /// there is no timer; events deliver on manual flush or close.
    fn schedule_flush(&self) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        let Some(handle) = &self.inner.runtime else {
            return;
        };

        let mut timer = lock(&self.inner.timer);
        if timer.is_some() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        *timer = Some(handle.spawn(async move {
            tokio::time::sleep(inner.flush_interval).await;
            // Disarm before draining so a concurrent manual flush cannot
            // abort this task mid-send.
            lock(&inner.timer).take();
            inner.flush_queue().await;
        }));
    }
}

impl Inner {
    /// Swap the queue out, partition by endpoint, and send. Events enqueued
    /// during the send join the next flush - never lost, never double-sent.
    async fn flush_queue(&self) {
        let events: Vec<QueuedEvent> = {
            let mut queue = lock(&self.queue);
            queue.drain(..).collect()
        };
        if events.is_empty() {
            return;
        }

        let mut event_batch = Vec::new();
        let mut signal_batch = Vec::new();
        let mut identifies = Vec::new();
        for event in events {
            match event.kind {
                EventKind::Trace | EventKind::Interaction => event_batch.push(event.data),
                EventKind::Feedback => signal_batch.push(event.data),
                EventKind::Identify => identifies.push(event.data),
            }
        }

        let send_events = async {
            if !event_batch.is_empty() {
                let count = event_batch.len();
                self.send_with_retry(EVENTS_ENDPOINT, Value::Array(event_batch), count)
                    .await;
            }
        };
        let send_signals = async {
            if !signal_batch.is_empty() {
                let count = signal_batch.len();
                self.send_with_retry(SIGNALS_ENDPOINT, Value::Array(signal_batch), count)
                    .await;
            }
        };
        tokio::join!(send_events, send_signals);

        // Identify is one user per call, not batchable.
        for identify in identifies {
            self.send_with_retry(IDENTIFY_ENDPOINT, identify, 1).await;
        }
    }

    /// Send one batch with exponential backoff. Exhausting the retry budget
    /// drops the batch; the caller that produced these events has already
    /// returned, so failures are logged, never raised.
    async fn send_with_retry(&self, endpoint: &str, body: Value, count: usize) {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut attempt: u32 = 0;

        loop {
            let result = self
                .backend
                .post(url.clone(), body.clone(), self.api_key.clone())
                .await;

            match result {
                Ok(status) if (200..300).contains(&status) => {
                    if self.debug {
                        debug!(endpoint, count, "sent events");
                    }
                    return;
                }
                Ok(status) => {
                    if self.debug {
                        debug!(endpoint, status, attempt, "request failed, retrying");
                    }
                }
                Err(error) => {
                    if self.debug {
                        debug!(endpoint, error = %error, attempt, "request errored, retrying");
                    }
                }
            }

            if attempt >= self.max_retries {
                if self.debug {
                    warn!(endpoint, count, "retry budget exhausted, dropping batch");
                }
                return;
            }

            tokio::time::sleep(Duration::from_millis(RETRY_BASE_DELAY_MS << attempt)).await;
            attempt += 1;
        }
    }
}
