// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Plugin hook pipeline.
//!
//! A plugin observes telemetry at defined lifecycle points and may mutate
//! the data in place before it leaves the process - redaction is the
//! canonical example. Hooks run synchronously on the calling chain, in
//! registration order, and a failing plugin never aborts tracing: each hook
//! invocation is isolated so later plugins and the core pipeline still run.
//!
//! Ordering is a user-visible contract. When it matters (redaction before an
//! exporting plugin, say), register in that order; `redact_pii: true` in the
//! config prepends the built-in [`redact::RedactionPlugin`].

pub mod redact;

pub use redact::{PiiPattern, RedactionOptions, RedactionPlugin};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::types::{InteractionData, SpanData, TraceData};

/// Hook points a plugin can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    InteractionStart,
    InteractionEnd,
    Span,
    Trace,
    Flush,
    Shutdown,
}

impl std::fmt::Display for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hook::InteractionStart => write!(f, "on_interaction_start"),
            Hook::InteractionEnd => write!(f, "on_interaction_end"),
            Hook::Span => write!(f, "on_span"),
            Hook::Trace => write!(f, "on_trace"),
            Hook::Flush => write!(f, "flush"),
            Hook::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// An observer invoked at telemetry lifecycle points.
///
/// Every hook has a no-op default, so a plugin implements only the subset it
/// cares about. [`Plugin::supports`] lets a plugin opt out of hook points
/// entirely; the pipeline skips unsupported hooks without calling them.
///
/// The four `on_*` hooks are synchronous and receive mutable access to the
/// data about to be stored or sent. `flush` and `shutdown` may do I/O; the
/// client awaits them with a bounded timeout during its own flush/close.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin name, used in diagnostics.
    fn name(&self) -> &str;

    /// Whether this plugin implements the given hook. Defaults to true.
    fn supports(&self, hook: Hook) -> bool {
        let _ = hook;
        true
    }

    /// Called when an interaction starts.
    fn on_interaction_start(&self, interaction: &mut InteractionData) {
        let _ = interaction;
    }

    /// Called when an interaction ends, before it is sent.
    fn on_interaction_end(&self, interaction: &mut InteractionData) {
        let _ = interaction;
    }

    /// Called when a span completes, before it is stored or sent.
    fn on_span(&self, span: &mut SpanData) {
        let _ = span;
    }

    /// Called when a standalone trace completes, before it is sent.
    fn on_trace(&self, trace: &mut TraceData) {
        let _ = trace;
    }

    /// Drain any buffered side-channel data.
    async fn flush(&self) {}

    /// Release resources. Must be idempotent.
    async fn shutdown(&self) {}
}

/// Per-plugin timeout for the async `flush`/`shutdown` hooks.
const LIFECYCLE_HOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Ordered set of plugins with fault-isolated dispatch.
pub(crate) struct PluginSet {
    plugins: Vec<Arc<dyn Plugin>>,
    debug: bool,
}

impl PluginSet {
    pub(crate) fn new(plugins: Vec<Arc<dyn Plugin>>, debug: bool) -> Self {
        Self { plugins, debug }
    }

    /// Invoke a sync hook on every supporting plugin, in registration order.
    /// A panicking plugin is logged and skipped; the rest still run.
    fn each(&self, hook: Hook, mut f: impl FnMut(&dyn Plugin)) {
        for plugin in &self.plugins {
            if !plugin.supports(hook) {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| f(plugin.as_ref())));
            if outcome.is_err() && self.debug {
                warn!(plugin = plugin.name(), hook = %hook, "plugin hook panicked, continuing");
            }
        }
    }

    pub(crate) fn interaction_start(&self, interaction: &mut InteractionData) {
        self.each(Hook::InteractionStart, |p| {
            p.on_interaction_start(interaction)
        });
    }

    pub(crate) fn interaction_end(&self, interaction: &mut InteractionData) {
        self.each(Hook::InteractionEnd, |p| p.on_interaction_end(interaction));
    }

    pub(crate) fn span(&self, span: &mut SpanData) {
        self.each(Hook::Span, |p| p.on_span(span));
    }

    pub(crate) fn trace(&self, trace: &mut TraceData) {
        self.each(Hook::Trace, |p| p.on_trace(trace));
    }

    /// Await every plugin's `flush`, each as its own task with a timeout, so
    /// plugin-buffered data is drained before the transport flushes.
    pub(crate) async fn flush_all(&self) {
        for plugin in &self.plugins {
            if !plugin.supports(Hook::Flush) {
                continue;
            }
            self.run_lifecycle(plugin, Hook::Flush).await;
        }
    }

    /// Await every plugin's `shutdown` with a timeout.
    pub(crate) async fn shutdown_all(&self) {
        for plugin in &self.plugins {
            if !plugin.supports(Hook::Shutdown) {
                continue;
            }
            self.run_lifecycle(plugin, Hook::Shutdown).await;
        }
    }

    async fn run_lifecycle(&self, plugin: &Arc<dyn Plugin>, hook: Hook) {
        let task = {
            let plugin = Arc::clone(plugin);
            tokio::spawn(async move {
                match hook {
                    Hook::Flush => plugin.flush().await,
                    _ => plugin.shutdown().await,
                }
            })
        };

        match tokio::time::timeout(LIFECYCLE_HOOK_TIMEOUT, task).await {
            Ok(Ok(())) => {}
            Ok(Err(_join_err)) => {
                if self.debug {
                    warn!(plugin = plugin.name(), hook = %hook, "plugin lifecycle hook panicked");
                }
            }
            Err(_elapsed) => {
                if self.debug {
                    warn!(plugin = plugin.name(), hook = %hook, "plugin lifecycle hook timed out");
                }
            }
        }
    }
}
