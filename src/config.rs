// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! SDK configuration.
//!
//! Configuration comes from the host application; [`MizzleConfig::from_env`]
//! offers the usual environment-variable path:
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `MIZZLE_API_KEY` | API key (required) |
//! | `MIZZLE_BASE_URL` | Override the collection endpoint |
//! | `MIZZLE_DEBUG` | Enable diagnostic logging (`1`/`true`) |
//! | `MIZZLE_DISABLED` | Disable all sends (`1`/`true`) |

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::plugins::Plugin;

/// Default collection endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.mizzle.dev";

/// Default debounce interval before a queued event is flushed.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on the transport queue.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;

/// Default number of retries after a failed send.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Configuration for the [`crate::Mizzle`] client.
#[derive(Clone)]
pub struct MizzleConfig {
    /// Bearer token for the collection backend.
    pub api_key: String,
    /// Collection endpoint base URL.
    pub base_url: String,
    /// Emit diagnostic logs for dropped/retried events and plugin failures.
    pub debug: bool,
    /// Turn every send into a no-op. The client still hands out handles so
    /// instrumented code paths need no conditionals.
    pub disabled: bool,
    /// Debounce interval for the flush timer.
    pub flush_interval: Duration,
    /// Maximum queued events; the oldest is evicted on overflow.
    pub max_queue_size: usize,
    /// Retries after the first failed attempt for a batch.
    pub max_retries: u32,
    /// Prepend the built-in PII redaction plugin.
    pub redact_pii: bool,
    /// Plugins, invoked in order.
    pub plugins: Vec<Arc<dyn Plugin>>,
}

impl MizzleConfig {
    /// Create a configuration with defaults for everything but the API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            debug: false,
            disabled: false,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            redact_pii: false,
            plugins: Vec::new(),
        }
    }

    /// Load configuration from `MIZZLE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("MIZZLE_API_KEY")
            .map_err(|_| Error::config("MIZZLE_API_KEY not set"))?;

        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("MIZZLE_BASE_URL") {
            config.base_url = base_url;
        }
        config.debug = env_flag("MIZZLE_DEBUG");
        config.disabled = env_flag("MIZZLE_DISABLED");
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_redact_pii(mut self, redact: bool) -> Self {
        self.redact_pii = redact;
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }
}

impl std::fmt::Debug for MizzleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MizzleConfig")
            .field("base_url", &self.base_url)
            .field("debug", &self.debug)
            .field("disabled", &self.disabled)
            .field("flush_interval", &self.flush_interval)
            .field("max_queue_size", &self.max_queue_size)
            .field("max_retries", &self.max_retries)
            .field("redact_pii", &self.redact_pii)
            .field(
                "plugins",
                &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.to_lowercase();
            v == "1" || v == "true" || v == "yes"
        })
        .unwrap_or(false)
}
