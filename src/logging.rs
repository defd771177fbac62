// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Optional logging setup.
//!
//! The SDK itself only emits `tracing` events and never installs a global
//! subscriber - that belongs to the host application. This helper exists for
//! hosts and demos that have no subscriber of their own and want to see the
//! SDK's diagnostics.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a compact stderr subscriber filtered to SDK diagnostics.
///
/// `RUST_LOG` takes precedence over the default `mizzle=debug` directive.
/// Safe to call when a subscriber is already installed; the call is then a
/// no-op.
pub fn init_debug_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mizzle=debug"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init();
}
