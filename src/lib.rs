// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Mizzle - zero-config AI observability.
//!
//! Instruments calls to LLM provider APIs and ships structured telemetry
//! (traces, spans, feedback signals, user identity) to a collection backend,
//! without ever blocking or breaking the host application: under backend
//! unavailability the SDK degrades by dropping data, never by stalling.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Core data model (InteractionData, SpanData, TraceData, options)
//! - [`error`] - Error types; only integrator mistakes are raised
//! - [`config`] - Configuration and environment loading
//! - [`client`] - The [`Mizzle`] client and [`Interaction`] handles
//! - [`context`] - Call-chain-local current-interaction tracking
//! - [`plugins`] - Plugin hook pipeline with fault isolation
//! - [`transport`] - Buffered, batching, retrying HTTP delivery
//! - [`wrappers`] - The contract provider wrappers drive (AI calls, spans)
//! - [`logging`] - Optional tracing-subscriber setup for hosts and demos
//!
//! # Example
//!
//! ```rust,ignore
//! use mizzle::{AiCallOptions, AiCallOutput, BeginOptions, FinishOptions,
//!              Mizzle, MizzleConfig, ProviderKind, TokenUsage};
//!
//! let client = Mizzle::new(MizzleConfig::from_env()?);
//!
//! let interaction = client.begin(BeginOptions::event("checkout").with_user_id("user123"));
//!
//! let call = client.start_ai_call(
//!     AiCallOptions::new(ProviderKind::Anthropic, "claude-sonnet-4-20250514")
//!         .with_input("summarize my cart"),
//! );
//! // ... perform the provider request ...
//! call.succeed(AiCallOutput::text("3 items, $42").with_tokens(TokenUsage::new(120, 18)));
//!
//! interaction.finish_with(FinishOptions::output("order placed"));
//! client.close().await;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod plugins;
pub mod transport;
pub mod types;
pub mod wrappers;

pub(crate) mod context;

// Re-export commonly used types at crate root
pub use client::{Interaction, Mizzle};
pub use config::MizzleConfig;
pub use error::{Error, Result};
pub use plugins::{Hook, PiiPattern, Plugin, RedactionOptions, RedactionPlugin};
pub use transport::{HttpBackend, Transport};
pub use types::{
    Attachment, AttachmentKind, AttachmentRole, BeginOptions, FeedbackKind, FeedbackOptions,
    FinishOptions, InteractionData, ProviderKind, Sentiment, SignalOptions, SignalType, SpanData,
    SpanKind, TokenUsage, ToolCallInfo, TraceData, UserTraits,
};
pub use wrappers::{AiCall, AiCallOptions, AiCallOutput, SpanHandle, StreamingAiCall};

/// Mizzle SDK version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
