// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! PII redaction plugin.
//!
//! Rewrites personally identifiable information in trace data before it
//! leaves the process, using regex patterns over input/output text and
//! string-valued properties. Register it first (or set `redact_pii: true`,
//! which prepends it) so later plugins and the transport only ever see
//! redacted text.
//!
//! ```rust,ignore
//! use mizzle::{Mizzle, MizzleConfig};
//!
//! let client = Mizzle::new(MizzleConfig::new(api_key).with_redact_pii(true));
//! ```

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::Plugin;
use crate::types::{InteractionData, SpanData, TraceData};

/// Built-in pattern categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PiiPattern {
    Email,
    Phone,
    Ssn,
    CreditCard,
    Credentials,
    Address,
    Password,
}

impl PiiPattern {
    /// All built-in patterns, in application order.
    pub fn all() -> &'static [PiiPattern] {
        &[
            PiiPattern::Email,
            PiiPattern::Phone,
            PiiPattern::Ssn,
            PiiPattern::CreditCard,
            PiiPattern::Credentials,
            PiiPattern::Address,
            PiiPattern::Password,
        ]
    }

    /// Replacement token used when specific tokens are enabled.
    fn token(&self) -> &'static str {
        match self {
            PiiPattern::Email => "<REDACTED_EMAIL>",
            PiiPattern::Phone => "<REDACTED_PHONE>",
            PiiPattern::Ssn => "<REDACTED_SSN>",
            PiiPattern::CreditCard => "<REDACTED_CREDIT_CARD>",
            PiiPattern::Credentials => "<REDACTED_CREDENTIALS>",
            PiiPattern::Address => "<REDACTED_ADDRESS>",
            PiiPattern::Password => "<REDACTED_SECRET>",
        }
    }
}

static PATTERN_TABLE: Lazy<HashMap<PiiPattern, Regex>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert(
        PiiPattern::Email,
        Regex::new(r"(?i)\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
    );
    table.insert(
        PiiPattern::Phone,
        Regex::new(r"(\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap(),
    );
    table.insert(
        PiiPattern::Ssn,
        Regex::new(r"\b\d{3}[-\s]?\d{2}[-\s]?\d{4}\b").unwrap(),
    );
    table.insert(
        PiiPattern::CreditCard,
        Regex::new(r"\b(?:\d[ -]*?){13,19}\b").unwrap(),
    );
    table.insert(
        PiiPattern::Credentials,
        Regex::new(
            r#"(?i)\b(api[_-]?key|token|bearer|authorization|auth[_-]?token|access[_-]?token|secret[_-]?key)\s*[:=]\s*["']?[\w-]+["']?"#,
        )
        .unwrap(),
    );
    table.insert(
        PiiPattern::Address,
        Regex::new(
            r"(?i)\b\d+\s+[A-Za-z\s]+\s+(street|st|avenue|ave|road|rd|boulevard|blvd|lane|ln|drive|dr|court|ct|plaza|pl|terrace|ter|way|parkway|pkwy)\b",
        )
        .unwrap(),
    );
    table.insert(
        PiiPattern::Password,
        Regex::new(r"(?i)\b(pass(word|phrase)?|secret|pwd|passwd)\s*[:=]\s*\S+").unwrap(),
    );
    table
});

/// Options for [`RedactionPlugin`].
#[derive(Debug, Clone)]
pub struct RedactionOptions {
    /// Built-in patterns to apply. `None` applies all of them.
    pub patterns: Option<Vec<PiiPattern>>,
    /// Additional regexes, always redacted with the generic replacement.
    pub custom_patterns: Vec<Regex>,
    /// Exact strings that are never redacted.
    pub allow_list: Vec<String>,
    /// Generic replacement string.
    pub replacement: String,
    /// Use per-category tokens like `<REDACTED_EMAIL>` instead of the
    /// generic replacement.
    pub specific_tokens: bool,
}

impl Default for RedactionOptions {
    fn default() -> Self {
        Self {
            patterns: None,
            custom_patterns: Vec::new(),
            allow_list: Vec::new(),
            replacement: "<REDACTED>".to_string(),
            specific_tokens: false,
        }
    }
}

/// Plugin that redacts PII in place on interactions, spans, and traces.
pub struct RedactionPlugin {
    options: RedactionOptions,
}

impl RedactionPlugin {
    pub fn new(options: RedactionOptions) -> Self {
        Self { options }
    }

    fn active_patterns(&self) -> Vec<PiiPattern> {
        match &self.options.patterns {
            Some(patterns) => patterns.clone(),
            None => PiiPattern::all().to_vec(),
        }
    }

    /// Redact a single string.
    fn redact_text(&self, text: &str) -> String {
        let mut result = text.to_string();

        for pattern in self.active_patterns() {
            let regex = &PATTERN_TABLE[&pattern];
            let replacement = if self.options.specific_tokens {
                pattern.token()
            } else {
                self.options.replacement.as_str()
            };
            result = regex
                .replace_all(&result, |caps: &regex::Captures<'_>| {
                    let matched = &caps[0];
                    if self.options.allow_list.iter().any(|a| a == matched) {
                        matched.to_string()
                    } else {
                        replacement.to_string()
                    }
                })
                .into_owned();
        }

        for regex in &self.options.custom_patterns {
            result = regex
                .replace_all(&result, self.options.replacement.as_str())
                .into_owned();
        }

        result
    }

    fn redact_opt_string(&self, value: &mut Option<String>) {
        if let Some(text) = value {
            *text = self.redact_text(text);
        }
    }

    /// Recursively redact string leaves of a JSON value.
    fn redact_value(&self, value: &mut Value) {
        match value {
            Value::String(text) => *text = self.redact_text(text),
            Value::Array(items) => {
                for item in items {
                    self.redact_value(item);
                }
            }
            Value::Object(map) => {
                for (_key, item) in map.iter_mut() {
                    self.redact_value(item);
                }
            }
            _ => {}
        }
    }

    fn redact_properties(&self, properties: &mut HashMap<String, Value>) {
        for (_key, value) in properties.iter_mut() {
            self.redact_value(value);
        }
    }
}

impl Default for RedactionPlugin {
    fn default() -> Self {
        Self::new(RedactionOptions::default())
    }
}

#[async_trait::async_trait]
impl Plugin for RedactionPlugin {
    fn name(&self) -> &str {
        "pii-redaction"
    }

    fn on_interaction_end(&self, interaction: &mut InteractionData) {
        self.redact_opt_string(&mut interaction.input);
        self.redact_opt_string(&mut interaction.output);
        self.redact_properties(&mut interaction.properties);
        for attachment in &mut interaction.attachments {
            attachment.value = self.redact_text(&attachment.value);
        }
    }

    fn on_span(&self, span: &mut SpanData) {
        if let Some(input) = &mut span.input {
            self.redact_value(input);
        }
        if let Some(output) = &mut span.output {
            self.redact_value(output);
        }
        self.redact_opt_string(&mut span.error);
        self.redact_properties(&mut span.properties);
    }

    fn on_trace(&self, trace: &mut TraceData) {
        if let Some(input) = &mut trace.input {
            self.redact_value(input);
        }
        if let Some(output) = &mut trace.output {
            self.redact_value(output);
        }
        self.redact_opt_string(&mut trace.error);
        self.redact_properties(&mut trace.properties);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_email() {
        let plugin = RedactionPlugin::default();
        let result = plugin.redact_text("contact me at alice@example.com please");
        assert_eq!(result, "contact me at <REDACTED> please");
    }

    #[test]
    fn test_specific_tokens() {
        let plugin = RedactionPlugin::new(RedactionOptions {
            specific_tokens: true,
            ..Default::default()
        });
        let result = plugin.redact_text("mail alice@example.com");
        assert_eq!(result, "mail <REDACTED_EMAIL>");
    }

    #[test]
    fn test_allow_list_is_kept() {
        let plugin = RedactionPlugin::new(RedactionOptions {
            allow_list: vec!["support@example.com".to_string()],
            ..Default::default()
        });
        let result = plugin.redact_text("write support@example.com or alice@example.com");
        assert_eq!(result, "write support@example.com or <REDACTED>");
    }

    #[test]
    fn test_redacts_ssn_and_phone() {
        let plugin = RedactionPlugin::new(RedactionOptions {
            specific_tokens: true,
            ..Default::default()
        });
        assert!(plugin.redact_text("ssn 123-45-6789").contains("<REDACTED_"));
        assert!(plugin
            .redact_text("call (555) 867-5309 now")
            .contains("<REDACTED_"));
    }

    #[test]
    fn test_redacts_credentials() {
        let plugin = RedactionPlugin::default();
        let result = plugin.redact_text("use api_key=sk-abc123 for auth");
        assert!(!result.contains("sk-abc123"));
    }

    #[test]
    fn test_pattern_subset() {
        let plugin = RedactionPlugin::new(RedactionOptions {
            patterns: Some(vec![PiiPattern::Email]),
            ..Default::default()
        });
        // Email redacted, SSN left alone.
        let result = plugin.redact_text("alice@example.com 123-45-6789");
        assert!(result.starts_with("<REDACTED>"));
        assert!(result.contains("123-45-6789"));
    }

    #[test]
    fn test_custom_pattern() {
        let plugin = RedactionPlugin::new(RedactionOptions {
            patterns: Some(vec![]),
            custom_patterns: vec![Regex::new(r"order-\d+").unwrap()],
            ..Default::default()
        });
        assert_eq!(plugin.redact_text("see order-12345"), "see <REDACTED>");
    }

    #[test]
    fn test_on_span_redacts_nested_values() {
        let plugin = RedactionPlugin::default();
        let mut span = SpanData::start("span_1", "lookup", crate::types::SpanKind::Tool, None);
        span.input = Some(serde_json::json!({"query": "email alice@example.com"}));
        span.output = Some(serde_json::json!(["bob@example.com"]));

        plugin.on_span(&mut span);

        let input = span.input.unwrap();
        assert_eq!(input["query"], "email <REDACTED>");
        assert_eq!(span.output.unwrap()[0], "<REDACTED>");
    }

    #[test]
    fn test_on_interaction_end_redacts_text_and_attachments() {
        let plugin = RedactionPlugin::default();
        let mut interaction = InteractionData {
            interaction_id: "int_1".to_string(),
            user_id: None,
            conversation_id: None,
            start_time: chrono::Utc::now(),
            input: Some("reach me at alice@example.com".to_string()),
            output: Some("done".to_string()),
            model: None,
            event: "interaction".to_string(),
            properties: HashMap::from([(
                "note".to_string(),
                serde_json::json!("cc bob@example.com"),
            )]),
            attachments: vec![crate::types::Attachment::text(
                "from carol@example.com",
                crate::types::AttachmentRole::Input,
            )],
            spans: Vec::new(),
        };

        plugin.on_interaction_end(&mut interaction);

        assert_eq!(interaction.input.as_deref(), Some("reach me at <REDACTED>"));
        assert_eq!(interaction.properties["note"], "cc <REDACTED>");
        assert_eq!(interaction.attachments[0].value, "from <REDACTED>");
    }
}
