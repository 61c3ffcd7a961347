//! Message normalization and PII redaction applied before persistence.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use triage_error::{Result, TriageError};

use crate::config::FilterConfig;

/// Replacement for redacted spans.
pub const FILTERED: &str = "[FILTERED]";

/// Normalizes an exception message into a template, so messages that only
/// differ in volatile tokens group together.
pub trait MessageFilter: Send + Sync {
    fn filter(&self, class_name: &str, message: &str) -> String;
}

/// Removes personal data from occurrence text.
pub trait Redactor: Send + Sync {
    fn redact(&self, text: &str) -> String;

    /// Redact every string inside `value`, keys excluded.
    fn redact_value(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.redact(text)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, v)| (key.clone(), self.redact_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Template filter
// ---------------------------------------------------------------------------

static OBJECT_INSPECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#<([A-Za-z_][\w:]*)[^>]*>").expect("valid regex"));
static UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b")
        .expect("valid regex")
});
static HEX_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b0x[0-9a-fA-F]+\b").expect("valid regex"));
static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]*"|`[^`']*'"#).expect("valid regex"));
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)?\b").expect("valid regex"));

/// Default [`MessageFilter`]: object inspections keep only their class,
/// UUIDs, addresses, quoted strings and numbers become placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateMessageFilter;

impl MessageFilter for TemplateMessageFilter {
    fn filter(&self, _class_name: &str, message: &str) -> String {
        let message = OBJECT_INSPECTION.replace_all(message, "#<$1>");
        let message = UUID.replace_all(&message, "[UUID]");
        let message = HEX_ADDRESS.replace_all(&message, "[ADDRESS]");
        let message = QUOTED.replace_all(&message, "[STRING]");
        let message = NUMBER.replace_all(&message, "[NUMBER]");
        message.trim().to_owned()
    }
}

// ---------------------------------------------------------------------------
// Redactor
// ---------------------------------------------------------------------------

const EMAIL_PATTERN: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";

/// Default [`Redactor`], replacing email addresses and configured patterns
/// with `[FILTERED]`.
#[derive(Debug, Clone, Default)]
pub struct PiiRedactor {
    patterns: Vec<Regex>,
}

impl PiiRedactor {
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        let mut sources = Vec::with_capacity(config.extra_patterns.len() + 1);
        if config.redact_emails {
            sources.push(EMAIL_PATTERN);
        }
        sources.extend(config.extra_patterns.iter().map(String::as_str));
        let patterns = sources
            .into_iter()
            .map(|source| {
                Regex::new(source).map_err(|err| TriageError::InvalidConfig {
                    detail: format!("filter pattern '{source}': {err}"),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Redactor for PiiRedactor {
    fn redact(&self, text: &str) -> String {
        self.patterns
            .iter()
            .fold(text.to_owned(), |acc, pattern| {
                pattern.replace_all(&acc, FILTERED).into_owned()
            })
    }
}
