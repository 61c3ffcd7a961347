//! Inbound report payload and its validated form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use triage_error::{Result, TriageError};

use crate::backtrace::BacktraceThread;
use crate::time::Timestamp;

/// An error report exactly as a client sent it. Every field the pipeline
/// requires is optional here so that validation, not deserialization,
/// decides what is missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawReport {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub environment: String,
    pub class_name: Option<String>,
    pub message: Option<String>,
    pub backtraces: Option<Vec<BacktraceThread>>,
    pub occurred_at: Option<Timestamp>,
    pub client: Option<String>,
    pub revision: Option<String>,
    pub build: Option<String>,
    pub hostname: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

/// Which commit/build context a report carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionContext {
    Revision(String),
    Build(String),
    Both { revision: String, build: String },
}

impl RevisionContext {
    #[must_use]
    pub fn build(&self) -> Option<&str> {
        match self {
            Self::Revision(_) => None,
            Self::Build(build) | Self::Both { build, .. } => Some(build),
        }
    }
}

/// A report whose required fields are all present and non-blank.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidReport {
    pub api_key: String,
    pub environment: String,
    pub class_name: String,
    pub message: String,
    pub backtraces: Vec<BacktraceThread>,
    pub occurred_at: Timestamp,
    pub client: String,
    pub context: RevisionContext,
    pub hostname: Option<String>,
    pub extra: BTreeMap<String, Value>,
}

fn required(value: Option<&String>, field: &'static str) -> Result<String> {
    match value.map(|raw| raw.trim()) {
        Some(trimmed) if !trimmed.is_empty() => Ok(trimmed.to_owned()),
        _ => Err(TriageError::InvalidReport { field }),
    }
}

fn optional(value: Option<&String>) -> Option<String> {
    value
        .map(|raw| raw.trim())
        .filter(|trimmed| !trimmed.is_empty())
        .map(str::to_owned)
}

impl RawReport {
    /// Check required fields, failing on the first one missing.
    pub fn validate(&self) -> Result<ValidReport> {
        let api_key = required(Some(&self.api_key), "api_key")?;
        let environment = required(Some(&self.environment), "environment")?;
        let class_name = required(self.class_name.as_ref(), "class_name")?;
        let message = required(self.message.as_ref(), "message")?;
        let backtraces = match &self.backtraces {
            Some(threads) if !threads.is_empty() => threads.clone(),
            _ => return Err(TriageError::InvalidReport { field: "backtraces" }),
        };
        let occurred_at = self
            .occurred_at
            .ok_or(TriageError::InvalidReport { field: "occurred_at" })?;
        let client = required(self.client.as_ref(), "client")?;
        let context = match (optional(self.revision.as_ref()), optional(self.build.as_ref())) {
            (Some(revision), Some(build)) => RevisionContext::Both { revision, build },
            (Some(revision), None) => RevisionContext::Revision(revision),
            (None, Some(build)) => RevisionContext::Build(build),
            (None, None) => return Err(TriageError::InvalidReport { field: "revision" }),
        };

        Ok(ValidReport {
            api_key,
            environment,
            class_name,
            message,
            backtraces,
            occurred_at,
            client,
            context,
            hostname: optional(self.hostname.as_ref()),
            extra: self.extra.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtrace::Frame;

    fn complete() -> RawReport {
        RawReport {
            api_key: "key".to_owned(),
            environment: "production".to_owned(),
            class_name: Some("ArgumentError".to_owned()),
            message: Some("wrong number of arguments".to_owned()),
            backtraces: Some(vec![BacktraceThread::faulted(vec![Frame::source(
                "lib/a.rb", 5, "call",
            )])]),
            occurred_at: Some(Timestamp::from_millis(1)),
            client: Some("rails".to_owned()),
            revision: Some("a".repeat(40)),
            ..RawReport::default()
        }
    }

    #[test]
    fn test_complete_report_validates() {
        let valid = complete().validate().expect("report should validate");
        assert_eq!(valid.class_name, "ArgumentError");
        assert_eq!(valid.context, RevisionContext::Revision("a".repeat(40)));
        assert_eq!(valid.context.build(), None);
    }

    #[test]
    fn test_blank_fields_are_missing() {
        let mut report = complete();
        report.class_name = Some("   ".to_owned());
        let err = report.validate().expect_err("blank class name");
        assert!(matches!(err, TriageError::InvalidReport { field: "class_name" }));

        let mut report = complete();
        report.backtraces = Some(vec![]);
        let err = report.validate().expect_err("empty backtraces");
        assert!(matches!(err, TriageError::InvalidReport { field: "backtraces" }));
    }

    #[test]
    fn test_revision_or_build_required() {
        let mut report = complete();
        report.revision = None;
        let err = report.validate().expect_err("no revision or build");
        assert!(matches!(err, TriageError::InvalidReport { field: "revision" }));

        report.build = Some("2024.1".to_owned());
        let valid = report.validate().expect("build alone is enough");
        assert_eq!(valid.context, RevisionContext::Build("2024.1".to_owned()));

        report.revision = Some("b".repeat(40));
        let valid = report.validate().expect("both");
        assert_eq!(valid.context.build(), Some("2024.1"));
    }

    #[test]
    fn test_report_parses_from_json() {
        let json = r#"{
            "api_key": "k", "environment": "production",
            "class_name": "NoMethodError", "message": "undefined method",
            "backtraces": [{"name": "main", "faulted": true,
                            "frames": [{"type": "source", "file": "app/x.rb", "line": 3}]}],
            "occurred_at": 1700000000000, "client": "rails",
            "revision": "0123456789abcdef0123456789abcdef01234567",
            "extra": {"user_email": "a@b.example"}
        }"#;
        let raw: RawReport = serde_json::from_str(json).expect("json should parse");
        let valid = raw.validate().expect("report should validate");
        assert_eq!(valid.occurred_at.as_millis(), 1_700_000_000_000);
        assert!(valid.extra.contains_key("user_email"));
    }
}
