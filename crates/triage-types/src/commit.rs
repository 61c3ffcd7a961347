//! Commit identifiers and repository identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use triage_error::{Result, TriageError};

use crate::time::Timestamp;

/// Length of a full SHA-1 commit id in hex digits.
pub const COMMIT_ID_LEN: usize = 40;

/// Canonical 40-hex, lowercase commit id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitId(String);

impl CommitId {
    /// Parse a full commit id. Short refs are rejected; resolve them first.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.len() != COMMIT_ID_LEN || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TriageError::UnresolvableCommit {
                revision: raw.to_owned(),
            });
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First seven digits, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..7]
    }
}

impl TryFrom<String> for CommitId {
    type Error = TriageError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CommitId> for String {
    fn from(value: CommitId) -> Self {
        value.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resolved commit with its commit date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub committed_at: Timestamp,
}

/// Identity of a source repository (its canonical URL).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryId(String);

impl RepositoryId {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of one blame lookup: which commit last touched `file:line` as of
/// `revision` in `repository`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlameKey {
    pub repository: RepositoryId,
    pub revision: CommitId,
    pub file: String,
    pub line: u32,
}
