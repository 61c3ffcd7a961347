//! Persisted records.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use triage_error::TriageError;

use crate::backtrace::BacktraceThread;
use crate::commit::{CommitId, RepositoryId};
use crate::ids::{BugId, DeployId, EnvironmentId, OccurrenceId, ProjectId};
use crate::time::Timestamp;

// ---------------------------------------------------------------------------
// Project / environment / deploy
// ---------------------------------------------------------------------------

/// Strategy a project uses to turn an occurrence into search criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlamerKind {
    /// Score every blamed project frame by stack height and commit recency.
    #[default]
    Recency,
    /// Topmost project frame, no blame.
    Simple,
    /// Like `Simple`, but the message template joins the criteria.
    Message,
}

impl BlamerKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recency => "recency",
            Self::Simple => "simple",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for BlamerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlamerKind {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recency" => Ok(Self::Recency),
            "simple" => Ok(Self::Simple),
            "message" => Ok(Self::Message),
            other => Err(TriageError::InvalidConfig {
                detail: format!("unknown blamer '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub api_key: String,
    pub repository: RepositoryId,
    pub blamer: BlamerKind,
    /// Path prefixes whose frames never count as project code.
    pub filter_paths: Vec<String>,
    /// Path prefixes that count as project code even inside filtered trees.
    pub whitelist_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub project_id: ProjectId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deploy {
    pub id: DeployId,
    pub environment_id: EnvironmentId,
    pub revision: CommitId,
    pub build: Option<String>,
    pub deployed_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Bug
// ---------------------------------------------------------------------------

/// Lifecycle position of a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugState {
    Open,
    Fixed,
    FixDeployed,
}

impl BugState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Fixed => "fixed",
            Self::FixDeployed => "fix_deployed",
        }
    }
}

/// What identifies "the same defect".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub class_name: String,
    pub file: String,
    pub line: u32,
    pub blamed_revision: Option<CommitId>,
    /// Message template, only for message-sensitive blamers.
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bug {
    pub id: BugId,
    pub environment_id: EnvironmentId,
    /// Set for bugs of distributed projects.
    pub deploy_id: Option<DeployId>,
    pub class_name: String,
    pub file: String,
    pub line: u32,
    pub blamed_revision: Option<CommitId>,
    pub match_message: Option<String>,
    pub message_template: String,
    pub special_file: bool,
    pub fixed: bool,
    pub fix_deployed: bool,
    pub irrelevant: bool,
    pub duplicate_of: Option<BugId>,
    pub fixed_at: Option<Timestamp>,
    pub first_occurrence_at: Timestamp,
    pub latest_occurrence_at: Option<Timestamp>,
    pub occurrence_count: u64,
}

impl Bug {
    #[must_use]
    pub const fn state(&self) -> BugState {
        match (self.fixed, self.fix_deployed) {
            (false, _) => BugState::Open,
            (true, false) => BugState::Fixed,
            (true, true) => BugState::FixDeployed,
        }
    }

    #[must_use]
    pub const fn is_distributed(&self) -> bool {
        self.deploy_id.is_some()
    }

    /// The criteria this bug was created for.
    #[must_use]
    pub fn criteria(&self) -> SearchCriteria {
        SearchCriteria {
            class_name: self.class_name.clone(),
            file: self.file.clone(),
            line: self.line,
            blamed_revision: self.blamed_revision.clone(),
            message: self.match_message.clone(),
        }
    }
}

/// Attributes for a bug that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBug {
    pub environment_id: EnvironmentId,
    pub deploy_id: Option<DeployId>,
    pub criteria: SearchCriteria,
    pub message_template: String,
    pub special_file: bool,
    pub first_occurrence_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Occurrence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOccurrence {
    pub class_name: String,
    pub message: String,
    pub backtraces: Vec<BacktraceThread>,
    pub revision: CommitId,
    pub build: Option<String>,
    pub client: String,
    pub hostname: Option<String>,
    pub occurred_at: Timestamp,
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: OccurrenceId,
    pub bug_id: BugId,
    #[serde(flatten)]
    pub data: NewOccurrence,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Kinds of event rows left for downstream observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Open,
    Reopen,
    DeployReassigned,
}

impl EventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Reopen => "reopen",
            Self::DeployReassigned => "deploy_reassigned",
        }
    }
}
