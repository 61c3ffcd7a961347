use thiserror::Error;

/// Primary error type for the triage core.
///
/// Variants are grouped the way the ingestion client needs to act on them:
/// fix the request, fix the configuration, retry later, or escalate.
#[derive(Error, Debug)]
pub enum TriageError {
    // === Invalid input ===
    /// A required report field is missing or blank.
    #[error("report is missing required field '{field}'")]
    InvalidReport { field: &'static str },

    /// A report field is present but malformed.
    #[error("report field '{field}' is invalid: {detail}")]
    InvalidField { field: &'static str, detail: String },

    // === Unknown references ===
    /// The API key does not belong to any project.
    #[error("unknown project for the supplied API key")]
    UnknownProject,

    /// A build was reported without a revision and no deploy records it.
    #[error("unknown build '{build}' and no revision given")]
    UnknownDeploy { build: String },

    // === Commit context ===
    /// No canonical commit could be established for a revision.
    #[error("unresolvable commit '{revision}'")]
    UnresolvableCommit { revision: String },

    // === Transient ===
    /// Write-write conflict or busy database; the whole unit may be retried.
    #[error("storage conflict: {detail}")]
    Conflict { detail: String },

    /// The bounded retry loop gave up.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    // === Duplicate chain corruption ===
    /// Following `duplicate_of` pointers revisited a bug.
    #[error("duplicate-of chain starting at bug {bug_id} contains a cycle")]
    DuplicateCycle { bug_id: i64 },

    /// A `duplicate_of` pointer names a bug that does not exist.
    #[error("bug {bug_id} is marked duplicate of missing bug {target}")]
    StaleDuplicate { bug_id: i64, target: i64 },

    // === Storage / environment ===
    /// Non-transient storage failure.
    #[error("storage error: {detail}")]
    Storage { detail: String },

    /// Configuration document failed to parse or validate.
    #[error("invalid configuration: {detail}")]
    InvalidConfig { detail: String },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding of a stored column failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    // === Cancellation ===
    /// The caller cancelled this ingestion.
    #[error("ingestion cancelled")]
    Cancelled,

    /// The ingestion deadline passed before `stage` could run.
    #[error("deadline exceeded before {stage}")]
    DeadlineExceeded { stage: &'static str },

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Numeric error codes surfaced to ingestion clients.
///
/// Values follow HTTP status semantics so a thin transport can forward them
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    /// Unknown project or deploy.
    NotFound = 404,
    /// Ingestion cancelled by the caller.
    Cancelled = 499,
    /// Transient conflict, retry later.
    Conflict = 409,
    /// Malformed or incomplete report.
    Unprocessable = 422,
    /// Internal or storage failure.
    Internal = 500,
    /// Retries exhausted while the store stayed contended.
    Unavailable = 503,
    /// Deadline passed.
    Timeout = 504,
}

/// Coarse classification of what the caller should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Fix the request.
    Permanent,
    /// Fix the project/deploy configuration.
    Configuration,
    /// Retry later.
    Transient,
    /// Escalate; the system is in an unexpected state.
    Fatal,
}

impl TriageError {
    /// Shorthand for [`TriageError::Storage`].
    pub fn storage(detail: impl Into<String>) -> Self {
        Self::Storage {
            detail: detail.into(),
        }
    }

    /// Shorthand for [`TriageError::Conflict`].
    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::Conflict {
            detail: detail.into(),
        }
    }

    /// Map this error to a client-facing code.
    #[allow(clippy::match_same_arms)]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidReport { .. }
            | Self::InvalidField { .. }
            | Self::UnresolvableCommit { .. } => ErrorCode::Unprocessable,
            Self::UnknownProject | Self::UnknownDeploy { .. } => ErrorCode::NotFound,
            Self::Conflict { .. } => ErrorCode::Conflict,
            Self::RetriesExhausted { .. } => ErrorCode::Unavailable,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::DeadlineExceeded { .. } => ErrorCode::Timeout,
            Self::DuplicateCycle { .. }
            | Self::StaleDuplicate { .. }
            | Self::Storage { .. }
            | Self::InvalidConfig { .. }
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// What the caller should do about this error.
    pub const fn error_class(&self) -> ErrorClass {
        match self.error_code() {
            ErrorCode::Unprocessable => ErrorClass::Permanent,
            ErrorCode::NotFound => ErrorClass::Configuration,
            ErrorCode::Conflict | ErrorCode::Unavailable | ErrorCode::Timeout => {
                ErrorClass::Transient
            }
            ErrorCode::Cancelled | ErrorCode::Internal => ErrorClass::Fatal,
        }
    }

    /// Whether the ingestion unit may be retried in-process.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::InvalidReport { .. } | Self::InvalidField { .. } => {
                Some("Fix the report payload and resend it")
            }
            Self::UnknownProject => Some("Check the API key configured in the client"),
            Self::UnknownDeploy { .. } => {
                Some("Record the deploy before reporting, or include the revision")
            }
            Self::UnresolvableCommit { .. } => {
                Some("Push the revision to the project repository")
            }
            Self::Conflict { .. } | Self::RetriesExhausted { .. } => {
                Some("Retry the report after a short delay")
            }
            Self::DuplicateCycle { .. } | Self::StaleDuplicate { .. } => {
                Some("Repair the duplicate-of links of the affected bugs")
            }
            Self::InvalidConfig { .. } => Some("Fix the configuration file"),
            _ => None,
        }
    }
}

/// Result type alias using `TriageError`.
pub type Result<T> = std::result::Result<T, TriageError>;
