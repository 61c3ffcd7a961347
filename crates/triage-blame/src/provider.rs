use thiserror::Error;
use triage_types::{BlameKey, CommitId};

/// Failure of the underlying VCS blame. Never fatal to ingestion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlameError {
    /// The repository could not be read (missing clone, fetch failure, ...).
    #[error("repository unavailable: {0}")]
    Unavailable(String),

    /// The blame did not finish in time.
    #[error("blame timed out after {millis}ms")]
    TimedOut { millis: u64 },
}

/// Answers "which commit last touched `file:line` as of `revision`".
///
/// `Ok(None)` means the VCS has no answer (file absent at that revision,
/// line out of range).
pub trait BlameProvider: Send + Sync {
    fn blame(&self, key: &BlameKey) -> Result<Option<CommitId>, BlameError>;
}
