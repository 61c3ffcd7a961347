use triage_blame::BlameError;
use triage_types::{Commit, Project};

/// Turns a revision reference (full or abbreviated) into a canonical commit
/// with its commit date. Implementations may refresh the repository on a
/// miss; `Ok(None)` means the repository does not know the reference.
pub trait CommitResolver: Send + Sync {
    fn resolve(&self, project: &Project, revision: &str) -> Result<Option<Commit>, BlameError>;
}
