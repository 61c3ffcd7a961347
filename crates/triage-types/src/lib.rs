//! Data model for the triage core.
//!
//! Everything here is plain data: identifiers, timestamps, commits, the
//! inbound report shape and the persisted records (`Bug`, `Occurrence`,
//! `Deploy`). Persistence lives in `triage-store`; behavior in `triage-core`.

pub mod backtrace;
pub mod commit;
pub mod ids;
pub mod model;
pub mod report;
pub mod time;

pub use backtrace::{BacktraceThread, Frame, faulted_thread};
pub use commit::{BlameKey, Commit, CommitId, RepositoryId};
pub use ids::{BugId, DeployId, EnvironmentId, EventId, OccurrenceId, ProjectId};
pub use model::{
    BlamerKind, Bug, BugState, Deploy, Environment, EventKind, NewBug, NewOccurrence, Occurrence,
    Project, SearchCriteria,
};
pub use report::{RawReport, RevisionContext, ValidReport};
pub use time::{Clock, MILLIS_PER_DAY, ManualClock, SystemClock, Timestamp};
