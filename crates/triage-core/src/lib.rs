//! Triage core: turns raw error reports into occurrences attached to the
//! right bug, and keeps each bug's lifecycle consistent.
//!
//! The entry point is [`Pipeline`]. It wires together the
//! [`FaultLocalizer`] (which line is to blame), the blamer strategies
//! (what counts as "the same defect"), the bug matcher and the lifecycle
//! rules, all on top of the SQLite store in `triage-store` and the blame
//! cache in `triage-blame`.

pub mod blamer;
pub mod classify;
pub mod config;
pub mod context;
pub mod filters;
pub mod lifecycle;
pub mod localizer;
pub mod logging;
pub mod matcher;
pub mod pipeline;
pub mod resolver;

pub use blamer::{CriteriaInput, Located, SearchStrategy};
pub use classify::{PathClass, PathClassifier, ProjectPathClassifier};
pub use config::{
    BlameCacheConfig, FilterConfig, IngestConfig, LifecycleConfig, LoggingConfig, StoreConfig,
    TriageConfig,
};
pub use context::IngestContext;
pub use filters::{FILTERED, MessageFilter, PiiRedactor, Redactor, TemplateMessageFilter};
pub use lifecycle::{LifecyclePolicy, reopen_if_necessary};
pub use localizer::{FaultLocalizer, LocalizedFault, UNKNOWN_FILE, score_frames};
pub use matcher::{BugMatch, find_or_create_bug, record_match_events, resolve_duplicates};
pub use pipeline::{IngestOutcome, Pipeline, PipelineBuilder};
pub use resolver::CommitResolver;
