//! Blamer strategies: how an occurrence becomes bug search criteria.

use triage_error::Result;
use triage_types::{BacktraceThread, BlamerKind, Commit, Project, SearchCriteria};

use crate::classify::PathClassifier;
use crate::context::IngestContext;
use crate::localizer::{FaultLocalizer, LocalizedFault};

/// What a strategy needs to know about one occurrence.
pub struct CriteriaInput<'a> {
    pub project: &'a Project,
    pub class_name: &'a str,
    pub backtraces: &'a [BacktraceThread],
    /// Commit the reporting process was running.
    pub reference: &'a Commit,
    /// Normalized message, see [`MessageFilter`](crate::MessageFilter).
    pub message_template: &'a str,
    pub classifier: &'a dyn PathClassifier,
}

/// Criteria plus the location they were derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub criteria: SearchCriteria,
    pub fault: LocalizedFault,
}

pub trait SearchStrategy {
    fn compute_search_criteria(
        &self,
        cx: &IngestContext,
        localizer: &FaultLocalizer,
        input: &CriteriaInput<'_>,
    ) -> Result<Located>;
}

impl SearchStrategy for BlamerKind {
    fn compute_search_criteria(
        &self,
        cx: &IngestContext,
        localizer: &FaultLocalizer,
        input: &CriteriaInput<'_>,
    ) -> Result<Located> {
        let fault = match self {
            Self::Recency => localizer.localize(
                cx,
                input.project,
                input.backtraces,
                input.reference,
                input.classifier,
            )?,
            Self::Simple | Self::Message => {
                FaultLocalizer::topmost_project_frame(input.backtraces, input.classifier)
            }
        };
        let message = match self {
            Self::Message => Some(input.message_template.to_owned()),
            Self::Recency | Self::Simple => None,
        };
        Ok(Located {
            criteria: SearchCriteria {
                class_name: input.class_name.to_owned(),
                file: fault.file.clone(),
                line: fault.line,
                blamed_revision: fault.blamed_revision.clone(),
                message,
            },
            fault,
        })
    }
}
