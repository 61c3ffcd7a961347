//! Reopen rules for bugs that keep occurring after being fixed.
//!
//! States are `Open -> Fixed -> FixDeployed`, with a reopen transition back
//! to `Open` from either fixed state. Bugs of distributed projects (those
//! with a deploy pointer) are never reopened here: a new occurrence from an
//! old build says nothing about whether the fix worked.

use serde_json::json;
use tracing::{debug, info};
use triage_error::{Result, TriageError};
use triage_store::Tx;
use triage_types::{Bug, BugState, EventKind, Occurrence, Timestamp};

use crate::config::LifecycleConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    /// A fix not deployed within this many days is presumed superseded.
    pub stale_fix_days: u32,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self::from(&LifecycleConfig::default())
    }
}

impl From<&LifecycleConfig> for LifecyclePolicy {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            stale_fix_days: config.stale_fix_days,
        }
    }
}

/// Apply the reopen rules to `bug` for the freshly linked `occurrence`.
///
/// Returns the state the bug left when it was reopened. Must run in the
/// transaction that persisted the occurrence.
pub fn reopen_if_necessary(
    tx: &Tx<'_>,
    policy: LifecyclePolicy,
    bug: &Bug,
    occurrence: &Occurrence,
    now: Timestamp,
) -> Result<Option<BugState>> {
    if occurrence.bug_id != bug.id {
        return Err(TriageError::Internal(format!(
            "occurrence {} is linked to bug {}, not {}",
            occurrence.id, occurrence.bug_id, bug.id
        )));
    }
    if bug.is_distributed() {
        return Ok(None);
    }

    let state = bug.state();
    let reopen = match state {
        BugState::Open => false,
        BugState::FixDeployed => failing_on_current_code(tx, bug, occurrence)?,
        BugState::Fixed => {
            let threshold = now.minus_days(policy.stale_fix_days);
            bug.fixed_at.is_none_or(|fixed_at| fixed_at < threshold)
                && failing_on_current_code(tx, bug, occurrence)?
        }
    };
    if !reopen {
        debug!(bug_id = %bug.id, state = state.as_str(), "no lifecycle transition");
        return Ok(None);
    }

    tx.reopen_bug(bug.id)?;
    tx.insert_event(
        bug.id,
        EventKind::Reopen,
        &json!({
            "occurrence_id": occurrence.id,
            "from": state.as_str(),
        }),
        now,
    )?;
    info!(
        bug_id = %bug.id,
        occurrence_id = %occurrence.id,
        from = state.as_str(),
        "bug reopened"
    );
    Ok(Some(state))
}

/// Whether `occurrence` came from code that is still live: its revision was
/// never deployed, or its deploy is the environment's latest. Stragglers
/// from superseded deploys say nothing about the fix.
fn failing_on_current_code(tx: &Tx<'_>, bug: &Bug, occurrence: &Occurrence) -> Result<bool> {
    let Some(occurrence_deploy) =
        tx.latest_deploy_of_revision(bug.environment_id, &occurrence.data.revision)?
    else {
        return Ok(true);
    };
    Ok(tx
        .latest_deploy(bug.environment_id)?
        .is_some_and(|latest| latest.id == occurrence_deploy.id))
}
