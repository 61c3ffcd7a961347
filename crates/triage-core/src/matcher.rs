//! Bug matching: find the bug an occurrence belongs to, or create it.
//!
//! Everything here runs inside the caller's write transaction. Uniqueness
//! per match key comes from the store's atomic find-or-insert, never from a
//! separate existence check.

use std::collections::HashSet;

use serde_json::json;
use tracing::{error, info};
use triage_error::{Result, TriageError};
use triage_store::Tx;
use triage_types::{Bug, DeployId, EventKind, NewBug, OccurrenceId, Timestamp};

/// Result of [`find_or_create_bug`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BugMatch {
    /// The terminal bug, after following `duplicate_of`.
    pub bug: Bug,
    /// This call inserted the matched bug.
    pub created: bool,
    /// The matched bug was moved onto the current deploy from this one.
    pub reassigned_from: Option<DeployId>,
}

/// Find the bug matching `new.criteria`, creating it when none exists.
///
/// Without a deploy (hosted projects) the match key is the criteria within
/// the environment. With a deploy (distributed projects) an exact match
/// under that deploy wins; otherwise the newest open bug under any deploy
/// is moved onto it; otherwise a new bug is created for the deploy. Fixed
/// bugs of other deploys are never reused.
pub fn find_or_create_bug(tx: &Tx<'_>, new: &NewBug) -> Result<BugMatch> {
    let (bug, created, reassigned_from) = match new.deploy_id {
        None => {
            let (bug, created) = tx.find_or_insert_bug(new)?;
            (bug, created, None)
        }
        Some(deploy) => {
            if let Some(bug) = tx.find_bug(new.environment_id, Some(deploy), &new.criteria)? {
                (bug, false, None)
            } else if let Some(mut bug) =
                tx.find_open_deployed_bug(new.environment_id, &new.criteria)?
            {
                let previous = bug.deploy_id;
                tx.reassign_bug_deploy(bug.id, deploy)?;
                info!(
                    bug_id = %bug.id,
                    from_deploy = ?previous.map(DeployId::get),
                    to_deploy = %deploy,
                    "open bug moved to newer deploy"
                );
                bug.deploy_id = Some(deploy);
                (bug, false, previous)
            } else {
                let (bug, created) = tx.find_or_insert_bug(new)?;
                (bug, created, None)
            }
        }
    };
    if created {
        info!(
            bug_id = %bug.id,
            environment_id = %bug.environment_id,
            class_name = %bug.class_name,
            file = %bug.file,
            line = bug.line,
            "bug created"
        );
    }

    let bug = resolve_duplicates(tx, bug)?;
    Ok(BugMatch {
        bug,
        created,
        reassigned_from,
    })
}

/// Follow `duplicate_of` to the terminal bug.
///
/// A revisited bug is [`TriageError::DuplicateCycle`]; a pointer to a
/// missing bug is [`TriageError::StaleDuplicate`].
pub fn resolve_duplicates(tx: &Tx<'_>, bug: Bug) -> Result<Bug> {
    let start = bug.id;
    let mut visited = HashSet::from([bug.id]);
    let mut current = bug;
    while let Some(target) = current.duplicate_of {
        if !visited.insert(target) {
            error!(bug_id = %start, revisited = %target, "duplicate-of chain has a cycle");
            return Err(TriageError::DuplicateCycle {
                bug_id: start.get(),
            });
        }
        let Some(next) = tx.bug(target)? else {
            error!(bug_id = %current.id, target = %target, "duplicate-of points at missing bug");
            return Err(TriageError::StaleDuplicate {
                bug_id: current.id.get(),
                target: target.get(),
            });
        };
        current = next;
    }
    Ok(current)
}

/// Leave `open` / `deploy_reassigned` events for observers, naming the
/// occurrence that caused them.
pub fn record_match_events(
    tx: &Tx<'_>,
    matched: &BugMatch,
    occurrence: OccurrenceId,
    at: Timestamp,
) -> Result<()> {
    if matched.created {
        tx.insert_event(
            matched.bug.id,
            EventKind::Open,
            &json!({ "occurrence_id": occurrence }),
            at,
        )?;
    }
    if let Some(from) = matched.reassigned_from {
        tx.insert_event(
            matched.bug.id,
            EventKind::DeployReassigned,
            &json!({
                "occurrence_id": occurrence,
                "from_deploy_id": from,
                "to_deploy_id": matched.bug.deploy_id,
            }),
            at,
        )?;
    }
    Ok(())
}
