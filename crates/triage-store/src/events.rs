//! Event rows left for downstream notification observers.

use rusqlite::params;
use serde_json::Value;
use triage_error::Result;
use triage_types::{BugId, EventId, EventKind, Timestamp};

use crate::{Tx, from_json, map_sqlite_error, to_json};

/// A stored event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub id: EventId,
    pub bug_id: BugId,
    pub kind: String,
    pub payload: Value,
    pub created_at: Timestamp,
}

impl Tx<'_> {
    pub fn insert_event(
        &self,
        bug: BugId,
        kind: EventKind,
        payload: &Value,
        at: Timestamp,
    ) -> Result<EventId> {
        self.tx
            .execute(
                "INSERT INTO events (bug_id, kind, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![bug.get(), kind.as_str(), to_json(payload)?, at.as_millis()],
            )
            .map_err(map_sqlite_error)?;
        Ok(EventId::new(self.tx.last_insert_rowid()))
    }

    /// Events of `bug` in insertion order.
    pub fn events_of_bug(&self, bug: BugId) -> Result<Vec<EventRecord>> {
        let mut stmt = self
            .tx
            .prepare(
                "SELECT id, bug_id, kind, payload, created_at FROM events
                 WHERE bug_id = ?1 ORDER BY id",
            )
            .map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map(params![bug.get()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(map_sqlite_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite_error)?;
        rows.into_iter()
            .map(|(id, bug_id, kind, payload, created_at)| {
                Ok(EventRecord {
                    id: EventId::new(id),
                    bug_id: BugId::new(bug_id),
                    kind,
                    payload: from_json(&payload)?,
                    created_at: Timestamp::from_millis(created_at),
                })
            })
            .collect()
    }
}
