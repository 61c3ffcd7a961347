//! Occurrence records.

use rusqlite::{Row, params};
use triage_error::Result;
use triage_types::{BugId, CommitId, NewOccurrence, Occurrence, OccurrenceId, Timestamp};

use crate::{Tx, from_json, map_sqlite_error, to_json};

struct OccurrenceRow {
    id: i64,
    bug_id: i64,
    class_name: String,
    message: String,
    backtraces: String,
    revision: String,
    build: Option<String>,
    client: String,
    hostname: Option<String>,
    occurred_at: i64,
    extra: String,
}

impl OccurrenceRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            bug_id: row.get(1)?,
            class_name: row.get(2)?,
            message: row.get(3)?,
            backtraces: row.get(4)?,
            revision: row.get(5)?,
            build: row.get(6)?,
            client: row.get(7)?,
            hostname: row.get(8)?,
            occurred_at: row.get(9)?,
            extra: row.get(10)?,
        })
    }

    fn into_occurrence(self) -> Result<Occurrence> {
        Ok(Occurrence {
            id: OccurrenceId::new(self.id),
            bug_id: BugId::new(self.bug_id),
            data: NewOccurrence {
                class_name: self.class_name,
                message: self.message,
                backtraces: from_json(&self.backtraces)?,
                revision: CommitId::parse(&self.revision)?,
                build: self.build,
                client: self.client,
                hostname: self.hostname,
                occurred_at: Timestamp::from_millis(self.occurred_at),
                extra: from_json(&self.extra)?,
            },
        })
    }
}

impl Tx<'_> {
    /// Persist an occurrence linked to `bug`.
    pub fn insert_occurrence(&self, bug: BugId, data: &NewOccurrence) -> Result<Occurrence> {
        self.tx
            .execute(
                "INSERT INTO occurrences (bug_id, class_name, message, backtraces, revision,
                     build, client, hostname, occurred_at, extra)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    bug.get(),
                    data.class_name,
                    data.message,
                    to_json(&data.backtraces)?,
                    data.revision.as_str(),
                    data.build,
                    data.client,
                    data.hostname,
                    data.occurred_at.as_millis(),
                    to_json(&data.extra)?,
                ],
            )
            .map_err(map_sqlite_error)?;
        Ok(Occurrence {
            id: OccurrenceId::new(self.tx.last_insert_rowid()),
            bug_id: bug,
            data: data.clone(),
        })
    }

    /// Occurrences of `bug`, oldest first.
    pub fn occurrences_of_bug(&self, bug: BugId) -> Result<Vec<Occurrence>> {
        let mut stmt = self
            .tx
            .prepare(
                "SELECT id, bug_id, class_name, message, backtraces, revision, build, client,
                     hostname, occurred_at, extra
                 FROM occurrences WHERE bug_id = ?1 ORDER BY occurred_at, id",
            )
            .map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map(params![bug.get()], OccurrenceRow::read)
            .map_err(map_sqlite_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite_error)?;
        rows.into_iter().map(OccurrenceRow::into_occurrence).collect()
    }

    pub fn count_occurrences(&self) -> Result<u64> {
        let count: i64 = self
            .tx
            .query_row("SELECT COUNT(*) FROM occurrences", [], |row| row.get(0))
            .map_err(map_sqlite_error)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
