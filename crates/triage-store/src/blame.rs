//! Blame cache table: `(repository, revision, file, line) -> commit` with a
//! last-touched column for LRU eviction.

use rusqlite::{OptionalExtension, params};
use triage_error::Result;
use triage_types::{BlameKey, CommitId, Timestamp};

use crate::{Tx, map_sqlite_error};

impl Tx<'_> {
    /// Look up `key`, refreshing its last-touched time on a hit.
    pub fn touch_blame_entry(&self, key: &BlameKey, now: Timestamp) -> Result<Option<CommitId>> {
        let hit: Option<(i64, String)> = self
            .tx
            .query_row(
                "SELECT id, blamed_revision FROM blame_entries
                 WHERE repository = ?1 AND revision = ?2 AND file = ?3 AND line = ?4",
                params![
                    key.repository.as_str(),
                    key.revision.as_str(),
                    key.file,
                    key.line
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(map_sqlite_error)?;
        let Some((id, blamed)) = hit else {
            return Ok(None);
        };
        self.tx
            .execute(
                "UPDATE blame_entries SET last_touched = ?2 WHERE id = ?1",
                params![id, now.as_millis()],
            )
            .map_err(map_sqlite_error)?;
        CommitId::parse(&blamed).map(Some)
    }

    /// Entry count, read from the trigger-maintained counter row.
    pub fn count_blame_entries(&self) -> Result<u64> {
        let count: i64 = self
            .tx
            .query_row(
                "SELECT entries FROM blame_entry_count WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .map_err(map_sqlite_error)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Delete the `count` least recently touched entries (ties by id).
    pub fn evict_oldest_blame_entries(&self, count: u64) -> Result<usize> {
        if count == 0 {
            return Ok(0);
        }
        self.tx
            .execute(
                "DELETE FROM blame_entries WHERE id IN (
                     SELECT id FROM blame_entries ORDER BY last_touched ASC, id ASC LIMIT ?1
                 )",
                params![i64::try_from(count).unwrap_or(i64::MAX)],
            )
            .map_err(map_sqlite_error)
    }

    /// Overwrite and touch an existing entry. Returns whether `key` was
    /// present; a concurrent writer may have cached it since our miss.
    pub fn refresh_blame_entry(
        &self,
        key: &BlameKey,
        blamed: &CommitId,
        now: Timestamp,
    ) -> Result<bool> {
        let updated = self
            .tx
            .execute(
                "UPDATE blame_entries SET blamed_revision = ?5, last_touched = ?6
                 WHERE repository = ?1 AND revision = ?2 AND file = ?3 AND line = ?4",
                params![
                    key.repository.as_str(),
                    key.revision.as_str(),
                    key.file,
                    key.line,
                    blamed.as_str(),
                    now.as_millis()
                ],
            )
            .map_err(map_sqlite_error)?;
        Ok(updated > 0)
    }

    /// Insert a new entry. Call [`Self::refresh_blame_entry`] first in the
    /// same transaction; a duplicate key is a storage error here.
    pub fn insert_blame_entry(
        &self,
        key: &BlameKey,
        blamed: &CommitId,
        now: Timestamp,
    ) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO blame_entries
                     (repository, revision, file, line, blamed_revision, last_touched)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    key.repository.as_str(),
                    key.revision.as_str(),
                    key.file,
                    key.line,
                    blamed.as_str(),
                    now.as_millis()
                ],
            )
            .map_err(map_sqlite_error)?;
        Ok(())
    }

    /// Every cached `(file, line, last_touched)`, least recently touched first.
    pub fn blame_entries_by_age(&self) -> Result<Vec<(String, u32, Timestamp)>> {
        let mut stmt = self
            .tx
            .prepare(
                "SELECT file, line, last_touched FROM blame_entries
                 ORDER BY last_touched ASC, id ASC",
            )
            .map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    Timestamp::from_millis(row.get(2)?),
                ))
            })
            .map_err(map_sqlite_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite_error)?;
        Ok(rows)
    }
}
