//! Bug records and the atomic find-or-create primitive.

use rusqlite::{OptionalExtension, Row, params};
use tracing::debug;
use triage_error::{Result, TriageError};
use triage_types::{
    Bug, BugId, CommitId, DeployId, EnvironmentId, NewBug, SearchCriteria, Timestamp,
};

use crate::{Tx, is_unique_violation, map_sqlite_error};

const BUG_COLUMNS: &str = "id, environment_id, deploy_id, class_name, file, line, \
     blamed_revision, match_message, message_template, special_file, fixed, fix_deployed, \
     irrelevant, duplicate_of_id, fixed_at, first_occurrence_at, latest_occurrence_at, \
     occurrence_count";

/// Matches the `bugs_match_key` unique index column for column.
const MATCH_KEY: &str = "environment_id = ?1 AND class_name = ?2 AND file = ?3 AND line = ?4 \
     AND ifnull(blamed_revision, '') = ifnull(?5, '') \
     AND ifnull(match_message, '') = ifnull(?6, '')";

struct BugRow {
    id: i64,
    environment_id: i64,
    deploy_id: Option<i64>,
    class_name: String,
    file: String,
    line: u32,
    blamed_revision: Option<String>,
    match_message: Option<String>,
    message_template: String,
    special_file: bool,
    fixed: bool,
    fix_deployed: bool,
    irrelevant: bool,
    duplicate_of_id: Option<i64>,
    fixed_at: Option<i64>,
    first_occurrence_at: i64,
    latest_occurrence_at: Option<i64>,
    occurrence_count: i64,
}

impl BugRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            environment_id: row.get(1)?,
            deploy_id: row.get(2)?,
            class_name: row.get(3)?,
            file: row.get(4)?,
            line: row.get(5)?,
            blamed_revision: row.get(6)?,
            match_message: row.get(7)?,
            message_template: row.get(8)?,
            special_file: row.get(9)?,
            fixed: row.get(10)?,
            fix_deployed: row.get(11)?,
            irrelevant: row.get(12)?,
            duplicate_of_id: row.get(13)?,
            fixed_at: row.get(14)?,
            first_occurrence_at: row.get(15)?,
            latest_occurrence_at: row.get(16)?,
            occurrence_count: row.get(17)?,
        })
    }

    fn into_bug(self) -> Result<Bug> {
        Ok(Bug {
            id: BugId::new(self.id),
            environment_id: EnvironmentId::new(self.environment_id),
            deploy_id: self.deploy_id.map(DeployId::new),
            class_name: self.class_name,
            file: self.file,
            line: self.line,
            blamed_revision: self
                .blamed_revision
                .as_deref()
                .map(CommitId::parse)
                .transpose()?,
            match_message: self.match_message,
            message_template: self.message_template,
            special_file: self.special_file,
            fixed: self.fixed,
            fix_deployed: self.fix_deployed,
            irrelevant: self.irrelevant,
            duplicate_of: self.duplicate_of_id.map(BugId::new),
            fixed_at: self.fixed_at.map(Timestamp::from_millis),
            first_occurrence_at: Timestamp::from_millis(self.first_occurrence_at),
            latest_occurrence_at: self.latest_occurrence_at.map(Timestamp::from_millis),
            occurrence_count: u64::try_from(self.occurrence_count).unwrap_or(0),
        })
    }
}

impl Tx<'_> {
    fn bug_where(&self, clause: &str, params: impl rusqlite::Params) -> Result<Option<Bug>> {
        self.tx
            .query_row(
                &format!("SELECT {BUG_COLUMNS} FROM bugs WHERE {clause}"),
                params,
                BugRow::read,
            )
            .optional()
            .map_err(map_sqlite_error)?
            .map(BugRow::into_bug)
            .transpose()
    }

    fn update_bug(&self, sql: &str, params: impl rusqlite::Params) -> Result<()> {
        let changed = self.tx.execute(sql, params).map_err(map_sqlite_error)?;
        if changed == 0 {
            return Err(TriageError::storage("bug update matched no row"));
        }
        Ok(())
    }

    pub fn bug(&self, id: BugId) -> Result<Option<Bug>> {
        self.bug_where("id = ?1", params![id.get()])
    }

    /// The bug holding exactly this match key. `deploy` of `None` only
    /// matches bugs without a deploy.
    pub fn find_bug(
        &self,
        environment: EnvironmentId,
        deploy: Option<DeployId>,
        criteria: &SearchCriteria,
    ) -> Result<Option<Bug>> {
        self.bug_where(
            &format!("{MATCH_KEY} AND ifnull(deploy_id, 0) = ifnull(?7, 0)"),
            params![
                environment.get(),
                criteria.class_name,
                criteria.file,
                criteria.line,
                criteria.blamed_revision.as_ref().map(CommitId::as_str),
                criteria.message,
                deploy.map(DeployId::get),
            ],
        )
    }

    /// Newest open bug matching `criteria` under any deploy.
    pub fn find_open_deployed_bug(
        &self,
        environment: EnvironmentId,
        criteria: &SearchCriteria,
    ) -> Result<Option<Bug>> {
        self.bug_where(
            &format!(
                "{MATCH_KEY} AND deploy_id IS NOT NULL AND fixed = 0 ORDER BY id DESC LIMIT 1"
            ),
            params![
                environment.get(),
                criteria.class_name,
                criteria.file,
                criteria.line,
                criteria.blamed_revision.as_ref().map(CommitId::as_str),
                criteria.message,
            ],
        )
    }

    /// Insert `new` unless its match key is taken, then return whichever
    /// bug holds the key. The flag reports whether this call created it.
    pub fn find_or_insert_bug(&self, new: &NewBug) -> Result<(Bug, bool)> {
        let criteria = &new.criteria;
        let inserted = self
            .tx
            .execute(
                "INSERT INTO bugs (environment_id, deploy_id, class_name, file, line,
                     blamed_revision, match_message, message_template, special_file,
                     first_occurrence_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT DO NOTHING",
                params![
                    new.environment_id.get(),
                    new.deploy_id.map(DeployId::get),
                    criteria.class_name,
                    criteria.file,
                    criteria.line,
                    criteria.blamed_revision.as_ref().map(CommitId::as_str),
                    criteria.message,
                    new.message_template,
                    new.special_file,
                    new.first_occurrence_at.as_millis(),
                ],
            )
            .map_err(map_sqlite_error)?;
        let bug = self
            .find_bug(new.environment_id, new.deploy_id, criteria)?
            .ok_or_else(|| TriageError::Internal("bug vanished after upsert".into()))?;
        debug!(bug_id = %bug.id, created = inserted == 1, "bug upserted");
        Ok((bug, inserted == 1))
    }

    /// Point an open bug at a newer deploy. Losing a race to another writer
    /// that claimed the same key under `deploy` is a conflict.
    pub fn reassign_bug_deploy(&self, bug: BugId, deploy: DeployId) -> Result<()> {
        match self.tx.execute(
            "UPDATE bugs SET deploy_id = ?2 WHERE id = ?1",
            params![bug.get(), deploy.get()],
        ) {
            Ok(1) => Ok(()),
            Ok(_) => Err(TriageError::storage(format!("bug {bug} not found"))),
            Err(err) if is_unique_violation(&err) => Err(TriageError::conflict(format!(
                "bug {bug} lost deploy reassignment race: {err}"
            ))),
            Err(err) => Err(map_sqlite_error(err)),
        }
    }

    /// Count one more linked occurrence.
    pub fn record_bug_occurrence(&self, bug: BugId, occurred_at: Timestamp) -> Result<()> {
        self.update_bug(
            "UPDATE bugs SET occurrence_count = occurrence_count + 1,
                 latest_occurrence_at = max(ifnull(latest_occurrence_at, ?2), ?2)
             WHERE id = ?1",
            params![bug.get(), occurred_at.as_millis()],
        )
    }

    /// Clear the fixed flags.
    pub fn reopen_bug(&self, bug: BugId) -> Result<()> {
        self.update_bug(
            "UPDATE bugs SET fixed = 0, fix_deployed = 0, fixed_at = NULL WHERE id = ?1",
            params![bug.get()],
        )
    }

    pub fn mark_bug_fixed(&self, bug: BugId, fixed_at: Timestamp) -> Result<()> {
        self.update_bug(
            "UPDATE bugs SET fixed = 1, fix_deployed = 0, fixed_at = ?2 WHERE id = ?1",
            params![bug.get(), fixed_at.as_millis()],
        )
    }

    pub fn mark_bug_fix_deployed(&self, bug: BugId) -> Result<()> {
        self.update_bug(
            "UPDATE bugs SET fix_deployed = 1 WHERE id = ?1 AND fixed = 1",
            params![bug.get()],
        )
    }

    pub fn mark_bug_irrelevant(&self, bug: BugId) -> Result<()> {
        self.update_bug(
            "UPDATE bugs SET irrelevant = 1 WHERE id = ?1",
            params![bug.get()],
        )
    }

    pub fn mark_bug_duplicate(&self, bug: BugId, target: BugId) -> Result<()> {
        self.update_bug(
            "UPDATE bugs SET duplicate_of_id = ?2 WHERE id = ?1",
            params![bug.get(), target.get()],
        )
    }

    pub fn count_bugs(&self, environment: EnvironmentId) -> Result<u64> {
        let count: i64 = self
            .tx
            .query_row(
                "SELECT COUNT(*) FROM bugs WHERE environment_id = ?1",
                params![environment.get()],
                |row| row.get(0),
            )
            .map_err(map_sqlite_error)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, NewProject, StoreOptions};

    fn criteria(blamed: Option<char>) -> SearchCriteria {
        SearchCriteria {
            class_name: "ArgumentError".to_owned(),
            file: "lib/a.rb".to_owned(),
            line: 5,
            blamed_revision: blamed
                .map(|c| CommitId::parse(&c.to_string().repeat(40)).expect("valid commit")),
            message: None,
        }
    }

    fn new_bug(env: EnvironmentId, deploy: Option<DeployId>, blamed: Option<char>) -> NewBug {
        NewBug {
            environment_id: env,
            deploy_id: deploy,
            criteria: criteria(blamed),
            message_template: "wrong number of arguments".to_owned(),
            special_file: false,
            first_occurrence_at: Timestamp::from_millis(1),
        }
    }

    fn open_db(dir: &tempfile::TempDir) -> (Database, EnvironmentId) {
        let db = Database::open(dir.path().join("triage.db"), StoreOptions::default())
            .expect("database should open");
        let env = db
            .immediate(|tx| {
                let project = tx.insert_project(&NewProject::new("p", "k", "repo"))?;
                tx.find_or_create_environment(project.id, "production")
            })
            .expect("seed should succeed");
        (db, env.id)
    }

    #[test]
    fn test_find_or_insert_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let (db, env) = open_db(&dir);
        let (first, created) = db
            .immediate(|tx| tx.find_or_insert_bug(&new_bug(env, None, None)))
            .expect("insert should succeed");
        assert!(created);
        let (second, created) = db
            .immediate(|tx| tx.find_or_insert_bug(&new_bug(env, None, None)))
            .expect("fetch should succeed");
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert!(!second.fixed);
    }

    #[test]
    fn test_null_commit_only_matches_null() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let (db, env) = open_db(&dir);
        db.immediate(|tx| {
            let (without, _) = tx.find_or_insert_bug(&new_bug(env, None, None))?;
            let (with, created) = tx.find_or_insert_bug(&new_bug(env, None, Some('a')))?;
            assert!(created);
            assert_ne!(without.id, with.id);
            assert_eq!(tx.find_bug(env, None, &criteria(None))?.map(|b| b.id), Some(without.id));
            assert_eq!(
                tx.find_bug(env, None, &criteria(Some('a')))?.map(|b| b.id),
                Some(with.id)
            );
            assert!(tx.find_bug(env, None, &criteria(Some('b')))?.is_none());
            Ok(())
        })
        .expect("queries should succeed");
    }

    #[test]
    fn test_flags_and_counters() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let (db, env) = open_db(&dir);
        db.immediate(|tx| {
            let (bug, _) = tx.find_or_insert_bug(&new_bug(env, None, None))?;
            tx.record_bug_occurrence(bug.id, Timestamp::from_millis(50))?;
            tx.record_bug_occurrence(bug.id, Timestamp::from_millis(20))?;
            tx.mark_bug_fixed(bug.id, Timestamp::from_millis(60))?;
            tx.mark_bug_fix_deployed(bug.id)?;
            let stored = tx.bug(bug.id)?.expect("bug exists");
            assert_eq!(stored.occurrence_count, 2);
            assert_eq!(stored.latest_occurrence_at, Some(Timestamp::from_millis(50)));
            assert!(stored.fixed && stored.fix_deployed);
            tx.reopen_bug(bug.id)?;
            let reopened = tx.bug(bug.id)?.expect("bug exists");
            assert!(!reopened.fixed && !reopened.fix_deployed);
            assert_eq!(reopened.fixed_at, None);
            Ok(())
        })
        .expect("updates should succeed");
    }

    #[test]
    fn test_reassign_onto_claimed_key_is_conflict() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let (db, env) = open_db(&dir);
        let err = db
            .immediate(|tx| {
                let revision = CommitId::parse(&"a".repeat(40))?;
                let old = tx.insert_deploy(env, &revision, Some("1.0"), Timestamp::from_millis(1))?;
                let new = tx.insert_deploy(env, &revision, Some("1.1"), Timestamp::from_millis(2))?;
                let (stale, _) = tx.find_or_insert_bug(&new_bug(env, Some(old.id), None))?;
                tx.find_or_insert_bug(&new_bug(env, Some(new.id), None))?;
                tx.reassign_bug_deploy(stale.id, new.id)
            })
            .expect_err("reassigning onto an existing key must fail");
        assert!(err.is_transient(), "expected conflict, got {err:?}");
    }

    #[test]
    fn test_reassign_to_missing_deploy_is_not_retried() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let (db, env) = open_db(&dir);
        let err = db
            .immediate(|tx| {
                let (bug, _) = tx.find_or_insert_bug(&new_bug(env, None, None))?;
                tx.reassign_bug_deploy(bug.id, DeployId::new(9_999))
            })
            .expect_err("foreign key must reject an unknown deploy");
        assert!(!err.is_transient(), "foreign-key failure retried: {err:?}");
    }
}
