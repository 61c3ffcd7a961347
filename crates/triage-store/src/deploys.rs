//! Deploy records.

use rusqlite::{OptionalExtension, Row, params};
use triage_error::Result;
use triage_types::{CommitId, Deploy, DeployId, EnvironmentId, Timestamp};

use crate::{Tx, map_sqlite_error};

const DEPLOY_COLUMNS: &str = "id, environment_id, revision, build, deployed_at";

struct DeployRow {
    id: i64,
    environment_id: i64,
    revision: String,
    build: Option<String>,
    deployed_at: i64,
}

impl DeployRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            environment_id: row.get(1)?,
            revision: row.get(2)?,
            build: row.get(3)?,
            deployed_at: row.get(4)?,
        })
    }

    fn into_deploy(self) -> Result<Deploy> {
        Ok(Deploy {
            id: DeployId::new(self.id),
            environment_id: EnvironmentId::new(self.environment_id),
            revision: CommitId::parse(&self.revision)?,
            build: self.build,
            deployed_at: Timestamp::from_millis(self.deployed_at),
        })
    }
}

impl Tx<'_> {
    fn deploy_where(&self, clause: &str, params: impl rusqlite::Params) -> Result<Option<Deploy>> {
        self.tx
            .query_row(
                &format!("SELECT {DEPLOY_COLUMNS} FROM deploys WHERE {clause}"),
                params,
                DeployRow::read,
            )
            .optional()
            .map_err(map_sqlite_error)?
            .map(DeployRow::into_deploy)
            .transpose()
    }

    /// Record a deploy. `build` may be absent for hosted projects.
    pub fn insert_deploy(
        &self,
        environment: EnvironmentId,
        revision: &CommitId,
        build: Option<&str>,
        deployed_at: Timestamp,
    ) -> Result<Deploy> {
        self.tx
            .execute(
                "INSERT INTO deploys (environment_id, revision, build, deployed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    environment.get(),
                    revision.as_str(),
                    build,
                    deployed_at.as_millis()
                ],
            )
            .map_err(map_sqlite_error)?;
        Ok(Deploy {
            id: DeployId::new(self.tx.last_insert_rowid()),
            environment_id: environment,
            revision: revision.clone(),
            build: build.map(str::to_owned),
            deployed_at,
        })
    }

    /// The deploy of `build`, inserting it with `revision` on first sight.
    /// An existing deploy keeps the revision it was first recorded with.
    pub fn find_or_create_deploy(
        &self,
        environment: EnvironmentId,
        revision: &CommitId,
        build: &str,
        now: Timestamp,
    ) -> Result<Deploy> {
        self.tx
            .execute(
                "INSERT INTO deploys (environment_id, revision, build, deployed_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (environment_id, build) DO NOTHING",
                params![environment.get(), revision.as_str(), build, now.as_millis()],
            )
            .map_err(map_sqlite_error)?;
        self.deploy_by_build(environment, build)?.ok_or_else(|| {
            triage_error::TriageError::Internal(format!(
                "deploy for build '{build}' vanished after upsert"
            ))
        })
    }

    pub fn deploy_by_build(&self, environment: EnvironmentId, build: &str) -> Result<Option<Deploy>> {
        self.deploy_where(
            "environment_id = ?1 AND build = ?2",
            params![environment.get(), build],
        )
    }

    /// Most recent deploy of the environment.
    pub fn latest_deploy(&self, environment: EnvironmentId) -> Result<Option<Deploy>> {
        self.deploy_where(
            "environment_id = ?1 ORDER BY deployed_at DESC, id DESC LIMIT 1",
            params![environment.get()],
        )
    }

    /// Most recent deploy of the environment that shipped `revision`.
    pub fn latest_deploy_of_revision(
        &self,
        environment: EnvironmentId,
        revision: &CommitId,
    ) -> Result<Option<Deploy>> {
        self.deploy_where(
            "environment_id = ?1 AND revision = ?2 ORDER BY deployed_at DESC, id DESC LIMIT 1",
            params![environment.get(), revision.as_str()],
        )
    }
}
