//! Projects and environments.

use rusqlite::{OptionalExtension, Row, params};
use triage_error::Result;
use triage_types::{BlamerKind, Environment, EnvironmentId, Project, ProjectId, RepositoryId};

use crate::{Tx, from_json, map_sqlite_error, to_json};

/// Attributes for seeding a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProject {
    pub name: String,
    pub api_key: String,
    pub repository: RepositoryId,
    pub blamer: BlamerKind,
    pub filter_paths: Vec<String>,
    pub whitelist_paths: Vec<String>,
}

impl NewProject {
    #[must_use]
    pub fn new(name: &str, api_key: &str, repository_url: &str) -> Self {
        Self {
            name: name.to_owned(),
            api_key: api_key.to_owned(),
            repository: RepositoryId::new(repository_url),
            blamer: BlamerKind::default(),
            filter_paths: Vec::new(),
            whitelist_paths: Vec::new(),
        }
    }
}

const PROJECT_COLUMNS: &str =
    "id, name, api_key, repository_url, blamer, filter_paths, whitelist_paths";

struct ProjectRow {
    id: i64,
    name: String,
    api_key: String,
    repository_url: String,
    blamer: String,
    filter_paths: String,
    whitelist_paths: String,
}

impl ProjectRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            api_key: row.get(2)?,
            repository_url: row.get(3)?,
            blamer: row.get(4)?,
            filter_paths: row.get(5)?,
            whitelist_paths: row.get(6)?,
        })
    }

    fn into_project(self) -> Result<Project> {
        Ok(Project {
            id: ProjectId::new(self.id),
            name: self.name,
            api_key: self.api_key,
            repository: RepositoryId::new(self.repository_url),
            blamer: self.blamer.parse()?,
            filter_paths: from_json(&self.filter_paths)?,
            whitelist_paths: from_json(&self.whitelist_paths)?,
        })
    }
}

impl Tx<'_> {
    pub fn insert_project(&self, project: &NewProject) -> Result<Project> {
        self.tx
            .execute(
                "INSERT INTO projects (name, api_key, repository_url, blamer, filter_paths, whitelist_paths)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    project.name,
                    project.api_key,
                    project.repository.as_str(),
                    project.blamer.as_str(),
                    to_json(&project.filter_paths)?,
                    to_json(&project.whitelist_paths)?,
                ],
            )
            .map_err(map_sqlite_error)?;
        Ok(Project {
            id: ProjectId::new(self.tx.last_insert_rowid()),
            name: project.name.clone(),
            api_key: project.api_key.clone(),
            repository: project.repository.clone(),
            blamer: project.blamer,
            filter_paths: project.filter_paths.clone(),
            whitelist_paths: project.whitelist_paths.clone(),
        })
    }

    pub fn project_by_api_key(&self, api_key: &str) -> Result<Option<Project>> {
        self.tx
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE api_key = ?1"),
                params![api_key],
                ProjectRow::read,
            )
            .optional()
            .map_err(map_sqlite_error)?
            .map(ProjectRow::into_project)
            .transpose()
    }

    /// Environment `name` of `project`, created on first sight.
    pub fn find_or_create_environment(
        &self,
        project: ProjectId,
        name: &str,
    ) -> Result<Environment> {
        self.tx
            .execute(
                "INSERT INTO environments (project_id, name) VALUES (?1, ?2)
                 ON CONFLICT (project_id, name) DO NOTHING",
                params![project.get(), name],
            )
            .map_err(map_sqlite_error)?;
        let id: i64 = self
            .tx
            .query_row(
                "SELECT id FROM environments WHERE project_id = ?1 AND name = ?2",
                params![project.get(), name],
                |row| row.get(0),
            )
            .map_err(map_sqlite_error)?;
        Ok(Environment {
            id: EnvironmentId::new(id),
            project_id: project,
            name: name.to_owned(),
        })
    }

    pub fn count_environments(&self, project: ProjectId) -> Result<u64> {
        let count: i64 = self
            .tx
            .query_row(
                "SELECT COUNT(*) FROM environments WHERE project_id = ?1",
                params![project.get()],
                |row| row.get(0),
            )
            .map_err(map_sqlite_error)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
