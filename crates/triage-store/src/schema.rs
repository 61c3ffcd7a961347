//! Schema and migration.

use rusqlite::Connection;
use tracing::info;
use triage_error::{Result, TriageError};

use crate::map_sqlite_error;

/// Version written to `PRAGMA user_version` after migration.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    api_key TEXT NOT NULL UNIQUE,
    repository_url TEXT NOT NULL,
    blamer TEXT NOT NULL DEFAULT 'recency',
    filter_paths TEXT NOT NULL DEFAULT '[]',
    whitelist_paths TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS environments (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    name TEXT NOT NULL,
    UNIQUE (project_id, name)
);

CREATE TABLE IF NOT EXISTS deploys (
    id INTEGER PRIMARY KEY,
    environment_id INTEGER NOT NULL REFERENCES environments(id),
    revision TEXT NOT NULL,
    build TEXT,
    deployed_at INTEGER NOT NULL,
    UNIQUE (environment_id, build)
);
CREATE INDEX IF NOT EXISTS deploys_by_time ON deploys (environment_id, deployed_at);
CREATE INDEX IF NOT EXISTS deploys_by_revision ON deploys (environment_id, revision, deployed_at);

CREATE TABLE IF NOT EXISTS bugs (
    id INTEGER PRIMARY KEY,
    environment_id INTEGER NOT NULL REFERENCES environments(id),
    deploy_id INTEGER REFERENCES deploys(id),
    class_name TEXT NOT NULL,
    file TEXT NOT NULL,
    line INTEGER NOT NULL,
    blamed_revision TEXT,
    match_message TEXT,
    message_template TEXT NOT NULL,
    special_file INTEGER NOT NULL DEFAULT 0,
    fixed INTEGER NOT NULL DEFAULT 0,
    fix_deployed INTEGER NOT NULL DEFAULT 0,
    irrelevant INTEGER NOT NULL DEFAULT 0,
    duplicate_of_id INTEGER REFERENCES bugs(id),
    fixed_at INTEGER,
    first_occurrence_at INTEGER NOT NULL,
    latest_occurrence_at INTEGER,
    occurrence_count INTEGER NOT NULL DEFAULT 0
);
CREATE UNIQUE INDEX IF NOT EXISTS bugs_match_key ON bugs (
    environment_id,
    class_name,
    file,
    line,
    ifnull(blamed_revision, ''),
    ifnull(match_message, ''),
    ifnull(deploy_id, 0)
);

CREATE TABLE IF NOT EXISTS occurrences (
    id INTEGER PRIMARY KEY,
    bug_id INTEGER NOT NULL REFERENCES bugs(id),
    class_name TEXT NOT NULL,
    message TEXT NOT NULL,
    backtraces TEXT NOT NULL,
    revision TEXT NOT NULL,
    build TEXT,
    client TEXT NOT NULL,
    hostname TEXT,
    occurred_at INTEGER NOT NULL,
    extra TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS occurrences_by_bug ON occurrences (bug_id, occurred_at);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY,
    bug_id INTEGER NOT NULL REFERENCES bugs(id),
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS events_by_bug ON events (bug_id, id);

CREATE TABLE IF NOT EXISTS blame_entries (
    id INTEGER PRIMARY KEY,
    repository TEXT NOT NULL,
    revision TEXT NOT NULL,
    file TEXT NOT NULL,
    line INTEGER NOT NULL,
    blamed_revision TEXT NOT NULL,
    last_touched INTEGER NOT NULL,
    UNIQUE (repository, revision, file, line)
);
CREATE INDEX IF NOT EXISTS blame_entries_lru ON blame_entries (last_touched, id);

CREATE TABLE IF NOT EXISTS blame_entry_count (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    entries INTEGER NOT NULL
);
INSERT OR IGNORE INTO blame_entry_count (id, entries)
    SELECT 1, COUNT(*) FROM blame_entries;
CREATE TRIGGER IF NOT EXISTS blame_entries_count_insert AFTER INSERT ON blame_entries
BEGIN
    UPDATE blame_entry_count SET entries = entries + 1 WHERE id = 1;
END;
CREATE TRIGGER IF NOT EXISTS blame_entries_count_delete AFTER DELETE ON blame_entries
BEGIN
    UPDATE blame_entry_count SET entries = entries - 1 WHERE id = 1;
END;
";

pub(crate) fn migrate(conn: &Connection) -> Result<()> {
    let current: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(map_sqlite_error)?;
    if current > SCHEMA_VERSION {
        return Err(TriageError::storage(format!(
            "database schema version {current} is newer than supported {SCHEMA_VERSION}"
        )));
    }
    if current == SCHEMA_VERSION {
        return Ok(());
    }
    conn.execute_batch(&format!(
        "BEGIN IMMEDIATE;{SCHEMA_V1}PRAGMA user_version = {SCHEMA_VERSION};COMMIT;"
    ))
    .map_err(map_sqlite_error)?;
    info!(from = current, to = SCHEMA_VERSION, "triage schema migrated");
    Ok(())
}
