//! Relational skill store.
//!
//! Sole owner of structured persistent state: skills, version history,
//! dependency and tag rows, execution statistics, and the per-skill JSONL
//! execution log. All multi-row writes run inside a transaction; a failure
//! aborts the whole operation with no visible side effect.
//!
//! Safe for concurrent readers and a single writer per process; every
//! operation serializes through one mutex on the connection.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, SkillError};
use crate::skill::{now_ms, ExecutionRecord, Skill, SkillStats, SkillType, SkillVersion};

/// SQLite-backed store with versioning, dependencies, tags and stats.
pub struct SkillRepository {
    conn: Mutex<Connection>,
    history_dir: PathBuf,
}

impl SkillRepository {
    /// Open (or create) the store under `storage_dir`.
    ///
    /// Creates `storage_dir/skills.db` and `storage_dir/history/`.
    pub fn open(storage_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(storage_dir).map_err(|e| SkillError::io(storage_dir, e))?;
        let history_dir = storage_dir.join("history");
        std::fs::create_dir_all(&history_dir).map_err(|e| SkillError::io(&history_dir, e))?;

        let db_path = storage_dir.join("skills.db");
        let conn = Connection::open(&db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let repo = Self {
            conn: Mutex::new(conn),
            history_dir,
        };
        repo.init_schema()?;

        info!("Skill repository opened: {}", db_path.display());
        Ok(repo)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS skills (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE NOT NULL,
                skill_type TEXT NOT NULL DEFAULT 'basic'
                    CHECK (skill_type IN ('basic', 'composite', 'meta')),
                description TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1 CHECK (version >= 1),
                usage_count INTEGER NOT NULL DEFAULT 0 CHECK (usage_count >= 0),
                success_count INTEGER NOT NULL DEFAULT 0
                    CHECK (success_count >= 0 AND success_count <= usage_count),
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS skill_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                skill_id INTEGER NOT NULL REFERENCES skills(id) ON DELETE CASCADE,
                version INTEGER NOT NULL,
                content TEXT NOT NULL,
                change_description TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                UNIQUE (skill_id, version)
            );

            CREATE TABLE IF NOT EXISTS skill_dependencies (
                skill_id INTEGER NOT NULL REFERENCES skills(id) ON DELETE CASCADE,
                depends_on_skill_id INTEGER NOT NULL REFERENCES skills(id) ON DELETE CASCADE,
                dependency_type TEXT NOT NULL DEFAULT 'required',
                PRIMARY KEY (skill_id, depends_on_skill_id),
                CHECK (skill_id <> depends_on_skill_id)
            );

            CREATE TABLE IF NOT EXISTS skill_tags (
                skill_id INTEGER NOT NULL REFERENCES skills(id) ON DELETE CASCADE,
                tag TEXT NOT NULL,
                PRIMARY KEY (skill_id, tag)
            );

            CREATE TABLE IF NOT EXISTS skill_metadata (
                skill_id INTEGER PRIMARY KEY REFERENCES skills(id) ON DELETE CASCADE,
                embeddings_updated_at INTEGER,
                last_execution_at INTEGER,
                average_execution_time_ms REAL,
                metadata_json TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_skills_type ON skills(skill_type);
            CREATE INDEX IF NOT EXISTS idx_skills_name ON skills(name);
            CREATE INDEX IF NOT EXISTS idx_skill_tags_tag ON skill_tags(tag);
            "#,
        )?;
        Ok(())
    }

    /// Insert a new skill with version 1, tags and dependency edges.
    ///
    /// Fails with `DuplicateName` when the name (or its sanitized history
    /// filename) is taken, and `UnknownDependency` when a dependency name
    /// does not exist.
    pub fn add_skill(
        &self,
        name: &str,
        content: &str,
        skill_type: SkillType,
        description: Option<&str>,
        tags: &[&str],
        dependencies: &[&str],
    ) -> Result<i64> {
        if name.trim().is_empty() {
            return Err(SkillError::IntegrityViolation(
                "skill name must not be empty".to_string(),
            ));
        }

        let conn = self.conn.lock();

        if skill_id_of(&conn, name)?.is_some() {
            return Err(SkillError::DuplicateName(name.to_string()));
        }

        // Two live names must not share a history file after sanitization.
        let sanitized = sanitize_name(name);
        let mut stmt = conn.prepare("SELECT name FROM skills")?;
        let existing: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        if existing.iter().any(|n| sanitize_name(n) == sanitized) {
            return Err(SkillError::DuplicateName(name.to_string()));
        }

        let mut dep_ids = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            match skill_id_of(&conn, dep)? {
                Some(id) => dep_ids.push(id),
                None => {
                    return Err(SkillError::UnknownDependency {
                        skill: name.to_string(),
                        dependency: dep.to_string(),
                    })
                }
            }
        }

        let now = now_ms();
        let id = with_tx(&conn, || {
            conn.execute(
                r#"
                INSERT INTO skills
                    (name, skill_type, description, content, version, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
                "#,
                params![name, skill_type.as_str(), description.unwrap_or(""), content, now],
            )?;
            let id = conn.last_insert_rowid();

            conn.execute(
                r#"
                INSERT INTO skill_versions (skill_id, version, content, change_description, created_at)
                VALUES (?1, 1, ?2, 'Initial version', ?3)
                "#,
                params![id, content, now],
            )?;

            for tag in tags {
                conn.execute(
                    "INSERT OR IGNORE INTO skill_tags (skill_id, tag) VALUES (?1, ?2)",
                    params![id, tag.to_lowercase()],
                )?;
            }

            for dep_id in &dep_ids {
                conn.execute(
                    r#"
                    INSERT OR IGNORE INTO skill_dependencies (skill_id, depends_on_skill_id)
                    VALUES (?1, ?2)
                    "#,
                    params![id, dep_id],
                )?;
            }

            conn.execute(
                "INSERT INTO skill_metadata (skill_id) VALUES (?1)",
                params![id],
            )?;

            Ok(id)
        })?;

        info!("Added skill '{}' (type: {}, id: {})", name, skill_type, id);
        Ok(id)
    }

    /// Overwrite content, bump the version, and snapshot the new state.
    ///
    /// Returns the new version number.
    pub fn update_skill(
        &self,
        name: &str,
        content: &str,
        change_description: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock();

        let (id, version) = match skill_row(&conn, name)? {
            Some(pair) => pair,
            None => return Err(SkillError::UnknownSkill(name.to_string())),
        };
        let new_version = version + 1;
        let now = now_ms();

        with_tx(&conn, || {
            conn.execute(
                "UPDATE skills SET content = ?1, version = ?2, updated_at = ?3 WHERE id = ?4",
                params![content, new_version, now, id],
            )?;
            conn.execute(
                r#"
                INSERT INTO skill_versions (skill_id, version, content, change_description, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![id, new_version, content, change_description.unwrap_or("Updated"), now],
            )?;
            Ok(())
        })?;

        info!("Updated skill '{}' to version {}", name, new_version);
        Ok(new_version)
    }

    /// Delete a skill, its versions, edges, tags, metadata and history log.
    ///
    /// Returns false (not an error) when the name is absent.
    pub fn delete_skill(&self, name: &str) -> Result<bool> {
        let deleted = {
            let conn = self.conn.lock();
            conn.execute("DELETE FROM skills WHERE name = ?1", params![name])? > 0
        };

        if deleted {
            let history = self.history_path(name);
            if history.exists() {
                if let Err(e) = std::fs::remove_file(&history) {
                    warn!("Failed to remove history log {}: {}", history.display(), e);
                }
            }
            info!("Deleted skill '{}'", name);
        }
        Ok(deleted)
    }

    /// Fetch one hydrated skill.
    pub fn get_skill(&self, name: &str) -> Result<Option<Skill>> {
        let conn = self.conn.lock();

        let row = conn.query_row(
            r#"
            SELECT id, name, skill_type, description, content, version,
                   usage_count, success_count, created_at, updated_at
            FROM skills WHERE name = ?1
            "#,
            params![name],
            map_skill_row,
        );

        match row {
            Ok(mut skill) => {
                hydrate(&conn, &mut skill)?;
                Ok(Some(skill))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List hydrated skills, optionally filtered by type and tags (AND).
    pub fn list_skills(&self, skill_type: Option<SkillType>, tags: &[&str]) -> Result<Vec<Skill>> {
        let conn = self.conn.lock();

        let mut query = String::from(
            r#"
            SELECT id, name, skill_type, description, content, version,
                   usage_count, success_count, created_at, updated_at
            FROM skills WHERE 1=1
            "#,
        );
        let mut sql_params: Vec<String> = Vec::new();

        if let Some(ty) = skill_type {
            query.push_str(" AND skill_type = ?");
            sql_params.push(ty.as_str().to_string());
        }
        for tag in tags {
            query.push_str(" AND id IN (SELECT skill_id FROM skill_tags WHERE tag = ?)");
            sql_params.push(tag.to_lowercase());
        }
        query.push_str(" ORDER BY name");

        let mut stmt = conn.prepare(&query)?;
        let mut skills: Vec<Skill> = stmt
            .query_map(params_from_iter(sql_params.iter()), map_skill_row)?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);

        for skill in &mut skills {
            hydrate(&conn, skill)?;
        }
        Ok(skills)
    }

    /// Full version history, ascending by version.
    pub fn get_versions(&self, name: &str) -> Result<Vec<SkillVersion>> {
        let conn = self.conn.lock();

        let id = match skill_id_of(&conn, name)? {
            Some(id) => id,
            None => return Err(SkillError::UnknownSkill(name.to_string())),
        };

        let mut stmt = conn.prepare(
            r#"
            SELECT version, content, change_description, created_at
            FROM skill_versions WHERE skill_id = ?1 ORDER BY version
            "#,
        )?;
        let versions = stmt
            .query_map(params![id], |row| {
                Ok(SkillVersion {
                    version: row.get(0)?,
                    content: row.get(1)?,
                    change_description: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(versions)
    }

    /// Replace the dependency edge set atomically.
    pub fn set_dependencies(&self, name: &str, dependencies: &[&str]) -> Result<()> {
        let conn = self.conn.lock();

        let id = match skill_id_of(&conn, name)? {
            Some(id) => id,
            None => return Err(SkillError::UnknownSkill(name.to_string())),
        };

        let mut dep_ids = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            if *dep == name {
                return Err(SkillError::IntegrityViolation(format!(
                    "skill '{name}' cannot depend on itself"
                )));
            }
            match skill_id_of(&conn, dep)? {
                Some(dep_id) => dep_ids.push(dep_id),
                None => {
                    return Err(SkillError::UnknownDependency {
                        skill: name.to_string(),
                        dependency: dep.to_string(),
                    })
                }
            }
        }

        with_tx(&conn, || {
            conn.execute(
                "DELETE FROM skill_dependencies WHERE skill_id = ?1",
                params![id],
            )?;
            for dep_id in &dep_ids {
                conn.execute(
                    r#"
                    INSERT OR IGNORE INTO skill_dependencies (skill_id, depends_on_skill_id)
                    VALUES (?1, ?2)
                    "#,
                    params![id, dep_id],
                )?;
            }
            conn.execute(
                "UPDATE skills SET updated_at = ?1 WHERE id = ?2",
                params![now_ms(), id],
            )?;
            Ok(())
        })?;

        debug!("Replaced dependencies of '{}' ({} edges)", name, dep_ids.len());
        Ok(())
    }

    /// Record one execution: bump counters, fold the duration into the
    /// moving average (weight 0.2 on the new sample), stamp
    /// `last_execution_at`, and append a line to the history log.
    ///
    /// The counter update is authoritative; a history-append failure is
    /// logged and does not fail the call.
    pub fn record_execution(
        &self,
        name: &str,
        success: bool,
        execution_time_ms: Option<f64>,
        context: Option<Value>,
    ) -> Result<()> {
        {
            let conn = self.conn.lock();

            let id = match skill_id_of(&conn, name)? {
                Some(id) => id,
                None => return Err(SkillError::UnknownSkill(name.to_string())),
            };
            let now = now_ms();

            with_tx(&conn, || {
                if success {
                    conn.execute(
                        r#"
                        UPDATE skills
                        SET usage_count = usage_count + 1,
                            success_count = success_count + 1,
                            updated_at = ?1
                        WHERE id = ?2
                        "#,
                        params![now, id],
                    )?;
                } else {
                    conn.execute(
                        "UPDATE skills SET usage_count = usage_count + 1, updated_at = ?1 WHERE id = ?2",
                        params![now, id],
                    )?;
                }

                match execution_time_ms {
                    Some(elapsed) => {
                        conn.execute(
                            r#"
                            INSERT INTO skill_metadata (skill_id, last_execution_at, average_execution_time_ms)
                            VALUES (?1, ?2, ?3 * 0.2)
                            ON CONFLICT(skill_id) DO UPDATE SET
                                last_execution_at = excluded.last_execution_at,
                                average_execution_time_ms =
                                    COALESCE(average_execution_time_ms, 0) * 0.8 + ?3 * 0.2
                            "#,
                            params![id, now, elapsed],
                        )?;
                    }
                    None => {
                        conn.execute(
                            r#"
                            INSERT INTO skill_metadata (skill_id, last_execution_at)
                            VALUES (?1, ?2)
                            ON CONFLICT(skill_id) DO UPDATE SET
                                last_execution_at = excluded.last_execution_at
                            "#,
                            params![id, now],
                        )?;
                    }
                }
                Ok(())
            })?;
        }

        let record = ExecutionRecord {
            timestamp: Utc::now(),
            success,
            execution_time_ms,
            context,
        };
        if let Err(e) = self.append_history(name, &record) {
            warn!("Failed to append history for '{}': {}", name, e);
        }

        debug!("Recorded execution of '{}' (success: {})", name, success);
        Ok(())
    }

    /// Read the tail of the execution log; a missing file is an empty log.
    pub fn get_history(&self, name: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let path = self.history_path(name);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let text = std::fs::read_to_string(&path).map_err(|e| SkillError::io(&path, e))?;
        let mut records: Vec<ExecutionRecord> = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => debug!("Skipping malformed history line in {}: {}", path.display(), e),
            }
        }

        if records.len() > limit {
            records.drain(..records.len() - limit);
        }
        Ok(records)
    }

    /// Execution statistics for one skill.
    pub fn get_skill_stats(&self, name: &str) -> Result<Option<SkillStats>> {
        let conn = self.conn.lock();

        let row = conn.query_row(
            r#"
            SELECT s.usage_count, s.success_count, s.version,
                   sm.average_execution_time_ms, sm.last_execution_at
            FROM skills s
            LEFT JOIN skill_metadata sm ON s.id = sm.skill_id
            WHERE s.name = ?1
            "#,
            params![name],
            |row| {
                let usage_count: i64 = row.get(0)?;
                let success_count: i64 = row.get(1)?;
                Ok(SkillStats {
                    usage_count,
                    success_count,
                    version: row.get(2)?,
                    success_rate: if usage_count > 0 {
                        success_count as f64 / usage_count as f64
                    } else {
                        0.0
                    },
                    average_execution_time_ms: row.get(3)?,
                    last_execution_at: row.get(4)?,
                })
            },
        );

        match row {
            Ok(stats) => Ok(Some(stats)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Attach a free-form JSON blob to a skill's metadata row, replacing
    /// any previous blob.
    pub fn set_metadata(&self, name: &str, metadata: &Value) -> Result<()> {
        let conn = self.conn.lock();

        let id = match skill_id_of(&conn, name)? {
            Some(id) => id,
            None => return Err(SkillError::UnknownSkill(name.to_string())),
        };
        let json = serde_json::to_string(metadata)?;

        conn.execute(
            r#"
            INSERT INTO skill_metadata (skill_id, metadata_json) VALUES (?1, ?2)
            ON CONFLICT(skill_id) DO UPDATE SET metadata_json = excluded.metadata_json
            "#,
            params![id, json],
        )?;
        Ok(())
    }

    /// The skill's free-form metadata blob, if any.
    pub fn get_metadata(&self, name: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock();

        let row = conn.query_row(
            r#"
            SELECT sm.metadata_json
            FROM skill_metadata sm
            JOIN skills s ON s.id = sm.skill_id
            WHERE s.name = ?1
            "#,
            params![name],
            |row| row.get::<_, Option<String>>(0),
        );

        match row {
            Ok(Some(json)) => Ok(serde_json::from_str(&json).ok()),
            Ok(None) => Ok(None),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn history_path(&self, name: &str) -> PathBuf {
        self.history_dir.join(format!("{}.jsonl", sanitize_name(name)))
    }

    fn append_history(&self, name: &str, record: &ExecutionRecord) -> Result<()> {
        let path = self.history_path(name);
        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SkillError::io(&path, e))?;
        writeln!(file, "{}", line).map_err(|e| SkillError::io(&path, e))?;
        Ok(())
    }
}

/// Filesystem-safe form of a skill name for the history log.
pub(crate) fn sanitize_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

fn with_tx<T>(conn: &Connection, f: impl FnOnce() -> Result<T>) -> Result<T> {
    conn.execute("BEGIN", [])?;
    match f() {
        Ok(value) => {
            conn.execute("COMMIT", [])?;
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(e)
        }
    }
}

fn skill_id_of(conn: &Connection, name: &str) -> Result<Option<i64>> {
    match conn.query_row("SELECT id FROM skills WHERE name = ?1", params![name], |r| {
        r.get(0)
    }) {
        Ok(id) => Ok(Some(id)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn skill_row(conn: &Connection, name: &str) -> Result<Option<(i64, i64)>> {
    match conn.query_row(
        "SELECT id, version FROM skills WHERE name = ?1",
        params![name],
        |r| Ok((r.get(0)?, r.get(1)?)),
    ) {
        Ok(pair) => Ok(Some(pair)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn map_skill_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Skill> {
    let type_str: String = row.get(2)?;
    Ok(Skill {
        id: row.get(0)?,
        name: row.get(1)?,
        skill_type: SkillType::parse(&type_str).unwrap_or(SkillType::Basic),
        description: row.get(3)?,
        content: row.get(4)?,
        version: row.get(5)?,
        usage_count: row.get(6)?,
        success_count: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        tags: Vec::new(),
        dependencies: Vec::new(),
    })
}

fn hydrate(conn: &Connection, skill: &mut Skill) -> Result<()> {
    let mut stmt = conn.prepare("SELECT tag FROM skill_tags WHERE skill_id = ?1 ORDER BY tag")?;
    skill.tags = stmt
        .query_map(params![skill.id], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;

    let mut stmt = conn.prepare(
        r#"
        SELECT s.name FROM skill_dependencies sd
        JOIN skills s ON sd.depends_on_skill_id = s.id
        WHERE sd.skill_id = ?1 ORDER BY s.name
        "#,
    )?;
    skill.dependencies = stmt
        .query_map(params![skill.id], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_repo() -> (TempDir, SkillRepository) {
        let dir = TempDir::new().unwrap();
        let repo = SkillRepository::open(dir.path()).unwrap();
        (dir, repo)
    }

    #[test]
    fn add_and_get_round_trip() {
        let (_dir, repo) = temp_repo();

        repo.add_skill(
            "parse_json",
            "# Parse JSON\n\nSteps",
            SkillType::Basic,
            Some("Parse JSON documents"),
            &["json", "parsing"],
            &[],
        )
        .unwrap();

        let skill = repo.get_skill("parse_json").unwrap().unwrap();
        assert_eq!(skill.name, "parse_json");
        assert_eq!(skill.content, "# Parse JSON\n\nSteps");
        assert_eq!(skill.skill_type, SkillType::Basic);
        assert_eq!(skill.description, "Parse JSON documents");
        assert_eq!(skill.version, 1);
        assert_eq!(skill.usage_count, 0);
        assert_eq!(skill.tags, vec!["json", "parsing"]);
        assert!(skill.dependencies.is_empty());
        assert!(skill.updated_at >= skill.created_at);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let (_dir, repo) = temp_repo();
        repo.add_skill("s", "v1", SkillType::Basic, None, &[], &[])
            .unwrap();

        let err = repo
            .add_skill("s", "v2", SkillType::Basic, None, &[], &[])
            .unwrap_err();
        assert!(matches!(err, SkillError::DuplicateName(n) if n == "s"));
    }

    #[test]
    fn sanitized_collision_is_rejected() {
        let (_dir, repo) = temp_repo();
        repo.add_skill("a/b", "x", SkillType::Basic, None, &[], &[])
            .unwrap();

        let err = repo
            .add_skill("a_b", "y", SkillType::Basic, None, &[], &[])
            .unwrap_err();
        assert!(matches!(err, SkillError::DuplicateName(_)));
    }

    #[test]
    fn empty_name_is_rejected() {
        let (_dir, repo) = temp_repo();
        let err = repo
            .add_skill("  ", "x", SkillType::Basic, None, &[], &[])
            .unwrap_err();
        assert!(matches!(err, SkillError::IntegrityViolation(_)));
    }

    #[test]
    fn unknown_dependency_is_rejected_and_nothing_is_written() {
        let (_dir, repo) = temp_repo();
        let err = repo
            .add_skill("b", "x", SkillType::Basic, None, &[], &["missing"])
            .unwrap_err();
        assert!(matches!(
            err,
            SkillError::UnknownDependency { ref skill, ref dependency }
                if skill == "b" && dependency == "missing"
        ));
        assert!(repo.get_skill("b").unwrap().is_none());
    }

    #[test]
    fn versions_form_a_gapless_sequence() {
        let (_dir, repo) = temp_repo();
        repo.add_skill("s", "v1", SkillType::Basic, None, &[], &[])
            .unwrap();

        for i in 2..=5 {
            let version = repo
                .update_skill("s", &format!("v{i}"), Some("fix"))
                .unwrap();
            assert_eq!(version, i);
        }

        let skill = repo.get_skill("s").unwrap().unwrap();
        assert_eq!(skill.version, 5);
        assert_eq!(skill.content, "v5");

        let versions = repo.get_versions("s").unwrap();
        let numbers: Vec<i64> = versions.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert_eq!(versions[0].change_description, "Initial version");
        assert_eq!(versions[0].content, "v1");
        assert_eq!(versions[4].content, "v5");
    }

    #[test]
    fn update_missing_skill_fails_and_leaves_store_unchanged() {
        let (_dir, repo) = temp_repo();
        let err = repo.update_skill("ghost", "x", None).unwrap_err();
        assert!(matches!(err, SkillError::UnknownSkill(n) if n == "ghost"));
        assert!(repo.list_skills(None, &[]).unwrap().is_empty());
    }

    #[test]
    fn delete_cascades_and_is_idempotent() {
        let (_dir, repo) = temp_repo();
        repo.add_skill("a", "x", SkillType::Basic, None, &["t"], &[])
            .unwrap();
        repo.add_skill("b", "y", SkillType::Basic, None, &[], &["a"])
            .unwrap();
        repo.record_execution("a", true, Some(5.0), None).unwrap();

        assert!(repo.delete_skill("a").unwrap());
        assert!(!repo.delete_skill("a").unwrap());

        // The edge from b to a must be gone with a.
        let b = repo.get_skill("b").unwrap().unwrap();
        assert!(b.dependencies.is_empty());
        assert!(repo.get_history("a", 10).unwrap().is_empty());
    }

    #[test]
    fn list_filters_by_type_and_tags() {
        let (_dir, repo) = temp_repo();
        repo.add_skill("a", "x", SkillType::Basic, None, &["io", "net"], &[])
            .unwrap();
        repo.add_skill("b", "y", SkillType::Meta, None, &["io"], &[])
            .unwrap();
        repo.add_skill("c", "z", SkillType::Basic, None, &["net"], &[])
            .unwrap();

        let basics = repo.list_skills(Some(SkillType::Basic), &[]).unwrap();
        assert_eq!(basics.len(), 2);

        let io_and_net = repo.list_skills(None, &["io", "net"]).unwrap();
        assert_eq!(io_and_net.len(), 1);
        assert_eq!(io_and_net[0].name, "a");

        assert!(repo.list_skills(None, &["absent"]).unwrap().is_empty());
    }

    #[test]
    fn set_dependencies_replaces_the_edge_set() {
        let (_dir, repo) = temp_repo();
        for name in ["a", "b", "c"] {
            repo.add_skill(name, "x", SkillType::Basic, None, &[], &[])
                .unwrap();
        }

        repo.set_dependencies("c", &["a"]).unwrap();
        assert_eq!(repo.get_skill("c").unwrap().unwrap().dependencies, vec!["a"]);

        repo.set_dependencies("c", &["b"]).unwrap();
        assert_eq!(repo.get_skill("c").unwrap().unwrap().dependencies, vec!["b"]);

        let err = repo.set_dependencies("c", &["c"]).unwrap_err();
        assert!(matches!(err, SkillError::IntegrityViolation(_)));

        let err = repo.set_dependencies("c", &["ghost"]).unwrap_err();
        assert!(matches!(err, SkillError::UnknownDependency { .. }));
    }

    #[test]
    fn execution_stats_and_ema() {
        let (_dir, repo) = temp_repo();
        repo.add_skill("x", "body", SkillType::Basic, None, &[], &[])
            .unwrap();

        repo.record_execution("x", true, Some(10.0), None).unwrap();
        repo.record_execution("x", false, Some(20.0), None).unwrap();
        repo.record_execution("x", true, Some(30.0), None).unwrap();
        repo.record_execution("x", true, Some(40.0), None).unwrap();

        let stats = repo.get_skill_stats("x").unwrap().unwrap();
        assert_eq!(stats.usage_count, 4);
        assert_eq!(stats.success_count, 3);
        assert!((stats.success_rate - 0.75).abs() < 1e-9);
        assert!(stats.last_execution_at.is_some());

        let expected = [10.0, 20.0, 30.0, 40.0]
            .iter()
            .fold(0.0f64, |avg, e| avg * 0.8 + e * 0.2);
        let avg = stats.average_execution_time_ms.unwrap();
        assert!((avg - expected).abs() < 1e-6, "avg {avg} vs expected {expected}");
    }

    #[test]
    fn success_count_never_exceeds_usage_count() {
        let (_dir, repo) = temp_repo();
        repo.add_skill("x", "body", SkillType::Basic, None, &[], &[])
            .unwrap();
        for i in 0..10 {
            repo.record_execution("x", i % 2 == 0, None, None).unwrap();
            let stats = repo.get_skill_stats("x").unwrap().unwrap();
            assert!(stats.success_count <= stats.usage_count);
        }
    }

    #[test]
    fn record_execution_on_unknown_skill_fails() {
        let (_dir, repo) = temp_repo();
        let err = repo.record_execution("ghost", true, None, None).unwrap_err();
        assert!(matches!(err, SkillError::UnknownSkill(_)));
    }

    #[test]
    fn history_tail_and_context_round_trip() {
        let (_dir, repo) = temp_repo();
        repo.add_skill("x", "body", SkillType::Basic, None, &[], &[])
            .unwrap();

        assert!(repo.get_history("x", 10).unwrap().is_empty());

        for i in 0..5 {
            let context = serde_json::json!({ "step": i });
            repo.record_execution("x", true, Some(i as f64), Some(context))
                .unwrap();
        }

        let tail = repo.get_history("x", 3).unwrap();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].context.as_ref().unwrap()["step"], 2);
        assert_eq!(tail[2].context.as_ref().unwrap()["step"], 4);
        assert_eq!(tail[2].execution_time_ms, Some(4.0));
    }

    #[test]
    fn history_of_unknown_skill_is_empty() {
        let (_dir, repo) = temp_repo();
        assert!(repo.get_history("nobody", 10).unwrap().is_empty());
    }

    #[test]
    fn metadata_blob_round_trips() {
        let (_dir, repo) = temp_repo();
        repo.add_skill("s", "body", SkillType::Basic, None, &[], &[])
            .unwrap();

        assert!(repo.get_metadata("s").unwrap().is_none());

        let blob = serde_json::json!({ "author": "bob", "priority": 7 });
        repo.set_metadata("s", &blob).unwrap();
        assert_eq!(repo.get_metadata("s").unwrap(), Some(blob.clone()));

        // Replacement, not merge.
        let replacement = serde_json::json!({ "author": "alice" });
        repo.set_metadata("s", &replacement).unwrap();
        assert_eq!(repo.get_metadata("s").unwrap(), Some(replacement));

        let err = repo.set_metadata("ghost", &blob).unwrap_err();
        assert!(matches!(err, SkillError::UnknownSkill(_)));
        assert!(repo.get_metadata("ghost").unwrap().is_none());
    }

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(sanitize_name("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_name("plain"), "plain");
    }
}
