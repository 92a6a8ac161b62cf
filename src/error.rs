//! Error taxonomy for the skill store.
//!
//! Every failure mode callers can act on has a named variant; storage-level
//! plumbing errors are wrapped rather than stringified so the source chain
//! survives.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the skill store, vector index, and composer.
#[derive(Debug, Error)]
pub enum SkillError {
    /// Operation referenced a skill name that is not in the store.
    #[error("unknown skill '{0}'")]
    UnknownSkill(String),

    /// Attempted to insert a name that already exists.
    #[error("skill '{0}' already exists")]
    DuplicateName(String),

    /// A skill type outside basic/composite/meta.
    #[error("invalid skill type '{0}' (expected basic, composite, or meta)")]
    InvalidType(String),

    /// A declared dependency does not exist at insert time.
    #[error("skill '{skill}' depends on unknown skill '{dependency}'")]
    UnknownDependency { skill: String, dependency: String },

    /// A constraint or cascade failure surfaced by the store.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// The vector index has no free slots left.
    #[error("vector index is full ({max_elements} elements); rebuild to reclaim space")]
    CapacityExceeded { max_elements: usize },

    /// The embedding backend is absent at runtime.
    #[error("embedding backend unavailable")]
    VectorUnavailable,

    /// An index or mapping file exists but cannot be loaded.
    #[error("corrupt index state at {path}: {reason}")]
    Corruption { path: PathBuf, reason: String },

    /// File I/O failure on the history log or export/import paths.
    #[error("i/o failure at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Underlying database error that is not a constraint violation.
    #[error("storage error: {0}")]
    Storage(#[source] rusqlite::Error),

    /// JSON encoding/decoding failure on history records.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for SkillError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                SkillError::IntegrityViolation(
                    msg.clone().unwrap_or_else(|| "constraint violation".to_string()),
                )
            }
            _ => SkillError::Storage(err),
        }
    }
}

impl SkillError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SkillError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corruption(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SkillError::Corruption {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SkillError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_failures_map_to_integrity_violation() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT UNIQUE)")
            .unwrap();
        conn.execute("INSERT INTO t (v) VALUES ('x')", []).unwrap();

        let err = conn
            .execute("INSERT INTO t (v) VALUES ('x')", [])
            .unwrap_err();
        let mapped = SkillError::from(err);
        assert!(matches!(mapped, SkillError::IntegrityViolation(_)));
    }

    #[test]
    fn other_sqlite_errors_stay_storage() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err = conn.execute("SELECT * FROM missing", []).unwrap_err();
        assert!(matches!(SkillError::from(err), SkillError::Storage(_)));
    }
}
