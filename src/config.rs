//! Store configuration.

use std::path::PathBuf;

/// Tunables for a [`SkillManager`](crate::SkillManager) instance.
///
/// All skill data lives under `storage_dir`:
///
/// ```text
/// storage_dir/
///   skills.db              relational store
///   index/skills.index     serialized ANN graph
///   index/skills_mapping   name <-> slot mapping (JSON)
///   history/<name>.jsonl   per-skill execution log
/// ```
///
/// Only one manager per `storage_dir` per process is supported.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory for all skill data.
    pub storage_dir: PathBuf,

    /// Mirror every repository mutation into the vector index within the
    /// same call. Disable for bulk imports and catch up with
    /// `rebuild_index()` afterwards.
    pub auto_sync: bool,

    /// Embedding dimension.
    pub embedding_dim: usize,

    /// Maximum live slot count in the ANN graph.
    pub max_elements: usize,

    /// HNSW construction beam width (higher = better graph, slower insert).
    pub ef_construction: usize,

    /// HNSW connectivity per layer (layer 0 uses 2*M).
    pub m: usize,

    /// HNSW search beam width.
    pub ef_search: usize,

    /// Default tail length for `get_history` when no limit is given.
    pub history_tail_default: usize,
}

impl StoreConfig {
    /// Configuration with documented defaults rooted at `storage_dir`.
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            auto_sync: true,
            embedding_dim: 384,
            max_elements: 10_000,
            ef_construction: 200,
            m: 16,
            ef_search: 50,
            history_tail_default: 100,
        }
    }
}
