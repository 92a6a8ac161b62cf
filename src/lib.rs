//! Skillbank
//!
//! Storage, semantic retrieval, and automatic composition of agent skills.
//!
//! # Features
//!
//! - **Repository**: SQLite-backed skill store with version history,
//!   dependencies, tags, execution statistics and a per-skill JSONL log
//! - **Vector Index**: persistent HNSW index over deterministic text
//!   embeddings, with lazy loading and atomic rebuild
//! - **Composer**: task-driven composition with dependency closure,
//!   cycle breaking, topological ordering and coverage analysis
//! - **Manager**: single façade keeping both stores in sync
//!
//! # Architecture
//!
//! ```text
//! Host agent ──► SkillManager ──┬── SkillRepository (SQLite + JSONL history)
//!                               ├── VectorIndex (HNSW + name↔slot mapping)
//!                               └── Composer (closure + Kahn ordering)
//! ```
//!
//! Writes go to the repository first, then to the vector index; a vector
//! failure never loses the repository write and is repaired by
//! [`SkillManager::rebuild_index`].

pub mod composer;
pub mod config;
pub mod embedder;
pub mod error;
pub mod hnsw;
pub mod index;
pub mod manager;
pub mod repository;
pub mod skill;

pub use composer::{
    Composer, CompositionPlan, CompositionSuggestion, CoverageReport, PlanStep, ValidationReport,
};
pub use config::StoreConfig;
pub use embedder::{embedding_text, TextEmbedder};
pub use error::{Result, SkillError};
pub use hnsw::{HnswIndex, HnswParams};
pub use index::{IndexStats, SearchHit, VectorIndex};
pub use manager::{SkillManager, SkillMatch, TierResults};
pub use repository::SkillRepository;
pub use skill::{ExecutionRecord, Skill, SkillStats, SkillType, SkillVersion, SystemStats};
