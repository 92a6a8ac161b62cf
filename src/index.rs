//! Persistent vector index over skill embeddings.
//!
//! Keys the ANN graph by skill name and keeps the name <-> slot <-> type
//! mapping beside it, so type-filtered queries never touch the repository.
//! Both the graph and the embedder are lazy: nothing is materialized until
//! the first operation that needs them. Without an embedder the index
//! degrades to a no-op: writes succeed with a warning, queries come back
//! empty.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embedder::TextEmbedder;
use crate::error::{Result, SkillError};
use crate::hnsw::{HnswIndex, HnswParams};
use crate::skill::SkillType;

const INDEX_FILE: &str = "skills.index";
const MAPPING_FILE: &str = "skills_mapping";

/// One semantic search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub skill_name: String,
    pub skill_type: SkillType,
    /// `1 - cosine_distance`, clamped to `[0, 1]`.
    pub score: f32,
}

/// Index statistics.
#[derive(Debug, Clone)]
pub struct IndexStats {
    /// Names currently mapped.
    pub total_skills: usize,
    /// Slots consumed in the graph, tombstones included.
    pub slots_used: usize,
    pub embedding_dim: usize,
    pub max_elements: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MappedEntry {
    slot: u32,
    skill_type: SkillType,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Mapping {
    by_name: BTreeMap<String, MappedEntry>,
}

enum EmbedderSlot {
    /// Not yet materialized; holds the configured dimension.
    Lazy(usize),
    /// Backend absent; vector operations degrade to no-ops.
    Disabled,
    Ready(TextEmbedder),
}

struct Inner {
    loaded: bool,
    graph: Option<HnswIndex>,
    mapping: Mapping,
    embedder: EmbedderSlot,
}

/// Approximate nearest-neighbor index with durable on-disk state.
pub struct VectorIndex {
    index_dir: PathBuf,
    params: HnswParams,
    inner: Mutex<Inner>,
}

impl VectorIndex {
    /// Index rooted at `index_dir` with a lazily-built embedder.
    pub fn open(index_dir: impl Into<PathBuf>, params: HnswParams) -> Result<Self> {
        Self::open_inner(index_dir.into(), params, true)
    }

    /// Index with no embedding backend; see the module docs for the
    /// degraded-mode contract.
    pub fn open_without_embedder(index_dir: impl Into<PathBuf>, params: HnswParams) -> Result<Self> {
        Self::open_inner(index_dir.into(), params, false)
    }

    fn open_inner(index_dir: PathBuf, params: HnswParams, embeddings: bool) -> Result<Self> {
        std::fs::create_dir_all(&index_dir).map_err(|e| SkillError::io(&index_dir, e))?;
        let embedder = if embeddings {
            EmbedderSlot::Lazy(params.dim)
        } else {
            warn!("Vector index opened without an embedding backend; semantic search disabled");
            EmbedderSlot::Disabled
        };
        Ok(Self {
            index_dir,
            params,
            inner: Mutex::new(Inner {
                loaded: false,
                graph: None,
                mapping: Mapping::default(),
                embedder,
            }),
        })
    }

    /// Install (or replace) the embedding backend.
    pub fn set_embedder(&self, embedder: TextEmbedder) {
        let mut inner = self.inner.lock();
        inner.embedder = EmbedderSlot::Ready(embedder);
    }

    pub fn embeddings_enabled(&self) -> bool {
        !matches!(self.inner.lock().embedder, EmbedderSlot::Disabled)
    }

    /// Idempotent upsert keyed by name. Re-upserting tombstones the old
    /// slot and assigns a fresh one; space comes back on rebuild.
    pub fn upsert(&self, name: &str, skill_type: SkillType, text: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        self.ensure_loaded(&mut inner)?;

        let Some(vector) = embed(&mut inner, text) else {
            warn!("No embedding backend; skill '{}' not indexed", name);
            return Ok(());
        };

        let graph = inner
            .graph
            .get_or_insert_with(|| HnswIndex::new(self.params.clone()));
        let slot = graph.insert(&vector)?;
        if let Some(old) = inner.mapping.by_name.insert(
            name.to_string(),
            MappedEntry {
                slot,
                skill_type,
            },
        ) {
            if let Some(graph) = inner.graph.as_mut() {
                graph.mark_deleted(old.slot);
            }
        }

        debug!("Indexed skill '{}' at slot {}", name, slot);
        Ok(())
    }

    /// Drop a name from the index. Returns false when it was not indexed.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        self.ensure_loaded(&mut inner)?;

        match inner.mapping.by_name.remove(name) {
            Some(entry) => {
                if let Some(graph) = inner.graph.as_mut() {
                    graph.mark_deleted(entry.slot);
                }
                debug!("Removed skill '{}' from vector index", name);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Top-`k` skills for a natural-language query, best first.
    ///
    /// `k = 0` returns empty without contacting the index. With a type
    /// filter the graph is over-fetched threefold before filtering.
    pub fn query(
        &self,
        text: &str,
        k: usize,
        skill_type: Option<SkillType>,
    ) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut inner = self.inner.lock();
        self.ensure_loaded(&mut inner)?;

        if inner.mapping.by_name.is_empty() {
            return Ok(Vec::new());
        }
        let Some(vector) = embed(&mut inner, text) else {
            warn!("No embedding backend; returning empty search results");
            return Ok(Vec::new());
        };
        let Some(graph) = inner.graph.as_ref() else {
            return Ok(Vec::new());
        };

        let by_slot: HashMap<u32, (&String, SkillType)> = inner
            .mapping
            .by_name
            .iter()
            .map(|(name, entry)| (entry.slot, (name, entry.skill_type)))
            .collect();

        let fetch = if skill_type.is_some() { k * 3 } else { k };
        let mut hits = Vec::with_capacity(k);
        for (slot, dist) in graph.search(&vector, fetch, self.params.ef_search) {
            let Some(&(name, ty)) = by_slot.get(&slot) else {
                continue;
            };
            if let Some(filter) = skill_type {
                if ty != filter {
                    continue;
                }
            }
            hits.push(SearchHit {
                skill_name: name.clone(),
                skill_type: ty,
                score: (1.0 - dist).clamp(0.0, 1.0),
            });
            if hits.len() == k {
                break;
            }
        }
        Ok(hits)
    }

    /// Rebuild from scratch and swap the on-disk state atomically: both
    /// files are written to a temporary location, then renamed into place.
    ///
    /// Fails with `VectorUnavailable` when no embedding backend exists.
    pub fn rebuild(&self, entries: &[(String, SkillType, String)]) -> Result<()> {
        let mut inner = self.inner.lock();

        let mut graph = HnswIndex::new(self.params.clone());
        let mut mapping = Mapping::default();
        for (name, skill_type, text) in entries {
            let Some(vector) = embed(&mut inner, text) else {
                return Err(SkillError::VectorUnavailable);
            };
            let slot = graph.insert(&vector)?;
            mapping.by_name.insert(
                name.clone(),
                MappedEntry {
                    slot,
                    skill_type: *skill_type,
                },
            );
        }

        persist(&self.index_dir, Some(&graph), &mapping)?;

        inner.graph = Some(graph);
        inner.mapping = mapping;
        inner.loaded = true;

        info!("Vector index rebuilt with {} skills", entries.len());
        Ok(())
    }

    /// Persist the current graph and mapping.
    pub fn save(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.loaded {
            return Ok(());
        }
        persist(&self.index_dir, inner.graph.as_ref(), &inner.mapping)
    }

    /// Force-load persisted state now instead of on first use.
    pub fn load(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.ensure_loaded(&mut inner)
    }

    /// Names currently mapped in the index.
    pub fn indexed_names(&self) -> Result<Vec<String>> {
        let mut inner = self.inner.lock();
        self.ensure_loaded(&mut inner)?;
        Ok(inner.mapping.by_name.keys().cloned().collect())
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let mut inner = self.inner.lock();
        self.ensure_loaded(&mut inner)?;
        Ok(IndexStats {
            total_skills: inner.mapping.by_name.len(),
            slots_used: inner.graph.as_ref().map(|g| g.slot_count()).unwrap_or(0),
            embedding_dim: self.params.dim,
            max_elements: self.params.max_elements,
        })
    }

    fn ensure_loaded(&self, inner: &mut Inner) -> Result<()> {
        if inner.loaded {
            return Ok(());
        }

        let mapping_path = self.index_dir.join(MAPPING_FILE);
        if mapping_path.exists() {
            let text = std::fs::read_to_string(&mapping_path)
                .map_err(|e| SkillError::io(&mapping_path, e))?;
            inner.mapping = serde_json::from_str(&text)
                .map_err(|e| SkillError::corruption(&mapping_path, e.to_string()))?;
        }

        let index_path = self.index_dir.join(INDEX_FILE);
        if index_path.exists() {
            let bytes = std::fs::read(&index_path).map_err(|e| SkillError::io(&index_path, e))?;
            let graph: HnswIndex = bincode::deserialize(&bytes)
                .map_err(|e| SkillError::corruption(&index_path, e.to_string()))?;
            inner.graph = Some(graph);
            debug!(
                "Loaded vector index from {} ({} skills)",
                index_path.display(),
                inner.mapping.by_name.len()
            );
        }

        inner.loaded = true;
        Ok(())
    }
}

fn embed(inner: &mut Inner, text: &str) -> Option<Vec<f32>> {
    if let EmbedderSlot::Lazy(dim) = inner.embedder {
        inner.embedder = EmbedderSlot::Ready(TextEmbedder::new(dim));
        debug!("Materialized embedder (dim: {})", dim);
    }
    match &inner.embedder {
        EmbedderSlot::Ready(embedder) => Some(embedder.embed(text)),
        EmbedderSlot::Disabled => None,
        EmbedderSlot::Lazy(_) => unreachable!("embedder materialized above"),
    }
}

/// Write both index files through a temp location so readers never observe
/// a partial state.
fn persist(index_dir: &Path, graph: Option<&HnswIndex>, mapping: &Mapping) -> Result<()> {
    let mapping_path = index_dir.join(MAPPING_FILE);
    let mapping_tmp = index_dir.join(format!("{MAPPING_FILE}.tmp"));
    let text = serde_json::to_string(mapping)?;
    std::fs::write(&mapping_tmp, text).map_err(|e| SkillError::io(&mapping_tmp, e))?;
    std::fs::rename(&mapping_tmp, &mapping_path).map_err(|e| SkillError::io(&mapping_path, e))?;

    if let Some(graph) = graph {
        let index_path = index_dir.join(INDEX_FILE);
        let index_tmp = index_dir.join(format!("{INDEX_FILE}.tmp"));
        let bytes = bincode::serialize(graph)
            .map_err(|e| SkillError::corruption(&index_path, e.to_string()))?;
        std::fs::write(&index_tmp, bytes).map_err(|e| SkillError::io(&index_tmp, e))?;
        std::fs::rename(&index_tmp, &index_path).map_err(|e| SkillError::io(&index_path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_params() -> HnswParams {
        HnswParams {
            dim: 64,
            max_elements: 100,
            ..HnswParams::default()
        }
    }

    fn temp_index() -> (TempDir, VectorIndex) {
        let dir = TempDir::new().unwrap();
        let index = VectorIndex::open(dir.path().join("index"), small_params()).unwrap();
        (dir, index)
    }

    #[test]
    fn upsert_and_query() {
        let (_dir, index) = temp_index();
        index
            .upsert("parse_json", SkillType::Basic, "parse json documents")
            .unwrap();
        index
            .upsert("send_email", SkillType::Basic, "send notification emails")
            .unwrap();

        let hits = index.query("parse json documents", 2, None).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].skill_name, "parse_json");
        assert!(hits[0].score > 0.0 && hits[0].score <= 1.0);
    }

    #[test]
    fn reupsert_replaces_the_entry() {
        let (_dir, index) = temp_index();
        index
            .upsert("s", SkillType::Basic, "completely unrelated words")
            .unwrap();
        index
            .upsert("s", SkillType::Composite, "parse json documents")
            .unwrap();

        let hits = index.query("json", 5, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].skill_type, SkillType::Composite);
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn type_filter_applies() {
        let (_dir, index) = temp_index();
        index
            .upsert("deploy_meta", SkillType::Meta, "deploy application workflow")
            .unwrap();
        index
            .upsert("deploy_basic", SkillType::Basic, "deploy application step")
            .unwrap();

        let hits = index.query("deploy application", 5, Some(SkillType::Meta)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].skill_name, "deploy_meta");
    }

    #[test]
    fn remove_drops_the_name() {
        let (_dir, index) = temp_index();
        index.upsert("s", SkillType::Basic, "some text").unwrap();

        assert!(index.remove("s").unwrap());
        assert!(!index.remove("s").unwrap());
        assert!(index.query("some text", 5, None).unwrap().is_empty());
    }

    #[test]
    fn query_k_zero_is_empty() {
        let (_dir, index) = temp_index();
        index.upsert("s", SkillType::Basic, "text").unwrap();
        assert!(index.query("text", 0, None).unwrap().is_empty());
    }

    #[test]
    fn empty_index_queries_are_empty() {
        let (_dir, index) = temp_index();
        assert!(index.query("anything", 5, None).unwrap().is_empty());
    }

    #[test]
    fn state_survives_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let index_dir = dir.path().join("index");

        {
            let index = VectorIndex::open(&index_dir, small_params()).unwrap();
            index
                .upsert("parse_json", SkillType::Basic, "parse json documents")
                .unwrap();
            index.save().unwrap();
        }

        let index = VectorIndex::open(&index_dir, small_params()).unwrap();
        let hits = index.query("json", 3, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].skill_name, "parse_json");
    }

    #[test]
    fn rebuild_reclaims_tombstones_and_is_idempotent() {
        let (_dir, index) = temp_index();
        for i in 0..4 {
            index
                .upsert(&format!("s{i}"), SkillType::Basic, &format!("skill number {i}"))
                .unwrap();
        }
        index.remove("s3").unwrap();
        // Re-upsert burns another slot.
        index.upsert("s0", SkillType::Basic, "skill zero").unwrap();
        assert!(index.stats().unwrap().slots_used > 3);

        let entries: Vec<(String, SkillType, String)> = (0..3)
            .map(|i| (format!("s{i}"), SkillType::Basic, format!("skill number {i}")))
            .collect();
        index.rebuild(&entries).unwrap();
        assert_eq!(index.stats().unwrap().slots_used, 3);

        let first = index.query("skill number 1", 3, None).unwrap();
        index.rebuild(&entries).unwrap();
        let second = index.query("skill number 1", 3, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn disabled_embedder_degrades_to_noop() {
        let dir = TempDir::new().unwrap();
        let index =
            VectorIndex::open_without_embedder(dir.path().join("index"), small_params()).unwrap();

        index.upsert("s", SkillType::Basic, "text").unwrap();
        assert!(index.query("text", 5, None).unwrap().is_empty());

        let err = index
            .rebuild(&[("s".to_string(), SkillType::Basic, "text".to_string())])
            .unwrap_err();
        assert!(matches!(err, SkillError::VectorUnavailable));

        // Late-installed backend brings search to life.
        index.set_embedder(TextEmbedder::new(64));
        index
            .rebuild(&[("s".to_string(), SkillType::Basic, "text".to_string())])
            .unwrap();
        assert_eq!(index.query("text", 5, None).unwrap().len(), 1);
    }

    #[test]
    fn corrupt_mapping_is_reported() {
        let dir = TempDir::new().unwrap();
        let index_dir = dir.path().join("index");
        std::fs::create_dir_all(&index_dir).unwrap();
        std::fs::write(index_dir.join(MAPPING_FILE), "not json at all").unwrap();

        let index = VectorIndex::open(&index_dir, small_params()).unwrap();
        let err = index.query("anything", 3, None).unwrap_err();
        assert!(matches!(err, SkillError::Corruption { .. }));
    }

    #[test]
    fn capacity_overflow_surfaces() {
        let dir = TempDir::new().unwrap();
        let params = HnswParams {
            dim: 16,
            max_elements: 2,
            ..HnswParams::default()
        };
        let index = VectorIndex::open(dir.path().join("index"), params).unwrap();
        index.upsert("a", SkillType::Basic, "alpha").unwrap();
        index.upsert("b", SkillType::Basic, "beta").unwrap();

        let err = index.upsert("c", SkillType::Basic, "gamma").unwrap_err();
        assert!(matches!(err, SkillError::CapacityExceeded { .. }));
    }
}
