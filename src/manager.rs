//! Public façade over the repository, vector index and composer.
//!
//! The manager owns both stores and keeps them in sync: with `auto_sync`
//! every repository mutation is mirrored into the vector index within the
//! same call, strictly after the repository commit. Vector failures never
//! fail the mutation; they are logged and repaired by `rebuild_index()`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::composer::{
    Composer, CompositionPlan, CompositionSuggestion, CoverageReport, ValidationReport,
};
use crate::config::StoreConfig;
use crate::embedder::{embedding_text, TextEmbedder};
use crate::error::{Result, SkillError};
use crate::hnsw::HnswParams;
use crate::index::{IndexStats, VectorIndex};
use crate::repository::SkillRepository;
use crate::skill::{ExecutionRecord, Skill, SkillStats, SkillType, SkillVersion, SystemStats};

/// A semantic search result enriched with repository fields.
#[derive(Debug, Clone)]
pub struct SkillMatch {
    pub skill_name: String,
    /// `1 - cosine_distance`, in `[0, 1]`.
    pub score: f32,
    pub skill_type: SkillType,
    pub description: String,
    pub tags: Vec<String>,
}

/// Per-tier results of a hierarchical search.
#[derive(Debug, Clone, Default)]
pub struct TierResults {
    pub meta: Vec<SkillMatch>,
    pub composite: Vec<SkillMatch>,
    pub basic: Vec<SkillMatch>,
}

/// Single entry point to the skills management core.
///
/// One manager per `storage_dir` per process; a second directory yields a
/// fully independent manager.
pub struct SkillManager {
    config: StoreConfig,
    repository: SkillRepository,
    index: VectorIndex,
}

impl SkillManager {
    /// Open (or create) the store under `config.storage_dir`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let repository = SkillRepository::open(&config.storage_dir)?;
        let index = VectorIndex::open(config.storage_dir.join("index"), hnsw_params(&config))?;
        info!("Skill manager initialized at {}", config.storage_dir.display());
        Ok(Self {
            config,
            repository,
            index,
        })
    }

    /// Open with no embedding backend: writes succeed, semantic search
    /// returns empty results until an embedder is installed and
    /// `rebuild_index()` runs.
    pub fn open_without_embeddings(config: StoreConfig) -> Result<Self> {
        let repository = SkillRepository::open(&config.storage_dir)?;
        let index = VectorIndex::open_without_embedder(
            config.storage_dir.join("index"),
            hnsw_params(&config),
        )?;
        info!(
            "Skill manager initialized at {} (embeddings disabled)",
            config.storage_dir.display()
        );
        Ok(Self {
            config,
            repository,
            index,
        })
    }

    /// Install the embedding backend after the fact.
    pub fn set_embedder(&self, embedder: TextEmbedder) {
        self.index.set_embedder(embedder);
    }

    pub fn embeddings_enabled(&self) -> bool {
        self.index.embeddings_enabled()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Add a new skill and index it (under `auto_sync`).
    pub fn add_skill(
        &self,
        name: &str,
        content: &str,
        skill_type: SkillType,
        description: Option<&str>,
        tags: &[&str],
        dependencies: &[&str],
    ) -> Result<i64> {
        let id = self
            .repository
            .add_skill(name, content, skill_type, description, tags, dependencies)?;

        if self.config.auto_sync {
            let text = embedding_text(name, description.unwrap_or(""), content);
            self.sync_upsert(name, skill_type, &text);
        }
        Ok(id)
    }

    /// Update content (new version) and re-index. Returns the new version.
    pub fn update_skill(
        &self,
        name: &str,
        content: &str,
        change_description: Option<&str>,
    ) -> Result<i64> {
        let version = self
            .repository
            .update_skill(name, content, change_description)?;

        if self.config.auto_sync {
            if let Some(skill) = self.repository.get_skill(name)? {
                let text = embedding_text(name, &skill.description, content);
                self.sync_upsert(name, skill.skill_type, &text);
            }
        }
        Ok(version)
    }

    /// Delete a skill everywhere. Returns false when the name was absent.
    pub fn delete_skill(&self, name: &str) -> Result<bool> {
        let deleted = self.repository.delete_skill(name)?;

        if deleted && self.config.auto_sync {
            match self.index.remove(name).and_then(|_| self.index.save()) {
                Ok(()) => {}
                Err(e) => warn!(
                    "Vector removal failed for '{}': {} (run rebuild_index() to repair)",
                    name, e
                ),
            }
        }
        Ok(deleted)
    }

    pub fn get_skill(&self, name: &str) -> Result<Option<Skill>> {
        self.repository.get_skill(name)
    }

    pub fn list_skills(&self, skill_type: Option<SkillType>, tags: &[&str]) -> Result<Vec<Skill>> {
        self.repository.list_skills(skill_type, tags)
    }

    pub fn get_versions(&self, name: &str) -> Result<Vec<SkillVersion>> {
        self.repository.get_versions(name)
    }

    pub fn set_dependencies(&self, name: &str, dependencies: &[&str]) -> Result<()> {
        self.repository.set_dependencies(name, dependencies)
    }

    /// Record one execution outcome; see
    /// [`SkillRepository::record_execution`].
    pub fn record_execution(
        &self,
        name: &str,
        success: bool,
        execution_time_ms: Option<f64>,
        context: Option<Value>,
    ) -> Result<()> {
        self.repository
            .record_execution(name, success, execution_time_ms, context)
    }

    pub fn get_skill_stats(&self, name: &str) -> Result<Option<SkillStats>> {
        self.repository.get_skill_stats(name)
    }

    /// Execution history tail; `limit` defaults to
    /// `config.history_tail_default`.
    pub fn get_history(&self, name: &str, limit: Option<usize>) -> Result<Vec<ExecutionRecord>> {
        self.repository
            .get_history(name, limit.unwrap_or(self.config.history_tail_default))
    }

    /// Semantic search hydrated against the repository.
    pub fn search_skills(
        &self,
        query: &str,
        limit: usize,
        skill_type: Option<SkillType>,
    ) -> Result<Vec<SkillMatch>> {
        let hits = self.index.query(query, limit, skill_type)?;

        let mut matches = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(skill) = self.repository.get_skill(&hit.skill_name)? else {
                continue;
            };
            if let Some(filter) = skill_type {
                if skill.skill_type != filter {
                    continue;
                }
            }
            matches.push(SkillMatch {
                skill_name: hit.skill_name,
                score: hit.score,
                skill_type: skill.skill_type,
                description: skill.description,
                tags: skill.tags,
            });
        }
        Ok(matches)
    }

    /// Three independent tier-filtered searches.
    pub fn hierarchical_search(&self, query: &str, per_level: usize) -> Result<TierResults> {
        Ok(TierResults {
            meta: self.search_skills(query, per_level, Some(SkillType::Meta))?,
            composite: self.search_skills(query, per_level, Some(SkillType::Composite))?,
            basic: self.search_skills(query, per_level, Some(SkillType::Basic))?,
        })
    }

    /// Compose an ordered plan for a task.
    pub fn compose_for_task(&self, task: &str, max_skills: usize) -> Result<CompositionPlan> {
        self.composer().compose_for_task(task, max_skills)
    }

    pub fn validate_composition(&self, plan: &CompositionPlan) -> Result<ValidationReport> {
        self.composer().validate_composition(plan)
    }

    pub fn analyze_coverage(&self, task: &str) -> Result<CoverageReport> {
        self.composer().analyze_coverage(task)
    }

    pub fn suggest_compositions(&self, task: &str, n: usize) -> Result<Vec<CompositionSuggestion>> {
        self.composer().suggest_compositions(task, n)
    }

    /// Rebuild the vector index from the repository. The canonical
    /// catch-up path after bulk imports or vector-sync failures.
    pub fn rebuild_index(&self) -> Result<()> {
        let skills = self.repository.list_skills(None, &[])?;
        let entries: Vec<(String, SkillType, String)> = skills
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    s.skill_type,
                    embedding_text(&s.name, &s.description, &s.content),
                )
            })
            .collect();

        self.index.rebuild(&entries)?;
        info!("Index rebuilt with {} skills", entries.len());
        Ok(())
    }

    /// Rebuild only when the repository and the index disagree on the set
    /// of indexed names.
    pub fn sync(&self) -> Result<()> {
        let repo_names: BTreeSet<String> = self
            .repository
            .list_skills(None, &[])?
            .into_iter()
            .map(|s| s.name)
            .collect();
        let index_names: BTreeSet<String> = self.index.indexed_names()?.into_iter().collect();

        if repo_names != index_names {
            info!("Vector index diverged from repository; rebuilding");
            self.rebuild_index()?;
        }
        Ok(())
    }

    /// Aggregate totals across the store.
    pub fn get_system_stats(&self) -> Result<SystemStats> {
        let skills = self.repository.list_skills(None, &[])?;

        let mut stats = SystemStats {
            total_skills: skills.len(),
            skills_by_type: Default::default(),
            total_executions: 0,
            total_successes: 0,
            overall_success_rate: 0.0,
        };
        for skill in &skills {
            *stats
                .skills_by_type
                .entry(skill.skill_type.as_str().to_string())
                .or_insert(0) += 1;
            stats.total_executions += skill.usage_count;
            stats.total_successes += skill.success_count;
        }
        if stats.total_executions > 0 {
            stats.overall_success_rate =
                stats.total_successes as f64 / stats.total_executions as f64;
        }
        Ok(stats)
    }

    pub fn index_stats(&self) -> Result<IndexStats> {
        self.index.stats()
    }

    /// Write a skill to disk: YAML front matter (name, description,
    /// skill_type, tags, plus any keys carried in the metadata blob)
    /// followed by the content verbatim.
    pub fn export_skill(&self, name: &str, path: &Path) -> Result<()> {
        let skill = self
            .get_skill(name)?
            .ok_or_else(|| SkillError::UnknownSkill(name.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SkillError::io(parent, e))?;
        }

        let extra = match self.repository.get_metadata(name)? {
            Some(Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        let front = FrontMatter {
            name: skill.name,
            description: skill.description,
            skill_type: skill.skill_type.as_str().to_string(),
            tags: skill.tags,
            extra,
        };
        let yaml = serde_yaml_bw::to_string(&front)
            .map_err(|e| SkillError::IntegrityViolation(e.to_string()))?;

        let document = format!("---\n{}---\n{}", yaml, skill.content);
        std::fs::write(path, document).map_err(|e| SkillError::io(path, e))?;

        info!("Exported skill '{}' to {}", name, path.display());
        Ok(())
    }

    /// Import a skill file written by [`export_skill`](Self::export_skill).
    ///
    /// Without front matter the whole file becomes the content, named after
    /// the file stem, typed basic. Front-matter keys beyond the known set
    /// are kept in the skill's metadata blob and survive a later export.
    /// An existing name fails `DuplicateName`.
    pub fn import_skill_from_file(&self, path: &Path) -> Result<i64> {
        let text = std::fs::read_to_string(path).map_err(|e| SkillError::io(path, e))?;

        let parsed = split_front_matter(&text).and_then(|(yaml, body)| {
            match serde_yaml_bw::from_str::<FrontMatter>(yaml) {
                Ok(front) => Some((front, body)),
                Err(e) => {
                    warn!("Unreadable front matter in {}: {}", path.display(), e);
                    None
                }
            }
        });

        let (front, body) = match parsed {
            Some((front, body)) => (front, body.to_string()),
            None => {
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("imported_skill");
                (
                    FrontMatter {
                        name: stem.to_string(),
                        description: String::new(),
                        skill_type: "basic".to_string(),
                        tags: Vec::new(),
                        extra: BTreeMap::new(),
                    },
                    text.clone(),
                )
            }
        };

        let skill_type = SkillType::parse(&front.skill_type)
            .ok_or_else(|| SkillError::InvalidType(front.skill_type.clone()))?;
        let tags: Vec<&str> = front.tags.iter().map(String::as_str).collect();

        let id = self.add_skill(
            &front.name,
            &body,
            skill_type,
            Some(&front.description),
            &tags,
            &[],
        )?;

        // Unknown front-matter keys ride along in the metadata blob so a
        // later export can re-emit them.
        if !front.extra.is_empty() {
            let map: serde_json::Map<String, Value> = front.extra.into_iter().collect();
            self.repository.set_metadata(&front.name, &Value::Object(map))?;
        }

        info!("Imported skill '{}' from {}", front.name, path.display());
        Ok(id)
    }

    fn composer(&self) -> Composer<'_> {
        Composer::new(&self.repository, &self.index)
    }

    fn sync_upsert(&self, name: &str, skill_type: SkillType, text: &str) {
        match self
            .index
            .upsert(name, skill_type, text)
            .and_then(|_| self.index.save())
        {
            Ok(()) => {}
            Err(e) => warn!(
                "Vector sync failed for '{}': {} (run rebuild_index() to repair)",
                name, e
            ),
        }
    }
}

fn hnsw_params(config: &StoreConfig) -> HnswParams {
    HnswParams {
        dim: config.embedding_dim,
        m: config.m,
        ef_construction: config.ef_construction,
        ef_search: config.ef_search,
        max_elements: config.max_elements,
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FrontMatter {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_skill_type")]
    skill_type: String,
    #[serde(default)]
    tags: Vec<String>,
    /// Keys beyond the known set; preserved across export/import through
    /// the skill's metadata blob.
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

fn default_skill_type() -> String {
    "basic".to_string()
}

/// Split a `---` delimited front matter block from the body. The body
/// starts right after the closing delimiter line, byte-for-byte.
fn split_front_matter(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix("---\n")?;
    let end = rest.find("\n---\n")?;
    Some((&rest[..end + 1], &rest[end + 5..]))
}
