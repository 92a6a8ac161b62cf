//! Core skill data types.
//!
//! A skill is a named, versioned markdown document describing a reusable
//! agent capability. The three tiers differ in their role during
//! composition, not in storage shape.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Skill tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillType {
    /// Atomic, single-purpose skill.
    Basic,
    /// Multi-step skill built from other skills.
    Composite,
    /// Orchestration-level skill.
    Meta,
}

impl SkillType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillType::Basic => "basic",
            SkillType::Composite => "composite",
            SkillType::Meta => "meta",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "basic" => Some(SkillType::Basic),
            "composite" => Some(SkillType::Composite),
            "meta" => Some(SkillType::Meta),
            _ => None,
        }
    }

    /// Ordering rank for composition: dependencies-first, so basic skills
    /// sort before composite, composite before meta.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            SkillType::Basic => 0,
            SkillType::Composite => 1,
            SkillType::Meta => 2,
        }
    }
}

impl std::fmt::Display for SkillType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hydrated skill record: main row plus tags and dependency names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: i64,
    pub name: String,
    pub skill_type: SkillType,
    pub description: String,
    /// Full markdown body; also the source text for embedding.
    pub content: String,
    pub version: i64,
    pub usage_count: i64,
    pub success_count: i64,
    /// Unix milliseconds, UTC.
    pub created_at: i64,
    /// Unix milliseconds, UTC. Changes on every mutation.
    pub updated_at: i64,
    pub tags: Vec<String>,
    /// Names of skills this skill depends on.
    pub dependencies: Vec<String>,
}

/// Immutable historical snapshot of a skill's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillVersion {
    pub version: i64,
    pub content: String,
    pub change_description: String,
    /// Unix milliseconds, UTC.
    pub created_at: i64,
}

/// Per-skill execution statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillStats {
    pub usage_count: i64,
    pub success_count: i64,
    pub version: i64,
    /// `success_count / usage_count`, 0.0 when unused.
    pub success_rate: f64,
    /// Exponential moving average with weight 0.2 on the newest sample.
    pub average_execution_time_ms: Option<f64>,
    /// Unix milliseconds, UTC.
    pub last_execution_at: Option<i64>,
}

/// One line of the per-skill append-only history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

/// Aggregate statistics across the whole store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_skills: usize,
    pub skills_by_type: BTreeMap<String, usize>,
    pub total_executions: i64,
    pub total_successes: i64,
    /// `total_successes / total_executions`, 0.0 when nothing ran.
    pub overall_success_rate: f64,
}

/// Current wall-clock time as unix milliseconds.
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
