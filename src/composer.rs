//! Task-driven skill composition.
//!
//! Turns a natural-language task into an ordered, cycle-free skill plan:
//! vector retrieval for candidates, breadth-first dependency closure,
//! cycle breaking, and a topological ordering with a stable tie-break.
//! Also scores how well the current skill set covers a task and produces
//! alternative plans from tier-biased strategies.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::index::{SearchHit, VectorIndex};
use crate::repository::SkillRepository;
use crate::skill::{Skill, SkillType};

/// Plan length used by [`Composer::suggest_compositions`].
const SUGGESTION_MAX_SKILLS: usize = 5;

/// One entry of a composition plan.
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub skill: Skill,
    /// Vector score of the retrieval candidate; 0.0 for skills pulled in
    /// purely as dependencies.
    pub relevance_score: f32,
    /// Position in execution order, starting at 0.
    pub step_index: usize,
}

/// Ordered skill sequence for a task.
#[derive(Debug, Clone, Default)]
pub struct CompositionPlan {
    pub steps: Vec<PlanStep>,
    /// Human-readable notes gathered while planning.
    pub warnings: Vec<String>,
    /// `(dependent, dependency)` edges omitted to break cycles.
    pub omitted_edges: Vec<(String, String)>,
}

impl CompositionPlan {
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.skill.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Outcome of checking a plan against the store.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub skill_count: usize,
}

/// How well the current skills cover a task, per tier and overall.
#[derive(Debug, Clone)]
pub struct CoverageReport {
    /// Weighted mean of the per-tier scores, in `[0, 1]`.
    pub overall_coverage: f64,
    pub meta_coverage: f64,
    pub composite_coverage: f64,
    pub basic_coverage: f64,
    pub meta_skills_found: usize,
    pub composite_skills_found: usize,
    pub basic_skills_found: usize,
    pub recommendation: String,
}

/// One alternative plan from [`Composer::suggest_compositions`].
#[derive(Debug, Clone)]
pub struct CompositionSuggestion {
    /// Strategy that produced the plan, e.g. `meta-first`.
    pub approach: String,
    pub plan: CompositionPlan,
    pub validation: ValidationReport,
}

/// Coverage weights per tier. Meta skills carry the most signal about
/// whether a whole task is solvable.
const META_WEIGHT: f64 = 0.40;
const COMPOSITE_WEIGHT: f64 = 0.35;
const BASIC_WEIGHT: f64 = 0.25;

/// Composition planner over a repository and its vector index.
pub struct Composer<'a> {
    repository: &'a SkillRepository,
    index: &'a VectorIndex,
}

impl<'a> Composer<'a> {
    pub fn new(repository: &'a SkillRepository, index: &'a VectorIndex) -> Self {
        Self { repository, index }
    }

    /// Compose an ordered plan of at most `max_skills` skills for a task.
    ///
    /// When the vector index is empty or degraded the plan is empty, never
    /// an error.
    pub fn compose_for_task(&self, task: &str, max_skills: usize) -> Result<CompositionPlan> {
        if max_skills == 0 {
            return Ok(CompositionPlan::default());
        }

        let k = (max_skills * 3).max(15);
        let hits = self.index.query(task, k, None)?;
        let candidates = self.hydrate(hits)?;
        if candidates.is_empty() {
            debug!("No candidates for task '{}'", task);
            return Ok(CompositionPlan::default());
        }

        let plan = self.plan_from_candidates(candidates, max_skills)?;
        info!(
            "Composed {} skills for task '{}': {:?}",
            plan.steps.len(),
            task,
            plan.names()
        );
        Ok(plan)
    }

    /// Check a plan: dependency ordering, duplicates, existence.
    ///
    /// A dependency ordered after its dependent is an issue unless the plan
    /// recorded that edge as a cycle break; out-of-plan dependencies that
    /// exist in the store are warnings.
    pub fn validate_composition(&self, plan: &CompositionPlan) -> Result<ValidationReport> {
        let mut issues = Vec::new();
        let mut warnings = plan.warnings.clone();

        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (pos, step) in plan.steps.iter().enumerate() {
            if positions.insert(step.skill.name.as_str(), pos).is_some() {
                issues.push(format!("Skill '{}' appears more than once", step.skill.name));
            }
        }

        let omitted: HashSet<(&str, &str)> = plan
            .omitted_edges
            .iter()
            .map(|(a, b)| (a.as_str(), b.as_str()))
            .collect();

        for (pos, step) in plan.steps.iter().enumerate() {
            let name = step.skill.name.as_str();
            if self.repository.get_skill(name)?.is_none() {
                issues.push(format!("Skill '{}' is no longer in the repository", name));
            }

            for dep in &step.skill.dependencies {
                match positions.get(dep.as_str()) {
                    Some(&dep_pos) if dep_pos < pos => {}
                    Some(_) => {
                        if omitted.contains(&(name, dep.as_str())) {
                            let note = format!(
                                "Dependency cycle between '{}' and '{}' was broken",
                                name, dep
                            );
                            if !warnings.contains(&note) {
                                warnings.push(note);
                            }
                        } else {
                            issues.push(format!(
                                "Skill '{}' depends on '{}' which does not appear earlier in the plan",
                                name, dep
                            ));
                        }
                    }
                    None => {
                        if self.repository.get_skill(dep)?.is_some() {
                            warnings.push(format!(
                                "Skill '{}' depends on '{}' which is not in the composition",
                                name, dep
                            ));
                        } else {
                            issues.push(format!(
                                "Skill '{}' depends on missing skill '{}'",
                                name, dep
                            ));
                        }
                    }
                }
            }
        }

        Ok(ValidationReport {
            valid: issues.is_empty(),
            issues,
            warnings,
            skill_count: plan.steps.len(),
        })
    }

    /// Score task coverage per tier and overall.
    pub fn analyze_coverage(&self, task: &str) -> Result<CoverageReport> {
        let meta = self.index.query(task, 3, Some(SkillType::Meta))?;
        let composite = self.index.query(task, 5, Some(SkillType::Composite))?;
        let basic = self.index.query(task, 10, Some(SkillType::Basic))?;

        let meta_coverage = mean_score(&meta);
        let composite_coverage = mean_score(&composite);
        let basic_coverage = mean_score(&basic);
        let overall = meta_coverage * META_WEIGHT
            + composite_coverage * COMPOSITE_WEIGHT
            + basic_coverage * BASIC_WEIGHT;

        Ok(CoverageReport {
            overall_coverage: overall,
            meta_coverage,
            composite_coverage,
            basic_coverage,
            meta_skills_found: meta.len(),
            composite_skills_found: composite.len(),
            basic_skills_found: basic.len(),
            recommendation: recommendation(overall).to_string(),
        })
    }

    /// Up to `n` alternative plans from tier-biased strategies, deduplicated
    /// by name sequence. Fewer may come back when strategies coincide.
    pub fn suggest_compositions(&self, task: &str, n: usize) -> Result<Vec<CompositionSuggestion>> {
        let strategies = [
            (SkillType::Meta, "meta-first"),
            (SkillType::Composite, "composite-first"),
            (SkillType::Basic, "basic-first"),
        ];

        let mut seen: HashSet<Vec<String>> = HashSet::new();
        let mut suggestions = Vec::new();

        for (tier, approach) in strategies.iter().take(n) {
            let k = (SUGGESTION_MAX_SKILLS * 3).max(15);
            let hits = self.index.query(task, k, Some(*tier))?;
            let candidates = self.hydrate(hits)?;
            if candidates.is_empty() {
                continue;
            }

            let plan = self.plan_from_candidates(candidates, SUGGESTION_MAX_SKILLS)?;
            if plan.is_empty() {
                continue;
            }

            let names: Vec<String> = plan.names().into_iter().map(String::from).collect();
            if !seen.insert(names) {
                continue;
            }

            let validation = self.validate_composition(&plan)?;
            suggestions.push(CompositionSuggestion {
                approach: approach.to_string(),
                plan,
                validation,
            });
        }

        Ok(suggestions)
    }

    /// Drop index hits with no repository row and deduplicate by name,
    /// keeping retrieval order.
    fn hydrate(&self, hits: Vec<SearchHit>) -> Result<Vec<(Skill, f32)>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates = Vec::with_capacity(hits.len());
        for hit in hits {
            if !seen.insert(hit.skill_name.clone()) {
                continue;
            }
            if let Some(skill) = self.repository.get_skill(&hit.skill_name)? {
                candidates.push((skill, hit.score));
            } else {
                debug!("Dropping stale index hit '{}'", hit.skill_name);
            }
        }
        Ok(candidates)
    }

    /// Dependency closure, cycle break, topological order, truncation.
    fn plan_from_candidates(
        &self,
        candidates: Vec<(Skill, f32)>,
        max_skills: usize,
    ) -> Result<CompositionPlan> {
        let mut skills: HashMap<String, Skill> = HashMap::new();
        let mut scores: HashMap<String, f32> = HashMap::new();
        let mut ranks: HashMap<String, usize> = HashMap::new();
        let mut warnings = Vec::new();

        let mut queue: VecDeque<String> = VecDeque::new();
        for (rank, (skill, score)) in candidates.into_iter().enumerate() {
            let name = skill.name.clone();
            scores.insert(name.clone(), score);
            ranks.insert(name.clone(), rank);
            skills.insert(name.clone(), skill);
            queue.push_back(name);
        }

        // Breadth-first closure over declared dependencies.
        while let Some(name) = queue.pop_front() {
            let deps = skills[&name].dependencies.clone();
            for dep in deps {
                if skills.contains_key(&dep) {
                    continue;
                }
                match self.repository.get_skill(&dep)? {
                    Some(skill) => {
                        scores.insert(dep.clone(), 0.0);
                        ranks.insert(dep.clone(), usize::MAX);
                        skills.insert(dep.clone(), skill);
                        queue.push_back(dep);
                    }
                    None => {
                        warnings.push(format!(
                            "Skill '{}' depends on missing skill '{}'",
                            name, dep
                        ));
                    }
                }
            }
        }

        // Edges restricted to the closure: dependent -> its in-closure deps.
        let mut deps_of: HashMap<&str, Vec<&str>> = HashMap::new();
        for (name, skill) in &skills {
            let deps = skill
                .dependencies
                .iter()
                .filter(|d| skills.contains_key(d.as_str()))
                .map(|d| d.as_str())
                .collect();
            deps_of.insert(name.as_str(), deps);
        }

        let omitted = break_cycles(&mut deps_of);
        for (dependent, dependency) in &omitted {
            warn!(
                "Dependency cycle broken: '{}' -> '{}' omitted from ordering",
                dependent, dependency
            );
            warnings.push(format!(
                "Dependency cycle between '{}' and '{}' was broken",
                dependent, dependency
            ));
        }

        // Kahn's algorithm; ties resolved by (type rank, retrieval rank, name)
        // so dependencies-first tiers and better-matching skills come early.
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents_of: HashMap<&str, Vec<&str>> = HashMap::new();
        for (&name, deps) in &deps_of {
            in_degree.insert(name, deps.len());
            for &dep in deps {
                dependents_of.entry(dep).or_default().push(name);
            }
        }

        let sort_key = |name: &str| {
            (
                skills[name].skill_type.rank(),
                *ranks.get(name).unwrap_or(&usize::MAX),
                name.to_string(),
            )
        };

        let mut ready: BTreeSet<(u8, usize, String)> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&name, _)| sort_key(name))
            .collect();

        let mut order: Vec<String> = Vec::with_capacity(skills.len());
        while let Some((_, _, name)) = ready.pop_first() {
            for &dependent in dependents_of.get(name.as_str()).into_iter().flatten() {
                let degree = in_degree.get_mut(dependent).expect("dependent tracked");
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(sort_key(dependent));
                }
            }
            order.push(name);
        }

        // Truncate, dropping any skill whose in-plan dependency fell off.
        let mut kept: HashSet<&str> = HashSet::new();
        let mut steps = Vec::new();
        for name in &order {
            if steps.len() == max_skills {
                break;
            }
            let deps_ok = deps_of[name.as_str()].iter().all(|d| kept.contains(d));
            if !deps_ok {
                continue;
            }
            kept.insert(name.as_str());
            steps.push(PlanStep {
                skill: skills[name].clone(),
                relevance_score: *scores.get(name).unwrap_or(&0.0),
                step_index: steps.len(),
            });
        }

        Ok(CompositionPlan {
            steps,
            warnings,
            omitted_edges: omitted,
        })
    }
}

/// Depth-first cycle break over `deps_of` (dependent -> dependencies).
/// Every edge that would close a cycle is removed and reported as
/// `(dependent, dependency)`.
fn break_cycles(deps_of: &mut HashMap<&str, Vec<&str>>) -> Vec<(String, String)> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    fn visit(
        name: &str,
        deps_of: &HashMap<&str, Vec<&str>>,
        colors: &mut HashMap<String, Color>,
        omitted: &mut Vec<(String, String)>,
    ) {
        colors.insert(name.to_string(), Color::Gray);
        for dep in deps_of.get(name).cloned().unwrap_or_default() {
            match colors.get(dep).copied().unwrap_or(Color::White) {
                Color::Gray => omitted.push((name.to_string(), dep.to_string())),
                Color::White => visit(dep, deps_of, colors, omitted),
                Color::Black => {}
            }
        }
        colors.insert(name.to_string(), Color::Black);
    }

    let mut names: Vec<&str> = deps_of.keys().copied().collect();
    names.sort_unstable();

    let mut colors: HashMap<String, Color> = HashMap::new();
    let mut omitted = Vec::new();
    for name in names {
        if colors.get(name).copied().unwrap_or(Color::White) == Color::White {
            visit(name, deps_of, &mut colors, &mut omitted);
        }
    }

    for (dependent, dependency) in &omitted {
        if let Some(deps) = deps_of.get_mut(dependent.as_str()) {
            deps.retain(|d| d != dependency);
        }
    }
    omitted
}

fn mean_score(hits: &[SearchHit]) -> f64 {
    if hits.is_empty() {
        return 0.0;
    }
    let sum: f64 = hits.iter().map(|h| (h.score as f64).clamp(0.0, 1.0)).sum();
    sum / hits.len() as f64
}

fn recommendation(coverage: f64) -> &'static str {
    if coverage > 0.7 {
        "Good coverage - existing skills can handle this task"
    } else if coverage >= 0.4 {
        "Moderate coverage - consider creating composite skill"
    } else {
        "Low coverage - consider creating new skills"
    }
}
