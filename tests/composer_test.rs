//! Integration tests for task-driven composition.

use skillbank::{SkillManager, SkillType, StoreConfig};
use tempfile::TempDir;

fn open_manager() -> (TempDir, SkillManager) {
    let dir = TempDir::new().unwrap();
    let mut config = StoreConfig::new(dir.path().join("skills"));
    config.embedding_dim = 64;
    let manager = SkillManager::open(config).unwrap();
    (dir, manager)
}

#[test]
fn dependency_composition_scenario() {
    let (_dir, manager) = open_manager();
    manager
        .add_skill("a", "# a\n\nbase step", SkillType::Basic, None, &[], &[])
        .unwrap();
    manager
        .add_skill("b", "# b\n\nmiddle step", SkillType::Basic, None, &[], &["a"])
        .unwrap();
    manager
        .add_skill("c", "# c\n\nrun c final step", SkillType::Composite, None, &[], &["b"])
        .unwrap();

    let plan = manager.compose_for_task("run c", 5).unwrap();
    assert_eq!(plan.names(), vec!["a", "b", "c"]);

    // Property: every in-plan dependency appears at a strictly smaller index.
    for step in &plan.steps {
        for dep in &step.skill.dependencies {
            let dep_index = plan
                .steps
                .iter()
                .find(|s| &s.skill.name == dep)
                .map(|s| s.step_index);
            if let Some(dep_index) = dep_index {
                assert!(dep_index < step.step_index);
            }
        }
    }

    let report = manager.validate_composition(&plan).unwrap();
    assert!(report.valid, "issues: {:?}", report.issues);
    assert_eq!(report.skill_count, 3);
}

#[test]
fn plan_annotations_carry_scores_and_indices() {
    let (_dir, manager) = open_manager();
    manager
        .add_skill("tag_version", "# tag_version", SkillType::Basic, None, &[], &[])
        .unwrap();
    manager
        .add_skill(
            "release",
            "# release the project",
            SkillType::Composite,
            None,
            &[],
            &["tag_version"],
        )
        .unwrap();

    let plan = manager.compose_for_task("release the project", 5).unwrap();
    assert_eq!(plan.names(), vec!["tag_version", "release"]);

    let release = &plan.steps[1];
    assert!(release.relevance_score > 0.0);
    assert_eq!(
        plan.steps.iter().map(|s| s.step_index).collect::<Vec<_>>(),
        vec![0, 1]
    );
}

#[test]
fn coverage_on_empty_store_recommends_new_skills() {
    let (_dir, manager) = open_manager();

    let report = manager.analyze_coverage("deploy app").unwrap();
    assert_eq!(report.overall_coverage, 0.0);
    assert!(report.recommendation.contains("Low coverage"));
}

#[test]
fn coverage_weighs_tiers() {
    let (_dir, manager) = open_manager();
    manager
        .add_skill(
            "deploy_everything",
            "# Deploy everything\n\ndeploy app to production",
            SkillType::Meta,
            None,
            &[],
            &[],
        )
        .unwrap();

    let report = manager.analyze_coverage("deploy app to production").unwrap();
    assert!(report.meta_coverage > 0.0);
    assert_eq!(report.composite_coverage, 0.0);
    assert_eq!(report.basic_coverage, 0.0);
    let expected = report.meta_coverage * 0.40;
    assert!((report.overall_coverage - expected).abs() < 1e-9);
}

#[test]
fn empty_store_composes_nothing() {
    let (_dir, manager) = open_manager();
    let plan = manager.compose_for_task("anything at all", 5).unwrap();
    assert!(plan.is_empty());

    let suggestions = manager.suggest_compositions("anything at all", 3).unwrap();
    assert!(suggestions.is_empty());
}

#[test]
fn suggestions_come_from_distinct_strategies() {
    let (_dir, manager) = open_manager();
    manager
        .add_skill(
            "ship_feature",
            "# Ship feature\n\nship the feature end to end",
            SkillType::Meta,
            None,
            &[],
            &[],
        )
        .unwrap();
    manager
        .add_skill(
            "merge_and_tag",
            "# Merge and tag\n\nship steps",
            SkillType::Composite,
            None,
            &[],
            &["run_ci"],
        )
        .unwrap();
    manager
        .add_skill("run_ci", "# Run CI\n\nship gate", SkillType::Basic, None, &[], &[])
        .unwrap();

    let suggestions = manager.suggest_compositions("ship the feature", 3).unwrap();
    assert!(!suggestions.is_empty());
    assert!(suggestions.len() <= 3);

    // Deduplicated by name sequence.
    let mut sequences: Vec<Vec<&str>> = suggestions.iter().map(|s| s.plan.names()).collect();
    sequences.sort();
    sequences.dedup();
    assert_eq!(sequences.len(), suggestions.len());

    for suggestion in &suggestions {
        assert!(suggestion.approach.ends_with("-first"));
        assert!(suggestion.validation.valid);
    }
}

#[test]
fn cyclic_dependencies_still_produce_a_plan() {
    let (_dir, manager) = open_manager();
    manager
        .add_skill("ping", "# ping pong step", SkillType::Basic, None, &[], &[])
        .unwrap();
    manager
        .add_skill("pong", "# pong ping step", SkillType::Basic, None, &[], &["ping"])
        .unwrap();
    manager.set_dependencies("ping", &["pong"]).unwrap();

    let plan = manager.compose_for_task("ping pong", 5).unwrap();
    assert_eq!(plan.steps.len(), 2);
    assert_eq!(plan.omitted_edges.len(), 1);

    let report = manager.validate_composition(&plan).unwrap();
    assert!(report.valid, "issues: {:?}", report.issues);
    assert!(!report.warnings.is_empty());
}

#[test]
fn degraded_vector_index_yields_empty_plan_and_zero_coverage() {
    let dir = TempDir::new().unwrap();
    let mut config = StoreConfig::new(dir.path().join("skills"));
    config.embedding_dim = 64;
    let manager = SkillManager::open_without_embeddings(config).unwrap();

    manager
        .add_skill("s", "# Something", SkillType::Basic, None, &[], &[])
        .unwrap();

    let plan = manager.compose_for_task("something", 5).unwrap();
    assert!(plan.is_empty());

    let coverage = manager.analyze_coverage("something").unwrap();
    assert_eq!(coverage.overall_coverage, 0.0);
    assert!(coverage.recommendation.contains("Low coverage"));
}
