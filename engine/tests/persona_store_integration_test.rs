//! Integration tests for the persona library
//!
//! Exercises the full lifecycle against a real temp directory: the
//! append-structured YAML file format, identity collapse, matching
//! threshold behaviour, and durability across reopen.

use std::collections::BTreeMap;
use tempfile::TempDir;

use foreman_engine::persona::{similarity, AgentDna, PersonaStore};

fn dna(role: &str, seniority: &str, domain: &str) -> AgentDna {
    let mut constraints = BTreeMap::new();
    constraints.insert("quality".to_string(), "production-ready".to_string());

    let mut output_format = BTreeMap::new();
    output_format.insert("code".to_string(), "idiomatic".to_string());
    output_format.insert("notes".to_string(), "assumptions".to_string());

    AgentDna {
        role: role.to_string(),
        seniority: seniority.to_string(),
        domain: domain.to_string(),
        methodologies: vec!["TDD".to_string(), "code review".to_string()],
        constraints,
        output_format,
    }
}

#[test]
fn test_file_holds_one_yaml_document_per_persona() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("personas.yaml");
    let store = PersonaStore::open(&path).unwrap();

    store.insert(dna("Backend Developer", "Senior", "development")).unwrap();
    store.insert(dna("QA Engineer", "Mid", "testing")).unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.matches("---").count(), 2);
    assert!(contents.contains("Backend Developer"));
    assert!(contents.contains("QA Engineer"));
}

#[test]
fn test_collapse_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("personas.yaml");

    let original = {
        let store = PersonaStore::open(&path).unwrap();
        store.insert(dna("Backend Developer", "Senior", "development")).unwrap()
    };

    // A new process inserting identical DNA gets the same record back.
    let reopened = PersonaStore::open(&path).unwrap();
    let collapsed = reopened
        .insert(dna("Backend Developer", "Senior", "development"))
        .unwrap();

    assert_eq!(original, collapsed);
    assert_eq!(reopened.len(), 1);
}

#[test]
fn test_exact_dna_matches_at_similarity_one() {
    let dir = TempDir::new().unwrap();
    let store = PersonaStore::open(dir.path().join("personas.yaml")).unwrap();

    let exact = dna("Data Analyst", "Senior", "data");
    store.insert(exact.clone()).unwrap();

    let (persona, score) = store.match_best(&exact).unwrap();
    assert_eq!(persona.dna, exact);
    assert!((score - 1.0).abs() < 1e-9);
}

#[test]
fn test_related_dna_clears_the_reuse_threshold() {
    let dir = TempDir::new().unwrap();
    let store = PersonaStore::open(dir.path().join("personas.yaml")).unwrap();

    store.insert(dna("Data Analyst", "Senior", "data")).unwrap();

    // Same role and domain, different seniority: reusable (>= 0.7).
    let probe = dna("Data Analyst", "Junior", "data");
    let (_, score) = store.match_best(&probe).unwrap();
    assert!(score >= 0.7, "expected reusable similarity, got {}", score);

    // Different role and domain: not reusable.
    let unrelated = dna("Product Designer", "Senior", "design");
    let (_, score) = store.match_best(&unrelated).unwrap();
    assert!(score < 0.7, "expected below-threshold similarity, got {}", score);
}

#[test]
fn test_scores_and_usage_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("personas.yaml");

    let id = {
        let store = PersonaStore::open(&path).unwrap();
        let id = store.insert(dna("SRE", "Staff", "devops")).unwrap();
        store.record_use(&id, 0.62).unwrap();
        store.record_use(&id, 0.71).unwrap();
        id
    };

    let reopened = PersonaStore::open(&path).unwrap();
    let persona = reopened.get(&id).unwrap();

    assert_eq!(persona.uses, 2);
    assert!((persona.score - 0.71).abs() < 1e-9);
    assert!(persona.last_used.is_some());
}

#[test]
fn test_similarity_weights_sum_for_disjoint_dna() {
    // Completely unrelated DNA shares nothing: only the empty-set rules
    // apply, and the score stays far below the threshold.
    let mut a = dna("Backend Developer", "Senior", "development");
    a.methodologies = vec!["TDD".to_string()];
    a.constraints = [("security".to_string(), "strict".to_string())].into();
    a.output_format = [("code".to_string(), "rust".to_string())].into();

    let mut b = dna("Illustrator", "Junior", "print media");
    b.methodologies = vec!["sketching".to_string()];
    b.constraints = [("deadline".to_string(), "tight".to_string())].into();
    b.output_format = [("artwork".to_string(), "vector".to_string())].into();

    assert!(similarity(&a, &b) < 0.1);
}

#[test]
fn test_corrupt_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("personas.yaml");
    std::fs::write(&path, "---\nrole: [unclosed\n").unwrap();

    let err = PersonaStore::open(&path).unwrap_err();
    assert_eq!(err.code(), "PersonaStoreError");
}
