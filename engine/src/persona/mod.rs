//! Agent personas
//!
//! A persona is the five-element specification that defines a specialized
//! agent: role+seniority, domain context, methodologies, constraints, and
//! output format. Personas are persisted in a library so that an existing
//! specification is matched and reloaded instead of regenerated.
//!
//! Identity is the content of the five elements: two personas with
//! identical DNA collapse to a single record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{EngineError, Result};

pub mod store;

pub use store::PersonaStore;

/// Five-element agent DNA
///
/// Collections use ordered containers so that serialization and identity
/// are deterministic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentDna {
    /// Role, e.g. "Backend Developer"
    pub role: String,

    /// Seniority: Junior, Mid, Senior, Staff, Principal
    pub seniority: String,

    /// Industry/domain context, e.g. "E-commerce payment processing"
    pub domain: String,

    /// Methodologies in priority order: TDD, DDD, GitOps, ...
    pub methodologies: Vec<String>,

    /// Named limits: security, performance, budget, timeline
    pub constraints: BTreeMap<String, String>,

    /// Expected deliverable shape: code style, docs, report sections
    pub output_format: BTreeMap<String, String>,
}

impl AgentDna {
    /// Validate that all five elements are populated
    ///
    /// Validation is structural: it checks presence, not content.
    pub fn validate(&self) -> Result<()> {
        if self.role.trim().is_empty() || self.seniority.trim().is_empty() {
            return Err(EngineError::Validation(
                "persona missing role/seniority (element 1)".to_string(),
            ));
        }
        if self.domain.trim().is_empty() {
            return Err(EngineError::Validation(
                "persona missing domain context (element 2)".to_string(),
            ));
        }
        if self.methodologies.is_empty() {
            return Err(EngineError::Validation(
                "persona missing methodologies (element 3)".to_string(),
            ));
        }
        if self.constraints.is_empty() {
            return Err(EngineError::Validation(
                "persona missing constraints (element 4)".to_string(),
            ));
        }
        if self.output_format.is_empty() {
            return Err(EngineError::Validation(
                "persona missing output format (element 5)".to_string(),
            ));
        }
        Ok(())
    }

    /// Canonical content fingerprint used for identity collapse
    ///
    /// Case-insensitive over the five elements; metadata never
    /// participates.
    pub fn fingerprint(&self) -> String {
        let mut parts = vec![
            self.role.trim().to_lowercase(),
            self.seniority.trim().to_lowercase(),
            self.domain.trim().to_lowercase(),
        ];
        parts.push(
            self.methodologies
                .iter()
                .map(|m| m.trim().to_lowercase())
                .collect::<Vec<_>>()
                .join(","),
        );
        parts.push(
            self.constraints
                .iter()
                .map(|(k, v)| format!("{}={}", k.trim().to_lowercase(), v.trim().to_lowercase()))
                .collect::<Vec<_>>()
                .join(","),
        );
        parts.push(
            self.output_format
                .iter()
                .map(|(k, v)| format!("{}={}", k.trim().to_lowercase(), v.trim().to_lowercase()))
                .collect::<Vec<_>>()
                .join(","),
        );
        parts.join("|")
    }

    /// Sensible default DNA for a role/domain pair
    ///
    /// Used when persona generation via the model fails or the library is
    /// unavailable; the workflow still gets a structurally valid agent.
    pub fn baseline(role: impl Into<String>, seniority: impl Into<String>, domain: impl Into<String>) -> Self {
        let domain = domain.into();
        let mut constraints = BTreeMap::new();
        constraints.insert("quality".to_string(), "production-ready".to_string());
        constraints.insert("timeline".to_string(), "single working session".to_string());

        let mut output_format = BTreeMap::new();
        output_format.insert("result".to_string(), "the deliverable itself".to_string());
        output_format.insert("notes".to_string(), "assumptions and follow-ups".to_string());

        Self {
            role: role.into(),
            seniority: seniority.into(),
            methodologies: vec![
                "iterative delivery".to_string(),
                format!("{} best practices", domain),
            ],
            domain,
            constraints,
            output_format,
        }
    }
}

impl std::fmt::Display for AgentDna {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.seniority, self.role, self.domain)
    }
}

/// A persisted persona: DNA plus library metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    /// Library identifier
    pub id: String,

    /// The five-element specification
    #[serde(flatten)]
    pub dna: AgentDna,

    /// When the persona was first created
    pub created_at: DateTime<Utc>,

    /// Number of subtasks this persona has executed
    pub uses: u64,

    /// Exponential-moving-average success score in [0, 1]
    pub score: f64,

    /// When the persona last executed a subtask
    pub last_used: Option<DateTime<Utc>>,
}

impl Persona {
    /// Wrap DNA in a fresh library record
    pub fn new(dna: AgentDna) -> Self {
        Self {
            id: format!("persona-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
            dna,
            created_at: Utc::now(),
            uses: 0,
            score: 0.5,
            last_used: None,
        }
    }
}

/// Weighted similarity between two DNA specifications, in [0, 1]
///
/// Element weights: role+seniority 0.35, domain 0.25, methodologies 0.20
/// (Jaccard), constraints 0.10 (keys only), output format 0.10 (keys
/// only). Identical DNA always scores 1.0.
pub fn similarity(a: &AgentDna, b: &AgentDna) -> f64 {
    let role = if a.role.eq_ignore_ascii_case(&b.role) {
        if a.seniority.eq_ignore_ascii_case(&b.seniority) {
            1.0
        } else {
            0.6
        }
    } else {
        0.0
    };

    let domain = if a.domain.eq_ignore_ascii_case(&b.domain) {
        1.0
    } else {
        word_jaccard(&a.domain, &b.domain)
    };

    let methodologies = set_jaccard(
        a.methodologies.iter().map(|m| m.to_lowercase()),
        b.methodologies.iter().map(|m| m.to_lowercase()),
    );

    let constraints = set_jaccard(
        a.constraints.keys().map(|k| k.to_lowercase()),
        b.constraints.keys().map(|k| k.to_lowercase()),
    );

    let output_format = set_jaccard(
        a.output_format.keys().map(|k| k.to_lowercase()),
        b.output_format.keys().map(|k| k.to_lowercase()),
    );

    0.35 * role + 0.25 * domain + 0.20 * methodologies + 0.10 * constraints + 0.10 * output_format
}

fn set_jaccard(
    a: impl Iterator<Item = String>,
    b: impl Iterator<Item = String>,
) -> f64 {
    let a: BTreeSet<String> = a.collect();
    let b: BTreeSet<String> = b.collect();

    if a.is_empty() && b.is_empty() {
        return 1.0;
    }

    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f64 / union as f64
}

fn word_jaccard(a: &str, b: &str) -> f64 {
    set_jaccard(
        a.split_whitespace().map(|w| w.to_lowercase()),
        b.split_whitespace().map(|w| w.to_lowercase()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dna(role: &str, domain: &str) -> AgentDna {
        AgentDna::baseline(role, "Senior", domain)
    }

    #[test]
    fn test_baseline_is_valid() {
        dna("Backend Developer", "development").validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_missing_elements() {
        let mut d = dna("QA Engineer", "testing");
        d.methodologies.clear();
        assert!(d.validate().is_err());

        let mut d = dna("QA Engineer", "testing");
        d.role = "  ".to_string();
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_identical_dna_similarity_is_one() {
        let a = dna("Backend Developer", "development");
        let b = a.clone();
        assert!((similarity(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_fingerprint_ignores_case() {
        let a = dna("Backend Developer", "development");
        let mut b = a.clone();
        b.role = "backend developer".to_string();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_different_roles_score_low() {
        let a = dna("Backend Developer", "development");
        let b = dna("Graphic Designer", "design");
        assert!(similarity(&a, &b) < 0.7);
    }

    #[test]
    fn test_same_role_different_seniority_scores_between() {
        let a = dna("Backend Developer", "development");
        let mut b = a.clone();
        b.seniority = "Junior".to_string();
        let s = similarity(&a, &b);
        assert!(s < 1.0);
        assert!(s > 0.7);
    }

    #[test]
    fn test_persona_defaults() {
        let p = Persona::new(dna("Data Analyst", "data"));
        assert!(p.id.starts_with("persona-"));
        assert_eq!(p.uses, 0);
        assert!((p.score - 0.5).abs() < f64::EPSILON);
        assert!(p.last_used.is_none());
    }
}
