//! Task Analyzer
//!
//! Classifies a task string as simple, medium or complex and tags its
//! domains from the closed vocabulary. The analyzer is pure and
//! deterministic: the same input always yields the same analysis.
//!
//! Complexity scoring combines the token length of the text, conjunctions
//! that join verb phrases, occurrences of known action verbs, and explicit
//! multiplicity markers ("and then", numbered lists). Score ≤ 2 is
//! simple, 3–5 medium, ≥ 6 complex.

use std::collections::BTreeMap;

use super::types::{Analysis, Complexity, Domain};

/// Published action verbs; each occurrence adds one point
const ACTION_VERBS: &[&str] = &[
    "build",
    "deploy",
    "integrate",
    "refactor",
    "migrate",
    "design",
    "implement",
    "create",
    "develop",
    "configure",
    "provision",
    "test",
    "analyze",
    "document",
];

/// Keyword classifier for the closed domain vocabulary
const DOMAIN_KEYWORDS: &[(Domain, &[&str])] = &[
    (
        Domain::Development,
        &[
            "code", "develop", "build", "implement", "api", "rest", "function", "library",
            "backend", "frontend", "refactor", "endpoint",
        ],
    ),
    (
        Domain::Devops,
        &[
            "deploy", "infrastructure", "cloud", "docker", "kubernetes", "aws", "pipeline",
            "provision", "terraform", "monitoring",
        ],
    ),
    (
        Domain::Data,
        &[
            "data", "analyze", "dashboard", "report", "statistics", "visualization", "dataset",
            "query",
        ],
    ),
    (
        Domain::Research,
        &["research", "investigate", "study", "evaluate", "compare", "survey"],
    ),
    (
        Domain::Design,
        &["design", "ui", "ux", "mockup", "prototype", "interface", "wireframe"],
    ),
    (
        Domain::Testing,
        &["test", "qa", "testing", "validation", "verify", "coverage", "regression"],
    ),
    (
        Domain::Security,
        &["security", "audit", "vulnerability", "encrypt", "harden", "pentest"],
    ),
];

/// Pure, deterministic task classifier
#[derive(Debug, Default, Clone)]
pub struct TaskAnalyzer;

impl TaskAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze a task string and optional context
    ///
    /// Context currently only sharpens domain tagging: a `domain` context
    /// key naming a vocabulary entry is honoured as the dominant domain.
    pub fn analyze(&self, text: &str, context: &BTreeMap<String, String>) -> Analysis {
        let tokens = tokenize(text);
        let score = self.score(text, &tokens);

        let complexity = match score {
            0..=2 => Complexity::Simple,
            3..=5 => Complexity::Medium,
            _ => Complexity::Complex,
        };

        let mut domains = self.classify_domains(&tokens);
        if let Some(hint) = context.get("domain") {
            let hinted = Domain::parse(hint);
            if hinted != Domain::Other {
                domains.retain(|d| *d != hinted);
                domains.insert(0, hinted);
            }
        }

        Analysis {
            complexity,
            domains,
            requires_decomposition: complexity != Complexity::Simple,
            score,
        }
    }

    /// Complexity score for a task string
    fn score(&self, text: &str, tokens: &[String]) -> u32 {
        let length_points = (tokens.len() / 3) as u32;

        let verb_points = ACTION_VERBS
            .iter()
            .filter(|v| tokens.iter().any(|t| t == *v))
            .count() as u32;

        let conjunction_points = conjunctions_joining_verbs(tokens);
        let multiplicity_points = multiplicity_markers(text, tokens);

        length_points + verb_points + conjunction_points + multiplicity_points
    }

    /// Domains ordered by keyword hit count, strongest first
    ///
    /// An empty classification resolves to `other`. Ordering is
    /// deterministic: equal scores fall back to vocabulary order.
    fn classify_domains(&self, tokens: &[String]) -> Vec<Domain> {
        let mut scored: Vec<(Domain, usize)> = DOMAIN_KEYWORDS
            .iter()
            .map(|(domain, keywords)| {
                let hits = keywords
                    .iter()
                    .filter(|k| tokens.iter().any(|t| t == *k))
                    .count();
                (*domain, hits)
            })
            .filter(|(_, hits)| *hits > 0)
            .collect();

        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        if scored.is_empty() {
            vec![Domain::Other]
        } else {
            scored.into_iter().map(|(d, _)| d).collect()
        }
    }
}

/// Lowercase word tokens, punctuation stripped
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '/' && c != '-')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Count "and"/"or" conjunctions directly followed by an action verb
fn conjunctions_joining_verbs(tokens: &[String]) -> u32 {
    tokens
        .windows(2)
        .filter(|w| {
            (w[0] == "and" || w[0] == "or") && ACTION_VERBS.contains(&w[1].as_str())
        })
        .count() as u32
}

/// Count explicit multiplicity markers: "and then" plus numbered items
fn multiplicity_markers(text: &str, tokens: &[String]) -> u32 {
    let and_then = tokens.windows(2).filter(|w| w[0] == "and" && w[1] == "then").count() as u32;

    let numbered = text
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
            !digits.is_empty()
                && trimmed[digits.len()..].starts_with(['.', ')'])
        })
        .count() as u32;

    and_then + numbered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(text: &str) -> Analysis {
        TaskAnalyzer::new().analyze(text, &BTreeMap::new())
    }

    #[test]
    fn test_trivial_task_is_simple() {
        let analysis = analyze("say hi");
        assert_eq!(analysis.complexity, Complexity::Simple);
        assert!(!analysis.requires_decomposition);
        assert_eq!(analysis.domains, vec![Domain::Other]);
    }

    #[test]
    fn test_build_and_deploy_is_complex() {
        let analysis = analyze("Build a REST API with authentication and deploy it to AWS");
        assert_eq!(analysis.complexity, Complexity::Complex);
        assert!(analysis.requires_decomposition);
        assert!(analysis.domains.contains(&Domain::Development));
        assert!(analysis.domains.contains(&Domain::Devops));
        assert_eq!(analysis.dominant_domain(), Domain::Development);
    }

    #[test]
    fn test_sequence_markers_are_complex() {
        let analysis = analyze("A and then B and then C and then D and then E");
        assert_eq!(analysis.complexity, Complexity::Complex);
        assert!(analysis.score >= 6);
    }

    #[test]
    fn test_single_verb_is_medium() {
        // One action verb plus a handful of tokens lands in the medium band.
        let analysis = analyze("implement a login form for the site");
        assert_eq!(analysis.complexity, Complexity::Medium);
    }

    #[test]
    fn test_numbered_list_counts_as_multiplicity() {
        let text = "Prepare the release:\n1. update the changelog\n2. tag the build\n3. publish";
        let analysis = analyze(text);
        assert!(analysis.score >= 3);
    }

    #[test]
    fn test_deterministic() {
        let text = "Build a dashboard and analyze the data";
        let a = analyze(text);
        let b = analyze(text);
        assert_eq!(a.score, b.score);
        assert_eq!(a.domains, b.domains);
    }

    #[test]
    fn test_context_domain_hint_takes_priority() {
        let mut context = BTreeMap::new();
        context.insert("domain".to_string(), "security".to_string());

        let analysis = TaskAnalyzer::new().analyze("review the module", &context);
        assert_eq!(analysis.dominant_domain(), Domain::Security);
    }

    #[test]
    fn test_empty_text() {
        let analysis = analyze("");
        assert_eq!(analysis.complexity, Complexity::Simple);
        assert_eq!(analysis.domains, vec![Domain::Other]);
    }
}
