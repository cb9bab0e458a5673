//! Outcome Evaluator
//!
//! Scores each finished subtask on three axes in [0, 1]: quality (does
//! the output conform to the requested output format?), completeness
//! (does it address the elements of the subtask description?), and
//! success (did the subtask complete rather than fail?). The overall
//! score is the weighted mean 0.4 / 0.3 / 0.3 and feeds the delegation
//! optimizer.

use std::collections::BTreeMap;

use serde::Serialize;

use super::types::{SubtaskResult, SubtaskState};

/// Per-subtask evaluation
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Evaluation {
    pub quality: f64,
    pub completeness: f64,
    pub success: f64,
    pub overall: f64,
}

/// Heuristic outcome scorer
#[derive(Debug, Default, Clone)]
pub struct OutcomeEvaluator;

impl OutcomeEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a terminal subtask result
    ///
    /// `output_format` is the persona's requested deliverable shape; a
    /// keyword rubric over its keys stands in for semantic review.
    pub fn evaluate(
        &self,
        result: &SubtaskResult,
        output_format: &BTreeMap<String, String>,
    ) -> Evaluation {
        let success = if result.state == SubtaskState::Completed {
            1.0
        } else {
            0.0
        };

        let output = result.output.as_deref().unwrap_or("");
        let quality = self.quality(output, output_format);
        let completeness = self.completeness(output, &result.description);

        let overall = 0.4 * quality + 0.3 * completeness + 0.3 * success;

        Evaluation {
            quality,
            completeness,
            success,
            overall: overall.clamp(0.0, 1.0),
        }
    }

    /// Conformance to the requested output format
    ///
    /// Base credit for any non-empty output, the rest proportional to how
    /// many requested sections the output mentions.
    fn quality(&self, output: &str, output_format: &BTreeMap<String, String>) -> f64 {
        if output.trim().is_empty() {
            return 0.0;
        }

        if output_format.is_empty() {
            return 0.8;
        }

        let lower = output.to_lowercase();
        let mentioned = output_format
            .keys()
            .filter(|key| lower.contains(&key.to_lowercase()))
            .count();

        0.5 + 0.5 * (mentioned as f64 / output_format.len() as f64)
    }

    /// Keyword coverage of the subtask description
    fn completeness(&self, output: &str, description: &str) -> f64 {
        if output.trim().is_empty() {
            return 0.0;
        }

        let lower = output.to_lowercase();
        let keywords: Vec<String> = description
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 3)
            .map(|w| w.to_lowercase())
            .collect();

        if keywords.is_empty() {
            return 0.7;
        }

        let covered = keywords.iter().filter(|k| lower.contains(k.as_str())).count();
        // Half credit for producing anything, half for coverage.
        0.5 + 0.5 * (covered as f64 / keywords.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::types::Domain;

    fn result(state: SubtaskState, output: Option<&str>, description: &str) -> SubtaskResult {
        SubtaskResult {
            subtask_id: "s1".to_string(),
            description: description.to_string(),
            domain: Domain::Development,
            state,
            persona_id: None,
            agent_id: None,
            output: output.map(String::from),
            failure: None,
            score: None,
            duration_ms: None,
        }
    }

    fn format(keys: &[&str]) -> BTreeMap<String, String> {
        keys.iter()
            .map(|k| (k.to_string(), "required".to_string()))
            .collect()
    }

    #[test]
    fn test_failed_subtask_scores_zero_success() {
        let eval = OutcomeEvaluator::new().evaluate(
            &result(SubtaskState::Failed, None, "implement the parser"),
            &format(&["code"]),
        );

        assert_eq!(eval.success, 0.0);
        assert_eq!(eval.quality, 0.0);
        assert_eq!(eval.overall, 0.0);
    }

    #[test]
    fn test_conforming_output_scores_high() {
        let output = "code:\nfn parser() {}\n\nnotes:\nimplement complete, parser covered";
        let eval = OutcomeEvaluator::new().evaluate(
            &result(SubtaskState::Completed, Some(output), "implement the parser"),
            &format(&["code", "notes"]),
        );

        assert_eq!(eval.success, 1.0);
        assert!(eval.quality >= 0.9);
        assert!(eval.completeness > 0.9);
        assert!(eval.overall > 0.9);
    }

    #[test]
    fn test_partial_format_conformance() {
        let output = "code:\nfn thing() {}";
        let eval = OutcomeEvaluator::new().evaluate(
            &result(SubtaskState::Completed, Some(output), "write the thing"),
            &format(&["code", "notes", "tests"]),
        );

        assert!(eval.quality > 0.5);
        assert!(eval.quality < 0.9);
    }

    #[test]
    fn test_overall_uses_spec_weights() {
        let eval = Evaluation {
            quality: 1.0,
            completeness: 0.0,
            success: 1.0,
            overall: 0.0,
        };
        // recompute what the evaluator would produce for these axes
        let overall = 0.4 * eval.quality + 0.3 * eval.completeness + 0.3 * eval.success;
        assert!((overall - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_empty_format_still_rewards_output() {
        let eval = OutcomeEvaluator::new().evaluate(
            &result(SubtaskState::Completed, Some("hello there, world"), "say hi"),
            &BTreeMap::new(),
        );

        assert!((eval.quality - 0.8).abs() < 1e-9);
        assert!(eval.overall > 0.5);
    }
}
