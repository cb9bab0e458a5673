//! Result Aggregator
//!
//! Collects per-subtask outputs and composes the final artifact. Output
//! ordering always follows the plan, never completion time. Three
//! formats: `summary` (headed concatenation), `detailed` (full per-subtask
//! blocks, the default), and `json` (structured envelope).

use serde_json::json;

use super::types::{AggregateFormat, Plan, SubtaskResult, SubtaskState};

/// Composes final artifacts from subtask results
#[derive(Debug, Default, Clone)]
pub struct ResultAggregator;

impl ResultAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Aggregate results into the requested format
    ///
    /// `results` must already be in plan order; the orchestrator builds
    /// them that way from the tracker snapshot.
    pub fn aggregate(&self, plan: &Plan, results: &[SubtaskResult], format: AggregateFormat) -> String {
        match format {
            AggregateFormat::Summary => self.summary(results),
            AggregateFormat::Detailed => self.detailed(results),
            AggregateFormat::Json => self.json(plan, results),
        }
    }

    fn summary(&self, results: &[SubtaskResult]) -> String {
        let mut out = String::new();

        for result in results {
            out.push_str(&format!("## {}\n\n", result.description));
            match (&result.output, &result.failure) {
                (Some(output), _) => out.push_str(output.trim()),
                (None, Some(failure)) => out.push_str(&format!("(failed: {})", failure)),
                (None, None) => out.push_str("(no output)"),
            }
            out.push_str("\n\n");
        }

        out.push_str(&self.skipped_note(results));
        out.trim_end().to_string()
    }

    fn detailed(&self, results: &[SubtaskResult]) -> String {
        let mut out = String::new();

        for (i, result) in results.iter().enumerate() {
            out.push_str(&format!(
                "### Subtask {} ({}) [{} / {}]\n",
                i + 1,
                result.subtask_id,
                result.domain,
                result.state,
            ));
            out.push_str(&format!("Task: {}\n", result.description));
            if let Some(agent) = &result.agent_id {
                out.push_str(&format!("Agent: {}\n", agent));
            }
            if let Some(ms) = result.duration_ms {
                out.push_str(&format!("Duration: {} ms\n", ms));
            }
            out.push('\n');
            match (&result.output, &result.failure) {
                (Some(output), _) => out.push_str(output.trim()),
                (None, Some(failure)) => out.push_str(&format!("Failed: {}", failure)),
                (None, None) => out.push_str("(no output)"),
            }
            out.push_str("\n\n");
        }

        out.push_str(&self.skipped_note(results));
        out.trim_end().to_string()
    }

    fn json(&self, plan: &Plan, results: &[SubtaskResult]) -> String {
        let completed = results
            .iter()
            .filter(|r| r.state == SubtaskState::Completed)
            .count();
        let failed = results.len() - completed;

        let envelope = json!({
            "plan": {
                "stages": plan.stages,
                "critical_path": plan.critical_path,
                "critical_path_length": plan.critical_path_length,
                "can_parallelize": plan.can_parallelize,
            },
            "subtasks": results,
            "aggregate": {
                "total": results.len(),
                "completed": completed,
                "failed": failed,
                "skipped": self.skipped_ids(results),
            },
        });

        serde_json::to_string_pretty(&envelope).unwrap_or_else(|_| "{}".to_string())
    }

    /// Ids of subtasks skipped because an upstream prerequisite failed
    fn skipped_ids(&self, results: &[SubtaskResult]) -> Vec<String> {
        results
            .iter()
            .filter(|r| {
                r.state == SubtaskState::Failed
                    && r.failure.as_deref().is_some_and(|f| f.contains("upstream"))
            })
            .map(|r| r.subtask_id.clone())
            .collect()
    }

    /// Text note summarising what was skipped, empty when nothing was
    fn skipped_note(&self, results: &[SubtaskResult]) -> String {
        let skipped = self.skipped_ids(results);
        if skipped.is_empty() {
            String::new()
        } else {
            format!(
                "Skipped due to upstream failures: {}\n",
                skipped.join(", ")
            )
        }
    }
}
