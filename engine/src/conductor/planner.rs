//! Execution Planner
//!
//! Turns a dependency graph into a schedule: the topological layers
//! become stages of subtasks that may run concurrently, and the longest
//! weighted chain through the graph becomes the critical path. Each
//! subtask weighs 1 unless the delegation optimizer has a historical mean
//! duration for its domain, in which case that duration is used.
//!
//! The planner only emits the schedule; it never allocates resources.

use std::collections::HashMap;

use super::dependency::DependencyGraph;
use super::types::Plan;

/// Builds execution plans from dependency graphs
#[derive(Debug, Default, Clone)]
pub struct ExecutionPlanner;

impl ExecutionPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Create a plan from a dependency graph
    ///
    /// `weights` maps subtask ids to critical-path weights; ids without an
    /// entry weigh 1.0.
    pub fn plan(&self, graph: &DependencyGraph, weights: &HashMap<String, f64>) -> Plan {
        let stages = graph.layers.clone();
        let (critical_path, critical_path_length) = critical_path(graph, weights);
        let can_parallelize = stages.iter().any(|stage| stage.len() > 1);

        Plan {
            stages,
            critical_path,
            critical_path_length,
            can_parallelize,
        }
    }
}

/// Longest weighted path through the DAG
///
/// Dynamic programming over the layers (already topologically ordered):
/// the distance to a node is its own weight plus the best distance among
/// its prerequisites. Backtracking over predecessors recovers the path.
fn critical_path(graph: &DependencyGraph, weights: &HashMap<String, f64>) -> (Vec<String>, f64) {
    let weight = |id: &str| weights.get(id).copied().unwrap_or(1.0);

    let mut distance: HashMap<&str, f64> = HashMap::new();
    let mut predecessor: HashMap<&str, &str> = HashMap::new();

    for layer in &graph.layers {
        for id in layer {
            let mut best: Option<(&str, f64)> = None;
            for prereq in graph.prerequisites.get(id).map(Vec::as_slice).unwrap_or(&[]) {
                let d = distance.get(prereq.as_str()).copied().unwrap_or(0.0);
                if best.map_or(true, |(_, current)| d > current) {
                    best = Some((prereq.as_str(), d));
                }
            }

            let base = best.map(|(_, d)| d).unwrap_or(0.0);
            distance.insert(id.as_str(), base + weight(id));
            if let Some((prereq, _)) = best {
                predecessor.insert(id.as_str(), prereq);
            }
        }
    }

    let Some((end, total)) = distance
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(id, d)| (*id, *d))
    else {
        return (Vec::new(), 0.0);
    };

    let mut path = vec![end.to_string()];
    let mut current = end;
    while let Some(prev) = predecessor.get(current) {
        path.push(prev.to_string());
        current = *prev;
    }
    path.reverse();

    (path, total)
}
