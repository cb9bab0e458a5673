//! Dependency Mapper
//!
//! Builds the directed acyclic graph over a task's subtasks: prerequisite
//! edges from the decomposition chains plus explicit `requires <id>`
//! cross-references in descriptions. Refuses cyclic graphs and computes
//! topological layers, where each layer holds subtasks whose prerequisites
//! live in earlier layers.

use std::collections::{HashMap, HashSet, VecDeque};

use super::types::Subtask;
use crate::errors::{EngineError, Result};

/// Dependency graph over one task's subtasks
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Edges prerequisite → dependents
    pub dependents: HashMap<String, Vec<String>>,

    /// Edges subtask → prerequisites
    pub prerequisites: HashMap<String, Vec<String>>,

    /// Topological layers in increasing depth
    pub layers: Vec<Vec<String>>,
}

impl DependencyGraph {
    /// Direct dependents of a subtask
    pub fn dependents_of(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every subtask reachable from `id` through dependent edges
    pub fn transitive_dependents(&self, id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(id);

        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents_of(current) {
                if seen.insert(dependent.clone()) {
                    queue.push_back(dependent);
                }
            }
        }

        seen
    }
}

/// Builds and validates the subtask DAG
#[derive(Debug, Default, Clone)]
pub struct DependencyMapper;

impl DependencyMapper {
    pub fn new() -> Self {
        Self
    }

    /// Build the DAG for a set of subtasks
    ///
    /// # Errors
    ///
    /// `DecompositionError` when the input is empty, a prerequisite
    /// references an unknown or foreign subtask, or the graph contains a
    /// cycle.
    pub fn build(&self, subtasks: &[Subtask]) -> Result<DependencyGraph> {
        if subtasks.is_empty() {
            return Err(EngineError::Decomposition(
                "cannot map an empty subtask set".to_string(),
            ));
        }

        let ids: HashSet<&str> = subtasks.iter().map(|s| s.id.as_str()).collect();
        let parent = &subtasks[0].task_id;

        let mut prerequisites: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

        for subtask in subtasks {
            if subtask.task_id != *parent {
                return Err(EngineError::Decomposition(format!(
                    "subtask {} belongs to a different task",
                    subtask.id
                )));
            }

            let mut prereqs: Vec<String> = subtask.prerequisites.clone();

            // Explicit cross-references: "requires <subtask id>".
            for reference in description_references(&subtask.description) {
                if ids.contains(reference.as_str()) && reference != subtask.id {
                    prereqs.push(reference);
                }
            }

            prereqs.sort();
            prereqs.dedup();

            for prereq in &prereqs {
                if !ids.contains(prereq.as_str()) {
                    return Err(EngineError::Decomposition(format!(
                        "subtask {} requires unknown subtask {}",
                        subtask.id, prereq
                    )));
                }
                dependents
                    .entry(prereq.clone())
                    .or_default()
                    .push(subtask.id.clone());
            }

            prerequisites.insert(subtask.id.clone(), prereqs);
        }

        let layers = topological_layers(subtasks, &prerequisites, &dependents)?;

        Ok(DependencyGraph {
            dependents,
            prerequisites,
            layers,
        })
    }
}

/// Kahn's algorithm, grouping nodes by depth
///
/// Nodes whose in-degree drops to zero in round `k` form layer `k`. If
/// any node is never released the graph is cyclic.
fn topological_layers(
    subtasks: &[Subtask],
    prerequisites: &HashMap<String, Vec<String>>,
    dependents: &HashMap<String, Vec<String>>,
) -> Result<Vec<Vec<String>>> {
    let mut in_degree: HashMap<&str, usize> = subtasks
        .iter()
        .map(|s| {
            (
                s.id.as_str(),
                prerequisites.get(&s.id).map(Vec::len).unwrap_or(0),
            )
        })
        .collect();

    // Seed with in-degree zero nodes in input (execution) order.
    let mut current: Vec<String> = subtasks
        .iter()
        .filter(|s| in_degree[s.id.as_str()] == 0)
        .map(|s| s.id.clone())
        .collect();

    let mut layers = Vec::new();
    let mut released = 0usize;

    while !current.is_empty() {
        released += current.len();
        let mut next = Vec::new();

        for id in &current {
            for dependent in dependents.get(id).map(Vec::as_slice).unwrap_or(&[]) {
                let degree = in_degree
                    .get_mut(dependent.as_str())
                    .expect("dependent missing from in-degree map");
                *degree -= 1;
                if *degree == 0 {
                    next.push(dependent.clone());
                }
            }
        }

        // Keep layer membership deterministic regardless of edge order.
        next.sort();
        next.dedup();

        layers.push(std::mem::take(&mut current));
        current = next;
    }

    if released != subtasks.len() {
        return Err(EngineError::Decomposition(
            "circular dependency detected between subtasks".to_string(),
        ));
    }

    Ok(layers)
}

/// Scan a description for `requires <token>` references
fn description_references(description: &str) -> Vec<String> {
    let lower = description.to_lowercase();
    let mut references = Vec::new();
    let mut rest = lower.as_str();

    while let Some(pos) = rest.find("requires ") {
        rest = &rest[pos + "requires ".len()..];
        let token: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if !token.is_empty() {
            references.push(token);
        }
    }

    references
}
