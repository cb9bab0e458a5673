//! Task Tracker
//!
//! Owns every subtask-state mutation in the engine. Other components
//! observe progress through the message bus; nothing else may flip a
//! state. Transitions are checked against the lifecycle machine and each
//! subtask carries its own lock, so transitions are totally ordered per
//! id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use serde::Serialize;

use super::types::{Plan, Subtask, SubtaskState};
use crate::errors::{EngineError, Result};

/// Per-task snapshot for the progress endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub task_id: String,
    pub total: usize,
    pub pending: usize,
    pub assigned: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,

    /// (completed + failed) / total
    pub overall_progress: f64,
}

struct TrackedTask {
    plan: Plan,
    /// Subtasks by id, each behind its own lock
    subtasks: HashMap<String, Arc<Mutex<Subtask>>>,
    /// Plan-order ids for deterministic snapshots
    order: Vec<String>,
}

/// Tracks per-task lifecycle state, progress and timings
#[derive(Default)]
pub struct TaskTracker {
    tasks: RwLock<HashMap<String, TrackedTask>>,
    /// Reverse index subtask id → task id
    owners: RwLock<HashMap<String, String>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task with its subtasks and plan
    ///
    /// Subtask ids must be globally unique; re-registering a task id
    /// replaces nothing and fails.
    pub fn create(&self, task_id: &str, subtasks: &[Subtask], plan: Plan) -> Result<()> {
        let mut tasks = self.tasks.write().expect("tracker poisoned");
        if tasks.contains_key(task_id) {
            return Err(EngineError::State(format!(
                "task {} is already tracked",
                task_id
            )));
        }

        let mut owners = self.owners.write().expect("tracker owners poisoned");
        let mut map = HashMap::new();
        let mut order = Vec::new();

        for id in plan.ordered_ids() {
            let subtask = subtasks
                .iter()
                .find(|s| &s.id == id)
                .ok_or_else(|| EngineError::State(format!("plan references unknown subtask {}", id)))?;
            map.insert(id.clone(), Arc::new(Mutex::new(subtask.clone())));
            owners.insert(id.clone(), task_id.to_string());
            order.push(id.clone());
        }

        tasks.insert(
            task_id.to_string(),
            TrackedTask {
                plan,
                subtasks: map,
                order,
            },
        );

        Ok(())
    }

    /// pending → assigned
    pub fn assign(&self, subtask_id: &str, agent_id: &str) -> Result<()> {
        self.transition(subtask_id, SubtaskState::Assigned, |subtask| {
            subtask.agent_id = Some(agent_id.to_string());
        })
    }

    /// assigned → in_progress
    pub fn start(&self, subtask_id: &str) -> Result<()> {
        self.transition(subtask_id, SubtaskState::InProgress, |subtask| {
            subtask.started_at = Some(Utc::now());
        })
    }

    /// in_progress → completed
    pub fn complete(&self, subtask_id: &str, output: &str) -> Result<()> {
        self.transition(subtask_id, SubtaskState::Completed, |subtask| {
            subtask.output = Some(output.to_string());
            subtask.completed_at = Some(Utc::now());
        })
    }

    /// (pending | assigned | in_progress) → failed
    pub fn fail(&self, subtask_id: &str, reason: &str) -> Result<()> {
        self.transition(subtask_id, SubtaskState::Failed, |subtask| {
            subtask.failure = Some(reason.to_string());
            subtask.completed_at = Some(Utc::now());
        })
    }

    fn transition(
        &self,
        subtask_id: &str,
        next: SubtaskState,
        apply: impl FnOnce(&mut Subtask),
    ) -> Result<()> {
        let handle = self.subtask_handle(subtask_id)?;
        let mut subtask = handle.lock().expect("subtask lock poisoned");

        if !subtask.state.can_transition(next) {
            return Err(EngineError::State(format!(
                "subtask {}: {} -> {} is illegal",
                subtask_id, subtask.state, next
            )));
        }

        subtask.state = next;
        apply(&mut subtask);

        tracing::debug!(subtask = %subtask_id, state = %next, "subtask transition");
        Ok(())
    }

    fn subtask_handle(&self, subtask_id: &str) -> Result<Arc<Mutex<Subtask>>> {
        let owners = self.owners.read().expect("tracker owners poisoned");
        let task_id = owners
            .get(subtask_id)
            .ok_or_else(|| EngineError::State(format!("unknown subtask {}", subtask_id)))?;

        let tasks = self.tasks.read().expect("tracker poisoned");
        Ok(tasks
            .get(task_id)
            .and_then(|t| t.subtasks.get(subtask_id))
            .ok_or_else(|| EngineError::State(format!("unknown subtask {}", subtask_id)))?
            .clone())
    }

    /// Snapshot one subtask
    pub fn get_subtask(&self, subtask_id: &str) -> Option<Subtask> {
        let handle = self.subtask_handle(subtask_id).ok()?;
        let subtask = handle.lock().expect("subtask lock poisoned");
        Some(subtask.clone())
    }

    /// Snapshot all of a task's subtasks in plan order
    pub fn get(&self, task_id: &str) -> Option<Vec<Subtask>> {
        let tasks = self.tasks.read().expect("tracker poisoned");
        let tracked = tasks.get(task_id)?;

        Some(
            tracked
                .order
                .iter()
                .filter_map(|id| tracked.subtasks.get(id))
                .map(|handle| handle.lock().expect("subtask lock poisoned").clone())
                .collect(),
        )
    }

    /// The plan registered for a task
    pub fn plan(&self, task_id: &str) -> Option<Plan> {
        let tasks = self.tasks.read().expect("tracker poisoned");
        tasks.get(task_id).map(|t| t.plan.clone())
    }

    /// Overall progress of a task: (completed + failed) / total
    pub fn overall_progress(&self, task_id: &str) -> Option<f64> {
        let subtasks = self.get(task_id)?;
        if subtasks.is_empty() {
            return Some(0.0);
        }

        let done = subtasks
            .iter()
            .filter(|s| s.state.is_terminal())
            .count();
        Some(done as f64 / subtasks.len() as f64)
    }

    /// All subtasks currently in `state`, across tasks
    pub fn list_by_state(&self, state: SubtaskState) -> Vec<Subtask> {
        let tasks = self.tasks.read().expect("tracker poisoned");
        let mut matching = Vec::new();

        for tracked in tasks.values() {
            for id in &tracked.order {
                if let Some(handle) = tracked.subtasks.get(id) {
                    let subtask = handle.lock().expect("subtask lock poisoned");
                    if subtask.state == state {
                        matching.push(subtask.clone());
                    }
                }
            }
        }

        matching
    }

    /// Progress snapshot for the HTTP surface
    pub fn snapshot(&self, task_id: &str) -> Option<ProgressSnapshot> {
        let subtasks = self.get(task_id)?;
        let count = |state: SubtaskState| subtasks.iter().filter(|s| s.state == state).count();

        let total = subtasks.len();
        let completed = count(SubtaskState::Completed);
        let failed = count(SubtaskState::Failed);

        Some(ProgressSnapshot {
            task_id: task_id.to_string(),
            total,
            pending: count(SubtaskState::Pending),
            assigned: count(SubtaskState::Assigned),
            in_progress: count(SubtaskState::InProgress),
            completed,
            failed,
            overall_progress: if total == 0 {
                0.0
            } else {
                (completed + failed) as f64 / total as f64
            },
        })
    }

    /// Ids of the most recently registered tasks
    pub fn task_ids(&self) -> Vec<String> {
        self.tasks
            .read()
            .expect("tracker poisoned")
            .keys()
            .cloned()
            .collect()
    }
}
