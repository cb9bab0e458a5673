//! Conductor data model
//!
//! Core types flowing through the decomposition-dispatch-aggregation
//! pipeline: tasks, subtasks and their lifecycle states, execution plans,
//! and the persisted workflow record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{EngineError, Result};

/// Complexity class of a submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Complexity::Simple => write!(f, "simple"),
            Complexity::Medium => write!(f, "medium"),
            Complexity::Complex => write!(f, "complex"),
        }
    }
}

/// Closed domain vocabulary for task tagging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Development,
    Devops,
    Data,
    Research,
    Design,
    Testing,
    Security,
    Other,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Development => "development",
            Domain::Devops => "devops",
            Domain::Data => "data",
            Domain::Research => "research",
            Domain::Design => "design",
            Domain::Testing => "testing",
            Domain::Security => "security",
            Domain::Other => "other",
        }
    }

    /// Parse a vocabulary string; anything unknown resolves to `Other`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "development" => Domain::Development,
            "devops" => Domain::Devops,
            "data" => Domain::Data,
            "research" => Domain::Research,
            "design" => Domain::Design,
            "testing" => Domain::Testing,
            "security" => Domain::Security,
            _ => Domain::Other,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of analyzing a task string
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub complexity: Complexity,

    /// Domains ordered by relevance (strongest first)
    pub domains: Vec<Domain>,

    pub requires_decomposition: bool,

    /// The raw complexity score behind the classification
    pub score: u32,
}

impl Analysis {
    /// The dominant domain (strongest classification)
    pub fn dominant_domain(&self) -> Domain {
        self.domains.first().copied().unwrap_or(Domain::Other)
    }
}

/// A unit of work submitted by the caller. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Opaque unique id
    pub id: String,

    /// Original task text
    pub text: String,

    /// Optional structured context supplied by the caller
    #[serde(default)]
    pub context: BTreeMap<String, String>,

    pub complexity: Complexity,

    pub domains: Vec<Domain>,

    pub submitted_at: DateTime<Utc>,
}

/// Lifecycle state of a subtask
///
/// The machine is `pending → assigned → in_progress → (completed |
/// failed)`. A pending or assigned subtask may fail directly when an
/// upstream prerequisite failed or dispatch itself broke; `failed` is
/// terminal; retry is modelled as a new subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskState {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
}

impl SubtaskState {
    /// Whether a transition to `next` is legal
    pub fn can_transition(self, next: SubtaskState) -> bool {
        use SubtaskState::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Pending, Failed)
                | (Assigned, InProgress)
                | (Assigned, Failed)
                | (InProgress, Completed)
                | (InProgress, Failed)
        )
    }

    /// Terminal states never transition again
    pub fn is_terminal(self) -> bool {
        matches!(self, SubtaskState::Completed | SubtaskState::Failed)
    }
}

impl fmt::Display for SubtaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubtaskState::Pending => "pending",
            SubtaskState::Assigned => "assigned",
            SubtaskState::InProgress => "in_progress",
            SubtaskState::Completed => "completed",
            SubtaskState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A leaf unit produced by decomposition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,

    /// Parent task id
    pub task_id: String,

    pub description: String,

    pub domain: Domain,

    /// Ids of subtasks that must complete first (same parent task)
    #[serde(default)]
    pub prerequisites: Vec<String>,

    /// Persona recommended by the delegation optimizer, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_persona_id: Option<String>,

    pub state: SubtaskState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Subtask {
    /// Create a pending subtask
    pub fn new(
        id: impl Into<String>,
        task_id: impl Into<String>,
        description: impl Into<String>,
        domain: Domain,
    ) -> Self {
        Self {
            id: id.into(),
            task_id: task_id.into(),
            description: description.into(),
            domain,
            prerequisites: Vec::new(),
            suggested_persona_id: None,
            state: SubtaskState::Pending,
            agent_id: None,
            output: None,
            failure: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Chain this subtask after a prerequisite
    pub fn after(mut self, prerequisite: impl Into<String>) -> Self {
        self.prerequisites.push(prerequisite.into());
        self
    }
}

/// Output of the execution planner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Stages in execution order; subtasks within a stage may run
    /// concurrently
    pub stages: Vec<Vec<String>>,

    /// Subtask ids on the critical path, in order
    pub critical_path: Vec<String>,

    /// Total weight of the critical path
    pub critical_path_length: f64,

    pub can_parallelize: bool,
}

impl Plan {
    /// Subtask ids in plan order (stage by stage)
    pub fn ordered_ids(&self) -> impl Iterator<Item = &String> {
        self.stages.iter().flatten()
    }

    pub fn total_subtasks(&self) -> usize {
        self.stages.iter().map(|s| s.len()).sum()
    }
}

/// Terminal status of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Every subtask completed
    Ok,

    /// At least one subtask failed; siblings completed normally
    Partial,

    /// Cancelled by the caller or by the workflow deadline
    Cancelled,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Ok => write!(f, "ok"),
            WorkflowStatus::Partial => write!(f, "partial"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-subtask entry in a workflow record, in plan order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskResult {
    pub subtask_id: String,
    pub description: String,
    pub domain: Domain,
    pub state: SubtaskState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,

    /// Outcome evaluator score in [0, 1]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

/// The persisted outcome of one top-level task. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub task_id: String,

    pub task_text: String,

    pub status: WorkflowStatus,

    pub plan: Plan,

    /// Subtask results in plan order
    pub results: Vec<SubtaskResult>,

    /// Aggregated final artifact
    pub final_output: String,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,

    pub duration_ms: i64,
}

/// Output format for the result aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFormat {
    Summary,

    #[default]
    Detailed,

    Json,
}

impl AggregateFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "summary" => Ok(AggregateFormat::Summary),
            "detailed" => Ok(AggregateFormat::Detailed),
            "json" => Ok(AggregateFormat::Json),
            other => Err(EngineError::Validation(format!(
                "unknown aggregate format: {}",
                other
            ))),
        }
    }
}
