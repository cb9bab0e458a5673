//! Orchestrator
//!
//! The central state machine of the engine. `execute` drives a submitted
//! task through analysis, decomposition, dependency mapping and planning,
//! dispatches each stage's subtasks concurrently onto agents, collects
//! and aggregates their outputs, and closes the feedback loop through the
//! outcome evaluator and delegation optimizer.
//!
//! Domain failures never escape as errors: a workflow with failed
//! subtasks returns a `partial` record, cancellation and deadline overrun
//! return a `cancelled` record. Only pre-dispatch failures (validation,
//! decomposition) propagate to the caller.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::aggregator::ResultAggregator;
use super::analyzer::TaskAnalyzer;
use super::decomposer::TaskDecomposer;
use super::dependency::{DependencyGraph, DependencyMapper};
use super::evaluator::OutcomeEvaluator;
use super::optimizer::DelegationOptimizer;
use super::planner::ExecutionPlanner;
use super::tracker::TaskTracker;
use super::types::{
    AggregateFormat, Analysis, Complexity, Domain, Plan, Subtask, SubtaskResult, SubtaskState,
    Task, WorkflowRecord, WorkflowStatus,
};
use crate::agent::Agent;
use crate::config::Config;
use crate::errors::{EngineError, Result};
use crate::inference::{GenerationOptions, InferenceClient, Message, TaskClass};
use crate::memory::{SessionStore, WorkflowMemory};
use crate::message_bus::{Event, MessageBus};
use crate::persona::{AgentDna, Persona, PersonaStore};

/// Shared collaborators threaded through the orchestrator
///
/// There are no global singletons: tests construct an `Environment` with
/// fake collaborators and hand it to the orchestrator.
pub struct Environment {
    pub config: Arc<Config>,
    pub client: Arc<dyn InferenceClient>,
    pub personas: Arc<PersonaStore>,
    pub bus: Arc<MessageBus>,
    pub tracker: Arc<TaskTracker>,
    pub sessions: Arc<SessionStore>,
    pub workflows: Arc<WorkflowMemory>,
    pub optimizer: Arc<DelegationOptimizer>,
}

impl Environment {
    /// Build a production environment from configuration
    ///
    /// Stores live under the configured data directory: the persona
    /// library at `personas.yaml`, workflow memory under `memory/`, and
    /// conversation mirrors under `conversations/`.
    pub fn from_config(config: Config, client: Arc<dyn InferenceClient>) -> Result<Self> {
        let data_dir = config.core.data_dir.clone();

        let personas = Arc::new(PersonaStore::open(data_dir.join("personas.yaml"))?);
        let workflows = Arc::new(WorkflowMemory::open(
            data_dir.join("memory"),
            config.memory.long_term_max_records,
        )?);
        let sessions = Arc::new(SessionStore::new(
            config.memory.short_term_window,
            Some(data_dir.join("conversations")),
        ));

        Ok(Self {
            config: Arc::new(config),
            client,
            personas,
            bus: Arc::new(MessageBus::new()),
            tracker: Arc::new(TaskTracker::new()),
            sessions,
            workflows,
            optimizer: Arc::new(DelegationOptimizer::new()),
        })
    }
}

/// Per-call execution options
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Aggregation format for the final artifact
    pub format: AggregateFormat,

    /// Skip decomposition and run the task as a single subtask
    pub force_simple: bool,

    /// Session whose short-term memory feeds the agent prompts
    pub session_id: Option<String>,
}

/// Per-subtask bookkeeping accumulated during dispatch
#[derive(Debug, Clone, Default)]
struct SubtaskMeta {
    persona_id: Option<String>,
    score: Option<f64>,
}

enum StageOutcome {
    Finished,
    Cancelled,
    TimedOut,
}

/// Drives the decomposition-dispatch-aggregation pipeline
pub struct Orchestrator {
    env: Environment,
    analyzer: TaskAnalyzer,
    decomposer: TaskDecomposer,
    mapper: DependencyMapper,
    planner: ExecutionPlanner,
    aggregator: ResultAggregator,
    evaluator: OutcomeEvaluator,
    pool: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(env: Environment) -> Self {
        let decomposer = TaskDecomposer::new(env.client.clone(), env.optimizer.clone());
        let pool = Arc::new(Semaphore::new(env.config.orchestrator.max_workers));

        Self {
            decomposer,
            pool,
            analyzer: TaskAnalyzer::new(),
            mapper: DependencyMapper::new(),
            planner: ExecutionPlanner::new(),
            aggregator: ResultAggregator::new(),
            evaluator: OutcomeEvaluator::new(),
            env,
        }
    }

    /// The environment this orchestrator runs against
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Execute a task end-to-end and return its workflow record
    ///
    /// Idempotent per task id: when the caller supplies a `task_id`
    /// context key that already has a terminal record, that record comes
    /// back unchanged and nothing re-runs.
    ///
    /// # Errors
    ///
    /// `DecompositionError` for cyclic or empty decompositions; the
    /// workflow fails before dispatch. Everything after dispatch is
    /// reported inside the returned record, never as an error.
    pub async fn execute(
        &self,
        text: &str,
        context: BTreeMap<String, String>,
        options: ExecuteOptions,
        cancel: CancellationToken,
    ) -> Result<WorkflowRecord> {
        let task_id = context
            .get("task_id")
            .cloned()
            .unwrap_or_else(|| format!("task-{}", uuid::Uuid::new_v4()));

        if let Some(existing) = self.env.workflows.find_by_task_id(&task_id) {
            tracing::info!(task_id = %task_id, "returning existing workflow record");
            return Ok(existing);
        }

        let mut analysis = self.analyzer.analyze(text, &context);
        if options.force_simple {
            analysis = Analysis {
                complexity: Complexity::Simple,
                requires_decomposition: false,
                ..analysis
            };
        }

        let task = Task {
            id: task_id.clone(),
            text: text.to_string(),
            context,
            complexity: analysis.complexity,
            domains: analysis.domains.clone(),
            submitted_at: Utc::now(),
        };

        tracing::info!(
            task_id = %task.id,
            complexity = %analysis.complexity,
            domains = ?analysis.domains,
            "task accepted"
        );

        self.env.bus.publish(Event::TaskStarted {
            task_id: task.id.clone(),
            text: task.text.clone(),
            timestamp: Utc::now(),
        });

        let started_at = Utc::now();

        let subtasks = self.decomposer.decompose(&task, &analysis).await?;
        let graph = self.mapper.build(&subtasks)?;
        let plan = self.planner.plan(&graph, &self.duration_weights(&subtasks));

        self.env.tracker.create(&task.id, &subtasks, plan.clone())?;

        let meta: Arc<Mutex<HashMap<String, SubtaskMeta>>> = Arc::new(Mutex::new(HashMap::new()));
        let deadline = Duration::from_secs(self.env.config.orchestrator.workflow_timeout_secs);

        let outcome = {
            let run = self.run_stages(&task, &options, &plan, &graph, &meta);
            tokio::select! {
                _ = cancel.cancelled() => StageOutcome::Cancelled,
                finished = tokio::time::timeout(deadline, run) => match finished {
                    Ok(_) => StageOutcome::Finished,
                    Err(_) => StageOutcome::TimedOut,
                },
            }
        };

        // Cancellation or deadline: in-flight agents were abandoned above;
        // whatever has not reached a terminal state is failed in place.
        let status_override = match outcome {
            StageOutcome::Finished => None,
            StageOutcome::Cancelled => {
                self.fail_unfinished(&task.id, EngineError::Cancelled.code());
                Some(WorkflowStatus::Cancelled)
            }
            StageOutcome::TimedOut => {
                self.fail_unfinished(&task.id, EngineError::WorkflowTimeout(deadline.as_secs()).code());
                Some(WorkflowStatus::Cancelled)
            }
        };

        let results = self.collect_results(&task.id, &meta);
        let status = status_override.unwrap_or_else(|| {
            if results.iter().any(|r| r.state == SubtaskState::Failed) {
                WorkflowStatus::Partial
            } else {
                WorkflowStatus::Ok
            }
        });

        let final_output = self.aggregator.aggregate(&plan, &results, options.format);
        let finished_at = Utc::now();

        let record = WorkflowRecord {
            task_id: task.id.clone(),
            task_text: task.text.clone(),
            status,
            plan,
            results,
            final_output,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
        };

        if let Err(e) = self.env.workflows.store(record.clone()) {
            tracing::warn!(task_id = %task.id, "failed to persist workflow record: {}", e);
        }

        self.env.bus.publish(Event::TaskFinished {
            task_id: task.id.clone(),
            status: status.to_string(),
            timestamp: Utc::now(),
        });

        tracing::info!(task_id = %task.id, status = %status, "workflow finished");
        Ok(record)
    }

    /// Dispatch every stage in plan order
    ///
    /// Subtasks within a stage run concurrently, bounded by the worker
    /// pool; successive stages are strictly sequential.
    async fn run_stages(
        &self,
        task: &Task,
        options: &ExecuteOptions,
        plan: &Plan,
        graph: &DependencyGraph,
        meta: &Arc<Mutex<HashMap<String, SubtaskMeta>>>,
    ) {
        let history: Vec<Message> = options
            .session_id
            .as_deref()
            .map(|session| self.env.sessions.messages(session))
            .unwrap_or_default();

        for (index, stage) in plan.stages.iter().enumerate() {
            tracing::debug!(task_id = %task.id, stage = index + 1, size = stage.len(), "dispatching stage");

            let mut dispatches = Vec::new();

            for subtask_id in stage {
                let Some(subtask) = self.env.tracker.get_subtask(subtask_id) else {
                    continue;
                };

                // Skip subtasks whose prerequisites failed upstream.
                if let Some(failed) = self.failed_prerequisite(&subtask, graph) {
                    let reason = format!("upstream failure: {}", failed);
                    if let Err(e) = self.env.tracker.fail(subtask_id, &reason) {
                        tracing::error!("skip transition failed: {}", e);
                    }
                    self.env.bus.publish(Event::SubtaskFailed {
                        task_id: task.id.clone(),
                        subtask_id: subtask_id.clone(),
                        reason,
                        timestamp: Utc::now(),
                    });
                    continue;
                }

                let persona = self.obtain_persona(&subtask).await;
                let agent = Agent::new(persona.clone(), self.env.client.clone());

                meta.lock().expect("meta poisoned").insert(
                    subtask_id.clone(),
                    SubtaskMeta {
                        persona_id: Some(persona.id.clone()),
                        score: None,
                    },
                );

                if let Err(e) = self.env.tracker.assign(subtask_id, agent.id()) {
                    tracing::error!("assignment transition failed: {}", e);
                    continue;
                }
                self.env.bus.publish(Event::SubtaskAssigned {
                    task_id: task.id.clone(),
                    subtask_id: subtask_id.clone(),
                    agent_id: agent.id().to_string(),
                    timestamp: Utc::now(),
                });

                dispatches.push(self.dispatch(task, subtask, agent, &history, graph, meta));
            }

            futures::future::join_all(dispatches).await;
        }
    }

    /// Run one assigned subtask on its agent and record the outcome
    async fn dispatch(
        &self,
        task: &Task,
        subtask: Subtask,
        agent: Agent,
        history: &[Message],
        graph: &DependencyGraph,
        meta: &Arc<Mutex<HashMap<String, SubtaskMeta>>>,
    ) {
        let _permit = self
            .pool
            .acquire()
            .await
            .expect("worker pool semaphore closed");

        if let Err(e) = self.env.tracker.start(&subtask.id) {
            tracing::error!("start transition failed: {}", e);
            return;
        }
        self.env.bus.publish(Event::SubtaskStarted {
            task_id: task.id.clone(),
            subtask_id: subtask.id.clone(),
            timestamp: Utc::now(),
        });

        let prerequisites = self.prerequisite_outputs(&subtask, graph);

        match agent
            .run(
                &subtask,
                &self.env.config.personality,
                history,
                &prerequisites,
                &GenerationOptions::default(),
            )
            .await
        {
            Ok(outcome) => {
                if let Err(e) = self.env.tracker.complete(&subtask.id, &outcome.output) {
                    tracing::error!("completion transition failed: {}", e);
                    return;
                }
                self.env.bus.publish(Event::SubtaskCompleted {
                    task_id: task.id.clone(),
                    subtask_id: subtask.id.clone(),
                    timestamp: Utc::now(),
                });

                self.learn(&subtask, &agent, outcome.duration, meta);
            }
            Err(e) => {
                let reason = format!("{}: {}", e.code(), e);
                if let Err(te) = self.env.tracker.fail(&subtask.id, &reason) {
                    tracing::error!("failure transition failed: {}", te);
                }
                self.env.bus.publish(Event::SubtaskFailed {
                    task_id: task.id.clone(),
                    subtask_id: subtask.id.clone(),
                    reason,
                    timestamp: Utc::now(),
                });

                self.learn(&subtask, &agent, Duration::ZERO, meta);
            }
        }
    }

    /// Score a terminal subtask and push the outcome into the feedback loop
    fn learn(
        &self,
        subtask: &Subtask,
        agent: &Agent,
        duration: Duration,
        meta: &Arc<Mutex<HashMap<String, SubtaskMeta>>>,
    ) {
        let Some(current) = self.env.tracker.get_subtask(&subtask.id) else {
            return;
        };

        let result = SubtaskResult {
            subtask_id: current.id.clone(),
            description: current.description.clone(),
            domain: current.domain,
            state: current.state,
            persona_id: Some(agent.persona().id.clone()),
            agent_id: current.agent_id.clone(),
            output: current.output.clone(),
            failure: current.failure.clone(),
            score: None,
            duration_ms: None,
        };

        let evaluation = self
            .evaluator
            .evaluate(&result, &agent.persona().dna.output_format);

        let updated_score = self.env.optimizer.record(
            &agent.persona().id,
            &agent.persona().dna.role,
            current.domain,
            evaluation.overall,
            duration,
        );

        // In-memory fallback personas are not in the library; that miss is
        // expected and only worth a debug line.
        if let Err(e) = self.env.personas.record_use(&agent.persona().id, updated_score) {
            tracing::debug!("persona use not persisted: {}", e);
        }

        if let Some(entry) = meta
            .lock()
            .expect("meta poisoned")
            .get_mut(&subtask.id)
        {
            entry.score = Some(evaluation.overall);
        }
    }

    /// Obtain a persona for a subtask
    ///
    /// Order: the optimizer's recommendation, then a library match at or
    /// above the similarity threshold, then generation via the inference
    /// client. A persona-store failure falls back to an in-memory persona
    /// scoped to this workflow.
    async fn obtain_persona(&self, subtask: &Subtask) -> Persona {
        if let Some(suggested) = &subtask.suggested_persona_id {
            if let Some(persona) = self.env.personas.get(suggested) {
                tracing::debug!(persona = %persona.id, "using recommended persona");
                return persona;
            }
        }

        let probe = probe_dna(subtask);
        let threshold = self.env.config.orchestrator.persona_match_threshold;

        if let Some((persona, similarity)) = self.env.personas.match_best(&probe) {
            if similarity >= threshold {
                tracing::debug!(
                    persona = %persona.id,
                    similarity = similarity,
                    "reusing library persona"
                );
                return persona;
            }
        }

        let dna = match self.generate_dna(subtask).await {
            Ok(dna) => dna,
            Err(e) => {
                tracing::warn!("persona generation failed ({}), using baseline DNA", e);
                probe
            }
        };

        match self.env.personas.insert(dna.clone()) {
            Ok(id) => {
                self.env.bus.publish(Event::PersonaCreated {
                    persona_id: id.clone(),
                    role: dna.role.clone(),
                    timestamp: Utc::now(),
                });
                self.env
                    .personas
                    .get(&id)
                    .unwrap_or_else(|| Persona::new(dna))
            }
            Err(e) => {
                tracing::warn!(
                    "persona store unavailable ({}), using in-memory persona for this workflow",
                    e
                );
                Persona::new(dna)
            }
        }
    }

    /// Ask the model for a five-element DNA specification
    async fn generate_dna(&self, subtask: &Subtask) -> Result<AgentDna> {
        let system = Message::system(
            "You define specialist agent personas. Respond with ONLY a JSON object with \
             string fields \"role\", \"seniority\", \"domain\", a \"methodologies\" array of \
             strings, and \"constraints\" and \"output_format\" objects mapping names to \
             short strings.",
        );
        let user = Message::user(format!(
            "Define the ideal specialist for this {} subtask:\n{}",
            subtask.domain, subtask.description
        ));

        let response = self
            .env
            .client
            .chat(TaskClass::Reasoning, &[system, user], &GenerationOptions::default())
            .await?;

        let dna = parse_dna(&response, subtask)?;
        dna.validate()?;
        Ok(dna)
    }

    /// The first failed prerequisite of a subtask, if any
    fn failed_prerequisite(&self, subtask: &Subtask, graph: &DependencyGraph) -> Option<String> {
        graph
            .prerequisites
            .get(&subtask.id)?
            .iter()
            .find(|prereq| {
                self.env
                    .tracker
                    .get_subtask(prereq)
                    .is_some_and(|s| s.state == SubtaskState::Failed)
            })
            .cloned()
    }

    /// Outputs of completed prerequisites as (description, output) pairs
    fn prerequisite_outputs(&self, subtask: &Subtask, graph: &DependencyGraph) -> Vec<(String, String)> {
        graph
            .prerequisites
            .get(&subtask.id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .filter_map(|prereq| self.env.tracker.get_subtask(prereq))
            .filter(|s| s.state == SubtaskState::Completed)
            .filter_map(|s| Some((s.description, s.output?)))
            .collect()
    }

    /// Critical-path weights from the optimizer's historical durations
    fn duration_weights(&self, subtasks: &[Subtask]) -> HashMap<String, f64> {
        subtasks
            .iter()
            .filter_map(|s| {
                self.env
                    .optimizer
                    .mean_duration(s.domain)
                    .map(|d| (s.id.clone(), d.as_secs_f64().max(f64::MIN_POSITIVE)))
            })
            .collect()
    }

    /// Fail every non-terminal subtask of a task with `reason`
    fn fail_unfinished(&self, task_id: &str, reason: &str) {
        for subtask in self.env.tracker.get(task_id).unwrap_or_default() {
            if !subtask.state.is_terminal() {
                if let Err(e) = self.env.tracker.fail(&subtask.id, reason) {
                    tracing::error!("cancel transition failed: {}", e);
                }
                self.env.bus.publish(Event::SubtaskFailed {
                    task_id: task_id.to_string(),
                    subtask_id: subtask.id.clone(),
                    reason: reason.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
    }

    /// Snapshot results in plan order, merging accumulated metadata
    fn collect_results(
        &self,
        task_id: &str,
        meta: &Arc<Mutex<HashMap<String, SubtaskMeta>>>,
    ) -> Vec<SubtaskResult> {
        let meta = meta.lock().expect("meta poisoned");

        self.env
            .tracker
            .get(task_id)
            .unwrap_or_default()
            .into_iter()
            .map(|subtask| {
                let extra = meta.get(&subtask.id).cloned().unwrap_or_default();
                let duration_ms = match (subtask.started_at, subtask.completed_at) {
                    (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
                    _ => None,
                };

                SubtaskResult {
                    subtask_id: subtask.id,
                    description: subtask.description,
                    domain: subtask.domain,
                    state: subtask.state,
                    persona_id: extra.persona_id,
                    agent_id: subtask.agent_id,
                    output: subtask.output,
                    failure: subtask.failure,
                    score: extra.score,
                    duration_ms,
                }
            })
            .collect()
    }
}

/// Baseline DNA probe for matching and fallback generation
fn probe_dna(subtask: &Subtask) -> AgentDna {
    AgentDna::baseline(role_for_domain(subtask.domain), "Senior", subtask.domain.as_str())
}

/// Default role names per domain
fn role_for_domain(domain: Domain) -> &'static str {
    match domain {
        Domain::Development => "Software Developer",
        Domain::Devops => "DevOps Engineer",
        Domain::Data => "Data Analyst",
        Domain::Research => "Research Analyst",
        Domain::Design => "Product Designer",
        Domain::Testing => "QA Engineer",
        Domain::Security => "Security Engineer",
        Domain::Other => "Generalist",
    }
}

/// Parse a DNA JSON object out of model output, tolerant of prose
fn parse_dna(content: &str, subtask: &Subtask) -> Result<AgentDna> {
    let start = content
        .find('{')
        .ok_or_else(|| EngineError::InferenceBackend("no JSON object in DNA output".to_string()))?;
    let end = content
        .rfind('}')
        .ok_or_else(|| EngineError::InferenceBackend("no JSON object in DNA output".to_string()))?;

    #[derive(serde::Deserialize)]
    struct Draft {
        role: Option<String>,
        seniority: Option<String>,
        domain: Option<String>,
        #[serde(default)]
        methodologies: Vec<String>,
        #[serde(default)]
        constraints: BTreeMap<String, String>,
        #[serde(default)]
        output_format: BTreeMap<String, String>,
    }

    let draft: Draft = serde_json::from_str(&content[start..=end])
        .map_err(|e| EngineError::InferenceBackend(format!("invalid DNA JSON: {}", e)))?;

    let fallback = probe_dna(subtask);

    Ok(AgentDna {
        role: draft.role.filter(|r| !r.trim().is_empty()).unwrap_or(fallback.role),
        seniority: draft
            .seniority
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(fallback.seniority),
        domain: draft
            .domain
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(fallback.domain),
        methodologies: if draft.methodologies.is_empty() {
            fallback.methodologies
        } else {
            draft.methodologies
        },
        constraints: if draft.constraints.is_empty() {
            fallback.constraints
        } else {
            draft.constraints
        },
        output_format: if draft.output_format.is_empty() {
            fallback.output_format
        } else {
            draft.output_format
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_for_domain() {
        assert_eq!(role_for_domain(Domain::Development), "Software Developer");
        assert_eq!(role_for_domain(Domain::Other), "Generalist");
    }

    #[test]
    fn test_parse_dna_with_prose() {
        let subtask = Subtask::new("s1", "t1", "implement the API", Domain::Development);
        let content = r#"Sure! {"role": "API Engineer", "seniority": "Staff",
            "domain": "payments", "methodologies": ["TDD"],
            "constraints": {"security": "PCI"}, "output_format": {"code": "rust"}}"#;

        let dna = parse_dna(content, &subtask).unwrap();
        assert_eq!(dna.role, "API Engineer");
        assert_eq!(dna.seniority, "Staff");
        assert_eq!(dna.methodologies, vec!["TDD"]);
    }

    #[test]
    fn test_parse_dna_fills_missing_fields_from_probe() {
        let subtask = Subtask::new("s1", "t1", "implement the API", Domain::Development);
        let dna = parse_dna(r#"{"role": "API Engineer"}"#, &subtask).unwrap();

        assert_eq!(dna.role, "API Engineer");
        assert_eq!(dna.seniority, "Senior");
        assert_eq!(dna.domain, "development");
        assert!(!dna.methodologies.is_empty());
        dna.validate().unwrap();
    }

    #[test]
    fn test_parse_dna_rejects_non_json() {
        let subtask = Subtask::new("s1", "t1", "implement the API", Domain::Development);
        assert!(parse_dna("no json here", &subtask).is_err());
    }
}
