//! Task Decomposer
//!
//! Produces an ordered set of subtasks from an analyzed task. Simple
//! tasks pass through as a single subtask. Tasks with explicit sequence
//! markers ("and then", numbered lists) split into a sequential chain.
//! Everything else runs a template-guided procedure per reported domain,
//! then asks the inference client to refine the descriptions. The
//! refinement may only rewrite text, never change the number or order of
//! steps, and template text is used verbatim when refinement fails.

use std::sync::Arc;

use super::analyzer::TaskAnalyzer;
use super::optimizer::DelegationOptimizer;
use super::types::{Analysis, Complexity, Domain, Subtask, Task};
use crate::errors::{EngineError, Result};
use crate::inference::{GenerationOptions, InferenceClient, Message, TaskClass};

/// Maximum domains expanded for a complex task
const MAX_TEMPLATE_DOMAINS: usize = 3;

/// Template steps per domain: description prefix plus the step's own domain
fn template_for(domain: Domain) -> &'static [(&'static str, Domain)] {
    match domain {
        Domain::Development => &[
            ("Design the approach for", Domain::Design),
            ("Implement", Domain::Development),
            ("Test", Domain::Testing),
        ],
        Domain::Devops => &[
            ("Provision infrastructure for", Domain::Devops),
            ("Configure services for", Domain::Devops),
            ("Deploy", Domain::Devops),
            ("Verify the deployment of", Domain::Devops),
        ],
        Domain::Data => &[
            ("Collect and prepare data for", Domain::Data),
            ("Analyze", Domain::Data),
            ("Report findings for", Domain::Data),
        ],
        Domain::Research => &[
            ("Scope the research questions for", Domain::Research),
            ("Gather and review sources for", Domain::Research),
            ("Synthesize conclusions for", Domain::Research),
        ],
        Domain::Design => &[
            ("Draft wireframes for", Domain::Design),
            ("Refine the design of", Domain::Design),
            ("Produce final assets for", Domain::Design),
        ],
        Domain::Testing => &[
            ("Define test cases for", Domain::Testing),
            ("Execute tests for", Domain::Testing),
            ("Report defects found in", Domain::Testing),
        ],
        Domain::Security => &[
            ("Threat-model", Domain::Security),
            ("Audit", Domain::Security),
            ("Harden and verify", Domain::Security),
        ],
        Domain::Other => &[
            ("Clarify the requirements of", Domain::Other),
            ("Carry out", Domain::Other),
            ("Review the result of", Domain::Other),
        ],
    }
}

/// Template-guided task decomposer with LLM description refinement
pub struct TaskDecomposer {
    client: Arc<dyn InferenceClient>,
    optimizer: Arc<DelegationOptimizer>,
}

impl TaskDecomposer {
    pub fn new(client: Arc<dyn InferenceClient>, optimizer: Arc<DelegationOptimizer>) -> Self {
        Self { client, optimizer }
    }

    /// Decompose a task according to its analysis
    ///
    /// Subtasks come back in execution order with prerequisite chains in
    /// place and `suggested_persona_id` filled in from the delegation
    /// optimizer where a recommendation exists.
    ///
    /// # Errors
    ///
    /// `DecompositionError` when the procedure yields no subtasks.
    pub async fn decompose(&self, task: &Task, analysis: &Analysis) -> Result<Vec<Subtask>> {
        let mut subtasks = if analysis.complexity == Complexity::Simple {
            vec![Subtask::new(
                format!("{}-s1", task.id),
                &task.id,
                &task.text,
                analysis.dominant_domain(),
            )]
        } else if let Some(segments) = explicit_sequence(&task.text) {
            self.chain_from_segments(task, &segments)
        } else {
            let templated = self.from_templates(task, analysis);
            self.refine_descriptions(task, templated).await
        };

        if subtasks.is_empty() {
            return Err(EngineError::Decomposition(
                "decomposition produced no subtasks".to_string(),
            ));
        }

        for subtask in &mut subtasks {
            subtask.suggested_persona_id = self.optimizer.recommend(subtask.domain, None);
        }

        tracing::info!(
            task_id = %task.id,
            subtasks = subtasks.len(),
            "task decomposed"
        );

        Ok(subtasks)
    }

    /// One subtask per explicit sequence segment, chained in order
    fn chain_from_segments(&self, task: &Task, segments: &[String]) -> Vec<Subtask> {
        let analyzer = TaskAnalyzer::new();
        let mut subtasks = Vec::with_capacity(segments.len());

        for (i, segment) in segments.iter().enumerate() {
            let analysis = analyzer.analyze(segment, &task.context);
            let id = format!("{}-s{}", task.id, i + 1);
            let mut subtask = Subtask::new(id, &task.id, segment, analysis.dominant_domain());
            if i > 0 {
                subtask = subtask.after(format!("{}-s{}", task.id, i));
            }
            subtasks.push(subtask);
        }

        subtasks
    }

    /// Template expansion across the reported domains
    ///
    /// Medium tasks expand only the dominant domain; complex tasks expand
    /// every reported domain (bounded). Domain chains are emitted
    /// interleaved by template position, in the order the analyzer
    /// reported the domains, and each chain links its own steps.
    fn from_templates(&self, task: &Task, analysis: &Analysis) -> Vec<Subtask> {
        let domains: Vec<Domain> = match analysis.complexity {
            Complexity::Complex => analysis
                .domains
                .iter()
                .copied()
                .take(MAX_TEMPLATE_DOMAINS)
                .collect(),
            _ => vec![analysis.dominant_domain()],
        };

        let templates: Vec<&[(&str, Domain)]> =
            domains.iter().map(|d| template_for(*d)).collect();
        let longest = templates.iter().map(|t| t.len()).max().unwrap_or(0);

        let mut subtasks = Vec::new();
        let mut counter = 0usize;
        // Last emitted id per domain chain, for prerequisite links.
        let mut chain_tail: Vec<Option<String>> = vec![None; domains.len()];

        for position in 0..longest {
            for (chain, template) in templates.iter().enumerate() {
                let Some((prefix, step_domain)) = template.get(position) else {
                    continue;
                };

                counter += 1;
                let id = format!("{}-s{}", task.id, counter);
                let description = format!("{}: {}", prefix, task.text);

                let mut subtask = Subtask::new(&id, &task.id, description, *step_domain);
                if let Some(prev) = chain_tail[chain].take() {
                    subtask = subtask.after(prev);
                }
                chain_tail[chain] = Some(id);
                subtasks.push(subtask);
            }
        }

        subtasks
    }

    /// Ask the model to rewrite the descriptions, keeping count and order
    ///
    /// Any failure (transport, timeout, malformed output, or a response
    /// of the wrong shape) leaves the template descriptions in place.
    async fn refine_descriptions(&self, task: &Task, mut subtasks: Vec<Subtask>) -> Vec<Subtask> {
        if subtasks.is_empty() {
            return subtasks;
        }

        let listed = subtasks
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {}", i + 1, s.description))
            .collect::<Vec<_>>()
            .join("\n");

        let system = Message::system(
            "You rewrite workflow step descriptions. Substitute the task's specifics into \
             each step. Respond with ONLY a JSON array of strings, one rewritten description \
             per input step, in the same order. Do not add, remove, merge or reorder steps.",
        );
        let user = Message::user(format!("Task: {}\n\nSteps:\n{}", task.text, listed));

        let response = match self
            .client
            .chat(TaskClass::Reasoning, &[system, user], &GenerationOptions::default())
            .await
        {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(task_id = %task.id, "description refinement failed: {}", e);
                return subtasks;
            }
        };

        match parse_string_array(&response) {
            Some(rewritten) if rewritten.len() == subtasks.len() => {
                for (subtask, description) in subtasks.iter_mut().zip(rewritten) {
                    if !description.trim().is_empty() {
                        subtask.description = description.trim().to_string();
                    }
                }
                subtasks
            }
            Some(rewritten) => {
                tracing::warn!(
                    task_id = %task.id,
                    expected = subtasks.len(),
                    got = rewritten.len(),
                    "refinement changed the step count, keeping template text"
                );
                subtasks
            }
            None => {
                tracing::warn!(task_id = %task.id, "unparseable refinement output, keeping template text");
                subtasks
            }
        }
    }
}

/// Split a task with explicit sequence markers into ordered segments
///
/// Numbered lists win over "and then" chains. Returns `None` when the
/// text carries no usable sequence.
fn explicit_sequence(text: &str) -> Option<Vec<String>> {
    let numbered: Vec<String> = text
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                return None;
            }
            let rest = trimmed[digits.len()..].strip_prefix(['.', ')'])?;
            let rest = rest.trim();
            (!rest.is_empty()).then(|| rest.to_string())
        })
        .collect();

    if numbered.len() >= 2 {
        return Some(numbered);
    }

    let segments: Vec<String> = text
        .split(" and then ")
        .map(|s| s.trim().trim_end_matches(['.', ',']).to_string())
        .filter(|s| !s.is_empty())
        .collect();

    (segments.len() >= 2).then_some(segments)
}

/// Extract a JSON array of strings from model output
///
/// Tolerates surrounding prose and markdown fences by scanning for the
/// outermost brackets.
fn parse_string_array(content: &str) -> Option<Vec<String>> {
    let start = content.find('[')?;
    let end = content.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&content[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::TokenStream;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Inference fake with a scripted chat response
    struct ScriptedClient {
        response: Mutex<Option<Result<String>>>,
    }

    impl ScriptedClient {
        fn ok(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Some(Ok(response.to_string()))),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Some(Err(EngineError::InferenceTimeout))),
            })
        }
    }

    #[async_trait]
    impl InferenceClient for ScriptedClient {
        async fn chat(
            &self,
            _class: TaskClass,
            _messages: &[Message],
            _options: &GenerationOptions,
        ) -> Result<String> {
            self.response
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok("ok".to_string()))
        }

        async fn chat_stream(
            &self,
            _class: TaskClass,
            _messages: &[Message],
            _options: &GenerationOptions,
        ) -> Result<TokenStream> {
            unimplemented!("not used by the decomposer")
        }

        async fn list_models(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }

        async fn check_health(&self) -> bool {
            true
        }
    }

    fn task(text: &str, analysis: &Analysis) -> Task {
        Task {
            id: "t1".to_string(),
            text: text.to_string(),
            context: BTreeMap::new(),
            complexity: analysis.complexity,
            domains: analysis.domains.clone(),
            submitted_at: Utc::now(),
        }
    }

    fn decomposer(client: Arc<dyn InferenceClient>) -> TaskDecomposer {
        TaskDecomposer::new(client, Arc::new(DelegationOptimizer::new()))
    }

    async fn decompose(text: &str, client: Arc<dyn InferenceClient>) -> Vec<Subtask> {
        let analysis = TaskAnalyzer::new().analyze(text, &BTreeMap::new());
        decomposer(client)
            .decompose(&task(text, &analysis), &analysis)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_simple_task_passes_through() {
        let subtasks = decompose("say hi", ScriptedClient::failing()).await;

        assert_eq!(subtasks.len(), 1);
        assert_eq!(subtasks[0].description, "say hi");
        assert!(subtasks[0].prerequisites.is_empty());
    }

    #[tokio::test]
    async fn test_sequence_markers_build_a_chain() {
        let subtasks =
            decompose("A and then B and then C and then D and then E", ScriptedClient::failing())
                .await;

        assert_eq!(subtasks.len(), 5);
        assert_eq!(subtasks[0].description, "A");
        assert_eq!(subtasks[4].description, "E");
        assert!(subtasks[0].prerequisites.is_empty());
        for i in 1..5 {
            assert_eq!(subtasks[i].prerequisites, vec![subtasks[i - 1].id.clone()]);
        }
    }

    #[tokio::test]
    async fn test_numbered_list_builds_a_chain() {
        let text = "Release checklist\n1. update the changelog\n2. tag the build\n3. publish the artifacts";
        let subtasks = decompose(text, ScriptedClient::failing()).await;

        assert_eq!(subtasks.len(), 3);
        assert_eq!(subtasks[0].description, "update the changelog");
        assert_eq!(subtasks[2].prerequisites, vec![subtasks[1].id.clone()]);
    }

    #[tokio::test]
    async fn test_complex_cross_domain_templates() {
        let subtasks = decompose(
            "Build a REST API with authentication and deploy it to AWS",
            ScriptedClient::failing(),
        )
        .await;

        // development (3 steps) + devops (4 steps)
        assert_eq!(subtasks.len(), 7);

        // Each chain starts without prerequisites and links internally.
        let roots: Vec<&Subtask> =
            subtasks.iter().filter(|s| s.prerequisites.is_empty()).collect();
        assert_eq!(roots.len(), 2);

        let devops: Vec<&Subtask> =
            subtasks.iter().filter(|s| s.domain == Domain::Devops).collect();
        assert_eq!(devops.len(), 4);
    }

    #[tokio::test]
    async fn test_refinement_rewrites_descriptions_in_place() {
        let rewritten = r#"["Design the API schema","Write the handlers","Run the test suite"]"#;
        let subtasks = decompose("implement a login form for the site", ScriptedClient::ok(rewritten)).await;

        assert_eq!(subtasks.len(), 3);
        assert_eq!(subtasks[0].description, "Design the API schema");
        assert_eq!(subtasks[2].description, "Run the test suite");
    }

    #[tokio::test]
    async fn test_refinement_with_wrong_count_is_discarded() {
        let wrong = r#"["only one step"]"#;
        let subtasks = decompose("implement a login form for the site", ScriptedClient::ok(wrong)).await;

        assert_eq!(subtasks.len(), 3);
        assert!(subtasks[0].description.starts_with("Design the approach for"));
    }

    #[tokio::test]
    async fn test_refinement_failure_keeps_template_text() {
        let subtasks =
            decompose("implement a login form for the site", ScriptedClient::failing()).await;

        assert_eq!(subtasks.len(), 3);
        assert!(subtasks[1].description.starts_with("Implement"));
    }

    #[test]
    fn test_parse_string_array_with_prose() {
        let content = "Here you go:\n```json\n[\"a\", \"b\"]\n```\nEnjoy!";
        assert_eq!(
            parse_string_array(content),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert!(parse_string_array("no array here").is_none());
    }

    #[test]
    fn test_explicit_sequence_prefers_numbered_lists() {
        let text = "1. first and then something\n2. second";
        let segments = explicit_sequence(text).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1], "second");
    }
}
