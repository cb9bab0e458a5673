//! Agent runtime
//!
//! An agent is the ephemeral binding of a persona snapshot to the
//! inference client for the duration of one subtask. It is created at
//! dispatch, destroyed after the subtask terminates, holds no state
//! between subtasks, and is never retried; the orchestrator models a
//! retry as a new subtask.
//!
//! The prompt an agent sends is assembled from: the persona preamble, the
//! externally-resolved personality prefix, the serialized outputs of
//! prerequisite subtasks, the subtask description, and a trailer binding
//! the response to the persona's output format.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::PersonalityConfig;
use crate::conductor::types::{Domain, Subtask};
use crate::errors::Result;
use crate::inference::{GenerationOptions, InferenceClient, Message, TaskClass};
use crate::persona::Persona;

/// Outcome of a single agent execution
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub output: String,
    pub duration: Duration,
}

/// One-shot subtask executor
pub struct Agent {
    id: String,
    persona: Persona,
    client: Arc<dyn InferenceClient>,
}

impl Agent {
    /// Bind a persona snapshot to the inference client
    pub fn new(persona: Persona, client: Arc<dyn InferenceClient>) -> Self {
        let id = format!(
            "agent-{}-{}",
            persona.dna.role.to_lowercase().replace(' ', "-"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );

        Self { id, persona, client }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    /// Execute a single subtask
    ///
    /// `history` is the session's short-term context; `prerequisites` are
    /// `(description, output)` pairs from completed upstream subtasks.
    pub async fn run(
        &self,
        subtask: &Subtask,
        personality: &PersonalityConfig,
        history: &[Message],
        prerequisites: &[(String, String)],
        options: &GenerationOptions,
    ) -> Result<AgentOutcome> {
        let start = Instant::now();
        let messages = self.build_messages(subtask, personality, history, prerequisites);

        tracing::debug!(
            agent = %self.id,
            subtask = %subtask.id,
            persona = %self.persona.id,
            "agent dispatching inference request"
        );

        let output = self
            .client
            .chat(task_class_for(subtask.domain), &messages, options)
            .await?;

        Ok(AgentOutcome {
            output,
            duration: start.elapsed(),
        })
    }

    fn build_messages(
        &self,
        subtask: &Subtask,
        personality: &PersonalityConfig,
        history: &[Message],
        prerequisites: &[(String, String)],
    ) -> Vec<Message> {
        let mut system = self.persona_preamble();

        if !personality.prompt_prefix.trim().is_empty() {
            system.push_str("\n\n");
            system.push_str(personality.prompt_prefix.trim());
        }
        if !personality.style.trim().is_empty() {
            system.push_str(&format!("\nResponse style: {}.", personality.style.trim()));
        }

        let mut messages = vec![Message::system(system)];
        messages.extend_from_slice(history);

        let mut user = String::new();
        if !prerequisites.is_empty() {
            user.push_str("Results from prerequisite steps:\n\n");
            for (description, output) in prerequisites {
                user.push_str(&format!("- {}:\n{}\n\n", description, output.trim()));
            }
        }
        user.push_str(&format!("Your task: {}\n\n", subtask.description));
        user.push_str(&self.output_trailer());

        messages.push(Message::user(user));
        messages
    }

    /// Render the five DNA elements as a system preamble
    fn persona_preamble(&self) -> String {
        let dna = &self.persona.dna;
        let mut preamble = format!(
            "You are a {} {} working in {}.",
            dna.seniority, dna.role, dna.domain
        );

        if !dna.methodologies.is_empty() {
            preamble.push_str(&format!(
                "\nYou work according to: {}.",
                dna.methodologies.join(", ")
            ));
        }

        if !dna.constraints.is_empty() {
            preamble.push_str("\nConstraints:");
            for (name, value) in &dna.constraints {
                preamble.push_str(&format!("\n- {}: {}", name, value));
            }
        }

        preamble
    }

    /// Trailer instructing the model to honour the output format
    fn output_trailer(&self) -> String {
        let format = &self.persona.dna.output_format;
        if format.is_empty() {
            return "Respond with the completed deliverable.".to_string();
        }

        let mut trailer =
            String::from("Structure your response with exactly these sections:\n");
        for (name, value) in format {
            trailer.push_str(&format!("- {}: {}\n", name, value));
        }
        trailer
    }
}

/// Map a subtask domain onto the inference task class
fn task_class_for(domain: Domain) -> TaskClass {
    match domain {
        Domain::Development | Domain::Testing | Domain::Security => TaskClass::Code,
        Domain::Research | Domain::Data => TaskClass::Reasoning,
        Domain::Devops | Domain::Design | Domain::Other => TaskClass::General,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EngineError;
    use crate::inference::TokenStream;
    use crate::persona::AgentDna;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingClient {
        seen: Mutex<Vec<(TaskClass, Vec<Message>)>>,
    }

    impl RecordingClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl InferenceClient for RecordingClient {
        async fn chat(
            &self,
            class: TaskClass,
            messages: &[Message],
            _options: &GenerationOptions,
        ) -> Result<String> {
            self.seen.lock().unwrap().push((class, messages.to_vec()));
            Ok("agent output".to_string())
        }

        async fn chat_stream(
            &self,
            _class: TaskClass,
            _messages: &[Message],
            _options: &GenerationOptions,
        ) -> Result<TokenStream> {
            Err(EngineError::InferenceBackend("not used".to_string()))
        }

        async fn list_models(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }

        async fn check_health(&self) -> bool {
            true
        }
    }

    fn persona() -> Persona {
        Persona::new(AgentDna::baseline("Backend Developer", "Senior", "development"))
    }

    fn subtask() -> Subtask {
        Subtask::new("t1-s1", "t1", "implement the login endpoint", Domain::Development)
    }

    #[tokio::test]
    async fn test_run_produces_output_and_duration() {
        let client = RecordingClient::new();
        let agent = Agent::new(persona(), client.clone());

        let outcome = agent
            .run(
                &subtask(),
                &PersonalityConfig::default(),
                &[],
                &[],
                &GenerationOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.output, "agent output");
        assert_eq!(client.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_prompt_carries_all_five_parts() {
        let client = RecordingClient::new();
        let agent = Agent::new(persona(), client.clone());

        let personality = PersonalityConfig {
            prompt_prefix: "Stay friendly.".to_string(),
            style: "concise".to_string(),
        };
        let history = vec![Message::user("earlier question")];
        let prerequisites = vec![("design the endpoint".to_string(), "use POST /login".to_string())];

        agent
            .run(&subtask(), &personality, &history, &prerequisites, &GenerationOptions::default())
            .await
            .unwrap();

        let seen = client.seen.lock().unwrap();
        let (class, messages) = &seen[0];

        assert_eq!(*class, TaskClass::Code);

        // system: persona preamble + personality
        assert!(messages[0].content.contains("Senior Backend Developer"));
        assert!(messages[0].content.contains("Stay friendly."));
        assert!(messages[0].content.contains("concise"));

        // history sits between system and the task message
        assert_eq!(messages[1].content, "earlier question");

        // user: prerequisites, description, output-format trailer
        let user = &messages.last().unwrap().content;
        assert!(user.contains("use POST /login"));
        assert!(user.contains("implement the login endpoint"));
        assert!(user.contains("these sections"));
    }

    #[tokio::test]
    async fn test_agent_ids_are_unique_per_binding() {
        let client = RecordingClient::new();
        let a = Agent::new(persona(), client.clone());
        let b = Agent::new(persona(), client);

        assert_ne!(a.id(), b.id());
        assert!(a.id().starts_with("agent-backend-developer-"));
    }

    #[test]
    fn test_task_class_mapping() {
        assert_eq!(task_class_for(Domain::Development), TaskClass::Code);
        assert_eq!(task_class_for(Domain::Research), TaskClass::Reasoning);
        assert_eq!(task_class_for(Domain::Devops), TaskClass::General);
    }
}
