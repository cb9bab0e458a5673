//! Short-term conversational memory
//!
//! A sliding window of conversation turns per session, bounded FIFO
//! (default 20 turns). The window itself is never reloaded across
//! process restarts; each session's turns are mirrored to a JSON file as
//! a best-effort record for external inspection.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inference::Message;

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One conversation turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Bounded FIFO of conversation turns
#[derive(Debug, Clone)]
pub struct ShortTermMemory {
    turns: VecDeque<ConversationTurn>,
    window: usize,
}

impl ShortTermMemory {
    /// Create a memory holding at most `window` turns
    pub fn new(window: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(window.min(64)),
            window: window.max(1),
        }
    }

    /// Append a turn, evicting the oldest when the window is full
    pub fn append(&mut self, turn: ConversationTurn) {
        if self.turns.len() >= self.window {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Turns in order, oldest first
    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// The window rendered as inference messages
    pub fn as_messages(&self) -> Vec<Message> {
        self.turns
            .iter()
            .map(|turn| match turn.role {
                TurnRole::User => Message::user(&turn.text),
                TurnRole::Assistant => Message::assistant(&turn.text),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Per-session short-term memories behind per-session locks
///
/// Multiple HTTP clients sharing a session id serialise their writes on
/// the session's lock; distinct sessions never contend.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<ShortTermMemory>>>>,
    window: usize,

    /// Directory for per-session JSON mirrors, if persistence is wanted
    dir: Option<PathBuf>,
}

impl SessionStore {
    pub fn new(window: usize, dir: Option<PathBuf>) -> Self {
        if let Some(dir) = &dir {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::warn!("cannot create conversation directory: {}", e);
            }
        }

        Self {
            sessions: RwLock::new(HashMap::new()),
            window: window.max(1),
            dir,
        }
    }

    /// Get (or create) the memory for a session
    pub fn session(&self, session_id: &str) -> Arc<Mutex<ShortTermMemory>> {
        {
            let sessions = self.sessions.read().expect("session store poisoned");
            if let Some(memory) = sessions.get(session_id) {
                return memory.clone();
            }
        }

        let mut sessions = self.sessions.write().expect("session store poisoned");
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ShortTermMemory::new(self.window))))
            .clone()
    }

    /// Append a turn to a session and mirror it to disk
    pub fn append(&self, session_id: &str, turn: ConversationTurn) {
        let memory = self.session(session_id);
        let snapshot: Vec<ConversationTurn> = {
            let mut memory = memory.lock().expect("session lock poisoned");
            memory.append(turn);
            memory.turns().cloned().collect()
        };

        self.mirror(session_id, &snapshot);
    }

    /// Snapshot of a session's turns, oldest first
    pub fn turns(&self, session_id: &str) -> Vec<ConversationTurn> {
        let memory = self.session(session_id);
        let memory = memory.lock().expect("session lock poisoned");
        memory.turns().cloned().collect()
    }

    /// The session window rendered as inference messages
    pub fn messages(&self, session_id: &str) -> Vec<Message> {
        let memory = self.session(session_id);
        let memory = memory.lock().expect("session lock poisoned");
        memory.as_messages()
    }

    /// Best-effort JSON mirror of a session; failures are logged only
    fn mirror(&self, session_id: &str, turns: &[ConversationTurn]) {
        let Some(dir) = &self.dir else { return };

        // Session ids feed a filename; strip anything path-like.
        let safe: String = session_id
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if safe.is_empty() {
            return;
        }

        let path = dir.join(format!("{}.json", safe));
        match serde_json::to_vec_pretty(turns) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    tracing::warn!(session = %session_id, "conversation mirror failed: {}", e);
                }
            }
            Err(e) => tracing::warn!(session = %session_id, "conversation serialize failed: {}", e),
        }
    }
}
