//! Message Bus for inter-component communication
//!
//! The MessageBus provides a typed pub/sub pattern so that components can
//! observe workflow progress without tight coupling. Each subscriber owns
//! a bounded queue (default 256 events); publishing never blocks: when a
//! subscriber's queue is full the oldest event is dropped and a counter is
//! incremented. Delivery order per subscriber follows publish order.
//!
//! The bus also retains a bounded history ring of recent events for the
//! progress endpoint and diagnostics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::Notify;

/// Default per-subscriber queue capacity
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Number of events retained in the history ring
const HISTORY_SIZE: usize = 1000;

/// Event types published on the bus
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskStarted,
    TaskFinished,
    SubtaskAssigned,
    SubtaskStarted,
    SubtaskCompleted,
    SubtaskFailed,
    KnowledgeReloaded,
    PersonaCreated,
}

/// Events published on the bus
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TaskStarted {
        task_id: String,
        text: String,
        timestamp: DateTime<Utc>,
    },
    TaskFinished {
        task_id: String,
        status: String,
        timestamp: DateTime<Utc>,
    },
    SubtaskAssigned {
        task_id: String,
        subtask_id: String,
        agent_id: String,
        timestamp: DateTime<Utc>,
    },
    SubtaskStarted {
        task_id: String,
        subtask_id: String,
        timestamp: DateTime<Utc>,
    },
    SubtaskCompleted {
        task_id: String,
        subtask_id: String,
        timestamp: DateTime<Utc>,
    },
    SubtaskFailed {
        task_id: String,
        subtask_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    KnowledgeReloaded {
        source: String,
        timestamp: DateTime<Utc>,
    },
    PersonaCreated {
        persona_id: String,
        role: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Get the event kind for this event
    pub fn kind(&self) -> EventKind {
        match self {
            Event::TaskStarted { .. } => EventKind::TaskStarted,
            Event::TaskFinished { .. } => EventKind::TaskFinished,
            Event::SubtaskAssigned { .. } => EventKind::SubtaskAssigned,
            Event::SubtaskStarted { .. } => EventKind::SubtaskStarted,
            Event::SubtaskCompleted { .. } => EventKind::SubtaskCompleted,
            Event::SubtaskFailed { .. } => EventKind::SubtaskFailed,
            Event::KnowledgeReloaded { .. } => EventKind::KnowledgeReloaded,
            Event::PersonaCreated { .. } => EventKind::PersonaCreated,
        }
    }

    /// Task id carried by the event, if any
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Event::TaskStarted { task_id, .. }
            | Event::TaskFinished { task_id, .. }
            | Event::SubtaskAssigned { task_id, .. }
            | Event::SubtaskStarted { task_id, .. }
            | Event::SubtaskCompleted { task_id, .. }
            | Event::SubtaskFailed { task_id, .. } => Some(task_id),
            Event::KnowledgeReloaded { .. } | Event::PersonaCreated { .. } => None,
        }
    }
}

type Predicate = Box<dyn Fn(EventKind) -> bool + Send + Sync>;

struct SubscriberQueue {
    events: Mutex<VecDeque<Event>>,
    notify: Notify,
    dropped: AtomicU64,
    capacity: usize,
    predicate: Predicate,
}

impl SubscriberQueue {
    /// Enqueue an event, dropping the oldest on overflow
    fn push(&self, event: Event) {
        {
            let mut events = self.events.lock().expect("subscriber queue poisoned");
            if events.len() >= self.capacity {
                events.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            events.push_back(event);
        }
        self.notify.notify_one();
    }
}

/// Receiving half of a subscription
///
/// Dropping the subscription detaches it from the bus; the next publish
/// prunes the dead entry.
pub struct Subscription {
    queue: Arc<SubscriberQueue>,
}

impl Subscription {
    /// Receive the next matching event, waiting if the queue is empty
    pub async fn recv(&self) -> Event {
        loop {
            if let Some(event) = self.try_recv() {
                return event;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Receive the next matching event if one is queued
    pub fn try_recv(&self) -> Option<Event> {
        self.queue
            .events
            .lock()
            .expect("subscriber queue poisoned")
            .pop_front()
    }

    /// Number of events dropped because this subscriber fell behind
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

/// Bus statistics for the progress endpoint
#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    pub published: u64,
    pub subscribers: usize,
    pub dropped: u64,
    pub history_size: usize,
}

/// Typed pub/sub message bus with bounded subscriber queues
pub struct MessageBus {
    subscribers: RwLock<Vec<Weak<SubscriberQueue>>>,
    history: Mutex<VecDeque<Event>>,
    published: AtomicU64,
}

impl MessageBus {
    /// Create a new MessageBus
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_SIZE)),
            published: AtomicU64::new(0),
        }
    }

    /// Subscribe with a predicate over event kinds
    ///
    /// The returned subscription receives every published event whose kind
    /// satisfies the predicate, in publish order, through a bounded queue
    /// of the default capacity.
    pub fn subscribe<F>(&self, predicate: F) -> Subscription
    where
        F: Fn(EventKind) -> bool + Send + Sync + 'static,
    {
        self.subscribe_with_capacity(predicate, DEFAULT_QUEUE_CAPACITY)
    }

    /// Subscribe with an explicit queue capacity
    pub fn subscribe_with_capacity<F>(&self, predicate: F, capacity: usize) -> Subscription
    where
        F: Fn(EventKind) -> bool + Send + Sync + 'static,
    {
        let queue = Arc::new(SubscriberQueue {
            events: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            capacity: capacity.max(1),
            predicate: Box::new(predicate),
        });

        self.subscribers
            .write()
            .expect("subscriber list poisoned")
            .push(Arc::downgrade(&queue));

        Subscription { queue }
    }

    /// Subscribe to all event kinds
    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(|_| true)
    }

    /// Publish an event to all matching subscribers
    ///
    /// Never blocks: slow subscribers lose their oldest queued events
    /// instead of stalling the publisher.
    pub fn publish(&self, event: Event) {
        self.published.fetch_add(1, Ordering::Relaxed);

        {
            let mut history = self.history.lock().expect("bus history poisoned");
            if history.len() >= HISTORY_SIZE {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        let mut pruned = false;
        {
            let subscribers = self.subscribers.read().expect("subscriber list poisoned");
            for weak in subscribers.iter() {
                match weak.upgrade() {
                    Some(queue) => {
                        if (queue.predicate)(event.kind()) {
                            queue.push(event.clone());
                        }
                    }
                    None => pruned = true,
                }
            }
        }

        if pruned {
            self.subscribers
                .write()
                .expect("subscriber list poisoned")
                .retain(|weak| weak.strong_count() > 0);
        }
    }

    /// Recent events, optionally filtered by kind and task id
    pub fn history(
        &self,
        kind: Option<EventKind>,
        task_id: Option<&str>,
        limit: usize,
    ) -> Vec<Event> {
        let history = self.history.lock().expect("bus history poisoned");
        history
            .iter()
            .rev()
            .filter(|e| kind.map_or(true, |k| e.kind() == k))
            .filter(|e| task_id.map_or(true, |t| e.task_id() == Some(t)))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Bus statistics
    pub fn stats(&self) -> BusStats {
        let subscribers = self.subscribers.read().expect("subscriber list poisoned");
        let live: Vec<Arc<SubscriberQueue>> =
            subscribers.iter().filter_map(|w| w.upgrade()).collect();

        BusStats {
            published: self.published.load(Ordering::Relaxed),
            subscribers: live.len(),
            dropped: live
                .iter()
                .map(|q| q.dropped.load(Ordering::Relaxed))
                .sum(),
            history_size: self.history.lock().expect("bus history poisoned").len(),
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
