//! Delegation Optimizer
//!
//! Closes the feedback loop: maintains an exponential moving average of
//! each persona's outcome scores (`s' = α·score + (1−α)·s`, α = 0.2),
//! tracks per-domain mean durations for planner weights, and recommends
//! personas for future subtasks. A persona needs at least three recorded
//! uses before it can be recommended; below that the orchestrator falls
//! back to similarity matching against the library.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use serde::Serialize;

use super::types::Domain;

/// EMA learning rate
const ALPHA: f64 = 0.2;

/// Uses required before a persona can be recommended
const MIN_USES_FOR_RECOMMENDATION: u64 = 3;

/// Per-persona learning state
#[derive(Debug, Clone, Serialize)]
pub struct PersonaPerformance {
    pub persona_id: String,
    pub role: String,
    pub score: f64,
    pub uses: u64,

    /// Domains this persona has worked in
    pub domains: Vec<Domain>,
}

#[derive(Debug, Clone)]
struct Entry {
    role: String,
    score: f64,
    uses: u64,
    /// Per-domain (use count, mean duration seconds)
    durations: HashMap<Domain, (u64, f64)>,
}

/// Learns which personas perform well where
#[derive(Default)]
pub struct DelegationOptimizer {
    entries: RwLock<HashMap<String, Entry>>,
}

impl DelegationOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a scored outcome for a persona
    ///
    /// Returns the persona's updated moving-average score so the caller
    /// can persist it on the library record.
    pub fn record(
        &self,
        persona_id: &str,
        role: &str,
        domain: Domain,
        score: f64,
        duration: Duration,
    ) -> f64 {
        let mut entries = self.entries.write().expect("optimizer poisoned");

        let entry = entries.entry(persona_id.to_string()).or_insert_with(|| Entry {
            role: role.to_string(),
            score: 0.5,
            uses: 0,
            durations: HashMap::new(),
        });

        entry.score = ALPHA * score.clamp(0.0, 1.0) + (1.0 - ALPHA) * entry.score;
        entry.uses += 1;

        let secs = duration.as_secs_f64();
        let (count, mean) = entry.durations.entry(domain).or_insert((0, 0.0));
        *count += 1;
        *mean += (secs - *mean) / *count as f64;

        tracing::debug!(
            persona = %persona_id,
            domain = %domain,
            score = entry.score,
            uses = entry.uses,
            "delegation outcome recorded"
        );

        entry.score
    }

    /// Recommend a persona for a domain
    ///
    /// Returns the highest-scoring persona that has worked the domain at
    /// least `MIN_USES_FOR_RECOMMENDATION` times in total; `role_hint`
    /// additionally filters on the persona's role. `None` signals the
    /// orchestrator to fall back to library matching.
    pub fn recommend(&self, domain: Domain, role_hint: Option<&str>) -> Option<String> {
        let entries = self.entries.read().expect("optimizer poisoned");

        entries
            .iter()
            .filter(|(_, e)| e.uses >= MIN_USES_FOR_RECOMMENDATION)
            .filter(|(_, e)| e.durations.contains_key(&domain))
            .filter(|(_, e)| {
                role_hint.map_or(true, |hint| {
                    e.role.to_lowercase().contains(&hint.to_lowercase())
                })
            })
            .max_by(|a, b| {
                a.1.score
                    .partial_cmp(&b.1.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(id, _)| id.clone())
    }

    /// Historical mean duration for a domain, across personas
    ///
    /// Used by the execution planner as a critical-path weight when
    /// available.
    pub fn mean_duration(&self, domain: Domain) -> Option<Duration> {
        let entries = self.entries.read().expect("optimizer poisoned");

        let mut total = 0.0;
        let mut count = 0u64;
        for entry in entries.values() {
            if let Some((n, mean)) = entry.durations.get(&domain) {
                total += mean * *n as f64;
                count += n;
            }
        }

        (count > 0).then(|| Duration::from_secs_f64(total / count as f64))
    }

    /// Current per-persona performance, sorted by score
    pub fn performance(&self) -> Vec<PersonaPerformance> {
        let entries = self.entries.read().expect("optimizer poisoned");

        let mut performance: Vec<PersonaPerformance> = entries
            .iter()
            .map(|(id, e)| {
                let mut domains: Vec<Domain> = e.durations.keys().copied().collect();
                domains.sort();
                PersonaPerformance {
                    persona_id: id.clone(),
                    role: e.role.clone(),
                    score: e.score,
                    uses: e.uses,
                    domains,
                }
            })
            .collect();

        performance.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        performance
    }
}
