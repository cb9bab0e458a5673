//! Persona library
//!
//! Persistent storage for agent personas. The library lives in a single
//! append-structured YAML file (one document per persona) with an
//! in-memory index keyed by persona id. Inserts append a document and
//! flush before returning; updates and deletes rewrite the file through a
//! temp-file rename.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;
use serde::Deserialize;

use super::{similarity, AgentDna, Persona};
use crate::errors::{EngineError, Result};

/// Snapshot statistics for the library
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub total_personas: usize,
    pub roles: Vec<String>,
    pub domains: Vec<String>,
    pub most_used: Option<String>,
}

/// Persistent persona library
///
/// The store exclusively owns persisted persona records; agents only ever
/// hold read-only snapshots.
#[derive(Debug)]
pub struct PersonaStore {
    path: PathBuf,
    index: RwLock<HashMap<String, Persona>>,
}

impl PersonaStore {
    /// Open (or create) the library at `path`
    ///
    /// A missing file is an empty library. A file that fails to parse is
    /// a `PersonaStoreError`: silently dropping records would break
    /// identity collapse.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut index = HashMap::new();
        if path.exists() {
            let contents = fs::read_to_string(&path)
                .map_err(|e| EngineError::PersonaStore(format!("read failed: {}", e)))?;

            for doc in serde_yaml::Deserializer::from_str(&contents) {
                let persona = Persona::deserialize(doc)
                    .map_err(|e| EngineError::PersonaStore(format!("parse failed: {}", e)))?;
                index.insert(persona.id.clone(), persona);
            }
        }

        tracing::info!(personas = index.len(), path = %path.display(), "persona library loaded");

        Ok(Self {
            path,
            index: RwLock::new(index),
        })
    }

    /// Insert a persona, collapsing identical DNA onto the existing record
    ///
    /// Returns the id of the stored persona: the existing record's id when
    /// the DNA fingerprint already exists, otherwise a fresh one. The new
    /// document is flushed to disk before the call returns.
    pub fn insert(&self, dna: AgentDna) -> Result<String> {
        dna.validate()?;

        let mut index = self.index.write().expect("persona index poisoned");

        let fingerprint = dna.fingerprint();
        if let Some(existing) = index.values().find(|p| p.dna.fingerprint() == fingerprint) {
            tracing::debug!(id = %existing.id, "persona collapse onto existing record");
            return Ok(existing.id.clone());
        }

        let persona = Persona::new(dna);
        let id = persona.id.clone();

        self.append_document(&persona)?;
        index.insert(id.clone(), persona);

        tracing::info!(id = %id, "persona saved to library");
        Ok(id)
    }

    /// Find the best match for a probe DNA
    ///
    /// Returns the highest-similarity persona together with its score.
    /// Ties break by higher success score, then by more recent use.
    pub fn match_best(&self, probe: &AgentDna) -> Option<(Persona, f64)> {
        let index = self.index.read().expect("persona index poisoned");

        let mut best: Option<(&Persona, f64)> = None;
        for persona in index.values() {
            let sim = similarity(probe, &persona.dna);
            let better = match best {
                None => true,
                Some((current, best_sim)) => {
                    sim > best_sim
                        || (sim == best_sim
                            && (persona.score > current.score
                                || (persona.score == current.score
                                    && persona.last_used > current.last_used)))
                }
            };
            if better {
                best = Some((persona, sim));
            }
        }

        best.map(|(p, s)| (p.clone(), s))
    }

    /// Get a persona by id
    pub fn get(&self, id: &str) -> Option<Persona> {
        self.index
            .read()
            .expect("persona index poisoned")
            .get(id)
            .cloned()
    }

    /// Record a use of a persona with its updated success score
    ///
    /// Bumps the usage counter and last-used timestamp and stores the new
    /// exponential-moving-average score computed by the delegation
    /// optimizer.
    pub fn record_use(&self, id: &str, score: f64) -> Result<()> {
        let mut index = self.index.write().expect("persona index poisoned");

        let persona = index
            .get_mut(id)
            .ok_or_else(|| EngineError::PersonaStore(format!("unknown persona: {}", id)))?;

        persona.uses += 1;
        persona.score = score.clamp(0.0, 1.0);
        persona.last_used = Some(Utc::now());

        Self::rewrite(&self.path, index.values())
    }

    /// List all personas
    pub fn list(&self) -> Vec<Persona> {
        let mut personas: Vec<Persona> = self
            .index
            .read()
            .expect("persona index poisoned")
            .values()
            .cloned()
            .collect();
        personas.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        personas
    }

    /// Delete a persona by id. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut index = self.index.write().expect("persona index poisoned");

        if index.remove(id).is_none() {
            return Ok(false);
        }

        Self::rewrite(&self.path, index.values())?;
        tracing::info!(id = %id, "persona deleted");
        Ok(true)
    }

    /// Number of personas in the library
    pub fn len(&self) -> usize {
        self.index.read().expect("persona index poisoned").len()
    }

    /// True when the library is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Library statistics for the stats endpoint
    pub fn stats(&self) -> StoreStats {
        let index = self.index.read().expect("persona index poisoned");

        let mut roles: Vec<String> = index.values().map(|p| p.dna.role.clone()).collect();
        roles.sort();
        roles.dedup();

        let mut domains: Vec<String> = index.values().map(|p| p.dna.domain.clone()).collect();
        domains.sort();
        domains.dedup();

        let most_used = index
            .values()
            .max_by_key(|p| p.uses)
            .filter(|p| p.uses > 0)
            .map(|p| p.id.clone());

        StoreStats {
            total_personas: index.len(),
            roles,
            domains,
            most_used,
        }
    }

    /// Append one YAML document and flush it to disk
    fn append_document(&self, persona: &Persona) -> Result<()> {
        let doc = serde_yaml::to_string(persona)
            .map_err(|e| EngineError::PersonaStore(format!("serialize failed: {}", e)))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| EngineError::PersonaStore(format!("open failed: {}", e)))?;

        file.write_all(b"---\n")
            .and_then(|_| file.write_all(doc.as_bytes()))
            .map_err(|e| EngineError::PersonaStore(format!("write failed: {}", e)))?;

        file.sync_all()
            .map_err(|e| EngineError::PersonaStore(format!("fsync failed: {}", e)))
    }

    /// Rewrite the whole library atomically (temp file + rename)
    fn rewrite<'a>(path: &Path, personas: impl Iterator<Item = &'a Persona>) -> Result<()> {
        let mut contents = String::new();
        for persona in personas {
            let doc = serde_yaml::to_string(persona)
                .map_err(|e| EngineError::PersonaStore(format!("serialize failed: {}", e)))?;
            contents.push_str("---\n");
            contents.push_str(&doc);
        }

        let tmp = path.with_extension("yaml.tmp");
        let mut file = File::create(&tmp)
            .map_err(|e| EngineError::PersonaStore(format!("open failed: {}", e)))?;
        file.write_all(contents.as_bytes())
            .map_err(|e| EngineError::PersonaStore(format!("write failed: {}", e)))?;
        file.sync_all()
            .map_err(|e| EngineError::PersonaStore(format!("fsync failed: {}", e)))?;

        fs::rename(&tmp, path)
            .map_err(|e| EngineError::PersonaStore(format!("rename failed: {}", e)))
    }
}
