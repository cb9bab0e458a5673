//! Long-term workflow memory
//!
//! Append-only structured store for completed workflow records. Records
//! append to a monthly JSONL file (`workflows-YYYY-MM.jsonl`) and are
//! mirrored in a bounded in-memory window for search and idempotence
//! checks. On the first write of a new calendar month, or when the
//! in-memory window overflows its cap, the oldest records move to dated
//! archive files and are dropped from memory.
//!
//! All writes are serialised behind a single writer lock.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Utc};

use crate::conductor::types::WorkflowRecord;
use crate::errors::{EngineError, Result};

struct Inner {
    records: VecDeque<WorkflowRecord>,
    /// Month (year, month) of the most recent write
    current_month: Option<(i32, u32)>,
}

/// Append-only workflow record store with monthly archival
pub struct WorkflowMemory {
    dir: PathBuf,
    max_records: usize,
    inner: Mutex<Inner>,
}

impl WorkflowMemory {
    /// Open the store rooted at `dir`
    ///
    /// The current month's file, when present, is read back into the
    /// in-memory window so idempotence survives restarts.
    pub fn open(dir: impl Into<PathBuf>, max_records: usize) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let now = Utc::now();
        let mut records = VecDeque::new();
        let current = dir.join(monthly_file_name(&now));

        if current.exists() {
            let file = File::open(&current)?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<WorkflowRecord>(&line) {
                    Ok(record) => records.push_back(record),
                    Err(e) => tracing::warn!("skipping malformed workflow record: {}", e),
                }
            }
        }

        tracing::info!(
            records = records.len(),
            dir = %dir.display(),
            "workflow memory loaded"
        );

        Ok(Self {
            dir,
            max_records: max_records.max(1),
            inner: Mutex::new(Inner {
                current_month: (!records.is_empty()).then(|| (now.year(), now.month())),
                records,
            }),
        })
    }

    /// Append a workflow record
    ///
    /// Rotation runs first, so a month boundary or window overflow moves
    /// old records out before the new one lands.
    pub fn store(&self, record: WorkflowRecord) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("workflow memory poisoned");

        self.rotate_locked(&mut inner, &now)?;

        let path = self.dir.join(monthly_file_name(&now));
        append_line(&path, &record)?;

        inner.records.push_back(record);
        inner.current_month = Some((now.year(), now.month()));

        Ok(())
    }

    /// Apply the archival policy as of `now`
    ///
    /// Public so maintenance paths and tests can force a rotation pass
    /// without storing a record.
    pub fn rotate(&self, now: &DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().expect("workflow memory poisoned");
        self.rotate_locked(&mut inner, now)
    }

    fn rotate_locked(&self, inner: &mut Inner, now: &DateTime<Utc>) -> Result<()> {
        let month_changed = inner
            .current_month
            .is_some_and(|(y, m)| (y, m) != (now.year(), now.month()));

        if month_changed {
            // Every in-memory record belongs to an older month now.
            let drained: Vec<WorkflowRecord> = inner.records.drain(..).collect();
            self.archive(&drained)?;
            inner.current_month = None;
            tracing::info!(archived = drained.len(), "monthly workflow rotation");
            return Ok(());
        }

        if inner.records.len() >= self.max_records {
            let overflow = inner.records.len() + 1 - self.max_records;
            let drained: Vec<WorkflowRecord> =
                inner.records.drain(..overflow).collect();
            self.archive(&drained)?;
            tracing::info!(archived = drained.len(), "workflow window overflow rotation");
        }

        Ok(())
    }

    /// Append records to archive files named by each record's month
    fn archive(&self, records: &[WorkflowRecord]) -> Result<()> {
        for record in records {
            let name = format!(
                "archive-{:04}-{:02}.jsonl",
                record.finished_at.year(),
                record.finished_at.month()
            );
            append_line(&self.dir.join(name), record)?;
        }
        Ok(())
    }

    /// Terminal record for a task id, if one exists
    pub fn find_by_task_id(&self, task_id: &str) -> Option<WorkflowRecord> {
        let inner = self.inner.lock().expect("workflow memory poisoned");
        inner
            .records
            .iter()
            .rev()
            .find(|r| r.task_id == task_id)
            .cloned()
    }

    /// Keyword search over task text and final output
    pub fn search(&self, query: &str, limit: usize) -> Vec<WorkflowRecord> {
        let needle = query.to_lowercase();
        let inner = self.inner.lock().expect("workflow memory poisoned");

        inner
            .records
            .iter()
            .rev()
            .filter(|r| {
                needle.is_empty()
                    || r.task_text.to_lowercase().contains(&needle)
                    || r.final_output.to_lowercase().contains(&needle)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Most recent records, newest first
    pub fn recent(&self, limit: usize) -> Vec<WorkflowRecord> {
        self.search("", limit)
    }

    /// Number of records currently held in memory
    pub fn len(&self) -> usize {
        self.inner.lock().expect("workflow memory poisoned").records.len()
    }

    /// True when no records are held in memory
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn monthly_file_name(now: &DateTime<Utc>) -> String {
    format!("workflows-{:04}-{:02}.jsonl", now.year(), now.month())
}

fn append_line(path: &Path, record: &WorkflowRecord) -> Result<()> {
    let line = serde_json::to_string(record)
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))?;

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    Ok(())
}
