//! Append-only, crash-safe run ledger.
//!
//! One JSON line per concluded attempt. The ledger is the single source of
//! truth for "is this task already done": resume filters the task set against
//! existing entries instead of rewriting history. Writes are serialized
//! behind a mutex and emitted as one whole-line `write_all` + flush, so a
//! reader never observes an interleaved or partially visible record; a tail
//! truncated by a mid-write kill fails to parse and is skipped by the next
//! reader.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::attempt::{Attempt, Outcome, Phase};
use crate::error::LedgerError;

/// Durable, append-only record of concluded attempts.
pub struct Ledger {
    path: PathBuf,
    writer: Mutex<File>,
}

impl Ledger {
    /// Opens (creating if needed) the ledger file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| LedgerError::Open {
                path: path.clone(),
                source: e,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LedgerError::Open {
                path: path.clone(),
                source: e,
            })?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    /// Appends one attempt record durably before returning.
    ///
    /// The whole line is written under the writer lock; concurrent workers
    /// never interleave partial lines.
    pub fn append(&self, attempt: &Attempt) -> Result<(), LedgerError> {
        let mut line = serde_json::to_string(attempt)?;
        line.push('\n');

        let mut file = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Reads every parseable entry, oldest first.
    ///
    /// Unparsable lines (a truncated tail from a killed writer) are skipped
    /// with a warning rather than failing the read.
    pub fn entries(&self) -> Vec<Attempt> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        let mut entries = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Attempt>(line) {
                Ok(attempt) => entries.push(attempt),
                Err(e) => {
                    warn!(
                        ledger = %self.path.display(),
                        line = lineno + 1,
                        error = %e,
                        "Skipping unparsable ledger line"
                    );
                }
            }
        }
        entries
    }

    /// Entries matching one run id and phase, oldest first.
    pub fn entries_for(&self, run_id: &str, phase: Phase) -> Vec<Attempt> {
        self.entries()
            .into_iter()
            .filter(|a| a.run_id == run_id && a.phase == phase)
            .collect()
    }

    /// Task ids with at least one *concluded* (non-error) attempt for the
    /// given run id and phase.
    pub fn concluded_task_ids(&self, run_id: &str, phase: Phase) -> HashSet<u32> {
        self.entries_for(run_id, phase)
            .into_iter()
            .filter(|a| a.outcome.concluded())
            .map(|a| a.task_id)
            .collect()
    }

    /// Most recent outcome for (`task_id`, `phase`, `run_id`), or `None` if
    /// no attempt has been recorded.
    pub fn latest_outcome(&self, task_id: u32, phase: Phase, run_id: &str) -> Option<Outcome> {
        self.entries_for(run_id, phase)
            .into_iter()
            .filter(|a| a.task_id == task_id)
            .next_back()
            .map(|a| a.outcome)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
