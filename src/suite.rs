//! The benchmark task suite.
//!
//! Tasks are immutable descriptors loaded once from the benchmark fixtures
//! (`<benchmark>/tasks.jsonl`, one JSON object per line) and never mutated.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Immutable descriptor of one benchmark task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Positive integer, unique within the suite.
    pub id: u32,
    /// Category label (e.g. "bioinformatics", "geoinformatics").
    pub domain: String,
    /// Free-text task prompt handed to the agent.
    pub instruction: String,
    /// File name of the held-out gold program.
    pub gold_program_name: String,
    /// File name of the expected output artifact.
    pub expected_output_name: String,
    /// Name of the dataset subtree staged into the inference workspace.
    pub dataset_folder: String,
}

impl Task {
    /// File name of the candidate program this task's inference produces.
    pub fn pred_program_name(&self) -> String {
        format!("pred_{}", self.gold_program_name)
    }

    /// File name of the opaque evaluation fixture for this task.
    pub fn eval_program_name(&self) -> String {
        format!("eval_{}", self.gold_program_name)
    }
}

/// The full, ordered task suite.
#[derive(Debug, Clone)]
pub struct Suite {
    tasks: Vec<Task>,
}

impl Suite {
    /// Loads the suite from a JSONL fixture file.
    ///
    /// Ids must cover `1..=N` with no gaps; tasks are sorted by id so
    /// positional iteration matches dispatch order.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingFixture(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;

        let mut tasks = Vec::new();
        let mut seen = HashSet::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let task: Task =
                serde_json::from_str(line).map_err(|e| ConfigError::InvalidSuite {
                    path: path.to_path_buf(),
                    reason: format!("line {}: {}", lineno + 1, e),
                })?;
            if task.id == 0 {
                return Err(ConfigError::InvalidSuite {
                    path: path.to_path_buf(),
                    reason: format!("line {}: task id must be positive", lineno + 1),
                });
            }
            if !seen.insert(task.id) {
                return Err(ConfigError::InvalidSuite {
                    path: path.to_path_buf(),
                    reason: format!("duplicate task id {}", task.id),
                });
            }
            tasks.push(task);
        }

        if tasks.is_empty() {
            return Err(ConfigError::InvalidSuite {
                path: path.to_path_buf(),
                reason: "suite contains no tasks".to_string(),
            });
        }

        tasks.sort_by_key(|t| t.id);

        // Ids must cover 1..=N exactly; selection resolves ranges against the
        // suite size and a gap would silently shrink "all".
        for (index, task) in tasks.iter().enumerate() {
            let expected = index as u32 + 1;
            if task.id != expected {
                return Err(ConfigError::InvalidSuite {
                    path: path.to_path_buf(),
                    reason: format!(
                        "task ids must be contiguous from 1: expected {}, found {}",
                        expected, task.id
                    ),
                });
            }
        }

        Ok(Self { tasks })
    }

    /// Number of tasks in the suite.
    pub fn len(&self) -> u32 {
        self.tasks.len() as u32
    }

    /// Whether the suite is empty (never true for a loaded suite).
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Looks a task up by id.
    pub fn get(&self, id: u32) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Iterates over all tasks in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }
}
