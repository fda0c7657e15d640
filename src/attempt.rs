//! Attempt records: one execution of one phase for one task.
//!
//! An [`Attempt`] is created when a phase starts for a task and becomes
//! immutable once appended to a ledger. A later attempt with the same
//! (`task_id`, `phase`, `run_id`) supersedes it without rewriting history.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which half of the benchmark pipeline an attempt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Produce a candidate program inside an isolated sandbox.
    Inference,
    /// Execute the candidate against gold fixtures and score it.
    Evaluation,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Inference => write!(f, "inference"),
            Phase::Evaluation => write!(f, "evaluation"),
        }
    }
}

/// Terminal classification of a concluded attempt.
///
/// `Failure` means the sandboxed phase ran but produced a wrong or invalid
/// result. `Error` means the harness itself could not run the phase (sandbox
/// failed to start, resource exhaustion). The two are never conflated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
    Error,
}

impl Outcome {
    /// Whether the attempt concluded with the phase actually having run.
    ///
    /// Resume treats `error` attempts as not-done so they are retried on the
    /// next invocation; everything else counts as concluded work.
    pub fn concluded(self) -> bool {
        !matches!(self, Outcome::Error)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure => write!(f, "failure"),
            Outcome::Timeout => write!(f, "timeout"),
            Outcome::Error => write!(f, "error"),
        }
    }
}

/// One concluded execution of one phase for one task under one run id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// Task the attempt belongs to.
    pub task_id: u32,
    /// Inference or evaluation.
    pub phase: Phase,
    /// Logical experiment tag; independent runs over the same suite coexist.
    pub run_id: String,
    /// When the attempt was dispatched.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration of the sandboxed execution.
    pub duration_secs: f64,
    /// Exit code of the sandboxed command (-1 if it never produced one).
    pub exit_code: i32,
    /// Terminal classification.
    pub outcome: Outcome,
    /// Produced program (inference) or evaluation report (evaluation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    /// Visual-similarity score, evaluation attempts only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Whether the correctness check passed, evaluation attempts only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    /// API cost of the agent interaction, inference attempts only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Human-readable diagnostic for `failure`/`timeout`/`error` outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl Attempt {
    /// Creates a concluded attempt with the given outcome and no artifacts.
    pub fn new(
        task_id: u32,
        phase: Phase,
        run_id: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_secs: f64,
        exit_code: i32,
        outcome: Outcome,
    ) -> Self {
        Self {
            task_id,
            phase,
            run_id: run_id.into(),
            started_at,
            duration_secs,
            exit_code,
            outcome,
            artifact_path: None,
            score: None,
            passed: None,
            cost_usd: None,
            diagnostic: None,
        }
    }

    /// Creates an `error` attempt for a phase the harness could not run.
    pub fn infra_error(
        task_id: u32,
        phase: Phase,
        run_id: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_secs: f64,
        diagnostic: impl Into<String>,
    ) -> Self {
        let mut attempt = Self::new(
            task_id,
            phase,
            run_id,
            started_at,
            duration_secs,
            -1,
            Outcome::Error,
        );
        attempt.diagnostic = Some(diagnostic.into());
        attempt
    }

    /// Sets the artifact path.
    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_path = Some(path.into());
        self
    }

    /// Sets the diagnostic message.
    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }
}
