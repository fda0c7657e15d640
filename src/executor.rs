//! Sandboxed attempt executor.
//!
//! Runs one task's inference or evaluation command inside an isolated
//! container with a hard deadline and classifies the result: `timeout` when
//! the deadline is hit (the sandbox is force-terminated and torn down before
//! returning), `error` when the harness could not run the phase at all,
//! `failure` when the phase ran but produced a wrong or invalid result,
//! `success` otherwise. Workspace teardown happens on every exit path via
//! scoped `TaskWorkspace` ownership.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::attempt::{Attempt, Outcome, Phase};
use crate::config::{HarnessConfig, JUDGE_API_KEY_VAR};
use crate::extract::{extract_candidate_program, extract_cost_usd, ERROR_SENTINEL};
use crate::prompts::WORKSPACE_ROOT;
use crate::sandbox::{Sandbox, SandboxConfig, SandboxRun};
use crate::suite::Task;
use crate::workspace::{TaskWorkspace, PROMPT_FILE};

/// Transcript file name inside the per-task log directory.
const TRANSCRIPT_FILE: &str = "transcript.jsonl";

/// Report file the evaluation fixture writes at the workspace root.
const REPORT_FILE: &str = "report.json";

/// Seam between scheduling and sandbox execution.
///
/// The orchestrator and the evaluation pool only know this trait; tests
/// substitute a stub runner to exercise scheduling behavior without Docker.
#[async_trait]
pub trait AttemptRunner: Send + Sync {
    /// Runs one phase for one task to conclusion. Never panics and never
    /// returns early without a concluded attempt; infrastructure faults are
    /// reported as `outcome = error` on the attempt itself.
    async fn run_attempt(&self, task: &Task, phase: Phase) -> Attempt;
}

/// What the opaque evaluation fixture reports back.
#[derive(Debug, Deserialize)]
struct EvalReport {
    passed: bool,
    #[serde(default)]
    similarity: Option<f64>,
}

/// Attempt record for a sandbox run that hit its hard deadline. The sandbox
/// has already been torn down by the time this is called.
fn timeout_attempt(
    task_id: u32,
    phase: Phase,
    run_id: String,
    started_at: DateTime<Utc>,
    duration_secs: f64,
    run: &SandboxRun,
) -> Attempt {
    let mut attempt = Attempt::new(
        task_id,
        phase,
        run_id,
        started_at,
        duration_secs,
        run.exit_code,
        Outcome::Timeout,
    );
    attempt.diagnostic = Some(run.stderr.clone());
    attempt
}

/// Classifies a concluded (non-timeout) evaluation run from its exit code
/// and parsed report. A clean exit with a report is `success` whatever the
/// verdict; `passed` carries the verdict itself.
fn classify_evaluation(
    task_id: u32,
    run_id: String,
    started_at: DateTime<Utc>,
    duration_secs: f64,
    run: &SandboxRun,
    report: Option<EvalReport>,
    report_path: &Path,
) -> Attempt {
    let mut attempt = match (run.exit_code, report) {
        (0, Some(report)) => {
            let mut a = Attempt::new(
                task_id,
                Phase::Evaluation,
                run_id,
                started_at,
                duration_secs,
                0,
                Outcome::Success,
            )
            .with_artifact(report_path);
            a.passed = Some(report.passed);
            a.score = report.similarity;
            a
        }
        (0, None) => Attempt::new(
            task_id,
            Phase::Evaluation,
            run_id,
            started_at,
            duration_secs,
            0,
            Outcome::Failure,
        )
        .with_diagnostic("evaluation produced no parseable report"),
        (code, _) => Attempt::new(
            task_id,
            Phase::Evaluation,
            run_id,
            started_at,
            duration_secs,
            code,
            Outcome::Failure,
        )
        .with_diagnostic(truncate(&run.stderr, 500)),
    };

    if attempt.passed.is_none() && attempt.outcome == Outcome::Success {
        attempt.passed = Some(false);
    }
    attempt
}

/// Docker-backed [`AttemptRunner`].
pub struct SandboxRunner {
    config: Arc<HarnessConfig>,
}

impl SandboxRunner {
    pub fn new(config: Arc<HarnessConfig>) -> Self {
        Self { config }
    }

    async fn run_inference(&self, task: &Task) -> Attempt {
        let started_at = Utc::now();
        let start = Instant::now();
        let run_id = self.config.run_id.clone();
        let pred_path = self.config.pred_program_path(task);

        let task_dir = self.config.task_dir(task.id);
        if let Err(e) = fs::create_dir_all(&task_dir) {
            return Attempt::infra_error(
                task.id,
                Phase::Inference,
                run_id,
                started_at,
                start.elapsed().as_secs_f64(),
                format!("failed to create task log dir: {}", e),
            );
        }

        let workspace = match TaskWorkspace::stage_inference(&self.config, task) {
            Ok(ws) => ws,
            Err(e) => {
                self.write_error_placeholder(task);
                return Attempt::infra_error(
                    task.id,
                    Phase::Inference,
                    run_id,
                    started_at,
                    start.elapsed().as_secs_f64(),
                    e.to_string(),
                );
            }
        };

        // Prompt is read from a file inside the sandbox to avoid shell
        // escaping; HOME points at the workspace so the agent finds its
        // config there.
        let agent_line = format!(
            "{} -p --dangerously-skip-permissions --max-turns {} --verbose --output-format stream-json \"$(cat {}/{})\" 2>&1",
            self.config.agent_cmd,
            self.config.max_turns,
            WORKSPACE_ROOT,
            PROMPT_FILE,
        );
        let command = vec!["bash".to_string(), "-c".to_string(), agent_line];

        let sandbox_config = SandboxConfig::new(&self.config.agent_image)
            .with_network(&self.config.network)
            .with_env("HOME", WORKSPACE_ROOT)
            .with_env("CI", "true");
        let sandbox = Sandbox::new(sandbox_config, workspace.root());

        let run = match sandbox.run(&command, self.config.timeout).await {
            Ok(run) => run,
            Err(e) => {
                self.write_error_placeholder(task);
                return Attempt::infra_error(
                    task.id,
                    Phase::Inference,
                    run_id,
                    started_at,
                    start.elapsed().as_secs_f64(),
                    e.to_string(),
                );
            }
        };

        // Persist the full interaction transcript whatever the outcome.
        let transcript_path = task_dir.join(TRANSCRIPT_FILE);
        if let Err(e) = fs::write(&transcript_path, &run.stdout) {
            warn!(task_id = task.id, error = %e, "Failed to persist transcript");
        }

        let duration = start.elapsed().as_secs_f64();

        if run.timed_out {
            self.write_error_placeholder(task);
            return timeout_attempt(task.id, Phase::Inference, run_id, started_at, duration, &run);
        }

        let code = extract_candidate_program(workspace.root(), &run.stdout);
        let extracted = code != ERROR_SENTINEL;
        if let Err(e) = self.write_pred_program(task, &code) {
            return Attempt::infra_error(
                task.id,
                Phase::Inference,
                run_id,
                started_at,
                duration,
                format!("failed to write candidate program: {}", e),
            );
        }

        let outcome = if extracted {
            Outcome::Success
        } else {
            Outcome::Failure
        };
        let mut attempt = Attempt::new(
            task.id,
            Phase::Inference,
            run_id,
            started_at,
            duration,
            run.exit_code,
            outcome,
        )
        .with_artifact(&pred_path);
        attempt.cost_usd = extract_cost_usd(&run.stdout);
        if !extracted {
            attempt.diagnostic = Some("no candidate program found in workspace or transcript".to_string());
        } else if run.exit_code != 0 {
            attempt.diagnostic = Some(format!("agent exited with code {}", run.exit_code));
        }

        info!(
            task_id = task.id,
            outcome = %attempt.outcome,
            duration_secs = format!("{:.1}", duration),
            "Inference attempt concluded"
        );
        attempt
    }

    async fn run_evaluation(&self, task: &Task) -> Attempt {
        let started_at = Utc::now();
        let start = Instant::now();
        let run_id = self.config.run_id.clone();

        let task_dir = self.config.task_dir(task.id);
        if let Err(e) = fs::create_dir_all(&task_dir) {
            return Attempt::infra_error(
                task.id,
                Phase::Evaluation,
                run_id,
                started_at,
                start.elapsed().as_secs_f64(),
                format!("failed to create task log dir: {}", e),
            );
        }

        let workspace = match TaskWorkspace::stage_evaluation(&self.config, task) {
            Ok(ws) => ws,
            Err(e) => {
                return Attempt::infra_error(
                    task.id,
                    Phase::Evaluation,
                    run_id,
                    started_at,
                    start.elapsed().as_secs_f64(),
                    e.to_string(),
                );
            }
        };

        let command = vec![
            "python".to_string(),
            format!("eval/{}", task.eval_program_name()),
        ];

        let mut sandbox_config =
            SandboxConfig::new(&self.config.eval_image).with_network(&self.config.network);
        // Visual-judge credential: evaluation phase only; absence degrades
        // the similarity signal instead of aborting.
        match std::env::var(JUDGE_API_KEY_VAR) {
            Ok(key) if !key.is_empty() => {
                sandbox_config = sandbox_config.with_env(JUDGE_API_KEY_VAR, key);
            }
            _ => {
                warn!(
                    task_id = task.id,
                    "{} not set; similarity scoring degraded", JUDGE_API_KEY_VAR
                );
            }
        }
        let sandbox = Sandbox::new(sandbox_config, workspace.root());

        let run = match sandbox.run(&command, self.config.timeout).await {
            Ok(run) => run,
            Err(e) => {
                return Attempt::infra_error(
                    task.id,
                    Phase::Evaluation,
                    run_id,
                    started_at,
                    start.elapsed().as_secs_f64(),
                    e.to_string(),
                );
            }
        };

        let duration = start.elapsed().as_secs_f64();

        if run.timed_out {
            return timeout_attempt(task.id, Phase::Evaluation, run_id, started_at, duration, &run);
        }

        // Persist the report next to the task logs before the workspace goes.
        let report_src = workspace.root().join(REPORT_FILE);
        let report_dst = task_dir.join(REPORT_FILE);
        let report: Option<EvalReport> = fs::read_to_string(&report_src)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok());
        if report_src.is_file() {
            if let Err(e) = fs::copy(&report_src, &report_dst) {
                warn!(task_id = task.id, error = %e, "Failed to persist evaluation report");
            }
        }

        let attempt = classify_evaluation(
            task.id,
            run_id,
            started_at,
            duration,
            &run,
            report,
            &report_dst,
        );

        info!(
            task_id = task.id,
            outcome = %attempt.outcome,
            passed = ?attempt.passed,
            score = ?attempt.score,
            "Evaluation attempt concluded"
        );
        attempt
    }

    /// Writes the extracted candidate program for a task.
    fn write_pred_program(&self, task: &Task, code: &str) -> std::io::Result<()> {
        fs::create_dir_all(self.config.pred_programs_dir())?;
        fs::write(self.config.pred_program_path(task), code)
    }

    /// Writes the `ERROR` placeholder so evaluation bookkeeping can proceed
    /// even when inference never produced a program.
    fn write_error_placeholder(&self, task: &Task) {
        if let Err(e) = self.write_pred_program(task, ERROR_SENTINEL) {
            warn!(task_id = task.id, error = %e, "Failed to write error placeholder");
        }
    }
}

#[async_trait]
impl AttemptRunner for SandboxRunner {
    async fn run_attempt(&self, task: &Task, phase: Phase) -> Attempt {
        match phase {
            Phase::Inference => self.run_inference(task).await,
            Phase::Evaluation => self.run_evaluation(task).await,
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
