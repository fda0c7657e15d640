//! Phase orchestrator.
//!
//! Drives the two phases across the resolved task set: inference strictly
//! one attempt at a time (the agent consumes a shared external turn quota
//! that is rate-limited and gains nothing from parallelism), evaluation
//! through the bounded worker pool. The two phases overlap across tasks: as
//! soon as a task's inference concludes it is enqueued for evaluation while
//! later tasks are still being inferred.

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::attempt::{Attempt, Phase};
use crate::config::HarnessConfig;
use crate::error::LedgerError;
use crate::executor::AttemptRunner;
use crate::ledger::Ledger;
use crate::resume::WorkPlan;
use crate::scheduler::{EvalJob, EvalPool, PoolError, PoolStats};
use crate::suite::{Suite, Task};

/// Errors fatal to the whole run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// What a run accomplished.
#[derive(Debug)]
pub struct RunSummary {
    pub inference_dispatched: usize,
    pub evaluation_stats: Option<PoolStats>,
    /// True when an operator interrupt stopped dispatch early. The ledger is
    /// consistent either way; a rerun with the same run id picks up the rest.
    pub interrupted: bool,
}

/// Sequences inference and evaluation over one run.
pub struct Orchestrator {
    config: Arc<HarnessConfig>,
    runner: Arc<dyn AttemptRunner>,
    inference_ledger: Arc<Ledger>,
    evaluation_ledger: Arc<Ledger>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<HarnessConfig>,
        runner: Arc<dyn AttemptRunner>,
        inference_ledger: Arc<Ledger>,
        evaluation_ledger: Arc<Ledger>,
    ) -> Self {
        Self {
            config,
            runner,
            inference_ledger,
            evaluation_ledger,
        }
    }

    /// Runs the work plan to completion (or until `shutdown` fires).
    pub async fn run(
        &self,
        suite: &Suite,
        plan: &WorkPlan,
        shutdown: broadcast::Sender<()>,
    ) -> Result<RunSummary, OrchestratorError> {
        let pending_inference: HashSet<u32> = plan.pending_inference.iter().copied().collect();
        let pending_evaluation: HashSet<u32> = plan.pending_evaluation.iter().copied().collect();

        let eval_enabled = !self.config.skip_evaluation && !plan.pending_evaluation.is_empty();
        let (eval_tx, pool) = if eval_enabled {
            let (tx, rx) = mpsc::channel(plan.pending_evaluation.len().max(1));
            let pool = EvalPool::spawn(
                Arc::clone(&self.config),
                Arc::clone(&self.runner),
                Arc::clone(&self.evaluation_ledger),
                rx,
                self.config.eval_workers,
                shutdown.clone(),
            );
            (Some(tx), Some(pool))
        } else {
            (None, None)
        };

        // Tasks whose inference concluded in an earlier invocation are
        // eligible for evaluation immediately.
        if let Some(tx) = &eval_tx {
            for &id in &plan.pending_evaluation {
                if pending_inference.contains(&id) {
                    continue;
                }
                if let Some(task) = suite.get(id) {
                    self.snapshot_task(task);
                    if tx.send(EvalJob { task: task.clone() }).await.is_err() {
                        break;
                    }
                }
            }
        }

        let mut shutdown_rx = shutdown.subscribe();
        let mut interrupted = false;
        let mut dispatched = 0usize;

        for &id in &plan.pending_inference {
            let Some(task) = suite.get(id) else {
                warn!(task_id = id, "Resolved task not present in suite; skipping");
                continue;
            };
            self.snapshot_task(task);

            info!(
                task_id = id,
                remaining = plan.pending_inference.len() - dispatched,
                "Dispatching inference"
            );

            // One attempt in flight at a time, run to conclusion before the
            // next begins. An operator interrupt cancels the in-flight
            // attempt; its sandbox tears itself down and no entry is
            // recorded, so the task is retried on resume.
            let attempt = tokio::select! {
                attempt = self.runner.run_attempt(task, Phase::Inference) => attempt,
                _ = shutdown_rx.recv() => {
                    info!(task_id = id, "Interrupt received; stopping inference dispatch");
                    interrupted = true;
                    break;
                }
            };

            self.inference_ledger.append(&attempt)?;
            self.snapshot_attempt(task, &attempt);
            dispatched += 1;

            if let Some(tx) = &eval_tx {
                if pending_evaluation.contains(&id) {
                    if attempt.outcome.concluded() {
                        let _ = tx.send(EvalJob { task: task.clone() }).await;
                    } else {
                        warn!(
                            task_id = id,
                            "Inference errored; task not eligible for evaluation"
                        );
                    }
                }
            }
        }

        // Close the queue so workers stop once it drains, then wait for the
        // pool — the run is complete only after every worker has finished.
        drop(eval_tx);
        let evaluation_stats = match pool {
            Some(pool) => Some(pool.join().await?),
            None => None,
        };

        if let Some(stats) = &evaluation_stats {
            info!(
                completed = stats.jobs_completed,
                failed = stats.jobs_failed,
                avg_ms = stats.average_job_duration.as_millis() as u64,
                "Evaluation pool drained"
            );
        }

        Ok(RunSummary {
            inference_dispatched: dispatched,
            evaluation_stats,
            interrupted,
        })
    }

    /// Writes the immutable task descriptor into the task's log directory.
    fn snapshot_task(&self, task: &Task) {
        let task_dir = self.config.task_dir(task.id);
        if fs::create_dir_all(&task_dir).is_err() {
            return;
        }
        if let Ok(json) = serde_json::to_string_pretty(task) {
            let _ = fs::write(task_dir.join("task.json"), json);
        }
    }

    /// Writes the concluded inference attempt into the task's log directory.
    fn snapshot_attempt(&self, task: &Task, attempt: &Attempt) {
        let task_dir = self.config.task_dir(task.id);
        match serde_json::to_string_pretty(attempt) {
            Ok(json) => {
                if let Err(e) = fs::write(task_dir.join("inference.json"), json) {
                    warn!(task_id = task.id, error = %e, "Failed to write inference snapshot");
                }
            }
            Err(e) => warn!(task_id = task.id, error = %e, "Failed to serialize inference snapshot"),
        }
    }
}
