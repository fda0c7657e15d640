//! Concurrent evaluation scheduler.
//!
//! A fixed-size worker pool drains a queue of pending evaluation jobs. Each
//! worker owns one sandbox at a time; completion order across workers is not
//! guaranteed. One worker's fault on one task is recorded as an `error`
//! attempt and the worker moves on — only a ledger write fault aborts the
//! pool, because an unrecorded outcome breaks the resume invariant.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::attempt::{Attempt, Outcome, Phase};
use crate::config::HarnessConfig;
use crate::error::LedgerError;
use crate::executor::AttemptRunner;
use crate::ledger::Ledger;
use crate::suite::Task;

/// One pending evaluation.
#[derive(Debug, Clone)]
pub struct EvalJob {
    pub task: Task,
}

/// Errors that abort the whole pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("ledger write failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("worker task aborted: {0}")]
    WorkerAborted(String),
}

/// Snapshot of pool statistics.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub num_workers: usize,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub average_job_duration: Duration,
}

/// Shared counters the workers update.
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
        }
    }

    fn record(&self, ok: bool, duration: Duration) {
        if ok {
            self.jobs_completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.jobs_failed.fetch_add(1, Ordering::SeqCst);
        }
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn snapshot(&self, num_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total = completed + failed;
        let average = if total > 0 {
            Duration::from_millis(self.total_duration_ms.load(Ordering::SeqCst) / total)
        } else {
            Duration::ZERO
        };
        PoolStats {
            num_workers,
            jobs_completed: completed,
            jobs_failed: failed,
            average_job_duration: average,
        }
    }
}

/// Fixed-size worker pool over a single-producer/multi-consumer queue.
pub struct EvalPool {
    handles: Vec<JoinHandle<Result<(), PoolError>>>,
    stats: Arc<SharedPoolStats>,
    num_workers: usize,
}

impl EvalPool {
    /// Spawns `num_workers` workers draining `rx`.
    ///
    /// The pool stops when the queue closes (sender dropped) and is empty,
    /// or when `shutdown` fires.
    pub fn spawn(
        config: Arc<HarnessConfig>,
        runner: Arc<dyn AttemptRunner>,
        ledger: Arc<Ledger>,
        rx: mpsc::Receiver<EvalJob>,
        num_workers: usize,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        let rx = Arc::new(Mutex::new(rx));
        let stats = Arc::new(SharedPoolStats::new());

        let mut handles = Vec::with_capacity(num_workers);
        for i in 0..num_workers {
            let worker = Worker {
                id: format!("eval-worker-{}", i),
                config: Arc::clone(&config),
                runner: Arc::clone(&runner),
                ledger: Arc::clone(&ledger),
                rx: Arc::clone(&rx),
                stats: Arc::clone(&stats),
                shutdown_rx: shutdown.subscribe(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        info!(num_workers, "Evaluation pool started");
        Self {
            handles,
            stats,
            num_workers,
        }
    }

    /// Waits for every worker to finish and returns final statistics.
    ///
    /// The first fatal worker error (ledger fault) is propagated after the
    /// remaining workers have been joined.
    pub async fn join(self) -> Result<PoolStats, PoolError> {
        let mut first_error = None;
        for handle in self.handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(join_err) => {
                    error!(error = %join_err, "Evaluation worker panicked");
                    if first_error.is_none() {
                        first_error = Some(PoolError::WorkerAborted(join_err.to_string()));
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(self.stats.snapshot(self.num_workers)),
        }
    }
}

struct Worker {
    id: String,
    config: Arc<HarnessConfig>,
    runner: Arc<dyn AttemptRunner>,
    ledger: Arc<Ledger>,
    rx: Arc<Mutex<mpsc::Receiver<EvalJob>>>,
    stats: Arc<SharedPoolStats>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl Worker {
    async fn run(mut self) -> Result<(), PoolError> {
        loop {
            let job = tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                job = Self::next_job(&self.rx) => match job {
                    Some(job) => job,
                    None => break, // queue closed and drained
                },
            };
            self.process(job).await?;
        }
        Ok(())
    }

    async fn next_job(rx: &Arc<Mutex<mpsc::Receiver<EvalJob>>>) -> Option<EvalJob> {
        rx.lock().await.recv().await
    }

    async fn process(&self, job: EvalJob) -> Result<(), PoolError> {
        let task = job.task;
        let start = Instant::now();
        info!(worker_id = %self.id, task_id = task.id, "Evaluating task");

        // An evaluation fault (including a runner panic) is isolated to this
        // task; siblings keep draining the queue.
        let attempt = {
            let runner = Arc::clone(&self.runner);
            let task_for_runner = task.clone();
            let handle = tokio::spawn(async move {
                runner.run_attempt(&task_for_runner, Phase::Evaluation).await
            });
            match handle.await {
                Ok(attempt) => attempt,
                Err(join_err) => {
                    warn!(
                        worker_id = %self.id,
                        task_id = task.id,
                        error = %join_err,
                        "Evaluation attempt panicked; recording error outcome"
                    );
                    Attempt::infra_error(
                        task.id,
                        Phase::Evaluation,
                        self.config.run_id.clone(),
                        Utc::now(),
                        start.elapsed().as_secs_f64(),
                        format!("evaluation panicked: {}", join_err),
                    )
                }
            }
        };

        // Unrecorded outcomes break resume; a write fault here is fatal.
        self.ledger.append(&attempt)?;

        let task_dir = self.config.task_dir(task.id);
        persist_attempt_snapshot(&task_dir, &attempt);
        let passed = attempt.outcome == Outcome::Success && attempt.passed == Some(true);
        write_status_marker(&task_dir, passed);

        self.stats.record(passed, start.elapsed());
        Ok(())
    }
}

/// Writes the evaluation attempt snapshot into the task's log directory.
fn persist_attempt_snapshot(task_dir: &Path, attempt: &Attempt) {
    if let Err(e) = fs::create_dir_all(task_dir) {
        warn!(error = %e, "Failed to create task log dir for snapshot");
        return;
    }
    match serde_json::to_string_pretty(attempt) {
        Ok(json) => {
            if let Err(e) = fs::write(task_dir.join("evaluation.json"), json) {
                warn!(error = %e, "Failed to write evaluation snapshot");
            }
        }
        Err(e) => warn!(error = %e, "Failed to serialize evaluation snapshot"),
    }
}

/// Writes the terminal `PASSED`/`FAILED` marker, replacing any marker a
/// previous attempt left behind.
pub fn write_status_marker(task_dir: &Path, passed: bool) {
    if let Err(e) = fs::create_dir_all(task_dir) {
        warn!(error = %e, "Failed to create task log dir for status marker");
        return;
    }
    let (marker, stale) = if passed {
        ("PASSED", "FAILED")
    } else {
        ("FAILED", "PASSED")
    };
    let _ = fs::remove_file(task_dir.join(stale));
    if let Err(e) = fs::write(task_dir.join(marker), "") {
        warn!(error = %e, marker, "Failed to write status marker");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_MAX_TURNS, DEFAULT_TIMEOUT_SECS};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tempfile::TempDir;

    struct StubRunner {
        /// Task ids whose evaluation should be reported as failed.
        failing: HashSet<u32>,
        /// Task ids whose evaluation should panic.
        panicking: HashSet<u32>,
    }

    #[async_trait]
    impl AttemptRunner for StubRunner {
        async fn run_attempt(&self, task: &Task, phase: Phase) -> Attempt {
            assert_eq!(phase, Phase::Evaluation);
            if self.panicking.contains(&task.id) {
                panic!("boom");
            }
            let outcome = if self.failing.contains(&task.id) {
                Outcome::Failure
            } else {
                Outcome::Success
            };
            let mut attempt =
                Attempt::new(task.id, phase, "r1", Utc::now(), 0.1, 0, outcome);
            attempt.passed = Some(outcome == Outcome::Success);
            attempt
        }
    }

    fn test_config(dir: &TempDir) -> Arc<HarnessConfig> {
        Arc::new(HarnessConfig {
            benchmark_path: dir.path().join("bench"),
            output_dir: dir.path().join("out"),
            run_id: "r1".to_string(),
            max_turns: DEFAULT_MAX_TURNS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            eval_workers: 3,
            skip_inference: false,
            skip_evaluation: false,
            force_reeval: false,
            agent_image: "img".to_string(),
            eval_image: "img".to_string(),
            network: "none".to_string(),
            agent_cmd: "claude".to_string(),
        })
    }

    fn test_task(id: u32) -> Task {
        Task {
            id,
            domain: "bio".to_string(),
            instruction: "x".to_string(),
            gold_program_name: format!("t{}.py", id),
            expected_output_name: "o.csv".to_string(),
            dataset_folder: "d".to_string(),
        }
    }

    async fn run_pool(
        config: Arc<HarnessConfig>,
        runner: Arc<dyn AttemptRunner>,
        ledger: Arc<Ledger>,
        tasks: Vec<Task>,
        workers: usize,
    ) -> PoolStats {
        let (tx, rx) = mpsc::channel(tasks.len().max(1));
        let (shutdown_tx, _) = broadcast::channel(1);
        let pool = EvalPool::spawn(config, runner, ledger, rx, workers, shutdown_tx);
        for task in tasks {
            tx.send(EvalJob { task }).await.unwrap();
        }
        drop(tx);
        pool.join().await.unwrap()
    }

    #[tokio::test]
    async fn test_pool_drains_all_jobs() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let ledger = Arc::new(Ledger::open(config.evaluation_ledger_path()).unwrap());
        let runner = Arc::new(StubRunner {
            failing: HashSet::new(),
            panicking: HashSet::new(),
        });

        let tasks: Vec<Task> = (1..=10).map(test_task).collect();
        let stats = run_pool(config.clone(), runner, Arc::clone(&ledger), tasks, 3).await;

        assert_eq!(stats.jobs_completed, 10);
        let ids = ledger.concluded_task_ids("r1", Phase::Evaluation);
        assert_eq!(ids.len(), 10);
    }

    #[tokio::test]
    async fn test_one_panicking_task_does_not_block_siblings() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let ledger = Arc::new(Ledger::open(config.evaluation_ledger_path()).unwrap());
        let runner = Arc::new(StubRunner {
            failing: HashSet::new(),
            panicking: HashSet::from([4]),
        });

        let tasks: Vec<Task> = (1..=8).map(test_task).collect();
        let stats = run_pool(config.clone(), runner, Arc::clone(&ledger), tasks, 2).await;

        // All eight attempts were recorded; the panicking one as error.
        assert_eq!(ledger.entries_for("r1", Phase::Evaluation).len(), 8);
        assert_eq!(
            ledger.latest_outcome(4, Phase::Evaluation, "r1"),
            Some(Outcome::Error)
        );
        assert_eq!(stats.jobs_completed + stats.jobs_failed, 8);
    }

    #[tokio::test]
    async fn test_status_markers_reflect_outcomes() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let ledger = Arc::new(Ledger::open(config.evaluation_ledger_path()).unwrap());
        let runner = Arc::new(StubRunner {
            failing: HashSet::from([2]),
            panicking: HashSet::new(),
        });

        let tasks: Vec<Task> = vec![test_task(1), test_task(2)];
        run_pool(config.clone(), runner, ledger, tasks, 2).await;

        assert!(config.task_dir(1).join("PASSED").exists());
        assert!(config.task_dir(2).join("FAILED").exists());
        assert!(!config.task_dir(2).join("PASSED").exists());
    }

    #[tokio::test]
    async fn test_shutdown_stops_dispatch() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let ledger = Arc::new(Ledger::open(config.evaluation_ledger_path()).unwrap());
        let runner = Arc::new(StubRunner {
            failing: HashSet::new(),
            panicking: HashSet::new(),
        });

        let (tx, rx) = mpsc::channel(4);
        let (shutdown_tx, _) = broadcast::channel(1);
        let pool = EvalPool::spawn(
            config,
            runner,
            ledger,
            rx,
            2,
            shutdown_tx.clone(),
        );
        shutdown_tx.send(()).unwrap();
        let stats = pool.join().await.unwrap();
        drop(tx);

        assert_eq!(stats.jobs_completed + stats.jobs_failed, 0);
    }

    #[test]
    fn test_write_status_marker_replaces_stale_marker() {
        let dir = TempDir::new().unwrap();
        let task_dir = dir.path().join("t1");
        write_status_marker(&task_dir, false);
        assert!(task_dir.join("FAILED").exists());

        // Forced re-evaluation flipping the result replaces the marker.
        write_status_marker(&task_dir, true);
        assert!(task_dir.join("PASSED").exists());
        assert!(!task_dir.join("FAILED").exists());
    }

    #[test]
    fn test_stats_snapshot_average() {
        let stats = SharedPoolStats::new();
        stats.record(true, Duration::from_millis(100));
        stats.record(false, Duration::from_millis(300));
        let snap = stats.snapshot(2);
        assert_eq!(snap.jobs_completed, 1);
        assert_eq!(snap.jobs_failed, 1);
        assert_eq!(snap.average_job_duration, Duration::from_millis(200));
    }
}
