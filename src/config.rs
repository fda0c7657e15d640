//! Explicit harness configuration.
//!
//! Everything the orchestrator needs — paths, limits, switches — is carried
//! here and passed in at construction. There is no ambient process-wide
//! state; the only environment variable the harness reads is the optional
//! visual-judge credential, and that is forwarded into evaluation sandboxes
//! only.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use crate::error::ConfigError;
use crate::suite::Task;

/// Environment variable holding the visual-judge API credential.
///
/// Required only by the evaluation phase's similarity judge; its absence
/// degrades that one scoring signal rather than aborting the run.
pub const JUDGE_API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Default per-attempt sandbox timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 1800;

/// Default evaluation worker count.
pub const DEFAULT_EVAL_WORKERS: usize = 4;

/// Default agent turn budget for one inference attempt.
pub const DEFAULT_MAX_TURNS: u32 = 10;

/// Configuration for one harness invocation.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Benchmark fixture root: `datasets/`, `gold_programs/`, `eval_programs/`,
    /// `tasks.jsonl`.
    pub benchmark_path: PathBuf,
    /// Root for run ledgers, per-task logs and predicted programs.
    pub output_dir: PathBuf,
    /// Logical experiment tag grouping this run's attempts.
    pub run_id: String,
    /// Agent turn budget per inference attempt.
    pub max_turns: u32,
    /// Hard wall-clock deadline per sandboxed attempt.
    pub timeout: Duration,
    /// Evaluation worker pool size.
    pub eval_workers: usize,
    pub skip_inference: bool,
    pub skip_evaluation: bool,
    pub force_reeval: bool,
    /// Docker image for inference sandboxes.
    pub agent_image: String,
    /// Docker image for evaluation sandboxes.
    pub eval_image: String,
    /// Docker network mode for sandboxes.
    pub network: String,
    /// Agent CLI binary invoked inside the inference sandbox.
    pub agent_cmd: String,
}

impl HarnessConfig {
    /// Path of the task suite fixture.
    pub fn tasks_path(&self) -> PathBuf {
        self.benchmark_path.join("tasks.jsonl")
    }

    /// Root of the per-run output tree.
    pub fn run_dir(&self) -> PathBuf {
        self.output_dir.join(&self.run_id)
    }

    /// Inference ledger file for this run.
    pub fn inference_ledger_path(&self) -> PathBuf {
        self.run_dir().join("inference.jsonl")
    }

    /// Evaluation ledger file for this run.
    pub fn evaluation_ledger_path(&self) -> PathBuf {
        self.run_dir().join("evaluation.jsonl")
    }

    /// Per-task log directory, partitioned by id so evaluation workers never
    /// contend on the same subtree.
    pub fn task_dir(&self, task_id: u32) -> PathBuf {
        self.run_dir().join("tasks").join(task_id.to_string())
    }

    /// Directory holding produced candidate programs.
    pub fn pred_programs_dir(&self) -> PathBuf {
        self.output_dir.join("pred_programs")
    }

    /// Path of the candidate program for one task.
    pub fn pred_program_path(&self, task: &Task) -> PathBuf {
        self.pred_programs_dir().join(task.pred_program_name())
    }

    /// Checks that the benchmark fixtures exist.
    ///
    /// Fatal before any work starts; a missing fixture tree can only produce
    /// a run full of error attempts.
    pub fn validate_fixtures(&self) -> Result<(), ConfigError> {
        for sub in ["datasets", "gold_programs", "eval_programs"] {
            let path = self.benchmark_path.join(sub);
            if !path.is_dir() {
                return Err(ConfigError::MissingFixture(path));
            }
        }
        let tasks = self.tasks_path();
        if !tasks.is_file() {
            return Err(ConfigError::MissingFixture(tasks));
        }
        Ok(())
    }

    /// Checks that the docker CLI is reachable.
    pub async fn ensure_docker_available(&self) -> Result<(), ConfigError> {
        let status = tokio::process::Command::new("docker")
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| ConfigError::DockerUnavailable(e.to_string()))?;
        if !status.success() {
            return Err(ConfigError::DockerUnavailable(format!(
                "docker version exited with {}",
                status.code().unwrap_or(-1)
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config(benchmark: PathBuf, output: PathBuf) -> HarnessConfig {
        HarnessConfig {
            benchmark_path: benchmark,
            output_dir: output,
            run_id: "r1".to_string(),
            max_turns: DEFAULT_MAX_TURNS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            eval_workers: DEFAULT_EVAL_WORKERS,
            skip_inference: false,
            skip_evaluation: false,
            force_reeval: false,
            agent_image: "bench.agent:latest".to_string(),
            eval_image: "bench.eval:latest".to_string(),
            network: "bridge".to_string(),
            agent_cmd: "claude".to_string(),
        }
    }

    #[test]
    fn test_paths_are_partitioned_by_run_and_task() {
        let cfg = config(PathBuf::from("/bench"), PathBuf::from("/out"));
        assert_eq!(
            cfg.inference_ledger_path(),
            PathBuf::from("/out/r1/inference.jsonl")
        );
        assert_eq!(cfg.task_dir(7), PathBuf::from("/out/r1/tasks/7"));
        assert_eq!(cfg.task_dir(8), PathBuf::from("/out/r1/tasks/8"));
    }

    #[test]
    fn test_validate_fixtures_reports_missing_subtree() {
        let dir = TempDir::new().unwrap();
        let bench = dir.path().join("bench");
        fs::create_dir_all(bench.join("datasets")).unwrap();
        // gold_programs missing

        let cfg = config(bench.clone(), dir.path().join("out"));
        let err = cfg.validate_fixtures().unwrap_err();
        assert!(err.to_string().contains("gold_programs"));
    }

    #[test]
    fn test_validate_fixtures_ok() {
        let dir = TempDir::new().unwrap();
        let bench = dir.path().join("bench");
        for sub in ["datasets", "gold_programs", "eval_programs"] {
            fs::create_dir_all(bench.join(sub)).unwrap();
        }
        fs::write(bench.join("tasks.jsonl"), "").unwrap();

        let cfg = config(bench, dir.path().join("out"));
        assert!(cfg.validate_fixtures().is_ok());
    }
}
