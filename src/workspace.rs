//! Per-task workspaces.
//!
//! A workspace is the filesystem boundary for one attempt: it contains only
//! the inputs the phase is permitted to see and the outputs the phase
//! produces. Inference sees the task's dataset and nothing else — gold
//! programs and evaluation fixtures must never be staged into an inference
//! workspace. Evaluation additionally sees the candidate program and the
//! gold/eval fixtures.
//!
//! Backed by `TempDir`: the tree is removed when the workspace is dropped,
//! on every exit path (normal completion, timeout, cancellation, fault).

use std::fs;
use std::path::Path;

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::HarnessConfig;
use crate::prompts;
use crate::suite::Task;

/// Name of the prompt file handed to the agent (read via `cat` inside the
/// sandbox to avoid shell escaping).
pub const PROMPT_FILE: &str = "task_prompt.txt";

/// Directory the candidate program writes its outputs to.
pub const PRED_RESULTS_DIR: &str = "pred_results";

/// Errors staging a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("workspace setup failed: {0}")]
    Setup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transient, exclusively-owned filesystem tree for one attempt.
#[derive(Debug)]
pub struct TaskWorkspace {
    dir: TempDir,
}

impl TaskWorkspace {
    /// Stages an inference workspace: dataset subtree, empty `pred_results/`,
    /// and the task prompt. Never the gold program or evaluation fixtures.
    pub fn stage_inference(config: &HarnessConfig, task: &Task) -> Result<Self, WorkspaceError> {
        let dir = TempDir::with_prefix(format!("bench-forge-{}-", task.id))?;
        let root = dir.path();

        fs::create_dir_all(root.join(PRED_RESULTS_DIR))?;

        let src_dataset = config
            .benchmark_path
            .join("datasets")
            .join(&task.dataset_folder);
        let dst_dataset = root
            .join("benchmark")
            .join("datasets")
            .join(&task.dataset_folder);
        if src_dataset.is_dir() {
            copy_dir_recursive(&src_dataset, &dst_dataset)?;
        } else {
            warn!(
                task_id = task.id,
                dataset = %src_dataset.display(),
                "Dataset not found; staging empty workspace"
            );
            fs::create_dir_all(&dst_dataset)?;
        }

        fs::write(root.join(PROMPT_FILE), prompts::format_task_prompt(task))?;

        debug!(task_id = task.id, root = %root.display(), "Inference workspace staged");
        Ok(Self { dir })
    }

    /// Stages an evaluation workspace: dataset subtree, candidate program,
    /// gold program and the opaque evaluation fixture.
    pub fn stage_evaluation(config: &HarnessConfig, task: &Task) -> Result<Self, WorkspaceError> {
        let dir = TempDir::with_prefix(format!("bench-forge-eval-{}-", task.id))?;
        let root = dir.path();

        fs::create_dir_all(root.join(PRED_RESULTS_DIR))?;

        let src_dataset = config
            .benchmark_path
            .join("datasets")
            .join(&task.dataset_folder);
        if src_dataset.is_dir() {
            copy_dir_recursive(
                &src_dataset,
                &root
                    .join("benchmark")
                    .join("datasets")
                    .join(&task.dataset_folder),
            )?;
        }

        let pred_src = config.pred_program_path(task);
        if !pred_src.is_file() {
            return Err(WorkspaceError::Setup(format!(
                "candidate program missing: {}",
                pred_src.display()
            )));
        }
        fs::copy(&pred_src, root.join(task.pred_program_name()))?;

        let gold_src = config
            .benchmark_path
            .join("gold_programs")
            .join(&task.gold_program_name);
        if !gold_src.is_file() {
            return Err(WorkspaceError::Setup(format!(
                "gold program missing: {}",
                gold_src.display()
            )));
        }
        let gold_dir = root.join("gold");
        fs::create_dir_all(&gold_dir)?;
        fs::copy(&gold_src, gold_dir.join(&task.gold_program_name))?;

        let eval_src = config
            .benchmark_path
            .join("eval_programs")
            .join(task.eval_program_name());
        if !eval_src.is_file() {
            return Err(WorkspaceError::Setup(format!(
                "evaluation fixture missing: {}",
                eval_src.display()
            )));
        }
        let eval_dir = root.join("eval");
        fs::create_dir_all(&eval_dir)?;
        fs::copy(&eval_src, eval_dir.join(task.eval_program_name()))?;

        debug!(task_id = task.id, root = %root.display(), "Evaluation workspace staged");
        Ok(Self { dir })
    }

    /// Host path of the workspace root.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    if !dst.exists() {
        fs::create_dir_all(dst)?;
    }
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let dest_path = dst.join(entry.file_name());
        if path.is_dir() {
            copy_dir_recursive(&path, &dest_path)?;
        } else {
            fs::copy(&path, &dest_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_EVAL_WORKERS, DEFAULT_MAX_TURNS, DEFAULT_TIMEOUT_SECS};
    use std::path::PathBuf;
    use std::time::Duration;

    fn fixture() -> (TempDir, HarnessConfig, Task) {
        let dir = TempDir::new().unwrap();
        let bench = dir.path().join("bench");
        fs::create_dir_all(bench.join("datasets/seqs")).unwrap();
        fs::write(bench.join("datasets/seqs/data.csv"), "a,b\n1,2\n").unwrap();
        fs::create_dir_all(bench.join("gold_programs")).unwrap();
        fs::write(bench.join("gold_programs/cluster.py"), "gold").unwrap();
        fs::create_dir_all(bench.join("eval_programs")).unwrap();
        fs::write(bench.join("eval_programs/eval_cluster.py"), "eval").unwrap();

        let config = HarnessConfig {
            benchmark_path: bench,
            output_dir: dir.path().join("out"),
            run_id: "r1".to_string(),
            max_turns: DEFAULT_MAX_TURNS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            eval_workers: DEFAULT_EVAL_WORKERS,
            skip_inference: false,
            skip_evaluation: false,
            force_reeval: false,
            agent_image: "img".to_string(),
            eval_image: "img".to_string(),
            network: "none".to_string(),
            agent_cmd: "claude".to_string(),
        };
        let task = Task {
            id: 1,
            domain: "bio".to_string(),
            instruction: "cluster".to_string(),
            gold_program_name: "cluster.py".to_string(),
            expected_output_name: "out.png".to_string(),
            dataset_folder: "seqs".to_string(),
        };
        (dir, config, task)
    }

    #[test]
    fn test_inference_workspace_never_contains_gold_or_eval() {
        let (_dir, config, task) = fixture();
        let ws = TaskWorkspace::stage_inference(&config, &task).unwrap();

        assert!(ws.root().join(PROMPT_FILE).is_file());
        assert!(ws.root().join(PRED_RESULTS_DIR).is_dir());
        assert!(ws
            .root()
            .join("benchmark/datasets/seqs/data.csv")
            .is_file());
        // The security invariant: no gold, no eval fixtures.
        assert!(!ws.root().join("gold").exists());
        assert!(!ws.root().join("eval").exists());
    }

    #[test]
    fn test_evaluation_workspace_sees_candidate_and_fixtures() {
        let (_dir, config, task) = fixture();
        fs::create_dir_all(config.pred_programs_dir()).unwrap();
        fs::write(config.pred_program_path(&task), "print('x')").unwrap();

        let ws = TaskWorkspace::stage_evaluation(&config, &task).unwrap();
        assert!(ws.root().join("pred_cluster.py").is_file());
        assert!(ws.root().join("gold/cluster.py").is_file());
        assert!(ws.root().join("eval/eval_cluster.py").is_file());
    }

    #[test]
    fn test_evaluation_without_candidate_fails_setup() {
        let (_dir, config, task) = fixture();
        let err = TaskWorkspace::stage_evaluation(&config, &task).unwrap_err();
        assert!(err.to_string().contains("candidate program missing"));
    }

    #[test]
    fn test_workspace_removed_on_drop() {
        let (_dir, config, task) = fixture();
        let root = {
            let ws = TaskWorkspace::stage_inference(&config, &task).unwrap();
            ws.root().to_path_buf()
        };
        assert!(!root.exists());
    }
}
