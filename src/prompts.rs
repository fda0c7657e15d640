//! Prompt construction for autonomous inference attempts.
//!
//! The prompt walks the agent through a structured workflow: understand,
//! explore the data, self-Q&A, plan, implement, verify. Paths are rooted at
//! the sandbox workspace so the agent never needs host paths.

use crate::suite::Task;

/// Mount point of the per-task workspace inside the sandbox.
pub const WORKSPACE_ROOT: &str = "/workspace";

/// Formats the agentic prompt for one task.
pub fn format_task_prompt(task: &Task) -> String {
    format!(
        r#"You are solving a scientific programming task. Work autonomously through these phases:

## PHASE 1: UNDERSTAND THE TASK
Read the task requirements below carefully.

## PHASE 2: EXPLORE THE DATA
The dataset for this task is under {root}/benchmark/datasets/{dataset}.
Inspect file structure, formats, column names and sample values before coding.

## PHASE 3: SELF-Q&A
Before coding, answer for yourself: What is the exact input format? What
preprocessing is needed? What algorithm fits the task? What output format is
expected? Which edge cases matter?

## PHASE 4: IMPLEMENT
Write a single self-contained Python program that solves the task. Save it as
a .py file in {root}. Load data only from
{root}/benchmark/datasets/{dataset} and write all outputs to
{root}/pred_results/.

## PHASE 5: VERIFY
Run your program and confirm it writes {output} under
{root}/pred_results/ without errors.

## TASK
{instruction}
"#,
        root = WORKSPACE_ROOT,
        dataset = task.dataset_folder,
        output = task.expected_output_name,
        instruction = task.instruction,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task {
            id: 1,
            domain: "bioinformatics".to_string(),
            instruction: "Cluster the sequences and plot the dendrogram.".to_string(),
            gold_program_name: "cluster.py".to_string(),
            expected_output_name: "dendrogram.png".to_string(),
            dataset_folder: "seqs".to_string(),
        }
    }

    #[test]
    fn test_prompt_mentions_workspace_paths_only() {
        let prompt = format_task_prompt(&task());
        assert!(prompt.contains("/workspace/benchmark/datasets/seqs"));
        assert!(prompt.contains("/workspace/pred_results/"));
        assert!(prompt.contains("dendrogram.png"));
        assert!(prompt.contains("Cluster the sequences"));
    }

    #[test]
    fn test_prompt_never_references_gold_program() {
        let prompt = format_task_prompt(&task());
        assert!(!prompt.contains("cluster.py"));
        assert!(!prompt.contains("gold"));
    }
}
