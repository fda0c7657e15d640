//! Resume/completion detection.
//!
//! The sole authority for "already done". Given the resolved task set and the
//! ledgers, computes what still needs inference and/or evaluation; no other
//! component re-derives completion from raw filesystem scans.

use tracing::info;

use crate::attempt::Phase;
use crate::ledger::Ledger;

/// Skip/force switches taken verbatim from the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResumeFlags {
    pub skip_inference: bool,
    pub skip_evaluation: bool,
    pub force_reeval: bool,
}

/// The two disjoint work lists a run must drain.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkPlan {
    /// Tasks needing an inference attempt, in dispatch (ascending id) order.
    pub pending_inference: Vec<u32>,
    /// Tasks needing an evaluation attempt. A task appears here only if its
    /// inference is already concluded or is in `pending_inference` (in which
    /// case it becomes eligible when that attempt concludes without error).
    pub pending_evaluation: Vec<u32>,
}

impl WorkPlan {
    /// Whether nothing remains to be dispatched.
    pub fn is_empty(&self) -> bool {
        self.pending_inference.is_empty() && self.pending_evaluation.is_empty()
    }
}

/// Computes the work plan for `resolved` task ids under `run_id`.
pub fn plan(
    resolved: &[u32],
    run_id: &str,
    inference_ledger: &Ledger,
    evaluation_ledger: &Ledger,
    flags: ResumeFlags,
) -> WorkPlan {
    let inferred = inference_ledger.concluded_task_ids(run_id, Phase::Inference);
    let evaluated = evaluation_ledger.concluded_task_ids(run_id, Phase::Evaluation);

    let pending_inference: Vec<u32> = if flags.skip_inference {
        Vec::new()
    } else if flags.force_reeval {
        resolved.to_vec()
    } else {
        resolved
            .iter()
            .copied()
            .filter(|id| !inferred.contains(id))
            .collect()
    };

    let pending_evaluation: Vec<u32> = if flags.skip_evaluation {
        Vec::new()
    } else {
        resolved
            .iter()
            .copied()
            .filter(|id| flags.force_reeval || !evaluated.contains(id))
            // Never evaluate a task that has no inference and will not get one.
            .filter(|id| inferred.contains(id) || pending_inference.contains(id))
            .collect()
    };

    info!(
        run_id = run_id,
        resolved = resolved.len(),
        already_inferred = inferred.len(),
        already_evaluated = evaluated.len(),
        pending_inference = pending_inference.len(),
        pending_evaluation = pending_evaluation.len(),
        "Computed work plan"
    );

    WorkPlan {
        pending_inference,
        pending_evaluation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::{Attempt, Outcome};
    use chrono::Utc;
    use tempfile::TempDir;

    fn ledgers(dir: &TempDir) -> (Ledger, Ledger) {
        (
            Ledger::open(dir.path().join("inference.jsonl")).unwrap(),
            Ledger::open(dir.path().join("evaluation.jsonl")).unwrap(),
        )
    }

    fn record(ledger: &Ledger, task_id: u32, phase: Phase, run_id: &str, outcome: Outcome) {
        ledger
            .append(&Attempt::new(
                task_id,
                phase,
                run_id,
                Utc::now(),
                1.0,
                0,
                outcome,
            ))
            .unwrap();
    }

    #[test]
    fn test_resume_after_interruption() {
        let dir = TempDir::new().unwrap();
        let (inf, eval) = ledgers(&dir);
        // Tasks 1..=6 concluded inference before the interruption.
        for id in 1..=6 {
            record(&inf, id, Phase::Inference, "r1", Outcome::Success);
        }

        let resolved: Vec<u32> = (1..=10).collect();
        let plan = plan(&resolved, "r1", &inf, &eval, ResumeFlags::default());

        assert_eq!(plan.pending_inference, vec![7, 8, 9, 10]);
        // All ten still need evaluation; 1..=6 eligible now, 7..=10 once inferred.
        assert_eq!(plan.pending_evaluation, resolved);
    }

    #[test]
    fn test_error_outcomes_are_retried() {
        let dir = TempDir::new().unwrap();
        let (inf, eval) = ledgers(&dir);
        record(&inf, 1, Phase::Inference, "r1", Outcome::Success);
        record(&inf, 2, Phase::Inference, "r1", Outcome::Error);
        record(&inf, 3, Phase::Inference, "r1", Outcome::Failure);

        let plan = plan(&[1, 2, 3], "r1", &inf, &eval, ResumeFlags::default());

        // Error means the phase never ran; failure is a concluded result.
        assert_eq!(plan.pending_inference, vec![2]);
    }

    #[test]
    fn test_evaluation_gated_on_inference() {
        let dir = TempDir::new().unwrap();
        let (inf, eval) = ledgers(&dir);
        record(&inf, 1, Phase::Inference, "r1", Outcome::Success);

        let flags = ResumeFlags {
            skip_inference: true,
            ..Default::default()
        };
        let plan = plan(&[1, 2], "r1", &inf, &eval, flags);

        // Task 2 has no inference and will not get one: not evaluable.
        assert!(plan.pending_inference.is_empty());
        assert_eq!(plan.pending_evaluation, vec![1]);
    }

    #[test]
    fn test_force_reeval_redispatches_concluded_work() {
        let dir = TempDir::new().unwrap();
        let (inf, eval) = ledgers(&dir);
        record(&inf, 1, Phase::Inference, "r1", Outcome::Success);
        record(&eval, 1, Phase::Evaluation, "r1", Outcome::Success);

        let flags = ResumeFlags {
            force_reeval: true,
            ..Default::default()
        };
        let plan = plan(&[1], "r1", &inf, &eval, flags);

        assert_eq!(plan.pending_inference, vec![1]);
        assert_eq!(plan.pending_evaluation, vec![1]);
    }

    #[test]
    fn test_skip_evaluation() {
        let dir = TempDir::new().unwrap();
        let (inf, eval) = ledgers(&dir);
        record(&inf, 1, Phase::Inference, "r1", Outcome::Success);

        let flags = ResumeFlags {
            skip_evaluation: true,
            ..Default::default()
        };
        let plan = plan(&[1, 2], "r1", &inf, &eval, flags);

        assert_eq!(plan.pending_inference, vec![2]);
        assert!(plan.pending_evaluation.is_empty());
    }

    #[test]
    fn test_run_ids_are_independent() {
        let dir = TempDir::new().unwrap();
        let (inf, eval) = ledgers(&dir);
        record(&inf, 1, Phase::Inference, "r1", Outcome::Success);

        let plan = plan(&[1], "r2", &inf, &eval, ResumeFlags::default());
        assert_eq!(plan.pending_inference, vec![1]);
    }

    #[test]
    fn test_nothing_pending_when_all_done() {
        let dir = TempDir::new().unwrap();
        let (inf, eval) = ledgers(&dir);
        record(&inf, 1, Phase::Inference, "r1", Outcome::Success);
        record(&eval, 1, Phase::Evaluation, "r1", Outcome::Failure);

        let plan = plan(&[1], "r1", &inf, &eval, ResumeFlags::default());
        assert!(plan.is_empty());
    }
}
