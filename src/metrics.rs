//! Run metrics aggregation.
//!
//! Pure computation over ledger entries: no sandboxes, no filesystem walks.
//! For each task only the most recent attempt per phase counts, so a forced
//! re-evaluation supersedes earlier results without rewriting history.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::attempt::{Attempt, Outcome, Phase};

/// Aggregated results for one run id.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetrics {
    pub run_id: String,
    /// Tasks with any inference attempt recorded.
    pub tasks_attempted: usize,
    /// Tasks whose latest inference produced a candidate program.
    pub programs_produced: usize,
    /// Tasks whose latest evaluation concluded.
    pub tasks_evaluated: usize,
    /// Tasks whose latest evaluation passed the correctness check.
    pub tasks_passed: usize,
    /// `programs_produced / tasks_attempted`.
    pub validity_rate: f64,
    /// `tasks_passed / tasks_attempted`.
    pub success_rate: f64,
    /// Mean similarity score over evaluations that reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_similarity: Option<f64>,
    /// Summed agent API cost over latest inference attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    pub timeouts: usize,
    pub errors: usize,
}

/// Reduces each task to its most recent attempt for one phase.
fn latest_per_task(entries: &[Attempt], phase: Phase) -> BTreeMap<u32, &Attempt> {
    let mut latest = BTreeMap::new();
    for attempt in entries.iter().filter(|a| a.phase == phase) {
        // Ledger order is append order; later entries supersede.
        latest.insert(attempt.task_id, attempt);
    }
    latest
}

/// Computes metrics from raw ledger entries already filtered to one run id.
///
/// The denominator for both rates is the set of tasks that were attempted at
/// all: a task the agent never saw says nothing about the agent. When the
/// inference ledger is empty (evaluation-only run) the evaluated set stands
/// in for it.
pub fn aggregate(
    run_id: &str,
    inference_entries: &[Attempt],
    evaluation_entries: &[Attempt],
) -> RunMetrics {
    let inferences = latest_per_task(inference_entries, Phase::Inference);
    let evaluations = latest_per_task(evaluation_entries, Phase::Evaluation);

    let tasks_attempted = if inferences.is_empty() {
        evaluations.len()
    } else {
        inferences.len()
    };

    let programs_produced = inferences
        .values()
        .filter(|a| a.outcome == Outcome::Success)
        .count();

    let concluded_evals: Vec<&&Attempt> = evaluations
        .values()
        .filter(|a| a.outcome.concluded())
        .collect();
    let tasks_evaluated = concluded_evals.len();
    let tasks_passed = concluded_evals
        .iter()
        .filter(|a| a.outcome == Outcome::Success && a.passed == Some(true))
        .count();

    let scores: Vec<f64> = concluded_evals.iter().filter_map(|a| a.score).collect();
    let mean_similarity = if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    };

    let costs: Vec<f64> = inferences.values().filter_map(|a| a.cost_usd).collect();
    let total_cost_usd = if costs.is_empty() {
        None
    } else {
        Some(costs.iter().sum())
    };

    let timeouts = inferences
        .values()
        .chain(evaluations.values())
        .filter(|a| a.outcome == Outcome::Timeout)
        .count();
    let errors = inferences
        .values()
        .chain(evaluations.values())
        .filter(|a| a.outcome == Outcome::Error)
        .count();

    let missing_evaluation = inferences
        .keys()
        .filter(|id| !evaluations.contains_key(id))
        .count();
    if missing_evaluation > 0 {
        warn!(
            run_id = run_id,
            missing = missing_evaluation,
            "Tasks with inference but no evaluation; rates treat them as not passed"
        );
    }

    let rate = |n: usize| {
        if tasks_attempted == 0 {
            0.0
        } else {
            n as f64 / tasks_attempted as f64
        }
    };

    RunMetrics {
        run_id: run_id.to_string(),
        tasks_attempted,
        programs_produced,
        tasks_evaluated,
        tasks_passed,
        validity_rate: rate(programs_produced),
        success_rate: rate(tasks_passed),
        mean_similarity,
        total_cost_usd,
        timeouts,
        errors,
    }
}

impl RunMetrics {
    /// Human-readable report block.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Run:              {}\n", self.run_id));
        out.push_str(&format!("Tasks attempted:  {}\n", self.tasks_attempted));
        out.push_str(&format!(
            "Programs produced: {} (validity rate {:.4})\n",
            self.programs_produced, self.validity_rate
        ));
        out.push_str(&format!("Tasks evaluated:  {}\n", self.tasks_evaluated));
        out.push_str(&format!(
            "Tasks passed:     {} (success rate {:.4})\n",
            self.tasks_passed, self.success_rate
        ));
        if let Some(sim) = self.mean_similarity {
            out.push_str(&format!("Mean similarity:  {:.2}\n", sim));
        }
        if let Some(cost) = self.total_cost_usd {
            out.push_str(&format!("Total cost:       ${:.2}\n", cost));
        }
        out.push_str(&format!(
            "Timeouts: {}  Errors: {}\n",
            self.timeouts, self.errors
        ));
        out
    }
}
