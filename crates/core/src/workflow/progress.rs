use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::approvals::{ApprovalPhase, ConditionTally};
use crate::domain::expense::Expense;
use crate::domain::workflow::{ConditionalPolicy, Workflow, WorkflowStrategy};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub label: String,
    pub progress_percent: Decimal,
}

impl Progress {
    fn new(label: impl Into<String>, done: usize, total: usize) -> Self {
        Self { label: label.into(), progress_percent: percent(done, total) }
    }
}

/// Human-facing summary of how far a claim has travelled through its workflow.
pub fn describe(expense: &Expense, workflow: Option<&Workflow>) -> Progress {
    let Some(workflow) = workflow else {
        return Progress { label: "No Workflow".to_string(), progress_percent: Decimal::ZERO };
    };

    match &workflow.strategy {
        WorkflowStrategy::Sequential(policy) => {
            let stage = expense.current_approval_stage.min(policy.last_stage()) + 1;
            Progress::new(format!("Stage {stage} of {}", policy.len()), stage, policy.len())
        }
        WorkflowStrategy::Conditional(policy) => conditional_progress(expense, policy, 0, ""),
        WorkflowStrategy::Threshold(policy) => {
            if policy.auto_approves(expense.amount) {
                Progress { label: "Under Threshold".to_string(), progress_percent: Decimal::ONE_HUNDRED }
            } else {
                Progress { label: "Above Threshold".to_string(), progress_percent: Decimal::ZERO }
            }
        }
        WorkflowStrategy::Hybrid(policy) => match ApprovalPhase::of_hybrid(expense, policy) {
            ApprovalPhase::Sequential { stage } => {
                let stage = stage + 1;
                let total = policy.sequential.len();
                Progress::new(format!("Sequential stage {stage} of {total}"), stage, total)
            }
            ApprovalPhase::Conditional => conditional_progress(
                expense,
                &policy.conditional,
                policy.sequential.len(),
                "Conditional: ",
            ),
        },
    }
}

fn conditional_progress(
    expense: &Expense,
    policy: &ConditionalPolicy,
    skip: usize,
    prefix: &str,
) -> Progress {
    let tally = ConditionTally::collect(expense, policy, skip);
    Progress::new(
        format!("{prefix}{} of {} approved", tally.count(), tally.eligible),
        tally.count(),
        tally.eligible,
    )
}

fn percent(done: usize, total: usize) -> Decimal {
    if total == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(done) * Decimal::ONE_HUNDRED / Decimal::from(total))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
