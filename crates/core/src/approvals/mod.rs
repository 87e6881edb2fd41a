use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::expense::Expense;
use crate::domain::user::{User, UserId, UserRole};
use crate::domain::workflow::{
    ApprovalCondition, ConditionalPolicy, HybridPolicy, SequentialPolicy, Workflow,
    WorkflowStrategy,
};

/// Who may close a claim whose category has no workflow configured.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NoWorkflowApproval {
    /// Any user may approve.
    Open,
    /// Only users holding one of the listed roles may decide.
    Roles { roles: Vec<UserRole> },
    /// Decisions fail with `UnknownCategory`.
    Disabled,
}

impl Default for NoWorkflowApproval {
    fn default() -> Self {
        Self::Roles { roles: UserRole::APPROVING.to_vec() }
    }
}

impl NoWorkflowApproval {
    pub fn permits(&self, role: UserRole) -> bool {
        match self {
            Self::Open => true,
            Self::Roles { roles } => roles.contains(&role),
            Self::Disabled => false,
        }
    }
}

/// Where a hybrid claim currently sits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ApprovalPhase {
    Sequential { stage: usize },
    Conditional,
}

impl ApprovalPhase {
    /// Every approval in a pending hybrid claim's history belongs to the
    /// sequential phase until the sequential list has been cleared.
    pub fn of_hybrid(expense: &Expense, policy: &HybridPolicy) -> Self {
        if expense.approval_count() < policy.sequential.len() {
            let stage = expense.current_approval_stage.min(policy.sequential.last_stage());
            Self::Sequential { stage }
        } else {
            Self::Conditional
        }
    }
}

/// Approvals counted toward a conditional evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConditionTally<'a> {
    pub approvers: Vec<&'a UserId>,
    pub eligible: usize,
}

impl<'a> ConditionTally<'a> {
    /// Distinct approvers recorded after the first `skip` approvals of the history.
    pub fn collect(expense: &'a Expense, policy: &ConditionalPolicy, skip: usize) -> Self {
        let mut approvers: Vec<&UserId> = Vec::new();
        for record in expense.approvals().skip(skip) {
            if !approvers.contains(&&record.approver_id) {
                approvers.push(&record.approver_id);
            }
        }
        Self { approvers, eligible: policy.approvers.len() }
    }

    pub fn count(&self) -> usize {
        self.approvers.len()
    }

    pub fn is_satisfied_by(&self, condition: &ApprovalCondition) -> bool {
        match condition {
            ApprovalCondition::Percentage { value } => {
                if self.eligible == 0 {
                    return false;
                }
                Decimal::from(self.count()) * Decimal::ONE_HUNDRED
                    >= *value * Decimal::from(self.eligible)
            }
            ApprovalCondition::KeyApprover { approver_id } => {
                self.approvers.iter().any(|approver| *approver == approver_id)
            }
            ApprovalCondition::AnyApprover { value } => self.count() >= *value as usize,
        }
    }

    /// First condition, in configured order, that the tally satisfies.
    pub fn first_satisfied<'c>(
        &self,
        conditions: &'c [ApprovalCondition],
    ) -> Option<&'c ApprovalCondition> {
        conditions.iter().find(|condition| self.is_satisfied_by(condition))
    }
}

/// Answers "who may act on this claim right now". Read-only and repeatable.
#[derive(Clone, Debug, Default)]
pub struct AssignmentResolver {
    no_workflow: NoWorkflowApproval,
}

impl AssignmentResolver {
    pub fn new(no_workflow: NoWorkflowApproval) -> Self {
        Self { no_workflow }
    }

    pub fn no_workflow_policy(&self) -> &NoWorkflowApproval {
        &self.no_workflow
    }

    pub fn is_assigned(&self, expense: &Expense, workflow: Option<&Workflow>, user: &User) -> bool {
        self.is_assigned_as(expense, workflow, &user.id, user.role)
    }

    pub fn is_assigned_as(
        &self,
        expense: &Expense,
        workflow: Option<&Workflow>,
        user_id: &UserId,
        role: UserRole,
    ) -> bool {
        if expense.is_terminal() {
            return false;
        }

        match workflow {
            Some(workflow) => self.assigned_approvers(expense, workflow).contains(&user_id),
            None => self.no_workflow.permits(role),
        }
    }

    /// Approvers entitled to record a decision on `expense` at this moment.
    pub fn assigned_approvers<'w>(
        &self,
        expense: &Expense,
        workflow: &'w Workflow,
    ) -> Vec<&'w UserId> {
        if expense.is_terminal() {
            return Vec::new();
        }

        match &workflow.strategy {
            WorkflowStrategy::Sequential(policy) => sequential_assignee(expense, policy),
            WorkflowStrategy::Conditional(policy) => conditional_assignees(expense, policy, 0),
            WorkflowStrategy::Threshold(policy) => {
                if policy.auto_approves(expense.amount) {
                    Vec::new()
                } else {
                    conditional_assignees(expense, &policy.above_threshold, 0)
                }
            }
            WorkflowStrategy::Hybrid(policy) => match ApprovalPhase::of_hybrid(expense, policy) {
                ApprovalPhase::Sequential { .. } => sequential_assignee(expense, &policy.sequential),
                ApprovalPhase::Conditional => {
                    conditional_assignees(expense, &policy.conditional, policy.sequential.len())
                }
            },
        }
    }
}

fn sequential_assignee<'w>(expense: &Expense, policy: &'w SequentialPolicy) -> Vec<&'w UserId> {
    policy.approver_at(expense.current_approval_stage).into_iter().collect()
}

fn conditional_assignees<'w>(
    expense: &Expense,
    policy: &'w ConditionalPolicy,
    skip: usize,
) -> Vec<&'w UserId> {
    let tally = ConditionTally::collect(expense, policy, skip);
    policy.approvers.iter().filter(|approver| !tally.approvers.contains(approver)).collect()
}
