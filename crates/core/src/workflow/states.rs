use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::audit::AuditAction;
use crate::domain::expense::{DecisionAction, Expense, ExpenseId};
use crate::domain::user::{User, UserId, UserRole};
use crate::domain::workflow::ApprovalCondition;
use crate::notifications::NotificationAction;

/// The person recording a decision or submitting a claim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub name: String,
    pub role: UserRole,
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self { id: user.id.clone(), name: user.name.clone(), role: user.role }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub approver: Actor,
    pub action: DecisionAction,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn approve(approver: impl Into<Actor>, decided_at: DateTime<Utc>) -> Self {
        Self { approver: approver.into(), action: DecisionAction::Approve, comment: None, decided_at }
    }

    pub fn reject(approver: impl Into<Actor>, decided_at: DateTime<Utc>) -> Self {
        Self { approver: approver.into(), action: DecisionAction::Reject, comment: None, decided_at }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowEventKind {
    Submitted,
    AutoApproved {
        threshold: Decimal,
    },
    Approved {
        next_approver: Option<UserId>,
        #[serde(rename = "final")]
        is_final: bool,
        condition: Option<ApprovalCondition>,
    },
    AwaitingMore {
        approvals: usize,
        total: usize,
    },
    Rejected {
        reason: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub expense_id: ExpenseId,
    pub actor: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
    pub kind: WorkflowEventKind,
    pub message: String,
}

/// Side effects the caller performs after persisting the new expense.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum FollowUp {
    RecordAudit { action: AuditAction, description: String },
    NotifyEmployee { employee_id: UserId, action: NotificationAction },
    NotifyApprover { approver_id: UserId },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub expense: Expense,
    pub events: Vec<WorkflowEvent>,
    pub follow_ups: Vec<FollowUp>,
}

impl DecisionOutcome {
    pub fn is_final(&self) -> bool {
        self.expense.is_terminal()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub expense: Expense,
    pub events: Vec<WorkflowEvent>,
    pub follow_ups: Vec<FollowUp>,
}
