use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::category::CategoryId;
use crate::domain::user::UserId;
use crate::domain::workflow::ApprovalCondition;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExpenseId(pub String);

impl ExpenseId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl fmt::Display for ExpenseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseStatus {
    Pending,
    Approved,
    Rejected,
}

impl ExpenseStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ExpenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Approve,
    Reject,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

/// One entry of an expense's append-only approval history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    pub approver_id: UserId,
    pub approver_name: String,
    pub action: DecisionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: ExpenseId,
    pub employee_id: UserId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub category: CategoryId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    pub status: ExpenseStatus,
    #[serde(default)]
    pub current_approval_stage: usize,
    #[serde(default)]
    pub approval_history: Vec<ApprovalRecord>,
    #[serde(default)]
    pub receipts: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_approval_condition: Option<ApprovalCondition>,
    #[serde(default)]
    pub auto_approved: bool,
}

impl Expense {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn approvals(&self) -> impl Iterator<Item = &ApprovalRecord> {
        self.approval_history.iter().filter(|record| record.action == DecisionAction::Approve)
    }

    pub fn approval_count(&self) -> usize {
        self.approvals().count()
    }

    pub fn has_approved(&self, user_id: &UserId) -> bool {
        self.approvals().any(|record| &record.approver_id == user_id)
    }
}

/// Fields an employee supplies when filing a claim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExpense {
    pub id: ExpenseId,
    pub employee_id: UserId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub category: CategoryId,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub receipts: Vec<String>,
}

impl NewExpense {
    pub fn into_pending(self, created_at: DateTime<Utc>) -> Expense {
        Expense {
            id: self.id,
            employee_id: self.employee_id,
            title: self.title,
            description: self.description,
            amount: self.amount,
            currency: self.currency,
            category: self.category,
            date: self.date,
            status: ExpenseStatus::Pending,
            current_approval_stage: 0,
            approval_history: Vec::new(),
            receipts: self.receipts,
            created_at,
            approved_at: None,
            rejected_at: None,
            rejection_reason: None,
            final_approval_condition: None,
            auto_approved: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::domain::category::CategoryId;
    use crate::domain::user::UserId;

    use super::{ApprovalRecord, DecisionAction, Expense, ExpenseId, ExpenseStatus, NewExpense};

    fn expense() -> Expense {
        NewExpense {
            id: ExpenseId::new("exp-1"),
            employee_id: UserId::new("u-emp"),
            title: "Client dinner".to_string(),
            description: None,
            amount: Decimal::new(12_050, 2),
            currency: "USD".to_string(),
            category: CategoryId::new("cat-meals"),
            date: None,
            receipts: Vec::new(),
        }
        .into_pending(Utc::now())
    }

    #[test]
    fn new_claims_start_pending_at_stage_zero() {
        let expense = expense();
        assert_eq!(expense.status, ExpenseStatus::Pending);
        assert_eq!(expense.current_approval_stage, 0);
        assert!(expense.approval_history.is_empty());
        assert!(!expense.is_terminal());
    }

    #[test]
    fn approval_count_ignores_rejections() {
        let mut expense = expense();
        for (approver, action) in [("u-a", DecisionAction::Approve), ("u-b", DecisionAction::Reject)]
        {
            expense.approval_history.push(ApprovalRecord {
                approver_id: UserId::new(approver),
                approver_name: approver.to_string(),
                action,
                comment: None,
                timestamp: Utc::now(),
            });
        }

        assert_eq!(expense.approval_count(), 1);
        assert!(expense.has_approved(&UserId::new("u-a")));
        assert!(!expense.has_approved(&UserId::new("u-b")));
    }

    #[test]
    fn serializes_with_document_tree_keys() {
        let value = serde_json::to_value(expense()).expect("expense should serialize");

        assert_eq!(value["status"], "pending");
        assert_eq!(value["currentApprovalStage"], 0);
        assert_eq!(value["employeeId"], "u-emp");
        assert!(value["approvalHistory"].as_array().is_some_and(|history| history.is_empty()));
        assert_eq!(value["autoApproved"], false);
    }

    #[test]
    fn deserializes_numeric_amounts_from_legacy_documents() {
        let expense: Expense = serde_json::from_str(
            r#"{
                "id": "exp-9",
                "employeeId": "u-emp",
                "title": "Taxi",
                "amount": 42.5,
                "currency": "USD",
                "category": "cat-travel",
                "status": "pending",
                "createdAt": "2024-03-01T10:00:00Z"
            }"#,
        )
        .expect("legacy expense should deserialize");

        assert_eq!(expense.amount, Decimal::new(425, 1));
        assert_eq!(expense.current_approval_stage, 0);
        assert!(expense.approval_history.is_empty());
    }
}
