use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::expense::ExpenseId;
use crate::domain::user::UserId;

/// Action names as they appear in the document tree's `auditLog`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    ExpenseSubmitted,
    ExpenseApproved,
    ExpenseRejected,
    DecisionRefused,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExpenseSubmitted => "EXPENSE_SUBMITTED",
            Self::ExpenseApproved => "EXPENSE_APPROVED",
            Self::ExpenseRejected => "EXPENSE_REJECTED",
            Self::DecisionRefused => "DECISION_REFUSED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    Submission,
    Decision,
    System,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub correlation_id: String,
    pub actor_id: Option<UserId>,
    pub actor_name: String,
}

impl AuditContext {
    pub fn new(
        correlation_id: impl Into<String>,
        actor_id: Option<UserId>,
        actor_name: impl Into<String>,
    ) -> Self {
        Self { correlation_id: correlation_id.into(), actor_id, actor_name: actor_name.into() }
    }

    pub fn system(correlation_id: impl Into<String>) -> Self {
        Self::new(correlation_id, None, "System")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub user_name: String,
    pub action: AuditAction,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expense_id: Option<ExpenseId>,
    pub correlation_id: String,
    pub category: AuditCategory,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl AuditEvent {
    pub fn new(
        context: &AuditContext,
        action: AuditAction,
        category: AuditCategory,
        outcome: AuditOutcome,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            user_id: context.actor_id.clone(),
            user_name: context.actor_name.clone(),
            action,
            description: description.into(),
            expense_id: None,
            correlation_id: context.correlation_id.clone(),
            category,
            outcome,
            metadata: BTreeMap::new(),
        }
    }

    pub fn for_expense(mut self, expense_id: ExpenseId) -> Self {
        self.expense_id = Some(expense_id);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn drain(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{
        AuditAction, AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink,
        InMemoryAuditSink,
    };
    use crate::domain::expense::ExpenseId;
    use crate::domain::user::UserId;

    #[test]
    fn in_memory_sink_records_events_with_correlation_fields() {
        let sink = InMemoryAuditSink::default();
        let context = AuditContext::new("req-123", Some(UserId::new("u-mgr")), "Morgan");
        sink.emit(
            AuditEvent::new(
                &context,
                AuditAction::ExpenseApproved,
                AuditCategory::Decision,
                AuditOutcome::Success,
                "Expense Taxi approved by Morgan (Stage 1)",
            )
            .for_expense(ExpenseId::new("exp-1"))
            .with_metadata("stage", "1"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-123");
        assert_eq!(events[0].user_id, Some(UserId::new("u-mgr")));
        assert_eq!(events[0].expense_id, Some(ExpenseId::new("exp-1")));
        assert!(events[0].metadata.contains_key("stage"));

        assert_eq!(sink.drain().len(), 1);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn audit_entries_serialize_like_the_document_log() {
        let event = AuditEvent::new(
            &AuditContext::system("req-9"),
            AuditAction::ExpenseSubmitted,
            AuditCategory::Submission,
            AuditOutcome::Success,
            "Employee Emery submitted expense: Taxi",
        );

        let value = serde_json::to_value(&event).expect("audit event should serialize");
        assert_eq!(value["action"], "EXPENSE_SUBMITTED");
        assert_eq!(value["userName"], "System");
        assert!(value.get("userId").is_none());
    }
}
