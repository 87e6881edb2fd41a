use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::expense::{Expense, ExpenseId};
use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    Submitted,
    Approved,
    Rejected,
    AwaitingApproval,
}

impl NotificationAction {
    pub fn message(&self, title: &str) -> String {
        match self {
            Self::Submitted => format!("Expense \"{title}\" has been submitted for approval"),
            Self::Approved => format!("Expense \"{title}\" has been approved"),
            Self::Rejected => format!("Expense \"{title}\" has been rejected"),
            Self::AwaitingApproval => format!("Expense \"{title}\" is awaiting your approval"),
        }
    }
}

impl fmt::Display for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::AwaitingApproval => "awaiting_approval",
        })
    }
}

/// Entry of the document tree's notification queue. Delivery happens elsewhere.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub expense_id: ExpenseId,
    pub expense_title: String,
    pub employee_id: UserId,
    pub recipient_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_id: Option<UserId>,
    pub action: NotificationAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_approver: Option<UserId>,
    pub message: String,
}

impl Notification {
    pub fn new(
        expense: &Expense,
        recipient_id: UserId,
        action: NotificationAction,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp,
            expense_id: expense.id.clone(),
            expense_title: expense.title.clone(),
            employee_id: expense.employee_id.clone(),
            recipient_id,
            manager_id: None,
            action,
            next_approver: None,
            message: action.message(&expense.title),
        }
    }

    pub fn from_manager(mut self, manager_id: Option<UserId>) -> Self {
        self.manager_id = manager_id;
        self
    }

    pub fn with_next_approver(mut self, next_approver: Option<UserId>) -> Self {
        self.next_approver = next_approver;
        self
    }
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

#[derive(Clone, Default)]
pub struct InMemoryNotificationSink {
    notifications: Arc<Mutex<Vec<Notification>>>,
}

impl InMemoryNotificationSink {
    pub fn notifications(&self) -> Vec<Notification> {
        match self.notifications.lock() {
            Ok(notifications) => notifications.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn for_recipient(&self, recipient: &UserId) -> Vec<Notification> {
        self.notifications()
            .into_iter()
            .filter(|notification| &notification.recipient_id == recipient)
            .collect()
    }

    pub fn drain(&self) -> Vec<Notification> {
        match self.notifications.lock() {
            Ok(mut notifications) => std::mem::take(&mut *notifications),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn notify(&self, notification: Notification) {
        match self.notifications.lock() {
            Ok(mut notifications) => notifications.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::domain::category::CategoryId;
    use crate::domain::expense::{ExpenseId, NewExpense};
    use crate::domain::user::UserId;

    use super::{InMemoryNotificationSink, Notification, NotificationAction, NotificationSink};

    #[test]
    fn messages_quote_the_expense_title() {
        assert_eq!(
            NotificationAction::Submitted.message("Taxi"),
            "Expense \"Taxi\" has been submitted for approval"
        );
        assert_eq!(
            NotificationAction::AwaitingApproval.message("Taxi"),
            "Expense \"Taxi\" is awaiting your approval"
        );
    }

    #[test]
    fn sink_filters_by_recipient() {
        let expense = NewExpense {
            id: ExpenseId::new("exp-1"),
            employee_id: UserId::new("u-emp"),
            title: "Taxi".to_string(),
            description: None,
            amount: Decimal::from(30),
            currency: "USD".to_string(),
            category: CategoryId::new("cat-travel"),
            date: None,
            receipts: Vec::new(),
        }
        .into_pending(Utc::now());

        let sink = InMemoryNotificationSink::default();
        sink.notify(Notification::new(
            &expense,
            UserId::new("u-emp"),
            NotificationAction::Approved,
            Utc::now(),
        ));
        sink.notify(
            Notification::new(
                &expense,
                UserId::new("u-b"),
                NotificationAction::AwaitingApproval,
                Utc::now(),
            )
            .from_manager(Some(UserId::new("u-a"))),
        );

        let approver = sink.for_recipient(&UserId::new("u-b"));
        assert_eq!(approver.len(), 1);
        assert_eq!(approver[0].manager_id, Some(UserId::new("u-a")));
        assert_eq!(sink.for_recipient(&UserId::new("u-emp"))[0].message, "Expense \"Taxi\" has been approved");
    }
}
