use std::collections::BTreeMap;

use tokio::sync::RwLock;

use expenseflow_core::audit::AuditEvent;
use expenseflow_core::domain::category::{Category, CategoryId};
use expenseflow_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use expenseflow_core::domain::user::{User, UserId};
use expenseflow_core::domain::workflow::{WorkflowId, WorkflowRecord};
use expenseflow_core::notifications::Notification;

use super::{
    ActivityRepository, CategoryRepository, ExpenseRepository, RepositoryError,
    UserRepository, WorkflowRepository,
};

#[derive(Default)]
pub struct InMemoryExpenseRepository {
    expenses: RwLock<BTreeMap<String, Expense>>,
}

#[async_trait::async_trait]
impl ExpenseRepository for InMemoryExpenseRepository {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError> {
        let expenses = self.expenses.read().await;
        Ok(expenses.get(&id.0).cloned())
    }

    async fn list(&self, status: Option<ExpenseStatus>) -> Result<Vec<Expense>, RepositoryError> {
        let expenses = self.expenses.read().await;
        Ok(expenses
            .values()
            .filter(|expense| status.map_or(true, |status| expense.status == status))
            .cloned()
            .collect())
    }

    async fn save(&self, expense: Expense) -> Result<(), RepositoryError> {
        let mut expenses = self.expenses.write().await;
        expenses.insert(expense.id.0.clone(), expense);
        Ok(())
    }
}

/// Keeps insertion order so catalog errors name workflows the way they were configured.
#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: RwLock<Vec<WorkflowRecord>>,
}

#[async_trait::async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn list(&self) -> Result<Vec<WorkflowRecord>, RepositoryError> {
        Ok(self.workflows.read().await.clone())
    }

    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<WorkflowRecord>, RepositoryError> {
        let workflows = self.workflows.read().await;
        Ok(workflows.iter().find(|workflow| &workflow.id == id).cloned())
    }

    async fn save(&self, workflow: WorkflowRecord) -> Result<(), RepositoryError> {
        let mut workflows = self.workflows.write().await;
        match workflows.iter_mut().find(|existing| existing.id == workflow.id) {
            Some(existing) => *existing = workflow,
            None => workflows.push(workflow),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<BTreeMap<String, User>>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(&id.0).cloned())
    }

    async fn list(&self) -> Result<Vec<User>, RepositoryError> {
        Ok(self.users.read().await.values().cloned().collect())
    }

    async fn save(&self, user: User) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        users.insert(user.id.0.clone(), user);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCategoryRepository {
    categories: RwLock<BTreeMap<String, Category>>,
}

#[async_trait::async_trait]
impl CategoryRepository for InMemoryCategoryRepository {
    async fn find_by_id(&self, id: &CategoryId) -> Result<Option<Category>, RepositoryError> {
        let categories = self.categories.read().await;
        Ok(categories.get(&id.0).cloned())
    }

    async fn list(&self) -> Result<Vec<Category>, RepositoryError> {
        Ok(self.categories.read().await.values().cloned().collect())
    }

    async fn save(&self, category: Category) -> Result<(), RepositoryError> {
        let mut categories = self.categories.write().await;
        categories.insert(category.id.0.clone(), category);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryActivityRepository {
    audit: RwLock<Vec<AuditEvent>>,
    notifications: RwLock<Vec<Notification>>,
}

#[async_trait::async_trait]
impl ActivityRepository for InMemoryActivityRepository {
    async fn append(
        &self,
        audit: Vec<AuditEvent>,
        notifications: Vec<Notification>,
    ) -> Result<(), RepositoryError> {
        self.audit.write().await.extend(audit);
        self.notifications.write().await.extend(notifications);
        Ok(())
    }

    async fn audit_log(&self) -> Result<Vec<AuditEvent>, RepositoryError> {
        Ok(self.audit.read().await.clone())
    }

    async fn notifications(&self) -> Result<Vec<Notification>, RepositoryError> {
        Ok(self.notifications.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use expenseflow_core::domain::category::CategoryId;
    use expenseflow_core::domain::expense::{ExpenseId, ExpenseStatus, NewExpense};
    use expenseflow_core::domain::user::{User, UserId, UserRole};
    use expenseflow_core::domain::workflow::{WorkflowConfigRecord, WorkflowId, WorkflowRecord};

    use crate::repositories::{
        ExpenseRepository, InMemoryExpenseRepository, InMemoryUserRepository,
        InMemoryWorkflowRepository, UserRepository, WorkflowRepository,
    };

    fn expense(id: &str) -> expenseflow_core::domain::expense::Expense {
        NewExpense {
            id: ExpenseId::new(id),
            employee_id: UserId::new("u-emp"),
            title: "Hotel".to_string(),
            description: None,
            amount: Decimal::new(18_900, 2),
            currency: "EUR".to_string(),
            category: CategoryId::new("cat-travel"),
            date: None,
            receipts: Vec::new(),
        }
        .into_pending(Utc::now())
    }

    #[tokio::test]
    async fn in_memory_expense_repo_round_trip_and_status_filter() {
        let repo = InMemoryExpenseRepository::default();
        let pending = expense("exp-1");
        let mut approved = expense("exp-2");
        approved.status = ExpenseStatus::Approved;

        repo.save(pending.clone()).await.expect("save pending");
        repo.save(approved).await.expect("save approved");

        let found = repo.find_by_id(&pending.id).await.expect("find expense");
        assert_eq!(found, Some(pending));

        let only_pending = repo.list(Some(ExpenseStatus::Pending)).await.expect("list pending");
        assert_eq!(only_pending.len(), 1);
        assert_eq!(repo.list(None).await.expect("list all").len(), 2);
    }

    #[tokio::test]
    async fn in_memory_workflow_repo_replaces_by_id_in_place() {
        let repo = InMemoryWorkflowRepository::default();
        let mut record = WorkflowRecord {
            id: WorkflowId::new("wf-1"),
            name: "Travel".to_string(),
            category: CategoryId::new("cat-travel"),
            workflow_type: "sequential".to_string(),
            threshold: None,
            config: WorkflowConfigRecord {
                approvers: vec![UserId::new("u-a")],
                ..WorkflowConfigRecord::default()
            },
            created_at: None,
        };

        repo.save(record.clone()).await.expect("save workflow");
        record.name = "Travel v2".to_string();
        repo.save(record.clone()).await.expect("replace workflow");

        let all = repo.list().await.expect("list workflows");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Travel v2");
        assert_eq!(repo.find_by_id(&record.id).await.expect("find workflow"), Some(record));
    }

    #[tokio::test]
    async fn in_memory_user_repo_round_trip() {
        let repo = InMemoryUserRepository::default();
        let user = User::new("u-a", "Avery", UserRole::Manager);

        repo.save(user.clone()).await.expect("save user");
        assert_eq!(repo.find_by_id(&user.id).await.expect("find user"), Some(user));
        assert!(repo.find_by_id(&UserId::new("u-ghost")).await.expect("lookup").is_none());
    }
}
