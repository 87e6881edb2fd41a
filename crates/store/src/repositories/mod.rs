use async_trait::async_trait;
use thiserror::Error;

use expenseflow_core::audit::AuditEvent;
use expenseflow_core::domain::category::{Category, CategoryId};
use expenseflow_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use expenseflow_core::domain::user::{User, UserId};
use expenseflow_core::domain::workflow::{WorkflowId, WorkflowRecord};
use expenseflow_core::errors::ApplicationError;
use expenseflow_core::notifications::Notification;

pub mod memory;

pub use memory::{
    InMemoryActivityRepository, InMemoryCategoryRepository, InMemoryExpenseRepository,
    InMemoryUserRepository, InMemoryWorkflowRepository,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("document io error on `{path}`: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        Self::Persistence(value.to_string())
    }
}

#[async_trait]
pub trait ExpenseRepository: Send + Sync {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError>;
    async fn list(&self, status: Option<ExpenseStatus>) -> Result<Vec<Expense>, RepositoryError>;
    async fn save(&self, expense: Expense) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<WorkflowRecord>, RepositoryError>;
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<WorkflowRecord>, RepositoryError>;
    async fn save(&self, workflow: WorkflowRecord) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    async fn list(&self) -> Result<Vec<User>, RepositoryError>;
    async fn save(&self, user: User) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait CategoryRepository: Send + Sync {
    async fn find_by_id(&self, id: &CategoryId) -> Result<Option<Category>, RepositoryError>;
    async fn list(&self) -> Result<Vec<Category>, RepositoryError>;
    async fn save(&self, category: Category) -> Result<(), RepositoryError>;
}

/// Append-only audit log and notification queue.
#[async_trait]
pub trait ActivityRepository: Send + Sync {
    async fn append(
        &self,
        audit: Vec<AuditEvent>,
        notifications: Vec<Notification>,
    ) -> Result<(), RepositoryError>;
    async fn audit_log(&self) -> Result<Vec<AuditEvent>, RepositoryError>;
    async fn notifications(&self) -> Result<Vec<Notification>, RepositoryError>;
}
