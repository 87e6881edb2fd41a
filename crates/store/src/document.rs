use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use expenseflow_core::audit::AuditEvent;
use expenseflow_core::domain::category::{Category, CategoryId};
use expenseflow_core::domain::expense::{Expense, ExpenseId, ExpenseStatus};
use expenseflow_core::domain::user::{User, UserId};
use expenseflow_core::domain::workflow::{WorkflowId, WorkflowRecord};
use expenseflow_core::notifications::Notification;

use crate::repositories::{
    ActivityRepository, CategoryRepository, ExpenseRepository, RepositoryError, UserRepository,
    WorkflowRepository,
};

/// The whole shared document, keyed by the collection names the browser app used.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentTree {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub workflows: Vec<WorkflowRecord>,
    #[serde(default)]
    pub expenses: Vec<Expense>,
    #[serde(default)]
    pub audit_log: Vec<AuditEvent>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
}

impl DocumentTree {
    pub fn from_json(raw: &str) -> Result<Self, RepositoryError> {
        serde_json::from_str(raw).map_err(|error| RepositoryError::Decode(error.to_string()))
    }

    pub fn to_json(&self) -> Result<String, RepositoryError> {
        serde_json::to_string_pretty(self).map_err(|error| RepositoryError::Encode(error.to_string()))
    }
}

/// File-backed store. Every write rewrites the document while holding the write lock.
pub struct JsonDocumentStore {
    path: PathBuf,
    tree: RwLock<DocumentTree>,
}

impl JsonDocumentStore {
    /// Opens `path`, starting from an empty document when the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();
        let tree = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => DocumentTree::default(),
            Ok(raw) => DocumentTree::from_json(&raw)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => DocumentTree::default(),
            Err(source) => return Err(io_error(&path, source)),
        };

        Ok(Self { path, tree: RwLock::new(tree) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> DocumentTree {
        self.tree.read().await.clone()
    }

    pub async fn replace(&self, tree: DocumentTree) -> Result<(), RepositoryError> {
        self.mutate(move |current| *current = tree).await
    }

    async fn mutate<F>(&self, apply: F) -> Result<(), RepositoryError>
    where
        F: FnOnce(&mut DocumentTree) + Send,
    {
        let mut tree = self.tree.write().await;
        let mut next = tree.clone();
        apply(&mut next);
        self.persist(&next).await?;
        *tree = next;
        Ok(())
    }

    async fn persist(&self, tree: &DocumentTree) -> Result<(), RepositoryError> {
        let encoded = tree.to_json()?;
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|source| io_error(parent, source))?;
        }

        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, encoded).await.map_err(|source| io_error(&staging, source))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|source| io_error(&self.path, source))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> RepositoryError {
    RepositoryError::Io { path: path.display().to_string(), source }
}

fn upsert<T>(items: &mut Vec<T>, item: T, same: impl Fn(&T, &T) -> bool) {
    match items.iter_mut().find(|existing| same(existing, &item)) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

#[async_trait::async_trait]
impl ExpenseRepository for JsonDocumentStore {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError> {
        let tree = self.tree.read().await;
        Ok(tree.expenses.iter().find(|expense| &expense.id == id).cloned())
    }

    async fn list(&self, status: Option<ExpenseStatus>) -> Result<Vec<Expense>, RepositoryError> {
        let tree = self.tree.read().await;
        Ok(tree
            .expenses
            .iter()
            .filter(|expense| status.map_or(true, |status| expense.status == status))
            .cloned()
            .collect())
    }

    async fn save(&self, expense: Expense) -> Result<(), RepositoryError> {
        self.mutate(|tree| upsert(&mut tree.expenses, expense, |a, b| a.id == b.id)).await
    }
}

#[async_trait::async_trait]
impl WorkflowRepository for JsonDocumentStore {
    async fn list(&self) -> Result<Vec<WorkflowRecord>, RepositoryError> {
        Ok(self.tree.read().await.workflows.clone())
    }

    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<WorkflowRecord>, RepositoryError> {
        let tree = self.tree.read().await;
        Ok(tree.workflows.iter().find(|workflow| &workflow.id == id).cloned())
    }

    async fn save(&self, workflow: WorkflowRecord) -> Result<(), RepositoryError> {
        self.mutate(|tree| upsert(&mut tree.workflows, workflow, |a, b| a.id == b.id)).await
    }
}

#[async_trait::async_trait]
impl UserRepository for JsonDocumentStore {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let tree = self.tree.read().await;
        Ok(tree.users.iter().find(|user| &user.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<User>, RepositoryError> {
        Ok(self.tree.read().await.users.clone())
    }

    async fn save(&self, user: User) -> Result<(), RepositoryError> {
        self.mutate(|tree| upsert(&mut tree.users, user, |a, b| a.id == b.id)).await
    }
}

#[async_trait::async_trait]
impl CategoryRepository for JsonDocumentStore {
    async fn find_by_id(&self, id: &CategoryId) -> Result<Option<Category>, RepositoryError> {
        let tree = self.tree.read().await;
        Ok(tree.categories.iter().find(|category| &category.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<Category>, RepositoryError> {
        Ok(self.tree.read().await.categories.clone())
    }

    async fn save(&self, category: Category) -> Result<(), RepositoryError> {
        self.mutate(|tree| upsert(&mut tree.categories, category, |a, b| a.id == b.id)).await
    }
}

#[async_trait::async_trait]
impl ActivityRepository for JsonDocumentStore {
    async fn append(
        &self,
        audit: Vec<AuditEvent>,
        notifications: Vec<Notification>,
    ) -> Result<(), RepositoryError> {
        if audit.is_empty() && notifications.is_empty() {
            return Ok(());
        }
        self.mutate(|tree| {
            tree.audit_log.extend(audit);
            tree.notifications.extend(notifications);
        })
        .await
    }

    async fn audit_log(&self) -> Result<Vec<AuditEvent>, RepositoryError> {
        Ok(self.tree.read().await.audit_log.clone())
    }

    async fn notifications(&self) -> Result<Vec<Notification>, RepositoryError> {
        Ok(self.tree.read().await.notifications.clone())
    }
}
