use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use expenseflow_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
};
use expenseflow_core::domain::expense::{
    DecisionAction, Expense, ExpenseId, ExpenseStatus, NewExpense,
};
use expenseflow_core::domain::user::{InMemoryUserDirectory, User, UserDirectory, UserId};
use expenseflow_core::domain::workflow::{Workflow, WorkflowCatalog, WorkflowParseOptions};
use expenseflow_core::errors::{ApplicationError, WorkflowError};
use expenseflow_core::notifications::{
    InMemoryNotificationSink, Notification, NotificationAction, NotificationSink,
};
use expenseflow_core::workflow::{
    describe, Actor, Decision, DecisionOutcome, FollowUp, Progress, SubmissionOutcome,
    WorkflowEngine,
};

use crate::repositories::{ExpenseRepository, UserRepository, WorkflowRepository};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionRequest {
    pub expense_id: ExpenseId,
    pub approver_id: UserId,
    pub action: DecisionAction,
    pub comment: Option<String>,
}

/// Read model returned by `ClaimService::status`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimStatus {
    pub expense: Expense,
    pub workflow_name: Option<String>,
    pub workflow_type: Option<String>,
    pub progress: Progress,
    pub assigned_approvers: Vec<UserId>,
}

/// Loads claims, runs the engine and persists results, one decision per claim at a time.
pub struct ClaimService {
    expenses: Arc<dyn ExpenseRepository>,
    workflows: Arc<dyn WorkflowRepository>,
    users: Arc<dyn UserRepository>,
    audit: Arc<dyn AuditSink>,
    notifications: Arc<dyn NotificationSink>,
    engine: WorkflowEngine,
    parse_options: WorkflowParseOptions,
    claim_locks: ClaimLocks,
}

type ClaimLocks = std::sync::Mutex<HashMap<ExpenseId, Arc<Mutex<()>>>>;

/// Held for the duration of one claim operation. The map entry is removed once
/// no other request holds or waits on the same claim.
struct ClaimGuard<'a> {
    locks: &'a ClaimLocks,
    expense_id: ExpenseId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(&self.expense_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.expense_id);
        }
    }
}

struct LoadedCatalog {
    directory: InMemoryUserDirectory,
    catalog: WorkflowCatalog,
}

impl ClaimService {
    pub fn new<S>(store: Arc<S>, engine: WorkflowEngine, parse_options: WorkflowParseOptions) -> Self
    where
        S: ExpenseRepository + WorkflowRepository + UserRepository + 'static,
    {
        Self::from_repositories(store.clone(), store.clone(), store, engine, parse_options)
    }

    pub fn from_repositories(
        expenses: Arc<dyn ExpenseRepository>,
        workflows: Arc<dyn WorkflowRepository>,
        users: Arc<dyn UserRepository>,
        engine: WorkflowEngine,
        parse_options: WorkflowParseOptions,
    ) -> Self {
        Self {
            expenses,
            workflows,
            users,
            audit: Arc::new(InMemoryAuditSink::default()),
            notifications: Arc::new(InMemoryNotificationSink::default()),
            engine,
            parse_options,
            claim_locks: ClaimLocks::default(),
        }
    }

    pub fn with_sinks(
        mut self,
        audit: Arc<dyn AuditSink>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        self.audit = audit;
        self.notifications = notifications;
        self
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// Validated catalog for the current workflow records. Fails on any invalid record.
    pub async fn catalog(&self) -> Result<WorkflowCatalog, ApplicationError> {
        Ok(self.load_catalog().await?.catalog)
    }

    pub async fn submit(
        &self,
        new_expense: NewExpense,
        correlation_id: &str,
    ) -> Result<SubmissionOutcome, ApplicationError> {
        let _claim = self.lock_claim(&new_expense.id).await;

        if self.expenses.find_by_id(&new_expense.id).await?.is_some() {
            return Err(WorkflowError::InvalidExpense(format!(
                "expense `{}` already exists",
                new_expense.id
            ))
            .into());
        }

        let loaded = self.load_catalog().await?;
        let employee = loaded
            .directory
            .find(&new_expense.employee_id)
            .cloned()
            .ok_or_else(|| ApplicationError::not_found("user", &new_expense.employee_id))?;
        let workflow = loaded.catalog.for_category(&new_expense.category);
        let submitted_at = Utc::now();

        let outcome =
            self.engine.submit(new_expense, workflow, &Actor::from(&employee), submitted_at)?;
        self.expenses.save(outcome.expense.clone()).await?;

        let context = AuditContext::new(correlation_id, Some(employee.id.clone()), &employee.name);
        self.dispatch(
            &outcome.expense,
            &outcome.follow_ups,
            AuditCategory::Submission,
            &context,
            submitted_at,
        );

        info!(
            event_name = "claims.expense.submitted",
            correlation_id = %correlation_id,
            expense_id = %outcome.expense.id,
            employee_id = %employee.id,
            status = %outcome.expense.status,
            auto_approved = outcome.expense.auto_approved,
            "expense submitted"
        );

        Ok(outcome)
    }

    pub async fn decide(
        &self,
        request: DecisionRequest,
        correlation_id: &str,
    ) -> Result<DecisionOutcome, ApplicationError> {
        let _claim = self.lock_claim(&request.expense_id).await;

        let stored = self.find_expense(&request.expense_id).await?;
        let approver = self.find_user(&request.approver_id).await?;
        let loaded = self.load_catalog().await?;
        let workflow = loaded.catalog.for_expense(&stored);
        let expense = self.settle(stored, workflow, correlation_id).await?;

        let decision = Decision {
            approver: Actor::from(&approver),
            action: request.action,
            comment: request.comment,
            decided_at: Utc::now(),
        };
        let context = AuditContext::new(correlation_id, Some(approver.id.clone()), &approver.name);

        // Audit entries are staged until the new expense is saved.
        let staged = InMemoryAuditSink::default();
        let result =
            self.engine.decide_with_audit(&expense, workflow, &decision, &staged, &context);

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                self.forward(staged);
                warn!(
                    event_name = "claims.decision.refused",
                    correlation_id = %correlation_id,
                    expense_id = %expense.id,
                    approver_id = %approver.id,
                    error = %error,
                    "decision refused"
                );
                return Err(error.into());
            }
        };

        self.expenses.save(outcome.expense.clone()).await?;
        self.forward(staged);
        let notify_only: Vec<FollowUp> = outcome
            .follow_ups
            .iter()
            .filter(|follow_up| !matches!(follow_up, FollowUp::RecordAudit { .. }))
            .cloned()
            .collect();
        self.dispatch(
            &outcome.expense,
            &notify_only,
            AuditCategory::Decision,
            &context,
            decision.decided_at,
        );

        info!(
            event_name = "claims.decision.recorded",
            correlation_id = %correlation_id,
            expense_id = %outcome.expense.id,
            approver_id = %approver.id,
            action = decision.action.as_str(),
            status = %outcome.expense.status,
            stage = outcome.expense.current_approval_stage,
            "decision recorded"
        );

        Ok(outcome)
    }

    pub async fn status(&self, expense_id: &ExpenseId) -> Result<ClaimStatus, ApplicationError> {
        let mut expense = self.find_expense(expense_id).await?;
        let loaded = self.load_catalog().await?;
        let workflow = loaded.catalog.for_expense(&expense);

        if self.engine.evaluate(&expense, workflow, Utc::now()).is_some() {
            let _claim = self.lock_claim(expense_id).await;
            let current = self.find_expense(expense_id).await?;
            expense = self.settle(current, workflow, "claims.status").await?;
        }

        let assigned_approvers = match workflow {
            Some(workflow) => self
                .engine
                .resolver()
                .assigned_approvers(&expense, workflow)
                .into_iter()
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        Ok(ClaimStatus {
            progress: describe(&expense, workflow),
            workflow_name: workflow.map(|workflow| workflow.name.clone()),
            workflow_type: workflow.map(|workflow| workflow.workflow_type().as_str().to_string()),
            assigned_approvers,
            expense,
        })
    }

    /// Pending claims `user_id` may act on right now.
    pub async fn pending_for(&self, user_id: &UserId) -> Result<Vec<Expense>, ApplicationError> {
        let user = self.find_user(user_id).await?;
        let loaded = self.load_catalog().await?;
        let pending = self
            .expenses
            .list(Some(ExpenseStatus::Pending))
            .await?;

        Ok(pending
            .into_iter()
            .filter(|expense| {
                self.engine.is_assigned(expense, loaded.catalog.for_expense(expense), &user)
            })
            .collect())
    }

    async fn find_expense(&self, expense_id: &ExpenseId) -> Result<Expense, ApplicationError> {
        self.expenses
            .find_by_id(expense_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("expense", expense_id))
    }

    /// Applies first evaluation to a stored claim and persists the result.
    /// Callers hold the claim lock.
    async fn settle(
        &self,
        expense: Expense,
        workflow: Option<&Workflow>,
        correlation_id: &str,
    ) -> Result<Expense, ApplicationError> {
        let evaluated_at = Utc::now();
        let Some(outcome) = self.engine.evaluate(&expense, workflow, evaluated_at) else {
            return Ok(expense);
        };

        self.expenses.save(outcome.expense.clone()).await?;
        self.dispatch(
            &outcome.expense,
            &outcome.follow_ups,
            AuditCategory::System,
            &AuditContext::system(correlation_id),
            evaluated_at,
        );

        info!(
            event_name = "claims.expense.auto_approved",
            correlation_id = %correlation_id,
            expense_id = %outcome.expense.id,
            amount = %outcome.expense.amount,
            "stored claim auto-approved under threshold"
        );

        Ok(outcome.expense)
    }

    async fn find_user(&self, user_id: &UserId) -> Result<User, ApplicationError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("user", user_id))
    }

    async fn load_catalog(&self) -> Result<LoadedCatalog, ApplicationError> {
        let directory = InMemoryUserDirectory::new(self.users.list().await?);
        let records = self.workflows.list().await?;
        let catalog = WorkflowCatalog::build(&records, &directory, self.parse_options)
            .map_err(WorkflowError::from)?;
        Ok(LoadedCatalog { directory, catalog })
    }

    async fn lock_claim(&self, expense_id: &ExpenseId) -> ClaimGuard<'_> {
        let lock = {
            let mut locks = self.claim_locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(expense_id.clone()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        ClaimGuard { locks: &self.claim_locks, expense_id: expense_id.clone(), guard: Some(guard) }
    }

    fn forward(&self, staged: InMemoryAuditSink) {
        for event in staged.drain() {
            self.audit.emit(event);
        }
    }

    fn dispatch(
        &self,
        expense: &Expense,
        follow_ups: &[FollowUp],
        category: AuditCategory,
        context: &AuditContext,
        at: DateTime<Utc>,
    ) {
        for follow_up in follow_ups {
            match follow_up {
                FollowUp::RecordAudit { action, description } => self.audit.emit(
                    AuditEvent::new(context, *action, category, AuditOutcome::Success, description.clone())
                        .for_expense(expense.id.clone())
                        .at(at),
                ),
                FollowUp::NotifyEmployee { employee_id, action } => self.notifications.notify(
                    Notification::new(expense, employee_id.clone(), *action, at)
                        .from_manager(manager_of(context, category)),
                ),
                FollowUp::NotifyApprover { approver_id } => self.notifications.notify(
                    Notification::new(
                        expense,
                        approver_id.clone(),
                        NotificationAction::AwaitingApproval,
                        at,
                    )
                    .from_manager(manager_of(context, category))
                    .with_next_approver(Some(approver_id.clone())),
                ),
            }
        }
    }
}

fn manager_of(context: &AuditContext, category: AuditCategory) -> Option<UserId> {
    match category {
        AuditCategory::Decision => context.actor_id.clone(),
        _ => None,
    }
}
