use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Args, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use expenseflow_core::audit::AuditEvent;
use expenseflow_core::config::LoadOptions;
use expenseflow_core::domain::category::CategoryId;
use expenseflow_core::domain::expense::{DecisionAction, Expense, ExpenseId, NewExpense};
use expenseflow_core::domain::user::UserId;
use expenseflow_core::errors::ApplicationError;
use expenseflow_core::notifications::Notification;
use expenseflow_core::workflow::{describe, DecisionOutcome, Progress, SubmissionOutcome};
use expenseflow_store::{ActivityRepository, ClaimStatus, DecisionRequest};

use crate::commands::{execute, CommandResult, Session};

#[derive(Debug, Clone, Args)]
pub struct SubmitArgs {
    #[arg(long, help = "Expense id (generated when omitted)")]
    pub id: Option<String>,
    #[arg(long, help = "Submitting employee id")]
    pub employee: String,
    #[arg(long)]
    pub title: String,
    #[arg(long, help = "Claim amount, e.g. 42.50")]
    pub amount: Decimal,
    #[arg(long, default_value = "USD")]
    pub currency: String,
    #[arg(long, help = "Category id, e.g. cat_travel")]
    pub category: String,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long, help = "Date the expense was incurred (YYYY-MM-DD)")]
    pub date: Option<NaiveDate>,
    #[arg(long = "receipt")]
    pub receipts: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ActionArg {
    Approve,
    Reject,
}

impl From<ActionArg> for DecisionAction {
    fn from(value: ActionArg) -> Self {
        match value {
            ActionArg::Approve => Self::Approve,
            ActionArg::Reject => Self::Reject,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct DecideArgs {
    #[arg(long)]
    pub expense: String,
    #[arg(long, help = "Id of the user recording the decision")]
    pub approver: String,
    #[arg(long, value_enum)]
    pub action: ActionArg,
    #[arg(long)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct ActivityArgs {
    #[arg(long, help = "Only entries for this expense")]
    pub expense: Option<String>,
    #[arg(long, help = "Only notifications addressed to this user")]
    pub recipient: Option<String>,
}

#[derive(Debug, Serialize)]
struct PendingClaim {
    expense: Expense,
    progress: Progress,
}

#[derive(Debug, Serialize)]
struct ActivityReport {
    audit_log: Vec<AuditEvent>,
    notifications: Vec<Notification>,
}

pub fn submit(options: LoadOptions, args: SubmitArgs) -> CommandResult {
    let new_expense = NewExpense {
        id: ExpenseId::new(args.id.unwrap_or_else(|| format!("exp_{}", Uuid::new_v4().simple()))),
        employee_id: UserId::new(args.employee),
        title: args.title,
        description: args.description,
        amount: args.amount,
        currency: args.currency,
        category: CategoryId::new(args.category),
        date: args.date,
        receipts: args.receipts,
    };

    execute("submit", options, |session, correlation_id| {
        submit_claim(session, correlation_id, new_expense)
    })
}

pub fn decide(options: LoadOptions, args: DecideArgs) -> CommandResult {
    let request = DecisionRequest {
        expense_id: ExpenseId::new(args.expense),
        approver_id: UserId::new(args.approver),
        action: args.action.into(),
        comment: args.comment,
    };

    execute("decide", options, |session, correlation_id| {
        decide_claim(session, correlation_id, request)
    })
}

pub fn describe_claim(options: LoadOptions, expense: String) -> CommandResult {
    let expense_id = ExpenseId::new(expense);
    execute("describe", options, |session, _| claim_status(session, expense_id))
}

pub fn pending(options: LoadOptions, user: String) -> CommandResult {
    let user_id = UserId::new(user);
    execute("pending", options, |session, _| pending_claims(session, user_id))
}

pub fn activity(options: LoadOptions, args: ActivityArgs) -> CommandResult {
    execute("activity", options, |session, _| activity_report(session, args))
}

async fn submit_claim(
    session: Arc<Session>,
    correlation_id: String,
    new_expense: NewExpense,
) -> Result<(String, SubmissionOutcome), ApplicationError> {
    let outcome = session.service.submit(new_expense, &correlation_id).await?;
    let message = if outcome.expense.auto_approved {
        format!("expense {} auto-approved under threshold", outcome.expense.id)
    } else {
        format!("expense {} submitted ({})", outcome.expense.id, outcome.expense.status)
    };
    Ok((message, outcome))
}

async fn decide_claim(
    session: Arc<Session>,
    correlation_id: String,
    request: DecisionRequest,
) -> Result<(String, DecisionOutcome), ApplicationError> {
    let action = request.action;
    let outcome = session.service.decide(request, &correlation_id).await?;
    let message = format!(
        "{} recorded on expense {}; status is now {}",
        action.as_str(),
        outcome.expense.id,
        outcome.expense.status
    );
    Ok((message, outcome))
}

async fn claim_status(
    session: Arc<Session>,
    expense_id: ExpenseId,
) -> Result<(String, ClaimStatus), ApplicationError> {
    let status = session.service.status(&expense_id).await?;
    Ok((status.progress.label.clone(), status))
}

async fn pending_claims(
    session: Arc<Session>,
    user_id: UserId,
) -> Result<(String, Vec<PendingClaim>), ApplicationError> {
    let catalog = session.service.catalog().await?;
    let claims: Vec<PendingClaim> = session
        .service
        .pending_for(&user_id)
        .await?
        .into_iter()
        .map(|expense| PendingClaim {
            progress: describe(&expense, catalog.for_expense(&expense)),
            expense,
        })
        .collect();
    Ok((format!("{} claim(s) awaiting {user_id}", claims.len()), claims))
}

async fn activity_report(
    session: Arc<Session>,
    args: ActivityArgs,
) -> Result<(String, ActivityReport), ApplicationError> {
    let expense_id = args.expense.map(ExpenseId::new);
    let recipient = args.recipient.map(UserId::new);

    let audit_log: Vec<AuditEvent> = session
        .store
        .audit_log()
        .await?
        .into_iter()
        .filter(|event| expense_id.as_ref().map_or(true, |id| event.expense_id.as_ref() == Some(id)))
        .collect();
    let notifications: Vec<Notification> = session
        .store
        .notifications()
        .await?
        .into_iter()
        .filter(|notification| {
            expense_id.as_ref().map_or(true, |id| &notification.expense_id == id)
                && recipient.as_ref().map_or(true, |id| &notification.recipient_id == id)
        })
        .collect();

    let message =
        format!("{} audit entries, {} notifications", audit_log.len(), notifications.len());
    Ok((message, ActivityReport { audit_log, notifications }))
}
