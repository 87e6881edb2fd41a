pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod notifications;
pub mod workflow;

pub use approvals::{ApprovalPhase, AssignmentResolver, NoWorkflowApproval};
pub use audit::{AuditAction, AuditContext, AuditEvent, AuditSink, InMemoryAuditSink};
pub use domain::category::{Category, CategoryId};
pub use domain::expense::{
    ApprovalRecord, DecisionAction, Expense, ExpenseId, ExpenseStatus, NewExpense,
};
pub use domain::user::{InMemoryUserDirectory, User, UserDirectory, UserId, UserRole};
pub use domain::workflow::{
    ApprovalCondition, Workflow, WorkflowCatalog, WorkflowConfigError, WorkflowId,
    WorkflowParseOptions, WorkflowRecord, WorkflowStrategy, WorkflowType,
};
pub use errors::{ApplicationError, InterfaceError, WorkflowError};
pub use notifications::{
    InMemoryNotificationSink, Notification, NotificationAction, NotificationSink,
};
pub use workflow::{
    describe, Actor, Decision, DecisionOutcome, FollowUp, Progress, SubmissionOutcome,
    WorkflowEngine, WorkflowEvent, WorkflowEventKind,
};
