use thiserror::Error;

use crate::domain::category::CategoryId;
use crate::domain::expense::{ExpenseId, ExpenseStatus};
use crate::domain::user::UserId;
use crate::domain::workflow::WorkflowConfigError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error(transparent)]
    InvalidWorkflowConfig(#[from] WorkflowConfigError),
    #[error("user `{user_id}` is not assigned to act on expense `{expense_id}`")]
    NotAuthorized { expense_id: ExpenseId, user_id: UserId },
    #[error("expense `{expense_id}` is already {status}")]
    AlreadyTerminal { expense_id: ExpenseId, status: ExpenseStatus },
    #[error("category `{category}` has no workflow and unconfigured categories are disabled")]
    UnknownCategory { category: CategoryId },
    #[error("invalid expense: {0}")]
    InvalidExpense(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "You are not assigned to act on this expense right now.",
            Self::Conflict { .. } => "This expense has already been decided.",
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BadRequest { .. } => 2,
            Self::Forbidden { .. } => 3,
            Self::Conflict { .. } => 4,
            Self::NotFound { .. } => 5,
            Self::ServiceUnavailable { .. } => 6,
            Self::Internal { .. } => 1,
        }
    }
}

impl ApplicationError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Workflow(error) => {
                let message = error.to_string();
                match error {
                    WorkflowError::NotAuthorized { .. } => Self::Forbidden { message, correlation_id },
                    WorkflowError::AlreadyTerminal { .. } => Self::Conflict { message, correlation_id },
                    WorkflowError::InvalidWorkflowConfig(_)
                    | WorkflowError::UnknownCategory { .. }
                    | WorkflowError::InvalidExpense(_) => Self::BadRequest { message, correlation_id },
                }
            }
            ApplicationError::NotFound { .. } => {
                Self::NotFound { message: value.to_string(), correlation_id }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
