pub mod claims;
pub mod config;
pub mod doctor;
pub mod seed;
pub mod workflows;

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use expenseflow_core::audit::InMemoryAuditSink;
use expenseflow_core::config::{AppConfig, LoadOptions};
use expenseflow_core::errors::{ApplicationError, InterfaceError};
use expenseflow_core::notifications::InMemoryNotificationSink;
use expenseflow_core::workflow::WorkflowEngine;
use expenseflow_store::{ActivityRepository, ClaimService, JsonDocumentStore, RepositoryError};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::render(0, CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            correlation_id: None,
            data: None,
        })
    }

    pub fn success_with<T: Serialize>(
        command: &str,
        message: impl Into<String>,
        correlation_id: &str,
        data: &T,
    ) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self::render(0, CommandOutcome {
                command: command.to_string(),
                status: "ok".to_string(),
                error_class: None,
                message: message.into(),
                correlation_id: Some(correlation_id.to_string()),
                data: Some(data),
            }),
            Err(error) => Self::failure(command, "serialization", error.to_string(), 1),
        }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self::render(exit_code, CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            correlation_id: None,
            data: None,
        })
    }

    pub fn from_interface(command: &str, error: &InterfaceError) -> Self {
        let error_class = match error {
            InterfaceError::BadRequest { .. } => "bad_request",
            InterfaceError::Forbidden { .. } => "forbidden",
            InterfaceError::Conflict { .. } => "conflict",
            InterfaceError::NotFound { .. } => "not_found",
            InterfaceError::ServiceUnavailable { .. } => "service_unavailable",
            InterfaceError::Internal { .. } => "internal",
        };

        Self::render(u8::try_from(error.exit_code()).unwrap_or(1), CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: format!("{} ({error})", error.user_message()),
            correlation_id: Some(error.correlation_id().to_string()),
            data: None,
        })
    }

    fn render(exit_code: u8, payload: CommandOutcome) -> Self {
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub fn new_correlation_id() -> String {
    format!("cli-{}", Uuid::new_v4())
}

/// Store, service and the sinks collecting one command's activity.
pub struct Session {
    pub config: AppConfig,
    pub store: Arc<JsonDocumentStore>,
    pub service: ClaimService,
    audit: InMemoryAuditSink,
    notifications: InMemoryNotificationSink,
}

impl Session {
    pub async fn open(config: AppConfig) -> Result<Self, RepositoryError> {
        let store = Arc::new(JsonDocumentStore::open(config.storage.data_path.clone()).await?);
        let audit = InMemoryAuditSink::default();
        let notifications = InMemoryNotificationSink::default();
        let service = ClaimService::new(
            store.clone(),
            WorkflowEngine::new(config.workflow.no_workflow_policy()),
            config.workflow.parse_options(),
        )
        .with_sinks(Arc::new(audit.clone()), Arc::new(notifications.clone()));

        Ok(Self { config, store, service, audit, notifications })
    }

    /// Appends collected audit entries and notifications to the document.
    pub async fn flush(&self) -> Result<(), RepositoryError> {
        self.store.append(self.audit.drain(), self.notifications.drain()).await
    }
}

pub(crate) fn load_config(command: &str, options: LoadOptions) -> Result<AppConfig, CommandResult> {
    AppConfig::load(options).map_err(|error| {
        CommandResult::failure(command, "config_validation", format!("configuration issue: {error}"), 2)
    })
}

pub(crate) fn runtime(command: &str) -> Result<tokio::runtime::Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            1,
        )
    })
}

/// Opens a session, runs `body`, then persists the activity it produced even when `body` failed.
pub(crate) fn execute<T, F, Fut>(command: &str, options: LoadOptions, body: F) -> CommandResult
where
    T: Serialize,
    F: FnOnce(Arc<Session>, String) -> Fut,
    Fut: Future<Output = Result<(String, T), ApplicationError>>,
{
    let config = match load_config(command, options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime(command) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };
    let correlation_id = new_correlation_id();

    let result = runtime.block_on(async {
        let session = Arc::new(Session::open(config).await?);
        let outcome = body(session.clone(), correlation_id.clone()).await;
        let flushed = session.flush().await;
        let outcome = outcome?;
        flushed?;
        Ok::<_, ApplicationError>(outcome)
    });

    match result {
        Ok((message, data)) => CommandResult::success_with(command, message, &correlation_id, &data),
        Err(error) => {
            tracing::warn!(
                event_name = "cli.command.failed",
                correlation_id = %correlation_id,
                command = command,
                error = %error,
                "command failed"
            );
            CommandResult::from_interface(command, &error.into_interface(correlation_id.as_str()))
        }
    }
}
