use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::approvals::NoWorkflowApproval;
use crate::domain::user::UserRole;
use crate::domain::workflow::{UnknownWorkflowType, WorkflowParseOptions};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub workflow: WorkflowSettings,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub data_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct WorkflowSettings {
    pub no_workflow_approval: NoWorkflowMode,
    pub no_workflow_roles: Vec<UserRole>,
    pub unknown_type: UnknownWorkflowType,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoWorkflowMode {
    Open,
    Roles,
    Disabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub data_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub no_workflow_approval: Option<NoWorkflowMode>,
    pub unknown_type: Option<UnknownWorkflowType>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig { data_path: PathBuf::from("expenseflow.json") },
            workflow: WorkflowSettings {
                no_workflow_approval: NoWorkflowMode::Roles,
                no_workflow_roles: UserRole::APPROVING.to_vec(),
                unknown_type: UnknownWorkflowType::Reject,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl std::str::FromStr for NoWorkflowMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "roles" => Ok(Self::Roles),
            "disabled" => Ok(Self::Disabled),
            other => Err(ConfigError::Validation(format!(
                "unsupported no-workflow approval mode `{other}` (expected open|roles|disabled)"
            ))),
        }
    }
}

impl WorkflowSettings {
    pub fn no_workflow_policy(&self) -> NoWorkflowApproval {
        match self.no_workflow_approval {
            NoWorkflowMode::Open => NoWorkflowApproval::Open,
            NoWorkflowMode::Roles => {
                NoWorkflowApproval::Roles { roles: self.no_workflow_roles.clone() }
            }
            NoWorkflowMode::Disabled => NoWorkflowApproval::Disabled,
        }
    }

    pub fn parse_options(&self) -> WorkflowParseOptions {
        WorkflowParseOptions { unknown_type: self.unknown_type }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("expenseflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(storage) = patch.storage {
            if let Some(data_path) = storage.data_path {
                self.storage.data_path = data_path;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(mode) = workflow.no_workflow_approval {
                self.workflow.no_workflow_approval = mode;
            }
            if let Some(roles) = workflow.no_workflow_roles {
                self.workflow.no_workflow_roles = roles;
            }
            if let Some(unknown_type) = workflow.unknown_type {
                self.workflow.unknown_type = unknown_type;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("EXPENSEFLOW_STORAGE_DATA_PATH") {
            self.storage.data_path = PathBuf::from(value);
        }

        if let Some(value) = read_env("EXPENSEFLOW_WORKFLOW_NO_WORKFLOW_APPROVAL") {
            self.workflow.no_workflow_approval = value.parse()?;
        }
        if let Some(value) = read_env("EXPENSEFLOW_WORKFLOW_NO_WORKFLOW_ROLES") {
            self.workflow.no_workflow_roles =
                parse_roles("EXPENSEFLOW_WORKFLOW_NO_WORKFLOW_ROLES", &value)?;
        }
        if let Some(value) = read_env("EXPENSEFLOW_WORKFLOW_UNKNOWN_TYPE") {
            self.workflow.unknown_type =
                value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                    key: "EXPENSEFLOW_WORKFLOW_UNKNOWN_TYPE".to_string(),
                    value: value.clone(),
                })?;
        }

        let log_level =
            read_env("EXPENSEFLOW_LOGGING_LEVEL").or_else(|| read_env("EXPENSEFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }

        let log_format =
            read_env("EXPENSEFLOW_LOGGING_FORMAT").or_else(|| read_env("EXPENSEFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(data_path) = overrides.data_path {
            self.storage.data_path = data_path;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(mode) = overrides.no_workflow_approval {
            self.workflow.no_workflow_approval = mode;
        }
        if let Some(unknown_type) = overrides.unknown_type {
            self.workflow.unknown_type = unknown_type;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_storage(&self.storage)?;
        validate_workflow(&self.workflow)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("expenseflow.toml"), PathBuf::from("config/expenseflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    let interpolated = interpolate_env_vars(&raw)?;

    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_storage(storage: &StorageConfig) -> Result<(), ConfigError> {
    if storage.data_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation("storage.data_path must not be empty".to_string()));
    }

    let is_json = storage
        .data_path
        .extension()
        .map(|extension| extension.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if !is_json {
        return Err(ConfigError::Validation(format!(
            "storage.data_path must point to a `.json` document file (got `{}`)",
            storage.data_path.display()
        )));
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowSettings) -> Result<(), ConfigError> {
    if workflow.no_workflow_approval == NoWorkflowMode::Roles
        && workflow.no_workflow_roles.is_empty()
    {
        return Err(ConfigError::Validation(
            "workflow.no_workflow_roles must list at least one role when no_workflow_approval = \"roles\" (use \"disabled\" to refuse decisions instead)"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_roles(key: &str, value: &str) -> Result<Vec<UserRole>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .map(|role| {
            role.parse::<UserRole>().map_err(|_| ConfigError::InvalidEnvOverride {
                key: key.to_string(),
                value: value.to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    storage: Option<StoragePatch>,
    workflow: Option<WorkflowPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct StoragePatch {
    data_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    no_workflow_approval: Option<NoWorkflowMode>,
    no_workflow_roles: Option<Vec<UserRole>>,
    unknown_type: Option<UnknownWorkflowType>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
