use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use expenseflow_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::CommandResult;

struct Field<'a> {
    key_path: &'static str,
    env_keys: &'a [&'static str],
    value: String,
    overridden: bool,
}

/// Effective configuration with the source each value came from.
pub fn run(options: LoadOptions) -> CommandResult {
    let config_file_path = detect_config_path(options.config_path.as_deref());
    let overrides = options.overrides.clone();
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let roles = config
        .workflow
        .no_workflow_roles
        .iter()
        .map(|role| role.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let fields = [
        Field {
            key_path: "storage.data_path",
            env_keys: &["EXPENSEFLOW_STORAGE_DATA_PATH"],
            value: config.storage.data_path.display().to_string(),
            overridden: overrides.data_path.is_some(),
        },
        Field {
            key_path: "workflow.no_workflow_approval",
            env_keys: &["EXPENSEFLOW_WORKFLOW_NO_WORKFLOW_APPROVAL"],
            value: format!("{:?}", config.workflow.no_workflow_approval),
            overridden: overrides.no_workflow_approval.is_some(),
        },
        Field {
            key_path: "workflow.no_workflow_roles",
            env_keys: &["EXPENSEFLOW_WORKFLOW_NO_WORKFLOW_ROLES"],
            value: format!("[{roles}]"),
            overridden: false,
        },
        Field {
            key_path: "workflow.unknown_type",
            env_keys: &["EXPENSEFLOW_WORKFLOW_UNKNOWN_TYPE"],
            value: format!("{:?}", config.workflow.unknown_type),
            overridden: overrides.unknown_type.is_some(),
        },
        Field {
            key_path: "logging.level",
            env_keys: &["EXPENSEFLOW_LOGGING_LEVEL", "EXPENSEFLOW_LOG_LEVEL"],
            value: config.logging.level.clone(),
            overridden: overrides.log_level.is_some(),
        },
        Field {
            key_path: "logging.format",
            env_keys: &["EXPENSEFLOW_LOGGING_FORMAT", "EXPENSEFLOW_LOG_FORMAT"],
            value: format!("{:?}", config.logging.format),
            overridden: false,
        },
    ];

    let mut lines =
        vec!["effective config (source precedence: flag > env > file > default):".to_string()];
    for field in &fields {
        let source = field_source(field, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(field.key_path, &field.value, source));
    }

    CommandResult::success("config", lines.join("\n"))
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("expenseflow.toml"), PathBuf::from("config/expenseflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    field: &Field<'_>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if field.overridden {
        return "flag".to_string();
    }

    if let Some(env_key) = field
        .env_keys
        .iter()
        .find(|key| env::var(key).map(|value| !value.trim().is_empty()).unwrap_or(false))
    {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, field.key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
