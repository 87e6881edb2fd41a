use expenseflow_core::config::{AppConfig, LoadOptions};
use expenseflow_core::domain::user::InMemoryUserDirectory;
use expenseflow_core::domain::workflow::WorkflowCatalog;
use expenseflow_store::{JsonDocumentStore, UserRepository, WorkflowRepository};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 6 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.extend(check_document(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(skipped("document_store"));
            checks.push(skipped("workflow_catalog"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn skipped(name: &'static str) -> DoctorCheck {
    DoctorCheck {
        name,
        status: CheckStatus::Skipped,
        details: "skipped because an earlier check failed".to_string(),
    }
}

fn check_document(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "document_store",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                skipped("workflow_catalog"),
            ];
        }
    };

    runtime.block_on(async {
        let store = match JsonDocumentStore::open(config.storage.data_path.clone()).await {
            Ok(store) => store,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "document_store",
                        status: CheckStatus::Fail,
                        details: error.to_string(),
                    },
                    skipped("workflow_catalog"),
                ];
            }
        };

        let store_check = DoctorCheck {
            name: "document_store",
            status: CheckStatus::Pass,
            details: format!("document `{}` is readable", store.path().display()),
        };

        let catalog = async {
            let users = UserRepository::list(&store).await.map_err(|error| error.to_string())?;
            let records =
                WorkflowRepository::list(&store).await.map_err(|error| error.to_string())?;
            let directory = InMemoryUserDirectory::new(users);
            WorkflowCatalog::build(&records, &directory, config.workflow.parse_options())
                .map(|catalog| catalog.len())
                .map_err(|error| error.to_string())
        };

        let catalog_check = match catalog.await {
            Ok(count) => DoctorCheck {
                name: "workflow_catalog",
                status: CheckStatus::Pass,
                details: format!("{count} workflow(s) validated"),
            },
            Err(details) => {
                DoctorCheck { name: "workflow_catalog", status: CheckStatus::Fail, details }
            }
        };

        vec![store_check, catalog_check]
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
