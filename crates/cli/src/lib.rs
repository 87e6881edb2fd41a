pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use expenseflow_core::config::{AppConfig, ConfigOverrides, LoadOptions, NoWorkflowMode};
use expenseflow_core::domain::workflow::UnknownWorkflowType;

use crate::commands::claims::{ActivityArgs, DecideArgs, SubmitArgs};

#[derive(Debug, Parser)]
#[command(
    name = "expenseflow",
    about = "ExpenseFlow approval workflow CLI",
    long_about = "Submit expense claims, record approval decisions, and inspect workflow progress against a JSON document store.",
    after_help = "Examples:\n  expenseflow seed\n  expenseflow pending --user mgr_001\n  expenseflow decide --expense exp_001 --approver mgr_001 --action approve\n  expenseflow describe --expense exp_001"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file path (defaults to ./expenseflow.toml or ./config/expenseflow.toml)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override storage.data_path")]
    data: Option<PathBuf>,
    #[arg(long, global = true, help = "Override logging.level")]
    log_level: Option<String>,
    #[arg(long, global = true, help = "Override workflow.no_workflow_approval (open|roles|disabled)")]
    no_workflow_approval: Option<NoWorkflowMode>,
    #[arg(long, global = true, help = "Override workflow.unknown_type (reject|sequential_fallback)")]
    unknown_type: Option<UnknownWorkflowType>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, the document store, and every stored workflow")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Replace the document with the demo organisation, workflows, and claims")]
    Seed,
    #[command(about = "List validated workflows and the category each one governs")]
    Workflows,
    #[command(about = "List pending claims the given user may act on now")]
    Pending {
        #[arg(long)]
        user: String,
    },
    #[command(about = "File a new expense claim")]
    Submit(SubmitArgs),
    #[command(about = "Approve or reject a claim")]
    Decide(DecideArgs),
    #[command(about = "Show a claim with its workflow progress and assigned approvers")]
    Describe {
        #[arg(long)]
        expense: String,
    },
    #[command(about = "Show recorded audit entries and notifications")]
    Activity(ActivityArgs),
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides {
                data_path: self.data.clone(),
                log_level: self.log_level.clone(),
                no_workflow_approval: self.no_workflow_approval,
                unknown_type: self.unknown_type,
            },
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.load_options();

    // Config errors are reported by the command itself.
    if let Ok(config) = AppConfig::load(options.clone()) {
        if let Err(error) = logging::init(&config.logging) {
            eprintln!("logging disabled: {error}");
        }
    }

    let result = match cli.command {
        Command::Config => commands::config::run(options),
        Command::Doctor { json } => commands::doctor::run(options, json),
        Command::Seed => commands::seed::run(options),
        Command::Workflows => commands::workflows::run(options),
        Command::Pending { user } => commands::claims::pending(options, user),
        Command::Submit(args) => commands::claims::submit(options, args),
        Command::Decide(args) => commands::claims::decide(options, args),
        Command::Describe { expense } => commands::claims::describe_claim(options, expense),
        Command::Activity(args) => commands::claims::activity(options, args),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
