use std::process::ExitCode;

fn main() -> ExitCode {
    expenseflow_cli::run()
}
