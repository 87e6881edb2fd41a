use expenseflow_core::config::LoadOptions;
use expenseflow_store::{JsonDocumentStore, SeedDataset, SeedResult};

use crate::commands::{load_config, runtime, CommandResult};

pub fn run(options: LoadOptions) -> CommandResult {
    let config = match load_config("seed", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let store = JsonDocumentStore::open(config.storage.data_path.clone())
            .await
            .map_err(|error| ("document_store", error.to_string(), 6u8))?;

        let seeded = SeedDataset::load(&store)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 6u8))?;

        let verification = SeedDataset::verify(&store)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        if !verification.all_present {
            let failed_checks = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>();
            return Err(("seed_verification", verification_message(&failed_checks), 6u8));
        }

        Ok::<_, (&'static str, String, u8)>(seeded)
    });

    match result {
        Ok(seeded) => {
            tracing::info!(
                event_name = "cli.seed.loaded",
                correlation_id = "seed",
                users = seeded.users,
                workflows = seeded.workflows,
                expenses = seeded.expenses,
                "demo dataset loaded"
            );
            let path = config.storage.data_path.display().to_string();
            CommandResult::success("seed", summary(&path, seeded))
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(path: &str, seeded: SeedResult) -> String {
    format!(
        "demo dataset written to {path}: {} users, {} categories, {} workflows, {} expenses",
        seeded.users, seeded.categories, seeded.workflows, seeded.expenses
    )
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use expenseflow_store::SeedResult;

    use super::{summary, verification_message};

    #[test]
    fn verification_error_message_targets_failed_checks() {
        assert_eq!(
            verification_message(&["workflows", "expenses"]),
            "Seed verification failed for checks: workflows, expenses"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        assert_eq!(verification_message(&[]), "Some seed data failed to load");
    }

    #[test]
    fn summary_lists_every_collection() {
        let line = summary(
            "claims.json",
            SeedResult { users: 7, categories: 5, workflows: 4, expenses: 3 },
        );
        assert_eq!(
            line,
            "demo dataset written to claims.json: 7 users, 5 categories, 4 workflows, 3 expenses"
        );
    }
}
