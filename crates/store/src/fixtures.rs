use expenseflow_core::domain::user::InMemoryUserDirectory;
use expenseflow_core::domain::workflow::{WorkflowCatalog, WorkflowParseOptions};

use crate::document::{DocumentTree, JsonDocumentStore};
use crate::repositories::RepositoryError;

/// Demo organisation with one workflow of each strategy and an unconfigured category.
pub struct SeedDataset;

impl SeedDataset {
    pub const JSON: &'static str = include_str!("../../../config/fixtures/seed_document.json");

    pub fn document() -> Result<DocumentTree, RepositoryError> {
        DocumentTree::from_json(Self::JSON)
    }

    /// Replaces the store contents with the seed document. Loading twice yields the same tree.
    pub async fn load(store: &JsonDocumentStore) -> Result<SeedResult, RepositoryError> {
        let document = Self::document()?;
        let result = SeedResult {
            users: document.users.len(),
            categories: document.categories.len(),
            workflows: document.workflows.len(),
            expenses: document.expenses.len(),
        };

        store.replace(document).await?;
        Ok(result)
    }

    pub async fn verify(store: &JsonDocumentStore) -> Result<VerificationResult, RepositoryError> {
        let expected = Self::document()?;
        let actual = store.snapshot().await;
        let mut checks = Vec::new();

        checks.push((
            "users",
            expected.users.iter().all(|user| actual.users.iter().any(|found| found.id == user.id)),
        ));
        checks.push((
            "categories",
            expected
                .categories
                .iter()
                .all(|category| actual.categories.iter().any(|found| found.id == category.id)),
        ));
        checks.push((
            "expenses",
            expected
                .expenses
                .iter()
                .all(|expense| actual.expenses.iter().any(|found| found.id == expense.id)),
        ));

        let directory = InMemoryUserDirectory::new(actual.users.clone());
        let catalog =
            WorkflowCatalog::build(&actual.workflows, &directory, WorkflowParseOptions::default());
        checks.push((
            "workflows",
            catalog.map(|catalog| catalog.len() == expected.workflows.len()).unwrap_or(false),
        ));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct SeedResult {
    pub users: usize,
    pub categories: usize,
    pub workflows: usize,
    pub expenses: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use expenseflow_core::domain::category::CategoryId;
    use expenseflow_core::domain::user::InMemoryUserDirectory;
    use expenseflow_core::domain::workflow::{WorkflowCatalog, WorkflowParseOptions, WorkflowType};

    use super::SeedDataset;
    use crate::document::JsonDocumentStore;

    #[test]
    fn seed_document_parses_into_a_valid_catalog() {
        let document = SeedDataset::document().expect("seed document parses");
        let directory = InMemoryUserDirectory::new(document.users.clone());
        let catalog =
            WorkflowCatalog::build(&document.workflows, &directory, WorkflowParseOptions::default())
                .expect("seed workflows validate");

        let types: Vec<WorkflowType> = catalog.workflows().map(|workflow| workflow.workflow_type()).collect();
        for expected in [
            WorkflowType::Sequential,
            WorkflowType::Conditional,
            WorkflowType::Threshold,
            WorkflowType::Hybrid,
        ] {
            assert!(types.contains(&expected), "seed should cover {expected:?}");
        }
        assert!(catalog.for_category(&CategoryId::new("cat_supplies")).is_none());
    }

    #[tokio::test]
    async fn load_is_idempotent_and_verifies() {
        let dir = TempDir::new().expect("temp dir");
        let store = JsonDocumentStore::open(dir.path().join("seed.json")).await.expect("open");

        let first = SeedDataset::load(&store).await.expect("first load");
        let first_check = SeedDataset::verify(&store).await.expect("first verify");
        let second = SeedDataset::load(&store).await.expect("second load");
        let second_check = SeedDataset::verify(&store).await.expect("second verify");

        assert_eq!(first, second);
        assert!(first_check.all_present);
        assert_eq!(first_check, second_check);
        assert_eq!(first.workflows, 4);
    }
}
