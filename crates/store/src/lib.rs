pub mod document;
pub mod fixtures;
pub mod repositories;
pub mod service;

pub use document::{DocumentTree, JsonDocumentStore};
pub use fixtures::{SeedDataset, SeedResult, VerificationResult};
pub use repositories::{
    ActivityRepository, CategoryRepository, ExpenseRepository, RepositoryError, UserRepository,
    WorkflowRepository,
};
pub use service::{ClaimService, ClaimStatus, DecisionRequest};
