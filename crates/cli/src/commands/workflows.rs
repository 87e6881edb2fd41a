use std::sync::Arc;

use serde::Serialize;

use expenseflow_core::config::LoadOptions;
use expenseflow_core::domain::category::CategoryId;
use expenseflow_core::domain::workflow::{Workflow, WorkflowId};
use expenseflow_core::errors::ApplicationError;
use expenseflow_store::CategoryRepository;

use crate::commands::{execute, CommandResult, Session};

#[derive(Debug, Serialize)]
struct CategoryRouting {
    category: CategoryId,
    category_name: String,
    workflow_id: Option<WorkflowId>,
    workflow_type: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct WorkflowListing {
    workflows: Vec<Workflow>,
    routing: Vec<CategoryRouting>,
}

/// Validates every stored workflow and shows which categories route to which workflow.
pub fn run(options: LoadOptions) -> CommandResult {
    execute("workflows", options, |session, _| list_workflows(session))
}

async fn list_workflows(
    session: Arc<Session>,
) -> Result<(String, WorkflowListing), ApplicationError> {
    let catalog = session.service.catalog().await?;
    let categories = CategoryRepository::list(session.store.as_ref()).await?;

    let routing = categories
        .into_iter()
        .map(|category| {
            let workflow = catalog.for_category(&category.id);
            CategoryRouting {
                workflow_id: workflow.map(|workflow| workflow.id.clone()),
                workflow_type: workflow.map(|workflow| workflow.workflow_type().as_str()),
                category_name: category.name,
                category: category.id,
            }
        })
        .collect::<Vec<_>>();
    let unrouted = routing.iter().filter(|entry| entry.workflow_id.is_none()).count();

    let message =
        format!("{} valid workflows; {unrouted} categories without a workflow", catalog.len());
    Ok((message, WorkflowListing { workflows: catalog.workflows().cloned().collect(), routing }))
}
