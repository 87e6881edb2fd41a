use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::category::CategoryId;
use crate::domain::expense::Expense;
use crate::domain::user::{UserDirectory, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A rule that closes approval of a conditional workflow once satisfied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ApprovalCondition {
    /// Percent of the eligible approver list that must have approved.
    Percentage { value: Decimal },
    KeyApprover {
        #[serde(rename = "approverId")]
        approver_id: UserId,
    },
    /// Minimum number of approvals from anyone in the list.
    AnyApprover { value: u32 },
}

impl ApprovalCondition {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Percentage { .. } => "percentage",
            Self::KeyApprover { .. } => "keyApprover",
            Self::AnyApprover { .. } => "anyApprover",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Percentage { value } => format!("percentage ({value})"),
            Self::KeyApprover { approver_id } => format!("keyApprover ({approver_id})"),
            Self::AnyApprover { value } => format!("anyApprover ({value})"),
        }
    }
}

/// Workflow as stored in the document tree, before validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRecord {
    pub id: WorkflowId,
    pub name: String,
    pub category: CategoryId,
    #[serde(rename = "type")]
    pub workflow_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Decimal>,
    #[serde(default)]
    pub config: WorkflowConfigRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfigRecord {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approvers: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ApprovalCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sequential_approvers: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditional_approvers: Vec<UserId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Sequential,
    Conditional,
    Threshold,
    Hybrid,
}

impl WorkflowType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sequential" => Some(Self::Sequential),
            "conditional" => Some(Self::Conditional),
            "threshold" => Some(Self::Threshold),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Conditional => "conditional",
            Self::Threshold => "threshold",
            Self::Hybrid => "hybrid",
        }
    }
}

/// How records with an unrecognized `type` are treated at load time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownWorkflowType {
    #[default]
    Reject,
    /// Process as sequential over whatever approver list the record carries.
    SequentialFallback,
}

impl std::str::FromStr for UnknownWorkflowType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "sequential_fallback" => Ok(Self::SequentialFallback),
            other => Err(format!(
                "unsupported unknown workflow type policy `{other}` (expected reject|sequential_fallback)"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkflowParseOptions {
    pub unknown_type: UnknownWorkflowType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequentialPolicy {
    pub approvers: Vec<UserId>,
}

impl SequentialPolicy {
    pub fn len(&self) -> usize {
        self.approvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.approvers.is_empty()
    }

    pub fn last_stage(&self) -> usize {
        self.approvers.len().saturating_sub(1)
    }

    /// Approver at `stage`, clamped to the last stage.
    pub fn approver_at(&self, stage: usize) -> Option<&UserId> {
        self.approvers.get(stage.min(self.last_stage()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalPolicy {
    pub approvers: Vec<UserId>,
    pub conditions: Vec<ApprovalCondition>,
}

impl ConditionalPolicy {
    pub fn is_eligible(&self, user_id: &UserId) -> bool {
        self.approvers.contains(user_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    pub threshold: Decimal,
    pub above_threshold: ConditionalPolicy,
}

impl ThresholdPolicy {
    pub fn auto_approves(&self, amount: Decimal) -> bool {
        amount <= self.threshold
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridPolicy {
    pub sequential: SequentialPolicy,
    pub conditional: ConditionalPolicy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowStrategy {
    Sequential(SequentialPolicy),
    Conditional(ConditionalPolicy),
    Threshold(ThresholdPolicy),
    Hybrid(HybridPolicy),
}

impl WorkflowStrategy {
    pub fn workflow_type(&self) -> WorkflowType {
        match self {
            Self::Sequential(_) => WorkflowType::Sequential,
            Self::Conditional(_) => WorkflowType::Conditional,
            Self::Threshold(_) => WorkflowType::Threshold,
            Self::Hybrid(_) => WorkflowType::Hybrid,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub category: CategoryId,
    pub strategy: WorkflowStrategy,
    /// The `type` string of the source record, kept when it fell back to sequential.
    pub declared_type: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowConfigError {
    #[error("workflow `{workflow_id}` has unsupported type `{workflow_type}`")]
    UnknownType { workflow_id: WorkflowId, workflow_type: String },
    #[error("workflow `{workflow_id}` requires a non-empty `{field}` list")]
    MissingApprovers { workflow_id: WorkflowId, field: &'static str },
    #[error("workflow `{workflow_id}` requires at least one approval condition")]
    MissingConditions { workflow_id: WorkflowId },
    #[error("threshold workflow `{workflow_id}` requires a threshold amount")]
    MissingThreshold { workflow_id: WorkflowId },
    #[error("threshold workflow `{workflow_id}` has negative threshold {threshold}")]
    NegativeThreshold { workflow_id: WorkflowId, threshold: Decimal },
    #[error("workflow `{workflow_id}` references unknown approver `{approver_id}`")]
    UnknownApprover { workflow_id: WorkflowId, approver_id: UserId },
    #[error("workflow `{workflow_id}` lists approver `{approver_id}` more than once")]
    DuplicateApprover { workflow_id: WorkflowId, approver_id: UserId },
    #[error("workflow `{workflow_id}` has percentage condition {value} outside (0, 100]")]
    InvalidPercentage { workflow_id: WorkflowId, value: Decimal },
    #[error("workflow `{workflow_id}` has an anyApprover condition requiring zero approvals")]
    ZeroApprovalCount { workflow_id: WorkflowId },
    #[error("workflow `{workflow_id}` key approver `{approver_id}` is not an eligible approver")]
    KeyApproverNotEligible { workflow_id: WorkflowId, approver_id: UserId },
    #[error("category `{category}` is covered by both `{first}` and `{second}`")]
    DuplicateCategory { category: CategoryId, first: WorkflowId, second: WorkflowId },
}

impl Workflow {
    pub fn workflow_type(&self) -> WorkflowType {
        self.strategy.workflow_type()
    }

    pub fn from_record<D>(
        record: &WorkflowRecord,
        directory: &D,
        options: WorkflowParseOptions,
    ) -> Result<Self, WorkflowConfigError>
    where
        D: UserDirectory + ?Sized,
    {
        let validator = RecordValidator { workflow_id: &record.id, directory };
        let config = &record.config;

        let strategy = match WorkflowType::parse(&record.workflow_type) {
            Some(WorkflowType::Sequential) => WorkflowStrategy::Sequential(
                validator.sequential(&config.approvers, "approvers")?,
            ),
            Some(WorkflowType::Conditional) => WorkflowStrategy::Conditional(
                validator.conditional(&config.approvers, "approvers", &config.conditions)?,
            ),
            Some(WorkflowType::Threshold) => {
                let threshold = record.threshold.ok_or_else(|| {
                    WorkflowConfigError::MissingThreshold { workflow_id: record.id.clone() }
                })?;
                if threshold < Decimal::ZERO {
                    return Err(WorkflowConfigError::NegativeThreshold {
                        workflow_id: record.id.clone(),
                        threshold,
                    });
                }
                // Without explicit conditions every listed approver has to sign off.
                let conditions = if config.conditions.is_empty() {
                    vec![ApprovalCondition::Percentage { value: Decimal::ONE_HUNDRED }]
                } else {
                    config.conditions.clone()
                };
                WorkflowStrategy::Threshold(ThresholdPolicy {
                    threshold,
                    above_threshold: validator.conditional(
                        &config.approvers,
                        "approvers",
                        &conditions,
                    )?,
                })
            }
            Some(WorkflowType::Hybrid) => WorkflowStrategy::Hybrid(HybridPolicy {
                sequential: validator
                    .sequential(&config.sequential_approvers, "sequentialApprovers")?,
                conditional: validator.conditional(
                    &config.conditional_approvers,
                    "conditionalApprovers",
                    &config.conditions,
                )?,
            }),
            None => match options.unknown_type {
                UnknownWorkflowType::Reject => {
                    return Err(WorkflowConfigError::UnknownType {
                        workflow_id: record.id.clone(),
                        workflow_type: record.workflow_type.clone(),
                    });
                }
                UnknownWorkflowType::SequentialFallback => {
                    let (approvers, field) = if config.approvers.is_empty() {
                        (&config.sequential_approvers, "sequentialApprovers")
                    } else {
                        (&config.approvers, "approvers")
                    };
                    WorkflowStrategy::Sequential(validator.sequential(approvers, field)?)
                }
            },
        };

        Ok(Self {
            id: record.id.clone(),
            name: record.name.clone(),
            category: record.category.clone(),
            strategy,
            declared_type: record.workflow_type.clone(),
        })
    }
}

struct RecordValidator<'a, D: ?Sized> {
    workflow_id: &'a WorkflowId,
    directory: &'a D,
}

impl<D> RecordValidator<'_, D>
where
    D: UserDirectory + ?Sized,
{
    fn sequential(
        &self,
        approvers: &[UserId],
        field: &'static str,
    ) -> Result<SequentialPolicy, WorkflowConfigError> {
        self.require_known(approvers, field)?;
        Ok(SequentialPolicy { approvers: approvers.to_vec() })
    }

    fn conditional(
        &self,
        approvers: &[UserId],
        field: &'static str,
        conditions: &[ApprovalCondition],
    ) -> Result<ConditionalPolicy, WorkflowConfigError> {
        self.require_known(approvers, field)?;

        let mut seen = HashSet::new();
        if let Some(duplicate) = approvers.iter().find(|approver| !seen.insert(*approver)) {
            return Err(WorkflowConfigError::DuplicateApprover {
                workflow_id: self.workflow_id.clone(),
                approver_id: duplicate.clone(),
            });
        }

        if conditions.is_empty() {
            return Err(WorkflowConfigError::MissingConditions {
                workflow_id: self.workflow_id.clone(),
            });
        }

        for condition in conditions {
            match condition {
                ApprovalCondition::Percentage { value } => {
                    if *value <= Decimal::ZERO || *value > Decimal::ONE_HUNDRED {
                        return Err(WorkflowConfigError::InvalidPercentage {
                            workflow_id: self.workflow_id.clone(),
                            value: *value,
                        });
                    }
                }
                ApprovalCondition::KeyApprover { approver_id } => {
                    if !self.directory.contains(approver_id) {
                        return Err(WorkflowConfigError::UnknownApprover {
                            workflow_id: self.workflow_id.clone(),
                            approver_id: approver_id.clone(),
                        });
                    }
                    if !approvers.contains(approver_id) {
                        return Err(WorkflowConfigError::KeyApproverNotEligible {
                            workflow_id: self.workflow_id.clone(),
                            approver_id: approver_id.clone(),
                        });
                    }
                }
                ApprovalCondition::AnyApprover { value } => {
                    if *value == 0 {
                        return Err(WorkflowConfigError::ZeroApprovalCount {
                            workflow_id: self.workflow_id.clone(),
                        });
                    }
                }
            }
        }

        Ok(ConditionalPolicy { approvers: approvers.to_vec(), conditions: conditions.to_vec() })
    }

    fn require_known(
        &self,
        approvers: &[UserId],
        field: &'static str,
    ) -> Result<(), WorkflowConfigError> {
        if approvers.is_empty() {
            return Err(WorkflowConfigError::MissingApprovers {
                workflow_id: self.workflow_id.clone(),
                field,
            });
        }

        match approvers.iter().find(|approver| !self.directory.contains(approver)) {
            Some(unknown) => Err(WorkflowConfigError::UnknownApprover {
                workflow_id: self.workflow_id.clone(),
                approver_id: unknown.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Validated workflows keyed by the category they govern; at most one per category.
#[derive(Clone, Debug, Default)]
pub struct WorkflowCatalog {
    by_category: BTreeMap<CategoryId, Workflow>,
}

impl WorkflowCatalog {
    pub fn build<'r, D>(
        records: impl IntoIterator<Item = &'r WorkflowRecord>,
        directory: &D,
        options: WorkflowParseOptions,
    ) -> Result<Self, WorkflowConfigError>
    where
        D: UserDirectory + ?Sized,
    {
        let mut by_category: BTreeMap<CategoryId, Workflow> = BTreeMap::new();

        for record in records {
            let workflow = Workflow::from_record(record, directory, options)?;
            if let Some(existing) = by_category.get(&workflow.category) {
                return Err(WorkflowConfigError::DuplicateCategory {
                    category: workflow.category.clone(),
                    first: existing.id.clone(),
                    second: workflow.id.clone(),
                });
            }
            by_category.insert(workflow.category.clone(), workflow);
        }

        Ok(Self { by_category })
    }

    pub fn for_category(&self, category: &CategoryId) -> Option<&Workflow> {
        self.by_category.get(category)
    }

    pub fn for_expense(&self, expense: &Expense) -> Option<&Workflow> {
        self.for_category(&expense.category)
    }

    pub fn workflows(&self) -> impl Iterator<Item = &Workflow> {
        self.by_category.values()
    }

    pub fn len(&self) -> usize {
        self.by_category.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_category.is_empty()
    }
}
