use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::approvals::{ApprovalPhase, AssignmentResolver, ConditionTally, NoWorkflowApproval};
use crate::audit::{AuditAction, AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::expense::{ApprovalRecord, DecisionAction, Expense, ExpenseStatus, NewExpense};
use crate::domain::user::{User, UserId};
use crate::domain::workflow::{
    ApprovalCondition, ConditionalPolicy, SequentialPolicy, Workflow, WorkflowStrategy,
};
use crate::errors::WorkflowError;
use crate::notifications::NotificationAction;
use crate::workflow::states::{
    Actor, Decision, DecisionOutcome, FollowUp, SubmissionOutcome, WorkflowEvent,
    WorkflowEventKind,
};

/// Pure approval engine. Callers serialize `decide` per expense id.
#[derive(Clone, Debug, Default)]
pub struct WorkflowEngine {
    resolver: AssignmentResolver,
}

impl WorkflowEngine {
    pub fn new(no_workflow: NoWorkflowApproval) -> Self {
        Self { resolver: AssignmentResolver::new(no_workflow) }
    }

    pub fn resolver(&self) -> &AssignmentResolver {
        &self.resolver
    }

    pub fn is_assigned(&self, expense: &Expense, workflow: Option<&Workflow>, user: &User) -> bool {
        self.resolver.is_assigned(expense, workflow, user)
    }

    pub fn submit(
        &self,
        new_expense: NewExpense,
        workflow: Option<&Workflow>,
        submitter: &Actor,
        submitted_at: DateTime<Utc>,
    ) -> Result<SubmissionOutcome, WorkflowError> {
        validate_new_expense(&new_expense)?;

        let mut expense = new_expense.into_pending(submitted_at);
        let mut effects = Effects::new(submitted_at);

        effects.event(&expense, Some(submitter), WorkflowEventKind::Submitted, "submitted for approval");
        effects.audit(
            AuditAction::ExpenseSubmitted,
            format!("Employee {} submitted expense: {}", submitter.name, expense.title),
        );
        effects.notify_employee(&expense, NotificationAction::Submitted);

        match (auto_threshold(&expense, workflow), workflow) {
            (Some(threshold), _) => auto_approve(&mut expense, threshold, submitted_at, &mut effects),
            (None, Some(workflow)) => {
                for approver in self.resolver.assigned_approvers(&expense, workflow) {
                    effects.notify_approver(approver.clone());
                }
            }
            (None, None) => {}
        }

        let (events, follow_ups) = effects.finish();
        Ok(SubmissionOutcome { expense, events, follow_ups })
    }

    /// First evaluation of a stored claim. A pending threshold claim at or under
    /// its cutoff is auto-approved; `None` when nothing changes.
    pub fn evaluate(
        &self,
        expense: &Expense,
        workflow: Option<&Workflow>,
        evaluated_at: DateTime<Utc>,
    ) -> Option<DecisionOutcome> {
        if expense.is_terminal() {
            return None;
        }
        let threshold = auto_threshold(expense, workflow)?;

        let mut next = expense.clone();
        let mut effects = Effects::new(evaluated_at);
        auto_approve(&mut next, threshold, evaluated_at, &mut effects);

        let (events, follow_ups) = effects.finish();
        Some(DecisionOutcome { expense: next, events, follow_ups })
    }

    pub fn decide(
        &self,
        expense: &Expense,
        workflow: Option<&Workflow>,
        decision: &Decision,
    ) -> Result<DecisionOutcome, WorkflowError> {
        if expense.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal {
                expense_id: expense.id.clone(),
                status: expense.status,
            });
        }

        if workflow.is_none() && *self.resolver.no_workflow_policy() == NoWorkflowApproval::Disabled
        {
            return Err(WorkflowError::UnknownCategory { category: expense.category.clone() });
        }

        let approver = &decision.approver;
        if !self.resolver.is_assigned_as(expense, workflow, &approver.id, approver.role) {
            return Err(WorkflowError::NotAuthorized {
                expense_id: expense.id.clone(),
                user_id: approver.id.clone(),
            });
        }

        let mut next = expense.clone();
        next.approval_history.push(ApprovalRecord {
            approver_id: approver.id.clone(),
            approver_name: approver.name.clone(),
            action: decision.action,
            comment: decision.comment.clone(),
            timestamp: decision.decided_at,
        });

        let mut effects = Effects::new(decision.decided_at);
        match decision.action {
            DecisionAction::Reject => reject(&mut next, decision, &mut effects),
            DecisionAction::Approve => match workflow {
                None => {
                    approve_final(&mut next, decision, None, "(No workflow)".to_string(), &mut effects)
                }
                Some(workflow) => match &workflow.strategy {
                    WorkflowStrategy::Sequential(policy) => {
                        approve_sequential(&mut next, policy, decision, &mut effects)
                    }
                    WorkflowStrategy::Conditional(policy) => {
                        approve_conditional(&mut next, policy, 0, decision, &mut effects)
                    }
                    WorkflowStrategy::Threshold(policy) => approve_conditional(
                        &mut next,
                        &policy.above_threshold,
                        0,
                        decision,
                        &mut effects,
                    ),
                    WorkflowStrategy::Hybrid(policy) => match ApprovalPhase::of_hybrid(expense, policy) {
                        ApprovalPhase::Sequential { .. } => approve_hybrid_stage(
                            &mut next,
                            &policy.sequential,
                            &policy.conditional,
                            decision,
                            &mut effects,
                        ),
                        ApprovalPhase::Conditional => approve_conditional(
                            &mut next,
                            &policy.conditional,
                            policy.sequential.len(),
                            decision,
                            &mut effects,
                        ),
                    },
                },
            },
        }

        let (events, follow_ups) = effects.finish();
        Ok(DecisionOutcome { expense: next, events, follow_ups })
    }

    /// Runs `decide` and records the audit follow-ups, or a refusal entry on error.
    pub fn decide_with_audit<S>(
        &self,
        expense: &Expense,
        workflow: Option<&Workflow>,
        decision: &Decision,
        sink: &S,
        context: &AuditContext,
    ) -> Result<DecisionOutcome, WorkflowError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.decide(expense, workflow, decision);
        match &result {
            Ok(outcome) => {
                for follow_up in &outcome.follow_ups {
                    if let FollowUp::RecordAudit { action, description } = follow_up {
                        sink.emit(
                            AuditEvent::new(
                                context,
                                *action,
                                AuditCategory::Decision,
                                AuditOutcome::Success,
                                description.clone(),
                            )
                            .for_expense(expense.id.clone())
                            .at(decision.decided_at)
                            .with_metadata("status", outcome.expense.status.as_str())
                            .with_metadata("stage", outcome.expense.current_approval_stage.to_string()),
                        );
                    }
                }
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        context,
                        AuditAction::DecisionRefused,
                        AuditCategory::Decision,
                        AuditOutcome::Rejected,
                        format!(
                            "{} refused for expense {} by {}",
                            decision.action.as_str(),
                            expense.title,
                            decision.approver.name
                        ),
                    )
                    .for_expense(expense.id.clone())
                    .at(decision.decided_at)
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

fn validate_new_expense(new_expense: &NewExpense) -> Result<(), WorkflowError> {
    if new_expense.amount < Decimal::ZERO {
        return Err(WorkflowError::InvalidExpense(format!(
            "amount {} must not be negative",
            new_expense.amount
        )));
    }
    if new_expense.currency.trim().is_empty() {
        return Err(WorkflowError::InvalidExpense("currency is required".to_string()));
    }
    if new_expense.title.trim().is_empty() {
        return Err(WorkflowError::InvalidExpense("title is required".to_string()));
    }
    Ok(())
}

fn auto_threshold(expense: &Expense, workflow: Option<&Workflow>) -> Option<Decimal> {
    match &workflow?.strategy {
        WorkflowStrategy::Threshold(policy) if policy.auto_approves(expense.amount) => {
            Some(policy.threshold)
        }
        _ => None,
    }
}

fn auto_approve(
    expense: &mut Expense,
    threshold: Decimal,
    at: DateTime<Utc>,
    effects: &mut Effects,
) {
    expense.status = ExpenseStatus::Approved;
    expense.approved_at = Some(at);
    expense.auto_approved = true;

    effects.event(
        expense,
        None,
        WorkflowEventKind::AutoApproved { threshold },
        format!("auto-approved under threshold {threshold}"),
    );
    effects.audit(
        AuditAction::ExpenseApproved,
        format!("Expense {} auto-approved (under threshold ${threshold})", expense.title),
    );
    effects.notify_employee(expense, NotificationAction::Approved);
}

fn reject(expense: &mut Expense, decision: &Decision, effects: &mut Effects) {
    expense.status = ExpenseStatus::Rejected;
    expense.rejected_at = Some(decision.decided_at);
    expense.rejection_reason = decision.comment.clone();

    effects.event(
        expense,
        Some(&decision.approver),
        WorkflowEventKind::Rejected { reason: decision.comment.clone() },
        format!("rejected by {}", decision.approver.name),
    );
    effects.audit(
        AuditAction::ExpenseRejected,
        format!("Expense {} rejected by {}", expense.title, decision.approver.name),
    );
    effects.notify_employee(expense, NotificationAction::Rejected);
}

fn approve_final(
    expense: &mut Expense,
    decision: &Decision,
    condition: Option<ApprovalCondition>,
    detail: String,
    effects: &mut Effects,
) {
    expense.status = ExpenseStatus::Approved;
    expense.approved_at = Some(decision.decided_at);
    expense.final_approval_condition = condition.clone();

    effects.event(
        expense,
        Some(&decision.approver),
        WorkflowEventKind::Approved { next_approver: None, is_final: true, condition },
        format!("approved by {}", decision.approver.name),
    );
    effects.audit(
        AuditAction::ExpenseApproved,
        format!("Expense {} approved by {} {detail}", expense.title, decision.approver.name),
    );
    effects.notify_employee(expense, NotificationAction::Approved);
}

fn approve_sequential(
    expense: &mut Expense,
    policy: &SequentialPolicy,
    decision: &Decision,
    effects: &mut Effects,
) {
    let stage = expense.current_approval_stage.min(policy.last_stage());
    let detail = format!("(Stage {})", stage + 1);

    if stage >= policy.last_stage() {
        approve_final(expense, decision, None, detail, effects);
        return;
    }

    expense.current_approval_stage = stage + 1;
    let next_approver = policy.approver_at(stage + 1).cloned();
    effects.event(
        expense,
        Some(&decision.approver),
        WorkflowEventKind::Approved {
            next_approver: next_approver.clone(),
            is_final: false,
            condition: None,
        },
        format!("approved by {} and forwarded", decision.approver.name),
    );
    effects.audit(
        AuditAction::ExpenseApproved,
        format!("Expense {} approved by {} {detail}", expense.title, decision.approver.name),
    );
    if let Some(next_approver) = next_approver {
        effects.notify_approver(next_approver);
    }
}

fn approve_hybrid_stage(
    expense: &mut Expense,
    sequential: &SequentialPolicy,
    conditional: &ConditionalPolicy,
    decision: &Decision,
    effects: &mut Effects,
) {
    let stage = expense.current_approval_stage.min(sequential.last_stage());
    if stage < sequential.last_stage() {
        approve_sequential(expense, sequential, decision, effects);
        return;
    }

    // Last sequential stage cleared; the stage index stays on it.
    expense.current_approval_stage = stage;
    effects.event(
        expense,
        Some(&decision.approver),
        WorkflowEventKind::Approved { next_approver: None, is_final: false, condition: None },
        format!("approved by {}; conditional phase started", decision.approver.name),
    );
    effects.audit(
        AuditAction::ExpenseApproved,
        format!(
            "Expense {} approved by {} (Stage {}) - Conditional phase started",
            expense.title,
            decision.approver.name,
            stage + 1
        ),
    );
    for approver in &conditional.approvers {
        effects.notify_approver(approver.clone());
    }
}

fn approve_conditional(
    expense: &mut Expense,
    policy: &ConditionalPolicy,
    skip: usize,
    decision: &Decision,
    effects: &mut Effects,
) {
    let tally = ConditionTally::collect(expense, policy, skip);
    let satisfied = tally.first_satisfied(&policy.conditions).cloned();
    let (approvals, total) = (tally.count(), tally.eligible);

    match satisfied {
        Some(condition) => {
            let detail = format!("- Condition met: {}", condition.describe());
            approve_final(expense, decision, Some(condition), detail, effects);
        }
        None => {
            effects.event(
                expense,
                Some(&decision.approver),
                WorkflowEventKind::AwaitingMore { approvals, total },
                format!("approved by {}; {approvals} of {total} approvals", decision.approver.name),
            );
            effects.audit(
                AuditAction::ExpenseApproved,
                format!(
                    "Expense {} approved by {} - Awaiting more approvals ({approvals}/{total})",
                    expense.title, decision.approver.name
                ),
            );
        }
    }
}

struct Effects {
    occurred_at: DateTime<Utc>,
    events: Vec<WorkflowEvent>,
    follow_ups: Vec<FollowUp>,
}

impl Effects {
    fn new(occurred_at: DateTime<Utc>) -> Self {
        Self { occurred_at, events: Vec::new(), follow_ups: Vec::new() }
    }

    fn event(
        &mut self,
        expense: &Expense,
        actor: Option<&Actor>,
        kind: WorkflowEventKind,
        message: impl Into<String>,
    ) {
        self.events.push(WorkflowEvent {
            expense_id: expense.id.clone(),
            actor: actor.map(|actor| actor.id.clone()),
            occurred_at: self.occurred_at,
            kind,
            message: message.into(),
        });
    }

    fn audit(&mut self, action: AuditAction, description: String) {
        self.follow_ups.push(FollowUp::RecordAudit { action, description });
    }

    fn notify_employee(&mut self, expense: &Expense, action: NotificationAction) {
        self.follow_ups
            .push(FollowUp::NotifyEmployee { employee_id: expense.employee_id.clone(), action });
    }

    fn notify_approver(&mut self, approver_id: UserId) {
        self.follow_ups.push(FollowUp::NotifyApprover { approver_id });
    }

    fn finish(self) -> (Vec<WorkflowEvent>, Vec<FollowUp>) {
        (self.events, self.follow_ups)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use crate::approvals::NoWorkflowApproval;
    use crate::audit::{AuditAction, AuditContext, InMemoryAuditSink};
    use crate::domain::category::CategoryId;
    use crate::domain::expense::{DecisionAction, Expense, ExpenseId, ExpenseStatus, NewExpense};
    use crate::domain::user::{User, UserId, UserRole};
    use crate::domain::workflow::{
        ApprovalCondition, ConditionalPolicy, HybridPolicy, SequentialPolicy, ThresholdPolicy,
        Workflow, WorkflowId, WorkflowStrategy,
    };
    use crate::errors::WorkflowError;
    use crate::notifications::NotificationAction;
    use crate::workflow::engine::WorkflowEngine;
    use crate::workflow::states::{Actor, Decision, FollowUp, WorkflowEventKind};

    fn ids(raw: &[&str]) -> Vec<UserId> {
        raw.iter().map(|id| UserId::new(*id)).collect()
    }

    fn user(id: &str) -> User {
        User::new(id, id.trim_start_matches("u-").to_uppercase(), UserRole::Manager)
    }

    fn workflow(strategy: WorkflowStrategy) -> Workflow {
        Workflow {
            id: WorkflowId::new("wf-1"),
            name: "Travel".to_string(),
            category: CategoryId::new("cat-travel"),
            declared_type: strategy.workflow_type().as_str().to_string(),
            strategy,
        }
    }

    fn sequential(approvers: &[&str]) -> Workflow {
        workflow(WorkflowStrategy::Sequential(SequentialPolicy { approvers: ids(approvers) }))
    }

    fn conditional(approvers: &[&str], conditions: Vec<ApprovalCondition>) -> Workflow {
        workflow(WorkflowStrategy::Conditional(ConditionalPolicy {
            approvers: ids(approvers),
            conditions,
        }))
    }

    fn threshold(amount: i64, approvers: &[&str]) -> Workflow {
        workflow(WorkflowStrategy::Threshold(ThresholdPolicy {
            threshold: Decimal::from(amount),
            above_threshold: ConditionalPolicy {
                approvers: ids(approvers),
                conditions: vec![ApprovalCondition::Percentage { value: Decimal::ONE_HUNDRED }],
            },
        }))
    }

    fn new_expense(amount: Decimal) -> NewExpense {
        NewExpense {
            id: ExpenseId::new("exp-1"),
            employee_id: UserId::new("u-emp"),
            title: "Flight".to_string(),
            description: None,
            amount,
            currency: "USD".to_string(),
            category: CategoryId::new("cat-travel"),
            date: None,
            receipts: Vec::new(),
        }
    }

    fn submitter() -> Actor {
        Actor::from(&User::new("u-emp", "Emery", UserRole::Employee))
    }

    fn submit(engine: &WorkflowEngine, workflow: Option<&Workflow>, amount: Decimal) -> Expense {
        engine
            .submit(new_expense(amount), workflow, &submitter(), Utc::now())
            .expect("submission should succeed")
            .expense
    }

    fn approve(engine: &WorkflowEngine, expense: &Expense, workflow: Option<&Workflow>, who: &str) -> Expense {
        engine
            .decide(expense, workflow, &Decision::approve(&user(who), Utc::now()))
            .expect("approval should succeed")
            .expense
    }

    #[test]
    fn sequential_two_stage_approval() {
        let engine = WorkflowEngine::default();
        let workflow = sequential(&["u-a", "u-b"]);
        let expense = submit(&engine, Some(&workflow), Decimal::from(100));

        let outcome = engine
            .decide(&expense, Some(&workflow), &Decision::approve(&user("u-a"), Utc::now()))
            .expect("first stage approval");
        assert_eq!(outcome.expense.status, ExpenseStatus::Pending);
        assert_eq!(outcome.expense.current_approval_stage, 1);
        assert!(matches!(
            &outcome.events[0].kind,
            WorkflowEventKind::Approved { next_approver: Some(next), is_final: false, .. }
                if next == &UserId::new("u-b")
        ));
        assert!(outcome
            .follow_ups
            .contains(&FollowUp::NotifyApprover { approver_id: UserId::new("u-b") }));

        let approved = approve(&engine, &outcome.expense, Some(&workflow), "u-b");
        assert_eq!(approved.status, ExpenseStatus::Approved);
        assert!(approved.approved_at.is_some());
        assert_eq!(approved.approval_history.len(), 2);
        assert_eq!(approved.current_approval_stage, 1);
    }

    #[test]
    fn sequential_rejects_approver_out_of_turn() {
        let engine = WorkflowEngine::default();
        let workflow = sequential(&["u-a", "u-b", "u-c"]);
        let expense = submit(&engine, Some(&workflow), Decimal::from(100));

        let error = engine
            .decide(&expense, Some(&workflow), &Decision::approve(&user("u-b"), Utc::now()))
            .expect_err("stage two approver cannot act at stage one");

        assert_eq!(
            error,
            WorkflowError::NotAuthorized { expense_id: expense.id.clone(), user_id: UserId::new("u-b") }
        );
    }

    #[test]
    fn sequential_n_stages_need_n_approvals() {
        let engine = WorkflowEngine::default();
        let approvers = ["u-a", "u-b", "u-c", "u-d"];
        let workflow = sequential(&approvers);
        let mut expense = submit(&engine, Some(&workflow), Decimal::from(100));

        for (index, approver) in approvers.iter().enumerate() {
            assert_eq!(expense.status, ExpenseStatus::Pending);
            assert_eq!(expense.current_approval_stage, index);
            expense = approve(&engine, &expense, Some(&workflow), approver);
        }

        assert_eq!(expense.status, ExpenseStatus::Approved);
        assert_eq!(expense.current_approval_stage, approvers.len() - 1);
    }

    #[test]
    fn conditional_percentage_closes_at_half() {
        let engine = WorkflowEngine::default();
        let workflow = conditional(
            &["u-a", "u-b", "u-c"],
            vec![ApprovalCondition::Percentage { value: Decimal::from(50) }],
        );
        let expense = submit(&engine, Some(&workflow), Decimal::from(100));

        let first = engine
            .decide(&expense, Some(&workflow), &Decision::approve(&user("u-a"), Utc::now()))
            .expect("first approval");
        assert_eq!(first.expense.status, ExpenseStatus::Pending);
        assert_eq!(first.events[0].kind, WorkflowEventKind::AwaitingMore { approvals: 1, total: 3 });

        let second = approve(&engine, &first.expense, Some(&workflow), "u-b");
        assert_eq!(second.status, ExpenseStatus::Approved);
        assert_eq!(
            second.final_approval_condition,
            Some(ApprovalCondition::Percentage { value: Decimal::from(50) })
        );
    }

    #[test]
    fn conditional_first_satisfied_condition_wins() {
        let engine = WorkflowEngine::default();
        let workflow = conditional(
            &["u-a", "u-b", "u-c"],
            vec![
                ApprovalCondition::KeyApprover { approver_id: UserId::new("u-c") },
                ApprovalCondition::AnyApprover { value: 1 },
            ],
        );
        let expense = submit(&engine, Some(&workflow), Decimal::from(100));

        let approved = approve(&engine, &expense, Some(&workflow), "u-c");
        assert_eq!(
            approved.final_approval_condition,
            Some(ApprovalCondition::KeyApprover { approver_id: UserId::new("u-c") })
        );
    }

    #[test]
    fn conditional_approver_cannot_approve_twice() {
        let engine = WorkflowEngine::default();
        let workflow = conditional(&["u-a", "u-b"], vec![ApprovalCondition::AnyApprover { value: 2 }]);
        let expense = submit(&engine, Some(&workflow), Decimal::from(100));
        let once = approve(&engine, &expense, Some(&workflow), "u-a");

        let error = engine
            .decide(&once, Some(&workflow), &Decision::approve(&user("u-a"), Utc::now()))
            .expect_err("repeat approval should be refused");
        assert!(matches!(error, WorkflowError::NotAuthorized { .. }));
    }

    #[test]
    fn rejection_is_terminal_and_preserves_prior_approvals() {
        let engine = WorkflowEngine::default();
        let workflow = conditional(&["u-a", "u-b", "u-c"], vec![ApprovalCondition::AnyApprover { value: 3 }]);
        let expense = submit(&engine, Some(&workflow), Decimal::from(100));
        let approved_once = approve(&engine, &expense, Some(&workflow), "u-a");

        let outcome = engine
            .decide(
                &approved_once,
                Some(&workflow),
                &Decision::reject(&user("u-b"), Utc::now()).with_comment("Missing receipt"),
            )
            .expect("rejection should succeed");

        let rejected = outcome.expense;
        assert_eq!(rejected.status, ExpenseStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("Missing receipt"));
        assert_eq!(rejected.approval_history.len(), 2);
        assert_eq!(rejected.approval_history[0].action, DecisionAction::Approve);
        assert_eq!(rejected.approval_history[1].action, DecisionAction::Reject);
        assert!(outcome.follow_ups.contains(&FollowUp::NotifyEmployee {
            employee_id: UserId::new("u-emp"),
            action: NotificationAction::Rejected,
        }));

        let error = engine
            .decide(&rejected, Some(&workflow), &Decision::approve(&user("u-c"), Utc::now()))
            .expect_err("terminal claims accept no decisions");
        assert!(matches!(
            error,
            WorkflowError::AlreadyTerminal { status: ExpenseStatus::Rejected, .. }
        ));
    }

    #[test]
    fn threshold_auto_approves_at_or_below_cutoff() {
        let engine = WorkflowEngine::default();
        let workflow = threshold(200, &["u-a"]);

        let outcome = engine
            .submit(new_expense(Decimal::from(150)), Some(&workflow), &submitter(), Utc::now())
            .expect("submission");
        assert_eq!(outcome.expense.status, ExpenseStatus::Approved);
        assert!(outcome.expense.auto_approved);
        assert!(outcome.expense.approval_history.is_empty());
        assert!(outcome
            .events
            .iter()
            .any(|event| event.kind == WorkflowEventKind::AutoApproved { threshold: Decimal::from(200) }));

        let boundary = submit(&engine, Some(&workflow), Decimal::from(200));
        assert_eq!(boundary.status, ExpenseStatus::Approved);

        let just_above = submit(&engine, Some(&workflow), Decimal::new(20_001, 2));
        assert_eq!(just_above.status, ExpenseStatus::Pending);
        assert!(!just_above.auto_approved);
    }

    #[test]
    fn threshold_above_cutoff_requires_listed_approver() {
        let engine = WorkflowEngine::default();
        let workflow = threshold(200, &["u-a"]);
        let expense = submit(&engine, Some(&workflow), Decimal::from(250));

        assert!(engine.is_assigned(&expense, Some(&workflow), &user("u-a")));
        let approved = approve(&engine, &expense, Some(&workflow), "u-a");
        assert_eq!(approved.status, ExpenseStatus::Approved);
        assert!(!approved.auto_approved);
    }

    #[test]
    fn no_workflow_open_policy_lets_anyone_approve() {
        let engine = WorkflowEngine::new(NoWorkflowApproval::Open);
        let expense = submit(&engine, None, Decimal::from(80));
        let employee = User::new("u-peer", "Peer", UserRole::Employee);

        let outcome = engine
            .decide(&expense, None, &Decision::approve(&employee, Utc::now()))
            .expect("open policy approves");
        assert_eq!(outcome.expense.status, ExpenseStatus::Approved);
        assert!(outcome.follow_ups.iter().any(|follow_up| matches!(
            follow_up,
            FollowUp::RecordAudit { description, .. } if description.ends_with("(No workflow)")
        )));
    }

    #[test]
    fn no_workflow_default_policy_limits_roles() {
        let engine = WorkflowEngine::default();
        let expense = submit(&engine, None, Decimal::from(80));
        let employee = User::new("u-peer", "Peer", UserRole::Employee);

        let error = engine
            .decide(&expense, None, &Decision::approve(&employee, Utc::now()))
            .expect_err("employees cannot approve unconfigured categories");
        assert!(matches!(error, WorkflowError::NotAuthorized { .. }));

        let approved = approve(&engine, &expense, None, "u-a");
        assert_eq!(approved.status, ExpenseStatus::Approved);
    }

    #[test]
    fn no_workflow_disabled_policy_reports_unknown_category() {
        let engine = WorkflowEngine::new(NoWorkflowApproval::Disabled);
        let expense = submit(&engine, None, Decimal::from(80));

        let error = engine
            .decide(&expense, None, &Decision::approve(&user("u-a"), Utc::now()))
            .expect_err("disabled policy refuses");
        assert_eq!(error, WorkflowError::UnknownCategory { category: CategoryId::new("cat-travel") });
    }

    #[test]
    fn hybrid_runs_sequential_then_conditional_phase() {
        let engine = WorkflowEngine::default();
        let workflow = workflow(WorkflowStrategy::Hybrid(HybridPolicy {
            sequential: SequentialPolicy { approvers: ids(&["u-a", "u-b"]) },
            conditional: ConditionalPolicy {
                approvers: ids(&["u-c", "u-d", "u-e"]),
                conditions: vec![ApprovalCondition::AnyApprover { value: 2 }],
            },
        }));
        let expense = submit(&engine, Some(&workflow), Decimal::from(900));

        let after_a = approve(&engine, &expense, Some(&workflow), "u-a");
        assert_eq!(after_a.current_approval_stage, 1);

        let outcome = engine
            .decide(&after_a, Some(&workflow), &Decision::approve(&user("u-b"), Utc::now()))
            .expect("second sequential approval");
        let after_b = outcome.expense;
        assert_eq!(after_b.status, ExpenseStatus::Pending);
        assert_eq!(after_b.current_approval_stage, 1);
        assert_eq!(
            outcome.follow_ups.iter().filter(|f| matches!(f, FollowUp::NotifyApprover { .. })).count(),
            3
        );

        let after_c = approve(&engine, &after_b, Some(&workflow), "u-c");
        assert_eq!(after_c.status, ExpenseStatus::Pending);

        let after_d = approve(&engine, &after_c, Some(&workflow), "u-d");
        assert_eq!(after_d.status, ExpenseStatus::Approved);
        assert_eq!(
            after_d.final_approval_condition,
            Some(ApprovalCondition::AnyApprover { value: 2 })
        );
    }

    #[test]
    fn history_and_stage_only_grow() {
        let engine = WorkflowEngine::default();
        let workflow = sequential(&["u-a", "u-b", "u-c"]);
        let mut expense = submit(&engine, Some(&workflow), Decimal::from(100));
        let mut decided_at = Utc::now();

        for approver in ["u-a", "u-b", "u-c"] {
            decided_at += Duration::seconds(1);
            let next = engine
                .decide(&expense, Some(&workflow), &Decision::approve(&user(approver), decided_at))
                .expect("approval")
                .expense;
            assert_eq!(next.approval_history.len(), expense.approval_history.len() + 1);
            assert_eq!(next.approval_history[..expense.approval_history.len()], expense.approval_history[..]);
            assert!(next.current_approval_stage >= expense.current_approval_stage);
            expense = next;
        }
    }

    #[test]
    fn decide_leaves_the_input_untouched() {
        let engine = WorkflowEngine::default();
        let workflow = sequential(&["u-a", "u-b"]);
        let expense = submit(&engine, Some(&workflow), Decimal::from(100));
        let before = expense.clone();

        let _ = engine.decide(&expense, Some(&workflow), &Decision::approve(&user("u-a"), Utc::now()));
        assert_eq!(expense, before);
    }

    #[test]
    fn submission_validates_amount_and_currency() {
        let engine = WorkflowEngine::default();

        let negative = engine
            .submit(new_expense(Decimal::from(-5)), None, &submitter(), Utc::now())
            .expect_err("negative amounts are invalid");
        assert!(matches!(negative, WorkflowError::InvalidExpense(_)));

        let mut missing_currency = new_expense(Decimal::from(5));
        missing_currency.currency = "  ".to_string();
        let error = engine
            .submit(missing_currency, None, &submitter(), Utc::now())
            .expect_err("currency is required");
        assert!(matches!(error, WorkflowError::InvalidExpense(_)));
    }

    #[test]
    fn submission_notifies_initial_approvers() {
        let engine = WorkflowEngine::default();
        let workflow = sequential(&["u-a", "u-b"]);

        let outcome = engine
            .submit(new_expense(Decimal::from(100)), Some(&workflow), &submitter(), Utc::now())
            .expect("submission");

        assert_eq!(outcome.events[0].kind, WorkflowEventKind::Submitted);
        assert!(outcome
            .follow_ups
            .contains(&FollowUp::NotifyApprover { approver_id: UserId::new("u-a") }));
        assert!(!outcome
            .follow_ups
            .contains(&FollowUp::NotifyApprover { approver_id: UserId::new("u-b") }));
        assert!(outcome.follow_ups.contains(&FollowUp::RecordAudit {
            action: AuditAction::ExpenseSubmitted,
            description: "Employee Emery submitted expense: Flight".to_string(),
        }));
    }

    #[test]
    fn decide_with_audit_records_success_and_refusal() {
        let engine = WorkflowEngine::default();
        let workflow = sequential(&["u-a", "u-b"]);
        let expense = submit(&engine, Some(&workflow), Decimal::from(100));
        let sink = InMemoryAuditSink::default();
        let context = AuditContext::new("req-7", Some(UserId::new("u-a")), "A");

        engine
            .decide_with_audit(
                &expense,
                Some(&workflow),
                &Decision::approve(&user("u-a"), Utc::now()),
                &sink,
                &context,
            )
            .expect("approval");
        let _ = engine.decide_with_audit(
            &expense,
            Some(&workflow),
            &Decision::approve(&user("u-b"), Utc::now()),
            &sink,
            &context,
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, AuditAction::ExpenseApproved);
        assert_eq!(events[0].description, "Expense Flight approved by A (Stage 1)");
        assert_eq!(events[1].action, AuditAction::DecisionRefused);
        assert_eq!(events[1].correlation_id, "req-7");
    }

    fn hybrid(sequential_approvers: &[&str], conditional_approvers: &[&str]) -> Workflow {
        workflow(WorkflowStrategy::Hybrid(HybridPolicy {
            sequential: SequentialPolicy { approvers: ids(sequential_approvers) },
            conditional: ConditionalPolicy {
                approvers: ids(conditional_approvers),
                conditions: vec![ApprovalCondition::AnyApprover { value: 2 }],
            },
        }))
    }

    fn reject_with_reason(
        engine: &WorkflowEngine,
        expense: &Expense,
        workflow: Option<&Workflow>,
        approver: &User,
    ) -> Expense {
        let outcome = engine
            .decide(expense, workflow, &Decision::reject(approver, Utc::now()).with_comment("Over budget"))
            .expect("rejection should succeed");
        assert!(matches!(
            &outcome.events[0].kind,
            WorkflowEventKind::Rejected { reason: Some(reason) } if reason == "Over budget"
        ));
        outcome.expense
    }

    fn assert_rejected(before: &Expense, after: &Expense) {
        assert_eq!(after.status, ExpenseStatus::Rejected);
        assert!(after.rejected_at.is_some());
        assert!(after.approved_at.is_none());
        assert_eq!(after.rejection_reason.as_deref(), Some("Over budget"));
        assert_eq!(after.approval_history.len(), before.approval_history.len() + 1);
        assert_eq!(after.approval_history[..before.approval_history.len()], before.approval_history[..]);
        assert_eq!(after.approval_history.last().map(|record| record.action), Some(DecisionAction::Reject));
        assert_eq!(after.current_approval_stage, before.current_approval_stage);
    }

    #[test]
    fn sequential_rejection_mid_stage_is_terminal() {
        let engine = WorkflowEngine::default();
        let workflow = sequential(&["u-a", "u-b", "u-c"]);
        let expense = submit(&engine, Some(&workflow), Decimal::from(100));
        let at_stage_two = approve(&engine, &expense, Some(&workflow), "u-a");
        assert_eq!(at_stage_two.current_approval_stage, 1);

        let rejected = reject_with_reason(&engine, &at_stage_two, Some(&workflow), &user("u-b"));
        assert_rejected(&at_stage_two, &rejected);

        let error = engine
            .decide(&rejected, Some(&workflow), &Decision::approve(&user("u-c"), Utc::now()))
            .expect_err("later stages cannot revive the claim");
        assert!(matches!(error, WorkflowError::AlreadyTerminal { .. }));
    }

    #[test]
    fn hybrid_rejection_ends_the_claim_in_either_phase() {
        let engine = WorkflowEngine::default();
        let workflow = hybrid(&["u-a", "u-b"], &["u-c", "u-d", "u-e"]);
        let expense = submit(&engine, Some(&workflow), Decimal::from(900));

        let sequential_phase = approve(&engine, &expense, Some(&workflow), "u-a");
        let rejected = reject_with_reason(&engine, &sequential_phase, Some(&workflow), &user("u-b"));
        assert_rejected(&sequential_phase, &rejected);

        let after_b = approve(&engine, &sequential_phase, Some(&workflow), "u-b");
        let conditional_phase = approve(&engine, &after_b, Some(&workflow), "u-c");
        assert_eq!(conditional_phase.status, ExpenseStatus::Pending);
        let rejected = reject_with_reason(&engine, &conditional_phase, Some(&workflow), &user("u-d"));
        assert_rejected(&conditional_phase, &rejected);
        assert_eq!(rejected.approval_history.len(), 4);
    }

    #[test]
    fn threshold_rejection_above_cutoff_keeps_earlier_approvals() {
        let engine = WorkflowEngine::default();
        let workflow = threshold(200, &["u-a", "u-b"]);
        let expense = submit(&engine, Some(&workflow), Decimal::from(250));
        let half_approved = approve(&engine, &expense, Some(&workflow), "u-a");
        assert_eq!(half_approved.status, ExpenseStatus::Pending);

        let rejected = reject_with_reason(&engine, &half_approved, Some(&workflow), &user("u-b"));
        assert_rejected(&half_approved, &rejected);
        assert!(!rejected.auto_approved);
    }

    #[test]
    fn no_workflow_rejection_follows_policy() {
        let roles = WorkflowEngine::default();
        let expense = submit(&roles, None, Decimal::from(80));
        let rejected = reject_with_reason(&roles, &expense, None, &user("u-a"));
        assert_rejected(&expense, &rejected);

        let open = WorkflowEngine::new(NoWorkflowApproval::Open);
        let expense = submit(&open, None, Decimal::from(80));
        let peer = User::new("u-peer", "Peer", UserRole::Employee);
        let rejected = reject_with_reason(&open, &expense, None, &peer);
        assert_rejected(&expense, &rejected);
    }

    #[test]
    fn evaluate_auto_approves_stored_claims_under_threshold() {
        let engine = WorkflowEngine::default();
        let workflow = threshold(200, &["u-a"]);
        let mut stored = submit(&engine, Some(&workflow), Decimal::from(250));
        stored.amount = Decimal::from(150);
        assert!(engine.resolver().assigned_approvers(&stored, &workflow).is_empty());

        let outcome = engine
            .evaluate(&stored, Some(&workflow), Utc::now())
            .expect("claim under threshold is settled");
        assert_eq!(outcome.expense.status, ExpenseStatus::Approved);
        assert!(outcome.expense.auto_approved);
        assert!(outcome.expense.approved_at.is_some());
        assert!(outcome.expense.approval_history.is_empty());
        assert_eq!(
            outcome.events[0].kind,
            WorkflowEventKind::AutoApproved { threshold: Decimal::from(200) }
        );
        assert!(outcome.follow_ups.contains(&FollowUp::NotifyEmployee {
            employee_id: UserId::new("u-emp"),
            action: NotificationAction::Approved,
        }));

        assert!(engine.evaluate(&outcome.expense, Some(&workflow), Utc::now()).is_none());
    }

    #[test]
    fn evaluate_leaves_other_claims_alone() {
        let engine = WorkflowEngine::default();
        let over = threshold(200, &["u-a"]);
        let above = submit(&engine, Some(&over), Decimal::from(250));
        assert!(engine.evaluate(&above, Some(&over), Utc::now()).is_none());

        let chain = sequential(&["u-a"]);
        let small = submit(&engine, Some(&chain), Decimal::from(5));
        assert!(engine.evaluate(&small, Some(&chain), Utc::now()).is_none());
        assert!(engine.evaluate(&small, None, Utc::now()).is_none());
    }
}
