pub mod engine;
pub mod progress;
pub mod states;

pub use engine::WorkflowEngine;
pub use progress::{describe, Progress};
pub use states::{
    Actor, Decision, DecisionOutcome, FollowUp, SubmissionOutcome, WorkflowEvent,
    WorkflowEventKind,
};
