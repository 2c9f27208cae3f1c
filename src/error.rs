/// Structured error types for flow validation, input resolution and engine requests
///
/// Infrastructure failures travel as `anyhow::Error`; these enums carry the
/// user-facing configuration problems that end up on a failed execution.

use crate::gateway::ExecutionStatus;
use thiserror::Error;

/// Problems found while compiling a flow definition into an executable graph
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FlowError {
    #[error("Flow has no nodes")]
    Empty,

    #[error("Duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("Edge '{edge}' references unknown node '{node}'")]
    DanglingEdge { edge: String, node: String },

    #[error("Node '{node}' uses unknown step type '{step_type}'")]
    UnknownStepType { node: String, step_type: String },

    #[error("Flow must have at least one trigger node")]
    NoTrigger,

    #[error("Trigger node '{0}' must not have incoming edges")]
    TriggerHasIncoming(String),

    #[error("Flow contains a cycle through node '{0}'")]
    Cycle(String),

    #[error("Node '{node}' input '{input}' is produced by both '{first}' and '{second}'")]
    AmbiguousInput {
        node: String,
        input: String,
        first: String,
        second: String,
    },

    #[error("Unknown trigger node '{0}'")]
    UnknownTrigger(String),
}

/// Input resolution failures for a single node
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InputError {
    #[error("Node '{node}' is missing required input '{input}'")]
    Missing { node: String, input: String },

    #[error("Node '{node}' input '{input}' expected {expected}, got {actual}")]
    WrongType {
        node: String,
        input: String,
        expected: String,
        actual: String,
    },

    #[error("Node '{node}' input '{input}' value '{value}' is not one of {options:?}")]
    NotAnOption {
        node: String,
        input: String,
        value: String,
        options: Vec<String>,
    },
}

/// Requests the engine refuses to act on
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("Flow '{0}' is inactive")]
    FlowInactive(String),

    #[error("No webhook trigger for {method} /{path} in flow '{flow_id}'")]
    WebhookNotFound {
        flow_id: String,
        method: String,
        path: String,
    },

    #[error("Execution {id} is {status}, expected suspended")]
    NotSuspended { id: String, status: ExecutionStatus },

    #[error("Execution {id} is suspended at '{current}', not '{requested}'")]
    NodeMismatch {
        id: String,
        current: String,
        requested: String,
    },

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}
