use std::time::Duration;

use thiserror::Error;

use crate::capability::{Capability, ContextField};
use crate::plan::StepStatus;

/// Errors raised by the orchestration engine and its collaborators
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("No unit registered for capability: {0}")]
    MissingCapability(Capability),

    #[error("Decision oracle failed: {0}")]
    Oracle(String),

    #[error("Decision oracle timed out after {0:?}")]
    OracleTimeout(Duration),

    #[error("Malformed decision: {0}")]
    MalformedDecision(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Violations of the plan invariants
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("{0} steps are marked current, at most one is allowed")]
    MultipleCurrent(usize),

    #[error("step {index} cannot move from {from} to {to}")]
    IllegalTransition {
        index: usize,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("step {index} is unresolved and was dropped or replaced (expected {expected}, found {found})")]
    UnresolvedStepDropped {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("step index {0} is out of range")]
    OutOfRange(usize),
}

/// Failure reported by a capability unit. Never crosses the dispatch boundary:
/// the orchestrator turns it into a recorded failure on the context.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitError {
    #[error("required input {0} is not available")]
    MissingInput(ContextField),

    #[error("unit timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Failed(String),
}

impl From<sqlx::Error> for FlowError {
    fn from(err: sqlx::Error) -> Self {
        FlowError::StorageError(err.to_string())
    }
}

impl From<serde_yaml::Error> for FlowError {
    fn from(err: serde_yaml::Error) -> Self {
        FlowError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
