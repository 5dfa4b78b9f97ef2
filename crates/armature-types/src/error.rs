use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CategoryName, ComponentId, EventPath, ExecutionId, SafetyState, StateName};

fn join_states(states: &[StateName]) -> String {
    states
        .iter()
        .map(StateName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors returned by the runtime controller and by execution handles.
///
/// Admission errors (`UnknownCommand`, `StateNotAllowed`, `CategoryFull`,
/// `SafetyLocked`) are returned synchronously from `execute` and leave the
/// controller untouched.  `Cancelled` and `HandlerError` are terminal
/// outcomes delivered only through an execution handle.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RuntimeError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Command not allowed in state {current} (allowed: {})", join_states(.allowed))]
    StateNotAllowed {
        current: StateName,
        allowed: Vec<StateName>,
    },

    #[error("Category {category} is full ({current}/{limit})")]
    CategoryFull {
        category: CategoryName,
        limit: usize,
        current: usize,
    },

    #[error("Command admission locked while safety state is {state}")]
    SafetyLocked { state: SafetyState },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Command handler failed: {reason}")]
    HandlerError { reason: String },

    #[error("Timed out after {0:?} waiting for the execution outcome")]
    AwaitTimeout(Duration),

    #[error("Unknown execution: {0}")]
    UnknownExecution(ExecutionId),

    #[error("Parameter {path} rejected: {reason}")]
    ParameterRejected { path: EventPath, reason: String },

    #[error("Runtime controller is not running")]
    Unavailable,
}

/// Failure of a single disarm callback.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("Disarm callback for {component} failed: {reason}")]
pub struct DisarmCallbackFailure {
    pub component: ComponentId,
    pub reason: String,
}

/// Errors returned by the safety controller.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyError {
    #[error("Robot is already armed")]
    AlreadyArmed,

    #[error("Robot is not armed")]
    NotArmed,

    #[error("Safety controller is not in the error state")]
    NotInErrorState,

    #[error("A disarm is already in progress")]
    Disarming,

    #[error("Safety controller is in the error state; force_disarm is required")]
    Faulted,

    /// Aggregate failure: at least one disarm callback failed, timed out or
    /// crashed, and the controller is now in the error state.
    #[error("Disarm failed for {} component(s)", .failures.len())]
    DisarmFailed { failures: Vec<DisarmCallbackFailure> },

    #[error("Invalid disarm registration: {0}")]
    InvalidRegistration(String),

    #[error("Safety controller is not running")]
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_not_allowed_lists_allowed_states() {
        let err = RuntimeError::StateNotAllowed {
            current: StateName::executing(),
            allowed: vec![StateName::idle(), StateName::from("calibrating")],
        };
        let msg = err.to_string();
        assert!(msg.contains("executing"));
        assert!(msg.contains("idle, calibrating"));
    }

    #[test]
    fn category_full_display() {
        let err = RuntimeError::CategoryFull {
            category: CategoryName::default_category(),
            limit: 1,
            current: 1,
        };
        assert_eq!(err.to_string(), "Category default is full (1/1)");
    }

    #[test]
    fn disarm_failed_counts_failures() {
        let err = SafetyError::DisarmFailed {
            failures: vec![
                DisarmCallbackFailure {
                    component: ComponentId::from("gripper"),
                    reason: "bus timeout".into(),
                },
                DisarmCallbackFailure {
                    component: ComponentId::from("base"),
                    reason: "crashed".into(),
                },
            ],
        };
        assert!(err.to_string().contains("2 component(s)"));
    }

    #[test]
    fn runtime_error_roundtrip() {
        let err = RuntimeError::SafetyLocked {
            state: SafetyState::Disarming,
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: RuntimeError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
