//! Engine Errors
//!
//! A single error type shared by the entity state machines, the engine
//! and the services built on top of it.

use thiserror::Error;
use uuid::Uuid;

use crate::definition::validator::ValidationError;

/// Errors returned by workflow, instance and task operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("workflow instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("step '{0}' not found in workflow definition")]
    StepNotFound(String),

    #[error("invalid status transition: cannot {action} {entity} in status '{from}'")]
    InvalidStatusTransition {
        entity: &'static str,
        from: String,
        action: &'static str,
    },

    #[error("user '{user}' is not allowed to act on task {task_id}")]
    Unauthorized { user: String, task_id: Uuid },

    #[error("task {0} is not pending")]
    TaskNotPending(Uuid),

    #[error("task {task_id} cannot be claimed by '{user}'")]
    TaskNotClaimable { user: String, task_id: Uuid },

    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("cannot reject task {0}: no previously completed task to return to")]
    NoPreviousTask(Uuid),

    #[error("workflow instance {0} is not running")]
    InstanceNotRunning(Uuid),

    #[error("more than {0} automatic steps executed in a single call")]
    StepLimitExceeded(usize),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Shorthand for an illegal state machine transition.
    pub fn transition(entity: &'static str, from: impl ToString, action: &'static str) -> Self {
        Self::InvalidStatusTransition {
            entity,
            from: from.to_string(),
            action,
        }
    }

    /// Returns true for the invalid-status-transition family.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidStatusTransition { .. })
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidDefinition(err.to_string())
    }
}

impl From<Vec<ValidationError>> for EngineError {
    fn from(errors: Vec<ValidationError>) -> Self {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        Self::InvalidDefinition(messages.join("; "))
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_message() {
        let err = EngineError::transition("workflow", "draft", "freeze");
        assert!(err.is_invalid_transition());
        assert_eq!(
            err.to_string(),
            "invalid status transition: cannot freeze workflow in status 'draft'"
        );
    }

    #[test]
    fn test_validation_errors_join() {
        let err: EngineError = vec![
            ValidationError::EmptyDefinition,
            ValidationError::DuplicateStepId("a".to_string()),
        ]
        .into();

        let message = err.to_string();
        assert!(message.contains("no steps"));
        assert!(message.contains("Duplicate step ID: 'a'"));
    }
}
