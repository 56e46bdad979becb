//! Definition Validation
//!
//! Structural checks applied when a definition is loaded:
//! - at least one step
//! - non-empty, unique step ids (branch ids unique within their parallel step)
//! - successor references point to existing top-level steps
//! - parallel steps declare at least one branch
//!
//! Cycles are legal: rollback and re-entrant flows revisit earlier steps.

use std::collections::HashSet;

use log::{debug, info, warn};
use thiserror::Error;

use super::model::{Definition, Step, StepKind};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Workflow name is empty")]
    EmptyName,

    #[error("Workflow definition has no steps")]
    EmptyDefinition,

    #[error("Failed to parse workflow definition: {0}")]
    Parse(String),

    #[error("Step has empty or whitespace-only ID")]
    EmptyStepId,

    #[error("Duplicate step ID: '{0}'")]
    DuplicateStepId(String),

    #[error("Parallel step '{step}' declares branch '{branch}' twice")]
    DuplicateBranchId { step: String, branch: String },

    #[error("Step '{step}' references unknown step '{reference}'")]
    InvalidReference { step: String, reference: String },

    #[error("Step '{step}' has invalid priority '{value}' (expected low, medium or high)")]
    InvalidPriority { step: String, value: String },

    #[error("Parallel step '{step}': branch '{branch}' has type '{step_type}', only user_task branches are supported")]
    InvalidBranchType {
        step: String,
        branch: String,
        step_type: String,
    },

    #[error("Parallel step '{step}': branch '{branch}' cannot itself be parallel")]
    NestedParallel { step: String, branch: String },

    #[error("Parallel step '{0}' has no branches")]
    EmptyParallel(String),
}

/// Validates a single step's fields.
fn validate_step(step: &Step) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if step.id.trim().is_empty() {
        errors.push(ValidationError::EmptyStepId);
        return errors; // Can't validate further without ID
    }

    match &step.kind {
        StepKind::Parallel(branches) => {
            if branches.is_empty() {
                errors.push(ValidationError::EmptyParallel(step.id.clone()));
            }

            let mut seen = HashSet::new();
            for branch in branches {
                if branch.id.trim().is_empty() {
                    errors.push(ValidationError::EmptyStepId);
                } else if !seen.insert(branch.id.as_str()) {
                    errors.push(ValidationError::DuplicateBranchId {
                        step: step.id.clone(),
                        branch: branch.id.clone(),
                    });
                }
            }
        }
        StepKind::Unknown(type_name) => {
            warn!(
                "Step '{}' has unrecognised type '{}' and will be skipped at runtime",
                step.id, type_name
            );
        }
        StepKind::UserTask(params) => {
            if params.assignee.is_none()
                && params.candidate_users.is_empty()
                && params.candidate_groups.is_empty()
            {
                debug!("Step '{}' has no assignee or candidates", step.id);
            }
        }
        StepKind::Process | StepKind::Complete => {}
    }

    errors
}

/// Validates the entire definition structure.
///
/// Collects every problem rather than stopping at the first one.
pub fn validate_definition(definition: &Definition) -> Result<(), Vec<ValidationError>> {
    debug!("Validating definition with {} steps", definition.len());

    if definition.is_empty() {
        return Err(vec![ValidationError::EmptyDefinition]);
    }

    let mut errors = Vec::new();
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for step in definition.iter() {
        if !step.id.is_empty() && !seen_ids.insert(step.id.as_str()) {
            errors.push(ValidationError::DuplicateStepId(step.id.clone()));
        }
    }

    for step in definition.iter() {
        errors.extend(validate_step(step));

        for next_id in &step.next_steps {
            if !seen_ids.contains(next_id.as_str()) {
                errors.push(ValidationError::InvalidReference {
                    step: step.id.clone(),
                    reference: next_id.clone(),
                });
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    if !definition
        .iter()
        .any(|s| matches!(s.kind, StepKind::Complete))
    {
        warn!(
            "Definition '{}' has no complete step; instances will never finish on their own",
            definition.name
        );
    }

    info!(
        "Definition '{}' validated: {} steps",
        definition.name,
        definition.len()
    );
    Ok(())
}

/// Quick validation that returns a list of error messages.
///
/// Useful for editors and API responses.
pub fn quick_validate(definition: &Definition) -> Vec<String> {
    match validate_definition(definition) {
        Ok(()) => Vec::new(),
        Err(errors) => errors.iter().map(|e| e.to_string()).collect(),
    }
}
