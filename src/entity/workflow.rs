//! Workflow Entity
//!
//! A stored, versionless process definition and its lifecycle:
//!
//! ```text
//! draft --activate--> active --freeze--> frozen --activate--> active
//! active --complete--> completed
//! active --fail--> failed
//! draft | active | frozen --cancel--> cancelled
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::definition::{parse_definition, Definition, ValidationError};
use crate::error::{EngineError, Result};

/// Lifecycle status of a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Frozen,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub const ALL: [WorkflowStatus; 6] = [
        Self::Draft,
        Self::Active,
        Self::Frozen,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Frozen => "frozen",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A workflow: name, description and the JSON step graph.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Definition in its JSON wire form, parsed on every engine call
    pub definition: String,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Creates a draft workflow.
    ///
    /// Fails with `InvalidDefinition` when the name is blank or the
    /// definition does not parse into at least one step.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        definition: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }

        let definition = definition.into();
        parse_definition(&definition)?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            description: description.into(),
            definition,
            status: WorkflowStatus::Draft,
            created_at: now,
            updated_at: now,
        })
    }

    /// Creates a draft workflow from an already typed definition.
    pub fn from_definition(definition: &Definition) -> Result<Self> {
        let json = serde_json::to_string(definition)?;
        Self::new(definition.name.clone(), definition.description.clone(), json)
    }

    /// Parses the current definition.
    pub fn parsed_definition(&self) -> Result<Definition> {
        parse_definition(&self.definition)
    }

    /// Replaces the stored definition after validating it.
    pub fn replace_definition(&mut self, definition: impl Into<String>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(EngineError::transition("workflow", self.status, "edit"));
        }
        let definition = definition.into();
        parse_definition(&definition)?;
        self.definition = definition;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn transition(
        &mut self,
        allowed: &[WorkflowStatus],
        target: WorkflowStatus,
        action: &'static str,
    ) -> Result<()> {
        if !allowed.contains(&self.status) {
            return Err(EngineError::transition("workflow", self.status, action));
        }
        self.status = target;
        self.touch();
        Ok(())
    }

    /// draft | frozen -> active
    pub fn activate(&mut self) -> Result<()> {
        self.transition(
            &[WorkflowStatus::Draft, WorkflowStatus::Frozen],
            WorkflowStatus::Active,
            "activate",
        )
    }

    /// active -> frozen
    pub fn freeze(&mut self) -> Result<()> {
        self.transition(&[WorkflowStatus::Active], WorkflowStatus::Frozen, "freeze")
    }

    /// active -> completed
    pub fn complete(&mut self) -> Result<()> {
        self.transition(&[WorkflowStatus::Active], WorkflowStatus::Completed, "complete")
    }

    /// active -> failed
    pub fn fail(&mut self) -> Result<()> {
        self.transition(&[WorkflowStatus::Active], WorkflowStatus::Failed, "fail")
    }

    /// any non-terminal -> cancelled
    pub fn cancel(&mut self) -> Result<()> {
        self.transition(
            &[
                WorkflowStatus::Draft,
                WorkflowStatus::Active,
                WorkflowStatus::Frozen,
            ],
            WorkflowStatus::Cancelled,
            "cancel",
        )
    }

    /// Only draft and cancelled workflows may be deleted.
    pub fn can_delete(&self) -> bool {
        matches!(self.status, WorkflowStatus::Draft | WorkflowStatus::Cancelled)
    }

    /// Instances may only be started from active workflows.
    pub fn ensure_startable(&self) -> Result<()> {
        if self.status != WorkflowStatus::Active {
            return Err(EngineError::transition("workflow", self.status, "start an instance of"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION: &str = r#"{"name": "t", "steps": [{"id": "done", "type": "complete"}]}"#;

    fn workflow_in(status: WorkflowStatus) -> Workflow {
        let mut workflow = Workflow::new("test", "", DEFINITION).unwrap();
        workflow.status = status;
        workflow
    }

    type Transition = fn(&mut Workflow) -> Result<()>;

    fn check_transition(op: Transition, allowed: &[WorkflowStatus], target: WorkflowStatus) {
        for status in WorkflowStatus::ALL {
            let mut workflow = workflow_in(status);
            let result = op(&mut workflow);

            if allowed.contains(&status) {
                assert!(result.is_ok(), "expected success from {}", status);
                assert_eq!(workflow.status, target);
            } else {
                let err = result.unwrap_err();
                assert!(err.is_invalid_transition(), "unexpected error from {}: {}", status, err);
                assert_eq!(workflow.status, status);
            }
        }
    }

    #[test]
    fn test_new_is_draft() {
        let workflow = Workflow::new("test", "desc", DEFINITION).unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Draft);
        assert_eq!(workflow.parsed_definition().unwrap().len(), 1);
    }

    #[test]
    fn test_new_rejects_blank_name() {
        let err = Workflow::new("  ", "", DEFINITION).unwrap_err();
        assert!(matches!(err, EngineError::InvalidDefinition(_)));
    }

    #[test]
    fn test_new_rejects_empty_definition() {
        assert!(Workflow::new("x", "", r#"{"steps": []}"#).is_err());
        assert!(Workflow::new("x", "", "{").is_err());
    }

    #[test]
    fn test_activate_transitions() {
        use WorkflowStatus::*;
        check_transition(Workflow::activate, &[Draft, Frozen], Active);
    }

    #[test]
    fn test_freeze_transitions() {
        use WorkflowStatus::*;
        check_transition(Workflow::freeze, &[Active], Frozen);
    }

    #[test]
    fn test_complete_transitions() {
        use WorkflowStatus::*;
        check_transition(Workflow::complete, &[Active], Completed);
    }

    #[test]
    fn test_fail_transitions() {
        use WorkflowStatus::*;
        check_transition(Workflow::fail, &[Active], Failed);
    }

    #[test]
    fn test_cancel_transitions() {
        use WorkflowStatus::*;
        check_transition(Workflow::cancel, &[Draft, Active, Frozen], Cancelled);
    }

    #[test]
    fn test_can_delete() {
        assert!(workflow_in(WorkflowStatus::Draft).can_delete());
        assert!(workflow_in(WorkflowStatus::Cancelled).can_delete());
        assert!(!workflow_in(WorkflowStatus::Active).can_delete());
        assert!(!workflow_in(WorkflowStatus::Completed).can_delete());
    }

    #[test]
    fn test_ensure_startable() {
        assert!(workflow_in(WorkflowStatus::Active).ensure_startable().is_ok());
        assert!(workflow_in(WorkflowStatus::Draft)
            .ensure_startable()
            .unwrap_err()
            .is_invalid_transition());
        assert!(workflow_in(WorkflowStatus::Frozen)
            .ensure_startable()
            .unwrap_err()
            .is_invalid_transition());
    }

    #[test]
    fn test_replace_definition() {
        let mut workflow = workflow_in(WorkflowStatus::Active);
        let updated = r#"{"steps": [{"id": "a", "type": "process"}, {"id": "b", "type": "complete"}]}"#;
        workflow.replace_definition(updated).unwrap();
        assert_eq!(workflow.parsed_definition().unwrap().len(), 2);

        assert!(workflow.replace_definition("[]").is_err());
        assert_eq!(workflow.parsed_definition().unwrap().len(), 2);
    }
}
