//! Workflow Instances
//!
//! One execution of a workflow against caller-supplied input. Instances
//! are created directly into `running` and may only leave it once.

use std::fmt;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Lifecycle status of an instance.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl InstanceStatus {
    pub const ALL: [InstanceStatus; 4] =
        [Self::Running, Self::Completed, Self::Failed, Self::Cancelled];
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A fired parallel join: the sibling tasks that satisfied the barrier.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinRecord {
    pub step_id: String,
    /// Sorted ids of the resolved sibling tasks
    pub task_ids: Vec<Uuid>,
    pub fired_at: DateTime<Utc>,
}

/// Unwraps input that was stored as a JSON-encoded string.
///
/// `"{\"x\": 5}"` becomes `{"x": 5}`; anything that does not decode
/// into an object or array is returned unchanged. Applied once, when an
/// instance is created.
pub fn normalize_input(input: Value) -> Value {
    match input {
        Value::String(text) => {
            let trimmed = text.trim();
            match serde_json::from_str::<Value>(trimmed) {
                Ok(decoded @ (Value::Object(_) | Value::Array(_))) => {
                    debug!("Unwrapped string-encoded instance input");
                    decoded
                }
                _ => Value::String(text),
            }
        }
        other => other,
    }
}

/// A running (or finished) execution of a workflow.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: InstanceStatus,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joins: Vec<JoinRecord>,
}

impl WorkflowInstance {
    /// Creates a running instance. The input is normalized here and
    /// nowhere else.
    pub fn new(workflow_id: Uuid, input: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: InstanceStatus::Running,
            input: normalize_input(input),
            output: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
            joins: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }

    /// Fails with `InstanceNotRunning` unless the instance is running.
    pub fn ensure_running(&self) -> Result<()> {
        if !self.is_running() {
            return Err(EngineError::InstanceNotRunning(self.id));
        }
        Ok(())
    }

    fn finish(&mut self, target: InstanceStatus, action: &'static str) -> Result<()> {
        if !self.is_running() {
            return Err(EngineError::transition("instance", self.status, action));
        }
        self.status = target;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// running -> completed
    pub fn complete(&mut self, output: Value) -> Result<()> {
        self.finish(InstanceStatus::Completed, "complete")?;
        self.output = Some(output);
        Ok(())
    }

    /// running -> failed
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.finish(InstanceStatus::Failed, "fail")?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// running -> cancelled
    pub fn cancel(&mut self) -> Result<()> {
        self.finish(InstanceStatus::Cancelled, "cancel")
    }

    /// Records a join for `step_id` over `task_ids`.
    ///
    /// Returns false when an identical join was already recorded, in
    /// which case the caller must not advance again.
    pub fn claim_join(&mut self, step_id: &str, mut task_ids: Vec<Uuid>) -> bool {
        task_ids.sort();
        let already = self
            .joins
            .iter()
            .any(|j| j.step_id == step_id && j.task_ids == task_ids);
        if already {
            return false;
        }

        self.joins.push(JoinRecord {
            step_id: step_id.to_string(),
            task_ids,
            fired_at: Utc::now(),
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance_in(status: InstanceStatus) -> WorkflowInstance {
        let mut instance = WorkflowInstance::new(Uuid::new_v4(), json!({}));
        instance.status = status;
        instance
    }

    #[test]
    fn test_new_is_running() {
        let instance = WorkflowInstance::new(Uuid::new_v4(), json!({"x": 1}));
        assert!(instance.is_running());
        assert!(instance.completed_at.is_none());
        assert_eq!(instance.input["x"], 1);
    }

    #[test]
    fn test_normalize_string_encoded_input() {
        let instance = WorkflowInstance::new(Uuid::new_v4(), json!("{\"amount\": 42}"));
        assert_eq!(instance.input, json!({"amount": 42}));
    }

    #[test]
    fn test_normalize_leaves_plain_strings() {
        assert_eq!(normalize_input(json!("hello")), json!("hello"));
        assert_eq!(normalize_input(json!("42")), json!("42"));
        assert_eq!(normalize_input(json!({"a": "{}"})), json!({"a": "{}"}));
    }

    #[test]
    fn test_complete_only_from_running() {
        for status in InstanceStatus::ALL {
            let mut instance = instance_in(status);
            let result = instance.complete(json!({"ok": true}));
            if status == InstanceStatus::Running {
                assert!(result.is_ok());
                assert_eq!(instance.status, InstanceStatus::Completed);
                assert!(instance.completed_at.is_some());
                assert_eq!(instance.output, Some(json!({"ok": true})));
            } else {
                assert!(result.unwrap_err().is_invalid_transition());
                assert_eq!(instance.status, status);
            }
        }
    }

    #[test]
    fn test_fail_and_cancel_only_from_running() {
        for status in InstanceStatus::ALL {
            let mut failing = instance_in(status);
            let mut cancelling = instance_in(status);
            let running = status == InstanceStatus::Running;

            assert_eq!(failing.fail("boom").is_ok(), running);
            assert_eq!(cancelling.cancel().is_ok(), running);
        }

        let mut instance = instance_in(InstanceStatus::Running);
        instance.fail("boom").unwrap();
        assert_eq!(instance.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_claim_join_once() {
        let mut instance = instance_in(InstanceStatus::Running);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(instance.claim_join("review", vec![a, b]));
        assert!(!instance.claim_join("review", vec![b, a]));
        assert!(instance.claim_join("review", vec![a, b, Uuid::new_v4()]));
        assert_eq!(instance.joins.len(), 2);
    }

    #[test]
    fn test_ensure_running() {
        assert!(instance_in(InstanceStatus::Running).ensure_running().is_ok());
        let err = instance_in(InstanceStatus::Cancelled)
            .ensure_running()
            .unwrap_err();
        assert!(matches!(err, EngineError::InstanceNotRunning(_)));
    }
}
