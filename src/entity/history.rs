//! Task History
//!
//! Append-only audit records written when a task is claimed, completed
//! or delegated.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::task::{Task, TaskResult};

/// What happened to the task.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Claimed,
    Completed,
    Delegated,
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Claimed => "claimed",
            Self::Completed => "completed",
            Self::Delegated => "delegated",
        };
        f.write_str(name)
    }
}

/// One audit entry. Never mutated after creation.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TaskHistory {
    pub id: Uuid,
    pub task_id: Uuid,
    pub instance_id: Uuid,
    pub action: HistoryAction,
    /// User who performed the action
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub output: Value,
    pub created_at: DateTime<Utc>,
}

impl TaskHistory {
    fn record(task: &Task, action: HistoryAction, actor: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: task.id,
            instance_id: task.instance_id,
            action,
            actor: actor.to_string(),
            result: None,
            comment: None,
            output: Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn claimed(task: &Task, actor: &str) -> Self {
        Self::record(task, HistoryAction::Claimed, actor)
    }

    /// Snapshot of the task's result, comment and output.
    pub fn completed(task: &Task, actor: &str) -> Self {
        Self {
            result: task.result,
            comment: task.comment.clone(),
            output: task.output.clone(),
            ..Self::record(task, HistoryAction::Completed, actor)
        }
    }

    pub fn delegated(task: &Task, actor: &str, to_user: &str) -> Self {
        Self {
            comment: Some(format!("delegated to {}", to_user)),
            ..Self::record(task, HistoryAction::Delegated, actor)
        }
    }
}
