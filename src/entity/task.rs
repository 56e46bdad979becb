//! Tasks
//!
//! Units of human work opened by the engine. A task starts `pending`,
//! may be claimed, and ends `completed` or `rejected`; terminal tasks
//! never change status again.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::definition::Priority;
use crate::error::{EngineError, Result};

/// Lifecycle status of a task.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Completed,
    Rejected,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [Self::Pending, Self::Claimed, Self::Completed, Self::Rejected];

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected)
    }

    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Outcome chosen by whoever completes a task.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskResult {
    Approved,
    Rejected,
    Completed,
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

impl FromStr for TaskResult {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Ok(Self::Approved),
            "rejected" | "reject" => Ok(Self::Rejected),
            "completed" | "complete" => Ok(Self::Completed),
            other => Err(format!("unknown task result '{}'", other)),
        }
    }
}

/// Whether workflow progression after this task's completion has run.
///
/// Completion is committed before the engine advances the instance, so
/// a failed progression leaves a completed task marked `failed` for an
/// operator to inspect and retry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase", tag = "state")]
pub enum Progression {
    #[default]
    Idle,
    Pending,
    Advanced,
    Failed { error: String },
}

impl Progression {
    /// True when the task's completion has not been carried through.
    pub fn is_stalled(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed { .. })
    }
}

/// A unit of work belonging to a workflow instance.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub workflow_id: Uuid,
    /// Originating step id, or `<parentStepId>_<branchId>` for parallel branches
    pub task_key: String,
    /// Parallel step that opened this task, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_step_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default)]
    pub candidate_users: Vec<String>,
    #[serde(default)]
    pub candidate_groups: Vec<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    #[serde(default)]
    pub task_data: Value,
    #[serde(default)]
    pub form_data: Value,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progression: Progression,
}

impl Task {
    /// Creates a pending task for an instance.
    pub fn new(
        instance_id: Uuid,
        workflow_id: Uuid,
        task_key: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id,
            workflow_id,
            task_key: task_key.into(),
            parent_step_id: None,
            name: name.into(),
            description: String::new(),
            task_type: crate::definition::model::USER_TASK.to_string(),
            assignee: None,
            candidate_users: Vec::new(),
            candidate_groups: Vec::new(),
            status: TaskStatus::Pending,
            priority: Priority::default(),
            task_data: Value::Null,
            form_data: Value::Null,
            output: Value::Null,
            result: None,
            comment: None,
            created_at: Utc::now(),
            claimed_at: None,
            completed_at: None,
            due_date: None,
            progression: Progression::Idle,
        }
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    /// True for tasks opened by a parallel step.
    pub fn is_parallel_branch(&self) -> bool {
        self.parent_step_id.is_some()
    }

    /// pending -> claimed
    pub fn claim(&mut self, user: impl Into<String>) -> Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(EngineError::TaskNotPending(self.id));
        }
        self.assignee = Some(user.into());
        self.status = TaskStatus::Claimed;
        self.claimed_at = Some(Utc::now());
        Ok(())
    }

    /// pending | claimed -> completed, or -> rejected when `result` is rejected.
    pub fn complete(
        &mut self,
        output: Value,
        comment: Option<String>,
        result: TaskResult,
    ) -> Result<()> {
        if self.status.is_terminal() {
            return Err(EngineError::transition("task", self.status, "complete"));
        }

        self.status = match result {
            TaskResult::Rejected => TaskStatus::Rejected,
            TaskResult::Approved | TaskResult::Completed => TaskStatus::Completed,
        };
        self.output = output;
        self.comment = comment;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Hands an open task to another user; it returns to `pending`.
    pub fn delegate(&mut self, to_user: impl Into<String>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(EngineError::transition("task", self.status, "delegate"));
        }
        self.assignee = Some(to_user.into());
        self.status = TaskStatus::Pending;
        self.claimed_at = None;
        Ok(())
    }

    /// Whether `user` (member of `groups`) may claim this task.
    ///
    /// Only pending tasks can be claimed. An explicit assignee is
    /// exclusive: when set, candidate lists are not consulted.
    pub fn can_be_claimed(&self, user: &str, groups: &[String]) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }

        if let Some(assignee) = &self.assignee {
            return assignee == user;
        }

        self.candidate_users.iter().any(|u| u == user)
            || groups.iter().any(|g| self.candidate_groups.contains(g))
    }
}
