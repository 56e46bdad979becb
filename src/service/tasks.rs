//! Task Service
//!
//! Claim, complete and delegate tasks on behalf of a user. Completion
//! is committed before the engine is asked to move the instance on;
//! the outcome of that second part is recorded on the task as its
//! [`Progression`] rather than returned to the completing user.

use std::sync::Arc;

use log::{error, info};
use serde_json::Value;
use uuid::Uuid;

use crate::engine::Engine;
use crate::entity::{Progression, Task, TaskHistory, TaskResult, TaskStatus};
use crate::error::{EngineError, Result};
use crate::repository::Repositories;

/// The user performing an operation, with their group memberships.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Actor {
    pub user: String,
    pub groups: Vec<String>,
}

impl Actor {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            groups: Vec::new(),
        }
    }

    pub fn with_groups(mut self, groups: &[&str]) -> Self {
        self.groups = groups.iter().map(|g| g.to_string()).collect();
        self
    }
}

/// What the user submits when finishing a task.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub result: TaskResult,
    pub output: Value,
    pub comment: Option<String>,
}

impl Completion {
    pub fn new(result: TaskResult) -> Self {
        Self {
            result,
            output: Value::Null,
            comment: None,
        }
    }

    pub fn approved() -> Self {
        Self::new(TaskResult::Approved)
    }

    pub fn rejected(comment: impl Into<String>) -> Self {
        Self::new(TaskResult::Rejected).with_comment(comment)
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

pub struct TaskService {
    engine: Arc<Engine>,
}

impl TaskService {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    fn repos(&self) -> &Repositories {
        self.engine.repositories()
    }

    pub fn get(&self, task_id: Uuid) -> Result<Task> {
        self.repos().task(task_id)
    }

    /// Open (pending or claimed) tasks of an instance.
    pub fn open_tasks(&self, instance_id: Uuid) -> Result<Vec<Task>> {
        let mut tasks = self.instance_tasks(instance_id)?;
        tasks.retain(|t| t.status.is_open());
        Ok(tasks)
    }

    /// Tasks whose completion has not been carried through to the
    /// instance. A `pending` task may still be in flight.
    pub fn stalled(&self, instance_id: Uuid) -> Result<Vec<Task>> {
        let mut tasks = self.instance_tasks(instance_id)?;
        tasks.retain(|t| t.progression.is_stalled());
        Ok(tasks)
    }

    /// Audit records of a task, oldest first.
    pub fn history(&self, task_id: Uuid) -> Result<Vec<TaskHistory>> {
        self.repos().task(task_id)?;
        self.repos().history.history_for_task(task_id)
    }

    pub fn claim(&self, task_id: Uuid, actor: &Actor) -> Result<Task> {
        let mut task = self.repos().task(task_id)?;
        if task.status != TaskStatus::Pending {
            return Err(EngineError::TaskNotPending(task_id));
        }
        if !may_take(&task, actor) {
            return Err(EngineError::TaskNotClaimable {
                user: actor.user.clone(),
                task_id,
            });
        }

        task.claim(actor.user.as_str())?;
        self.repos().tasks.update_task(&task)?;
        self.repos()
            .history
            .append_history(&TaskHistory::claimed(&task, &actor.user))?;

        info!("Task '{}' ({}) claimed by {}", task.task_key, task.id, actor.user);
        self.engine.notifier().notify_task_assigned(&task, &actor.user);
        Ok(task)
    }

    /// Completes (or rejects) a task, then advances its instance.
    ///
    /// Only the assignee may complete an assigned task; an unassigned
    /// one may be completed by any of its candidates. Once the task is
    /// stored the call succeeds, even if advancing the instance fails.
    pub fn complete(&self, task_id: Uuid, actor: &Actor, completion: Completion) -> Result<Task> {
        let mut task = self.repos().task(task_id)?;
        if task.status.is_terminal() {
            return Err(EngineError::transition("task", task.status, "complete"));
        }
        let allowed = match &task.assignee {
            Some(assignee) => *assignee == actor.user,
            None => may_take(&task, actor),
        };
        if !allowed {
            return Err(EngineError::Unauthorized {
                user: actor.user.clone(),
                task_id,
            });
        }

        task.complete(completion.output, completion.comment, completion.result)?;
        if task.assignee.is_none() {
            task.assignee = Some(actor.user.clone());
        }
        task.progression = Progression::Pending;
        self.repos().tasks.update_task(&task)?;
        self.repos()
            .history
            .append_history(&TaskHistory::completed(&task, &actor.user))?;

        info!(
            "Task '{}' ({}) {} by {}",
            task.task_key, task.id, task.status, actor.user
        );
        self.engine.notifier().notify_task_completed(&task);

        match self.engine.progress_task(task.id) {
            Ok(progressed) => Ok(progressed),
            Err(err) => {
                error!(
                    "Task {} is stored but instance {} did not advance: {}",
                    task.id, task.instance_id, err
                );
                self.repos().task(task.id)
            }
        }
    }

    /// Hands an open task to another user. Only its assignee may do so.
    pub fn delegate(&self, task_id: Uuid, actor: &Actor, to_user: &str) -> Result<Task> {
        let mut task = self.repos().task(task_id)?;
        if task.assignee.as_deref() != Some(actor.user.as_str()) {
            return Err(EngineError::Unauthorized {
                user: actor.user.clone(),
                task_id,
            });
        }

        task.delegate(to_user)?;
        self.repos().tasks.update_task(&task)?;
        self.repos()
            .history
            .append_history(&TaskHistory::delegated(&task, &actor.user, to_user))?;

        info!("Task {} delegated by {} to {}", task.id, actor.user, to_user);
        self.engine.notifier().notify_task_assigned(&task, to_user);
        Ok(task)
    }

    /// Re-runs the progression of a task left `pending` or `failed`.
    ///
    /// Safe to call while the original completion is still in flight:
    /// the engine re-checks the task under the instance lock and a task
    /// that has advanced in the meantime is not advanced again.
    pub fn retry_progression(&self, task_id: Uuid) -> Result<Task> {
        let task = self.repos().task(task_id)?;
        if !task.progression.is_stalled() {
            let state = match task.progression {
                Progression::Idle => "idle",
                _ => "advanced",
            };
            return Err(EngineError::transition("task", state, "retry progression of"));
        }

        info!("Retrying progression of task {}", task.id);
        self.engine.progress_task(task_id)
    }

    fn instance_tasks(&self, instance_id: Uuid) -> Result<Vec<Task>> {
        self.repos()
            .instance_tasks(instance_id, self.engine.config().page_size)
    }
}

/// Whether `actor` may take an unassigned or pending task.
///
/// Tasks with neither an assignee nor candidates are open to anyone.
fn may_take(task: &Task, actor: &Actor) -> bool {
    let unrestricted = task.assignee.is_none()
        && task.candidate_users.is_empty()
        && task.candidate_groups.is_empty();
    task.can_be_claimed(&actor.user, &actor.groups) || (unrestricted && task.status.is_open())
}
