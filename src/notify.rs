//! Notification Port
//!
//! Fire-and-forget callbacks for task and instance events. Delivery
//! (WebSocket, mail, ...) lives outside the engine.

use log::info;

use crate::entity::{Task, WorkflowInstance};

pub trait Notifier: Send + Sync {
    fn notify_task_created(&self, task: &Task);
    fn notify_task_assigned(&self, task: &Task, assignee: &str);
    fn notify_task_completed(&self, task: &Task);
    fn notify_workflow_completed(&self, instance: &WorkflowInstance);
}

/// Discards every notification. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify_task_created(&self, _task: &Task) {}
    fn notify_task_assigned(&self, _task: &Task, _assignee: &str) {}
    fn notify_task_completed(&self, _task: &Task) {}
    fn notify_workflow_completed(&self, _instance: &WorkflowInstance) {}
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_task_created(&self, task: &Task) {
        info!(
            "Task created: '{}' [{}] for {}",
            task.name,
            task.id,
            task.assignee.as_deref().unwrap_or("candidates")
        );
    }

    fn notify_task_assigned(&self, task: &Task, assignee: &str) {
        info!("Task assigned: '{}' [{}] to {}", task.name, task.id, assignee);
    }

    fn notify_task_completed(&self, task: &Task) {
        info!("Task {}: '{}' [{}]", task.status, task.name, task.id);
    }

    fn notify_workflow_completed(&self, instance: &WorkflowInstance) {
        info!("Workflow instance {} completed", instance.id);
    }
}
