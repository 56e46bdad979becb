//! In-Memory Store
//!
//! Implements every repository port over mutex-guarded tables. Tasks and
//! history entries are kept in insertion order, which is their creation
//! order.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::entity::{Task, TaskHistory, Workflow, WorkflowInstance};
use crate::error::{EngineError, Result};
use crate::repository::{
    HistoryRepository, InstanceRepository, Page, TaskRepository, WorkflowRepository,
};

use super::snapshot::Snapshot;

#[derive(Debug, Default)]
pub struct MemoryStore {
    workflows: Mutex<HashMap<Uuid, Workflow>>,
    instances: Mutex<HashMap<Uuid, WorkflowInstance>>,
    tasks: Mutex<Vec<Task>>,
    history: Mutex<Vec<TaskHistory>>,
}

fn lock<T>(table: &Mutex<T>) -> MutexGuard<'_, T> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a store from a snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            workflows: Mutex::new(snapshot.workflows.into_iter().map(|w| (w.id, w)).collect()),
            instances: Mutex::new(snapshot.instances.into_iter().map(|i| (i.id, i)).collect()),
            tasks: Mutex::new(snapshot.tasks),
            history: Mutex::new(snapshot.history),
        }
    }

    /// Copies the current contents. Workflows and instances are ordered
    /// by creation time.
    pub fn snapshot(&self) -> Snapshot {
        let mut workflows: Vec<Workflow> = lock(&self.workflows).values().cloned().collect();
        workflows.sort_by_key(|w| (w.created_at, w.id));

        let mut instances: Vec<WorkflowInstance> =
            lock(&self.instances).values().cloned().collect();
        instances.sort_by_key(|i| (i.started_at, i.id));

        Snapshot {
            workflows,
            instances,
            tasks: lock(&self.tasks).clone(),
            history: lock(&self.history).clone(),
        }
    }

    /// Every task, in creation order.
    pub fn all_tasks(&self) -> Vec<Task> {
        lock(&self.tasks).clone()
    }
}

impl WorkflowRepository for MemoryStore {
    fn find_workflow(&self, id: Uuid) -> Result<Option<Workflow>> {
        Ok(lock(&self.workflows).get(&id).cloned())
    }

    fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        let mut workflows = lock(&self.workflows);
        if workflows.contains_key(&workflow.id) {
            return Err(EngineError::Storage(format!("workflow {} already exists", workflow.id)));
        }
        workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    fn update_workflow(&self, workflow: &Workflow) -> Result<()> {
        match lock(&self.workflows).get_mut(&workflow.id) {
            Some(slot) => {
                *slot = workflow.clone();
                Ok(())
            }
            None => Err(EngineError::WorkflowNotFound(workflow.id)),
        }
    }

    fn delete_workflow(&self, id: Uuid) -> Result<()> {
        lock(&self.workflows)
            .remove(&id)
            .map(|_| ())
            .ok_or(EngineError::WorkflowNotFound(id))
    }

    fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let mut workflows: Vec<Workflow> = lock(&self.workflows).values().cloned().collect();
        workflows.sort_by_key(|w| (w.created_at, w.id));
        Ok(workflows)
    }
}

impl InstanceRepository for MemoryStore {
    fn find_instance(&self, id: Uuid) -> Result<Option<WorkflowInstance>> {
        Ok(lock(&self.instances).get(&id).cloned())
    }

    fn save_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        let mut instances = lock(&self.instances);
        if instances.contains_key(&instance.id) {
            return Err(EngineError::Storage(format!("instance {} already exists", instance.id)));
        }
        instances.insert(instance.id, instance.clone());
        Ok(())
    }

    fn update_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        match lock(&self.instances).get_mut(&instance.id) {
            Some(slot) => {
                *slot = instance.clone();
                Ok(())
            }
            None => Err(EngineError::InstanceNotFound(instance.id)),
        }
    }

    fn list_instances(&self, workflow_id: Uuid) -> Result<Vec<WorkflowInstance>> {
        let mut instances: Vec<WorkflowInstance> = lock(&self.instances)
            .values()
            .filter(|i| i.workflow_id == workflow_id)
            .cloned()
            .collect();
        instances.sort_by_key(|i| (i.started_at, i.id));
        Ok(instances)
    }
}

impl TaskRepository for MemoryStore {
    fn find_task(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(lock(&self.tasks).iter().find(|t| t.id == id).cloned())
    }

    fn find_tasks_by_instance(&self, instance_id: Uuid, page: Page) -> Result<Vec<Task>> {
        Ok(lock(&self.tasks)
            .iter()
            .filter(|t| t.instance_id == instance_id)
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }

    fn save_task(&self, task: &Task) -> Result<()> {
        let mut tasks = lock(&self.tasks);
        if tasks.iter().any(|t| t.id == task.id) {
            return Err(EngineError::Storage(format!("task {} already exists", task.id)));
        }
        tasks.push(task.clone());
        Ok(())
    }

    fn update_task(&self, task: &Task) -> Result<()> {
        match lock(&self.tasks).iter_mut().find(|t| t.id == task.id) {
            Some(slot) => {
                *slot = task.clone();
                Ok(())
            }
            None => Err(EngineError::TaskNotFound(task.id)),
        }
    }
}

impl HistoryRepository for MemoryStore {
    fn append_history(&self, entry: &TaskHistory) -> Result<()> {
        lock(&self.history).push(entry.clone());
        Ok(())
    }

    fn history_for_task(&self, task_id: Uuid) -> Result<Vec<TaskHistory>> {
        Ok(lock(&self.history)
            .iter()
            .filter(|h| h.task_id == task_id)
            .cloned()
            .collect())
    }
}
