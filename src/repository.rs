//! Repository Ports
//!
//! Narrow storage interfaces consumed by the engine and services.
//! Implementations must be shareable across threads; the engine holds
//! them behind `Arc<dyn ...>`.

use std::sync::Arc;

use uuid::Uuid;

use crate::entity::{Task, TaskHistory, Workflow, WorkflowInstance};
use crate::error::{EngineError, Result};

/// A window over an ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }

    pub fn next(self) -> Self {
        Self {
            offset: self.offset + self.limit,
            ..self
        }
    }
}

pub trait WorkflowRepository: Send + Sync {
    fn find_workflow(&self, id: Uuid) -> Result<Option<Workflow>>;
    fn save_workflow(&self, workflow: &Workflow) -> Result<()>;
    fn update_workflow(&self, workflow: &Workflow) -> Result<()>;
    fn delete_workflow(&self, id: Uuid) -> Result<()>;
    fn list_workflows(&self) -> Result<Vec<Workflow>>;
}

pub trait InstanceRepository: Send + Sync {
    fn find_instance(&self, id: Uuid) -> Result<Option<WorkflowInstance>>;
    fn save_instance(&self, instance: &WorkflowInstance) -> Result<()>;
    fn update_instance(&self, instance: &WorkflowInstance) -> Result<()>;
    fn list_instances(&self, workflow_id: Uuid) -> Result<Vec<WorkflowInstance>>;
}

pub trait TaskRepository: Send + Sync {
    fn find_task(&self, id: Uuid) -> Result<Option<Task>>;
    /// Tasks of an instance in creation order.
    fn find_tasks_by_instance(&self, instance_id: Uuid, page: Page) -> Result<Vec<Task>>;
    fn save_task(&self, task: &Task) -> Result<()>;
    fn update_task(&self, task: &Task) -> Result<()>;
}

pub trait HistoryRepository: Send + Sync {
    fn append_history(&self, entry: &TaskHistory) -> Result<()>;
    /// Entries for a task in append order.
    fn history_for_task(&self, task_id: Uuid) -> Result<Vec<TaskHistory>>;
}

/// The full set of ports, as handed to the engine and services.
#[derive(Clone)]
pub struct Repositories {
    pub workflows: Arc<dyn WorkflowRepository>,
    pub instances: Arc<dyn InstanceRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub history: Arc<dyn HistoryRepository>,
}

impl Repositories {
    /// Uses one store for every port.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: WorkflowRepository + InstanceRepository + TaskRepository + HistoryRepository + 'static,
    {
        Self {
            workflows: store.clone(),
            instances: store.clone(),
            tasks: store.clone(),
            history: store,
        }
    }

    pub fn workflow(&self, id: Uuid) -> Result<Workflow> {
        self.workflows
            .find_workflow(id)?
            .ok_or(EngineError::WorkflowNotFound(id))
    }

    pub fn instance(&self, id: Uuid) -> Result<WorkflowInstance> {
        self.instances
            .find_instance(id)?
            .ok_or(EngineError::InstanceNotFound(id))
    }

    pub fn task(&self, id: Uuid) -> Result<Task> {
        self.tasks.find_task(id)?.ok_or(EngineError::TaskNotFound(id))
    }

    /// Drains every page of an instance's tasks.
    pub fn instance_tasks(&self, instance_id: Uuid, page_size: usize) -> Result<Vec<Task>> {
        let mut page = Page::first(page_size.max(1));
        let mut all = Vec::new();

        loop {
            let batch = self.tasks.find_tasks_by_instance(instance_id, page)?;
            let done = batch.len() < page.limit;
            all.extend(batch);
            if done {
                return Ok(all);
            }
            page = page.next();
        }
    }
}
