//! Workflow Service
//!
//! Workflow lifecycle and instance start/cancel, persisted through the
//! repository ports.

use std::sync::Arc;

use log::{error, info};
use serde_json::Value;
use uuid::Uuid;

use crate::engine::Engine;
use crate::entity::{Workflow, WorkflowInstance};
use crate::error::{EngineError, Result};
use crate::repository::Repositories;

pub struct WorkflowService {
    engine: Arc<Engine>,
}

impl WorkflowService {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    fn repos(&self) -> &Repositories {
        self.engine.repositories()
    }

    /// Stores a new draft workflow after validating its definition.
    pub fn create(&self, name: &str, description: &str, definition: &str) -> Result<Workflow> {
        let workflow = Workflow::new(name, description, definition)?;
        self.repos().workflows.save_workflow(&workflow)?;
        info!("Created workflow '{}' ({})", workflow.name, workflow.id);
        Ok(workflow)
    }

    pub fn get(&self, id: Uuid) -> Result<Workflow> {
        self.repos().workflow(id)
    }

    pub fn list(&self) -> Result<Vec<Workflow>> {
        self.repos().workflows.list_workflows()
    }

    pub fn instances(&self, workflow_id: Uuid) -> Result<Vec<WorkflowInstance>> {
        self.repos().instances.list_instances(workflow_id)
    }

    fn transition(&self, id: Uuid, apply: impl FnOnce(&mut Workflow) -> Result<()>) -> Result<Workflow> {
        let mut workflow = self.repos().workflow(id)?;
        apply(&mut workflow)?;
        self.repos().workflows.update_workflow(&workflow)?;
        info!("Workflow '{}' is now {}", workflow.name, workflow.status);
        Ok(workflow)
    }

    pub fn activate(&self, id: Uuid) -> Result<Workflow> {
        self.transition(id, Workflow::activate)
    }

    pub fn freeze(&self, id: Uuid) -> Result<Workflow> {
        self.transition(id, Workflow::freeze)
    }

    pub fn complete(&self, id: Uuid) -> Result<Workflow> {
        self.transition(id, Workflow::complete)
    }

    pub fn fail(&self, id: Uuid) -> Result<Workflow> {
        self.transition(id, Workflow::fail)
    }

    pub fn cancel(&self, id: Uuid) -> Result<Workflow> {
        self.transition(id, Workflow::cancel)
    }

    /// Deletes a draft or cancelled workflow.
    pub fn delete(&self, id: Uuid) -> Result<()> {
        let workflow = self.repos().workflow(id)?;
        if !workflow.can_delete() {
            return Err(EngineError::transition("workflow", workflow.status, "delete"));
        }
        self.repos().workflows.delete_workflow(id)?;
        info!("Deleted workflow '{}' ({})", workflow.name, id);
        Ok(())
    }

    /// Replaces the definition. Running instances follow the new
    /// definition from their next engine call on.
    pub fn update_definition(&self, id: Uuid, definition: &str) -> Result<Workflow> {
        let mut workflow = self.repos().workflow(id)?;
        workflow.replace_definition(definition)?;
        self.repos().workflows.update_workflow(&workflow)?;
        info!("Updated definition of workflow '{}'", workflow.name);
        Ok(workflow)
    }

    /// Starts an instance of an active workflow and runs it up to its
    /// first suspension point.
    ///
    /// If the engine cannot start the instance, it is marked failed and
    /// the error is returned.
    pub fn start_instance(&self, workflow_id: Uuid, input: Value) -> Result<WorkflowInstance> {
        let workflow = self.repos().workflow(workflow_id)?;
        workflow.ensure_startable()?;

        let instance = WorkflowInstance::new(workflow.id, input);
        self.repos().instances.save_instance(&instance)?;

        if let Err(err) = self.engine.start_instance(instance.id) {
            error!("Instance {} failed to start: {}", instance.id, err);
            let mut failed = self.repos().instance(instance.id)?;
            if failed.fail(err.to_string()).is_ok() {
                self.repos().instances.update_instance(&failed)?;
            }
            return Err(err);
        }

        self.repos().instance(instance.id)
    }

    pub fn get_instance(&self, id: Uuid) -> Result<WorkflowInstance> {
        self.repos().instance(id)
    }

    pub fn cancel_instance(&self, id: Uuid) -> Result<WorkflowInstance> {
        let mut instance = self.repos().instance(id)?;
        instance.cancel()?;
        self.repos().instances.update_instance(&instance)?;
        info!("Cancelled instance {}", id);
        Ok(instance)
    }
}
