//! Engine Orchestrator
//!
//! Walks an instance through its workflow's step graph. The engine is
//! synchronous: it runs on the caller's thread, creates tasks, and
//! returns. It resumes only when re-invoked with a task completion.
//!
//! Every public entry point holds the instance's lock for its whole
//! duration and re-reads the workflow definition from storage.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::condition::{evaluate_or_false, ConditionContext};
use crate::config::EngineConfig;
use crate::definition::{Definition, Step, StepKind, TaskOrigin, ValidationError};
use crate::entity::{Progression, Task, TaskResult, TaskStatus, WorkflowInstance};
use crate::error::{EngineError, Result};
use crate::notify::{NoopNotifier, Notifier};
use crate::repository::Repositories;

use super::join::{self, InstanceLocks};
use super::tasks::{build_task, mark_rejected};

/// Workflow execution engine.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use flowrunner::definition::Step;
/// use flowrunner::{Definition, Engine, MemoryStore, Repositories, Workflow, WorkflowInstance};
/// use serde_json::json;
///
/// # fn main() -> flowrunner::Result<()> {
/// let store = Arc::new(MemoryStore::new());
/// let repos = Repositories::from_store(store);
/// let engine = Engine::with_defaults(repos.clone());
///
/// let definition = Definition::from_steps(
///     "expense",
///     vec![Step::user_task("approve").then("done"), Step::complete("done")],
/// );
/// let mut workflow = Workflow::from_definition(&definition)?;
/// workflow.activate()?;
/// repos.workflows.save_workflow(&workflow)?;
///
/// let instance = WorkflowInstance::new(workflow.id, json!({"amount": 10}));
/// repos.instances.save_instance(&instance)?;
/// engine.start_instance(instance.id)?;
///
/// assert_eq!(repos.instance_tasks(instance.id, 10)?.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    repos: Repositories,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
    locks: InstanceLocks,
}

/// Automatic steps taken so far in one engine call.
struct Hops {
    taken: usize,
    limit: usize,
}

impl Hops {
    fn new(limit: usize) -> Self {
        Self { taken: 0, limit }
    }

    fn step(&mut self) -> Result<()> {
        self.taken += 1;
        if self.taken > self.limit {
            return Err(EngineError::StepLimitExceeded(self.limit));
        }
        Ok(())
    }
}

impl Engine {
    pub fn new(repos: Repositories, notifier: Arc<dyn Notifier>, config: EngineConfig) -> Self {
        Self {
            repos,
            notifier,
            config,
            locks: InstanceLocks::new(),
        }
    }

    /// An engine with the no-op notifier and default configuration.
    pub fn with_defaults(repos: Repositories) -> Self {
        Self::new(repos, Arc::new(NoopNotifier), EngineConfig::default())
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Executes the first step of a freshly created instance.
    pub fn start_instance(&self, instance_id: Uuid) -> Result<()> {
        self.locks.with_lock(instance_id, || {
            let mut instance = self.repos.instance(instance_id)?;
            instance.ensure_running()?;

            let workflow = self.repos.workflow(instance.workflow_id)?;
            workflow.ensure_startable()?;
            let definition = workflow.parsed_definition()?;
            let first = definition
                .first_step()
                .ok_or_else(|| EngineError::from(ValidationError::EmptyDefinition))?;

            instance.started_at = Utc::now();
            self.repos.instances.update_instance(&instance)?;
            info!(
                "Starting instance {} of workflow '{}' at step '{}'",
                instance.id, workflow.name, first.id
            );

            let mut hops = Hops::new(self.config.max_auto_steps);
            self.execute_step(&mut instance, first, &definition, &mut hops)
        })
    }

    /// Advances an instance after `task` was completed or rejected.
    ///
    /// For a parallel branch the instance only moves on once every
    /// sibling branch task is resolved, and then only once per resolved
    /// sibling set. An instance that is no longer running is not forced
    /// back to running; the call fails with `InstanceNotRunning`.
    pub fn continue_after_task(&self, task: &Task) -> Result<()> {
        self.locks
            .with_lock(task.instance_id, || self.continue_locked(task))
    }

    /// Reopens the most recent completed task before `rejected`.
    ///
    /// The new task is built from the earlier task's step, keeps that
    /// task's key and assignee, and carries the rejection in its data.
    /// The instance status is not touched.
    pub fn reject_and_go_back(&self, rejected: &Task) -> Result<Task> {
        self.locks
            .with_lock(rejected.instance_id, || self.go_back(rejected))
    }

    /// Carries a finished task through to its instance, at most once.
    ///
    /// The task is re-read under the instance lock. One whose
    /// progression already advanced is returned unchanged; otherwise a
    /// rejected non-branch task goes back to the previous task, anything
    /// else continues, and the outcome is stored on the task.
    pub fn progress_task(&self, task_id: Uuid) -> Result<Task> {
        let instance_id = self.repos.task(task_id)?.instance_id;
        self.locks.with_lock(instance_id, || {
            let mut task = self.repos.task(task_id)?;
            if task.progression == Progression::Advanced {
                debug!("Task {} already advanced its instance", task.id);
                return Ok(task);
            }
            if !task.status.is_terminal() {
                return Err(EngineError::transition("task", task.status, "progress"));
            }

            let outcome = if task.result == Some(TaskResult::Rejected) && !task.is_parallel_branch() {
                self.go_back(&task).map(|_| ())
            } else {
                self.continue_locked(&task)
            };

            task.progression = match &outcome {
                Ok(()) => Progression::Advanced,
                Err(err) => Progression::Failed {
                    error: err.to_string(),
                },
            };
            self.repos.tasks.update_task(&task)?;
            outcome.map(|()| task)
        })
    }

    fn continue_locked(&self, task: &Task) -> Result<()> {
        let mut instance = self.repos.instance(task.instance_id)?;
        instance.ensure_running()?;

        let workflow = self.repos.workflow(instance.workflow_id)?;
        let definition = workflow.parsed_definition()?;
        let current = flow_step(&definition, task)?;

        if let StepKind::Parallel(_) = current.kind {
            let tasks = self.instance_tasks(instance.id)?;
            let Some(resolved) = join::resolved_siblings(current, &tasks) else {
                info!(
                    "Parallel step '{}' of instance {} still waiting on branches",
                    current.id, instance.id
                );
                return Ok(());
            };

            if !instance.claim_join(&current.id, resolved) {
                debug!(
                    "Join of '{}' already fired for instance {}",
                    current.id, instance.id
                );
                return Ok(());
            }
            self.repos.instances.update_instance(&instance)?;
            info!("All branches of '{}' resolved", current.id);
        }

        let mut hops = Hops::new(self.config.max_auto_steps);
        self.advance(&mut instance, current, &definition, &mut hops)
    }

    fn go_back(&self, rejected: &Task) -> Result<Task> {
        let instance = self.repos.instance(rejected.instance_id)?;
        instance.ensure_running()?;

        let workflow = self.repos.workflow(instance.workflow_id)?;
        let definition = workflow.parsed_definition()?;
        let tasks = self.instance_tasks(instance.id)?;

        let rejected_at = rejected.completed_at.unwrap_or_else(Utc::now);
        let previous = tasks
            .iter()
            .filter(|t| t.id != rejected.id && t.status == TaskStatus::Completed)
            .filter(|t| t.completed_at.is_some_and(|at| at <= rejected_at))
            .max_by_key(|t| t.completed_at)
            .ok_or(EngineError::NoPreviousTask(rejected.id))?;

        let origin = definition
            .resolve_task_key(&previous.task_key)
            .ok_or_else(|| EngineError::StepNotFound(previous.task_key.clone()))?;
        let parent = match origin {
            TaskOrigin::Branch { parent, .. } => Some(parent.id.as_str()),
            TaskOrigin::Step(_) => None,
        };

        let mut reopened = build_task(
            &instance,
            origin.task_step(),
            previous.task_key.clone(),
            parent,
            &tasks,
            &self.config.result_labels,
        );
        if previous.assignee.is_some() {
            reopened.assignee = previous.assignee.clone();
        }
        mark_rejected(&mut reopened, rejected, rejected_at);

        self.repos.tasks.save_task(&reopened)?;
        info!(
            "Task '{}' rejected; reopened '{}' as {}",
            rejected.task_key, reopened.task_key, reopened.id
        );

        match &reopened.assignee {
            Some(assignee) => self.notifier.notify_task_assigned(&reopened, assignee),
            None => self.notifier.notify_task_created(&reopened),
        }
        Ok(reopened)
    }

    /// Successor of `current`.
    ///
    /// Declared `nextSteps` are tried in order and the first whose guard
    /// holds wins; none qualifying ends the branch. Without `nextSteps`
    /// the following step in declaration order is taken, and a step
    /// whose guard fails is passed over in favour of its own successor.
    pub fn find_next_step<'d>(
        &self,
        definition: &'d Definition,
        current: &Step,
        instance: &WorkflowInstance,
    ) -> Result<Option<&'d Step>> {
        let tasks = self.instance_tasks(instance.id)?;
        let ctx = ConditionContext::new(&instance.input, &tasks);
        let passes = |step: &Step| step.guard().map_or(true, |c| evaluate_or_false(c, &ctx));

        let mut current_id = current.id.as_str();
        let mut next_steps = current.next_steps.as_slice();
        loop {
            if !next_steps.is_empty() {
                for id in next_steps {
                    match definition.find_step(id) {
                        Some(step) if passes(step) => return Ok(Some(step)),
                        Some(step) => debug!("Skipping '{}': condition not met", step.id),
                        None => warn!("Step '{}' names unknown successor '{}'", current_id, id),
                    }
                }
                return Ok(None);
            }

            let Some(position) = definition.position(current_id) else {
                return Ok(None);
            };
            let Some(candidate) = definition.steps.get(position + 1) else {
                return Ok(None);
            };
            if passes(candidate) {
                return Ok(Some(candidate));
            }

            debug!("Skipping '{}': condition not met", candidate.id);
            current_id = &candidate.id;
            next_steps = &candidate.next_steps;
        }
    }

    fn instance_tasks(&self, instance_id: Uuid) -> Result<Vec<Task>> {
        self.repos.instance_tasks(instance_id, self.config.page_size)
    }

    fn execute_step(
        &self,
        instance: &mut WorkflowInstance,
        step: &Step,
        definition: &Definition,
        hops: &mut Hops,
    ) -> Result<()> {
        debug!(
            "Instance {}: executing {} step '{}'",
            instance.id,
            step.type_name(),
            step.id
        );

        match &step.kind {
            StepKind::UserTask(_) => {
                let tasks = self.instance_tasks(instance.id)?;
                self.open_task(instance, step, step.id.clone(), None, &tasks)?;
                Ok(())
            }
            StepKind::Process => self.advance(instance, step, definition, hops),
            StepKind::Parallel(branches) => {
                let tasks = self.instance_tasks(instance.id)?;
                let ctx = ConditionContext::new(&instance.input, &tasks);
                let qualifying: Vec<&Step> = branches
                    .iter()
                    .filter(|b| b.guard().map_or(true, |c| evaluate_or_false(c, &ctx)))
                    .collect();

                if qualifying.is_empty() {
                    info!("No branch of '{}' qualifies; moving on", step.id);
                    return self.advance(instance, step, definition, hops);
                }

                for branch in qualifying {
                    let key = step.branch_key(branch);
                    self.open_task(instance, branch, key, Some(&step.id), &tasks)?;
                }
                Ok(())
            }
            StepKind::Complete => self.complete_instance(instance),
            StepKind::Unknown(kind) => {
                warn!("Unknown step type '{}' at '{}'; continuing", kind, step.id);
                self.advance(instance, step, definition, hops)
            }
        }
    }

    fn advance(
        &self,
        instance: &mut WorkflowInstance,
        from: &Step,
        definition: &Definition,
        hops: &mut Hops,
    ) -> Result<()> {
        hops.step()?;
        match self.find_next_step(definition, from, instance)? {
            Some(next) => self.execute_step(instance, next, definition, hops),
            None => {
                info!(
                    "Instance {}: no step follows '{}'; branch ended",
                    instance.id, from.id
                );
                Ok(())
            }
        }
    }

    fn open_task(
        &self,
        instance: &WorkflowInstance,
        step: &Step,
        key: String,
        parent_step_id: Option<&str>,
        history: &[Task],
    ) -> Result<Task> {
        let task = build_task(
            instance,
            step,
            key,
            parent_step_id,
            history,
            &self.config.result_labels,
        );
        self.repos.tasks.save_task(&task)?;
        info!("Created task '{}' ({}) for instance {}", task.task_key, task.id, instance.id);
        self.notifier.notify_task_created(&task);
        Ok(task)
    }

    /// Completes the instance with the latest output of each completed
    /// task, keyed by task key.
    fn complete_instance(&self, instance: &mut WorkflowInstance) -> Result<()> {
        let mut tasks = self.instance_tasks(instance.id)?;
        tasks.retain(|t| t.status == TaskStatus::Completed);
        tasks.sort_by_key(|t| (t.completed_at, t.created_at));

        let mut output = Map::new();
        for task in tasks {
            output.insert(task.task_key, task.output);
        }

        instance.complete(Value::Object(output))?;
        self.repos.instances.update_instance(instance)?;
        info!("Instance {} completed", instance.id);
        self.notifier.notify_workflow_completed(instance);
        Ok(())
    }
}

/// The top-level step that decides where `task` leads.
fn flow_step<'d>(definition: &'d Definition, task: &Task) -> Result<&'d Step> {
    let step = match &task.parent_step_id {
        Some(parent) => definition.find_step(parent),
        None => definition
            .resolve_task_key(&task.task_key)
            .map(|origin| origin.flow_step()),
    };
    step.ok_or_else(|| EngineError::StepNotFound(task.task_key.clone()))
}
