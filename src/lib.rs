//! FlowRunner - Declarative Approval Workflow Engine
//!
//! Executes business workflows described as JSON step graphs: human
//! tasks, automated steps, conditional branching, parallel fan-out with
//! a join barrier, and rejection with rollback to the previous task.
//!
//! # Architecture
//!
//! - [`definition`]: Step model, parsing and validation of definitions
//! - [`condition`]: Guard expression evaluator
//! - [`entity`]: Workflow, instance and task state machines
//! - [`engine`]: The orchestrator that walks instances through their steps
//! - [`repository`] / [`notify`]: Ports to storage and notification delivery
//! - [`store`]: In-memory reference store with JSON snapshots
//! - [`service`]: Workflow lifecycle and task completion on top of the engine
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use flowrunner::{Actor, Completion, Engine, MemoryStore, Repositories};
//! use flowrunner::{TaskService, WorkflowService};
//! use serde_json::json;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let repos = Repositories::from_store(Arc::new(MemoryStore::new()));
//!     let engine = Arc::new(Engine::with_defaults(repos));
//!     let workflows = WorkflowService::new(engine.clone());
//!     let tasks = TaskService::new(engine);
//!
//!     let definition = r#"{"name": "leave", "steps": [
//!         {"id": "approve", "type": "user_task", "params": {"assignee": "${manager}"}},
//!         {"id": "done", "type": "complete"}
//!     ]}"#;
//!     let workflow = workflows.create("leave", "", definition)?;
//!     workflows.activate(workflow.id)?;
//!
//!     let instance = workflows.start_instance(workflow.id, json!({"manager": "dana"}))?;
//!     let task = tasks.open_tasks(instance.id)?.remove(0);
//!     tasks.complete(task.id, &Actor::new("dana"), Completion::approved())?;
//!
//!     assert!(!workflows.get_instance(instance.id)?.is_running());
//!     Ok(())
//! }
//! ```

pub mod condition;
pub mod config;
pub mod definition;
pub mod engine;
pub mod entity;
pub mod error;
pub mod notify;
pub mod repository;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use config::EngineConfig;
pub use definition::{load_definition, parse_definition, Definition, Step, StepKind};
pub use engine::Engine;
pub use entity::{
    InstanceStatus, Task, TaskResult, TaskStatus, Workflow, WorkflowInstance, WorkflowStatus,
};
pub use error::{EngineError, Result};
pub use notify::{LogNotifier, NoopNotifier, Notifier};
pub use repository::Repositories;
pub use service::{Actor, Completion, TaskService, WorkflowService};
pub use store::{MemoryStore, Snapshot};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "FlowRunner";
