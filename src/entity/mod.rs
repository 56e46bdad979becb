//! Entity State Machines
//!
//! The records the engine mutates. Every status change goes through a
//! guarded transition method that rejects illegal source states.
//!
//! - [`workflow`]: Workflow definitions and their lifecycle
//! - [`instance`]: Workflow instances (executions)
//! - [`task`]: Human tasks
//! - [`history`]: Append-only task audit records

pub mod history;
pub mod instance;
pub mod task;
pub mod workflow;

pub use history::{HistoryAction, TaskHistory};
pub use instance::{normalize_input, InstanceStatus, JoinRecord, WorkflowInstance};
pub use task::{Progression, Task, TaskResult, TaskStatus};
pub use workflow::{Workflow, WorkflowStatus};
