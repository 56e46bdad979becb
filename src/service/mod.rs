//! Application Services
//!
//! - [`workflows`]: Workflow lifecycle, instance start and cancel
//! - [`tasks`]: Claiming, completing and delegating tasks

pub mod tasks;
pub mod workflows;

pub use tasks::{Actor, Completion, TaskService};
pub use workflows::WorkflowService;
