//! Workflow Definition Module
//!
//! Data structures and utilities for parsing and validating the JSON
//! step graphs that workflows are built from.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Definition, Step, StepKind)
//! - [`parser`]: JSON/YAML parsing and loading
//! - [`validator`]: Structural validation rules

pub mod model;
pub mod parser;
pub mod validator;

pub use model::{Definition, FormField, Priority, Step, StepKind, TaskOrigin, TaskParams};
pub use parser::{load_definition, parse_definition, save_definition};
pub use validator::{quick_validate, validate_definition, ValidationError};
