//! Reference Storage
//!
//! - [`memory`]: In-memory implementation of every repository port
//! - [`snapshot`]: JSON file persistence for the in-memory store

pub mod memory;
pub mod snapshot;

pub use memory::MemoryStore;
pub use snapshot::Snapshot;
