//! Parallel Join Barrier
//!
//! Every engine entry point runs under a per-instance lock, so the
//! read-decide-write of a join never interleaves with another call for
//! the same instance. The decision itself is recorded on the instance
//! (see [`WorkflowInstance::claim_join`](crate::entity::WorkflowInstance::claim_join))
//! so a resolved sibling set advances the instance once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use crate::definition::Step;
use crate::entity::Task;

/// One mutex per instance id, held only while some call uses it.
///
/// Serializes calls within one process. Separate processes sharing a
/// store (for example concurrent CLI runs on one snapshot file) are not
/// coordinated by it.
#[derive(Debug, Default)]
pub struct InstanceLocks {
    inner: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, instance_id: Uuid) -> Arc<Mutex<()>> {
        let mut slots = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(instance_id).or_default().clone()
    }

    /// Drops the slot once no other call holds or waits on it.
    fn release(&self, instance_id: Uuid, slot: Arc<Mutex<()>>) {
        let mut slots = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // the map's reference plus ours
        if Arc::strong_count(&slot) == 2 {
            slots.remove(&instance_id);
        }
    }

    /// Runs `f` while holding the lock of `instance_id`.
    pub fn with_lock<T>(&self, instance_id: Uuid, f: impl FnOnce() -> T) -> T {
        let slot = self.slot(instance_id);
        let result = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        self.release(instance_id, slot);
        result
    }
}

/// Tasks opened by the branches of `parallel`, matched by key prefix.
pub fn siblings<'t>(parallel: &Step, tasks: &'t [Task]) -> Vec<&'t Task> {
    let prefix = parallel.branch_prefix();
    tasks
        .iter()
        .filter(|t| t.task_key.starts_with(&prefix))
        .collect()
}

/// Ids of the sibling set when every sibling is completed or rejected.
///
/// Returns `None` while any sibling is still open, or when there are no
/// siblings at all.
pub fn resolved_siblings(parallel: &Step, tasks: &[Task]) -> Option<Vec<Uuid>> {
    let siblings = siblings(parallel, tasks);
    if siblings.is_empty() || siblings.iter().any(|t| t.status.is_open()) {
        return None;
    }

    let mut ids: Vec<Uuid> = siblings.iter().map(|t| t.id).collect();
    ids.sort();
    Some(ids)
}
