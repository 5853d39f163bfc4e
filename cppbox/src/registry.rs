use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::supervisor::ExecutionHandle;

/// Concurrent index of in-flight executions, keyed by execution id.
///
/// Holds non-owning handles only: cancellation is a request delivered to the
/// supervisor, which stays the sole terminator of its child process. Entries
/// are removed exactly once, at the execution's first terminal transition.
#[derive(Debug, Default, Clone)]
pub struct ExecutionRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<ExecutionHandle>>>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, handle: Arc<ExecutionHandle>) {
        debug!(id = handle.id(), "registered execution");
        self.entries().insert(handle.id().to_string(), handle);
    }

    /// Request termination of a live execution. Returns `false` for ids that
    /// already completed or never existed. The requester gets no separate
    /// acknowledgement; the original caller receives the killed outcome.
    pub fn cancel(&self, id: &str) -> bool {
        let handle = self.entries().get(id).cloned();
        match handle {
            Some(handle) => {
                debug!(id, "cancellation requested");
                handle.request_cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `id`. Safe to call for ids never registered.
    pub(crate) fn unregister(&self, id: &str) {
        self.entries().remove(id);
    }

    /// Snapshot of a live handle, if any.
    pub fn get(&self, id: &str) -> Option<Arc<ExecutionHandle>> {
        self.entries().get(id).cloned()
    }

    /// Ids of every currently registered execution.
    pub fn ids(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Arc<ExecutionHandle>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
