//! Task registry - the session's only shared mutable state
//!
//! Maps engine task identifiers to their handlers behind a single lock.
//! Every operation, including re-keying, is one critical section, so a
//! concurrent lookup sees a handler either fully present or fully absent.

use crate::engine::TaskId;
use crate::handler::TaskHandler;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Default)]
pub struct TaskRegistry {
    handlers: Mutex<HashMap<TaskId, TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Engines never reuse identifiers, so a displaced
    /// handler means the engine broke its contract; it is returned to the caller.
    pub fn insert(&self, task: TaskId, handler: TaskHandler) -> Option<TaskHandler> {
        let previous = self.handlers.lock().insert(task, handler);
        if previous.is_some() {
            warn!("Task {} was already registered; replacing its handler", task);
        }
        previous
    }

    pub fn remove(&self, task: TaskId) -> Option<TaskHandler> {
        self.handlers.lock().remove(&task)
    }

    /// Move a handler from `from` to `to`. Returns false when `from` is unknown.
    pub fn rekey(&self, from: TaskId, to: TaskId) -> bool {
        let mut handlers = self.handlers.lock();
        match handlers.remove(&from) {
            Some(handler) => {
                if handlers.insert(to, handler).is_some() {
                    warn!("Task {} was already registered; replacing its handler", to);
                }
                true
            }
            None => false,
        }
    }

    /// Run `f` against the handler for `task` while holding the lock.
    ///
    /// `f` must not call back into user code: callbacks may submit new tasks.
    pub fn with_handler<R>(&self, task: TaskId, f: impl FnOnce(&mut TaskHandler) -> R) -> Option<R> {
        self.handlers.lock().get_mut(&task).map(f)
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.handlers.lock().contains_key(&task)
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::TaskOptions;
    use std::path::Path;
    use std::sync::Arc;

    fn handler_with_destination(path: &str) -> TaskHandler {
        TaskHandler::new(Box::new(|_| {}), TaskOptions::new().destination(path))
    }

    #[test]
    fn test_insert_and_remove_once() {
        let registry = TaskRegistry::new();
        registry.insert(TaskId::new(1), handler_with_destination("/tmp/a"));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(TaskId::new(1)).is_some());
        assert!(registry.remove(TaskId::new(1)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rekey_moves_handler() {
        let registry = TaskRegistry::new();
        registry.insert(TaskId::new(1), handler_with_destination("/tmp/a"));

        assert!(registry.rekey(TaskId::new(1), TaskId::new(2)));
        assert!(!registry.contains(TaskId::new(1)));
        let destination = registry
            .with_handler(TaskId::new(2), |h| h.destination().map(Path::to_path_buf))
            .flatten();
        assert_eq!(destination.as_deref(), Some(Path::new("/tmp/a")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_rekey_unknown_task_is_noop() {
        let registry = TaskRegistry::new();
        assert!(!registry.rekey(TaskId::new(7), TaskId::new(8)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lookup_never_observes_handler_mid_rekey() {
        let registry = Arc::new(TaskRegistry::new());
        registry.insert(TaskId::new(0), handler_with_destination("/tmp/a"));

        let mover = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for i in 0..1000 {
                    assert!(registry.rekey(TaskId::new(i), TaskId::new(i + 1)));
                }
            })
        };

        // Snapshot under the same lock the mover uses: exactly one key at all times
        for _ in 0..1000 {
            assert_eq!(registry.len(), 1);
        }
        mover.join().unwrap();
        assert!(registry.contains(TaskId::new(1000)));
    }
}
