// SPDX-License-Identifier: MIT

//! Finished queue (C5): a FIFO recycler for tasks that have left the
//! running registry, either by completing a stage or by being killed.
//!
//! Grounded on `original_source/queue_system/queue_finished.py`'s
//! `QueueFinished` — a plain FIFO with no priority, since the only thing
//! the monitor does with a finished task is credit its reservation back
//! and drop it (or, for a killed task, let it be re-seeded into the ready
//! queue by the caller).

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::debug;

use crate::task::Task;

/// FIFO of tasks that have left the running registry and are waiting for
/// the monitor to credit their reservation back to the available pool.
#[derive(Default)]
pub struct FinishedQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl FinishedQueue {
    pub fn new() -> Self {
        FinishedQueue::default()
    }

    pub fn put(&self, task: Task) {
        debug!(stage = %task.stage, "finished.put");
        self.tasks.lock().unwrap().push_back(task);
    }

    pub fn get(&self) -> Option<Task> {
        self.tasks.lock().unwrap().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Params, Task};

    #[test]
    fn put_then_get_is_fifo() {
        let q = FinishedQueue::new();
        let mut a = Task::new(10, Params::default());
        a.params.job_name = "a".to_string();
        let mut b = Task::new(20, Params::default());
        b.params.job_name = "b".to_string();
        q.put(a);
        q.put(b);
        assert_eq!(q.get().unwrap().params.job_name, "a");
        assert_eq!(q.get().unwrap().params.job_name, "b");
        assert!(q.get().is_none());
    }

    #[test]
    fn is_empty_and_len_track_contents() {
        let q = FinishedQueue::new();
        assert!(q.is_empty());
        assert_eq!(q.len(), 0);
        q.put(Task::new(1, Params::default()));
        assert!(!q.is_empty());
        assert_eq!(q.len(), 1);
    }
}
