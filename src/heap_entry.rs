// SPDX-License-Identifier: MIT

//! Shared min-priority-queue entry type used by both
//! [`crate::ready_queue::ReadyQueue`] and
//! [`crate::running_registry::RunningRegistry`].
//!
//! Per the Design Notes' priority-queue-comparability guidance: every
//! queue in this crate holds `(priority, seq, task)` triples, where `seq`
//! is a monotonically increasing tiebreaker assigned at enqueue time. This
//! avoids relying on `Task`'s own (nonexistent) total order and gives
//! every queue FIFO tiebreaking on exactly-equal priorities.

use std::cmp::Ordering;

use crate::task::{OrderedPriority, Task};

/// One entry in a min-priority heap. `BinaryHeap` is a max-heap, so [`Ord`]
/// is implemented in reverse here, making the heap behave as a min-heap.
pub struct Entry {
    pub priority: OrderedPriority,
    pub seq: u64,
    pub task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
