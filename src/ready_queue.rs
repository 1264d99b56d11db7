// SPDX-License-Identifier: MIT

//! Ready queue (C3): a multi-level priority queue keyed by pipeline stage.
//!
//! Grounded on `original_source/queue_system/queue_ready.py`'s
//! `MultiLevelPriorityQueue` — same fixed scan order, same `add`/`pop`/
//! `empty` surface — reimplemented with a real `BinaryHeap` behind a
//! `Mutex` instead of a `multiprocessing.Manager` singleton, per the
//! Design Notes' "process-wide singletons" re-architecture.

use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;

use tracing::debug;

use crate::heap_entry::Entry;
use crate::priority::{calculate_priority, QueueKind};
use crate::task::{OrderedPriority, Stage, Task};

/// Fixed sub-queue scan order, per spec §4.3: later pipeline stages drain
/// ahead of new admissions.
const SCAN_ORDER: [Stage; 7] = [
    Stage::Hhsearch,
    Stage::Psipred,
    Stage::SignalP6,
    Stage::HhblitsBfd,
    Stage::HhblitsUniref3,
    Stage::HhblitsUniref2,
    Stage::HhblitsUniref1,
];

/// Multi-level ready queue: one min-priority sub-queue per pipeline stage.
pub struct ReadyQueue {
    queues: Mutex<HashMap<Stage, BinaryHeap<Entry>>>,
    next_seq: AtomicU64,
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyQueue {
    pub fn new() -> Self {
        let mut queues = HashMap::new();
        for stage in Stage::ALL {
            queues.insert(stage, BinaryHeap::new());
        }
        ReadyQueue {
            queues: Mutex::new(queues),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Recompute `task`'s priority under `task.stage`'s queue-kind, stamp
    /// its timestamp, and push it onto that stage's sub-queue.
    ///
    /// Spec §4.3 says "reject if `task.stage` is not a known stage" — here
    /// that precondition is enforced by the type system: [`Stage`] is a
    /// closed enum, so every `Task` already carries a valid stage and this
    /// operation cannot fail.
    pub fn add(&self, mut task: Task) {
        let kind = QueueKind::Stage(task.stage);
        let priority = calculate_priority(kind, &task);
        task.set_priority(priority);
        task.update_timestamp();

        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(stage = %task.stage, priority, seq, "ready.add");

        let mut queues = self.queues.lock().unwrap();
        queues
            .get_mut(&task.stage)
            .expect("every Stage has a sub-queue")
            .push(Entry {
                priority: OrderedPriority(priority),
                seq,
                task,
            });
    }

    /// Scan sub-queues in the fixed order of spec §4.3 and pop the head of
    /// the first non-empty one.
    pub fn pop(&self) -> Option<(Stage, Task)> {
        let mut queues = self.queues.lock().unwrap();
        for &stage in &SCAN_ORDER {
            if let Some(heap) = queues.get_mut(&stage) {
                if let Some(entry) = heap.pop() {
                    debug!(stage = %stage, "ready.pop");
                    return Some((stage, entry.task));
                }
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        let queues = self.queues.lock().unwrap();
        queues.values().all(|h| h.is_empty())
    }

    pub fn len(&self) -> usize {
        let queues = self.queues.lock().unwrap();
        queues.values().map(|h| h.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Params;

    fn task(stage: Stage, seq_len: u32) -> Task {
        let mut t = Task::new(seq_len, Params::default());
        t.stage = stage;
        t
    }

    #[test]
    fn add_then_pop_on_empty_queue_returns_same_stage() {
        let q = ReadyQueue::new();
        q.add(task(Stage::Psipred, 100));
        let (stage, t) = q.pop().unwrap();
        assert_eq!(stage, Stage::Psipred);
        assert_eq!(t.stage, Stage::Psipred);
        assert!(q.is_empty());
    }

    #[test]
    fn scan_order_prefers_hhsearch_over_signalp6() {
        let q = ReadyQueue::new();
        q.add(task(Stage::SignalP6, 100));
        q.add(task(Stage::Hhsearch, 100));
        let (stage, _) = q.pop().unwrap();
        assert_eq!(stage, Stage::Hhsearch, "hhsearch must drain ahead of signalp6");
    }

    #[test]
    fn scan_order_follows_full_fixed_sequence() {
        let q = ReadyQueue::new();
        for stage in Stage::ALL {
            q.add(task(stage, 100));
        }
        let expected = SCAN_ORDER;
        for stage in expected {
            let (got, _) = q.pop().unwrap();
            assert_eq!(got, stage);
        }
        assert!(q.is_empty());
    }

    #[test]
    fn within_a_stage_lower_priority_pops_first() {
        // signalp6 priority = 0.4*mem + 0.6*len (time weight is 0), so a
        // smaller seq_len yields a smaller priority and must pop first.
        let q = ReadyQueue::new();
        q.add(task(Stage::SignalP6, 900));
        q.add(task(Stage::SignalP6, 100));
        let (_, first) = q.pop().unwrap();
        assert_eq!(first.seq_len, 100);
        let (_, second) = q.pop().unwrap();
        assert_eq!(second.seq_len, 900);
    }

    #[test]
    fn empty_is_true_only_when_every_subqueue_empty() {
        let q = ReadyQueue::new();
        assert!(q.is_empty());
        q.add(task(Stage::Hhsearch, 1));
        assert!(!q.is_empty());
        q.pop();
        assert!(q.is_empty());
    }
}
