// SPDX-License-Identifier: MIT

//! Running registry (C4): the three substates a launched task can be in —
//! `normal`, `excess` (over its memory reservation but still running), and
//! `suspended` (I/O-throttled).
//!
//! Grounded on `original_source/queue_system/queue_running.py`'s
//! `QueueRunning` for control flow (`add_to_normal`, `move_to_excess`,
//! `suspend_task`, `resume_task`, `kill_a_task`, `finish_task`,
//! `check_excess_and_move`, `get_total_memory_usage`,
//! `get_a_high_io_task`), reimplemented over real `BinaryHeap`s instead of
//! a `multiprocessing.Manager`-backed `PriorityQueue`, and over the
//! [`ProcessGroup`]/[`HostProbe`] capabilities instead of direct `psutil`/
//! `os.kill` calls.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use crate::finished_queue::FinishedQueue;
use crate::heap_entry::Entry;
use crate::host_probe::HostProbe;
use crate::priority::{calculate_priority, QueueKind};
use crate::process_group::ProcessGroup;
use crate::ready_queue::ReadyQueue;
use crate::stage::StageLauncher;
use crate::task::{OrderedPriority, Task};

/// The registry of launched tasks, split into its three min-priority
/// substates plus the collaborators it needs to perform a full hand-off
/// on kill: the finished queue (to credit reservations back) and the
/// ready queue (to retry the killed task from scratch).
pub struct RunningRegistry {
    normal: Mutex<BinaryHeap<Entry>>,
    excess: Mutex<BinaryHeap<Entry>>,
    suspended: Mutex<BinaryHeap<Entry>>,
    next_seq: AtomicU64,

    process_group: Arc<dyn ProcessGroup>,
    host_probe: Arc<dyn HostProbe>,
    stage_launcher: Arc<dyn StageLauncher>,
    finished: Arc<FinishedQueue>,
    ready: Arc<ReadyQueue>,
}

impl RunningRegistry {
    pub fn new(
        process_group: Arc<dyn ProcessGroup>,
        host_probe: Arc<dyn HostProbe>,
        stage_launcher: Arc<dyn StageLauncher>,
        finished: Arc<FinishedQueue>,
        ready: Arc<ReadyQueue>,
    ) -> Self {
        RunningRegistry {
            normal: Mutex::new(BinaryHeap::new()),
            excess: Mutex::new(BinaryHeap::new()),
            suspended: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
            process_group,
            host_probe,
            stage_launcher,
            finished,
            ready,
        }
    }

    fn push(heap: &mut BinaryHeap<Entry>, next_seq: &AtomicU64, kind: QueueKind, mut task: Task) {
        let priority = calculate_priority(kind, &task);
        task.set_priority(priority);
        let seq = next_seq.fetch_add(1, Ordering::Relaxed);
        heap.push(Entry { priority: OrderedPriority(priority), seq, task });
    }

    fn push_normal(&self, task: Task) {
        Self::push(&mut self.normal.lock().unwrap(), &self.next_seq, QueueKind::Normal, task);
    }

    fn push_excess(&self, task: Task) {
        Self::push(&mut self.excess.lock().unwrap(), &self.next_seq, QueueKind::Excess, task);
    }

    fn push_suspended(&self, task: Task) {
        Self::push(&mut self.suspended.lock().unwrap(), &self.next_seq, QueueKind::Suspend, task);
    }

    /// Remove by pid from whichever of the three substates currently holds
    /// it, in the order normal -> excess -> suspended.
    fn take_from_any(&self, pid: u32) -> Option<Task> {
        if let Some(t) = remove_by_pid(&mut self.normal.lock().unwrap(), pid) {
            return Some(t);
        }
        if let Some(t) = remove_by_pid(&mut self.excess.lock().unwrap(), pid) {
            return Some(t);
        }
        remove_by_pid(&mut self.suspended.lock().unwrap(), pid)
    }

    /// Launch `task`'s current stage and admit it into `normal`.
    ///
    /// Per SPEC_FULL.md §4.4, the task's priority and pid are both
    /// established before it becomes externally observable: launch first
    /// (so `pid` is known), then price and push, rather than pushing a
    /// pid-less entry and mutating it in place inside the heap.
    ///
    /// Returns the task back to the caller on launch failure (rather than
    /// dropping it) so a failed admission can be re-enqueued instead of
    /// silently disappearing.
    pub fn admit_normal(&self, mut task: Task) -> Result<u32, (Task, std::io::Error)> {
        match self.stage_launcher.launch(&task) {
            Ok(pid) => {
                task.pid = Some(pid);
                info!(stage = %task.stage, pid, "admit_normal");
                self.push_normal(task);
                Ok(pid)
            }
            Err(e) => Err((task, e)),
        }
    }

    /// Move a running task from `normal` to `excess`. `excess` means "still
    /// running but over its memory reservation", not a failure.
    pub fn move_to_excess(&self, pid: u32) -> bool {
        match remove_by_pid(&mut self.normal.lock().unwrap(), pid) {
            Some(task) => {
                warn!(pid, "task exceeded its memory reservation, moving to excess");
                self.push_excess(task);
                true
            }
            None => false,
        }
    }

    /// For each task in `normal`, check whether its current process-tree
    /// RSS exceeds its reservation and move it to `excess` if so.
    ///
    /// Snapshots `normal`'s contents before sampling the host, per the
    /// decided fix for the "mutation during iteration" design note: RSS
    /// sampling and the move both happen after the snapshot is taken, so
    /// this never mutates the heap it is iterating.
    pub fn check_excess_and_move(&self) {
        let snapshot: Vec<Task> = {
            let normal = self.normal.lock().unwrap();
            normal.iter().map(|e| e.task.clone()).collect()
        };
        for task in snapshot {
            let Some(pid) = task.pid else { continue };
            if self.host_probe.process_rss_gb(pid) > task.mem_reserved_gb {
                self.move_to_excess(pid);
            }
        }
    }

    /// SIGSTOP `pid`'s process tree and move it into `suspended`. Finding
    /// the task already in `suspended` is a no-op re-suspend: the signal
    /// is re-sent (harmless against an already-stopped tree) and the task
    /// is re-primed with a fresh suspend priority, leaving it in the same
    /// substate it started in — this is what makes `suspend` idempotent.
    pub fn suspend(&self, pid: u32) -> bool {
        let Some(task) = self.take_from_any(pid) else {
            return false;
        };
        self.process_group.stop_tree(pid);
        self.push_suspended(task);
        true
    }

    /// SIGCONT a suspended task's process tree and move it back to
    /// `normal`. A no-op if `pid` is not currently suspended, per spec
    /// §4.4's "only if task is in suspended".
    pub fn resume(&self, pid: u32) -> bool {
        let Some(task) = remove_by_pid(&mut self.suspended.lock().unwrap(), pid) else {
            return false;
        };
        self.process_group.cont_tree(pid);
        self.push_normal(task);
        true
    }

    /// Kill the least-time-invested runnable task: pop `normal`, else
    /// `excess`, else `suspended`. SIGTERM its process tree, then hand it
    /// off to *both* the finished queue and the ready queue.
    ///
    /// NOTE: this double-credits the task's CPU reservation — `finished`
    /// recycles it as if the slot is free, and `ready` re-admits the same
    /// task later, reserving it again. Kept as the literal, documented
    /// behavior (see the open question on this in SPEC_FULL.md §9) rather
    /// than silently fixed.
    pub fn kill_one(&self) -> bool {
        let popped = {
            let mut normal = self.normal.lock().unwrap();
            if let Some(e) = normal.pop() {
                Some(e.task)
            } else {
                drop(normal);
                let mut excess = self.excess.lock().unwrap();
                if let Some(e) = excess.pop() {
                    Some(e.task)
                } else {
                    drop(excess);
                    self.suspended.lock().unwrap().pop().map(|e| e.task)
                }
            }
        };
        let Some(task) = popped else {
            return false;
        };
        if let Some(pid) = task.pid {
            warn!(pid, stage = %task.stage, "killing task under memory pressure");
            self.process_group.terminate_tree(pid);
        }
        self.finished.put(task.clone());
        self.ready.add(task);
        true
    }

    /// Remove `pid` from whichever substate holds it (the normal
    /// completion path).
    pub fn finish(&self, pid: u32) -> Option<Task> {
        self.take_from_any(pid)
    }

    /// Sum of per-task process-tree RSS in GB across all three substates.
    pub fn total_memory_usage(&self) -> f64 {
        self.all_pids()
            .into_iter()
            .map(|pid| self.host_probe.process_rss_gb(pid))
            .sum()
    }

    /// The task with the highest I/O rate (bytes/sec over a 1-second
    /// window) in `normal`, or in `excess` if `normal` is empty, or `None`
    /// if both are empty.
    pub fn highest_io_task(&self) -> Option<Task> {
        let normal_tasks: Vec<Task> = {
            let h = self.normal.lock().unwrap();
            h.iter().map(|e| e.task.clone()).collect()
        };
        if !normal_tasks.is_empty() {
            return self.highest_io_among(&normal_tasks);
        }
        let excess_tasks: Vec<Task> = {
            let h = self.excess.lock().unwrap();
            h.iter().map(|e| e.task.clone()).collect()
        };
        if excess_tasks.is_empty() {
            return None;
        }
        self.highest_io_among(&excess_tasks)
    }

    /// Mirrors `get_a_high_io_task`'s `high_io_rate = 0` seed: a task is
    /// only ever chosen once its rate is strictly positive, so an idle
    /// process tree never gets suspended for "having the highest I/O".
    fn highest_io_among(&self, tasks: &[Task]) -> Option<Task> {
        let mut best: Option<(u64, &Task)> = None;
        for task in tasks {
            let Some(pid) = task.pid else { continue };
            let rate = self.host_probe.process_io_bytes_per_sec(pid, Duration::from_secs(1));
            if rate > 0 && best.map_or(true, |(b, _)| rate > b) {
                best = Some((rate, task));
            }
        }
        best.map(|(_, t)| t.clone())
    }

    fn all_pids(&self) -> Vec<u32> {
        let mut pids = Vec::new();
        for heap in [&self.normal, &self.excess, &self.suspended] {
            let h = heap.lock().unwrap();
            pids.extend(h.iter().filter_map(|e| e.task.pid));
        }
        pids
    }

    /// A snapshot clone of every task currently in `normal`, for the
    /// monitor to poll stage completion without holding the lock while it
    /// calls out to the stage launcher.
    pub fn normal_snapshot(&self) -> Vec<Task> {
        self.normal.lock().unwrap().iter().map(|e| e.task.clone()).collect()
    }

    /// A snapshot clone of every task currently in `excess`. `excess` tasks
    /// are still running (just over their memory reservation), so the
    /// monitor must poll them for stage completion too, not only `normal`.
    pub fn excess_snapshot(&self) -> Vec<Task> {
        self.excess.lock().unwrap().iter().map(|e| e.task.clone()).collect()
    }

    /// The pid of the most-recently-suspended task (the head of
    /// `suspended`), without removing it. Used by the monitor to decide
    /// which task to [`resume`](Self::resume) when iowait drops.
    pub fn suspended_head_pid(&self) -> Option<u32> {
        self.suspended.lock().unwrap().peek().and_then(|e| e.task.pid)
    }

    pub fn is_empty(&self) -> bool {
        self.normal.lock().unwrap().is_empty()
            && self.excess.lock().unwrap().is_empty()
            && self.suspended.lock().unwrap().is_empty()
    }
}

/// Remove the first entry whose task has pid `pid`, rebuilding the heap
/// around the remainder. `O(n)`, acceptable for the small running-task
/// counts this scheduler targets (see spec's concurrency model).
fn remove_by_pid(heap: &mut BinaryHeap<Entry>, pid: u32) -> Option<Task> {
    let items = std::mem::take(heap).into_vec();
    let mut found = None;
    let mut rest = Vec::with_capacity(items.len());
    for entry in items {
        if found.is_none() && entry.task.pid == Some(pid) {
            found = Some(entry.task);
        } else {
            rest.push(entry);
        }
    }
    *heap = BinaryHeap::from(rest);
    found
}
