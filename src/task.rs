// SPDX-License-Identifier: MIT

//! Core task data structures.
//!
//! A [`Task`] represents one input sequence progressing through the fixed
//! seven-stage pipeline. It is created once by the seeding step (C14) with
//! `stage == Stage::SignalP6`, then owned exclusively by whichever part of
//! the scheduler currently holds it — the ready queue, the running
//! registry, or the finished queue — never more than one at a time.
//!
//! # Ownership model
//! Unlike the teacher's `GlobalScheduler`, which takes a whole `Vec<Task>`
//! for one stateless call, this scheduler is long-lived: a `Task` moves
//! between [`crate::ready_queue::ReadyQueue`],
//! [`crate::running_registry::RunningRegistry`], and
//! [`crate::finished_queue::FinishedQueue`] for its entire lifetime.

use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

// ── Stage ─────────────────────────────────────────────────────────────────────

/// One step of the fixed pipeline a task traverses.
///
/// Mirrors the teacher's `SchedPolicy` enum-over-raw-value pattern: carrying
/// a closed enum through the scheduler makes an invalid stage
/// unrepresentable, instead of a bare `&str` that could be any value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    SignalP6,
    HhblitsUniref1,
    HhblitsUniref2,
    HhblitsUniref3,
    HhblitsBfd,
    Psipred,
    Hhsearch,
}

impl Stage {
    /// All seven stages, in pipeline-entry order. Used by config loading to
    /// validate that every stage has reservation tables, and by tests.
    pub const ALL: [Stage; 7] = [
        Stage::SignalP6,
        Stage::HhblitsUniref1,
        Stage::HhblitsUniref2,
        Stage::HhblitsUniref3,
        Stage::HhblitsBfd,
        Stage::Psipred,
        Stage::Hhsearch,
    ];

    /// The key used in config tables (`job_core_num`, `job_mem_num`) and in
    /// per-job input descriptors. Mirrors `original_source`'s stage names.
    pub fn config_key(self) -> &'static str {
        match self {
            Stage::SignalP6 => "signalp6",
            Stage::HhblitsUniref1 => "hhblits_uniref_1",
            Stage::HhblitsUniref2 => "hhblits_uniref_2",
            Stage::HhblitsUniref3 => "hhblits_uniref_3",
            Stage::HhblitsBfd => "hhblits_bfd",
            Stage::Psipred => "psipred",
            Stage::Hhsearch => "hhsearch",
        }
    }

    /// Parse a stage from its config-key string. Used only at the
    /// seeding/config boundary where the source is an untyped string.
    pub fn from_config_key(key: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.config_key() == key)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.config_key())
    }
}

// ── Params ────────────────────────────────────────────────────────────────────

/// Stage-input parameters that mutate as a task advances, per spec §4.6's
/// hand-off protocol.
///
/// A typed struct (rather than the original Python's untyped dict) for the
/// fields every stage transition is documented to touch, plus an `extra`
/// side-map for forward compatibility — mirrors the teacher's dormant
/// `Task::memory_mb` pattern of "the field exists now so the pipeline is
/// ready without a breaking change later".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    pub job_name: String,
    pub output_dir: String,
    pub fasta_file: String,
    /// e-value threshold for the current hhblits/hhsearch invocation. Unset
    /// until the first stage transition that requires it.
    pub e_value: Option<f64>,
    pub extra: std::collections::HashMap<String, String>,
}

// ── OrderedPriority ───────────────────────────────────────────────────────────

/// Newtype wrapper giving `f64` a total order for use inside a
/// [`std::collections::BinaryHeap`].
///
/// Per the Design Notes' priority-queue-comparability guidance: priorities
/// reaching this type are always finite (they come only from
/// [`crate::priority::calculate_priority`], pure arithmetic over finite
/// inputs), so `partial_cmp().unwrap()` never panics in practice. Combined
/// with a monotonic `seq` tiebreaker at the call site, equal priorities
/// never produce undefined ordering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderedPriority(pub f64);

impl Eq for OrderedPriority {}

impl PartialOrd for OrderedPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or_else(|| {
            panic!("non-finite priority reached OrderedPriority: {} / {}", self.0, other.0)
        })
    }
}

// ── Task ──────────────────────────────────────────────────────────────────────

/// A task in flight through the pipeline.
///
/// Invariants (spec §3):
/// 1. Exists in at most one of {ready, running, finished} at any instant —
///    enforced structurally: only one queue ever owns a given `Task` value.
/// 2. `pid.is_some()` iff the task is in a running substate.
/// 3. `priority` is set whenever the task resides in any priority queue.
/// 4. `cpu_reserved`/`mem_reserved` reflect the current stage only.
#[derive(Debug, Clone)]
pub struct Task {
    pub stage: Stage,
    pub seq_len: u32,
    pub params: Params,

    /// Recomputed every time the task is (re-)enqueued into a priority
    /// queue. `None` between enqueue operations — comparing a task in this
    /// state is a programmer error (see [`OrderedPriority`] callers).
    priority: Option<f64>,

    /// Set when the stage's child process is launched, cleared when the
    /// task leaves the running registry.
    pub pid: Option<u32>,

    pub cpu_reserved: u32,
    pub mem_reserved_gb: f64,

    /// Monotonic seconds at the moment of most recent enqueue into the
    /// ready queue.
    timestamp: u64,
}

impl Task {
    /// Create a freshly-seeded task at the pipeline entry stage.
    pub fn new(seq_len: u32, params: Params) -> Self {
        Task {
            stage: Stage::SignalP6,
            seq_len,
            params,
            priority: None,
            pid: None,
            cpu_reserved: 0,
            mem_reserved_gb: 0.0,
            timestamp: 0,
        }
    }

    pub fn priority(&self) -> Option<f64> {
        self.priority
    }

    /// Set the priority. Rejects non-finite values — mirrors the Python
    /// setter's `isinstance(value, (int, float, type(None)))` guard, made
    /// exact for IEEE-754 by rejecting NaN/infinite instead of accepting
    /// any float.
    pub fn set_priority(&mut self, value: f64) {
        assert!(
            value.is_finite(),
            "priority must be finite, got {value}"
        );
        self.priority = Some(value);
    }

    pub fn clear_priority(&mut self) {
        self.priority = None;
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Sets `timestamp` to the current second, per spec §4.1.
    pub fn update_timestamp(&mut self) {
        self.timestamp = now_secs();
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_config_key_round_trips() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_config_key(stage.config_key()), Some(stage));
        }
    }

    #[test]
    fn unknown_config_key_is_none() {
        assert_eq!(Stage::from_config_key("not_a_stage"), None);
    }

    #[test]
    fn new_task_has_no_priority_and_no_pid() {
        let t = Task::new(250, Params::default());
        assert_eq!(t.priority(), None);
        assert_eq!(t.pid, None);
        assert_eq!(t.stage, Stage::SignalP6);
    }

    #[test]
    fn set_priority_then_get() {
        let mut t = Task::new(100, Params::default());
        t.set_priority(3.5);
        assert_eq!(t.priority(), Some(3.5));
    }

    #[test]
    #[should_panic(expected = "priority must be finite")]
    fn set_priority_rejects_nan() {
        let mut t = Task::new(100, Params::default());
        t.set_priority(f64::NAN);
    }

    #[test]
    fn update_timestamp_sets_nonzero_value() {
        let mut t = Task::new(100, Params::default());
        assert_eq!(t.timestamp(), 0);
        t.update_timestamp();
        assert!(t.timestamp() > 0);
    }

    #[test]
    fn ordered_priority_orders_by_value() {
        let a = OrderedPriority(1.0);
        let b = OrderedPriority(2.0);
        assert!(a < b);
        assert_eq!(a.cmp(&a), Ordering::Equal);
    }
}
