// SPDX-License-Identifier: MIT

//! Priority calculator (C2): a pure function from (queue-kind, task) to a
//! numeric priority, used by every priority queue in the scheduler.
//!
//! All priorities in this crate are consumed by a *min*-priority queue: the
//! smallest value is popped first. `Suspend`'s "most-recently-suspended
//! first" requirement is achieved by negating the timestamp rather than by
//! a different heap — see [`calculate_priority`].

use crate::error::InvalidQueueKind;
use crate::task::{Stage, Task};

/// Label selecting a priority formula: the seven pipeline stages (used when
/// a task sits in the ready queue) plus the three running-registry
/// substates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Stage(Stage),
    Normal,
    Excess,
    Suspend,
}

impl QueueKind {
    fn key(self) -> &'static str {
        match self {
            QueueKind::Stage(s) => s.config_key(),
            QueueKind::Normal => "normal",
            QueueKind::Excess => "excess",
            QueueKind::Suspend => "suspend",
        }
    }

    /// Parse from a string label, for config/CLI boundaries. Internal
    /// callers always construct a `QueueKind` directly from a `Stage` or a
    /// known variant, so this is the only path that can produce
    /// [`InvalidQueueKind`].
    pub fn from_key(key: &str) -> Result<QueueKind, InvalidQueueKind> {
        if let Some(stage) = Stage::from_config_key(key) {
            return Ok(QueueKind::Stage(stage));
        }
        match key {
            "normal" => Ok(QueueKind::Normal),
            "excess" => Ok(QueueKind::Excess),
            "suspend" => Ok(QueueKind::Suspend),
            other => Err(InvalidQueueKind(other.to_string())),
        }
    }
}

impl From<Stage> for QueueKind {
    fn from(s: Stage) -> Self {
        QueueKind::Stage(s)
    }
}

/// Non-negative weights over `(timestamp, mem_reserved_gb, seq_len)`,
/// summing to 1.0, per spec §4.2's table.
struct Weights {
    time: f64,
    mem: f64,
    len: f64,
}

fn weights_for(kind: QueueKind) -> Option<Weights> {
    use Stage::*;
    Some(match kind {
        QueueKind::Stage(Hhsearch) => Weights { time: 0.5, mem: 0.2, len: 0.3 },
        QueueKind::Stage(Psipred) => Weights { time: 0.5, mem: 0.2, len: 0.3 },
        QueueKind::Stage(SignalP6) => Weights { time: 0.0, mem: 0.4, len: 0.6 },
        QueueKind::Stage(HhblitsBfd) => Weights { time: 0.5, mem: 0.3, len: 0.2 },
        QueueKind::Stage(HhblitsUniref1) => Weights { time: 0.4, mem: 0.4, len: 0.2 },
        QueueKind::Stage(HhblitsUniref2) => Weights { time: 0.3, mem: 0.4, len: 0.3 },
        QueueKind::Stage(HhblitsUniref3) => Weights { time: 0.2, mem: 0.4, len: 0.4 },
        QueueKind::Normal | QueueKind::Excess | QueueKind::Suspend => return None,
    })
}

/// Compute the priority of `task` under `kind`, for use in a min-priority
/// queue (smallest value dequeued first).
///
/// * Per-stage kinds: weighted sum of `(timestamp, mem_reserved_gb,
///   seq_len)`.
/// * `Normal`/`Excess`: identity of `timestamp` — plain FIFO.
/// * `Suspend`: negated `timestamp` — the most recently suspended task has
///   the smallest (most negative) priority, so it is resumed first, per
///   spec §4.2's "max heap sense ... most-recently-suspended first".
pub fn calculate_priority(kind: QueueKind, task: &Task) -> f64 {
    match kind {
        QueueKind::Normal | QueueKind::Excess => task.timestamp() as f64,
        QueueKind::Suspend => -(task.timestamp() as f64),
        _ => {
            let w = weights_for(kind).expect("stage kind always has weights");
            w.time * task.timestamp() as f64
                + w.mem * task.mem_reserved_gb
                + w.len * task.seq_len as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Params;

    fn task_with(mem_gb: f64, seq_len: u32) -> Task {
        let mut t = Task::new(seq_len, Params::default());
        t.mem_reserved_gb = mem_gb;
        t
    }

    #[test]
    fn from_key_parses_all_stage_names() {
        for stage in Stage::ALL {
            assert_eq!(
                QueueKind::from_key(stage.config_key()),
                Ok(QueueKind::Stage(stage))
            );
        }
        assert_eq!(QueueKind::from_key("normal"), Ok(QueueKind::Normal));
        assert_eq!(QueueKind::from_key("excess"), Ok(QueueKind::Excess));
        assert_eq!(QueueKind::from_key("suspend"), Ok(QueueKind::Suspend));
    }

    #[test]
    fn from_key_rejects_unknown() {
        assert_eq!(
            QueueKind::from_key("bogus"),
            Err(InvalidQueueKind("bogus".to_string()))
        );
    }

    #[test]
    fn normal_and_excess_are_plain_fifo_on_timestamp() {
        let mut t = task_with(0.0, 0);
        t.update_timestamp();
        let ts = t.timestamp() as f64;
        assert_eq!(calculate_priority(QueueKind::Normal, &t), ts);
        assert_eq!(calculate_priority(QueueKind::Excess, &t), ts);
    }

    #[test]
    fn suspend_negates_timestamp_so_latest_pops_first() {
        let mut older = task_with(0.0, 0);
        older.update_timestamp();
        std::thread::sleep(std::time::Duration::from_secs(1));
        let mut newer = task_with(0.0, 0);
        newer.update_timestamp();

        let p_older = calculate_priority(QueueKind::Suspend, &older);
        let p_newer = calculate_priority(QueueKind::Suspend, &newer);
        assert!(
            p_newer <= p_older,
            "a later timestamp must yield a smaller (or equal) suspend priority"
        );
    }

    #[test]
    fn signalp6_weights_ignore_timestamp() {
        let mut t = task_with(2.0, 300);
        t.update_timestamp();
        let p = calculate_priority(QueueKind::Stage(Stage::SignalP6), &t);
        // 0.0*time + 0.4*mem + 0.6*len
        assert!((p - (0.4 * 2.0 + 0.6 * 300.0)).abs() < 1e-9);
    }

    #[test]
    fn hhsearch_weights_match_table() {
        let mut t = task_with(4.0, 500);
        t.update_timestamp();
        let ts = t.timestamp() as f64;
        let p = calculate_priority(QueueKind::Stage(Stage::Hhsearch), &t);
        let expected = 0.5 * ts + 0.2 * 4.0 + 0.3 * 500.0;
        assert!((p - expected).abs() < 1e-6);
    }

    #[test]
    fn weights_sum_to_one_for_every_stage() {
        for stage in Stage::ALL {
            let w = weights_for(QueueKind::Stage(stage)).unwrap();
            assert!((w.time + w.mem + w.len - 1.0).abs() < 1e-9, "{stage} weights must sum to 1.0");
        }
    }
}
