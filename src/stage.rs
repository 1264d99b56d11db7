// SPDX-License-Identifier: MIT

//! Stage runner (C6) and external dispatch (C13).
//!
//! Grounded on `original_source/scripts/run_task.py` and the per-stage
//! completion callbacks described in `queue_system/task_scheduler.py`, with
//! the cyclic-import fix from the Design Notes applied: a stage launch
//! reports a [`StageOutcome`] rather than calling back into the ready/
//! finished queues itself. [`crate::monitor`] is the only code that edits
//! `Task` state and performs the hand-off.

use crate::task::{Params, Stage, Task};

/// What happened when the monitor checked in on a running task's stage.
///
/// Per SPEC_FULL.md §4.6, the three cases a stage can report back.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    /// Still executing under `pid`; no change to scheduler state.
    Running(u32),
    /// Completed and selected its successor stage, with the params edits
    /// the transition requires.
    Next { stage: Stage, params: Params },
    /// Completed the final stage (`hhsearch`); the task goes only to
    /// `finished`, with no further ready-queue re-entry.
    Terminal,
}

/// The deterministic stage successor table of spec §4.6.
///
/// `sufficient` is the stage's own verdict on whether its MSA was
/// sufficient; only `hhblits_uniref_{1,2,3}` branch on it. Every other
/// stage has exactly one successor regardless of `sufficient`.
pub fn successor(from: Stage, sufficient: bool) -> Option<Stage> {
    use Stage::*;
    match from {
        SignalP6 => Some(HhblitsUniref1),
        HhblitsUniref1 => Some(if sufficient { Psipred } else { HhblitsUniref2 }),
        HhblitsUniref2 => Some(if sufficient { Psipred } else { HhblitsUniref3 }),
        HhblitsUniref3 => Some(if sufficient { Psipred } else { HhblitsBfd }),
        HhblitsBfd => Some(Psipred),
        Psipred => Some(Hhsearch),
        Hhsearch => None,
    }
}

/// Apply a stage transition's params edits, per spec §4.6's table. Only
/// the three `hhblits_uniref_*` "insufficient" branches touch `e_value`
/// and `fasta_file`; every other transition leaves params untouched.
pub fn advance_params(from: Stage, to: Stage, mut params: Params) -> Params {
    use Stage::*;
    match (from, to) {
        (SignalP6, HhblitsUniref1) => {
            params.e_value = Some(1e-10);
        }
        (HhblitsUniref1, HhblitsUniref2) => {
            params.e_value = Some(1e-6);
            params.fasta_file = filtered_a3m_path(&params.fasta_file);
        }
        (HhblitsUniref2, HhblitsUniref3) => {
            params.e_value = Some(1e-3);
            params.fasta_file = filtered_a3m_path(&params.fasta_file);
        }
        (HhblitsUniref3, HhblitsBfd) => {
            params.e_value = Some(1e-3);
            params.fasta_file = filtered_a3m_path(&params.fasta_file);
        }
        _ => {}
    }
    params
}

/// Derive the cov50-filtered intermediate path the next hhblits round
/// reads from, mirroring the naming `scripts/run_task.py`'s hhblits
/// wrapper writes alongside its output a3m.
fn filtered_a3m_path(fasta_file: &str) -> String {
    format!("{fasta_file}.filtered.a3m")
}

/// Capability to launch the external process for a task's current stage.
///
/// Isolated behind a trait per the Design Notes' "process-wide
/// singletons" guidance: [`crate::running_registry::RunningRegistry`]
/// depends only on this trait, never on `std::process::Command` directly,
/// so admission can be driven deterministically in tests.
pub trait StageLauncher: Send + Sync {
    /// Launch `task`'s current stage as a child process and return its
    /// pid. The concrete pipeline binaries (signalp6, hhblits, psipred,
    /// hhsearch) are out of scope; the real implementation runs a
    /// configurable placeholder command per stage.
    fn launch(&self, task: &Task) -> std::io::Result<u32>;

    /// Check whether `task`'s launched process has completed, and if so,
    /// what it reports. Called by the monitor once per control-loop
    /// iteration for every task in `normal`.
    fn poll(&self, task: &Task) -> StageOutcome;
}

/// Real [`StageLauncher`]: runs one configured external command per
/// stage, substituting `{fasta_file}` and `{output_dir}` into its
/// argument list.
///
/// Completion is detected with `Child::try_wait`; "sufficient MSA" for
/// the `hhblits_uniref_*` stages is read from a sentinel file
/// (`<output_dir>/insufficient_msa`) the placeholder command is expected
/// to write when its coverage threshold isn't met — a stand-in contract
/// for whatever signal the real pipeline binaries use.
pub struct ExternalStageLauncher {
    commands: std::collections::HashMap<Stage, Vec<String>>,
    children: std::sync::Mutex<std::collections::HashMap<u32, std::process::Child>>,
}

impl ExternalStageLauncher {
    pub fn new(commands: std::collections::HashMap<Stage, Vec<String>>) -> Self {
        ExternalStageLauncher {
            commands,
            children: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn argv_for(&self, task: &Task) -> Vec<String> {
        let template = self
            .commands
            .get(&task.stage)
            .cloned()
            .unwrap_or_else(|| vec!["true".to_string()]);
        template
            .into_iter()
            .map(|arg| {
                arg.replace("{fasta_file}", &task.params.fasta_file)
                    .replace("{output_dir}", &task.params.output_dir)
            })
            .collect()
    }
}

impl StageLauncher for ExternalStageLauncher {
    fn launch(&self, task: &Task) -> std::io::Result<u32> {
        let argv = self.argv_for(task);
        let (program, args) = argv.split_first().expect("argv is never empty");
        let child = std::process::Command::new(program).args(args).spawn()?;
        let pid = child.id();
        self.children.lock().unwrap().insert(pid, child);
        Ok(pid)
    }

    fn poll(&self, task: &Task) -> StageOutcome {
        let Some(pid) = task.pid else {
            return StageOutcome::Terminal;
        };
        let mut children = self.children.lock().unwrap();
        let Some(child) = children.get_mut(&pid) else {
            return StageOutcome::Terminal;
        };
        match child.try_wait() {
            Ok(Some(_status)) => {
                children.remove(&pid);
                let sufficient =
                    !std::path::Path::new(&task.params.output_dir).join("insufficient_msa").exists();
                match successor(task.stage, sufficient) {
                    Some(stage) => StageOutcome::Next {
                        stage,
                        params: advance_params(task.stage, stage, task.params.clone()),
                    },
                    None => StageOutcome::Terminal,
                }
            }
            Ok(None) => StageOutcome::Running(pid),
            Err(_) => StageOutcome::Running(pid),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signalp6_always_advances_to_hhblits_uniref_1() {
        assert_eq!(successor(Stage::SignalP6, true), Some(Stage::HhblitsUniref1));
        assert_eq!(successor(Stage::SignalP6, false), Some(Stage::HhblitsUniref1));
    }

    #[test]
    fn uniref_chain_branches_on_sufficiency() {
        assert_eq!(successor(Stage::HhblitsUniref1, false), Some(Stage::HhblitsUniref2));
        assert_eq!(successor(Stage::HhblitsUniref1, true), Some(Stage::Psipred));
        assert_eq!(successor(Stage::HhblitsUniref2, false), Some(Stage::HhblitsUniref3));
        assert_eq!(successor(Stage::HhblitsUniref2, true), Some(Stage::Psipred));
        assert_eq!(successor(Stage::HhblitsUniref3, false), Some(Stage::HhblitsBfd));
        assert_eq!(successor(Stage::HhblitsUniref3, true), Some(Stage::Psipred));
    }

    #[test]
    fn bfd_psipred_hhsearch_chain_is_fixed() {
        assert_eq!(successor(Stage::HhblitsBfd, true), Some(Stage::Psipred));
        assert_eq!(successor(Stage::HhblitsBfd, false), Some(Stage::Psipred));
        assert_eq!(successor(Stage::Psipred, true), Some(Stage::Hhsearch));
        assert_eq!(successor(Stage::Hhsearch, true), None);
        assert_eq!(successor(Stage::Hhsearch, false), None);
    }

    #[test]
    fn insufficient_uniref1_edits_e_value_and_fasta_path() {
        let params = Params {
            fasta_file: "job.a3m".to_string(),
            ..Default::default()
        };
        let next = advance_params(Stage::HhblitsUniref1, Stage::HhblitsUniref2, params);
        assert_eq!(next.e_value, Some(1e-6));
        assert_eq!(next.fasta_file, "job.a3m.filtered.a3m");
    }

    #[test]
    fn sufficient_uniref_transition_leaves_params_untouched() {
        let params = Params {
            fasta_file: "job.a3m".to_string(),
            e_value: Some(9.0),
            ..Default::default()
        };
        let next = advance_params(Stage::HhblitsUniref1, Stage::Psipred, params.clone());
        assert_eq!(next, params);
    }

    #[test]
    fn signalp6_transition_sets_initial_e_value() {
        let params = Params::default();
        let next = advance_params(Stage::SignalP6, Stage::HhblitsUniref1, params);
        assert_eq!(next.e_value, Some(1e-10));
    }
}
