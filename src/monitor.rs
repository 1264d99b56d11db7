// SPDX-License-Identifier: MIT

//! Scheduler monitor (C8): the control loop that drives admission,
//! memory/I/O pressure response, and stage completion hand-off.
//!
//! Grounded on `original_source/queue_system/task_scheduler.py`'s
//! `TaskScheduler.initialize`/`monitor` for the loop's exact structure and
//! ordering (excess check, memory kill loop, iowait suspend/resume,
//! finished-queue collection, admission attempt), reimplemented over the
//! [`HostProbe`]/[`ProcessGroup`]/[`StageLauncher`] capabilities instead of
//! direct `psutil` calls, per the Design Notes' "process-wide singletons"
//! re-architecture: a single [`Scheduler`] value owns C3-C5 plus the
//! credit counters, instead of module-level globals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{bucket_index, Config, LENGTH_BUCKET_COUNT};
use crate::error::SchedulerFatal;
use crate::finished_queue::FinishedQueue;
use crate::host_probe::HostProbe;
use crate::process_group::ProcessGroup;
use crate::ready_queue::ReadyQueue;
use crate::running_registry::RunningRegistry;
use crate::stage::{StageLauncher, StageOutcome};
use crate::task::Stage;

/// Consecutive failed admission attempts (with an empty running registry
/// and a non-empty ready queue) tolerated before give-up termination.
const GIVE_UP_AFTER_ATTEMPTS: u32 = 10;

/// Consecutive kills tolerated in one memory-pressure response before
/// fatal-memory termination.
const KILL_ATTEMPTS_MAX: u32 = 10;

/// Number of 1-second iowait samples averaged per control-loop iteration.
const IOWAIT_SAMPLE_COUNT: u32 = 5;
const IOWAIT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// One core is always reserved for the monitor process itself.
const RESERVED_MONITOR_CORES: i64 = 1;

/// How the monitor's control loop terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Ready and running queues both drained normally.
    Normal,
}

/// Owns the ready queue, running registry, finished queue, and the
/// resource credit counters — the re-architected replacement for the
/// source's module-level singletons.
pub struct Scheduler {
    ready: Arc<ReadyQueue>,
    running: Arc<RunningRegistry>,
    finished: Arc<FinishedQueue>,
    stage_launcher: Arc<dyn StageLauncher>,
    host_probe: Arc<dyn HostProbe>,

    /// Reservation-based credit counter: debited on admission, credited
    /// back when a task is drained from `finished`. Distinct from
    /// `total_mem_gb`/live usage below — see the Design Notes' "memory
    /// accounting duality".
    available_cores: Mutex<i64>,
    /// Fixed ceiling; the *live* figure subtracted from it every iteration
    /// is `running.total_memory_usage()`, not a credit counter.
    total_mem_gb: f64,

    wait_time_max: f64,
    wait_time_mid: f64,

    job_core_num: HashMap<Stage, u32>,
    job_mem_num: HashMap<Stage, [f64; LENGTH_BUCKET_COUNT]>,
}

impl Scheduler {
    pub fn new(
        config: &Config,
        ready: Arc<ReadyQueue>,
        process_group: Arc<dyn ProcessGroup>,
        host_probe: Arc<dyn HostProbe>,
        stage_launcher: Arc<dyn StageLauncher>,
    ) -> Self {
        let finished = Arc::new(FinishedQueue::new());
        let running = Arc::new(RunningRegistry::new(
            process_group,
            host_probe.clone(),
            stage_launcher.clone(),
            finished.clone(),
            ready.clone(),
        ));

        let core_ceiling = host_probe.physical_core_count() as f64;
        let total_cores =
            (config.total_core_num.resolve(core_ceiling) as i64 - RESERVED_MONITOR_CORES).max(0);

        let mem_ceiling = host_probe.available_memory_gb();
        let total_mem_gb = config.total_mem_num.resolve(mem_ceiling) - config.mem_buffer as f64;

        info!(total_cores, total_mem_gb, "scheduler resource budget resolved");

        Scheduler {
            ready,
            running,
            finished,
            stage_launcher,
            host_probe,
            available_cores: Mutex::new(total_cores),
            total_mem_gb,
            wait_time_max: config.wait_time_max,
            wait_time_mid: config.wait_time_mid,
            job_core_num: config.job_core_num.clone(),
            job_mem_num: config.job_mem_num.clone(),
        }
    }

    fn credit_cores(&self, amount: i64) {
        *self.available_cores.lock().unwrap() += amount;
    }

    fn available_cores(&self) -> i64 {
        *self.available_cores.lock().unwrap()
    }
}

/// Drives a [`Scheduler`] through its control loop to completion.
pub struct SchedulerMonitor {
    scheduler: Scheduler,
}

impl SchedulerMonitor {
    pub fn new(scheduler: Scheduler) -> Self {
        SchedulerMonitor { scheduler }
    }

    /// Run the control loop to termination. Returns `Ok` on a clean drain,
    /// `Err` on give-up or fatal-memory termination (spec §8's conditions
    /// (b) and (c)); condition (a) is [`ExitReason::Normal`].
    pub fn run(&self) -> Result<ExitReason, SchedulerFatal> {
        let s = &self.scheduler;

        if s.ready.is_empty() {
            info!("ready queue is empty at startup, nothing to schedule");
            return Ok(ExitReason::Normal);
        }

        let mut allocate_try_times: u32 = 0;

        loop {
            if s.running.is_empty() {
                if s.ready.is_empty() {
                    info!("all tasks completed");
                    return Ok(ExitReason::Normal);
                } else if allocate_try_times > GIVE_UP_AFTER_ATTEMPTS {
                    warn!(allocate_try_times, "giving up: no progress with tasks still ready");
                    return Err(SchedulerFatal::GiveUp {
                        attempts: allocate_try_times,
                        ready_len: s.ready.len(),
                    });
                }
            }

            self.poll_running();

            s.running.check_excess_and_move();

            let mut memory_left = s.total_mem_gb - s.running.total_memory_usage();
            if memory_left < 0.0 {
                memory_left = self.kill_until_memory_recovers(memory_left)?;
            }

            self.respond_to_io_pressure();

            while let Some(task) = s.finished.get() {
                s.credit_cores(task.cpu_reserved as i64);
            }

            if s.available_cores() > 0 && memory_left > 0.0 {
                if self.try_admit_one(memory_left) {
                    allocate_try_times = 0;
                } else {
                    allocate_try_times += 1;
                }
            } else {
                allocate_try_times += 1;
            }
        }
    }

    /// Check every task in `normal` and `excess` for stage completion and
    /// perform the §4.6 hand-off (credit the old reservation via
    /// `finished`, then re-enqueue with the new stage's reservation via
    /// `ready`) for any that have finished. `excess` tasks are still
    /// running child processes (just over their memory reservation), so
    /// they can complete a stage exactly like a `normal` task; only
    /// `suspended` tasks are SIGSTOP-ed and cannot.
    fn poll_running(&self) {
        let s = &self.scheduler;
        let mut tasks = s.running.normal_snapshot();
        tasks.extend(s.running.excess_snapshot());
        for task in tasks {
            let Some(pid) = task.pid else { continue };
            match s.stage_launcher.poll(&task) {
                StageOutcome::Running(_) => {}
                StageOutcome::Terminal => {
                    if let Some(done) = s.running.finish(pid) {
                        info!(stage = %done.stage, pid, "task completed final stage");
                        s.finished.put(done);
                    }
                }
                StageOutcome::Next { stage, params } => {
                    let Some(mut done) = s.running.finish(pid) else { continue };
                    info!(from = %done.stage, to = %stage, pid, "task advancing to next stage");
                    s.finished.put(done.clone());
                    done.stage = stage;
                    done.params = params;
                    done.pid = None;
                    let bucket = bucket_index(done.seq_len);
                    done.cpu_reserved = s.job_core_num.get(&stage).copied().unwrap_or(1);
                    done.mem_reserved_gb =
                        s.job_mem_num.get(&stage).map(|table| table[bucket]).unwrap_or(0.0);
                    s.ready.add(done);
                }
            }
        }
    }

    fn kill_until_memory_recovers(&self, mut memory_left: f64) -> Result<f64, SchedulerFatal> {
        let s = &self.scheduler;
        let mut kills = 0u32;
        while memory_left < 0.0 && kills < KILL_ATTEMPTS_MAX {
            if !s.running.kill_one() {
                break;
            }
            kills += 1;
            memory_left = s.total_mem_gb - s.running.total_memory_usage();
        }
        if memory_left < 0.0 {
            return Err(SchedulerFatal::MemoryExhausted { mem_left_gb: memory_left, kills });
        }
        Ok(memory_left)
    }

    fn respond_to_io_pressure(&self) {
        let s = &self.scheduler;
        let wa = mean_iowait(s.host_probe.as_ref());
        if wa >= s.wait_time_max {
            if let Some(task) = s.running.highest_io_task() {
                if let Some(pid) = task.pid {
                    s.running.suspend(pid);
                }
            }
        } else if wa < s.wait_time_mid {
            if let Some(pid) = s.running.suspended_head_pid() {
                s.running.resume(pid);
            }
        }
    }

    /// Pop one task from ready and attempt to admit it against both
    /// resources: `need_c` against the reservation-based core credit, and
    /// `need_m` against `memory_left` (the live figure the caller computed
    /// this iteration). Returns `true` iff a task was launched; on
    /// insufficient resources or launch failure the task is put back onto
    /// ready and `false` is returned.
    fn try_admit_one(&self, memory_left: f64) -> bool {
        let s = &self.scheduler;
        let Some((_, task)) = s.ready.pop() else {
            return false;
        };
        let need_c = task.cpu_reserved as i64;
        let need_m = task.mem_reserved_gb;
        if need_c > s.available_cores() || need_m > memory_left {
            s.ready.add(task);
            return false;
        }
        s.credit_cores(-need_c);
        match s.running.admit_normal(task) {
            Ok(_) => true,
            Err((task, e)) => {
                warn!(error = %e, stage = %task.stage, "failed to launch stage, re-queueing");
                s.credit_cores(need_c);
                s.ready.add(task);
                false
            }
        }
    }
}

fn mean_iowait(probe: &dyn HostProbe) -> f64 {
    let mut total = 0.0;
    for _ in 0..IOWAIT_SAMPLE_COUNT {
        total += probe.iowait_percent(IOWAIT_SAMPLE_INTERVAL);
    }
    total / IOWAIT_SAMPLE_COUNT as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliOverrides;
    use crate::host_probe::fake::FakeHostProbe;
    use crate::process_group::fake::FakeProcessGroup;
    use crate::stage::fake::FakeStageLauncher;
    use crate::task::{Params, Task};
    use std::io::Write;

    fn config_with(yaml: &str) -> Config {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
        Config::load(f.path(), &CliOverrides::default()).unwrap()
    }

    const BASE_YAML: &str = r#"
input_config_path: "./jobs"
output_path: "./out"
total_core_num: 8
total_mem_num: 32
mem_buffer: 10
job_core_num:
  signalp6: 2
  hhblits_uniref_1: 4
  hhblits_uniref_2: 5
job_mem_num:
  signalp6: [2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 8, 16]
  hhblits_uniref_1: [4, 4, 6, 6, 8, 8, 10, 10, 12, 12, 16, 32]
  hhblits_uniref_2: [5, 5, 7, 7, 9, 9, 11, 11, 13, 13, 17, 33]
"#;

    fn task(seq_len: u32, mem_gb: f64) -> Task {
        let mut t = Task::new(seq_len, Params::default());
        t.cpu_reserved = 1;
        t.mem_reserved_gb = mem_gb;
        t
    }

    fn harness(
        config_yaml: &str,
    ) -> (Scheduler, Arc<ReadyQueue>, Arc<FakeProcessGroup>, Arc<FakeHostProbe>, Arc<FakeStageLauncher>)
    {
        let config = config_with(config_yaml);
        let ready = Arc::new(ReadyQueue::new());
        let pg = Arc::new(FakeProcessGroup::new());
        let probe = Arc::new(FakeHostProbe::new(8, 32.0));
        let launcher = Arc::new(FakeStageLauncher::new(1000));
        let scheduler = Scheduler::new(&config, ready.clone(), pg.clone(), probe.clone(), launcher.clone());
        (scheduler, ready, pg, probe, launcher)
    }

    #[test]
    fn empty_ready_queue_terminates_immediately() {
        let (scheduler, _, _, _, _) = harness(BASE_YAML);
        let monitor = SchedulerMonitor::new(scheduler);
        assert_eq!(monitor.run(), Ok(ExitReason::Normal));
    }

    #[test]
    fn clean_drain_runs_a_single_task_through_every_stage() {
        let (scheduler, ready, _, _, launcher) = harness(BASE_YAML);
        let mut task = Task::new(250, Params { fasta_file: "a.fasta".into(), output_dir: "out".into(), ..Default::default() });
        task.cpu_reserved = 2;
        task.mem_reserved_gb = 4.0;
        ready.add(task);

        // Script every stage's launcher pid to complete on the very next
        // poll, ending at Terminal after hhsearch. Since FakeStageLauncher
        // assigns pids sequentially starting at 1000, the single task
        // gets pid 1000, 1001, ... across each stage re-admission.
        for (i, stage) in Stage::ALL.iter().enumerate() {
            let pid = 1000 + i as u32;
            let outcome = match Stage::ALL.get(i + 1) {
                Some(&next) if *stage != Stage::Hhsearch => {
                    StageOutcome::Next { stage: next, params: Params::default() }
                }
                _ => StageOutcome::Terminal,
            };
            launcher.set_outcome(pid, outcome);
        }

        let monitor = SchedulerMonitor::new(scheduler);
        let result = monitor.run();
        assert_eq!(result, Ok(ExitReason::Normal));
    }

    #[test]
    fn admission_is_blocked_when_reservation_exceeds_total_cores() {
        let (scheduler, ready, _, _, _) = harness(BASE_YAML);
        let mut task = Task::new(100, Params::default());
        task.cpu_reserved = 999; // far more cores than total_core_num - 1
        ready.add(task);

        let monitor = SchedulerMonitor::new(scheduler);
        let err = monitor.run().unwrap_err();
        assert!(matches!(err, SchedulerFatal::GiveUp { .. }));
    }

    #[test]
    fn memory_overrun_kills_a_task_and_continues() {
        let (scheduler, ready, pg, probe, launcher) = harness(BASE_YAML);
        let mut task = Task::new(100, Params::default());
        task.cpu_reserved = 1;
        task.mem_reserved_gb = 1.0;
        ready.add(task);

        // The first admission gets pid 1000; its RSS blows past the 22 GB
        // effective budget (32 available - 10 buffer), forcing a kill. The
        // kill re-admits the same task under a fresh pid (1001), scripted
        // to finish immediately so the run can terminate.
        probe.set_rss(1000, 40.0);
        launcher.set_outcome(1001, StageOutcome::Terminal);

        let monitor = SchedulerMonitor::new(scheduler);
        let result = monitor.run();
        assert_eq!(result, Ok(ExitReason::Normal));
        assert!(pg.signals_for(1000).contains(&crate::process_group::fake::Signal::Term));
    }

    /// A task whose `mem_reserved_gb` exceeds the live `memory_left` must
    /// never be admitted, even with cores to spare — admission is gated on
    /// both resources, not cores alone.
    #[test]
    fn admission_is_blocked_when_task_memory_exceeds_live_budget() {
        let (scheduler, ready, _, _, _) = harness(BASE_YAML);
        let mut task = Task::new(100, Params::default());
        task.cpu_reserved = 1; // plenty of cores available
        task.mem_reserved_gb = 100.0; // far more than the 22 GB effective budget
        ready.add(task);

        let monitor = SchedulerMonitor::new(scheduler);
        let err = monitor.run().unwrap_err();
        assert!(matches!(err, SchedulerFatal::GiveUp { .. }));
    }

    /// A task moved to `excess` (over its memory reservation, but still
    /// running) must still be polled for stage completion and drained —
    /// otherwise it never leaves `running` and condition (a) termination
    /// can never be reached.
    #[test]
    fn excess_task_completion_is_polled_and_drained() {
        let (scheduler, _, _, probe, launcher) = harness(BASE_YAML);
        let monitor = SchedulerMonitor::new(scheduler);

        let pid = monitor.scheduler.running.admit_normal(task(1, 1.0)).unwrap();
        probe.set_rss(pid, 999.0);
        monitor.scheduler.running.check_excess_and_move();
        launcher.set_outcome(pid, StageOutcome::Terminal);

        monitor.poll_running();

        assert!(monitor.scheduler.running.is_empty());
        assert_eq!(monitor.scheduler.finished.len(), 1);
    }

    /// Spec scenario 4: the highest-I/O task in `normal` is suspended once
    /// mean iowait crosses `wait_time_max`, and resumed once it drops below
    /// `wait_time_mid`.
    #[test]
    fn io_pressure_suspends_highest_io_task_then_resumes_on_drop() {
        use crate::process_group::fake::Signal;

        let (scheduler, _, pg, probe, _) = harness(BASE_YAML);
        let monitor = SchedulerMonitor::new(scheduler);

        let low_io = monitor.scheduler.running.admit_normal(task(1, 1.0)).unwrap();
        let high_io = monitor.scheduler.running.admit_normal(task(1, 1.0)).unwrap();
        probe.set_io(low_io, 100);
        probe.set_io(high_io, 9000);

        for _ in 0..IOWAIT_SAMPLE_COUNT {
            probe.push_iowait_sample(12.0);
        }
        monitor.respond_to_io_pressure();
        assert_eq!(pg.signals_for(high_io), vec![Signal::Stop]);
        assert!(pg.signals_for(low_io).is_empty());

        for _ in 0..IOWAIT_SAMPLE_COUNT {
            probe.push_iowait_sample(4.0);
        }
        monitor.respond_to_io_pressure();
        assert_eq!(pg.signals_for(high_io), vec![Signal::Stop, Signal::Cont]);
    }

    /// Spec scenario 6: an `hhblits_uniref_1` task reporting "insufficient"
    /// advances to `hhblits_uniref_2` with the e-value/fasta-path edits
    /// applied and its reservation recomputed under the new stage's table.
    #[test]
    fn poll_running_advances_task_on_insufficient_msa_and_recomputes_reservation() {
        let (scheduler, _, _, _, launcher) = harness(BASE_YAML);
        let monitor = SchedulerMonitor::new(scheduler);

        let mut running_task = Task::new(250, Params { fasta_file: "job.a3m".into(), ..Default::default() });
        running_task.stage = Stage::HhblitsUniref1;
        running_task.cpu_reserved = 4;
        running_task.mem_reserved_gb = 8.0;
        let pid = monitor.scheduler.running.admit_normal(running_task).unwrap();

        let edited_params = crate::stage::advance_params(
            Stage::HhblitsUniref1,
            Stage::HhblitsUniref2,
            Params { fasta_file: "job.a3m".into(), ..Default::default() },
        );
        launcher.set_outcome(pid, StageOutcome::Next { stage: Stage::HhblitsUniref2, params: edited_params });

        monitor.poll_running();

        let (stage, next_task) = monitor.scheduler.ready.pop().unwrap();
        assert_eq!(stage, Stage::HhblitsUniref2);
        assert_eq!(next_task.params.e_value, Some(1e-6));
        assert_eq!(next_task.params.fasta_file, "job.a3m.filtered.a3m");
        assert_eq!(next_task.cpu_reserved, 5);
        assert!(monitor.scheduler.running.is_empty());
    }
}
