// SPDX-License-Identifier: MIT

//! Process-tree control (C11): the capability to signal a pid and all of
//! its recursive children.
//!
//! Isolated behind the [`ProcessGroup`] trait per the Design Notes — "the
//! dependency on `ps`-like introspection and signal delivery is a hard OS
//! contract; isolate it behind a capability so unit tests can substitute a
//! fake." [`RunningRegistry`](crate::running_registry::RunningRegistry)
//! and [`crate::monitor`] depend only on this trait, never on `nix`/
//! `sysinfo` directly.
//!
//! Grounded on `original_source/queue_system/queue_running.py`'s
//! `kill_task_process_tree` / `suspend_task_process_tree` /
//! `resume_task_process_tree`: children are always signaled before the
//! parent (so a parent cannot reap a child before it receives the signal).

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use sysinfo::System;
use tracing::warn;

/// Capability to enumerate and signal a process tree (a pid plus all of
/// its recursive descendants).
pub trait ProcessGroup: Send + Sync {
    /// Recursively enumerate the children of `pid` (not including `pid`
    /// itself), in no particular order.
    fn children_of(&self, pid: u32) -> Vec<u32>;

    /// Send `SIGTERM` to `pid`'s process tree, children first.
    fn terminate_tree(&self, pid: u32);

    /// Send `SIGSTOP` to `pid`'s process tree, children first.
    fn stop_tree(&self, pid: u32);

    /// Send `SIGCONT` to `pid`'s process tree, children first.
    fn cont_tree(&self, pid: u32);
}

/// Real [`ProcessGroup`] backed by `sysinfo` (tree enumeration) and `nix`
/// (signal delivery).
pub struct SystemProcessGroup;

impl SystemProcessGroup {
    pub fn new() -> Self {
        SystemProcessGroup
    }

    fn signal_tree(&self, pid: u32, sig: Signal, verb: &str) {
        let children = self.children_of(pid);
        for child in children {
            send_signal(child, sig, verb);
        }
        send_signal(pid, sig, verb);
    }
}

impl Default for SystemProcessGroup {
    fn default() -> Self {
        Self::new()
    }
}

fn send_signal(pid: u32, sig: Signal, verb: &str) {
    match signal::kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) => {}
        Err(nix::errno::Errno::ESRCH) => {
            // Missing process: logged, not fatal, per spec §7.
            warn!(pid, "process already gone while trying to {verb} it");
        }
        Err(e) => {
            warn!(pid, error = %e, "failed to {verb} process");
        }
    }
}

impl ProcessGroup for SystemProcessGroup {
    fn children_of(&self, pid: u32) -> Vec<u32> {
        let mut sys = System::new();
        sys.refresh_processes();
        recursive_children(&sys, pid)
    }

    fn terminate_tree(&self, pid: u32) {
        self.signal_tree(pid, Signal::SIGTERM, "terminate");
    }

    fn stop_tree(&self, pid: u32) {
        self.signal_tree(pid, Signal::SIGSTOP, "stop");
    }

    fn cont_tree(&self, pid: u32) {
        self.signal_tree(pid, Signal::SIGCONT, "resume");
    }
}

/// Walk `sys`'s process table to find every descendant of `root_pid`,
/// breadth-first, using each process's recorded parent pid.
///
/// `pub(crate)` so [`crate::host_probe`]'s real implementation can reuse
/// the same tree walk when summing RSS/IO across a process tree.
pub(crate) fn recursive_children(sys: &System, root_pid: u32) -> Vec<u32> {
    let mut result = Vec::new();
    let mut frontier = vec![root_pid];
    while let Some(parent) = frontier.pop() {
        for (pid, proc_) in sys.processes() {
            let pid_u32 = pid.as_u32();
            if proc_.parent().map(|p| p.as_u32()) == Some(parent) {
                result.push(pid_u32);
                frontier.push(pid_u32);
            }
        }
    }
    result
}

#[cfg(test)]
pub mod fake {
    //! A deterministic, in-memory [`ProcessGroup`] fake for tests, per the
    //! Design Notes: "isolate behind a capability so unit tests can
    //! substitute a fake."

    use super::ProcessGroup;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Signal {
        Term,
        Stop,
        Cont,
    }

    /// Records every signal delivered and every tree relationship, so
    /// tests can assert both "what was signaled" and "in what order".
    #[derive(Default)]
    pub struct FakeProcessGroup {
        children: Mutex<HashMap<u32, Vec<u32>>>,
        pub log: Mutex<Vec<(u32, Signal)>>,
    }

    impl FakeProcessGroup {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_children(&self, pid: u32, children: Vec<u32>) {
            self.children.lock().unwrap().insert(pid, children);
        }

        pub fn signals_for(&self, pid: u32) -> Vec<Signal> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| *p == pid)
                .map(|(_, s)| *s)
                .collect()
        }
    }

    impl ProcessGroup for FakeProcessGroup {
        fn children_of(&self, pid: u32) -> Vec<u32> {
            self.children.lock().unwrap().get(&pid).cloned().unwrap_or_default()
        }

        fn terminate_tree(&self, pid: u32) {
            for child in self.children_of(pid) {
                self.log.lock().unwrap().push((child, Signal::Term));
            }
            self.log.lock().unwrap().push((pid, Signal::Term));
        }

        fn stop_tree(&self, pid: u32) {
            for child in self.children_of(pid) {
                self.log.lock().unwrap().push((child, Signal::Stop));
            }
            self.log.lock().unwrap().push((pid, Signal::Stop));
        }

        fn cont_tree(&self, pid: u32) {
            for child in self.children_of(pid) {
                self.log.lock().unwrap().push((child, Signal::Cont));
            }
            self.log.lock().unwrap().push((pid, Signal::Cont));
        }
    }

    #[test]
    fn children_are_signaled_before_the_parent() {
        let fake = FakeProcessGroup::new();
        fake.set_children(1, vec![2, 3]);
        fake.terminate_tree(1);
        let log = fake.log.lock().unwrap();
        let parent_idx = log.iter().position(|(p, _)| *p == 1).unwrap();
        for (p, _) in log.iter() {
            if *p == 2 || *p == 3 {
                let child_idx = log.iter().position(|(q, _)| q == p).unwrap();
                assert!(child_idx < parent_idx, "child {p} must be signaled before parent");
            }
        }
    }
}
