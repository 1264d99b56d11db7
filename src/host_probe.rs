// SPDX-License-Identifier: MIT

//! Host probe (C7 + C12): stateless samples of host and per-process
//! resource usage.
//!
//! Defined as a trait (Design Notes: isolate the OS contract behind a
//! capability) so the monitor control loop can be driven deterministically
//! in tests. The real implementation is backed by `sysinfo` for CPU/
//! memory/RSS/IO and a direct `/proc/stat` read for iowait (`sysinfo` does
//! not expose it). Grounded on
//! `original_source/queue_system/task_scheduler.py`'s `initialize` /
//! `check_high_io_usage` (`psutil.cpu_count`, `psutil.cpu_percent`,
//! `psutil.virtual_memory`, `psutil.cpu_times_percent(...).iowait`).

use std::fs;
use std::thread;
use std::time::Duration;

use sysinfo::System;
use tracing::warn;

use crate::process_group::recursive_children;

/// An idle core is one sampled below this usage percentage, per spec §4.7.
pub const IDLE_CORE_THRESHOLD_PCT: f32 = 10.0;

pub trait HostProbe: Send + Sync {
    fn physical_core_count(&self) -> usize;

    /// Per-core usage percentage, sampled over `interval`.
    fn per_core_usage_percent(&self, interval: Duration) -> Vec<f32>;

    fn available_memory_gb(&self) -> f64;

    /// Sum of RSS across `pid` and its recursive children, in GB. Returns
    /// `0.0` and logs a warning if the process is missing, per spec §4.7.
    fn process_rss_gb(&self, pid: u32) -> f64;

    /// (read + write) byte delta over `window`, summed across `pid`'s
    /// process tree.
    fn process_io_bytes_per_sec(&self, pid: u32, window: Duration) -> u64;

    /// CPU-time-in-iowait, sampled over `interval`, as a percentage.
    fn iowait_percent(&self, interval: Duration) -> f64;
}

/// Real [`HostProbe`] backed by `sysinfo` + `/proc/stat`.
pub struct SysinfoHostProbe;

impl SysinfoHostProbe {
    pub fn new() -> Self {
        SysinfoHostProbe
    }
}

impl Default for SysinfoHostProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Sum of RSS (bytes) across `pid` and its recursive children.
fn tree_rss_bytes(sys: &System, pid: u32) -> Option<u64> {
    let root = sysinfo::Pid::from_u32(pid);
    let root_proc = sys.process(root)?;
    let mut total = root_proc.memory();
    for child in recursive_children(sys, pid) {
        if let Some(p) = sys.process(sysinfo::Pid::from_u32(child)) {
            total += p.memory();
        }
    }
    Some(total)
}

/// Sum of cumulative (read + write) bytes across `pid` and its recursive
/// children, as reported by `sysinfo`'s per-process disk usage counters.
fn tree_io_bytes(sys: &System, pid: u32) -> Option<u64> {
    let root = sysinfo::Pid::from_u32(pid);
    sys.process(root)?;
    let mut total = 0u64;
    let mut pids = vec![pid];
    pids.extend(recursive_children(sys, pid));
    for p in pids {
        if let Some(proc_) = sys.process(sysinfo::Pid::from_u32(p)) {
            let usage = proc_.disk_usage();
            total += usage.total_read_bytes + usage.total_written_bytes;
        }
    }
    Some(total)
}

/// `(user, nice, system, idle, iowait, irq, softirq, steal)` jiffies from
/// the aggregate `cpu` line of `/proc/stat`.
fn read_proc_stat_cpu_line() -> Option<[u64; 8]> {
    let content = fs::read_to_string("/proc/stat").ok()?;
    let line = content.lines().next()?;
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }
    let mut out = [0u64; 8];
    for slot in out.iter_mut() {
        *slot = fields.next()?.parse().ok()?;
    }
    Some(out)
}

impl HostProbe for SysinfoHostProbe {
    fn physical_core_count(&self) -> usize {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.physical_core_count().unwrap_or_else(|| sys.cpus().len())
    }

    fn per_core_usage_percent(&self, interval: Duration) -> Vec<f32> {
        let mut sys = System::new();
        sys.refresh_cpu();
        thread::sleep(interval);
        sys.refresh_cpu();
        sys.cpus().iter().map(|c| c.cpu_usage()).collect()
    }

    fn available_memory_gb(&self) -> f64 {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.available_memory() as f64 / 1024.0_f64.powi(3)
    }

    fn process_rss_gb(&self, pid: u32) -> f64 {
        let mut sys = System::new();
        sys.refresh_processes();
        match tree_rss_bytes(&sys, pid) {
            Some(bytes) => bytes as f64 / 1024.0_f64.powi(3),
            None => {
                warn!(pid, "process missing while sampling RSS, treating usage as 0");
                0.0
            }
        }
    }

    fn process_io_bytes_per_sec(&self, pid: u32, window: Duration) -> u64 {
        let mut sys = System::new();
        sys.refresh_processes();
        let Some(before) = tree_io_bytes(&sys, pid) else {
            warn!(pid, "process missing while sampling I/O, treating rate as 0");
            return 0;
        };
        thread::sleep(window);
        sys.refresh_processes();
        let after = tree_io_bytes(&sys, pid).unwrap_or(before);
        let secs = window.as_secs_f64().max(1e-6);
        ((after.saturating_sub(before)) as f64 / secs) as u64
    }

    fn iowait_percent(&self, interval: Duration) -> f64 {
        let Some(before) = read_proc_stat_cpu_line() else {
            return 0.0;
        };
        thread::sleep(interval);
        let Some(after) = read_proc_stat_cpu_line() else {
            return 0.0;
        };
        let total_before: u64 = before.iter().sum();
        let total_after: u64 = after.iter().sum();
        let total_delta = total_after.saturating_sub(total_before);
        if total_delta == 0 {
            return 0.0;
        }
        let iowait_delta = after[4].saturating_sub(before[4]);
        iowait_delta as f64 / total_delta as f64 * 100.0
    }
}
