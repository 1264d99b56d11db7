// SPDX-License-Identifier: MIT

//! Structured error types for the scheduler core.
//!
//! Three error enums model the three failure layers, mirroring the
//! teacher's split between a low-level, data-bearing reason and a
//! top-level failure:
//!
//! * [`InvalidQueueKind`] — a programmer/config error: an unrecognised
//!   queue-kind string reached the priority calculator.
//! * [`ConfigError`] — a startup-time configuration problem.
//! * [`SchedulerFatal`] — one of the two conditions under which the
//!   monitor control loop aborts instead of terminating normally.

use thiserror::Error;

/// An unrecognised queue-kind label reached [`crate::priority::calculate_priority`].
///
/// Every caller inside this crate passes a [`crate::priority::QueueKind`]
/// constructed from a closed enum, so this can only be raised by the
/// `&str`-keyed lookup used when parsing CLI/config input — a malformed
/// config is the only way to trigger it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid queue-kind: '{0}'")]
pub struct InvalidQueueKind(pub String);

/// Startup-time configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file '{path}': {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML configuration '{path}': {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("missing required configuration key(s): {0}")]
    MissingKeys(String),

    #[error("job_mem_num table for stage '{stage}' has {got} bucket(s), expected 12")]
    BadBucketTable { stage: String, got: usize },
}

/// The two conditions under which [`crate::monitor::SchedulerMonitor::run`]
/// aborts rather than terminating normally (spec §4.8 termination
/// condition (c), and an unrecoverable admission stall).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchedulerFatal {
    /// Running registry empty, ready queue non-empty, and admission has
    /// failed 10 consecutive times in a row — termination condition (b).
    #[error(
        "gave up after {attempts} consecutive failed admission attempts \
         with {ready_len} task(s) still ready and nothing running"
    )]
    GiveUp { attempts: u32, ready_len: usize },

    /// Memory is still negative after 10 kill attempts — termination
    /// condition (c).
    #[error(
        "memory still over budget ({mem_left_gb:.2} GB) after {kills} kill attempt(s)"
    )]
    MemoryExhausted { mem_left_gb: f64, kills: u32 },
}

impl SchedulerFatal {
    /// Process exit code for this failure, per SPEC_FULL §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            SchedulerFatal::GiveUp { .. } => 1,
            SchedulerFatal::MemoryExhausted { .. } => 2,
        }
    }
}

/// `EX_CONFIG`-equivalent exit code used for [`ConfigError`] at startup.
pub const EXIT_CONFIG_ERROR: i32 = 78;
