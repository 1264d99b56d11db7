// SPDX-License-Identifier: MIT

//! Resource-aware multi-stage pipeline scheduler.
//!
//! See `SPEC_FULL.md` for the module map; each `pub mod` below corresponds
//! to one of its components.

pub mod config;
pub mod error;
pub mod finished_queue;
pub mod heap_entry;
pub mod host_probe;
pub mod monitor;
pub mod priority;
pub mod process_group;
pub mod ready_queue;
pub mod running_registry;
pub mod seed;
pub mod stage;
pub mod task;
