// SPDX-License-Identifier: MIT

//! CLI entry point (C9): parse arguments, load configuration, seed the
//! ready queue, and run the scheduler monitor to completion.
//!
//! Grounded on `original_source/queue_system/main.py`'s option surface and
//! `merge_params`/`validate_params` flow, expressed with `clap`'s derive
//! API per the teacher's CLI style.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use foldqueue::config::{CliOverrides, Config, ResourceSetting};
use foldqueue::error::EXIT_CONFIG_ERROR;
use foldqueue::host_probe::SysinfoHostProbe;
use foldqueue::monitor::{Scheduler, SchedulerMonitor};
use foldqueue::process_group::SystemProcessGroup;
use foldqueue::ready_queue::ReadyQueue;
use foldqueue::seed;
use foldqueue::stage::{ExternalStageLauncher, StageLauncher};
use foldqueue::task::Stage;

#[derive(Parser, Debug)]
#[command(name = "foldqueue", about = "Resource-aware protein-pipeline task scheduler")]
struct Cli {
    /// Directory of per-job YAML input descriptors.
    #[arg(short = 'i', long)]
    input_config_path: Option<String>,

    /// Directory stage outputs are written under.
    #[arg(short = 'o', long)]
    output_path: Option<String>,

    /// Scheduler configuration file.
    #[arg(short = 'f', long, default_value = "configuration.yaml")]
    config: PathBuf,

    /// Total cores to budget, or "auto" to use the host's physical count.
    #[arg(short = 'k', long)]
    total_core_num: Option<String>,

    /// Total memory (GB) to budget, or "auto" to use available host memory.
    #[arg(short = 'e', long)]
    total_mem_num: Option<String>,

    /// Memory (GB) held back from the budget as headroom.
    #[arg(short = 'b', long)]
    mem_buffer: Option<u32>,

    /// iowait percentage above which a high-I/O task is suspended.
    #[arg(short = 'a', long)]
    wait_time_max: Option<f64>,

    /// iowait percentage below which a suspended task is resumed.
    #[arg(short = 'd', long)]
    wait_time_mid: Option<f64>,
}

fn parse_resource_setting(raw: &str) -> Option<ResourceSetting> {
    if raw.eq_ignore_ascii_case("auto") {
        Some(ResourceSetting::Auto)
    } else {
        raw.parse::<f64>().ok().map(ResourceSetting::Value)
    }
}

impl Cli {
    fn into_overrides(self) -> CliOverrides {
        CliOverrides {
            input_config_path: self.input_config_path,
            output_path: self.output_path,
            total_core_num: self.total_core_num.as_deref().and_then(parse_resource_setting),
            total_mem_num: self.total_mem_num.as_deref().and_then(parse_resource_setting),
            mem_buffer: self.mem_buffer,
            wait_time_max: self.wait_time_max,
            wait_time_mid: self.wait_time_mid,
            job_core_num_json: None,
            job_mem_num_json: None,
        }
    }
}

/// One placeholder shell command per stage, substituting `{fasta_file}` and
/// `{output_dir}`. The concrete pipeline binaries are out of scope; this
/// wires up the contract `ExternalStageLauncher` expects.
fn default_stage_commands() -> std::collections::HashMap<Stage, Vec<String>> {
    let mut commands = std::collections::HashMap::new();
    for stage in Stage::ALL {
        commands.insert(
            stage,
            vec![
                "run_stage".to_string(),
                stage.config_key().to_string(),
                "{fasta_file}".to_string(),
                "{output_dir}".to_string(),
            ],
        );
    }
    commands
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone();
    let overrides = cli.into_overrides();

    let config = match Config::load(&config_path, &overrides) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::from(EXIT_CONFIG_ERROR as u8);
        }
    };

    let ready = Arc::new(ReadyQueue::new());
    match seed::seed_from_directory(&config, &ready) {
        Ok(count) => info!(count, "seeded tasks from input config path"),
        Err(e) => {
            error!(error = %e, "failed to seed tasks");
            return ExitCode::from(EXIT_CONFIG_ERROR as u8);
        }
    }

    let process_group = Arc::new(SystemProcessGroup::new());
    let host_probe = Arc::new(SysinfoHostProbe::new());
    let stage_launcher: Arc<dyn StageLauncher> =
        Arc::new(ExternalStageLauncher::new(default_stage_commands()));

    let scheduler = Scheduler::new(&config, ready, process_group, host_probe, stage_launcher);
    let monitor = SchedulerMonitor::new(scheduler);

    match monitor.run() {
        Ok(reason) => {
            info!(?reason, "scheduler terminated normally");
            ExitCode::SUCCESS
        }
        Err(fatal) => {
            error!(error = %fatal, "scheduler terminated abnormally");
            ExitCode::from(fatal.exit_code() as u8)
        }
    }
}
