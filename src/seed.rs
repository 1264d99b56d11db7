// SPDX-License-Identifier: MIT

//! Task seeding (C14): read per-job YAML descriptors under
//! `input_config_path`, compute sequence lengths, and push freshly-created
//! tasks into the ready queue.
//!
//! Grounded on `original_source/scripts/initialize_queue.py`
//! (`initialize_queue`) for the directory walk and descriptor shape, and
//! `scripts/utilities.py`'s `get_fasta_seq_len` for the length calculation.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::{bucket_index, Config};
use crate::ready_queue::ReadyQueue;
use crate::task::{Params, Stage, Task};

#[derive(Debug, Deserialize)]
struct JobDescriptor {
    job_name: Option<String>,
    #[serde(default)]
    protein_inputs: HashMap<String, ProteinInput>,
}

#[derive(Debug, Deserialize)]
struct ProteinInput {
    fasta_file: String,
}

/// Walk every `*.yaml` file directly under `config.input_config_path`,
/// create one `Task` per protein input, and push it onto `ready`. Returns
/// the number of tasks seeded.
pub fn seed_from_directory(config: &Config, ready: &ReadyQueue) -> Result<usize> {
    let mut job_count = 0usize;
    let mut seeded = 0usize;

    let entries = std::fs::read_dir(&config.input_config_path).with_context(|| {
        format!(
            "input configuration path '{}' not found",
            config.input_config_path.display()
        )
    })?;

    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        job_count += 1;

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading job descriptor '{}'", path.display()))?;
        let descriptor: JobDescriptor = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing job descriptor '{}'", path.display()))?;

        let job_name = descriptor.job_name.unwrap_or_else(|| {
            let fallback = format!("Job_{job_count}");
            warn!(file = %path.display(), job_name = %fallback, "no job_name specified, using default");
            fallback
        });

        info!(job_name = %job_name, count = descriptor.protein_inputs.len(), "found protein inputs");

        for (protein_index, input) in &descriptor.protein_inputs {
            let task = seed_one_task(config, &job_name, protein_index, &input.fasta_file)?;
            ready.add(task);
            seeded += 1;
        }
    }

    Ok(seeded)
}

fn seed_one_task(
    config: &Config,
    job_name: &str,
    protein_index: &str,
    fasta_file: &str,
) -> Result<Task> {
    let fasta_path = Path::new(fasta_file);
    if !fasta_path.exists() {
        bail!("fasta file '{fasta_file}' not found");
    }
    let seq_len = fasta_seq_len(fasta_path)?;

    let output_dir = config.output_path.join(job_name).join(protein_index);
    let params = Params {
        job_name: job_name.to_string(),
        output_dir: output_dir.display().to_string(),
        fasta_file: fasta_file.to_string(),
        e_value: None,
        extra: HashMap::new(),
    };

    let mut task = Task::new(seq_len as u32, params);
    let bucket = bucket_index(task.seq_len);
    task.cpu_reserved = *config.job_core_num.get(&Stage::SignalP6).unwrap_or(&1);
    task.mem_reserved_gb = config
        .job_mem_num
        .get(&Stage::SignalP6)
        .map(|table| table[bucket])
        .unwrap_or(0.0);
    Ok(task)
}

/// Concatenate every non-header (`>`-prefixed) line of a FASTA file and
/// return the total residue count.
fn fasta_seq_len(path: &Path) -> Result<usize> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading fasta file '{}'", path.display()))?;
    let len = content
        .lines()
        .filter(|line| !line.starts_with('>'))
        .map(|line| line.trim().len())
        .sum();
    Ok(len)
}
