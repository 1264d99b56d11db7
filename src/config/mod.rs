// SPDX-License-Identifier: MIT

//! Config loader (C10): YAML configuration plus CLI-override merge.
//!
//! Grounded on `timpani-o/src/config/mod.rs`'s private-YAML-shape /
//! public-validated-struct split (`NodeConfigFile` / `NodeConfig`) and on
//! `original_source/queue_system/main.py`'s `merge_params` /
//! `validate_params` for the override-merge and required-key semantics.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::task::Stage;

/// A config value that is either a concrete number or the literal string
/// `"auto"`, mirroring `total_core_num`/`total_mem_num`'s dual YAML shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResourceSetting {
    Auto,
    Value(f64),
}

impl ResourceSetting {
    /// Resolve against a host-measured ceiling: `Auto` takes the ceiling,
    /// `Value` takes the smaller of itself and the ceiling (the user may
    /// only ask for less than the host has, never more).
    pub fn resolve(self, host_ceiling: f64) -> f64 {
        match self {
            ResourceSetting::Auto => host_ceiling,
            ResourceSetting::Value(v) => v.min(host_ceiling),
        }
    }
}

impl<'de> Deserialize<'de> for ResourceSetting {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f64),
            Text(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(ResourceSetting::Value(n)),
            Repr::Text(s) if s.eq_ignore_ascii_case("auto") => Ok(ResourceSetting::Auto),
            Repr::Text(s) => Err(serde::de::Error::custom(format!(
                "expected a number or \"auto\", got \"{s}\""
            ))),
        }
    }
}

/// Private YAML-shape struct, mirroring `NodeConfigFile`: every field
/// optional except the genuinely required ones, so a CLI-only invocation
/// (no matching YAML key) doesn't trip deserialization.
#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    input_config_path: Option<String>,
    output_path: Option<String>,
    total_core_num: Option<ResourceSetting>,
    total_mem_num: Option<ResourceSetting>,
    #[serde(default)]
    mem_buffer: Option<u32>,
    #[serde(default)]
    wait_time_max: Option<f64>,
    #[serde(default)]
    wait_time_mid: Option<f64>,
    #[serde(default)]
    job_core_num: HashMap<String, u32>,
    #[serde(default)]
    job_mem_num: HashMap<String, Vec<f64>>,
}

const DEFAULT_MEM_BUFFER_GB: u32 = 10;
const DEFAULT_WAIT_TIME_MAX_PCT: f64 = 10.0;
const DEFAULT_WAIT_TIME_MID_PCT: f64 = 5.0;

/// Number of length buckets every stage's `job_mem_num` table must carry,
/// per spec §6's `[0,100), [100,200), …, [1000,2000), [2000,∞)` table.
pub const LENGTH_BUCKET_COUNT: usize = 12;

/// Validated, fully-typed scheduler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub input_config_path: PathBuf,
    pub output_path: PathBuf,
    pub total_core_num: ResourceSetting,
    pub total_mem_num: ResourceSetting,
    pub mem_buffer: u32,
    pub wait_time_max: f64,
    pub wait_time_mid: f64,
    pub job_core_num: HashMap<Stage, u32>,
    pub job_mem_num: HashMap<Stage, [f64; LENGTH_BUCKET_COUNT]>,
}

/// CLI-supplied overrides, all optional: present values win over the YAML
/// file, matching `main.py`'s "drop `None`s, then merge" behavior.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub input_config_path: Option<String>,
    pub output_path: Option<String>,
    pub total_core_num: Option<ResourceSetting>,
    pub total_mem_num: Option<ResourceSetting>,
    pub mem_buffer: Option<u32>,
    pub wait_time_max: Option<f64>,
    pub wait_time_mid: Option<f64>,
    /// JSON/YAML-object text for `job_core_num`, e.g. `{"signalp6": 1}`.
    pub job_core_num_json: Option<String>,
    /// JSON/YAML-object text for `job_mem_num`.
    pub job_mem_num_json: Option<String>,
}

impl Config {
    /// Load `path`, merge `overrides` on top, and validate the result.
    pub fn load(path: &Path, overrides: &CliOverrides) -> Result<Config, ConfigError> {
        info!(path = %path.display(), "loading configuration");
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        let mut raw: RawConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Malformed {
                path: path.display().to_string(),
                source,
            })?;
        apply_overrides(&mut raw, overrides)?;
        validate(raw)
    }
}

fn apply_overrides(raw: &mut RawConfig, overrides: &CliOverrides) -> Result<(), ConfigError> {
    if let Some(v) = &overrides.input_config_path {
        raw.input_config_path = Some(v.clone());
    }
    if let Some(v) = &overrides.output_path {
        raw.output_path = Some(v.clone());
    }
    if let Some(v) = overrides.total_core_num {
        raw.total_core_num = Some(v);
    }
    if let Some(v) = overrides.total_mem_num {
        raw.total_mem_num = Some(v);
    }
    if let Some(v) = overrides.mem_buffer {
        raw.mem_buffer = Some(v);
    }
    if let Some(v) = overrides.wait_time_max {
        raw.wait_time_max = Some(v);
    }
    if let Some(v) = overrides.wait_time_mid {
        raw.wait_time_mid = Some(v);
    }
    if let Some(text) = &overrides.job_core_num_json {
        let parsed: HashMap<String, u32> =
            serde_yaml::from_str(text).map_err(|source| ConfigError::Malformed {
                path: "--job-core-num".to_string(),
                source,
            })?;
        raw.job_core_num = parsed;
    }
    if let Some(text) = &overrides.job_mem_num_json {
        let parsed: HashMap<String, Vec<f64>> =
            serde_yaml::from_str(text).map_err(|source| ConfigError::Malformed {
                path: "--job-mem-num".to_string(),
                source,
            })?;
        raw.job_mem_num = parsed;
    }
    Ok(())
}

fn validate(raw: RawConfig) -> Result<Config, ConfigError> {
    let mut missing = Vec::new();
    if raw.input_config_path.is_none() {
        missing.push("input_config_path");
    }
    if raw.output_path.is_none() {
        missing.push("output_path");
    }
    if raw.job_core_num.is_empty() {
        missing.push("job_core_num");
    }
    if raw.job_mem_num.is_empty() {
        missing.push("job_mem_num");
    }
    if !missing.is_empty() {
        return Err(ConfigError::MissingKeys(missing.join(", ")));
    }

    let mut job_core_num = HashMap::new();
    for (key, cores) in &raw.job_core_num {
        if let Some(stage) = Stage::from_config_key(key) {
            job_core_num.insert(stage, *cores);
        } else {
            debug!(key, "ignoring unknown stage key in job_core_num");
        }
    }

    let mut job_mem_num = HashMap::new();
    for (key, buckets) in &raw.job_mem_num {
        let Some(stage) = Stage::from_config_key(key) else {
            debug!(key, "ignoring unknown stage key in job_mem_num");
            continue;
        };
        if buckets.len() != LENGTH_BUCKET_COUNT {
            return Err(ConfigError::BadBucketTable {
                stage: key.clone(),
                got: buckets.len(),
            });
        }
        let mut table = [0.0_f64; LENGTH_BUCKET_COUNT];
        table.copy_from_slice(buckets);
        job_mem_num.insert(stage, table);
    }

    Ok(Config {
        input_config_path: PathBuf::from(raw.input_config_path.unwrap()),
        output_path: PathBuf::from(raw.output_path.unwrap()),
        total_core_num: raw.total_core_num.unwrap_or(ResourceSetting::Auto),
        total_mem_num: raw.total_mem_num.unwrap_or(ResourceSetting::Auto),
        mem_buffer: raw.mem_buffer.unwrap_or(DEFAULT_MEM_BUFFER_GB),
        wait_time_max: raw.wait_time_max.unwrap_or(DEFAULT_WAIT_TIME_MAX_PCT),
        wait_time_mid: raw.wait_time_mid.unwrap_or(DEFAULT_WAIT_TIME_MID_PCT),
        job_core_num,
        job_mem_num,
    })
}

/// The length-bucket index for `seq_len`, per spec §6's bucket table:
/// `[0,100), [100,200), …, [900,1000), [1000,2000), [2000,∞)`.
pub fn bucket_index(seq_len: u32) -> usize {
    const BOUNDS: [f64; LENGTH_BUCKET_COUNT] = [
        100.0, 200.0, 300.0, 400.0, 500.0, 600.0, 700.0, 800.0, 900.0, 1000.0, 2000.0,
        f64::INFINITY,
    ];
    BOUNDS
        .iter()
        .position(|&bound| (seq_len as f64) < bound)
        .unwrap_or(LENGTH_BUCKET_COUNT - 1)
}
