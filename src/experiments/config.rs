// FREX: Failure-Recovery Experiments on Software-Defined Networks
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Experiment configuration, read from a JSON file.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use itertools::iproduct;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::{
    controller::PollSettings,
    schedule::{SchedulePolicy, TransitionMatrix, DEFAULT_MARKOV_STEPS},
    traffic::TrafficModel,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO Error while reading {1:?}: {0}")]
    Io(#[source] std::io::Error, PathBuf),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Whether one link is failed following a schedule, or two links are cut one after the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FailureMode {
    Single,
    Multiple,
}

/// Source of the single-link schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScheduleMode {
    Markov,
    Fixed,
}

fn default_link_change_time() -> Vec<u64> {
    vec![5]
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("Trace_folder")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_topology_script() -> PathBuf {
    PathBuf::from("scripts/topology.py")
}

fn default_controller_url() -> String {
    "http://127.0.0.1:8181/onos/v1".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExperimentConfig {
    pub user_name: String,
    /// CSV file collecting one summary row per accepted trial.
    #[serde(default)]
    pub output_file: Option<PathBuf>,
    pub failure_mode: FailureMode,
    pub mode: ScheduleMode,
    pub algorithm: Vec<String>,
    pub vertex: Vec<usize>,
    pub edge: Vec<usize>,
    pub link_bandwidth: Vec<u32>,
    pub throughput: Vec<u32>,
    pub traffic_model: Vec<TrafficModel>,
    pub control_plane_delay: Vec<u32>,
    pub flow_count: Vec<usize>,
    /// First and last trial index, inclusive.
    pub trial: [usize; 2],
    /// Dwell time of every schedule step, in seconds.
    #[serde(default = "default_link_change_time")]
    pub link_change_time: Vec<u64>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<usize>,
    /// Seconds.
    #[serde(default)]
    pub convergence_timeout: Option<u64>,
    /// Seconds.
    #[serde(default)]
    pub poll_interval: Option<u64>,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_topology_script")]
    pub topology_script: PathBuf,
    #[serde(default = "default_controller_url")]
    pub controller_url: String,
    #[serde(default)]
    pub apps_dir: Option<PathBuf>,
    #[serde(default)]
    pub onos_reset_script: Option<PathBuf>,
    #[serde(default)]
    pub steps: Option<usize>,
    #[serde(default)]
    pub transition_matrix: Option<TransitionMatrix>,
    #[serde(default = "default_true")]
    pub always_reset: bool,
}

/// One point of the parameter sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialParams {
    pub algorithm: String,
    pub vertex: usize,
    pub edge: usize,
    pub link_bandwidth: u32,
    pub throughput: u32,
    pub traffic_model: TrafficModel,
    pub control_plane_delay: u32,
    pub flow_count: usize,
    pub trial: usize,
}

impl TrialParams {
    /// Name of the trial directory, unique within a sweep.
    pub fn label(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}_{}_{}_{}_{}",
            self.algorithm,
            self.vertex,
            self.edge,
            self.link_bandwidth,
            self.throughput,
            u8::from(self.traffic_model),
            self.control_plane_delay,
            self.flow_count,
            self.trial
        )
    }
}

impl ExperimentConfig {
    /// Read and validate the configuration. A path without extension gets `.json` appended.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut path = path.as_ref().to_path_buf();
        if path.extension().is_none() {
            path.set_extension("json");
        }
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e, path.clone()))?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        log::debug!("[config] loaded {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.algorithm.is_empty()
            || self.vertex.is_empty()
            || self.edge.is_empty()
            || self.link_bandwidth.is_empty()
            || self.throughput.is_empty()
            || self.traffic_model.is_empty()
            || self.control_plane_delay.is_empty()
            || self.flow_count.is_empty()
        {
            return invalid("every parameter needs at least one value");
        }
        if self.trial[0] > self.trial[1] {
            return invalid("the first trial must not come after the last one");
        }
        if self.link_change_time.first().copied().unwrap_or(0) == 0 {
            return invalid("LinkChangeTime must be positive");
        }
        if self.max_attempts == Some(0) {
            return invalid("MaxAttempts must be positive");
        }
        if self.poll_interval == Some(0) {
            return invalid("PollInterval must be positive");
        }
        for (v, e) in iproduct!(&self.vertex, &self.edge) {
            if *v < 3 || e < v || *e > v * (v - 1) / 2 {
                return Err(ConfigError::Invalid(format!(
                    "no topology has {v} switches and {e} links"
                )));
            }
            for flows in &self.flow_count {
                if *flows > v * (v - 1) / 2 {
                    return Err(ConfigError::Invalid(format!(
                        "{flows} flows do not fit {v} switches"
                    )));
                }
            }
        }
        Ok(())
    }

    /// All trials of the sweep, ordered by trial index first and algorithm last.
    pub fn sweep(&self) -> Vec<TrialParams> {
        let mut points = Vec::new();
        for trial in self.trial[0]..=self.trial[1] {
            for (v, e, bw, thr, model, delay, flows) in iproduct!(
                &self.vertex,
                &self.edge,
                &self.link_bandwidth,
                &self.throughput,
                &self.traffic_model,
                &self.control_plane_delay,
                &self.flow_count
            ) {
                for algorithm in &self.algorithm {
                    points.push(TrialParams {
                        algorithm: algorithm.clone(),
                        vertex: *v,
                        edge: *e,
                        link_bandwidth: *bw,
                        throughput: *thr,
                        traffic_model: *model,
                        control_plane_delay: *delay,
                        flow_count: *flows,
                        trial,
                    });
                }
            }
        }
        points
    }

    pub fn schedule_policy(&self) -> SchedulePolicy {
        match self.mode {
            ScheduleMode::Markov => SchedulePolicy::Markov {
                steps: self.steps.unwrap_or(DEFAULT_MARKOV_STEPS),
                matrix: self.transition_matrix.clone().unwrap_or_default(),
            },
            ScheduleMode::Fixed => SchedulePolicy::Fixed,
        }
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_secs(self.link_change_time.first().copied().unwrap_or(5))
    }

    pub fn poll_settings(&self) -> PollSettings {
        let default = PollSettings::default();
        PollSettings {
            interval: self
                .poll_interval
                .map(Duration::from_secs)
                .unwrap_or(default.interval),
            timeout: self
                .convergence_timeout
                .map(Duration::from_secs)
                .unwrap_or(default.timeout),
        }
    }

    /// Directory containing the trial directories.
    pub fn trace_dir(&self) -> PathBuf {
        let sub = match (self.failure_mode, self.mode) {
            (FailureMode::Single, ScheduleMode::Markov) => "markov_chain",
            _ => "fixed_version",
        };
        self.output_dir.join(sub)
    }
}
