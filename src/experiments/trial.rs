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
//! Records of a single trial.

use std::path::Path;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::{
    failure::LinkFailure,
    paths::AddressBook,
    schedule::LinkHealth,
    topology::Link,
    util::{get_timestamp, write_lines, PathBufExt},
};
use frex_utils::serde::TrialSummary;

use super::config::FailureMode;

/// Phase of the control loop for a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TrialPhase {
    Setup,
    Running,
    Validating,
    Accepted,
    Retrying,
}

/// What happened during one schedule step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Link changed in this step, if any.
    pub link: Option<Link>,
    pub health: LinkHealth,
    /// Bandwidth of the link during the step, in Mbit/s.
    pub bandwidth: u32,
    pub start: f64,
    pub stop: f64,
    /// When the fabric was changed, or when the step decided not to change it.
    pub change: f64,
    pub mutated: bool,
}

/// Outcome of an accepted trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub label: String,
    pub algorithm: String,
    pub trial: usize,
    pub failure_mode: FailureMode,
    pub pattern: Vec<LinkHealth>,
    pub failure: LinkFailure,
    pub records: Vec<TransitionRecord>,
    pub change_counter: usize,
    pub attempts: usize,
    /// When the measured traffic was released.
    pub traffic_started: f64,
    /// Duration of the accepted attempt, in seconds.
    pub duration: f64,
    /// Addresses of the deployed hosts.
    #[serde(default)]
    pub addresses: AddressBook,
}

impl TrialResult {
    /// Write all artifacts of the trial into `dir`.
    pub fn persist(&self, dir: &Path) -> Result<(), std::io::Error> {
        write_lines(
            dir.then("timestamp_record.txt"),
            self.records.iter().flat_map(|r| [r.start, r.stop]),
        )?;
        write_lines(
            dir.then("link_change_time.txt"),
            self.records.iter().map(|r| r.change),
        )?;
        write_lines(
            dir.then("affected_traffic_flows_record.txt"),
            &self.failure.affected_flows,
        )?;
        if self.algorithm == "DRAF" {
            write_lines(
                dir.then("addflow_to_addr.txt"),
                self.failure.affected_flows.iter().map(|f| {
                    let addr = |h| self.addresses.addr(h).unwrap_or_default().to_uppercase();
                    format!("{} {} {},{}", f.src, f.dst, addr(f.src), addr(f.dst))
                }),
            )?;
        }
        write_lines(dir.then("failed_link_record.txt"), &self.failure.links)?;
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::from)?;
        std::fs::write(dir.then("result.json"), json)?;
        Ok(())
    }

    pub fn summary(&self) -> TrialSummary {
        TrialSummary {
            execution_timestamp: get_timestamp(),
            label: self.label.clone(),
            algorithm: self.algorithm.clone(),
            trial: self.trial,
            failure_mode: self.failure_mode.to_string(),
            pattern: self.pattern.iter().map(LinkHealth::index).join(";"),
            failed_links: self.failure.links.iter().join(";"),
            num_affected_flows: self.failure.affected_flows.len(),
            change_counter: self.change_counter,
            attempts: self.attempts,
            execution_duration: self.duration,
            first_change: self
                .records
                .iter()
                .find(|r| r.mutated)
                .map(|r| r.change)
                .unwrap_or_default(),
        }
    }
}
