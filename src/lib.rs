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
//! Library for running repeatable link-failure experiments against a software-defined network.
//!
//! A trial selects the link(s) to fail from the forwarding paths reported by the controller,
//! executes a timed sequence of link-state transitions while traffic is running, and only accepts
//! the measurements if an independent observer recorded exactly the transitions that were issued.

pub mod controller;
pub mod experiments;
pub mod fabric;
pub mod failure;
pub mod link_state;
pub mod paths;
pub mod schedule;
pub mod testbed;
pub mod topology;
pub mod traffic;
pub mod util;

#[cfg(test)]
mod test;

pub mod prelude {
    pub use super::{
        controller::{Controller, OnosController},
        experiments::{ExperimentConfig, ExperimentRunner, TrialResult},
        fabric::{AdminState, Fabric, OvsFabric},
        failure::LinkFailure,
        link_state::{LinkState, LinkStateController},
        paths::LinkFlowIndex,
        schedule::{FailureSchedule, LinkHealth, SchedulePolicy},
        testbed::{MininetTestbed, Testbed},
        topology::{HostId, Link, SwitchId, Topology, TrafficFlow},
        traffic::{TrafficGenerator, TrafficModel},
    };
}
