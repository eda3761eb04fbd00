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
//! The link-state mutation primitive of the emulated network.

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::{
    topology::SwitchId,
    util::{command, execute, CommandError},
};

#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    #[error("Command Error: {0}")]
    Command(#[from] CommandError),
    #[error("Bandwidth of {0} Mbit/s cannot be configured")]
    InvalidBandwidth(u32),
}

/// Administrative state of a switch port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    Up,
    Down,
}

/// Operations on a single switch port. A link is mutated by applying them to both endpoints.
#[async_trait::async_trait]
pub trait Fabric: Send + Sync {
    /// Set the administrative state of the port.
    async fn set_link_admin_state(
        &self,
        switch: SwitchId,
        port: u32,
        state: AdminState,
    ) -> Result<(), FabricError>;

    /// Set the egress rate of the port, in Mbit/s.
    async fn set_link_bandwidth(
        &self,
        switch: SwitchId,
        port: u32,
        mbps: u32,
    ) -> Result<(), FabricError>;
}

/// Open vSwitch ports shaped by an HTB qdisc, as deployed by Mininet with `TCLink`.
#[derive(Debug, Clone)]
pub struct OvsFabric {
    sudo: bool,
}

impl OvsFabric {
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }

    /// Name of the network interface of a switch port.
    pub fn interface(switch: SwitchId, port: u32) -> String {
        format!("{switch}-eth{port}")
    }
}

impl Default for OvsFabric {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait::async_trait]
impl Fabric for OvsFabric {
    async fn set_link_admin_state(
        &self,
        switch: SwitchId,
        port: u32,
        state: AdminState,
    ) -> Result<(), FabricError> {
        log::trace!("[fabric] {switch} port {port} {state}");
        let args = [
            "mod-port".to_string(),
            switch.to_string(),
            port.to_string(),
            state.to_string(),
        ];
        execute(command("ovs-ofctl", args, self.sudo)).await?;
        Ok(())
    }

    async fn set_link_bandwidth(
        &self,
        switch: SwitchId,
        port: u32,
        mbps: u32,
    ) -> Result<(), FabricError> {
        if mbps == 0 {
            return Err(FabricError::InvalidBandwidth(mbps));
        }
        log::trace!("[fabric] {switch} port {port} rate {mbps}Mbit");
        let args = [
            "class".to_string(),
            "change".to_string(),
            "dev".to_string(),
            Self::interface(switch, port),
            "parent".to_string(),
            "5:0".to_string(),
            "classid".to_string(),
            "5:1".to_string(),
            "htb".to_string(),
            "rate".to_string(),
            format!("{mbps}Mbit"),
            "burst".to_string(),
            "15k".to_string(),
        ];
        execute(command("tc", args, self.sudo)).await?;
        Ok(())
    }
}
