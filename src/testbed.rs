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
//! The emulated network: a Mininet topology whose switches connect to the SDN controller.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{
    process::Child,
    time::{sleep, timeout},
};

use crate::{
    controller::{Controller, ControllerError, OnosController, PollSettings},
    fabric::{Fabric, OvsFabric},
    paths::AddressBook,
    topology::{PortMap, Topology, TrafficFlow},
    traffic::{MininetTraffic, TrafficError, TrafficGenerator},
    util::{command, count_lines, execute, CommandError, PathBufExt},
};

/// File in the trial directory to which the recovery application appends one line per link
/// transition it observed.
pub const EVIDENCE_FILE: &str = "detect_link_change.txt";
const TOPOLOGY_FILE: &str = "topology.json";
const DEPLOYMENT_FILE: &str = "deployment.json";

#[derive(Debug, thiserror::Error)]
pub enum TestbedError {
    #[error("Command Error: {0}")]
    Command(#[from] CommandError),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Controller Error: {0}")]
    Controller(#[from] ControllerError),
    #[error("Traffic Error: {0}")]
    Traffic(#[from] TrafficError),
    #[error("The network process exited before the deployment finished")]
    NetworkExited,
    #[error("Timeout after {1:?} while waiting for {0}")]
    Timeout(&'static str, Duration),
}

/// What the deployed network reports back: switch ports of all links and host addresses.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub ports: PortMap,
    pub addresses: AddressBook,
}

/// Request passed to the topology script.
#[derive(Debug, Serialize)]
struct DeploymentRequest<'a> {
    topology: &'a Topology,
    link_bandwidth: u32,
    flows: &'a [TrafficFlow],
}

#[async_trait::async_trait]
pub trait Testbed: Send + Sync {
    type Fabric: Fabric + 'static;
    type Controller: Controller + 'static;
    type Traffic: TrafficGenerator + 'static;

    /// Bring fabric and controller into a clean state.
    async fn reset(&self) -> Result<(), TestbedError>;

    /// Build the topology with hosts for the flows, and connect it to the controller.
    async fn deploy(
        &self,
        topo: &Topology,
        link_bandwidth: u32,
        flows: &[TrafficFlow],
    ) -> Result<Deployment, TestbedError>;

    /// Add (or remove) an artificial delay on the channel between switches and controller.
    async fn set_control_plane_delay(&self, delay_ms: u32, enabled: bool)
        -> Result<(), TestbedError>;

    /// Stop all traffic and destroy the network.
    async fn teardown(&self) -> Result<(), TestbedError>;

    fn fabric(&self) -> &Self::Fabric;

    fn controller(&self) -> &Self::Controller;

    fn traffic(&self) -> Arc<Self::Traffic>;

    /// Number of link transitions the recovery application recorded for the trial.
    fn recorded_transitions(&self, trial_dir: &Path) -> Result<usize, TestbedError> {
        count_evidence(trial_dir)
    }
}

/// Count the lines of the evidence file in `trial_dir`. A missing file means nothing was recorded.
pub fn count_evidence(trial_dir: &Path) -> Result<usize, TestbedError> {
    match count_lines(trial_dir.then(EVIDENCE_FILE)) {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::warn!("[testbed] no transitions recorded in {}", trial_dir.display());
            Ok(0)
        }
        Err(e) => Err(e.into()),
    }
}

/// Mininet with Open vSwitch, controlled by ONOS running on the same machine.
#[derive(Debug)]
pub struct MininetTestbed {
    work_dir: PathBuf,
    topology_script: PathBuf,
    onos_reset_script: Option<PathBuf>,
    sudo: bool,
    poll: PollSettings,
    fabric: OvsFabric,
    controller: OnosController,
    traffic: Arc<MininetTraffic>,
    network: Mutex<Option<Child>>,
}

impl MininetTestbed {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        topology_script: impl Into<PathBuf>,
        controller: OnosController,
        poll: PollSettings,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            topology_script: topology_script.into(),
            onos_reset_script: None,
            sudo: true,
            poll,
            fabric: OvsFabric::new(true),
            controller,
            traffic: Arc::new(MininetTraffic::new(true)),
            network: Mutex::new(None),
        }
    }

    pub fn onos_reset_script(mut self, script: Option<PathBuf>) -> Self {
        self.onos_reset_script = script;
        self
    }

    async fn clean_mininet(&self) -> Result<(), TestbedError> {
        execute(command("mn", ["-c"], self.sudo)).await?;
        Ok(())
    }

    async fn restart_openvswitch(&self) -> Result<(), TestbedError> {
        execute(command(
            "systemctl",
            ["restart", "openvswitch-switch"],
            self.sudo,
        ))
        .await?;
        Ok(())
    }

    async fn reset_controller(&self) -> Result<(), TestbedError> {
        if let Some(script) = &self.onos_reset_script {
            execute(command("python3", [script.as_os_str()], self.sudo)).await?;
        }
        let job = async {
            loop {
                match self.controller.activate_openflow().await {
                    Ok(()) => break,
                    Err(e) => log::debug!("[testbed] controller not ready: {e}"),
                }
                sleep(self.poll.interval).await;
            }
        };
        timeout(self.poll.timeout, job)
            .await
            .map_err(|_| TestbedError::Timeout("controller reset", self.poll.timeout))
    }

    fn take_network(&self) -> Option<Child> {
        self.network
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

#[async_trait::async_trait]
impl Testbed for MininetTestbed {
    type Fabric = OvsFabric;
    type Controller = OnosController;
    type Traffic = MininetTraffic;

    async fn reset(&self) -> Result<(), TestbedError> {
        log::info!("[testbed] reset mininet, openvswitch and the controller");
        self.clean_mininet().await?;
        self.restart_openvswitch().await?;
        self.reset_controller().await
    }

    async fn deploy(
        &self,
        topo: &Topology,
        link_bandwidth: u32,
        flows: &[TrafficFlow],
    ) -> Result<Deployment, TestbedError> {
        let request_file = self.work_dir.as_path().then(TOPOLOGY_FILE);
        let deployment_file = self.work_dir.as_path().then(DEPLOYMENT_FILE);
        if deployment_file.exists() {
            std::fs::remove_file(&deployment_file)?;
        }
        let request = DeploymentRequest {
            topology: topo,
            link_bandwidth,
            flows,
        };
        std::fs::write(&request_file, serde_json::to_string_pretty(&request)?)?;

        log::info!(
            "[testbed] deploy {} switches and {} links",
            topo.switches.len(),
            topo.edges.len()
        );
        let child = command(
            "python3",
            [
                self.topology_script.as_os_str(),
                request_file.as_os_str(),
                deployment_file.as_os_str(),
            ],
            self.sudo,
        )
        .kill_on_drop(true)
        .spawn()?;
        *self.network.lock().unwrap_or_else(|e| e.into_inner()) = Some(child);

        let job = async {
            loop {
                if let Ok(content) = std::fs::read_to_string(&deployment_file) {
                    match serde_json::from_str::<Deployment>(&content) {
                        Ok(deployment) => return Ok(deployment),
                        Err(e) => log::trace!("[testbed] deployment not complete: {e}"),
                    }
                }
                let exited = self
                    .network
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .as_mut()
                    .map(|c| matches!(c.try_wait(), Ok(Some(_))))
                    .unwrap_or(true);
                if exited {
                    return Err(TestbedError::NetworkExited);
                }
                sleep(self.poll.interval).await;
            }
        };
        timeout(self.poll.timeout, job)
            .await
            .map_err(|_| TestbedError::Timeout("topology deployment", self.poll.timeout))?
    }

    async fn set_control_plane_delay(
        &self,
        delay_ms: u32,
        enabled: bool,
    ) -> Result<(), TestbedError> {
        if delay_ms == 0 {
            return Ok(());
        }
        let action = if enabled { "add" } else { "del" };
        log::debug!("[testbed] {action} control-plane delay of {delay_ms}ms");
        let delay = format!("{delay_ms}ms");
        execute(command(
            "tc",
            ["qdisc", action, "dev", "lo", "root", "netem", "delay", delay.as_str()],
            self.sudo,
        ))
        .await?;
        Ok(())
    }

    async fn teardown(&self) -> Result<(), TestbedError> {
        self.traffic.stop_all().await?;
        if let Some(mut child) = self.take_network() {
            if let Err(e) = child.kill().await {
                log::warn!("[testbed] cannot stop the network process: {e}");
            }
        }
        self.clean_mininet().await
    }

    fn fabric(&self) -> &OvsFabric {
        &self.fabric
    }

    fn controller(&self) -> &OnosController {
        &self.controller
    }

    fn traffic(&self) -> Arc<MininetTraffic> {
        self.traffic.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::FakeTestbed;

    #[test]
    fn evidence_lines() {
        let dir = tempfile::tempdir().unwrap();
        let testbed = FakeTestbed::default();
        assert_eq!(testbed.recorded_transitions(dir.path()).unwrap(), 0);
        std::fs::write(dir.path().join(EVIDENCE_FILE), "a\nb\nc\n").unwrap();
        assert_eq!(testbed.recorded_transitions(dir.path()).unwrap(), 3);
    }

    #[test]
    fn deployment_format() {
        let json = r#"{
            "ports": {"s1": {"s2": 2}, "s2": {"s1": 3}},
            "addresses": {"00:00:00:00:00:01": "h1_0"}
        }"#;
        let deployment: Deployment = serde_json::from_str(json).unwrap();
        assert_eq!(
            deployment.ports.port("s2".parse().unwrap(), "s1".parse().unwrap()),
            Some(3)
        );
        assert_eq!(
            deployment.addresses.host("00:00:00:00:00:01"),
            Some("h1_0".parse().unwrap())
        );
    }
}
