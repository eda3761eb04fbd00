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
//! In-memory stand-ins for the testbed, used by the tests of the control loop.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    controller::{AlgorithmStatus, Controller, ControllerError},
    fabric::{AdminState, Fabric, FabricError},
    paths::AddressBook,
    testbed::{count_evidence, Deployment, Testbed, TestbedError},
    topology::{HostId, Link, PortMap, SwitchId, Topology, TrafficFlow},
    traffic::{GateWaiter, TrafficError, TrafficGenerator, TrafficJob},
};


fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FabricCall {
    Admin(SwitchId, u32, AdminState),
    Bandwidth(SwitchId, u32, u32),
}

/// Fabric recording every call.
#[derive(Debug, Default)]
pub struct FakeFabric {
    calls: Mutex<Vec<FabricCall>>,
}

impl FakeFabric {
    pub fn calls(&self) -> Vec<FabricCall> {
        lock(&self.calls).clone()
    }

    pub fn take_calls(&self) -> Vec<FabricCall> {
        std::mem::take(&mut *lock(&self.calls))
    }
}

#[async_trait::async_trait]
impl Fabric for FakeFabric {
    async fn set_link_admin_state(
        &self,
        switch: SwitchId,
        port: u32,
        state: AdminState,
    ) -> Result<(), FabricError> {
        lock(&self.calls).push(FabricCall::Admin(switch, port, state));
        Ok(())
    }

    async fn set_link_bandwidth(
        &self,
        switch: SwitchId,
        port: u32,
        mbps: u32,
    ) -> Result<(), FabricError> {
        lock(&self.calls).push(FabricCall::Bandwidth(switch, port, mbps));
        Ok(())
    }
}

/// Controller answering from scripted values. The last link count is repeated forever, and
/// `None` makes the query fail.
#[derive(Debug)]
pub struct FakeController {
    link_counts: Mutex<VecDeque<Option<usize>>>,
    paths: Mutex<String>,
    backup: Mutex<Option<String>>,
    status: Mutex<AlgorithmStatus>,
    activations: Mutex<Vec<String>>,
}

impl Default for FakeController {
    fn default() -> Self {
        Self {
            link_counts: Mutex::new(VecDeque::new()),
            paths: Mutex::new(String::new()),
            backup: Mutex::new(None),
            status: Mutex::new(AlgorithmStatus::Ready),
            activations: Mutex::new(Vec::new()),
        }
    }
}

impl FakeController {
    pub fn with_link_counts(self, counts: impl IntoIterator<Item = Option<usize>>) -> Self {
        *lock(&self.link_counts) = counts.into_iter().collect();
        self
    }

    pub fn set_paths(&self, paths: impl Into<String>) {
        *lock(&self.paths) = paths.into();
    }

    pub fn set_backup(&self, backup: Option<String>) {
        *lock(&self.backup) = backup;
    }

    pub fn set_status(&self, status: AlgorithmStatus) {
        *lock(&self.status) = status;
    }

    pub fn activations(&self) -> Vec<String> {
        lock(&self.activations).clone()
    }
}

#[async_trait::async_trait]
impl Controller for FakeController {
    async fn link_count(&self) -> Result<usize, ControllerError> {
        let mut counts = lock(&self.link_counts);
        let next = if counts.len() > 1 {
            counts.pop_front().flatten()
        } else {
            counts.front().copied().flatten()
        };
        next.ok_or_else(|| ControllerError::UnexpectedResponse("unreachable".to_string()))
    }

    async fn forwarding_paths(&self) -> Result<String, ControllerError> {
        Ok(lock(&self.paths).clone())
    }

    async fn backup_paths(&self) -> Result<Option<String>, ControllerError> {
        Ok(lock(&self.backup).clone())
    }

    async fn activate_algorithm(&self, algorithm: &str) -> Result<(), ControllerError> {
        lock(&self.activations).push(algorithm.to_string());
        Ok(())
    }

    async fn algorithm_status(&self) -> Result<AlgorithmStatus, ControllerError> {
        Ok(*lock(&self.status))
    }

    async fn deactivate_algorithm(&self) -> Result<(), ControllerError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrafficEvent {
    Prepare(HostId),
    Ping(TrafficFlow),
    Server(TrafficFlow),
    Client(TrafficFlow),
    StopAll,
}

/// Traffic generator recording the order in which flows are started. Starting a server yields to
/// the runtime, so that clients released too early get a chance to run in between.
#[derive(Debug, Default)]
pub struct FakeTraffic {
    events: Mutex<Vec<TrafficEvent>>,
    gate: Option<GateWaiter>,
    client_starts: Mutex<Vec<(TrafficFlow, bool)>>,
}

impl FakeTraffic {
    /// Record for every started client whether `gate` was already released.
    pub fn observe_gate(mut self, gate: GateWaiter) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn events(&self) -> Vec<TrafficEvent> {
        lock(&self.events).clone()
    }

    pub fn client_starts(&self) -> Vec<(TrafficFlow, bool)> {
        lock(&self.client_starts).clone()
    }
}

#[async_trait::async_trait]
impl TrafficGenerator for FakeTraffic {
    async fn prepare_host(&self, host: HostId) -> Result<(), TrafficError> {
        lock(&self.events).push(TrafficEvent::Prepare(host));
        Ok(())
    }

    async fn ping(&self, flow: TrafficFlow) -> Result<(), TrafficError> {
        lock(&self.events).push(TrafficEvent::Ping(flow));
        Ok(())
    }

    async fn start_server(&self, job: &TrafficJob) -> Result<(), TrafficError> {
        lock(&self.events).push(TrafficEvent::Server(job.flow));
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn start_client(&self, job: &TrafficJob) -> Result<(), TrafficError> {
        lock(&self.events).push(TrafficEvent::Client(job.flow));
        if let Some(gate) = &self.gate {
            lock(&self.client_starts).push((job.flow, gate.is_released()));
        }
        Ok(())
    }

    async fn stop_all(&self) -> Result<(), TrafficError> {
        lock(&self.events).push(TrafficEvent::StopAll);
        Ok(())
    }
}

pub fn fake_addr(switch: SwitchId) -> String {
    format!("00:00:00:00:00:{:02x}", switch.num())
}

/// Testbed made of the fakes above.
///
/// Deploying routes every flow over the direct link between its endpoints, so topologies must be
/// complete graphs for all flows to get a path. The first flow gets two backup paths over the
/// first other switch. The number of recorded transitions is scripted; once the script is
/// exhausted, the evidence file in the trial directory is counted. With a working directory,
/// every deployment notes which files of an earlier run are still lying around.
#[derive(Debug, Default)]
pub struct FakeTestbed {
    pub fabric: FakeFabric,
    pub controller: FakeController,
    pub traffic: Arc<FakeTraffic>,
    evidence: Mutex<VecDeque<usize>>,
    resets: AtomicUsize,
    delays: Mutex<Vec<(u32, bool)>>,
    work_dir: Option<PathBuf>,
    stale_files: Mutex<Vec<String>>,
}

/// Files the recovery application writes while it runs.
const APPLICATION_FILES: [&str; 3] = [
    "Algorithm_state->Ready",
    "traffic_flow_paths.txt",
    "failed_link_bw.txt",
];

impl FakeTestbed {
    pub fn with_evidence(self, evidence: impl IntoIterator<Item = usize>) -> Self {
        *lock(&self.evidence) = evidence.into_iter().collect();
        self
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn delays(&self) -> Vec<(u32, bool)> {
        lock(&self.delays).clone()
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    /// Application files that existed when a deployment started.
    pub fn stale_files(&self) -> Vec<String> {
        lock(&self.stale_files).clone()
    }
}

#[async_trait::async_trait]
impl Testbed for FakeTestbed {
    type Fabric = FakeFabric;
    type Controller = FakeController;
    type Traffic = FakeTraffic;

    async fn reset(&self) -> Result<(), TestbedError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn deploy(
        &self,
        topo: &Topology,
        _link_bandwidth: u32,
        flows: &[TrafficFlow],
    ) -> Result<Deployment, TestbedError> {
        if let Some(work_dir) = &self.work_dir {
            lock(&self.stale_files).extend(
                APPLICATION_FILES
                    .iter()
                    .filter(|f| work_dir.join(f).exists())
                    .map(|f| f.to_string()),
            );
        }
        let mut ports = PortMap::default();
        for (i, Link(a, b)) in topo.edges.iter().enumerate() {
            ports.insert(*a, *b, i as u32 + 1);
            ports.insert(*b, *a, i as u32 + 1);
        }
        let addresses: AddressBook = topo.hosts().map(|h| (fake_addr(h.switch), h)).collect();

        let paths = flows
            .iter()
            .filter(|f| topo.has_link(&Link(f.src.switch, f.dst.switch)))
            .map(|f| {
                format!(
                    "{},{}|[{}, {}]\n",
                    fake_addr(f.src.switch),
                    fake_addr(f.dst.switch),
                    f.src.switch,
                    f.dst.switch
                )
            })
            .collect::<String>();
        self.controller.set_paths(paths);

        let backup = flows.first().and_then(|f| {
            let (src, dst) = (f.src.switch, f.dst.switch);
            let via = topo.switches.iter().find(|s| **s != src && **s != dst)?;
            Some(format!(
                "{},{}|{{0=[{src}, {via}, {dst}], 1=[{src}, {via}, {dst}]}}\n",
                fake_addr(src),
                fake_addr(dst)
            ))
        });
        self.controller.set_backup(backup);

        *lock(&self.controller.link_counts) = VecDeque::from([Some(2 * topo.edges.len())]);
        Ok(Deployment { ports, addresses })
    }

    async fn set_control_plane_delay(
        &self,
        delay_ms: u32,
        enabled: bool,
    ) -> Result<(), TestbedError> {
        lock(&self.delays).push((delay_ms, enabled));
        Ok(())
    }

    async fn teardown(&self) -> Result<(), TestbedError> {
        self.traffic.stop_all().await?;
        Ok(())
    }

    fn fabric(&self) -> &FakeFabric {
        &self.fabric
    }

    fn controller(&self) -> &FakeController {
        &self.controller
    }

    fn traffic(&self) -> Arc<FakeTraffic> {
        self.traffic.clone()
    }

    fn recorded_transitions(&self, trial_dir: &Path) -> Result<usize, TestbedError> {
        match lock(&self.evidence).pop_front() {
            Some(n) => Ok(n),
            None => count_evidence(trial_dir),
        }
    }
}
