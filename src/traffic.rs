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
//! Traffic generation, synchronized with the failure schedule.
//!
//! Flows that do not cross a failed link start right away and run in the background. Clients of the
//! affected flows wait on a [`StartGate`], which the control loop releases once all of them are
//! spawned, so that their measurements start together.

use std::{
    path::PathBuf,
    process::Stdio,
    sync::{Arc, Mutex},
    time::Duration,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::{process::Child, sync::watch, task::JoinHandle};

use crate::{
    topology::{HostId, TrafficFlow},
    util::{command, execute, now_secs, CommandError},
};

pub const BASE_PORT: u16 = 50000;

#[derive(Debug, thiserror::Error)]
pub enum TrafficError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Command Error: {0}")]
    Command(#[from] CommandError),
    #[error("Join Error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("The start gate was dropped without being released")]
    GateDropped,
    #[error("Invalid traffic model {0}")]
    InvalidModel(u8),
    #[error("Too many flows for the port range starting at {BASE_PORT}")]
    PortRange,
}

/// Transport of the generated traffic, configured as `1` (TCP) or `2` (UDP).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TrafficModel {
    Tcp,
    Udp,
}

impl TryFrom<u8> for TrafficModel {
    type Error = TrafficError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Tcp),
            2 => Ok(Self::Udp),
            x => Err(TrafficError::InvalidModel(x)),
        }
    }
}

impl From<TrafficModel> for u8 {
    fn from(value: TrafficModel) -> Self {
        match value {
            TrafficModel::Tcp => 1,
            TrafficModel::Udp => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrafficSettings {
    pub model: TrafficModel,
    pub throughput_mbps: u32,
    /// Duration of the measured (affected) flows.
    pub measured_duration: Duration,
    /// Duration of the background flows.
    pub background_duration: Duration,
    /// Directory where the measured flows write their reports.
    pub output_dir: PathBuf,
    /// Report every second (clients) and every 100ms (servers).
    pub fine_grained: bool,
}

impl TrafficSettings {
    pub fn new(model: TrafficModel, throughput_mbps: u32, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            model,
            throughput_mbps,
            measured_duration: Duration::from_secs(25),
            background_duration: Duration::from_secs(60),
            output_dir: output_dir.into(),
            fine_grained: false,
        }
    }

    /// Build the job of the flow with the given index.
    pub fn job(
        &self,
        index: usize,
        flow: TrafficFlow,
        measured: bool,
    ) -> Result<TrafficJob, TrafficError> {
        let port = u16::try_from(index)
            .ok()
            .and_then(|i| BASE_PORT.checked_add(i))
            .ok_or(TrafficError::PortRange)?;
        let name = format!("{}_{}", flow.src, flow.dst);
        Ok(TrafficJob {
            index,
            flow,
            port,
            model: self.model,
            throughput_mbps: self.throughput_mbps,
            duration: if measured {
                self.measured_duration
            } else {
                self.background_duration
            },
            client_output: measured.then(|| self.output_dir.join(format!("{name}.json"))),
            server_output: (measured && self.model == TrafficModel::Udp)
                .then(|| self.output_dir.join(format!("{name}_s.json"))),
            fine_grained: measured && self.fine_grained,
        })
    }
}

/// One iperf flow: a server on the destination and a client on the source.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficJob {
    pub index: usize,
    pub flow: TrafficFlow,
    pub port: u16,
    pub model: TrafficModel,
    pub throughput_mbps: u32,
    pub duration: Duration,
    pub client_output: Option<PathBuf>,
    pub server_output: Option<PathBuf>,
    pub fine_grained: bool,
}

impl TrafficJob {
    pub fn server_args(&self) -> Vec<String> {
        let mut args = vec!["iperf3".to_string(), "-s".to_string()];
        if self.server_output.is_some() {
            args.push("-J".to_string());
        }
        args.extend(["-p".to_string(), self.port.to_string()]);
        if self.fine_grained && self.server_output.is_some() {
            args.extend(["-i".to_string(), "0.1".to_string()]);
        }
        args
    }

    pub fn client_args(&self) -> Vec<String> {
        let mut args = vec![
            "iperf3".to_string(),
            "-c".to_string(),
            self.flow.dst.ip(),
            "-t".to_string(),
            self.duration.as_secs().to_string(),
            "-b".to_string(),
            format!("{}M", self.throughput_mbps),
        ];
        if self.model == TrafficModel::Udp {
            args.push("-u".to_string());
        }
        if self.client_output.is_some() {
            args.push("-J".to_string());
        }
        if self.fine_grained {
            args.extend(["-i".to_string(), "1".to_string()]);
        }
        args.extend(["-p".to_string(), self.port.to_string()]);
        args
    }
}

/// Starts the processes that generate traffic. Starting returns as soon as the process runs.
#[async_trait::async_trait]
pub trait TrafficGenerator: Send + Sync {
    /// Open the firewall of a host and disable segmentation offloading on its interface.
    async fn prepare_host(&self, host: HostId) -> Result<(), TrafficError>;

    /// Send a single connectivity ping along the flow.
    async fn ping(&self, flow: TrafficFlow) -> Result<(), TrafficError>;

    async fn start_server(&self, job: &TrafficJob) -> Result<(), TrafficError>;

    async fn start_client(&self, job: &TrafficJob) -> Result<(), TrafficError>;

    /// Kill all processes started so far.
    async fn stop_all(&self) -> Result<(), TrafficError>;
}

/// Released exactly once, which starts every waiting client.
#[derive(Debug)]
pub struct StartGate {
    tx: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct GateWaiter {
    rx: watch::Receiver<bool>,
}

impl StartGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn waiter(&self) -> GateWaiter {
        GateWaiter {
            rx: self.tx.subscribe(),
        }
    }

    /// Open the gate and return the time at which it was opened.
    pub fn release(self) -> f64 {
        let released_at = now_secs();
        self.tx.send_replace(true);
        released_at
    }
}

impl Default for StartGate {
    fn default() -> Self {
        Self::new()
    }
}

impl GateWaiter {
    pub fn is_released(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(mut self) -> Result<(), TrafficError> {
        while !self.is_released() {
            self.rx
                .changed()
                .await
                .map_err(|_| TrafficError::GateDropped)?;
        }
        Ok(())
    }
}

/// Traffic of a trial, after the gate was released.
#[derive(Debug)]
pub struct SynchronizedTraffic {
    pub released_at: f64,
    handles: Vec<JoinHandle<Result<(), TrafficError>>>,
}

impl SynchronizedTraffic {
    /// Wait until all gated clients are started.
    pub async fn join(self) -> Result<(), TrafficError> {
        for handle in self.handles {
            handle.await??;
        }
        Ok(())
    }
}

/// Prepare all hosts, ping all flows, start the unaffected flows, then the affected flows behind
/// a shared gate.
pub async fn start_traffic<G>(
    generator: Arc<G>,
    flows: &[TrafficFlow],
    affected: &[TrafficFlow],
    settings: &TrafficSettings,
) -> Result<SynchronizedTraffic, TrafficError>
where
    G: TrafficGenerator + ?Sized + 'static,
{
    start_traffic_behind(generator, flows, affected, settings, StartGate::new()).await
}

/// Like [`start_traffic`], but the measured clients wait on `gate`.
pub async fn start_traffic_behind<G>(
    generator: Arc<G>,
    flows: &[TrafficFlow],
    affected: &[TrafficFlow],
    settings: &TrafficSettings,
    gate: StartGate,
) -> Result<SynchronizedTraffic, TrafficError>
where
    G: TrafficGenerator + ?Sized + 'static,
{
    for host in flows.iter().flat_map(|f| [f.src, f.dst]).unique() {
        generator.prepare_host(host).await?;
    }

    let pings = flows
        .iter()
        .copied()
        .map(|flow| {
            let generator = generator.clone();
            tokio::spawn(async move { (flow, generator.ping(flow).await) })
        })
        .collect::<Vec<_>>();
    for ping in pings {
        if let (flow, Err(e)) = ping.await? {
            log::warn!("[traffic] ping of {flow} failed: {e}");
        }
    }

    let jobs = flows
        .iter()
        .enumerate()
        .map(|(i, flow)| settings.job(i, *flow, affected.contains(flow)))
        .collect::<Result<Vec<_>, _>>()?;

    for job in jobs.iter().filter(|j| j.client_output.is_none()) {
        generator.start_server(job).await?;
        generator.start_client(job).await?;
        log::debug!("[traffic] background flow {} on port {}", job.flow, job.port);
    }

    let mut handles = Vec::new();
    for job in jobs.into_iter().filter(|j| j.client_output.is_some()) {
        generator.start_server(&job).await?;
        let generator = generator.clone();
        let waiter = gate.waiter();
        handles.push(tokio::spawn(async move {
            waiter.wait().await?;
            log::debug!("[traffic] measured flow {} on port {}", job.flow, job.port);
            generator.start_client(&job).await
        }));
    }

    let released_at = gate.release();
    log::info!(
        "[traffic] {} flows running, {} measured",
        flows.len(),
        handles.len()
    );
    Ok(SynchronizedTraffic {
        released_at,
        handles,
    })
}

/// Runs the tools inside the Mininet host namespaces using the `m` helper.
#[derive(Debug)]
pub struct MininetTraffic {
    sudo: bool,
    children: Mutex<Vec<Child>>,
}

impl MininetTraffic {
    pub fn new(sudo: bool) -> Self {
        Self {
            sudo,
            children: Mutex::new(Vec::new()),
        }
    }

    fn spawn(&self, host: String, args: Vec<String>, output: Option<&PathBuf>) -> Result<(), TrafficError> {
        let mut cmd = command("m", std::iter::once(host).chain(args), self.sudo);
        cmd.stdin(Stdio::null()).stderr(Stdio::null()).kill_on_drop(true);
        match output {
            Some(path) => cmd.stdout(std::fs::File::create(path)?),
            None => cmd.stdout(Stdio::null()),
        };
        let child = cmd.spawn()?;
        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(child);
        Ok(())
    }
}

#[async_trait::async_trait]
impl TrafficGenerator for MininetTraffic {
    async fn prepare_host(&self, host: HostId) -> Result<(), TrafficError> {
        let name = host.to_string();
        let intf = format!("{name}-eth0");
        let commands: [&[&str]; 5] = [
            &["iptables", "-P", "INPUT", "ACCEPT"],
            &["iptables", "-P", "FORWARD", "ACCEPT"],
            &["iptables", "-P", "OUTPUT", "ACCEPT"],
            &["iptables", "-F"],
            &["ethtool", "-K", intf.as_str(), "lro", "off", "gso", "off", "tso", "off"],
        ];
        for args in commands {
            let args = std::iter::once(name.as_str()).chain(args.iter().copied());
            execute(command("m", args, self.sudo)).await?;
        }
        log::trace!("[traffic] prepared {name}");
        Ok(())
    }

    async fn ping(&self, flow: TrafficFlow) -> Result<(), TrafficError> {
        let args = [flow.src.to_string(), "ping".to_string(), "-c1".to_string(), flow.dst.ip()];
        execute(command("m", args, self.sudo)).await?;
        Ok(())
    }

    async fn start_server(&self, job: &TrafficJob) -> Result<(), TrafficError> {
        self.spawn(
            job.flow.dst.to_string(),
            job.server_args(),
            job.server_output.as_ref(),
        )
    }

    async fn start_client(&self, job: &TrafficJob) -> Result<(), TrafficError> {
        self.spawn(
            job.flow.src.to_string(),
            job.client_args(),
            job.client_output.as_ref(),
        )
    }

    async fn stop_all(&self) -> Result<(), TrafficError> {
        let children = std::mem::take(&mut *self.children.lock().unwrap_or_else(|e| e.into_inner()));
        log::debug!("[traffic] stopping {} processes", children.len());
        for mut child in children {
            if let Err(e) = child.kill().await {
                log::warn!("[traffic] cannot kill traffic process: {e}");
            }
        }
        Ok(())
    }
}
