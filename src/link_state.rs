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
//! Execution of single schedule steps on the fabric.
//!
//! Before every change of a link, the controller writes a transition-intent record describing the
//! target state. The recovery application reads it to classify the link event it observes next.

use std::{
    collections::HashMap,
    fmt::Write as _,
    path::{Path, PathBuf},
};

use rand::Rng;
use thiserror::Error;

use crate::{
    fabric::{AdminState, Fabric, FabricError},
    schedule::LinkHealth,
    topology::{Link, PortMap, SwitchId, TopologyError},
    util::now_secs,
};

/// Bandwidth of a link in full service, in Mbit/s.
pub const FULL_BANDWIDTH: u32 = 1000;

#[derive(Debug, Error)]
pub enum LinkStateError {
    #[error("Fabric Error: {0}")]
    Fabric(#[from] FabricError),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Topology(#[from] TopologyError),
    #[error("A degraded link needs a bandwidth strictly between 0 and {FULL_BANDWIDTH}, not {0}")]
    InvalidBandwidth(u32),
}

/// Target state of a link, including the bandwidth of a degraded link.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkState {
    FullService,
    Degraded(u32),
    Outage,
}

impl LinkState {
    /// A degraded link must keep some, but not all of its bandwidth.
    pub fn validate(&self) -> Result<(), LinkStateError> {
        match self {
            Self::Degraded(bw) if *bw == 0 || *bw >= FULL_BANDWIDTH => {
                Err(LinkStateError::InvalidBandwidth(*bw))
            }
            _ => Ok(()),
        }
    }

    /// Bind a concrete state to `health`. Degraded links get a uniformly random bandwidth.
    pub fn for_health<R: Rng + ?Sized>(health: LinkHealth, rng: &mut R) -> Self {
        match health {
            LinkHealth::FullService => Self::FullService,
            LinkHealth::Degraded => Self::Degraded(rng.gen_range(1..FULL_BANDWIDTH)),
            LinkHealth::Outage => Self::Outage,
        }
    }

    pub fn health(&self) -> LinkHealth {
        match self {
            Self::FullService => LinkHealth::FullService,
            Self::Degraded(_) => LinkHealth::Degraded,
            Self::Outage => LinkHealth::Outage,
        }
    }

    pub fn bandwidth(&self) -> u32 {
        match self {
            Self::FullService => FULL_BANDWIDTH,
            Self::Degraded(bw) => *bw,
            Self::Outage => 0,
        }
    }
}

/// The record written before a link is changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionIntent {
    pub state: LinkState,
    pub link: Link,
}

impl TransitionIntent {
    /// Tag, bandwidth and the 0-based numbers of both endpoints, one per line.
    pub fn serialize(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "{}", self.state.health());
        let _ = writeln!(s, "{}", self.state.bandwidth());
        let _ = writeln!(s, "{}", self.link.0.zero_based());
        let _ = writeln!(s, "{}", self.link.1.zero_based());
        s
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::write(path, self.serialize())
    }
}

/// Result of applying one step.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StepOutcome {
    /// Whether the fabric was changed.
    pub mutated: bool,
    /// Time right after the last mutation request, or of the decision if nothing changed.
    pub timestamp: f64,
}

/// Applies link states to the fabric and remembers the last state of every link.
pub struct LinkStateController<'a, F: Fabric + ?Sized> {
    fabric: &'a F,
    ports: &'a PortMap,
    intent_path: PathBuf,
    always_reset: bool,
    current: HashMap<Link, LinkState>,
    change_counter: usize,
}

impl<'a, F: Fabric + ?Sized> LinkStateController<'a, F> {
    pub fn new(fabric: &'a F, ports: &'a PortMap, intent_path: impl Into<PathBuf>) -> Self {
        Self {
            fabric,
            ports,
            intent_path: intent_path.into(),
            always_reset: true,
            current: HashMap::new(),
            change_counter: 0,
        }
    }

    /// Cycle the link down and up on every transition into a non-outage state, instead of only
    /// after an outage or when the link is changed for the first time.
    pub fn always_reset(mut self, always_reset: bool) -> Self {
        self.always_reset = always_reset;
        self
    }

    /// Number of transitions that changed the fabric.
    pub fn change_counter(&self) -> usize {
        self.change_counter
    }

    pub fn current(&self, link: &Link) -> Option<LinkState> {
        self.current.get(&link.normalized()).copied()
    }

    /// Move `link` into `target`. Nothing happens if the link already has the same health.
    pub async fn apply(
        &mut self,
        link: Link,
        target: LinkState,
    ) -> Result<StepOutcome, LinkStateError> {
        target.validate()?;
        let previous = self.current(&link);
        if previous.map(|p| p.health()) == Some(target.health()) {
            log::debug!("[link-state] {link} stays {}", target.health());
            return Ok(StepOutcome {
                mutated: false,
                timestamp: now_secs(),
            });
        }

        let endpoints = self.ports.endpoints(&link)?;
        TransitionIntent {
            state: target,
            link,
        }
        .write_to(&self.intent_path)?;

        match target {
            LinkState::Outage => {
                self.set_admin_state(&endpoints, AdminState::Down).await?;
            }
            LinkState::FullService | LinkState::Degraded(_) => {
                let needs_reset = self.always_reset
                    || matches!(previous, None | Some(LinkState::Outage));
                if needs_reset {
                    self.set_admin_state(&endpoints, AdminState::Down).await?;
                    self.set_admin_state(&endpoints, AdminState::Up).await?;
                }
                for (switch, port) in endpoints {
                    self.fabric
                        .set_link_bandwidth(switch, port, target.bandwidth())
                        .await?;
                }
            }
        }
        let timestamp = now_secs();

        log::info!(
            "[link-state] {link} -> {} ({} Mbit/s)",
            target.health(),
            target.bandwidth()
        );
        self.current.insert(link.normalized(), target);
        self.change_counter += 1;
        Ok(StepOutcome {
            mutated: true,
            timestamp,
        })
    }

    async fn set_admin_state(
        &self,
        endpoints: &[(SwitchId, u32); 2],
        state: AdminState,
    ) -> Result<(), LinkStateError> {
        for (switch, port) in endpoints {
            self.fabric
                .set_link_admin_state(*switch, *port, state)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::{FabricCall, FakeFabric};

    fn s(n: u32) -> SwitchId {
        SwitchId::new(n).unwrap()
    }

    fn ports() -> PortMap {
        let mut ports = PortMap::default();
        ports.insert(s(1), s(2), 2);
        ports.insert(s(2), s(1), 3);
        ports
    }

    #[test]
    fn intent_record() {
        let intent = TransitionIntent {
            state: LinkState::Degraded(400),
            link: Link(s(3), s(7)),
        };
        assert_eq!(intent.serialize(), "pnlos\n400\n2\n6\n");
        let cut = TransitionIntent {
            state: LinkState::Outage,
            link: Link(s(3), s(7)),
        };
        assert_eq!(cut.serialize(), "fnlos\n0\n2\n6\n");
    }

    #[test]
    fn degraded_bandwidth_bounds() {
        assert!(LinkState::Degraded(0).validate().is_err());
        assert!(LinkState::Degraded(FULL_BANDWIDTH).validate().is_err());
        assert!(LinkState::Degraded(1).validate().is_ok());
        assert!(LinkState::Outage.validate().is_ok());
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let state = LinkState::for_health(LinkHealth::Degraded, &mut rng);
            assert!(state.validate().is_ok());
        }
    }

    #[tokio::test]
    async fn invalid_bandwidth_is_not_applied() {
        let dir = tempfile::tempdir().unwrap();
        let intent = dir.path().join("intent");
        let fabric = FakeFabric::default();
        let ports = ports();
        let mut ctrl = LinkStateController::new(&fabric, &ports, &intent);
        assert!(matches!(
            ctrl.apply(Link(s(1), s(2)), LinkState::Degraded(0)).await,
            Err(LinkStateError::InvalidBandwidth(0))
        ));
        assert!(fabric.calls().is_empty());
        assert!(!intent.exists());
        assert_eq!(ctrl.change_counter(), 0);
    }

    #[tokio::test]
    async fn duplicate_target_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let intent = dir.path().join("failed_link_bw.txt");
        let fabric = FakeFabric::default();
        let ports = ports();
        let link = Link(s(1), s(2));
        let mut ctrl = LinkStateController::new(&fabric, &ports, &intent);

        let first = ctrl.apply(link, LinkState::Degraded(300)).await.unwrap();
        assert!(first.mutated);
        let calls = fabric.calls().len();
        let content = std::fs::read_to_string(&intent).unwrap();

        let second = ctrl.apply(link, LinkState::Degraded(500)).await.unwrap();
        assert!(!second.mutated);
        assert_eq!(fabric.calls().len(), calls);
        assert_eq!(std::fs::read_to_string(&intent).unwrap(), content);
        assert_eq!(ctrl.change_counter(), 1);
    }

    #[tokio::test]
    async fn outage_and_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let intent = dir.path().join("failed_link_bw.txt");
        let fabric = FakeFabric::default();
        let ports = ports();
        let link = Link(s(2), s(1));
        let mut ctrl = LinkStateController::new(&fabric, &ports, &intent).always_reset(false);

        ctrl.apply(link, LinkState::Outage).await.unwrap();
        assert_eq!(
            fabric.take_calls(),
            vec![
                FabricCall::Admin(s(2), 3, AdminState::Down),
                FabricCall::Admin(s(1), 2, AdminState::Down),
            ]
        );
        assert_eq!(std::fs::read_to_string(&intent).unwrap(), "fnlos\n0\n1\n0\n");

        ctrl.apply(link, LinkState::FullService).await.unwrap();
        assert_eq!(
            fabric.take_calls(),
            vec![
                FabricCall::Admin(s(2), 3, AdminState::Down),
                FabricCall::Admin(s(1), 2, AdminState::Down),
                FabricCall::Admin(s(2), 3, AdminState::Up),
                FabricCall::Admin(s(1), 2, AdminState::Up),
                FabricCall::Bandwidth(s(2), 3, FULL_BANDWIDTH),
                FabricCall::Bandwidth(s(1), 2, FULL_BANDWIDTH),
            ]
        );

        // no reset needed between two non-outage states
        ctrl.apply(link, LinkState::Degraded(10)).await.unwrap();
        assert_eq!(
            fabric.take_calls(),
            vec![
                FabricCall::Bandwidth(s(2), 3, 10),
                FabricCall::Bandwidth(s(1), 2, 10),
            ]
        );
        assert_eq!(ctrl.change_counter(), 3);
        assert_eq!(ctrl.current(&Link(s(1), s(2))), Some(LinkState::Degraded(10)));
    }

    #[tokio::test]
    async fn always_reset_cycles_the_link() {
        let dir = tempfile::tempdir().unwrap();
        let fabric = FakeFabric::default();
        let ports = ports();
        let link = Link(s(1), s(2));
        let mut ctrl = LinkStateController::new(&fabric, &ports, dir.path().join("intent"));
        ctrl.apply(link, LinkState::FullService).await.unwrap();
        fabric.take_calls();
        ctrl.apply(link, LinkState::Degraded(20)).await.unwrap();
        let calls = fabric.take_calls();
        assert_eq!(calls.len(), 6);
        assert_eq!(calls[0], FabricCall::Admin(s(1), 2, AdminState::Down));
    }

    #[tokio::test]
    async fn unknown_link() {
        let dir = tempfile::tempdir().unwrap();
        let fabric = FakeFabric::default();
        let ports = ports();
        let mut ctrl = LinkStateController::new(&fabric, &ports, dir.path().join("intent"));
        assert!(matches!(
            ctrl.apply(Link(s(1), s(5)), LinkState::Outage).await,
            Err(LinkStateError::Topology(_))
        ));
        assert!(fabric.calls().is_empty());
    }
}
