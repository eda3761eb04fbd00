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
//! Switches, hosts and links of the emulated network, and the flows that run across it.

use std::{collections::HashMap, fmt, str::FromStr};

use itertools::Itertools;
use rand::{seq::index::sample, Rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Edge set of the 20-switch reference topology (1-based switch numbers).
const REFERENCE_EDGES: [(u32, u32); 35] = [
    (1, 2),
    (2, 3),
    (3, 4),
    (4, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (8, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (12, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (16, 17),
    (17, 18),
    (18, 19),
    (19, 20),
    (1, 20),
    (6, 2),
    (1, 17),
    (9, 11),
    (17, 14),
    (5, 11),
    (20, 9),
    (4, 18),
    (18, 6),
    (14, 11),
    (10, 4),
    (3, 19),
    (5, 12),
    (9, 12),
    (2, 16),
    (13, 3),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("Cannot parse switch identifier {0:?}")]
    InvalidSwitch(String),
    #[error("Cannot parse host identifier {0:?}")]
    InvalidHost(String),
    #[error("A topology with {vertices} switches cannot have {edges} links")]
    InvalidSize { vertices: usize, edges: usize },
    #[error("Link {0} is not part of the topology")]
    UnknownLink(Link),
    #[error("Cannot generate {requested} distinct flows, only {available} host pairs exist")]
    TooManyFlows { requested: usize, available: usize },
}

/// A switch, numbered from 1 and displayed as `s<n>`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SwitchId(u32);

impl SwitchId {
    /// Create a switch from its 1-based number.
    pub fn new(num: u32) -> Result<Self, TopologyError> {
        if num == 0 {
            Err(TopologyError::InvalidSwitch(num.to_string()))
        } else {
            Ok(Self(num))
        }
    }

    /// Create a switch from a 0-based ordinal.
    pub fn from_zero_based(ordinal: u32) -> Result<Self, TopologyError> {
        ordinal
            .checked_add(1)
            .map(Self)
            .ok_or_else(|| TopologyError::InvalidSwitch(ordinal.to_string()))
    }

    pub fn num(&self) -> u32 {
        self.0
    }

    pub fn zero_based(&self) -> u32 {
        self.0.saturating_sub(1)
    }
}

impl fmt::Display for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl FromStr for SwitchId {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix('s').map(str::parse::<u32>) {
            Some(Ok(n)) if n > 0 => Ok(Self(n)),
            _ => Err(TopologyError::InvalidSwitch(s.to_string())),
        }
    }
}

impl TryFrom<String> for SwitchId {
    type Error = TopologyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SwitchId> for String {
    fn from(value: SwitchId) -> Self {
        value.to_string()
    }
}

/// A host attached to a switch, displayed as `h<switch>_<index>`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostId {
    pub switch: SwitchId,
    pub index: u32,
}

impl HostId {
    pub fn new(switch: SwitchId, index: u32) -> Self {
        Self { switch, index }
    }

    /// Address assigned to the host inside the emulated network.
    pub fn ip(&self) -> String {
        format!("10.0.0.{}", self.switch.num())
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}_{}", self.switch.num(), self.index)
    }
}

impl FromStr for HostId {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || TopologyError::InvalidHost(s.to_string());
        let (switch, index) = s.strip_prefix('h').and_then(|x| x.split_once('_')).ok_or_else(err)?;
        let switch = switch.parse::<u32>().ok().filter(|n| *n > 0).ok_or_else(err)?;
        let index = index.parse::<u32>().map_err(|_| err())?;
        Ok(Self::new(SwitchId(switch), index))
    }
}

impl TryFrom<String> for HostId {
    type Error = TopologyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HostId> for String {
    fn from(value: HostId) -> Self {
        value.to_string()
    }
}

/// A directed switch-to-switch link. The undirected link is the pair `{l, l.reverse()}`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Link(pub SwitchId, pub SwitchId);

impl Link {
    pub fn reverse(&self) -> Self {
        Self(self.1, self.0)
    }

    /// The direction with the smaller switch first.
    pub fn normalized(&self) -> Self {
        if self.0 <= self.1 {
            *self
        } else {
            self.reverse()
        }
    }

    /// Whether both links describe the same undirected link.
    pub fn same_undirected(&self, other: &Link) -> bool {
        self.normalized() == other.normalized()
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.0, self.1)
    }
}

/// An ordered pair of hosts exchanging traffic.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrafficFlow {
    pub src: HostId,
    pub dst: HostId,
}

impl TrafficFlow {
    pub fn new(src: HostId, dst: HostId) -> Self {
        Self { src, dst }
    }

    pub fn reverse(&self) -> Self {
        Self::new(self.dst, self.src)
    }
}

impl fmt::Display for TrafficFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.src, self.dst)
    }
}

/// Switches, undirected switch links and the number of hosts attached to every switch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub switches: Vec<SwitchId>,
    pub edges: Vec<Link>,
    pub hosts_per_switch: u32,
}

impl Topology {
    /// The 20-switch, 35-link reference topology.
    pub fn reference() -> Self {
        Self {
            switches: (1..=20).map(SwitchId).collect(),
            edges: REFERENCE_EDGES
                .iter()
                .map(|(a, b)| Link(SwitchId(*a), SwitchId(*b)))
                .collect(),
            hosts_per_switch: 1,
        }
    }

    /// A ring over `vertices` switches, completed with random chords until it has `edges` links.
    pub fn ring_with_chords<R: Rng + ?Sized>(
        vertices: usize,
        edges: usize,
        rng: &mut R,
    ) -> Result<Self, TopologyError> {
        if vertices < 3 || edges < vertices || edges > vertices * (vertices - 1) / 2 {
            return Err(TopologyError::InvalidSize { vertices, edges });
        }
        let switches: Vec<SwitchId> = (1..=vertices as u32).map(SwitchId).collect();
        let mut links: Vec<Link> = switches
            .iter()
            .tuple_windows()
            .map(|(a, b)| Link(*a, *b))
            .collect();
        links.push(Link(switches[0], switches[vertices - 1]));

        while links.len() < edges {
            let pick = sample(rng, vertices, 2);
            let chord = Link(switches[pick.index(0)], switches[pick.index(1)]);
            if !links.iter().any(|l| l.same_undirected(&chord)) {
                links.push(chord);
            }
        }

        Ok(Self {
            switches,
            edges: links,
            hosts_per_switch: 1,
        })
    }

    /// The reference topology if the size matches it, a random ring with chords otherwise.
    pub fn for_size<R: Rng + ?Sized>(
        vertices: usize,
        edges: usize,
        rng: &mut R,
    ) -> Result<Self, TopologyError> {
        if vertices == 20 && edges == REFERENCE_EDGES.len() {
            Ok(Self::reference())
        } else {
            Self::ring_with_chords(vertices, edges, rng)
        }
    }

    pub fn hosts(&self) -> impl Iterator<Item = HostId> + '_ {
        self.switches.iter().flat_map(move |s| {
            (0..self.hosts_per_switch).map(move |i| HostId::new(*s, i))
        })
    }

    /// Whether the undirected link exists.
    pub fn has_link(&self, link: &Link) -> bool {
        self.edges.iter().any(|e| e.same_undirected(link))
    }

    /// Check that every consecutive hop pair of `path` is a link of the topology.
    pub fn validate_path(&self, path: &[SwitchId]) -> Result<(), TopologyError> {
        for (a, b) in path.iter().tuple_windows() {
            let link = Link(*a, *b);
            if !self.has_link(&link) {
                return Err(TopologyError::UnknownLink(link));
            }
        }
        Ok(())
    }

    /// Draw `count` flows between random pairs of distinct switches. No flow appears twice, in
    /// either direction.
    pub fn generate_flows<R: Rng + ?Sized>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<TrafficFlow>, TopologyError> {
        let n = self.switches.len();
        let available = n * n.saturating_sub(1) / 2 * self.hosts_per_switch as usize;
        if count > available {
            return Err(TopologyError::TooManyFlows {
                requested: count,
                available,
            });
        }

        let mut flows: Vec<TrafficFlow> = Vec::with_capacity(count);
        while flows.len() < count {
            let index = rng.gen_range(0..self.hosts_per_switch);
            let pick = sample(rng, n, 2);
            let flow = TrafficFlow::new(
                HostId::new(self.switches[pick.index(0)], index),
                HostId::new(self.switches[pick.index(1)], index),
            );
            if !flows.iter().any(|f| *f == flow || *f == flow.reverse()) {
                flows.push(flow);
            }
        }
        Ok(flows)
    }
}

/// Port numbers of the switch-to-switch links, as reported by the deployed fabric.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortMap(HashMap<SwitchId, HashMap<SwitchId, u32>>);

impl PortMap {
    pub fn insert(&mut self, switch: SwitchId, neighbor: SwitchId, port: u32) {
        self.0.entry(switch).or_default().insert(neighbor, port);
    }

    /// Port of `switch` that faces `neighbor`.
    pub fn port(&self, switch: SwitchId, neighbor: SwitchId) -> Option<u32> {
        self.0.get(&switch).and_then(|n| n.get(&neighbor)).copied()
    }

    /// Ports of both endpoints of the link, in the order of the link.
    pub fn endpoints(&self, link: &Link) -> Result<[(SwitchId, u32); 2], TopologyError> {
        match (self.port(link.0, link.1), self.port(link.1, link.0)) {
            (Some(a), Some(b)) => Ok([(link.0, a), (link.1, b)]),
            _ => Err(TopologyError::UnknownLink(*link)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashSet;

    fn s(n: u32) -> SwitchId {
        SwitchId::new(n).unwrap()
    }

    #[test]
    fn parse_identifiers() {
        assert_eq!("s12".parse::<SwitchId>().unwrap(), s(12));
        assert!("s0".parse::<SwitchId>().is_err());
        assert!("12".parse::<SwitchId>().is_err());
        assert_eq!(s(4).zero_based(), 3);
        assert_eq!(SwitchId::from_zero_based(3).unwrap(), s(4));
        assert!(SwitchId::from_zero_based(u32::MAX).is_err());
        assert!(SwitchId::new(0).is_err());

        let h: HostId = "h20_0".parse().unwrap();
        assert_eq!(h, HostId::new(s(20), 0));
        assert_eq!(h.to_string(), "h20_0");
        assert_eq!(h.ip(), "10.0.0.20");
        assert!("h_0".parse::<HostId>().is_err());
        assert!("x1_0".parse::<HostId>().is_err());
    }

    #[test]
    fn serde_as_strings() {
        let link = Link(s(1), s(2));
        assert_eq!(serde_json::to_string(&link).unwrap(), r#"["s1","s2"]"#);
        let mut ports = PortMap::default();
        ports.insert(s(1), s(2), 3);
        let json = serde_json::to_string(&ports).unwrap();
        assert_eq!(json, r#"{"s1":{"s2":3}}"#);
        let back: PortMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back.port(s(1), s(2)), Some(3));
        assert_eq!(back.port(s(2), s(1)), None);
    }

    #[test]
    fn reference_topology() {
        let topo = Topology::reference();
        assert_eq!(topo.switches.len(), 20);
        assert_eq!(topo.edges.len(), 35);
        let unique: HashSet<Link> = topo.edges.iter().map(Link::normalized).collect();
        assert_eq!(unique.len(), 35);
        assert!(topo.has_link(&Link(s(20), s(1))));
        assert!(topo.validate_path(&[s(1), s(2), s(6), s(18)]).is_ok());
        assert_eq!(
            topo.validate_path(&[s(1), s(3)]),
            Err(TopologyError::UnknownLink(Link(s(1), s(3))))
        );
    }

    #[test]
    fn ring_with_chords() {
        let mut rng = StdRng::seed_from_u64(7);
        let topo = Topology::ring_with_chords(10, 15, &mut rng).unwrap();
        assert_eq!(topo.edges.len(), 15);
        let unique: HashSet<Link> = topo.edges.iter().map(Link::normalized).collect();
        assert_eq!(unique.len(), 15);
        for i in 1..10 {
            assert!(topo.has_link(&Link(s(i), s(i + 1))));
        }
        assert!(topo.has_link(&Link(s(1), s(10))));
        assert_eq!((topo.switches.len(), topo.edges.len()), (10, 15));

        assert!(Topology::ring_with_chords(4, 7, &mut rng).is_err());
        assert!(Topology::ring_with_chords(4, 3, &mut rng).is_err());
    }

    #[test]
    fn flows_are_unique_in_both_directions() {
        let mut rng = StdRng::seed_from_u64(1);
        let topo = Topology::reference();
        let flows = topo.generate_flows(30, &mut rng).unwrap();
        assert_eq!(flows.len(), 30);
        for (i, f) in flows.iter().enumerate() {
            assert_ne!(f.src.switch, f.dst.switch);
            assert!(!flows[i + 1..]
                .iter()
                .any(|g| g == f || *g == f.reverse()));
        }

        let small = Topology::ring_with_chords(3, 3, &mut rng).unwrap();
        assert_eq!(small.generate_flows(3, &mut rng).unwrap().len(), 3);
        assert_eq!(
            small.generate_flows(4, &mut rng),
            Err(TopologyError::TooManyFlows {
                requested: 4,
                available: 3
            })
        );
    }

    #[test]
    fn port_map_endpoints() {
        let mut ports = PortMap::default();
        ports.insert(s(1), s(2), 2);
        ports.insert(s(2), s(1), 3);
        assert_eq!(
            ports.endpoints(&Link(s(2), s(1))).unwrap(),
            [(s(2), 3), (s(1), 2)]
        );
        assert!(ports.endpoints(&Link(s(1), s(3))).is_err());
    }
}
