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
//! Parsing of the forwarding and backup paths reported by the controller application, and the
//! index from links to the traffic flows that cross them.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::topology::{HostId, Link, SwitchId, Topology, TopologyError, TrafficFlow};

lazy_static! {
    static ref BACKUP_ENTRY: Regex = Regex::new(r"(\d+)=\[([^\]]*)\]").unwrap();
}

#[derive(Debug, Error)]
pub enum PathError {
    #[error("No path records available yet")]
    Unavailable,
    #[error("Malformed path record {line:?}: {reason}")]
    Malformed { line: String, reason: &'static str },
    #[error("Cannot interpret hop {0:?}")]
    UnknownHop(String),
    #[error("Path does not match the topology: {0}")]
    Topology(#[from] TopologyError),
}

/// Translate a hop identifier into a switch.
///
/// Accepts OpenFlow datapath ids (`of:000000000000000a` is `s10`), zero-based ordinals (`3` is
/// `s4`) and switch names (`s4`).
pub fn normalize_hop(hop: &str) -> Result<SwitchId, PathError> {
    let hop = hop.trim().trim_matches(|c| c == '\'' || c == '"');
    let err = || PathError::UnknownHop(hop.to_string());
    if let Some(dpid) = hop.strip_prefix("of:") {
        let num = u32::from_str_radix(dpid, 16).map_err(|_| err())?;
        SwitchId::new(num).map_err(|_| err())
    } else if hop.starts_with('s') {
        hop.parse().map_err(|_| err())
    } else {
        hop.parse::<u32>()
            .ok()
            .and_then(|ordinal| SwitchId::from_zero_based(ordinal).ok())
            .ok_or_else(err)
    }
}

fn parse_hops(list: &str) -> Result<Vec<SwitchId>, PathError> {
    list.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(normalize_hop)
        .collect()
}

/// The forwarding path of one flow: `<src-addr>,<dst-addr>|[<hop>, ...]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathRecord {
    pub src_addr: String,
    pub dst_addr: String,
    pub hops: Vec<SwitchId>,
}

impl PathRecord {
    pub fn parse(line: &str) -> Result<Self, PathError> {
        let malformed = |reason| PathError::Malformed {
            line: line.to_string(),
            reason,
        };
        let (addrs, hops) = line.split_once('|').ok_or_else(|| malformed("missing '|'"))?;
        let (src, dst) = addrs
            .split_once(',')
            .ok_or_else(|| malformed("missing address pair"))?;
        Ok(Self {
            src_addr: src.trim().to_lowercase(),
            dst_addr: dst.trim().to_lowercase(),
            hops: parse_hops(hops)?,
        })
    }

    /// Whether this record belongs to the (lowercase) address key `addr`.
    pub fn matches(&self, addr: &str) -> bool {
        let addr = addr.trim().to_lowercase();
        self.src_addr.contains(&addr)
            || self.dst_addr.contains(&addr)
            || format!("{},{}", self.src_addr, self.dst_addr).contains(&addr)
    }

    /// Every consecutive hop pair, in path order.
    pub fn links(&self) -> impl Iterator<Item = Link> + '_ {
        self.hops.windows(2).map(|w| Link(w[0], w[1]))
    }
}

/// Parse the content of the forwarding path file. An empty source is not an error of the records
/// but means the controller did not write them yet.
pub fn parse_path_records(text: &str) -> Result<Vec<PathRecord>, PathError> {
    let records = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(PathRecord::parse)
        .collect::<Result<Vec<_>, _>>()?;
    if records.is_empty() {
        Err(PathError::Unavailable)
    } else {
        Ok(records)
    }
}

/// Check that all records only use links of the topology.
pub fn validate_records(records: &[PathRecord], topo: &Topology) -> Result<(), PathError> {
    for record in records {
        topo.validate_path(&record.hops)?;
    }
    Ok(())
}

/// Backup paths of one flow: `<addr>|{<k>=[<hop>, ...], ...}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupRecord {
    pub addr: String,
    pub entries: Vec<(u32, Vec<SwitchId>)>,
}

impl BackupRecord {
    pub fn parse(line: &str) -> Result<Self, PathError> {
        let (addr, paths) = line.split_once('|').ok_or_else(|| PathError::Malformed {
            line: line.to_string(),
            reason: "missing '|'",
        })?;
        let mut entries = Vec::new();
        for cap in BACKUP_ENTRY.captures_iter(paths) {
            let k = cap[1].parse::<u32>().map_err(|_| PathError::Malformed {
                line: line.to_string(),
                reason: "invalid backup index",
            })?;
            entries.push((k, parse_hops(&cap[2])?));
        }
        Ok(Self {
            addr: addr.trim().to_lowercase(),
            entries,
        })
    }
}

pub fn parse_backup_records(text: &str) -> Result<Vec<BackupRecord>, PathError> {
    let records = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(BackupRecord::parse)
        .collect::<Result<Vec<_>, _>>()?;
    if records.is_empty() {
        Err(PathError::Unavailable)
    } else {
        Ok(records)
    }
}

/// Mapping from (lowercase) host addresses to hosts, written at deployment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressBook(HashMap<String, HostId>);

impl AddressBook {
    pub fn insert(&mut self, addr: impl AsRef<str>, host: HostId) {
        self.0.insert(addr.as_ref().to_lowercase(), host);
    }

    pub fn host(&self, addr: &str) -> Option<HostId> {
        self.0.get(&addr.to_lowercase()).copied()
    }

    pub fn addr(&self, host: HostId) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, h)| **h == host)
            .map(|(a, _)| a.as_str())
    }
}

impl FromIterator<(String, HostId)> for AddressBook {
    fn from_iter<T: IntoIterator<Item = (String, HostId)>>(iter: T) -> Self {
        let mut book = Self::default();
        for (addr, host) in iter {
            book.insert(addr, host);
        }
        book
    }
}

/// For every directed link, the active flows forwarded across it in that direction.
///
/// Both directions of every traversed link are present as keys, and the links keep the order in
/// which they were first seen.
#[derive(Clone, Debug, Default)]
pub struct LinkFlowIndex {
    order: Vec<Link>,
    flows: HashMap<Link, Vec<TrafficFlow>>,
}

impl LinkFlowIndex {
    pub fn build(
        records: &[PathRecord],
        addresses: &AddressBook,
        active: &[TrafficFlow],
    ) -> Self {
        let mut index = Self::default();
        for record in records {
            let flow = match (addresses.host(&record.src_addr), addresses.host(&record.dst_addr)) {
                (Some(src), Some(dst)) => Some(TrafficFlow::new(src, dst)),
                _ => {
                    log::debug!(
                        "[paths] no hosts known for {},{}",
                        record.src_addr,
                        record.dst_addr
                    );
                    None
                }
            };
            let flow = flow.filter(|f| active.contains(f));
            index.insert_path(&record.hops, flow);
        }
        index
    }

    /// Register all links of `hops`. The flow is added to each link in the traversed direction.
    pub fn insert_path(&mut self, hops: &[SwitchId], flow: Option<TrafficFlow>) {
        for w in hops.windows(2) {
            let link = Link(w[0], w[1]);
            self.touch(link);
            self.touch(link.reverse());
            if let Some(flow) = flow {
                self.flows.entry(link).or_default().push(flow);
            }
        }
    }

    fn touch(&mut self, link: Link) {
        if !self.flows.contains_key(&link) {
            self.order.push(link);
            self.flows.insert(link, Vec::new());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// All directed links, in first-seen order.
    pub fn links(&self) -> &[Link] {
        &self.order
    }

    pub fn flows(&self, link: &Link) -> &[TrafficFlow] {
        self.flows.get(link).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of flows crossing the link in either direction.
    pub fn impact(&self, link: &Link) -> usize {
        self.flows(link).len() + self.flows(&link.reverse()).len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn s(n: u32) -> SwitchId {
        SwitchId::new(n).unwrap()
    }

    fn h(n: u32) -> HostId {
        HostId::new(s(n), 0)
    }

    #[test]
    fn hop_encodings() {
        assert_eq!(normalize_hop("of:000000000000000a").unwrap(), s(10));
        assert_eq!(normalize_hop("3").unwrap(), s(4));
        assert_eq!(normalize_hop(" 's4' ").unwrap(), s(4));
        assert!(normalize_hop("of:zz").is_err());
        assert!(normalize_hop("x").is_err());
    }

    #[test]
    fn out_of_range_hops() {
        assert!(matches!(
            normalize_hop("4294967295"),
            Err(PathError::UnknownHop(_))
        ));
        assert_eq!(normalize_hop("4294967294").unwrap().num(), u32::MAX);
        assert!(matches!(
            normalize_hop("of:0000000000000000"),
            Err(PathError::UnknownHop(_))
        ));
        assert!(normalize_hop("s0").is_err());
    }

    #[test]
    fn parse_records() {
        let text = "00:00:00:00:00:01,00:00:00:00:00:02|[0, 1, 2]\n\n\
                    00:00:00:00:00:02,00:00:00:00:00:01|[of:0000000000000003, of:0000000000000002]\n";
        let records = parse_path_records(text).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].hops, vec![s(1), s(2), s(3)]);
        assert_eq!(records[1].hops, vec![s(3), s(2)]);
        assert_eq!(records[1].src_addr, "00:00:00:00:00:02");
        assert!(matches!(parse_path_records(""), Err(PathError::Unavailable)));
        assert!(matches!(
            parse_path_records("garbage"),
            Err(PathError::Malformed { .. })
        ));
    }

    #[test]
    fn parse_backup() {
        let rec = BackupRecord::parse("AA:BB|{0=[4, 5, 6], 1=[4, 7]}").unwrap();
        assert_eq!(rec.addr, "aa:bb");
        assert_eq!(
            rec.entries,
            vec![(0, vec![s(5), s(6), s(7)]), (1, vec![s(5), s(8)])]
        );
        assert!(matches!(
            parse_backup_records("\n"),
            Err(PathError::Unavailable)
        ));
    }

    #[test]
    fn both_directions_are_keys() {
        let addresses: AddressBook = [("A".to_string(), h(1)), ("b".to_string(), h(3))]
            .into_iter()
            .collect();
        let records = parse_path_records("a,b|[s1, s2, s3]\nb,a|[s3, s2, s1]").unwrap();
        let active = vec![TrafficFlow::new(h(1), h(3))];
        let index = LinkFlowIndex::build(&records, &addresses, &active);

        assert_eq!(
            index.links(),
            &[
                Link(s(1), s(2)),
                Link(s(2), s(1)),
                Link(s(2), s(3)),
                Link(s(3), s(2))
            ]
        );
        assert_eq!(index.flows(&Link(s(1), s(2))), &active[..]);
        // the reverse flow is not active
        assert!(index.flows(&Link(s(2), s(1))).is_empty());
        assert_eq!(index.impact(&Link(s(2), s(1))), 1);
        assert_eq!(index.impact(&Link(s(5), s(6))), 0);
    }

    #[test]
    fn records_checked_against_topology() {
        let topo = Topology::reference();
        let ok = parse_path_records("a,b|[0, 1, 5]").unwrap();
        assert!(validate_records(&ok, &topo).is_ok());
        let bad = parse_path_records("a,b|[0, 2]").unwrap();
        assert!(matches!(
            validate_records(&bad, &topo),
            Err(PathError::Topology(_))
        ));
    }
}
