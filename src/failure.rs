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
//! Selection of the link(s) to fail in a trial.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    paths::{BackupRecord, LinkFlowIndex, PathError, PathRecord},
    topology::{HostId, Link, TrafficFlow},
};

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("No link carries any path")]
    NoCandidateLink,
    #[error("No flow has exactly two backup paths")]
    NoBackupCandidate,
    #[error("No primary path found for {0}")]
    MissingPrimaryPath(String),
    #[error("Path of {0} has less than two hops")]
    PathTooShort(String),
    #[error("Both selected links are {0}")]
    IdenticalLinks(Link),
    #[error("{0}")]
    Path(#[from] PathError),
}

/// The link(s) failed during a trial and the active flows that are routed across them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFailure {
    pub links: Vec<Link>,
    pub affected_flows: Vec<TrafficFlow>,
}

/// Pick the link with the most flows (counted in both directions). Ties go to the link seen first.
pub fn select_single_link(index: &LinkFlowIndex) -> Result<LinkFailure, SelectionError> {
    let mut best: Option<(Link, usize)> = None;
    for link in index.links() {
        let impact = index.impact(link);
        if best.map(|(_, b)| impact > b).unwrap_or(true) {
            best = Some((*link, impact));
        }
    }
    let (link, impact) = best.ok_or(SelectionError::NoCandidateLink)?;

    let affected_flows = index
        .flows(&link)
        .iter()
        .chain(index.flows(&link.reverse()))
        .copied()
        .unique()
        .collect_vec();

    log::info!("[failure] selected link {link} carrying {impact} flows");
    Ok(LinkFailure {
        links: vec![link],
        affected_flows,
    })
}

/// Pick two links from the first flow that has exactly two backup paths: the first link of its
/// primary path, and the first link of its first backup path.
pub fn select_multiple_links(
    primary: &[PathRecord],
    backup: &[BackupRecord],
    active: &[TrafficFlow],
) -> Result<LinkFailure, SelectionError> {
    let candidate = backup
        .iter()
        .find(|r| r.entries.len() == 2)
        .ok_or(SelectionError::NoBackupCandidate)?;
    let main = primary
        .iter()
        .find(|p| p.matches(&candidate.addr))
        .ok_or_else(|| SelectionError::MissingPrimaryPath(candidate.addr.clone()))?;
    let first = main
        .links()
        .next()
        .ok_or_else(|| SelectionError::PathTooShort(candidate.addr.clone()))?;

    let (_, backup_hops) = &candidate.entries[0];
    let second = match backup_hops.as_slice() {
        [a, b, ..] => Link(*a, *b),
        _ => return Err(SelectionError::PathTooShort(candidate.addr.clone())),
    };
    if first.same_undirected(&second) {
        return Err(SelectionError::IdenticalLinks(first));
    }

    let src = HostId::new(main.hops[0], 0);
    let dst = HostId::new(main.hops[main.hops.len() - 1], 0);
    let endpoints = TrafficFlow::new(src, dst);
    let affected_flows = [endpoints, endpoints.reverse()]
        .into_iter()
        .filter(|f| active.contains(f))
        .collect_vec();

    log::info!("[failure] selected links {first} and {second}, affecting {affected_flows:?}");
    Ok(LinkFailure {
        links: vec![first, second],
        affected_flows,
    })
}
