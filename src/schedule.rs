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
//! Generation of failure schedules: the sequence of link-health states a failed link goes through.

use std::{collections::BTreeMap, ops::RangeInclusive, time::Duration};

use rand::{distributions::WeightedIndex, prelude::Distribution, Rng};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};
use thiserror::Error;

/// The fixed single-link pattern: full service, degraded, outage, degraded, full service.
pub const FIXED_PATTERN: [LinkHealth; 5] = [
    LinkHealth::FullService,
    LinkHealth::Degraded,
    LinkHealth::Outage,
    LinkHealth::Degraded,
    LinkHealth::FullService,
];

/// Number of Markov steps after the initial state, if not configured otherwise.
pub const DEFAULT_MARKOV_STEPS: usize = 4;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Row {row} of the transition matrix has a negative entry")]
    NegativeProbability { row: usize },
    #[error("Row {row} of the transition matrix sums to {sum} instead of 1")]
    RowSum { row: usize, sum: f64 },
    #[error("Invalid state index {0}")]
    InvalidState(usize),
    #[error("A multi-link schedule needs at least one link")]
    NoLinks,
}

/// Health of a link, without the concrete bandwidth of a degraded link.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumIter,
    Serialize,
    Deserialize,
)]
pub enum LinkHealth {
    #[strum(serialize = "los")]
    #[serde(rename = "los")]
    FullService,
    #[strum(serialize = "pnlos")]
    #[serde(rename = "pnlos")]
    Degraded,
    #[strum(serialize = "fnlos")]
    #[serde(rename = "fnlos")]
    Outage,
}

impl LinkHealth {
    /// State index used by the Markov chain.
    pub fn index(&self) -> usize {
        match self {
            Self::FullService => 0,
            Self::Degraded => 1,
            Self::Outage => 2,
        }
    }

    pub fn from_index(i: usize) -> Result<Self, ScheduleError> {
        match i {
            0 => Ok(Self::FullService),
            1 => Ok(Self::Degraded),
            2 => Ok(Self::Outage),
            i => Err(ScheduleError::InvalidState(i)),
        }
    }
}

/// Row-stochastic transition matrix over the three link-health states.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[[f64; 3]; 3]", into = "[[f64; 3]; 3]")]
pub struct TransitionMatrix([[f64; 3]; 3]);

impl TransitionMatrix {
    pub fn new(rows: [[f64; 3]; 3]) -> Result<Self, ScheduleError> {
        for (row, probs) in rows.iter().enumerate() {
            if probs.iter().any(|p| *p < 0.0 || p.is_nan()) {
                return Err(ScheduleError::NegativeProbability { row });
            }
            let sum: f64 = probs.iter().sum();
            if (sum - 1.0).abs() > 1e-9 {
                return Err(ScheduleError::RowSum { row, sum });
            }
        }
        Ok(Self(rows))
    }

    pub fn row(&self, state: LinkHealth) -> &[f64; 3] {
        &self.0[state.index()]
    }
}

impl Default for TransitionMatrix {
    fn default() -> Self {
        Self([[0.3, 0.5, 0.2], [0.4, 0.2, 0.4], [0.3, 0.5, 0.2]])
    }
}

impl TryFrom<[[f64; 3]; 3]> for TransitionMatrix {
    type Error = ScheduleError;

    fn try_from(value: [[f64; 3]; 3]) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TransitionMatrix> for [[f64; 3]; 3] {
    fn from(value: TransitionMatrix) -> Self {
        value.0
    }
}

/// Walk the Markov chain for `steps` transitions. The result contains `steps + 1` states and begins
/// with `start`.
pub fn simulate_markov_chain<R: Rng + ?Sized>(
    matrix: &TransitionMatrix,
    start: LinkHealth,
    steps: usize,
    rng: &mut R,
) -> Result<Vec<LinkHealth>, ScheduleError> {
    let rows = matrix
        .0
        .iter()
        .enumerate()
        .map(|(row, probs)| {
            WeightedIndex::new(probs).map_err(|_| ScheduleError::RowSum {
                row,
                sum: probs.iter().sum(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut current = start;
    let mut sequence = Vec::with_capacity(steps + 1);
    sequence.push(current);
    for _ in 0..steps {
        current = LinkHealth::from_index(rows[current.index()].sample(rng))?;
        sequence.push(current);
    }
    Ok(sequence)
}

/// How the single-link failure pattern is produced.
#[derive(Clone, Debug, PartialEq)]
pub enum SchedulePolicy {
    Markov {
        steps: usize,
        matrix: TransitionMatrix,
    },
    Fixed,
}

impl SchedulePolicy {
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<LinkHealth>, ScheduleError> {
        match self {
            Self::Markov { steps, matrix } => {
                simulate_markov_chain(matrix, LinkHealth::FullService, *steps, rng)
            }
            Self::Fixed => Ok(FIXED_PATTERN.to_vec()),
        }
    }
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self::Markov {
            steps: DEFAULT_MARKOV_STEPS,
            matrix: TransitionMatrix::default(),
        }
    }
}

/// Generate the failure pattern of every trial up front, so that all algorithms evaluated in the
/// same trial observe the same pattern.
pub fn generate_failure_patterns<R: Rng + ?Sized>(
    trials: RangeInclusive<usize>,
    policy: &SchedulePolicy,
    rng: &mut R,
) -> Result<BTreeMap<usize, Vec<LinkHealth>>, ScheduleError> {
    trials
        .map(|trial| policy.generate(rng).map(|pattern| (trial, pattern)))
        .collect()
}

/// One step of a schedule. `link` indexes the failed links of the trial; a step without link only
/// observes the network.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleStep {
    pub link: Option<usize>,
    pub health: LinkHealth,
}

/// Sequence of link-health states, each held for `dwell`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureSchedule {
    pub steps: Vec<ScheduleStep>,
    pub dwell: Duration,
}

impl FailureSchedule {
    /// A pattern applied to the single failed link.
    pub fn single_link(pattern: &[LinkHealth], dwell: Duration) -> Self {
        Self {
            steps: pattern
                .iter()
                .map(|health| ScheduleStep {
                    link: Some(0),
                    health: *health,
                })
                .collect(),
            dwell,
        }
    }

    /// Baseline, then cut every link in order, then restore them in reverse order.
    pub fn multi_link(num_links: usize, dwell: Duration) -> Result<Self, ScheduleError> {
        if num_links == 0 {
            return Err(ScheduleError::NoLinks);
        }
        let baseline = ScheduleStep {
            link: None,
            health: LinkHealth::FullService,
        };
        let cut = (0..num_links).map(|i| ScheduleStep {
            link: Some(i),
            health: LinkHealth::Outage,
        });
        let restore = (0..num_links).rev().map(|i| ScheduleStep {
            link: Some(i),
            health: LinkHealth::FullService,
        });
        Ok(Self {
            steps: std::iter::once(baseline).chain(cut).chain(restore).collect(),
            dwell,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
