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
//! Print the failure pattern every trial of a sweep would execute.

use std::path::PathBuf;

use clap::Parser;
use rand::{rngs::StdRng, SeedableRng};

use frex::{experiments::ExperimentConfig, schedule::generate_failure_patterns, util};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Experiment configuration.
    config_file: PathBuf,
    /// Overwrite the seed of the configuration.
    #[arg(short, long)]
    seed: Option<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    util::init_logging();
    let args = Args::parse();

    let config = ExperimentConfig::load(&args.config_file)?;
    let mut rng = match args.seed.or(config.seed) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let patterns = generate_failure_patterns(
        config.trial[0]..=config.trial[1],
        &config.schedule_policy(),
        &mut rng,
    )?;
    for (trial, pattern) in patterns {
        let states = pattern.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        println!("{trial}: {}", states.join(" "));
    }
    Ok(())
}
