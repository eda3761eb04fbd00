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
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use frex::{
    controller::OnosController,
    experiments::{ExperimentConfig, ExperimentRunner},
    testbed::MininetTestbed,
    util,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Run all trials of the sweep that have no results yet.
    Run,
    /// Remove the hand-off files and destroy a leftover network.
    Clean,
}

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    #[arg(value_enum)]
    mode: Mode,
    /// Experiment configuration (`.json` is appended if the path has no extension).
    config_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    util::init_logging();
    let args = Args::parse();

    let config = ExperimentConfig::load(&args.config_file)?;
    log::info!(
        "[main] {} trials for {}",
        config.sweep().len(),
        config.user_name
    );

    let mut controller = OnosController::new(config.controller_url.clone(), &config.work_dir);
    if let Some(apps_dir) = &config.apps_dir {
        controller = controller.apps_dir(apps_dir);
    }
    let testbed = MininetTestbed::new(
        &config.work_dir,
        &config.topology_script,
        controller,
        config.poll_settings(),
    )
    .onos_reset_script(config.onos_reset_script.clone());

    let mut runner = ExperimentRunner::new(config, testbed);
    match args.mode {
        Mode::Run => {
            let results = runner.run_sweep().await?;
            let attempts: usize = results.iter().map(|r| r.attempts).sum();
            log::info!(
                "[main] finished {} trials in {attempts} attempts",
                results.len()
            );
        }
        Mode::Clean => runner.clean().await?,
    }
    Ok(())
}
