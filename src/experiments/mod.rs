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
//! Module running failure-recovery experiments on the testbed, one trial at a time.

pub mod config;
pub mod runner;
pub mod trial;

pub use config::*;
pub use runner::*;
pub use trial::*;

use std::path::Path;

use crate::util::PathBufExt;

/// Files exchanged with the recovery application through the working directory.
pub const HAND_OFF_FILES: [&str; 17] = [
    "host_to_addr_location.json",
    "Algorithm_state->Ready",
    "Algorithm_state->Error",
    "traffic_flows.pkl",
    "traffic_flow_paths.txt",
    "traffic_flow_paths.pkl",
    "remove",
    "BW.txt",
    "label.txt",
    "linkdown_mode.txt",
    "mode.txt",
    "flow_throughput.txt",
    "result_folder_label.txt",
    "failed_link_bw.txt",
    "traffic_flow_backup_paths.txt",
    "config_done",
    "traffic_mac.txt",
];

/// Remove all hand-off files from the working directory. Returns the number of removed files.
pub fn cleanup_files(work_dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for file in HAND_OFF_FILES {
        let path = work_dir.then(file);
        if path.is_file() {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    log::debug!("[control-loop] removed {removed} hand-off files");
    Ok(removed)
}
