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
//! Module that executes all trials of a sweep, retrying every trial until the recovery
//! application observed exactly the link transitions that were issued.

use std::{
    path::Path,
    time::{Duration, Instant},
};

use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::time::sleep;

use super::{
    cleanup_files,
    config::{ConfigError, ExperimentConfig, FailureMode, ScheduleMode, TrialParams},
    trial::{TransitionRecord, TrialPhase, TrialResult},
};
use crate::{
    controller::{wait_for_algorithm, wait_for_convergence, wait_for_paths, Controller, ControllerError},
    fabric::Fabric,
    failure::{select_multiple_links, select_single_link, SelectionError},
    link_state::{LinkState, LinkStateController, LinkStateError, StepOutcome, FULL_BANDWIDTH},
    paths::{parse_backup_records, validate_records, LinkFlowIndex, PathError},
    schedule::{generate_failure_patterns, FailureSchedule, LinkHealth, ScheduleError},
    testbed::{Testbed, TestbedError},
    topology::{Link, Topology, TopologyError},
    traffic::{start_traffic, TrafficError, TrafficGenerator, TrafficSettings},
    util::{now_secs, PathBufExt},
};

/// Transition-intent record in the working directory.
pub const INTENT_FILE: &str = "failed_link_bw.txt";

#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    #[error("Config Error: {0}")]
    Config(#[from] ConfigError),
    #[error("Schedule Error: {0}")]
    Schedule(#[from] ScheduleError),
    #[error("Topology Error: {0}")]
    Topology(#[from] TopologyError),
    #[error("Path Error: {0}")]
    Path(#[from] PathError),
    #[error("Selection Error: {0}")]
    Selection(#[from] SelectionError),
    #[error("Link State Error: {0}")]
    LinkState(#[from] LinkStateError),
    #[error("Controller Error: {0}")]
    Controller(#[from] ControllerError),
    #[error("Traffic Error: {0}")]
    Traffic(#[from] TrafficError),
    #[error("Testbed Error: {0}")]
    Testbed(#[from] TestbedError),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Recorded {recorded} link transitions, but issued {issued}")]
    Inconsistent { recorded: usize, issued: usize },
    #[error("Schedule step refers to failed link #{0}, which does not exist")]
    InvalidStep(usize),
    #[error("No failure pattern generated for trial {0}")]
    MissingPattern(usize),
    #[error("Giving up on {label} after {attempts} attempts")]
    RetriesExhausted { label: String, attempts: usize },
}

impl ExperimentError {
    /// Fatal errors abort the sweep. All others discard the attempt and retry the trial.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Schedule(_)
                | Self::Topology(_)
                | Self::Csv(_)
                | Self::InvalidStep(_)
                | Self::MissingPattern(_)
                | Self::RetriesExhausted { .. }
        )
    }
}

/// Records of an executed schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRun {
    pub records: Vec<TransitionRecord>,
    pub change_counter: usize,
}

/// Execute all steps of `schedule`, holding every state for the dwell time. `links` are the
/// failed links the steps refer to.
pub async fn execute_schedule<F, R>(
    controller: &mut LinkStateController<'_, F>,
    links: &[Link],
    schedule: &FailureSchedule,
    rng: &mut R,
) -> Result<ScheduleRun, ExperimentError>
where
    F: Fabric + ?Sized,
    R: Rng + ?Sized,
{
    let mut records = Vec::with_capacity(schedule.len());
    for (i, step) in schedule.steps.iter().enumerate() {
        let start = now_secs();
        let (link, outcome, bandwidth) = match step.link {
            Some(idx) => {
                let link = *links.get(idx).ok_or(ExperimentError::InvalidStep(idx))?;
                let target = LinkState::for_health(step.health, rng);
                let outcome = controller.apply(link, target).await?;
                let bandwidth = controller
                    .current(&link)
                    .unwrap_or(target)
                    .bandwidth();
                (Some(link), outcome, bandwidth)
            }
            None => {
                let outcome = StepOutcome {
                    mutated: false,
                    timestamp: now_secs(),
                };
                (None, outcome, FULL_BANDWIDTH)
            }
        };
        log::debug!(
            "[control-loop] step {i}: {} for {:?}",
            step.health,
            schedule.dwell
        );
        sleep(schedule.dwell).await;
        records.push(TransitionRecord {
            link,
            health: step.health,
            bandwidth,
            start,
            stop: now_secs(),
            change: outcome.timestamp,
            mutated: outcome.mutated,
        });
    }
    Ok(ScheduleRun {
        records,
        change_counter: controller.change_counter(),
    })
}

pub struct ExperimentRunner<T: Testbed> {
    config: ExperimentConfig,
    testbed: T,
    rng: StdRng,
}

impl<T: Testbed> ExperimentRunner<T> {
    pub fn new(config: ExperimentConfig, testbed: T) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            testbed,
            rng,
        }
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn testbed(&self) -> &T {
        &self.testbed
    }

    /// Run every trial of the sweep whose directory does not exist yet.
    pub async fn run_sweep(&mut self) -> Result<Vec<TrialResult>, ExperimentError> {
        let policy = self.config.schedule_policy();
        let trials = self.config.trial[0]..=self.config.trial[1];
        let patterns = generate_failure_patterns(trials, &policy, &mut self.rng)?;
        for (trial, pattern) in &patterns {
            log::debug!("[control-loop] pattern of trial {trial}: {pattern:?}");
        }

        let trace_dir = self.config.trace_dir();
        std::fs::create_dir_all(&trace_dir)?;

        let points = self.config.sweep();
        let bar = ProgressBar::new(points.len() as u64);
        if let Ok(style) = ProgressStyle::with_template("{wide_bar} {pos}/{len} time: {elapsed}, eta: {msg} ") {
            bar.set_style(style);
        }
        bar.set_message("?");
        bar.tick();

        let start_time = Instant::now();
        let mut executed = 0;
        let mut results = Vec::new();
        for params in points {
            let label = params.label();
            if trace_dir.as_path().then(&label).is_dir() {
                log::info!("[control-loop] {label} exists already, skipping");
                bar.inc(1);
                continue;
            }
            let pattern = match self.config.failure_mode {
                FailureMode::Single => patterns
                    .get(&params.trial)
                    .cloned()
                    .ok_or(ExperimentError::MissingPattern(params.trial))?,
                FailureMode::Multiple => Vec::new(),
            };

            log::info!("[control-loop] starting {label}");
            let result = self.run_trial(&params, &pattern).await?;
            if let Some(out) = &self.config.output_file {
                result.summary().append_to(out)?;
            }
            results.push(result);

            executed += 1;
            bar.inc(1);
            let remaining = bar.length().unwrap_or(0).saturating_sub(bar.position());
            let per_trial = start_time.elapsed().as_secs_f64() / executed as f64;
            bar.set_message(
                HumanDuration(Duration::from_secs_f64(remaining as f64 * per_trial)).to_string(),
            );
        }
        bar.finish();
        Ok(results)
    }

    /// Run one trial until it is accepted, or until the attempts are exhausted.
    pub async fn run_trial(
        &mut self,
        params: &TrialParams,
        pattern: &[LinkHealth],
    ) -> Result<TrialResult, ExperimentError> {
        let label = params.label();
        let trial_dir = self.config.trace_dir().then(&label);
        let mut attempts = 0;
        loop {
            attempts += 1;
            log::info!("[control-loop] {label}: attempt {attempts}");
            match self.attempt(params, pattern, &trial_dir).await {
                Ok(mut result) => {
                    result.attempts = attempts;
                    result.persist(&trial_dir)?;
                    cleanup_files(&self.config.work_dir)?;
                    log::info!("[control-loop] {label}: {}", TrialPhase::Accepted);
                    return Ok(result);
                }
                Err(e) => {
                    log::error!("[control-loop] {label}: {e}");
                    self.discard(&trial_dir);
                    if e.is_fatal() {
                        return Err(e);
                    }
                    if self.config.max_attempts.is_some_and(|max| attempts >= max) {
                        return Err(ExperimentError::RetriesExhausted { label, attempts });
                    }
                    log::info!("[control-loop] {label}: {}", TrialPhase::Retrying);
                }
            }
        }
    }

    /// Remove the hand-off files and destroy the network.
    pub async fn clean(&self) -> Result<(), ExperimentError> {
        cleanup_files(&self.config.work_dir)?;
        for delay in &self.config.control_plane_delay {
            if let Err(e) = self.testbed.set_control_plane_delay(*delay, false).await {
                log::debug!("[control-loop] no control-plane delay of {delay}ms to remove: {e}");
            }
        }
        self.testbed.teardown().await?;
        Ok(())
    }

    async fn attempt(
        &mut self,
        params: &TrialParams,
        pattern: &[LinkHealth],
        trial_dir: &Path,
    ) -> Result<TrialResult, ExperimentError> {
        let started = Instant::now();
        let outcome = self.setup_and_run(params, pattern, trial_dir).await;
        self.release(params).await;
        let mut result = outcome?;

        log::debug!("[control-loop] {}: {}", result.label, TrialPhase::Validating);
        let recorded = self.testbed.recorded_transitions(trial_dir)?;
        if recorded != result.change_counter {
            return Err(ExperimentError::Inconsistent {
                recorded,
                issued: result.change_counter,
            });
        }
        result.duration = started.elapsed().as_secs_f64();
        Ok(result)
    }

    async fn setup_and_run(
        &mut self,
        params: &TrialParams,
        pattern: &[LinkHealth],
        trial_dir: &Path,
    ) -> Result<TrialResult, ExperimentError> {
        let label = params.label();
        log::debug!("[control-loop] {label}: {}", TrialPhase::Setup);
        self.testbed.reset().await?;
        if trial_dir.exists() {
            std::fs::remove_dir_all(trial_dir)?;
        }
        std::fs::create_dir_all(trial_dir)?;
        cleanup_files(&self.config.work_dir)?;
        self.write_hand_off(&label, trial_dir)?;

        let topo = Topology::for_size(params.vertex, params.edge, &mut self.rng)?;
        let flows = topo.generate_flows(params.flow_count, &mut self.rng)?;
        let deployment = self
            .testbed
            .deploy(&topo, params.link_bandwidth, &flows)
            .await?;

        let poll = self.config.poll_settings();
        let controller = self.testbed.controller();
        wait_for_convergence(controller, topo.edges.len(), poll).await?;
        controller.activate_algorithm(&params.algorithm).await?;
        wait_for_algorithm(controller, poll).await?;
        self.testbed
            .set_control_plane_delay(params.control_plane_delay, true)
            .await?;

        let records = wait_for_paths(controller, poll).await?;
        validate_records(&records, &topo)?;
        let dwell = self.config.dwell();
        let (failure, schedule) = match self.config.failure_mode {
            FailureMode::Single => {
                let index = LinkFlowIndex::build(&records, &deployment.addresses, &flows);
                let failure = select_single_link(&index)?;
                (failure, FailureSchedule::single_link(pattern, dwell))
            }
            FailureMode::Multiple => {
                let backup = controller
                    .backup_paths()
                    .await?
                    .ok_or(PathError::Unavailable)?;
                let backup = parse_backup_records(&backup)?;
                let failure = select_multiple_links(&records, &backup, &flows)?;
                let schedule = FailureSchedule::multi_link(failure.links.len(), dwell)?;
                (failure, schedule)
            }
        };

        log::debug!("[control-loop] {label}: {}", TrialPhase::Running);
        let mut settings = TrafficSettings::new(params.traffic_model, params.throughput, trial_dir);
        settings.fine_grained = self.config.mode == ScheduleMode::Fixed;
        let traffic = start_traffic(
            self.testbed.traffic(),
            &flows,
            &failure.affected_flows,
            &settings,
        )
        .await?;
        let traffic_started = traffic.released_at;
        traffic.join().await?;

        let mut links = LinkStateController::new(
            self.testbed.fabric(),
            &deployment.ports,
            self.config.work_dir.as_path().then(INTENT_FILE),
        )
        .always_reset(self.config.always_reset);
        let run = execute_schedule(&mut links, &failure.links, &schedule, &mut self.rng).await?;
        self.record_paths(trial_dir).await?;

        Ok(TrialResult {
            label,
            algorithm: params.algorithm.clone(),
            trial: params.trial,
            failure_mode: self.config.failure_mode,
            pattern: schedule.steps.iter().map(|s| s.health).collect(),
            failure,
            records: run.records,
            change_counter: run.change_counter,
            attempts: 0,
            traffic_started,
            duration: 0.0,
            addresses: deployment.addresses,
        })
    }

    /// Tell the recovery application where to record the link transitions it observes.
    fn write_hand_off(&self, label: &str, trial_dir: &Path) -> Result<(), std::io::Error> {
        let work_dir = self.config.work_dir.as_path();
        std::fs::write(work_dir.then("label.txt"), format!("{label}\n"))?;
        let trial_dir = std::fs::canonicalize(trial_dir)?;
        std::fs::write(
            work_dir.then("result_folder_label.txt"),
            format!("{}\n", trial_dir.display()),
        )?;
        Ok(())
    }

    /// Keep the paths after the failure schedule as artifacts of the trial.
    async fn record_paths(&self, trial_dir: &Path) -> Result<(), ExperimentError> {
        let controller = self.testbed.controller();
        let main = controller.forwarding_paths().await?;
        if !main.is_empty() {
            std::fs::write(trial_dir.then("main_path.txt"), main)?;
        }
        if let Some(backup) = controller.backup_paths().await? {
            std::fs::write(trial_dir.then("backup_path.txt"), backup)?;
        }
        Ok(())
    }

    /// Release everything the attempt acquired. Failures are only logged.
    async fn release(&self, params: &TrialParams) {
        if let Err(e) = self.testbed.traffic().stop_all().await {
            log::warn!("[control-loop] cannot stop traffic: {e}");
        }
        if let Err(e) = self.testbed.controller().deactivate_algorithm().await {
            log::warn!("[control-loop] cannot deactivate {}: {e}", params.algorithm);
        }
        if let Err(e) = self
            .testbed
            .set_control_plane_delay(params.control_plane_delay, false)
            .await
        {
            log::warn!("[control-loop] cannot remove the control-plane delay: {e}");
        }
        if let Err(e) = self.testbed.teardown().await {
            log::warn!("[control-loop] cannot tear down the testbed: {e}");
        }
    }

    /// Throw away everything a failed attempt left behind.
    fn discard(&self, trial_dir: &Path) {
        if trial_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(trial_dir) {
                log::warn!("[control-loop] cannot remove {}: {e}", trial_dir.display());
            }
        }
        if let Err(e) = cleanup_files(&self.config.work_dir) {
            log::warn!("[control-loop] cannot remove hand-off files: {e}");
        }
    }
}
