//! The reset pipeline.
//!
//! Runs every step in order on the calling thread, records each outcome in
//! the session, and publishes state changes over an optional channel. No
//! step error stops the pipeline; a cancel skips the disruptive steps that
//! are left but still restores the volume.

use crate::audio::{AudioBackend, DeviceConfigurator, Direction};
use crate::cancel::CancelToken;
use crate::config::ResetConfig;
use crate::launch::{discover_paths, AppLauncher, InstallLocator, LaunchOutcome, LaunchSupervisor, VendorApp};
use crate::logging::run_header;
use crate::poll::{poll_until, PollOutcome};
use crate::process::{kill_target_processes, ProcessInventory};
use crate::service::{restart_audio_services, ServiceControl, ServicePlan};
use crate::session::{ResetSession, RunReport, StepOutcome};
use crate::state::{PipelineState, Step};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const CANCELLED: &str = "cancelled";

/// Published while a run progresses.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The pipeline entered `state`; `label` is the status text to show.
    State {
        state: PipelineState,
        label: &'static str,
    },

    /// The run is over.
    Finished(RunReport),
}

/// The OS surfaces one run works against.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub audio: &'a dyn AudioBackend,
    pub processes: &'a dyn ProcessInventory,
    pub services: &'a dyn ServiceControl,
    pub launcher: &'a dyn AppLauncher,
    pub locator: &'a dyn InstallLocator,
}

/// Drives one reset run. Consumed by `run`, so a pipeline cannot be
/// re-entered.
pub struct Orchestrator<'a> {
    config: &'a ResetConfig,
    os: Collaborators<'a>,
    cancel: CancelToken,
    events: Option<Sender<PipelineEvent>>,
    own_pid: u32,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a ResetConfig, os: Collaborators<'a>, cancel: CancelToken) -> Self {
        Self {
            config,
            os,
            cancel,
            events: None,
            own_pid: std::process::id(),
        }
    }

    /// Publish state changes to `tx`.
    pub fn with_events(mut self, tx: Sender<PipelineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Pid that is never terminated, normally our own.
    pub fn with_own_pid(mut self, pid: u32) -> Self {
        self.own_pid = pid;
        self
    }

    /// Run the whole pipeline.
    pub fn run(self, mut session: ResetSession) -> RunReport {
        info!("{}", run_header(session.start_time()));
        self.enter(&mut session, PipelineState::Idle);

        self.run_step(&mut session, Step::DiscoverPaths, |this, session| {
            this.discover(session)
        });
        self.enter(&mut session, PipelineState::PathsDiscovered);

        self.run_step(&mut session, Step::LowerVolume, |this, session| {
            this.save_and_lower_volume(session)
        });

        for step in Step::DISRUPTIVE {
            if self.cancel.is_cancelled() {
                session.record(step, StepOutcome::Skipped(CANCELLED.to_string()), Duration::ZERO);
                continue;
            }

            let outcome = self.run_step(&mut session, step, |this, session| match step {
                Step::KillProcesses => this.kill_processes(),
                Step::RestartServices => this.restart_services(),
                Step::LaunchApps => this.launch_apps(session),
                Step::WaitForDevices => this.wait_for_devices(),
                _ => this.apply_defaults(),
            });

            if self.cancel.is_cancelled() {
                continue;
            }
            let reached = match step {
                Step::KillProcesses => PipelineState::ProcessesKilled,
                Step::RestartServices => PipelineState::ServicesRestarted,
                Step::LaunchApps => PipelineState::VendorAppsLaunched,
                Step::WaitForDevices if outcome.is_success() => PipelineState::DevicesReady,
                Step::WaitForDevices => PipelineState::DevicesTimedOut,
                _ => PipelineState::DefaultsApplied,
            };
            self.enter(&mut session, reached);
        }

        self.run_step(&mut session, Step::RestoreVolume, |this, session| {
            this.restore_volume(session)
        });

        if self.cancel.is_cancelled() {
            warn!("Reset cancelled.");
            self.enter(&mut session, PipelineState::Aborted);
        } else {
            self.enter(&mut session, PipelineState::VolumeRestored);
            info!(success = true, "Reset complete!");
            self.enter(&mut session, PipelineState::Complete);
        }

        if let Some(path) = session.log_path() {
            info!("Log saved to:");
            info!("    {}", path.display());
        }

        let report = session.into_report();
        self.emit(PipelineEvent::Finished(report.clone()));
        report
    }

    fn run_step<F>(&self, session: &mut ResetSession, step: Step, f: F) -> StepOutcome
    where
        F: FnOnce(&Self, &mut ResetSession) -> StepOutcome,
    {
        let started = Instant::now();
        let outcome = f(self, session);
        let elapsed = started.elapsed();
        debug!(step = %step, outcome = %outcome, elapsed_ms = elapsed.as_millis() as u64, "Step finished");
        session.record(step, outcome.clone(), elapsed);
        outcome
    }

    fn enter(&self, session: &mut ResetSession, state: PipelineState) {
        info!(state = %state, "{}", state.label());
        session.set_state(state);
        self.emit(PipelineEvent::State {
            state,
            label: state.label(),
        });
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            // A closed receiver only means nobody is watching.
            let _ = tx.send(event);
        }
    }

    fn discover(&self, session: &mut ResetSession) -> StepOutcome {
        let apps = discover_paths(&self.config.vendor.apps, self.os.locator, self.os.launcher);
        let missing = apps.iter().filter(|a| a.path.is_none()).count();
        session.set_discovered(apps);

        if missing == 0 {
            StepOutcome::Success
        } else {
            StepOutcome::Skipped(format!("{} app path(s) not found", missing))
        }
    }

    fn save_and_lower_volume(&self, session: &mut ResetSession) -> StepOutcome {
        let endpoints = match self.os.audio.connect() {
            Ok(endpoints) => endpoints,
            Err(e) => {
                debug!(error = %e, "Volume not captured");
                return StepOutcome::Skipped("volume not captured".to_string());
            }
        };
        let configurator = DeviceConfigurator::new(endpoints.as_ref());

        let level = match configurator.playback_volume() {
            Ok(level) => level,
            Err(e) => {
                debug!(error = %e, "Volume not captured");
                return StepOutcome::Skipped("volume not captured".to_string());
            }
        };
        session.save_volume(level);

        info!(
            "Saved volume: {:.0}%, lowering to {:.0}% for safety",
            level * 100.0,
            self.config.safe_volume * 100.0
        );
        match configurator.set_playback_volume(self.config.safe_volume) {
            Ok(()) => StepOutcome::Success,
            Err(e) => {
                warn!("Failed to lower volume: {}", e);
                StepOutcome::Failed(e.to_string())
            }
        }
    }

    fn kill_processes(&self) -> StepOutcome {
        let filter = self.config.vendor.process_filter().with_own_pid(self.own_pid);
        match kill_target_processes(
            self.os.processes,
            &filter,
            self.config.timings.kill_settle,
            &self.cancel,
        ) {
            Ok(summary) if summary.failed.is_empty() => StepOutcome::Success,
            Ok(summary) => StepOutcome::Failed(format!(
                "{} process(es) could not be terminated",
                summary.failed.len()
            )),
            Err(e) => {
                warn!("Process enumeration failed: {}", e);
                StepOutcome::Failed(e.to_string())
            }
        }
    }

    fn restart_services(&self) -> StepOutcome {
        let timings = &self.config.timings;
        let plan = ServicePlan::audio(timings.service_pause, timings.service_poll);
        let report = restart_audio_services(self.os.services, &plan, &self.cancel);

        match report.wait {
            PollOutcome::Cancelled => StepOutcome::Skipped(CANCELLED.to_string()),
            _ if !report.errors.is_empty() => StepOutcome::Failed(report.errors.join("; ")),
            _ if !report.stop_timeouts.is_empty() => StepOutcome::TimedOut(format!(
                "did not stop: {}",
                report.stop_timeouts.join(", ")
            )),
            PollOutcome::TimedOut { elapsed, .. } => StepOutcome::TimedOut(format!(
                "audio services not running after {} sec",
                elapsed.as_secs()
            )),
            PollOutcome::Reached { .. } => StepOutcome::Success,
        }
    }

    fn launch_apps(&self, session: &ResetSession) -> StepOutcome {
        let supervisor = LaunchSupervisor::new(self.os.launcher, self.os.processes, &self.cancel);
        let mut missing = Vec::new();
        let mut undetected = Vec::new();
        let mut failed = Vec::new();

        for discovered in session.discovered() {
            if self.cancel.is_cancelled() {
                return StepOutcome::Skipped(CANCELLED.to_string());
            }

            let app = &discovered.app;
            let path = discovered.path.as_deref();
            if app.launch_only_if_present && !path.is_some_and(|p| self.os.launcher.exists(p)) {
                debug!(app = %app.display_name, "Optional app not installed");
                continue;
            }

            let outcome = supervisor.launch(
                path,
                &app.image_name,
                &app.display_name,
                self.config.timings.launch_poll,
            );

            if outcome.started() {
                if let Some(title) = &app.window_title {
                    self.settle_windows(&supervisor, app, title);
                }
            }

            match outcome {
                LaunchOutcome::Detected => {}
                LaunchOutcome::NotFound => missing.push(app.display_name.as_str()),
                LaunchOutcome::NotDetected => undetected.push(app.display_name.as_str()),
                LaunchOutcome::Failed(e) => failed.push(format!("{}: {}", app.display_name, e)),
                LaunchOutcome::Cancelled => return StepOutcome::Skipped(CANCELLED.to_string()),
            }
        }

        if !failed.is_empty() {
            StepOutcome::Failed(failed.join("; "))
        } else if !undetected.is_empty() {
            StepOutcome::TimedOut(format!("not detected: {}", undetected.join(", ")))
        } else if !missing.is_empty() {
            StepOutcome::Skipped(format!("not found: {}", missing.join(", ")))
        } else {
            StepOutcome::Success
        }
    }

    /// Wait for the app's main window, give it a moment more, then
    /// minimize everything it opened.
    fn settle_windows(&self, supervisor: &LaunchSupervisor<'_>, app: &VendorApp, title: &str) {
        let timings = &self.config.timings;
        info!("Waiting for {} to fully initialize...", app.display_name);

        match supervisor.wait_for_window(title, timings.window_poll) {
            PollOutcome::Cancelled => return,
            PollOutcome::Reached { .. } => {
                if !self.cancel.sleep(timings.window_grace) {
                    return;
                }
            }
            PollOutcome::TimedOut { .. } => {
                debug!(title, "Window never appeared");
            }
        }

        match supervisor.minimize_all_windows_of(&app.image_name) {
            Ok(0) => debug!(app = %app.display_name, "No windows to minimize"),
            Ok(_) => info!("{} minimized.", app.display_name),
            Err(e) => warn!("Failed to minimize {}: {}", app.display_name, e),
        }
    }

    fn wait_for_devices(&self) -> StepOutcome {
        let vendor = &self.config.vendor;
        info!("Waiting for {} virtual devices...", vendor.device_tag);

        let endpoints = match self.os.audio.connect() {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!("Audio subsystem unavailable: {}", e);
                return StepOutcome::Failed(e.to_string());
            }
        };

        let mut found = 0;
        let outcome = poll_until(self.config.timings.device_poll, &self.cancel, || {
            found = match endpoints.count_tagged(Direction::Playback, &vendor.device_tag) {
                Ok(count) => count,
                Err(e) => {
                    debug!(error = %e, "Endpoint enumeration failed");
                    0
                }
            };
            found >= vendor.min_devices
        });

        match outcome {
            PollOutcome::Reached { elapsed, .. } => {
                info!(
                    success = true,
                    "{} virtual devices ready ({} sec).",
                    vendor.device_tag,
                    elapsed.as_secs()
                );
                StepOutcome::Success
            }
            PollOutcome::TimedOut { .. } => {
                warn!("{} devices not detected - proceeding anyway.", vendor.device_tag);
                StepOutcome::TimedOut(format!(
                    "{} of {} {} devices active",
                    found, vendor.min_devices, vendor.device_tag
                ))
            }
            PollOutcome::Cancelled => StepOutcome::Skipped(CANCELLED.to_string()),
        }
    }

    fn apply_defaults(&self) -> StepOutcome {
        if !self.cancel.sleep(self.config.timings.settle_before_defaults) {
            return StepOutcome::Skipped(CANCELLED.to_string());
        }
        info!("Setting audio defaults and volumes...");

        let endpoints = match self.os.audio.connect() {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!("Audio subsystem unavailable: {}", e);
                return StepOutcome::Failed(e.to_string());
            }
        };
        let configurator = DeviceConfigurator::new(endpoints.as_ref());
        let mut missing = Vec::new();
        let mut failed = Vec::new();

        for assignment in self.config.role_assignments() {
            match configurator.apply(&assignment) {
                Ok(_) => info!(success = true, "    {}: {}", assignment.label(), assignment.target),
                Err(e) if e.is_not_found() => {
                    warn!("    {} not found: {}", assignment.label(), assignment.target);
                    missing.push(assignment.label());
                }
                Err(e) => {
                    warn!("    {} failed: {}", assignment.label(), e);
                    failed.push(format!("{}: {}", assignment.label(), e));
                }
            }
        }

        for (direction, name) in self.config.unmute_targets() {
            match configurator.set_volume_and_unmute(direction, &name, 1.0) {
                Ok(_) => debug!(device = %name, "Unmuted at full volume"),
                Err(e) if e.is_not_found() => warn!("    Unmute target not found: {}", name),
                Err(e) => {
                    warn!("    Failed to unmute {}: {}", name, e);
                    failed.push(format!("unmute {}: {}", name, e));
                }
            }
        }

        info!(success = true, "Audio defaults configured.");

        if !failed.is_empty() {
            StepOutcome::Failed(failed.join("; "))
        } else if !missing.is_empty() {
            StepOutcome::Skipped(format!("not found: {}", missing.join(", ")))
        } else {
            StepOutcome::Success
        }
    }

    fn restore_volume(&self, session: &mut ResetSession) -> StepOutcome {
        let Some(level) = session.take_volume_to_restore() else {
            return StepOutcome::Skipped("volume not captured".to_string());
        };

        info!("Restoring volume to {:.0}%", level * 100.0);
        let restored = self.os.audio.connect().and_then(|endpoints| {
            DeviceConfigurator::new(endpoints.as_ref()).set_playback_volume(level)
        });
        match restored {
            Ok(()) => StepOutcome::Success,
            Err(e) => {
                warn!("Failed to restore volume: {}", e);
                StepOutcome::Failed(e.to_string())
            }
        }
    }
}
