//! One reset run and its report.

use crate::launch::DiscoveredApp;
use crate::state::{PipelineState, Step};
use chrono::{DateTime, Local};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// How a step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Success,

    /// Nothing to do, a target was not found, or the run was cancelled.
    Skipped(String),

    /// A bounded wait ran out.
    TimedOut(String),

    /// An OS call failed.
    Failed(String),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Success => f.write_str("ok"),
            StepOutcome::Skipped(reason) => write!(f, "skipped ({})", reason),
            StepOutcome::TimedOut(detail) => write!(f, "timed out ({})", detail),
            StepOutcome::Failed(detail) => write!(f, "failed ({})", detail),
        }
    }
}

/// Outcome and duration of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: Step,
    pub outcome: StepOutcome,
    pub elapsed: Duration,
}

/// Process exit status of the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    StepFailed,
    ElevationDeclined,
    Cancelled,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::StepFailed => 1,
            ExitStatus::ElevationDeclined => 2,
            ExitStatus::Cancelled => 3,
        }
    }
}

/// State carried through one pipeline run.
///
/// Created when the run starts and consumed into a `RunReport` when it
/// ends.
#[derive(Debug)]
pub struct ResetSession {
    started_at: DateTime<Local>,
    log_path: Option<PathBuf>,
    saved_volume: Option<f32>,
    volume_restored: bool,
    discovered: Vec<DiscoveredApp>,
    steps: Vec<StepRecord>,
    state: PipelineState,
}

impl ResetSession {
    pub fn new(log_path: Option<PathBuf>) -> Self {
        Self::started_at(Local::now(), log_path)
    }

    pub fn started_at(started_at: DateTime<Local>, log_path: Option<PathBuf>) -> Self {
        Self {
            started_at,
            log_path,
            saved_volume: None,
            volume_restored: false,
            discovered: Vec::new(),
            steps: Vec::new(),
            state: PipelineState::Idle,
        }
    }

    pub fn start_time(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn log_path(&self) -> Option<&PathBuf> {
        self.log_path.as_ref()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Status label of the current state.
    pub fn status(&self) -> &'static str {
        self.state.label()
    }

    pub fn set_state(&mut self, state: PipelineState) {
        self.state = state;
    }

    pub fn discovered(&self) -> &[DiscoveredApp] {
        &self.discovered
    }

    pub fn set_discovered(&mut self, apps: Vec<DiscoveredApp>) {
        self.discovered = apps;
    }

    pub fn saved_volume(&self) -> Option<f32> {
        self.saved_volume
    }

    /// Remember the playback volume captured before the reset.
    pub fn save_volume(&mut self, level: f32) {
        self.saved_volume = Some(level);
        self.volume_restored = false;
    }

    /// The volume to put back, handed out at most once.
    ///
    /// Returns `None` when nothing was captured or it was already taken.
    pub fn take_volume_to_restore(&mut self) -> Option<f32> {
        if self.volume_restored {
            return None;
        }
        let level = self.saved_volume?;
        self.volume_restored = true;
        Some(level)
    }

    pub fn record(&mut self, step: Step, outcome: StepOutcome, elapsed: Duration) {
        self.steps.push(StepRecord {
            step,
            outcome,
            elapsed,
        });
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// Close the session.
    pub fn into_report(self) -> RunReport {
        let elapsed = (Local::now() - self.started_at)
            .to_std()
            .unwrap_or_default();
        RunReport {
            started_at: self.started_at,
            elapsed,
            final_state: self.state,
            steps: self.steps,
            log_path: self.log_path,
            saved_volume: self.saved_volume,
            volume_restored: self.volume_restored,
        }
    }
}

/// Immutable summary of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
    pub final_state: PipelineState,
    pub steps: Vec<StepRecord>,
    pub log_path: Option<PathBuf>,
    pub saved_volume: Option<f32>,
    pub volume_restored: bool,
}

impl RunReport {
    pub fn exit_status(&self) -> ExitStatus {
        if self.final_state == PipelineState::Aborted {
            ExitStatus::Cancelled
        } else if self.has_failures() {
            ExitStatus::StepFailed
        } else {
            ExitStatus::Success
        }
    }

    pub fn has_failures(&self) -> bool {
        self.steps.iter().any(|s| s.outcome.is_failure())
    }

    /// Any step that did not simply succeed.
    pub fn has_warnings(&self) -> bool {
        self.steps.iter().any(|s| !s.outcome.is_success())
    }

    pub fn outcome_of(&self, step: Step) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| s.step == step)
            .map(|s| &s.outcome)
    }

    /// One-line text for the completion message box.
    pub fn summary(&self) -> &'static str {
        match self.exit_status() {
            ExitStatus::Cancelled => "Audio reset cancelled",
            ExitStatus::StepFailed => "Audio reset finished with errors",
            _ if self.has_warnings() => "Audio reset finished with warnings",
            _ => "Audio reset complete",
        }
    }

    /// Multi-line body for the completion message box.
    pub fn notification_text(&self) -> String {
        let mut text = String::from(self.summary());
        for record in self.steps.iter().filter(|s| !s.outcome.is_success()) {
            text.push_str(&format!("\n{}: {}", record.step, record.outcome));
        }
        if let Some(path) = &self.log_path {
            text.push_str(&format!("\n\nLog: {}", path.display()));
        }
        text
    }
}
