//! Audio service restart.
//!
//! Stops and starts the Windows audio services through the service
//! control manager. Each stop is awaited before the next one is issued,
//! because the manager refuses to stop a service whose dependents are still
//! stop-pending.

#[cfg(windows)]
pub mod scm;

#[cfg(windows)]
pub use scm::ScmServiceControl;

use crate::cancel::CancelToken;
use crate::poll::{poll_until, PollOutcome, PollSpec};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Core Windows audio service.
pub const AUDIO_SERVICE: &str = "audiosrv";

/// Endpoint builder service the audio service depends on.
pub const ENDPOINT_BUILDER_SERVICE: &str = "AudioEndpointBuilder";

/// Service status as reported by the control manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Stopped,
    StartPending,
    StopPending,
    Running,
    /// Paused or transitioning through pause/continue
    Other,
}

/// Logical view of one service at query time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    pub name: String,
    pub status: ServiceStatus,
}

impl ServiceState {
    pub fn is_running(&self) -> bool {
        self.status == ServiceStatus::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.status == ServiceStatus::Stopped
    }
}

/// Service controller error types.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[cfg(windows)]
    #[error("Failed to open service control manager: {0}")]
    ManagerUnavailable(#[source] windows::core::Error),

    #[cfg(windows)]
    #[error("Failed to open service {name}: {source}")]
    OpenFailed {
        name: String,
        #[source]
        source: windows::core::Error,
    },

    #[cfg(windows)]
    #[error("Failed to {action} service {name}: {source}")]
    ControlFailed {
        name: String,
        action: &'static str,
        #[source]
        source: windows::core::Error,
    },

    #[error("Service not found: {0}")]
    NotFound(String),

    #[error("Cannot stop {0}: dependent services are still running")]
    DependentsRunning(String),

    #[error("Service control unavailable: {0}")]
    Unavailable(String),
}

/// Start, stop and query named OS services.
///
/// `start` and `stop` succeed when the service is already in the
/// requested state. `stop` also succeeds on a service that is already
/// stop-pending; it returns before the service has fully stopped.
pub trait ServiceControl {
    fn stop(&self, name: &str) -> Result<(), ServiceError>;

    fn start(&self, name: &str) -> Result<(), ServiceError>;

    fn query(&self, name: &str) -> Result<ServiceState, ServiceError>;

    fn is_running(&self, name: &str) -> Result<bool, ServiceError> {
        Ok(self.query(name)?.is_running())
    }

    fn is_stopped(&self, name: &str) -> Result<bool, ServiceError> {
        Ok(self.query(name)?.is_stopped())
    }
}

/// Which services to cycle and how long to wait for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePlan {
    /// Services in stop order; they are started in reverse.
    pub stop_order: Vec<String>,

    /// Pause between the stop and start halves.
    pub pause: Duration,

    /// Poll for each stop to complete and for readiness after the starts.
    pub poll: PollSpec,
}

impl ServicePlan {
    /// The dependent audio service goes down first and comes up last.
    pub fn audio(pause: Duration, poll: PollSpec) -> Self {
        Self {
            stop_order: vec![
                AUDIO_SERVICE.to_string(),
                ENDPOINT_BUILDER_SERVICE.to_string(),
            ],
            pause,
            poll,
        }
    }

    pub fn start_order(&self) -> impl Iterator<Item = &str> {
        self.stop_order.iter().rev().map(String::as_str)
    }
}

/// What a restart did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartReport {
    /// Control commands that failed, rendered for the log.
    pub errors: Vec<String>,

    /// Services that were still not stopped when the stop wait ran out.
    pub stop_timeouts: Vec<String>,

    /// Outcome of the readiness wait.
    pub wait: PollOutcome,
}

impl RestartReport {
    pub fn all_running(&self) -> bool {
        self.wait.is_reached()
    }
}

/// Stop the services one at a time, waiting for each to reach stopped,
/// pause, start them in reverse order, then poll until all of them report
/// running.
///
/// Wait timeouts are logged and returned, never raised.
pub fn restart_audio_services(
    control: &dyn ServiceControl,
    plan: &ServicePlan,
    cancel: &CancelToken,
) -> RestartReport {
    info!("Restarting audio services...");

    let mut errors = Vec::new();
    let mut stop_timeouts = Vec::new();

    for name in &plan.stop_order {
        debug!(service = %name, "Stopping service");
        if let Err(e) = control.stop(name) {
            warn!("    {}", e);
            errors.push(e.to_string());
            continue;
        }

        match wait_for_stop(control, name, plan.poll, cancel) {
            PollOutcome::Reached { elapsed, .. } => {
                debug!(service = %name, elapsed_ms = elapsed.as_millis() as u64, "Service stopped");
            }
            PollOutcome::TimedOut { .. } => {
                warn!("    {} did not stop in time", name);
                stop_timeouts.push(name.clone());
            }
            PollOutcome::Cancelled => {
                return RestartReport {
                    errors,
                    stop_timeouts,
                    wait: PollOutcome::Cancelled,
                };
            }
        }
    }

    if !cancel.sleep(plan.pause) {
        return RestartReport {
            errors,
            stop_timeouts,
            wait: PollOutcome::Cancelled,
        };
    }

    for name in plan.start_order() {
        debug!(service = %name, "Starting service");
        if let Err(e) = control.start(name) {
            warn!("    {}", e);
            errors.push(e.to_string());
        }
    }

    info!("Waiting for audio services...");
    let wait = poll_until(plan.poll, cancel, || {
        plan.stop_order
            .iter()
            .all(|name| match control.is_running(name) {
                Ok(running) => running,
                Err(e) => {
                    debug!(service = %name, error = %e, "Service query failed");
                    false
                }
            })
    });

    match wait {
        PollOutcome::Reached { elapsed, .. } => {
            info!(success = true, "Audio services running after {} sec.", elapsed.as_secs());
        }
        PollOutcome::TimedOut { .. } => {
            warn!("WARNING: Audio services may not be running!");
        }
        PollOutcome::Cancelled => {}
    }

    RestartReport {
        errors,
        stop_timeouts,
        wait,
    }
}

fn wait_for_stop(
    control: &dyn ServiceControl,
    name: &str,
    poll: PollSpec,
    cancel: &CancelToken,
) -> PollOutcome {
    poll_until(poll, cancel, || match control.is_stopped(name) {
        Ok(stopped) => stopped,
        Err(e) => {
            debug!(service = %name, error = %e, "Service query failed");
            false
        }
    })
}
