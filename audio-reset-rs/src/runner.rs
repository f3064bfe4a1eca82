//! Runs the pipeline on a worker thread and answers device queries.
//!
//! The UI thread keeps the `RunHandle`, drains pipeline events from it
//! without blocking, and cancels through it.

use crate::audio::{AudioBackend, AudioDevice, AudioError, DeviceRole, Direction};
use crate::cancel::CancelToken;
use crate::config::{CurrentDefaults, ResetConfig};
use crate::orchestrator::PipelineEvent;
use crate::session::RunReport;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread::JoinHandle;
use thiserror::Error;

/// Runner error types.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Unsupported platform: the audio reset only runs on Windows")]
    Unsupported,

    #[error("Failed to start worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Worker thread panicked")]
    WorkerPanicked,

    #[error("A reset is already running in this process")]
    AlreadyRunning,

    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// A pipeline running on its own thread.
pub struct RunHandle {
    cancel: CancelToken,
    events: Receiver<PipelineEvent>,
    thread: Option<JoinHandle<RunReport>>,
}

impl RunHandle {
    /// Ask the pipeline to stop at its next check.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Next pending event, if any. Never blocks.
    pub fn try_event(&self) -> Option<PipelineEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the worker and take its report.
    pub fn join(mut self) -> Result<RunReport, RunError> {
        let thread = self.thread.take().ok_or(RunError::WorkerPanicked)?;
        thread.join().map_err(|_| RunError::WorkerPanicked)
    }
}

static RUN_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Claim on the process-wide run slot. At most one exists at a time; it is
/// released on drop, including when the worker unwinds.
#[derive(Debug)]
pub struct ActiveRun(());

impl ActiveRun {
    pub fn acquire() -> Result<Self, RunError> {
        RUN_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ActiveRun(()))
            .map_err(|_| RunError::AlreadyRunning)
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        RUN_ACTIVE.store(false, Ordering::Release);
    }
}

/// Start a reset run on a worker thread. Fails with `AlreadyRunning` while
/// another run in this process has not finished.
#[cfg(windows)]
pub fn spawn_reset(
    config: ResetConfig,
    log_path: Option<PathBuf>,
    cancel: CancelToken,
) -> Result<RunHandle, RunError> {
    use crate::audio::{ComGuard, CoreAudio};
    use crate::launch::Win32Launcher;
    use crate::orchestrator::{Collaborators, Orchestrator};
    use crate::platform::RegistryLocator;
    use crate::process::ToolhelpInventory;
    use crate::service::ScmServiceControl;
    use crate::session::ResetSession;

    let active = ActiveRun::acquire()?;
    let (tx, rx) = std::sync::mpsc::channel();
    let worker_cancel = cancel.clone();

    let thread = std::thread::Builder::new()
        .name("audio-reset".to_string())
        .spawn(move || {
            let _active = active;
            let _com = match ComGuard::multithreaded() {
                Ok(guard) => Some(guard),
                Err(e) => {
                    tracing::warn!("COM initialization failed: {}", e);
                    None
                }
            };

            let os = Collaborators {
                audio: &CoreAudio,
                processes: &ToolhelpInventory,
                services: &ScmServiceControl,
                launcher: &Win32Launcher,
                locator: &RegistryLocator,
            };
            Orchestrator::new(&config, os, worker_cancel)
                .with_events(tx)
                .run(ResetSession::new(log_path))
        })?;

    Ok(RunHandle {
        cancel,
        events: rx,
        thread: Some(thread),
    })
}

#[cfg(not(windows))]
pub fn spawn_reset(
    _config: ResetConfig,
    _log_path: Option<PathBuf>,
    _cancel: CancelToken,
) -> Result<RunHandle, RunError> {
    Err(RunError::Unsupported)
}

/// Run `f` against the system audio backend on the calling thread.
#[cfg(windows)]
pub fn with_system_audio<T, F>(f: F) -> Result<T, RunError>
where
    F: FnOnce(&dyn AudioBackend) -> Result<T, AudioError>,
{
    let _com = crate::audio::ComGuard::new()?;
    Ok(f(&crate::audio::CoreAudio)?)
}

#[cfg(not(windows))]
pub fn with_system_audio<T, F>(_f: F) -> Result<T, RunError>
where
    F: FnOnce(&dyn AudioBackend) -> Result<T, AudioError>,
{
    Err(RunError::Unsupported)
}

/// An active endpoint and the default slots it currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceListing {
    pub device: AudioDevice,
    pub default_for: Vec<DeviceRole>,
}

/// Active endpoints of one direction with their default roles marked.
pub fn list_devices(
    backend: &dyn AudioBackend,
    direction: Direction,
) -> Result<Vec<DeviceListing>, AudioError> {
    let endpoints = backend.connect()?;

    let mut defaults = Vec::new();
    for role in DeviceRole::ALL {
        if let Some(device) = endpoints.default_endpoint(direction, role)? {
            defaults.push((role, device.id));
        }
    }

    Ok(endpoints
        .list_endpoints(direction)?
        .into_iter()
        .map(|device| DeviceListing {
            default_for: defaults
                .iter()
                .filter(|(_, id)| *id == device.id)
                .map(|(role, _)| *role)
                .collect(),
            device,
        })
        .collect())
}

/// Names of the four current OS default devices.
pub fn current_defaults(backend: &dyn AudioBackend) -> Result<CurrentDefaults, AudioError> {
    let endpoints = backend.connect()?;
    let mut current = CurrentDefaults::new();
    for direction in Direction::ALL {
        for role in DeviceRole::ALL {
            if let Some(device) = endpoints.default_endpoint(direction, role)? {
                current.set(direction, role, device.name);
            }
        }
    }
    Ok(current)
}

/// The current defaults as a config, for `init`. Slots without a default
/// keep the built-in names.
pub fn config_from_current(current: &CurrentDefaults) -> ResetConfig {
    let mut config = ResetConfig::default();
    for direction in Direction::ALL {
        for role in DeviceRole::ALL {
            if let Some(name) = current.get(direction, role) {
                *config.assignments.target_mut(direction, role) = name.to_string();
            }
        }
    }
    config
}
