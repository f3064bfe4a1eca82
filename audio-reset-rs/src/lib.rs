//! Audio Reset - Library
//!
//! Restores a Windows audio setup that depends on a vendor's virtual audio
//! driver after the driver or its control apps get into a bad state.
//!
//! ## Pipeline
//!
//! 1. Look up where the vendor apps are installed
//! 2. Save the playback volume and lower it to a safe level
//! 3. Terminate vendor processes (never anything on the protected list)
//! 4. Restart the `audiosrv` and `AudioEndpointBuilder` services
//! 5. Relaunch the vendor apps minimized
//! 6. Wait for the vendor's virtual endpoints to come back
//! 7. Reassign the four default devices and unmute the microphone
//! 8. Restore the saved volume
//!
//! Every OS surface sits behind a trait so the pipeline runs against
//! in-memory fakes in tests.

pub mod app;
pub mod audio;
pub mod cancel;
pub mod config;
pub mod launch;
pub mod logging;
pub mod orchestrator;
pub mod platform;
pub mod poll;
pub mod process;
pub mod runner;
pub mod service;
pub mod session;
pub mod state;
pub mod ui;

#[cfg(test)]
pub(crate) mod testing;

pub use audio::{AudioBackend, AudioDevice, AudioEndpoints, AudioError, DeviceRole, Direction};
pub use cancel::CancelToken;
pub use config::ResetConfig;
pub use orchestrator::{Collaborators, Orchestrator, PipelineEvent};
pub use runner::{spawn_reset, RunError, RunHandle};
pub use session::{ExitStatus, ResetSession, RunReport, StepOutcome, StepRecord};
pub use state::{PipelineState, Step};
