//! FFI bindings for the Audio Reset engine.
//!
//! This crate provides C ABI functions so an external settings GUI can list
//! devices, start a reset and follow its progress. All functions use
//! panic::catch_unwind to prevent Rust panics from unwinding across the FFI
//! boundary.

use audio_reset_rs::config::{slot_key, ResetConfig};
use audio_reset_rs::logging::{init_logging, LogHandle};
use audio_reset_rs::runner::{current_defaults, list_devices, spawn_reset, with_system_audio, DeviceListing};
use audio_reset_rs::{
    AudioError, CancelToken, DeviceRole, Direction, PipelineEvent, PipelineState, RunError,
    RunHandle, RunReport, StepOutcome,
};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::ptr;
use std::sync::Mutex;
use tracing::{info, warn};

// ============================================================================
// Error Handling
// ============================================================================

/// Error codes returned by FFI functions.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    InvalidHandle = -1,
    InvalidArgument = -2,
    DeviceNotFound = -3,
    ComError = -4,
    JsonError = -5,
    AlreadyRunning = -6,
    Unsupported = -7,
    ConfigError = -8,
    WorkerFailed = -9,
    Panic = -99,
}

impl From<&AudioError> for ErrorCode {
    fn from(err: &AudioError) -> Self {
        match err {
            AudioError::DeviceNotFound { .. } | AudioError::NoDefaultDevice { .. } => {
                ErrorCode::DeviceNotFound
            }
            AudioError::InvalidVolume(_) | AudioError::StringConversion(_) => {
                ErrorCode::InvalidArgument
            }
            _ => ErrorCode::ComError,
        }
    }
}

impl From<&RunError> for ErrorCode {
    fn from(err: &RunError) -> Self {
        match err {
            RunError::Unsupported => ErrorCode::Unsupported,
            RunError::AlreadyRunning => ErrorCode::AlreadyRunning,
            RunError::Spawn(_) | RunError::WorkerPanicked => ErrorCode::WorkerFailed,
            RunError::Audio(e) => ErrorCode::from(e),
        }
    }
}

/// Thread-local storage for the last error.
thread_local! {
    static LAST_ERROR: RefCell<Option<(ErrorCode, String)>> = const { RefCell::new(None) };
}

fn set_last_error(code: ErrorCode, message: impl Into<String>) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some((code, message.into()));
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// An error on its way out through the C ABI.
struct FfiError {
    code: ErrorCode,
    message: String,
}

impl FfiError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<RunError> for FfiError {
    fn from(err: RunError) -> Self {
        Self::new(ErrorCode::from(&err), err.to_string())
    }
}

impl From<serde_json::Error> for FfiError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::JsonError, err.to_string())
    }
}

// ============================================================================
// Data Types for JSON Serialization
// ============================================================================

/// Configuration for engine creation. Every field is optional.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Config file to load; the built-in defaults are used when it is
    /// absent or the file does not exist.
    #[serde(default)]
    pub config_path: Option<String>,

    /// Folder for per-run log files; no log file is written when absent.
    #[serde(default)]
    pub log_dir: Option<String>,

    #[serde(default)]
    pub verbose: bool,
}

/// An active endpoint and the default slots it holds.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceDto {
    pub id: String,
    pub name: String,
    pub direction: String,
    pub default_for: Vec<String>,
}

impl From<DeviceListing> for DeviceDto {
    fn from(listing: DeviceListing) -> Self {
        Self {
            id: listing.device.id,
            name: listing.device.name,
            direction: listing.device.direction.as_str().to_string(),
            default_for: listing
                .default_for
                .iter()
                .map(|role| role.as_str().to_string())
                .collect(),
        }
    }
}

/// Response containing a list of devices.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceListResponse {
    pub devices: Vec<DeviceDto>,
}

/// One of the four default slots and the device currently in it.
#[derive(Debug, Serialize, Deserialize)]
pub struct DefaultSlotDto {
    pub slot: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Response containing the current defaults.
#[derive(Debug, Serialize, Deserialize)]
pub struct DefaultsResponse {
    pub defaults: Vec<DefaultSlotDto>,
}

/// One finished step of a run.
#[derive(Debug, Serialize, Deserialize)]
pub struct StepDto {
    pub step: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub elapsed_ms: u64,
}

/// Summary of a finished run.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReportDto {
    pub final_state: String,
    pub exit_code: i32,
    pub summary: String,
    pub elapsed_ms: u64,
    pub volume_restored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
    pub steps: Vec<StepDto>,
}

impl From<&RunReport> for ReportDto {
    fn from(report: &RunReport) -> Self {
        Self {
            final_state: report.final_state.name().to_string(),
            exit_code: report.exit_status().code(),
            summary: report.summary().to_string(),
            elapsed_ms: report.elapsed.as_millis() as u64,
            volume_restored: report.volume_restored,
            log_path: report.log_path.as_ref().map(|p| p.display().to_string()),
            steps: report
                .steps
                .iter()
                .map(|record| {
                    let (outcome, detail) = match &record.outcome {
                        StepOutcome::Success => ("success", None),
                        StepOutcome::Skipped(d) => ("skipped", Some(d.clone())),
                        StepOutcome::TimedOut(d) => ("timed_out", Some(d.clone())),
                        StepOutcome::Failed(d) => ("failed", Some(d.clone())),
                    };
                    StepDto {
                        step: record.step.name().to_string(),
                        outcome: outcome.to_string(),
                        detail,
                        elapsed_ms: record.elapsed.as_millis() as u64,
                    }
                })
                .collect(),
        }
    }
}

/// Progress of the engine's current or last run.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: String,
    pub label: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportDto>,
}

// ============================================================================
// Engine Handle Type
// ============================================================================

/// Opaque handle to the reset engine. Actually points to a ResetEngine struct.
pub type ResetEngineHandle = *mut c_void;

/// Internal engine state.
struct ResetEngine {
    config: ResetConfig,
    log: Option<LogHandle>,
    run: Mutex<RunSlot>,
}

/// The engine's current run, or what is left of the last one.
#[derive(Default)]
struct RunSlot {
    handle: Option<RunHandle>,
    state: PipelineState,
    report: Option<RunReport>,
}

impl RunSlot {
    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Drain pending events and reap the worker once it has stopped.
    fn refresh(&mut self) -> Result<(), FfiError> {
        let Some(handle) = &self.handle else {
            return Ok(());
        };

        let finished = handle.is_finished();
        while let Some(event) = handle.try_event() {
            match event {
                PipelineEvent::State { state, .. } => self.state = state,
                PipelineEvent::Finished(report) => {
                    self.state = report.final_state;
                    self.report = Some(report);
                }
            }
        }

        if finished {
            if let Some(handle) = self.handle.take() {
                let report = handle.join()?;
                self.state = report.final_state;
                self.report = Some(report);
            }
        }
        Ok(())
    }

    fn status(&self) -> StatusResponse {
        StatusResponse {
            state: self.state.name().to_string(),
            label: self.state.label().to_string(),
            running: self.is_running(),
            report: self.report.as_ref().map(ReportDto::from),
        }
    }
}

impl ResetEngine {
    fn new(options: EngineConfig) -> Result<Self, FfiError> {
        let config = match &options.config_path {
            Some(path) => ResetConfig::load_or_default(&PathBuf::from(path))
                .map_err(|e| FfiError::new(ErrorCode::ConfigError, e.to_string()))?,
            None => ResetConfig::default(),
        };

        // Only the first engine in a process can own the global subscriber.
        let log = match &options.log_dir {
            Some(dir) => match init_logging(&PathBuf::from(dir), options.verbose) {
                Ok(log) => Some(log),
                Err(e) => {
                    warn!("File logging unavailable: {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            config,
            log,
            run: Mutex::new(RunSlot::default()),
        })
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, RunSlot>, FfiError> {
        self.run
            .lock()
            .map_err(|_| FfiError::new(ErrorCode::Panic, "Engine state poisoned"))
    }

    fn start(&self) -> Result<(), FfiError> {
        let mut slot = self.slot()?;
        slot.refresh()?;
        if slot.is_running() {
            return Err(FfiError::new(ErrorCode::AlreadyRunning, "A reset is already running"));
        }

        let log_path = self.log.as_ref().map(|log| log.path.clone());
        let handle = spawn_reset(self.config.clone(), log_path, CancelToken::new())?;
        info!("Reset started from FFI");

        *slot = RunSlot {
            handle: Some(handle),
            state: PipelineState::Idle,
            report: None,
        };
        Ok(())
    }

    fn cancel(&self) -> Result<(), FfiError> {
        let slot = self.slot()?;
        if let Some(handle) = &slot.handle {
            handle.cancel();
        }
        Ok(())
    }

    fn poll_status(&self) -> Result<String, FfiError> {
        let mut slot = self.slot()?;
        slot.refresh()?;
        Ok(serde_json::to_string(&slot.status())?)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Allocate a C string from a Rust string. Caller must free with reset_engine_free_string.
fn alloc_c_string(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        // String contained a null byte
        Err(_) => CString::default().into_raw(),
    }
}

/// Parse a C string to a Rust string slice.
unsafe fn parse_c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Borrow the engine behind a handle.
unsafe fn engine<'a>(handle: ResetEngineHandle) -> Result<&'a ResetEngine, FfiError> {
    if handle.is_null() {
        return Err(FfiError::new(ErrorCode::InvalidHandle, "Null engine handle"));
    }
    Ok(&*(handle as *const ResetEngine))
}

/// Run a string-returning entry point: JSON on success, null and the last
/// error on failure.
fn string_call<F>(what: &str, f: F) -> *mut c_char
where
    F: FnOnce() -> Result<String, FfiError>,
{
    clear_last_error();

    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(json)) => alloc_c_string(&json),
        Ok(Err(e)) => {
            set_last_error(e.code, e.message);
            ptr::null_mut()
        }
        Err(_) => {
            set_last_error(ErrorCode::Panic, format!("Panic during {}", what));
            ptr::null_mut()
        }
    }
}

/// Run a status-returning entry point.
fn code_call<F>(what: &str, f: F) -> i32
where
    F: FnOnce() -> Result<(), FfiError>,
{
    clear_last_error();

    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => ErrorCode::Success as i32,
        Ok(Err(e)) => {
            let code = e.code;
            set_last_error(code, e.message);
            code as i32
        }
        Err(_) => {
            set_last_error(ErrorCode::Panic, format!("Panic during {}", what));
            ErrorCode::Panic as i32
        }
    }
}

// ============================================================================
// FFI Functions - Lifecycle
// ============================================================================

/// Create a new reset engine instance.
///
/// # Arguments
/// * `config_json` - JSON `EngineConfig` (can be null for defaults)
///
/// # Returns
/// Handle to the engine, or null on failure. Check reset_engine_last_error_code() on failure.
///
/// # Safety
/// The returned handle must be freed with reset_engine_destroy().
#[no_mangle]
pub extern "C" fn reset_engine_create(config_json: *const c_char) -> ResetEngineHandle {
    clear_last_error();

    let result = panic::catch_unwind(|| -> Result<ResetEngine, FfiError> {
        let options = if config_json.is_null() {
            EngineConfig::default()
        } else {
            let json = unsafe { parse_c_str(config_json) }
                .ok_or_else(|| FfiError::new(ErrorCode::InvalidArgument, "Config is not UTF-8"))?;
            serde_json::from_str(json)?
        };
        ResetEngine::new(options)
    });

    match result {
        Ok(Ok(engine)) => Box::into_raw(Box::new(engine)) as ResetEngineHandle,
        Ok(Err(e)) => {
            set_last_error(e.code, e.message);
            ptr::null_mut()
        }
        Err(_) => {
            set_last_error(ErrorCode::Panic, "Panic during engine creation");
            ptr::null_mut()
        }
    }
}

/// Destroy a reset engine instance. A running reset is cancelled and
/// awaited first so the volume gets restored.
///
/// # Safety
/// The handle must have been created by reset_engine_create() and must not be used after this call.
#[no_mangle]
pub extern "C" fn reset_engine_destroy(handle: ResetEngineHandle) {
    if handle.is_null() {
        return;
    }

    let _ = panic::catch_unwind(|| {
        let engine = unsafe { Box::from_raw(handle as *mut ResetEngine) };
        if let Ok(mut slot) = engine.run.lock() {
            if let Some(run) = slot.handle.take() {
                run.cancel();
                let _ = run.join();
            }
        };
    });
}

// ============================================================================
// FFI Functions - Device Queries
// ============================================================================

/// List active devices of one direction.
///
/// # Arguments
/// * `handle` - Engine handle
/// * `direction` - "playback" or "recording" (UTF-8 string)
///
/// # Returns
/// JSON `DeviceListResponse`. Caller must free with reset_engine_free_string().
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn reset_engine_list_devices(
    handle: ResetEngineHandle,
    direction: *const c_char,
) -> *mut c_char {
    string_call("device enumeration", || {
        unsafe { engine(handle)? };
        let direction = unsafe { parse_c_str(direction) }
            .and_then(Direction::parse)
            .ok_or_else(|| FfiError::new(ErrorCode::InvalidArgument, "Invalid direction"))?;

        let listings = with_system_audio(|backend| list_devices(backend, direction))?;
        let response = DeviceListResponse {
            devices: listings.into_iter().map(Into::into).collect(),
        };
        Ok(serde_json::to_string(&response)?)
    })
}

/// Get the names of the four current default devices.
///
/// # Returns
/// JSON `DefaultsResponse` keyed by config slot. Caller must free with
/// reset_engine_free_string(). Returns null on failure.
#[no_mangle]
pub extern "C" fn reset_engine_current_defaults(handle: ResetEngineHandle) -> *mut c_char {
    string_call("default lookup", || {
        unsafe { engine(handle)? };
        let current = with_system_audio(current_defaults)?;

        let mut defaults = Vec::new();
        for direction in Direction::ALL {
            for role in DeviceRole::ALL {
                defaults.push(DefaultSlotDto {
                    slot: slot_key(direction, role).to_string(),
                    name: current.get(direction, role).map(str::to_string),
                });
            }
        }
        Ok(serde_json::to_string(&DefaultsResponse { defaults })?)
    })
}

// ============================================================================
// FFI Functions - Reset Control
// ============================================================================

/// Start a reset on a worker thread.
///
/// # Returns
/// 0 on success, AlreadyRunning (-6) if a reset is still going in this process,
/// or another error code.
#[no_mangle]
pub extern "C" fn reset_engine_start(handle: ResetEngineHandle) -> i32 {
    code_call("reset start", || unsafe { engine(handle) }?.start())
}

/// Current progress as JSON `StatusResponse`. Never blocks on the worker.
///
/// # Returns
/// Caller must free with reset_engine_free_string(). Returns null on failure.
#[no_mangle]
pub extern "C" fn reset_engine_poll_status(handle: ResetEngineHandle) -> *mut c_char {
    string_call("status poll", || unsafe { engine(handle) }?.poll_status())
}

/// Ask the running reset to stop at its next check. A no-op when idle.
#[no_mangle]
pub extern "C" fn reset_engine_cancel(handle: ResetEngineHandle) -> i32 {
    code_call("cancel", || unsafe { engine(handle) }?.cancel())
}

// ============================================================================
// FFI Functions - Memory Management
// ============================================================================

/// Free a string allocated by this library.
///
/// # Safety
/// The pointer must have been returned by one of the reset_engine_* functions.
/// Do not call this on strings from other sources.
#[no_mangle]
pub extern "C" fn reset_engine_free_string(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }

    let _ = panic::catch_unwind(|| {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    });
}

// ============================================================================
// FFI Functions - Error Handling
// ============================================================================

/// Get the last error code.
///
/// # Returns
/// The error code from the last failed operation, or 0 if no error.
#[no_mangle]
pub extern "C" fn reset_engine_last_error_code() -> i32 {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(code, _)| *code as i32)
            .unwrap_or(0)
    })
}

/// Get the last error message.
///
/// # Returns
/// Error message string. Caller must free with reset_engine_free_string().
/// Returns null if no error.
#[no_mangle]
pub extern "C" fn reset_engine_last_error_message() -> *mut c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(_, msg)| alloc_c_string(msg))
            .unwrap_or(ptr::null_mut())
    })
}

// ============================================================================
// FFI Functions - Utility
// ============================================================================

/// Get the library version.
///
/// # Returns
/// Version string. Caller must free with reset_engine_free_string().
#[no_mangle]
pub extern "C" fn reset_engine_version() -> *mut c_char {
    alloc_c_string(env!("CARGO_PKG_VERSION"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use audio_reset_rs::{ResetSession, Step};
    use std::time::Duration;

    fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = unsafe { CStr::from_ptr(ptr).to_str().unwrap().to_string() };
        reset_engine_free_string(ptr);
        s
    }

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(
            ErrorCode::from(&AudioError::DeviceNotFound {
                name: "test".to_string()
            }),
            ErrorCode::DeviceNotFound
        );
        assert_eq!(ErrorCode::from(&RunError::Unsupported), ErrorCode::Unsupported);
        assert_eq!(ErrorCode::from(&RunError::WorkerPanicked), ErrorCode::WorkerFailed);
        assert_eq!(ErrorCode::from(&RunError::AlreadyRunning), ErrorCode::AlreadyRunning);
    }

    #[test]
    fn test_engine_lifecycle() {
        let handle = reset_engine_create(ptr::null());
        assert!(!handle.is_null());
        assert_eq!(reset_engine_last_error_code(), 0);
        reset_engine_destroy(handle);
    }

    #[test]
    fn test_create_rejects_bad_json() {
        let json = CString::new("{not json").unwrap();
        let handle = reset_engine_create(json.as_ptr());
        assert!(handle.is_null());
        assert_eq!(reset_engine_last_error_code(), ErrorCode::JsonError as i32);

        let message = take_string(reset_engine_last_error_message());
        assert!(!message.is_empty());
    }

    #[test]
    fn test_create_with_missing_config_file_uses_defaults() {
        let json = CString::new(r#"{"config_path": "/nonexistent/audio-reset/config.txt"}"#).unwrap();
        let handle = reset_engine_create(json.as_ptr());
        assert!(!handle.is_null());
        reset_engine_destroy(handle);
    }

    #[test]
    fn test_null_handle_is_rejected() {
        assert_eq!(reset_engine_start(ptr::null_mut()), ErrorCode::InvalidHandle as i32);
        assert_eq!(reset_engine_cancel(ptr::null_mut()), ErrorCode::InvalidHandle as i32);
        assert!(reset_engine_poll_status(ptr::null_mut()).is_null());
        assert_eq!(reset_engine_last_error_code(), ErrorCode::InvalidHandle as i32);
    }

    #[test]
    fn test_invalid_direction() {
        let handle = reset_engine_create(ptr::null());
        let direction = CString::new("sideways").unwrap();
        assert!(reset_engine_list_devices(handle, direction.as_ptr()).is_null());
        assert_eq!(reset_engine_last_error_code(), ErrorCode::InvalidArgument as i32);
        reset_engine_destroy(handle);
    }

    #[test]
    fn test_idle_status() {
        let handle = reset_engine_create(ptr::null());
        let json = take_string(reset_engine_poll_status(handle));
        let status: StatusResponse = serde_json::from_str(&json).unwrap();

        assert_eq!(status.state, "Idle");
        assert!(!status.running);
        assert!(status.report.is_none());
        assert_eq!(reset_engine_cancel(handle), 0);
        reset_engine_destroy(handle);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_start_unsupported_off_windows() {
        let handle = reset_engine_create(ptr::null());
        assert_eq!(reset_engine_start(handle), ErrorCode::Unsupported as i32);
        reset_engine_destroy(handle);
    }

    #[test]
    fn test_report_dto() {
        let mut session = ResetSession::new(Some(PathBuf::from("logs/run.log")));
        session.record(Step::KillProcesses, StepOutcome::Success, Duration::from_millis(12));
        session.record(
            Step::WaitForDevices,
            StepOutcome::TimedOut("after 30s".into()),
            Duration::from_secs(30),
        );
        session.set_state(PipelineState::Complete);

        let dto = ReportDto::from(&session.into_report());
        assert_eq!(dto.final_state, "Complete");
        assert_eq!(dto.exit_code, 0);
        assert_eq!(dto.steps.len(), 2);
        assert_eq!(dto.steps[0].outcome, "success");
        assert_eq!(dto.steps[0].elapsed_ms, 12);
        assert_eq!(dto.steps[1].outcome, "timed_out");
        assert_eq!(dto.steps[1].detail.as_deref(), Some("after 30s"));
        assert_eq!(dto.log_path.as_deref(), Some("logs/run.log"));
    }

    #[test]
    fn test_version() {
        let version = take_string(reset_engine_version());
        assert!(!version.is_empty());
    }
}
