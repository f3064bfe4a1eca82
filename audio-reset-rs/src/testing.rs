//! In-memory fakes of the OS traits for unit tests.

use crate::audio::{AudioBackend, AudioDevice, AudioEndpoints, AudioError, DeviceRole, Direction};
use crate::launch::{AppLauncher, InstallLocator, LaunchError};
use crate::logging::TaggedFormat;
use crate::process::{ProcessError, ProcessInventory, ProcessRecord};
use crate::service::{ServiceControl, ServiceError, ServiceState, ServiceStatus};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

struct FakeEndpoint {
    device: AudioDevice,
    muted: bool,
    level: f32,
    /// Listings left before the endpoint turns active
    pending: Option<u32>,
}

#[derive(Default)]
struct AudioState {
    endpoints: Vec<FakeEndpoint>,
    defaults: HashMap<(Direction, DeviceRole), String>,
    failing_defaults: HashSet<String>,
    volume_writes: Vec<(String, f32)>,
}

/// Endpoint table with a recorded mutation count.
#[derive(Default)]
pub struct FakeAudio {
    state: RefCell<AudioState>,
    mutations: Cell<usize>,
    failing_connects: Cell<u32>,
    next_id: Cell<u32>,
}

impl FakeAudio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an active endpoint at full volume, unmuted. Returns its id.
    pub fn add(&self, direction: Direction, name: &str) -> String {
        self.insert(direction, name, None)
    }

    /// Add an endpoint that turns active after `listings` enumerations.
    pub fn add_pending(&self, direction: Direction, name: &str, listings: u32) -> String {
        self.insert(direction, name, Some(listings))
    }

    fn insert(&self, direction: Direction, name: &str, pending: Option<u32>) -> String {
        let n = self.next_id.get();
        self.next_id.set(n + 1);
        let id = format!("{{0.0.{}.00000000}}.{{fake-{}}}", direction as u8, n);

        let mut device = AudioDevice::new(id.clone(), name, direction);
        device.is_active = pending.is_none();
        self.state.borrow_mut().endpoints.push(FakeEndpoint {
            device,
            muted: false,
            level: 1.0,
            pending,
        });
        id
    }

    pub fn set_active(&self, id: &str, active: bool) {
        self.with_endpoint(id, |e| e.device.is_active = active);
    }

    /// Setup helper; not counted as a mutation.
    pub fn set_default(&self, id: &str, role: DeviceRole) {
        let mut state = self.state.borrow_mut();
        let direction = state
            .endpoints
            .iter()
            .find(|e| e.device.id == id)
            .map(|e| e.device.direction);
        if let Some(direction) = direction {
            state.defaults.insert((direction, role), id.to_string());
        }
    }

    pub fn default_id(&self, direction: Direction, role: DeviceRole) -> Option<String> {
        self.state.borrow().defaults.get(&(direction, role)).cloned()
    }

    pub fn set_muted(&self, id: &str, muted: bool) {
        self.with_endpoint(id, |e| e.muted = muted);
    }

    pub fn set_level(&self, id: &str, level: f32) {
        self.with_endpoint(id, |e| e.level = level);
    }

    pub fn is_muted(&self, id: &str) -> Option<bool> {
        self.find(id, |e| e.muted)
    }

    pub fn level(&self, id: &str) -> Option<f32> {
        self.find(id, |e| e.level)
    }

    /// Number of mutating trait calls made so far.
    pub fn mutation_count(&self) -> usize {
        self.mutations.get()
    }

    /// Levels written to `id` through the trait, in order.
    pub fn volume_history(&self, id: &str) -> Vec<f32> {
        self.state
            .borrow()
            .volume_writes
            .iter()
            .filter(|(target, _)| target == id)
            .map(|(_, level)| *level)
            .collect()
    }

    /// Make the next `count` connects fail.
    pub fn fail_connects(&self, count: u32) {
        self.failing_connects.set(count);
    }

    pub fn fail_set_default(&self, id: &str) {
        self.state
            .borrow_mut()
            .failing_defaults
            .insert(id.to_string());
    }

    fn with_endpoint(&self, id: &str, f: impl FnOnce(&mut FakeEndpoint)) {
        if let Some(e) = self
            .state
            .borrow_mut()
            .endpoints
            .iter_mut()
            .find(|e| e.device.id == id)
        {
            f(e);
        }
    }

    fn find<T>(&self, id: &str, f: impl FnOnce(&FakeEndpoint) -> T) -> Option<T> {
        self.state
            .borrow()
            .endpoints
            .iter()
            .find(|e| e.device.id == id)
            .map(f)
    }

    fn mutated(&self) {
        self.mutations.set(self.mutations.get() + 1);
    }
}

impl AudioBackend for FakeAudio {
    fn connect(&self) -> Result<Box<dyn AudioEndpoints + '_>, AudioError> {
        let failing = self.failing_connects.get();
        if failing > 0 {
            self.failing_connects.set(failing - 1);
            return Err(AudioError::Unavailable("enumerator refused".to_string()));
        }
        Ok(Box::new(FakeConnection { audio: self }))
    }
}

struct FakeConnection<'a> {
    audio: &'a FakeAudio,
}

impl FakeConnection<'_> {
    fn lookup(&self, device: &AudioDevice) -> Result<(), AudioError> {
        self.audio
            .find(&device.id, |_| ())
            .ok_or_else(|| AudioError::DeviceNotFound {
                name: device.name.clone(),
            })
    }
}

impl AudioEndpoints for FakeConnection<'_> {
    fn list_endpoints(&self, direction: Direction) -> Result<Vec<AudioDevice>, AudioError> {
        let mut state = self.audio.state.borrow_mut();
        for endpoint in state.endpoints.iter_mut() {
            if let Some(left) = endpoint.pending {
                if left <= 1 {
                    endpoint.pending = None;
                    endpoint.device.is_active = true;
                } else {
                    endpoint.pending = Some(left - 1);
                }
            }
        }

        Ok(state
            .endpoints
            .iter()
            .filter(|e| e.device.direction == direction && e.device.is_active)
            .map(|e| e.device.clone())
            .collect())
    }

    fn default_endpoint(
        &self,
        direction: Direction,
        role: DeviceRole,
    ) -> Result<Option<AudioDevice>, AudioError> {
        let state = self.audio.state.borrow();
        Ok(state.defaults.get(&(direction, role)).and_then(|id| {
            state
                .endpoints
                .iter()
                .find(|e| &e.device.id == id)
                .map(|e| e.device.clone())
        }))
    }

    fn set_default_endpoint(&self, device: &AudioDevice, role: DeviceRole) -> Result<(), AudioError> {
        self.lookup(device)?;
        self.audio.mutated();
        let mut state = self.audio.state.borrow_mut();
        if state.failing_defaults.contains(&device.id) {
            return Err(AudioError::Unavailable("policy config refused".to_string()));
        }
        state
            .defaults
            .insert((device.direction, role), device.id.clone());
        Ok(())
    }

    fn volume(&self, device: &AudioDevice) -> Result<f32, AudioError> {
        self.lookup(device)?;
        Ok(self.audio.level(&device.id).unwrap_or_default())
    }

    fn set_volume(&self, device: &AudioDevice, level: f32) -> Result<(), AudioError> {
        self.lookup(device)?;
        self.audio.mutated();
        self.audio.set_level(&device.id, level);
        self.audio
            .state
            .borrow_mut()
            .volume_writes
            .push((device.id.clone(), level));
        Ok(())
    }

    fn set_mute(&self, device: &AudioDevice, muted: bool) -> Result<(), AudioError> {
        self.lookup(device)?;
        self.audio.mutated();
        self.audio.set_muted(&device.id, muted);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Processes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ProcessTable {
    processes: Vec<ProcessRecord>,
    terminated: Vec<u32>,
    denied: HashSet<u32>,
    next_pid: u32,
    snapshot_fails: bool,
}

/// Process table shared with `FakeLauncher`.
#[derive(Clone, Default)]
pub struct FakeProcesses {
    table: Rc<RefCell<ProcessTable>>,
}

impl FakeProcesses {
    pub fn new() -> Self {
        let processes = Self::default();
        processes.table.borrow_mut().next_pid = 1000;
        processes
    }

    pub fn spawn(&self, image_name: &str, pid: u32) {
        self.table
            .borrow_mut()
            .processes
            .push(ProcessRecord::new(image_name, pid));
    }

    /// Add a process with a fresh pid.
    pub fn spawn_next(&self, image_name: &str) -> u32 {
        let pid = {
            let mut table = self.table.borrow_mut();
            table.next_pid += 1;
            table.next_pid
        };
        self.spawn(image_name, pid);
        pid
    }

    /// Pids terminated so far, in order.
    pub fn terminated(&self) -> Vec<u32> {
        self.table.borrow().terminated.clone()
    }

    pub fn deny_terminate(&self, pid: u32) {
        self.table.borrow_mut().denied.insert(pid);
    }

    pub fn fail_snapshot(&self) {
        self.table.borrow_mut().snapshot_fails = true;
    }
}

impl ProcessInventory for FakeProcesses {
    fn list_processes(&self) -> Result<Vec<ProcessRecord>, ProcessError> {
        let table = self.table.borrow();
        if table.snapshot_fails {
            return Err(ProcessError::Unavailable("snapshot refused".to_string()));
        }
        Ok(table.processes.clone())
    }

    fn terminate(&self, pid: u32) -> Result<(), ProcessError> {
        let mut table = self.table.borrow_mut();
        if table.denied.contains(&pid) {
            return Err(ProcessError::Unavailable("access denied".to_string()));
        }
        let before = table.processes.len();
        table.processes.retain(|p| p.pid != pid);
        if table.processes.len() == before {
            return Err(ProcessError::NotFound { pid });
        }
        table.terminated.push(pid);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

struct FakeService {
    running: bool,
    start_delay: u32,
    /// Queries left that still report start-pending after a start
    warming: u32,
    stop_delay: u32,
    /// Queries left that still report stop-pending after a stop
    cooling: u32,
    /// Service this one depends on
    depends_on: Option<String>,
}

impl FakeService {
    fn status(&self) -> ServiceStatus {
        if self.warming > 0 {
            ServiceStatus::StartPending
        } else if self.cooling > 0 {
            ServiceStatus::StopPending
        } else if self.running {
            ServiceStatus::Running
        } else {
            ServiceStatus::Stopped
        }
    }
}

/// Service table with pending states and dependencies the way the service
/// control manager enforces them.
#[derive(Default)]
pub struct FakeServices {
    services: RefCell<HashMap<String, FakeService>>,
    commands: RefCell<Vec<String>>,
}

impl FakeServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, name: &str, running: bool) {
        self.services.borrow_mut().insert(
            name.to_string(),
            FakeService {
                running,
                start_delay: 0,
                warming: 0,
                stop_delay: 0,
                cooling: 0,
                depends_on: None,
            },
        );
    }

    /// After a start, the next `queries` queries report start-pending.
    pub fn set_start_delay(&self, name: &str, queries: u32) {
        if let Some(service) = self.services.borrow_mut().get_mut(name) {
            service.start_delay = queries;
        }
    }

    /// After a stop, the next `queries` queries report stop-pending.
    pub fn set_stop_delay(&self, name: &str, queries: u32) {
        if let Some(service) = self.services.borrow_mut().get_mut(name) {
            service.stop_delay = queries;
        }
    }

    /// `dependent` cannot run without `dependency`, so `dependency` refuses
    /// to stop until `dependent` is fully stopped.
    pub fn set_dependency(&self, dependent: &str, dependency: &str) {
        if let Some(service) = self.services.borrow_mut().get_mut(dependent) {
            service.depends_on = Some(dependency.to_string());
        }
    }

    /// Control commands issued so far, e.g. "stop audiosrv".
    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }
}

impl ServiceControl for FakeServices {
    fn stop(&self, name: &str) -> Result<(), ServiceError> {
        self.commands.borrow_mut().push(format!("stop {}", name));
        let mut services = self.services.borrow_mut();
        if !services.contains_key(name) {
            return Err(ServiceError::NotFound(name.to_string()));
        }

        let dependents_up = services.values().any(|other| {
            other.depends_on.as_deref() == Some(name) && other.status() != ServiceStatus::Stopped
        });

        let service = services
            .get_mut(name)
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))?;
        match service.status() {
            ServiceStatus::Stopped | ServiceStatus::StopPending => Ok(()),
            _ if dependents_up => Err(ServiceError::DependentsRunning(name.to_string())),
            _ => {
                service.running = false;
                service.warming = 0;
                service.cooling = service.stop_delay;
                Ok(())
            }
        }
    }

    fn start(&self, name: &str) -> Result<(), ServiceError> {
        self.commands.borrow_mut().push(format!("start {}", name));
        let mut services = self.services.borrow_mut();
        let service = services
            .get_mut(name)
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))?;

        if !service.running {
            service.running = true;
            service.cooling = 0;
            service.warming = service.start_delay;
        }
        Ok(())
    }

    fn query(&self, name: &str) -> Result<ServiceState, ServiceError> {
        let mut services = self.services.borrow_mut();
        let service = services
            .get_mut(name)
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))?;

        let status = service.status();
        service.warming = service.warming.saturating_sub(1);
        if service.warming == 0 {
            service.cooling = service.cooling.saturating_sub(1);
        }

        Ok(ServiceState {
            name: name.to_string(),
            status,
        })
    }
}

// ---------------------------------------------------------------------------
// Launcher and locator
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LauncherState {
    files: HashMap<PathBuf, String>,
    without_process: HashSet<PathBuf>,
    failing: HashSet<PathBuf>,
    spawned: Vec<PathBuf>,
    minimized: Vec<u32>,
    windows: HashSet<String>,
    windows_on_spawn: HashMap<String, String>,
}

/// Launcher whose spawns add entries to a `FakeProcesses` table.
pub struct FakeLauncher {
    processes: FakeProcesses,
    state: RefCell<LauncherState>,
}

impl FakeLauncher {
    pub fn new(processes: &FakeProcesses) -> Self {
        Self {
            processes: processes.clone(),
            state: RefCell::default(),
        }
    }

    /// Make `path` exist; spawning it starts `image_name`.
    pub fn install(&self, path: impl AsRef<Path>, image_name: &str) {
        self.state
            .borrow_mut()
            .files
            .insert(path.as_ref().to_path_buf(), image_name.to_string());
    }

    /// Spawning `path` succeeds but no process ever shows up.
    pub fn spawn_without_process(&self, path: impl AsRef<Path>) {
        self.state
            .borrow_mut()
            .without_process
            .insert(path.as_ref().to_path_buf());
    }

    pub fn fail_spawn(&self, path: impl AsRef<Path>) {
        self.state
            .borrow_mut()
            .failing
            .insert(path.as_ref().to_path_buf());
    }

    /// Open a window titled `title` once `image_name` is spawned.
    pub fn window_on_spawn(&self, image_name: &str, title: &str) {
        self.state
            .borrow_mut()
            .windows_on_spawn
            .insert(image_name.to_string(), title.to_string());
    }

    pub fn open_window(&self, title: &str) {
        self.state.borrow_mut().windows.insert(title.to_string());
    }

    pub fn spawned(&self) -> Vec<PathBuf> {
        self.state.borrow().spawned.clone()
    }

    pub fn minimized(&self) -> Vec<u32> {
        self.state.borrow().minimized.clone()
    }
}

impl AppLauncher for FakeLauncher {
    fn exists(&self, path: &Path) -> bool {
        self.state.borrow().files.contains_key(path)
    }

    fn spawn_minimized(&self, path: &Path) -> Result<u32, LaunchError> {
        let mut state = self.state.borrow_mut();
        state.spawned.push(path.to_path_buf());

        if state.failing.contains(path) {
            return Err(LaunchError::Unavailable("spawn refused".to_string()));
        }
        let image_name = state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| LaunchError::NotFound(path.to_path_buf()))?;

        if state.without_process.contains(path) {
            return Ok(0);
        }

        if let Some(title) = state.windows_on_spawn.get(&image_name).cloned() {
            state.windows.insert(title);
        }
        Ok(self.processes.spawn_next(&image_name))
    }

    fn minimize_windows_of(&self, pids: &[u32]) -> Result<usize, LaunchError> {
        self.state.borrow_mut().minimized.extend_from_slice(pids);
        Ok(pids.len())
    }

    fn has_window_titled(&self, title: &str) -> bool {
        self.state.borrow().windows.contains(title)
    }
}

/// Install locations keyed by display-name fragment.
#[derive(Default)]
pub struct FakeLocator {
    locations: HashMap<String, PathBuf>,
}

impl FakeLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, fragment: &str, dir: impl Into<PathBuf>) -> Self {
        self.locations.insert(fragment.to_string(), dir.into());
        self
    }
}

impl InstallLocator for FakeLocator {
    fn install_location(&self, display_name_fragment: &str) -> Option<PathBuf> {
        self.locations.get(display_name_fragment).cloned()
    }
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `f` with a thread-local subscriber and return what it logged,
/// rendered the way the console shows it.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let out = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .event_format(TaggedFormat)
        .with_writer(out.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, out.text())
}
