//! Reset configuration.
//!
//! `ResetConfig` is the fully resolved input to one pipeline run. It is
//! read from a flat `KEY=VALUE` text file beside the executable; a missing
//! file means the built-in defaults.

use crate::audio::device::names_equal;
use crate::audio::{DeviceAssignments, DeviceRole, DeviceRoleAssignment, Direction};
use crate::launch::VendorApp;
use crate::poll::PollSpec;
use crate::process::{ProcessFilter, DEFAULT_PROTECTED, DEFAULT_VENDOR_FRAGMENTS};
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Config file name, looked up beside the executable.
pub const CONFIG_FILE_NAME: &str = "config.txt";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
const DEFAULT_SERVICE_WAIT_SECS: u64 = 30;
const DEFAULT_DEVICE_WAIT_SECS: u64 = 60;
const LAUNCH_POLL_ATTEMPTS: u32 = 10;
const DEFAULT_SAFE_VOLUME: f32 = 0.20;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid value for {key} on line {line}: {value:?}")]
    InvalidValue {
        key: String,
        line: usize,
        value: String,
    },

    #[error("{0} already exists")]
    AlreadyExists(PathBuf),
}

/// Every wait and settle interval of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetTimings {
    /// Pause after the kill pass so handles release
    pub kill_settle: Duration,

    /// Pause between stopping and starting services
    pub service_pause: Duration,

    pub service_poll: PollSpec,

    /// Process detection after each launch
    pub launch_poll: PollSpec,

    /// Vendor device readiness
    pub device_poll: PollSpec,

    /// Vendor window detection
    pub window_poll: PollSpec,

    /// Extra time given to an app once its window shows up
    pub window_grace: Duration,

    /// Pause before the default devices are assigned
    pub settle_before_defaults: Duration,
}

impl ResetTimings {
    /// Poll bounds derived from one interval and two maximum waits.
    pub fn with_waits(poll_interval: Duration, service_wait: Duration, device_wait: Duration) -> Self {
        Self {
            kill_settle: Duration::from_secs(1),
            service_pause: Duration::from_secs(1),
            service_poll: PollSpec::bounded(poll_interval, service_wait),
            launch_poll: PollSpec::attempts(LAUNCH_POLL_ATTEMPTS, poll_interval),
            device_poll: PollSpec::bounded(poll_interval, device_wait),
            window_poll: PollSpec::attempts(30, Duration::from_secs(1)),
            window_grace: Duration::from_secs(2),
            settle_before_defaults: Duration::from_secs(2),
        }
    }

    /// Same attempt counts with every sleep removed.
    pub fn zero() -> Self {
        let stock = Self::default();
        Self {
            kill_settle: Duration::ZERO,
            service_pause: Duration::ZERO,
            service_poll: stock.service_poll.immediate(),
            launch_poll: stock.launch_poll.immediate(),
            device_poll: stock.device_poll.immediate(),
            window_poll: stock.window_poll.immediate(),
            window_grace: Duration::ZERO,
            settle_before_defaults: Duration::ZERO,
        }
    }
}

impl Default for ResetTimings {
    fn default() -> Self {
        Self::with_waits(
            Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            Duration::from_secs(DEFAULT_SERVICE_WAIT_SECS),
            Duration::from_secs(DEFAULT_DEVICE_WAIT_SECS),
        )
    }
}

/// Everything vendor-specific: what to kill, what to relaunch, and how to
/// recognize its virtual devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorProfile {
    /// Substring carried by the vendor's virtual endpoint names
    pub device_tag: String,

    /// Active tagged playback endpoints that count as "devices ready"
    pub min_devices: usize,

    pub process_fragments: Vec<String>,
    pub protected: Vec<String>,

    /// Apps in launch order
    pub apps: Vec<VendorApp>,
}

impl VendorProfile {
    pub fn elgato() -> Self {
        Self {
            device_tag: "Elgato".to_string(),
            min_devices: 2,
            process_fragments: DEFAULT_VENDOR_FRAGMENTS.iter().map(|s| s.to_string()).collect(),
            protected: DEFAULT_PROTECTED.iter().map(|s| s.to_string()).collect(),
            apps: VendorApp::elgato_defaults(),
        }
    }

    pub fn process_filter(&self) -> ProcessFilter {
        ProcessFilter::new(self.protected.iter().cloned(), self.process_fragments.iter().cloned())
    }
}

impl Default for VendorProfile {
    fn default() -> Self {
        Self::elgato()
    }
}

/// Fully resolved pipeline input.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetConfig {
    pub assignments: DeviceAssignments,
    pub run_in_background: bool,
    pub show_notification: bool,
    pub vendor: VendorProfile,

    /// Endpoints unmuted and set to full volume in addition to the
    /// recording default
    pub extra_unmute: Vec<(Direction, String)>,

    /// Playback volume held while the reset runs (0.0 to 1.0)
    pub safe_volume: f32,

    pub timings: ResetTimings,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            assignments: DeviceAssignments::default(),
            run_in_background: false,
            show_notification: true,
            vendor: VendorProfile::default(),
            extra_unmute: Vec::new(),
            safe_volume: DEFAULT_SAFE_VOLUME,
            timings: ResetTimings::default(),
        }
    }
}

/// Optional keys that reshape the timings once the whole file is read.
#[derive(Default)]
struct TimingOverrides {
    poll_interval: Option<u64>,
    service_wait: Option<u64>,
    device_wait: Option<u64>,
}

impl ResetConfig {
    /// Default config path: `config.txt` beside the executable.
    pub fn default_path() -> Option<PathBuf> {
        crate::platform::exe_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
    }

    /// The four default-device assignments in apply order.
    pub fn role_assignments(&self) -> [DeviceRoleAssignment; 4] {
        self.assignments.to_assignments()
    }

    /// Endpoints to unmute at full volume: the recording default, then the
    /// extras, without duplicates.
    pub fn unmute_targets(&self) -> Vec<(Direction, String)> {
        let mut targets = vec![(Direction::Recording, self.assignments.record_default.clone())];
        for (direction, name) in &self.extra_unmute {
            let seen = targets
                .iter()
                .any(|(d, n)| d == direction && names_equal(n, name));
            if !seen {
                targets.push((*direction, name.clone()));
            }
        }
        targets
    }

    /// Read `path`. Returns `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Read `path`, falling back to the defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::load(path)?.unwrap_or_default())
    }

    /// Parse config text on top of the defaults.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut overrides = TimingOverrides::default();

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim_end_matches('\r');

            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                debug!(line = line_no, "Ignoring config line without '='");
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            let invalid = || ConfigError::InvalidValue {
                key: key.to_string(),
                line: line_no,
                value: value.to_string(),
            };

            match key {
                "PLAYBACK_DEFAULT" => config.assignments.playback_default = value.to_string(),
                "PLAYBACK_COMM" => config.assignments.playback_comm = value.to_string(),
                "RECORD_DEFAULT" => config.assignments.record_default = value.to_string(),
                "RECORD_COMM" => config.assignments.record_comm = value.to_string(),
                "RUN_IN_BACKGROUND" => config.run_in_background = parse_flag(value),
                "SHOW_NOTIFICATION" => config.show_notification = parse_flag(value),
                "VENDOR_DEVICE_TAG" => config.vendor.device_tag = value.to_string(),
                "MIN_VENDOR_DEVICES" => {
                    config.vendor.min_devices = value
                        .parse::<usize>()
                        .ok()
                        .filter(|n| *n >= 1)
                        .ok_or_else(invalid)?;
                }
                "POLL_INTERVAL_SECS" => {
                    overrides.poll_interval =
                        Some(value.parse::<u64>().ok().filter(|n| *n >= 1).ok_or_else(invalid)?);
                }
                "SERVICE_WAIT_SECS" => {
                    overrides.service_wait = Some(value.parse::<u64>().map_err(|_| invalid())?);
                }
                "DEVICE_WAIT_SECS" => {
                    overrides.device_wait = Some(value.parse::<u64>().map_err(|_| invalid())?);
                }
                "SAFE_VOLUME_PERCENT" => {
                    let percent = value
                        .parse::<u8>()
                        .ok()
                        .filter(|p| *p <= 100)
                        .ok_or_else(invalid)?;
                    config.safe_volume = f32::from(percent) / 100.0;
                }
                "UNMUTE_PLAYBACK" => {
                    config
                        .extra_unmute
                        .extend(split_names(value).map(|n| (Direction::Playback, n)));
                }
                "UNMUTE_RECORD" => {
                    config
                        .extra_unmute
                        .extend(split_names(value).map(|n| (Direction::Recording, n)));
                }
                _ => debug!(key, line = line_no, "Ignoring unknown config key"),
            }
        }

        if overrides.poll_interval.is_some()
            || overrides.service_wait.is_some()
            || overrides.device_wait.is_some()
        {
            config.timings = ResetTimings::with_waits(
                Duration::from_secs(overrides.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECS)),
                Duration::from_secs(overrides.service_wait.unwrap_or(DEFAULT_SERVICE_WAIT_SECS)),
                Duration::from_secs(overrides.device_wait.unwrap_or(DEFAULT_DEVICE_WAIT_SECS)),
            );
        }

        Ok(config)
    }

    /// Render the config file text. Optional keys are written only when
    /// they differ from the defaults.
    pub fn render(&self, created: DateTime<Local>) -> String {
        let defaults = Self::default();
        let mut out = String::new();

        out.push_str("# Audio Reset Configuration\n");
        let _ = writeln!(out, "# Created on {}", created.format("%Y-%m-%d %H:%M:%S"));
        out.push_str("# Delete this file to restore the built-in defaults\n\n");

        for assignment in self.role_assignments() {
            let _ = writeln!(out, "{}={}", slot_key(assignment.direction, assignment.role), assignment.target);
        }
        let _ = writeln!(out, "RUN_IN_BACKGROUND={}", u8::from(self.run_in_background));
        let _ = writeln!(out, "SHOW_NOTIFICATION={}", u8::from(self.show_notification));

        if self.vendor.device_tag != defaults.vendor.device_tag {
            let _ = writeln!(out, "VENDOR_DEVICE_TAG={}", self.vendor.device_tag);
        }
        if self.vendor.min_devices != defaults.vendor.min_devices {
            let _ = writeln!(out, "MIN_VENDOR_DEVICES={}", self.vendor.min_devices);
        }
        // Waits are written back as the interval times the attempt count,
        // which parses to the same attempt count.
        let service = self.timings.service_poll;
        let device = self.timings.device_poll;
        if !service.interval.is_zero() && !device.interval.is_zero() {
            for (key, secs, default) in [
                ("POLL_INTERVAL_SECS", service.interval.as_secs(), DEFAULT_POLL_INTERVAL_SECS),
                (
                    "SERVICE_WAIT_SECS",
                    (service.interval * service.max_attempts).as_secs(),
                    DEFAULT_SERVICE_WAIT_SECS,
                ),
                (
                    "DEVICE_WAIT_SECS",
                    (device.interval * device.max_attempts).as_secs(),
                    DEFAULT_DEVICE_WAIT_SECS,
                ),
            ] {
                if secs != default {
                    let _ = writeln!(out, "{}={}", key, secs);
                }
            }
        }
        if self.safe_volume != defaults.safe_volume {
            let _ = writeln!(out, "SAFE_VOLUME_PERCENT={}", (self.safe_volume * 100.0).round() as u8);
        }
        for (direction, key) in [
            (Direction::Playback, "UNMUTE_PLAYBACK"),
            (Direction::Recording, "UNMUTE_RECORD"),
        ] {
            let names: Vec<&str> = self
                .extra_unmute
                .iter()
                .filter(|(d, _)| *d == direction)
                .map(|(_, n)| n.as_str())
                .collect();
            if !names.is_empty() {
                let _ = writeln!(out, "{}={}", key, names.join(";"));
            }
        }

        out
    }

    /// Write the config file. Refuses to replace an existing file unless
    /// `overwrite` is set.
    pub fn save(&self, path: &Path, overwrite: bool) -> Result<(), ConfigError> {
        if !overwrite && path.exists() {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }
        std::fs::write(path, self.render(Local::now())).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Configured slots whose name differs from the current OS default.
    ///
    /// The comparison is exact and case-sensitive; a slot with no current
    /// default counts as a mismatch.
    pub fn mismatches(&self, current: &CurrentDefaults) -> Vec<Mismatch> {
        self.role_assignments()
            .into_iter()
            .filter_map(|assignment| {
                let actual = current.get(assignment.direction, assignment.role);
                if actual == Some(assignment.target.as_str()) {
                    return None;
                }
                Some(Mismatch {
                    current: actual.map(str::to_string),
                    assignment,
                })
            })
            .collect()
    }
}

/// One slot whose OS default differs from the configured name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub assignment: DeviceRoleAssignment,
    pub current: Option<String>,
}

/// Names of the current OS default devices, per slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentDefaults {
    slots: Vec<((Direction, DeviceRole), String)>,
}

impl CurrentDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, direction: Direction, role: DeviceRole, name: impl Into<String>) {
        self.slots.retain(|(slot, _)| *slot != (direction, role));
        self.slots.push(((direction, role), name.into()));
    }

    pub fn get(&self, direction: Direction, role: DeviceRole) -> Option<&str> {
        self.slots
            .iter()
            .find(|(slot, _)| *slot == (direction, role))
            .map(|(_, name)| name.as_str())
    }
}

/// Config key of a default-device slot.
pub fn slot_key(direction: Direction, role: DeviceRole) -> &'static str {
    match (direction, role) {
        (Direction::Playback, DeviceRole::Console) => "PLAYBACK_DEFAULT",
        (Direction::Playback, DeviceRole::Communications) => "PLAYBACK_COMM",
        (Direction::Recording, DeviceRole::Console) => "RECORD_DEFAULT",
        (Direction::Recording, DeviceRole::Communications) => "RECORD_COMM",
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn split_names(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(';')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_core_keys() {
        let text = "# comment\r\n\
                    \r\n\
                    PLAYBACK_DEFAULT=Speakers (X)\r\n\
                    PLAYBACK_COMM=Headset (Y)\n\
                    RECORD_DEFAULT=Mic (Z)\n\
                    RECORD_COMM=Mic (Z)\n\
                    RUN_IN_BACKGROUND=TRUE\n\
                    SHOW_NOTIFICATION=0\n";

        let config = ResetConfig::parse(text).unwrap();

        assert_eq!(config.assignments.playback_default, "Speakers (X)");
        assert_eq!(config.assignments.playback_comm, "Headset (Y)");
        assert_eq!(config.assignments.record_default, "Mic (Z)");
        assert!(config.run_in_background);
        assert!(!config.show_notification);
    }

    #[test]
    fn test_missing_keys_keep_defaults() {
        let config = ResetConfig::parse("RECORD_COMM=Other Mic\n").unwrap();
        let defaults = ResetConfig::default();

        assert_eq!(config.assignments.playback_default, defaults.assignments.playback_default);
        assert_eq!(config.assignments.record_comm, "Other Mic");
        assert!(config.show_notification);
        assert!(!config.run_in_background);
    }

    #[test]
    fn test_unknown_keys_and_bad_lines_are_ignored() {
        let config = ResetConfig::parse("INSTALL_DIR=C:\\Tools\nno equals sign\n").unwrap();
        assert_eq!(config, ResetConfig::default());
    }

    #[test]
    fn test_value_may_contain_equals() {
        let config = ResetConfig::parse("PLAYBACK_DEFAULT=A=B\n").unwrap();
        assert_eq!(config.assignments.playback_default, "A=B");
    }

    #[test]
    fn test_vendor_and_timing_keys() {
        let text = "VENDOR_DEVICE_TAG=Acme\n\
                    MIN_VENDOR_DEVICES=1\n\
                    POLL_INTERVAL_SECS=5\n\
                    DEVICE_WAIT_SECS=20\n\
                    SAFE_VOLUME_PERCENT=35\n";

        let config = ResetConfig::parse(text).unwrap();

        assert_eq!(config.vendor.device_tag, "Acme");
        assert_eq!(config.vendor.min_devices, 1);
        assert_eq!(config.timings.device_poll.max_attempts, 4);
        assert_eq!(config.timings.device_poll.interval, Duration::from_secs(5));
        assert_eq!(config.timings.service_poll.max_attempts, 6);
        assert!((config.safe_volume - 0.35).abs() < f32::EPSILON);
    }

    #[test]
    fn test_invalid_number_names_key_and_line() {
        let err = ResetConfig::parse("# header\nMIN_VENDOR_DEVICES=zero\n").unwrap_err();
        match err {
            ConfigError::InvalidValue { key, line, value } => {
                assert_eq!(key, "MIN_VENDOR_DEVICES");
                assert_eq!(line, 2);
                assert_eq!(value, "zero");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(ResetConfig::parse("SAFE_VOLUME_PERCENT=150").is_err());
        assert!(ResetConfig::parse("MIN_VENDOR_DEVICES=0").is_err());
    }

    #[test]
    fn test_unmute_targets_start_with_record_default() {
        let config = ResetConfig::parse(
            "RECORD_DEFAULT=Mic (Z)\n\
             UNMUTE_PLAYBACK=Speakers (Razer); Monitor \n\
             UNMUTE_RECORD=mic (z)\n",
        )
        .unwrap();

        assert_eq!(
            config.unmute_targets(),
            vec![
                (Direction::Recording, "Mic (Z)".to_string()),
                (Direction::Playback, "Speakers (Razer)".to_string()),
                (Direction::Playback, "Monitor".to_string()),
            ]
        );
    }

    #[test]
    fn test_render_then_parse_preserves_settings() {
        let mut config = ResetConfig::default();
        config.assignments.playback_comm = "Headset (Y)".to_string();
        config.run_in_background = true;
        config.vendor.min_devices = 3;
        config.extra_unmute.push((Direction::Playback, "Speakers".to_string()));

        let created = Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let text = config.render(created);

        assert!(text.starts_with("# Audio Reset Configuration\n# Created on 2024-03-05 14:07:09\n"));
        assert!(text.contains("RUN_IN_BACKGROUND=1\n"));
        assert!(!text.contains("VENDOR_DEVICE_TAG"));
        assert_eq!(ResetConfig::parse(&text).unwrap(), config);
    }

    #[test]
    fn test_render_keeps_wait_overrides() {
        let text = "POLL_INTERVAL_SECS=5\n\
                    SERVICE_WAIT_SECS=45\n\
                    DEVICE_WAIT_SECS=20\n";
        let config = ResetConfig::parse(text).unwrap();

        let rendered = config.render(Local::now());

        assert!(rendered.contains("POLL_INTERVAL_SECS=5\n"));
        assert!(rendered.contains("SERVICE_WAIT_SECS=45\n"));
        assert!(rendered.contains("DEVICE_WAIT_SECS=20\n"));
        assert_eq!(ResetConfig::parse(&rendered).unwrap(), config);
    }

    #[test]
    fn test_render_omits_stock_waits() {
        let rendered = ResetConfig::default().render(Local::now());

        assert!(!rendered.contains("POLL_INTERVAL_SECS"));
        assert!(!rendered.contains("SERVICE_WAIT_SECS"));
        assert!(!rendered.contains("DEVICE_WAIT_SECS"));
    }

    #[test]
    fn test_mismatches_are_case_sensitive() {
        let config = ResetConfig::default();
        let mut current = CurrentDefaults::new();
        current.set(Direction::Playback, DeviceRole::Console, &config.assignments.playback_default);
        current.set(
            Direction::Playback,
            DeviceRole::Communications,
            config.assignments.playback_comm.to_uppercase(),
        );
        current.set(Direction::Recording, DeviceRole::Console, &config.assignments.record_default);

        let mismatches = config.mismatches(&current);

        assert_eq!(mismatches.len(), 2);
        assert_eq!(mismatches[0].assignment.label(), "Playback comms");
        assert_eq!(mismatches[1].assignment.label(), "Recording comms");
        assert_eq!(mismatches[1].current, None);
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let path = std::env::temp_dir().join("audio-reset-missing-config-4f1c.txt");
        assert!(ResetConfig::load(&path).unwrap().is_none());
        assert_eq!(ResetConfig::load_or_default(&path).unwrap(), ResetConfig::default());
    }

    #[test]
    fn test_save_refuses_overwrite() {
        let dir = std::env::temp_dir().join(format!("audio-reset-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE_NAME);
        let _ = std::fs::remove_file(&path);

        let config = ResetConfig::default();
        config.save(&path, false).unwrap();
        assert!(matches!(
            config.save(&path, false),
            Err(ConfigError::AlreadyExists(_))
        ));
        config.save(&path, true).unwrap();
        assert_eq!(ResetConfig::load(&path).unwrap(), Some(config));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_zero_timings_keep_attempts() {
        let zero = ResetTimings::zero();
        let stock = ResetTimings::default();
        assert_eq!(zero.device_poll.max_attempts, stock.device_poll.max_attempts);
        assert_eq!(zero.service_poll.max_attempts, 15);
        assert_eq!(zero.launch_poll.max_attempts, 10);
        assert_eq!(zero.kill_settle, Duration::ZERO);
    }
}
