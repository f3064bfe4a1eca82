use anyhow::{Context, Result};
use audio_reset_rs::app::{self, FrontEnd};
use audio_reset_rs::audio::{DeviceRole, Direction};
use audio_reset_rs::cancel::CancelToken;
use audio_reset_rs::config::{slot_key, ResetConfig};
use audio_reset_rs::logging::{default_log_dir, init_logging};
use audio_reset_rs::runner::{config_from_current, current_defaults, list_devices, spawn_reset, with_system_audio};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "audio-reset", version)]
#[command(about = "Reset Windows audio: restart vendor apps and audio services, then restore the default devices")]
struct Args {
    /// Config file (default: config.txt beside the executable)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Folder for per-run log files (default: logs beside the executable)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Show a tray icon while the reset runs
    #[arg(long, global = true)]
    tray: bool,

    /// Stay in the console even when the config asks for a background run
    #[arg(long, global = true)]
    console: bool,

    /// Skip the completion message box
    #[arg(long, global = true)]
    no_notify: bool,

    /// Do not ask for administrator rights
    #[arg(long, global = true)]
    no_elevate: bool,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Run the reset (default)
    Run,

    /// List active playback and recording devices
    Devices,

    /// Compare the configured devices with the current Windows defaults
    Check,

    /// Write a config file from the current Windows defaults
    Init {
        /// Replace an existing config file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let args = Args::parse();

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_reset(&args),
        Command::Devices => print_devices(),
        Command::Check => check_defaults(&args),
        Command::Init { force } => init_config(&args, force),
    }
}

fn config_path(args: &Args) -> Result<PathBuf> {
    args.config
        .clone()
        .or_else(ResetConfig::default_path)
        .context("Cannot locate the executable folder")
}

fn run_reset(args: &Args) -> Result<i32> {
    if !args.no_elevate {
        if let Some(code) = elevate_if_needed()? {
            return Ok(code);
        }
    }

    let path = config_path(args)?;
    let config = ResetConfig::load_or_default(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    let log_dir = args.log_dir.clone().unwrap_or_else(default_log_dir);
    let log = init_logging(&log_dir, args.verbose).context("Failed to initialize logging")?;
    debug!(config = %path.display(), "Configuration loaded");

    let cancel = CancelToken::new();
    let ctrl_c = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("Ctrl+C received, cancelling...");
        ctrl_c.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    let front_end = FrontEnd::choose(config.run_in_background, args.tray, args.console);
    let notify = config.show_notification && !args.no_notify;

    let handle = spawn_reset(config, Some(log.path.clone()), cancel)?;
    let report = match front_end {
        FrontEnd::Console => app::run_console(handle)?,
        #[cfg(windows)]
        FrontEnd::Tray => app::run_tray(handle)?,
        #[cfg(not(windows))]
        FrontEnd::Tray => app::run_console(handle)?,
    };

    if notify {
        #[cfg(windows)]
        audio_reset_rs::platform::notify::show_message(
            "Audio Reset",
            &report.notification_text(),
            report.has_warnings(),
        );
    }

    drop(log);
    Ok(report.exit_status().code())
}

/// Relaunch elevated when needed. Returns the exit code to use when this
/// process should stop here.
#[cfg(windows)]
fn elevate_if_needed() -> Result<Option<i32>> {
    use audio_reset_rs::platform::elevation::{is_elevated, relaunch_elevated, ElevationError};
    use audio_reset_rs::session::ExitStatus;

    if is_elevated().context("Failed to query process elevation")? {
        return Ok(None);
    }

    let relaunch: Vec<String> = std::env::args().skip(1).collect();

    match relaunch_elevated(&relaunch) {
        Ok(code) => Ok(Some(code as i32)),
        Err(ElevationError::Declined) => {
            eprintln!("Administrator rights were declined.");
            Ok(Some(ExitStatus::ElevationDeclined.code()))
        }
        Err(e) => Err(e).context("Failed to relaunch as administrator"),
    }
}

#[cfg(not(windows))]
fn elevate_if_needed() -> Result<Option<i32>> {
    Ok(None)
}

fn print_devices() -> Result<i32> {
    let listings = with_system_audio(|backend| {
        let mut all = Vec::new();
        for direction in Direction::ALL {
            all.push((direction, list_devices(backend, direction)?));
        }
        Ok(all)
    })?;

    for (direction, devices) in listings {
        println!("{} devices:", direction);
        if devices.is_empty() {
            println!("    (none)");
        }
        for listing in devices {
            let marks: Vec<&str> = listing.default_for.iter().map(DeviceRole::as_str).collect();
            if marks.is_empty() {
                println!("    {}", listing.device.name);
            } else {
                println!("    {} [{}]", listing.device.name, marks.join(", "));
            }
        }
    }
    Ok(0)
}

fn check_defaults(args: &Args) -> Result<i32> {
    let path = config_path(args)?;
    let Some(config) = ResetConfig::load(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?
    else {
        println!("No config file at {}; nothing to check.", path.display());
        return Ok(0);
    };

    let current = with_system_audio(current_defaults)?;
    let mismatches = config.mismatches(&current);

    if mismatches.is_empty() {
        println!("All four default devices match the config.");
        return Ok(0);
    }

    for mismatch in &mismatches {
        println!(
            "{} ({}): configured \"{}\", current \"{}\"",
            mismatch.assignment.label(),
            slot_key(mismatch.assignment.direction, mismatch.assignment.role),
            mismatch.assignment.target,
            mismatch.current.as_deref().unwrap_or("(none)")
        );
    }
    Ok(1)
}

fn init_config(args: &Args, force: bool) -> Result<i32> {
    let path = config_path(args)?;
    let current = with_system_audio(current_defaults)?;
    let config = config_from_current(&current);

    config
        .save(&path, force)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Wrote {}", path.display());
    for assignment in config.role_assignments() {
        println!("    {}: {}", assignment.label(), assignment.target);
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_reset_rs::platform::elevation::relaunch_parameters;

    /// Argv the elevated child sees, split the way the parent built it.
    fn child_args(parent_args: &[&str]) -> Result<Args, clap::Error> {
        let params = relaunch_parameters(parent_args);
        Args::try_parse_from(std::iter::once("audio-reset").chain(params.split(' ')))
    }

    #[test]
    fn test_elevated_child_parses_its_arguments() {
        let args = child_args(&["run", "-v"]).unwrap();
        assert!(args.no_elevate);
        assert!(args.verbose);
        assert!(matches!(args.command, Some(Command::Run)));
    }

    #[test]
    fn test_elevated_child_without_subcommand() {
        let args = child_args(&[]).unwrap();
        assert!(args.no_elevate);
        assert!(args.command.is_none());
    }

    #[test]
    fn test_elevated_child_with_flag_already_present() {
        let args = child_args(&["--no-elevate", "check"]).unwrap();
        assert!(args.no_elevate);
        assert!(matches!(args.command, Some(Command::Check)));
    }
}
