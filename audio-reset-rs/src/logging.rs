//! Per-run logging.
//!
//! Every event goes to stdout and to a per-run log file, rendered as
//! `<tag> <message> [key=value ...]`. The tag is `[!]` for warnings and
//! errors, `[+]` for events carrying `success = true`, `[i]` otherwise.

use chrono::{DateTime, Local};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log file name prefix.
pub const LOG_PREFIX: &str = "AudioReset";

/// Logging setup error types.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Keeps the file writer alive. Drop it last so buffered lines are flushed.
pub struct LogHandle {
    pub path: PathBuf,
    _guard: WorkerGuard,
}

/// Tag for one event.
pub fn severity_tag(level: Level, success: bool) -> &'static str {
    if level == Level::WARN || level == Level::ERROR {
        "[!]"
    } else if success {
        "[+]"
    } else {
        "[i]"
    }
}

/// `AudioReset_05-Mar-2024_14-07-09.log`
pub fn log_file_name(now: DateTime<Local>) -> String {
    format!("{}_{}.log", LOG_PREFIX, now.format("%d-%b-%Y_%H-%M-%S"))
}

/// First line of every run.
pub fn run_header(now: DateTime<Local>) -> String {
    format!("===== Audio Reset {} =====", now.format("%d/%m/%Y %H:%M:%S"))
}

/// Default log directory: `logs` beside the executable.
pub fn default_log_dir() -> PathBuf {
    crate::platform::exe_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("logs")
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("audio_reset_rs={level},audio_reset={level}"))
    })
}

/// Install the stdout and file layers.
///
/// Returns a handle that must be kept alive for the duration of the run.
pub fn init_logging(log_dir: &Path, verbose: bool) -> Result<LogHandle, LoggingError> {
    // Checked before touching the disk so a refused init leaves no empty file.
    if tracing::dispatcher::has_been_set() {
        return Err(LoggingError::AlreadyInitialized(
            "a global default subscriber is already set".to_string(),
        ));
    }

    std::fs::create_dir_all(log_dir).map_err(|source| LoggingError::CreateDir {
        path: log_dir.to_path_buf(),
        source,
    })?;

    let file_name = log_file_name(Local::now());
    let path = log_dir.join(&file_name);

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, &file_name));

    let console_layer = tracing_subscriber::fmt::layer()
        .event_format(TaggedFormat)
        .with_writer(std::io::stdout)
        .with_filter(env_filter(verbose));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .event_format(TaggedFormat)
        .with_writer(file_writer)
        .with_filter(env_filter(verbose));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LogHandle {
        path,
        _guard: guard,
    })
}

/// Event formatter producing `<tag> <message> [key=value ...]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TaggedFormat;

impl<S, N> FormatEvent<S, N> for TaggedFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut line = LineVisitor::default();
        event.record(&mut line);

        let tag = severity_tag(*event.metadata().level(), line.success);
        write!(writer, "{} {}", tag, line.message)?;
        for (name, value) in &line.fields {
            write!(writer, " {}={}", name, value)?;
        }
        writeln!(writer)
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    success: bool,
    fields: Vec<(&'static str, String)>,
}

impl Visit for LineVisitor {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "success" {
            self.success = value;
        } else {
            self.fields.push((field.name(), value.to_string()));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push((field.name(), format!("{:?}", value)));
        }
    }
}
