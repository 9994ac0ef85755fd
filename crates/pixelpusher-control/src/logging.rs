//! Logging
//!
//! Components report through the [`LogSink`] trait so an application can route
//! discovery and pacing messages wherever it likes. [`TracingLogSink`] is the
//! default and forwards to `tracing`; [`init`] installs a subscriber for
//! applications that do not bring their own.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};

const LOG_FILE_PREFIX: &str = "pixelpusher_";
const LOG_FILE_SUFFIX: &str = ".log";

/// Severity of a message handed to a [`LogSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

/// Logging collaborator
pub trait LogSink: Send + Sync {
    /// Record a message with optional structured details
    fn log(&self, level: LogLevel, message: &str, details: Option<&Value>);

    fn error(&self, message: &str, details: Option<&Value>) {
        self.log(LogLevel::Error, message, details);
    }

    fn warning(&self, message: &str, details: Option<&Value>) {
        self.log(LogLevel::Warning, message, details);
    }

    fn notice(&self, message: &str, details: Option<&Value>) {
        self.log(LogLevel::Notice, message, details);
    }

    fn info(&self, message: &str, details: Option<&Value>) {
        self.log(LogLevel::Info, message, details);
    }

    fn debug(&self, message: &str, details: Option<&Value>) {
        self.log(LogLevel::Debug, message, details);
    }
}

/// Forwards messages to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, level: LogLevel, message: &str, details: Option<&Value>) {
        macro_rules! emit {
            ($event:ident $(, $key:ident = $value:expr)?) => {
                match details {
                    Some(d) => tracing::$event!($($key = $value,)? details = %d, "{}", message),
                    None => tracing::$event!($($key = $value,)? "{}", message),
                }
            };
        }

        match level {
            LogLevel::Error => emit!(error),
            LogLevel::Warning => emit!(warn),
            LogLevel::Notice => emit!(info, notice = true),
            LogLevel::Info => emit!(info),
            LogLevel::Debug => emit!(debug),
        }
    }
}

/// Subscriber configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default level filter (`RUST_LOG` takes precedence)
    pub level: String,
    /// Write to stderr
    pub console_output: bool,
    /// Write to a daily file in `log_dir`
    pub file_output: bool,
    pub log_dir: PathBuf,
    /// Log files kept by [`LogConfig::cleanup_old_logs`]
    pub max_log_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_output: true,
            file_output: false,
            log_dir: default_log_dir(),
            max_log_files: 10,
        }
    }
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|mut p| {
            p.push("PixelPusher");
            p.push("logs");
            p
        })
        .unwrap_or_else(|| PathBuf::from("logs"))
}

impl LogConfig {
    /// Level filter for `level`, INFO if it does not parse
    pub fn parse_level(&self) -> LevelFilter {
        self.level.parse().unwrap_or(LevelFilter::INFO)
    }

    pub fn ensure_log_directory(&self) -> io::Result<()> {
        fs::create_dir_all(&self.log_dir)
    }

    /// Today's log file
    pub fn current_log_path(&self) -> PathBuf {
        let date = chrono::Local::now().format("%Y-%m-%d");
        self.log_dir
            .join(format!("{}{}{}", LOG_FILE_PREFIX, date, LOG_FILE_SUFFIX))
    }

    /// Delete the oldest log files beyond `max_log_files`, returning how many
    /// were removed
    pub fn cleanup_old_logs(&self) -> io::Result<usize> {
        if !self.log_dir.exists() {
            return Ok(0);
        }

        let mut logs: Vec<PathBuf> = fs::read_dir(&self.log_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX) && n.ends_with(LOG_FILE_SUFFIX))
            })
            .collect();

        if logs.len() <= self.max_log_files {
            return Ok(0);
        }

        // Date-stamped names sort chronologically
        logs.sort();
        let excess = logs.len() - self.max_log_files;
        for path in &logs[..excess] {
            fs::remove_file(path)?;
        }
        Ok(excess)
    }
}

/// Handle to keep the logging worker thread alive
pub struct LogGuard {
    _guard: WorkerGuard,
}

/// Initialize the global subscriber
pub fn init(config: &LogConfig) -> Result<Option<LogGuard>> {
    let filter = || {
        EnvFilter::builder()
            .with_default_directive(config.parse_level().into())
            .from_env_lossy()
    };

    let console_layer = config.console_output.then(|| {
        fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .with_filter(filter())
    });

    let (file_layer, guard) = if config.file_output {
        config
            .ensure_log_directory()
            .context("Failed to create log directory")?;

        if let Err(e) = config.cleanup_old_logs() {
            eprintln!("Warning: Failed to cleanup old log files: {}", e);
        }

        let log_path = config.current_log_path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log file: {:?}", log_path))?;

        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file);
        let layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_filter(filter());

        (Some(layer), Some(LogGuard { _guard: worker_guard }))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!("Logging initialized at level: {}", config.level);

    Ok(guard)
}
