//! Structured logging and tracing for the reflector
//!
//! This module provides logging with daily rotation, a small structured
//! logger wrapper over `tracing`, and a background watcher that re-reads
//! the kernel log level from `/proc/sys/kernel/printk` whenever the file's
//! mtime changes.

use crate::config::LoggingConfig;
use crate::error::{EvseError, Result};
use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Once;
use std::sync::RwLock as StdRwLock;
use tracing::{Level, debug, error, info, trace, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::reload;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static INIT_ONCE: Once = Once::new();
static INIT_ERROR: OnceCell<String> = OnceCell::new();
static RELOAD_HANDLE: OnceCell<reload::Handle<LevelFilter, tracing_subscriber::Registry>> =
    OnceCell::new();
static RUNTIME_LEVEL: OnceCell<StdRwLock<Level>> = OnceCell::new();

/// Initialize logging system based on configuration
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    INIT_ONCE.call_once(|| {
        let init_result = (|| -> Result<()> {
            let base_level = parse_log_level(&config.level)?;
            let filter = build_env_filter(base_level);
            let (level_layer, handle) = reload::Layer::new(LevelFilter::from_level(base_level));
            let _ = RELOAD_HANDLE.set(handle);
            let _ = RUNTIME_LEVEL.set(StdRwLock::new(base_level));

            if should_use_console_only() {
                init_console_only_logging(filter, level_layer, config.json_format);
                return Ok(());
            }

            init_file_logging(config, filter, level_layer)
        })();

        if let Err(e) = init_result {
            let _ = INIT_ERROR.set(e.to_string());
        }
    });

    if let Some(err) = INIT_ERROR.get() {
        return Err(EvseError::config(err.clone()));
    }
    Ok(())
}

fn build_env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("evse_modbus_reflector={},tokio_modbus=warn", level).into())
}

fn should_use_console_only() -> bool {
    cfg!(test) || std::env::var_os("EVSE_DISABLE_FILE_LOG").is_some()
}

fn init_console_only_logging(
    filter: EnvFilter,
    level_layer: reload::Layer<LevelFilter, tracing_subscriber::Registry>,
    json_format: bool,
) {
    let console_layer = {
        let layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false);
        if json_format {
            layer.json().boxed()
        } else {
            layer.boxed()
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(level_layer)
        .with(console_layer)
        .init();

    info!("Logging initialized - console-only");
}

fn init_file_logging(
    config: &LoggingConfig,
    filter: EnvFilter,
    level_layer: reload::Layer<LevelFilter, tracing_subscriber::Registry>,
) -> Result<()> {
    let registry = tracing_subscriber::registry().with(filter).with(level_layer);

    let file_appender = rolling::Builder::new()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix("modbus")
        .filename_suffix("log")
        .max_log_files(config.backup_count as usize)
        .build(Path::new(&config.directory))
        .map_err(|e| EvseError::io(format!("Failed to create log file appender: {}", e)))?;

    let (non_blocking_appender, guard) = non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let file_layer = {
        let base = fmt::layer()
            .with_writer(non_blocking_appender)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false);
        if config.json_format {
            base.json().boxed()
        } else {
            base.boxed()
        }
    };

    let subscriber = registry.with(file_layer);

    if config.console_output {
        let console_layer = {
            let base = fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false);
            if config.json_format {
                base.json().boxed()
            } else {
                base.boxed()
            }
        };
        subscriber.with(console_layer).init();
    } else {
        subscriber.init();
    }

    info!(
        "Logging initialized - level: {}, directory: {}",
        config.level, config.directory
    );
    Ok(())
}

/// Parse a log level string (case-insensitive) to a tracing Level
fn parse_log_level(level_str: &str) -> Result<Level> {
    match level_str.to_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" | "NOTICE" => Ok(Level::INFO),
        "WARN" | "WARNING" => Ok(Level::WARN),
        "ERROR" | "CRIT" | "EMERG" => Ok(Level::ERROR),
        _ => Err(EvseError::config(format!(
            "Invalid log level: {}",
            level_str
        ))),
    }
}

/// Map a `/proc/sys/kernel/printk` leading console-loglevel digit (0-7,
/// lower is more severe) to a tracing Level. Digits 0-3 are treated as
/// ERROR, 4 as WARN, 5-6 as INFO, 7 as DEBUG -- mirroring typical kernel
/// loglevel semantics (KERN_EMERG..KERN_DEBUG).
fn printk_digit_to_level(digit: u8) -> Level {
    match digit {
        0..=3 => Level::ERROR,
        4 => Level::WARN,
        5 | 6 => Level::INFO,
        _ => Level::DEBUG,
    }
}

/// Read the current console loglevel digit from `/proc/sys/kernel/printk`.
fn read_printk_level(path: &Path) -> Option<Level> {
    let contents = std::fs::read_to_string(path).ok()?;
    let digit = contents.trim().bytes().next()?;
    if digit.is_ascii_digit() {
        Some(printk_digit_to_level(digit - b'0'))
    } else {
        None
    }
}

/// Apply a new runtime level to the reload handle, if logging has been initialized.
fn apply_runtime_level(level: Level) {
    if let Some(handle) = RELOAD_HANDLE.get() {
        let _ = handle.modify(|filter| *filter = LevelFilter::from_level(level));
    }
    if let Some(lock) = RUNTIME_LEVEL.get() {
        if let Ok(mut guard) = lock.write() {
            *guard = level;
        }
    }
}

/// Background task: poll `/proc/sys/kernel/printk`'s mtime and, on change,
/// re-read the level and apply it to the live tracing filter.
pub async fn watch_kernel_log_level(path: &Path, poll_interval: std::time::Duration) {
    let mut last_mtime: Option<std::time::SystemTime> = None;
    loop {
        if let Ok(meta) = std::fs::metadata(path) {
            let mtime = meta.modified().ok();
            if mtime != last_mtime {
                last_mtime = mtime;
                if let Some(level) = read_printk_level(path) {
                    apply_runtime_level(level);
                    info!("Kernel log level changed, applying {:?}", level);
                }
            }
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Context information for log messages
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Component name (e.g., "registers", "modbus_server", "ingest")
    pub component: String,

    /// Additional context fields
    pub extra_fields: std::collections::HashMap<String, String>,
}

impl LogContext {
    /// Create a new log context
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            extra_fields: std::collections::HashMap::new(),
        }
    }

    /// Add extra field
    pub fn with_field(mut self, key: &str, value: String) -> Self {
        self.extra_fields.insert(key.to_string(), value);
        self
    }
}

/// Structured logger with context
#[derive(Clone)]
pub struct StructuredLogger {
    context: LogContext,
}

impl StructuredLogger {
    /// Create a new structured logger with context
    pub fn new(context: LogContext) -> Self {
        Self { context }
    }

    /// Log an info message with context
    pub fn info(&self, message: &str) {
        let fields = self.format_fields();
        info!(%fields, "{}", message);
    }

    /// Log a warning message with context
    pub fn warn(&self, message: &str) {
        let fields = self.format_fields();
        warn!(%fields, "{}", message);
    }

    /// Log an error message with context
    pub fn error(&self, message: &str) {
        let fields = self.format_fields();
        error!(%fields, "{}", message);
    }

    /// Log a debug message with context
    pub fn debug(&self, message: &str) {
        let fields = self.format_fields();
        debug!(%fields, "{}", message);
    }

    /// Log a trace message with context
    pub fn trace(&self, message: &str) {
        let fields = self.format_fields();
        trace!(%fields, "{}", message);
    }

    fn format_fields(&self) -> String {
        let mut fields = vec![format!("component={}", self.context.component)];
        for (key, value) in &self.context.extra_fields {
            fields.push(format!("{}={}", key, value));
        }
        fields.join(",")
    }
}

/// Create a logger for a specific component
pub fn get_logger(component: &str) -> StructuredLogger {
    StructuredLogger::new(LogContext::new(component))
}
