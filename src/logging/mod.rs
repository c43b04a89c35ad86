//! Structured leveled logging with size-based file rotation
//!
//! Every accepted record is appended as one JSON line to a rotating log file
//! (once the logger has been initialized with a directory) and then written
//! to the console sink, stderr by default. The logger also backs the `log`
//! facade so diagnostics from every module share the same filter and sinks.

pub mod console;
pub mod rotation;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

use crate::models::{LogLevel, LogRecord};
use console::ConsoleSink;
use rotation::RotatingFile;

/// Current time as an RFC 3339 timestamp with millisecond precision
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Normalize caller metadata into a JSON object
pub(crate) fn metadata_map(metadata: Value) -> Map<String, Value> {
    match metadata {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// Rotation settings for the log file
#[derive(Debug, Clone)]
pub struct LogFileSettings {
    pub file_name: String,
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for LogFileSettings {
    fn default() -> Self {
        Self {
            file_name: crate::constants::LOG_FILE_NAME.to_string(),
            max_bytes: crate::constants::LOG_MAX_BYTES,
            max_files: crate::constants::LOG_MAX_FILES,
        }
    }
}

/// Leveled logger; cheap to clone, all clones share sinks and level
#[derive(Debug, Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

#[derive(Debug)]
struct LoggerInner {
    level: RwLock<LogLevel>,
    file_settings: LogFileSettings,
    file: OnceLock<RotatingFile>,
    console: Arc<dyn ConsoleSink>,
}

impl Logger {
    /// Console-only logger until [`Logger::initialize`] is called
    pub fn new(level: LogLevel) -> Self {
        Self::with_file_settings(level, LogFileSettings::default())
    }

    pub fn with_file_settings(level: LogLevel, file_settings: LogFileSettings) -> Self {
        Self::with_console(level, file_settings, console::stderr())
    }

    pub fn with_console(level: LogLevel, file_settings: LogFileSettings, console: Arc<dyn ConsoleSink>) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                level: RwLock::new(level),
                file_settings,
                file: OnceLock::new(),
                console,
            }),
        }
    }

    /// Enable the file sink under `directory`. Idempotent and never fails:
    /// if the directory cannot be created the logger stays console-only.
    pub fn initialize(&self, directory: &Path) {
        if self.inner.file.get().is_some() {
            return;
        }

        if let Err(e) = std::fs::create_dir_all(directory) {
            console::report(&format!(
                "opgate: failed to create log directory {}: {} (file logging disabled)",
                directory.display(),
                e
            ));
            return;
        }

        let settings = &self.inner.file_settings;
        let _ = self.inner.file.set(RotatingFile::new(
            directory.join(&settings.file_name),
            settings.max_bytes,
            settings.max_files,
        ));
    }

    /// Path of the active log file, once initialized
    pub fn file_path(&self) -> Option<PathBuf> {
        self.inner.file.get().map(|f| f.path().to_path_buf())
    }

    /// Register this logger as the `log` facade backend
    pub fn install(&self) -> Result<()> {
        log::set_boxed_logger(Box::new(self.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to set logger: {}", e))?;
        log::set_max_level(self.level().to_level_filter());
        Ok(())
    }

    pub fn level(&self) -> LogLevel {
        *self.inner.level.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_level(&self, level: LogLevel) {
        *self.inner.level.write().unwrap_or_else(|e| e.into_inner()) = level;
        log::set_max_level(level.to_level_filter());
    }

    pub fn debug(&self, message: &str, metadata: Value) {
        self.write(LogLevel::Debug, message, metadata_map(metadata));
    }

    pub fn info(&self, message: &str, metadata: Value) {
        self.write(LogLevel::Info, message, metadata_map(metadata));
    }

    pub fn warn(&self, message: &str, metadata: Value) {
        self.write(LogLevel::Warn, message, metadata_map(metadata));
    }

    pub fn error(&self, message: &str, metadata: Value) {
        self.write(LogLevel::Error, message, metadata_map(metadata));
    }

    fn should_log(&self, level: LogLevel) -> bool {
        level >= self.level()
    }

    /// Format and emit a record: file first, then console. Neither sink
    /// failure reaches the caller.
    fn write(&self, level: LogLevel, message: &str, metadata: Map<String, Value>) {
        if !self.should_log(level) {
            return;
        }

        let record = LogRecord {
            timestamp: now_timestamp(),
            level,
            message: message.to_string(),
            metadata,
        };

        if let Some(file) = self.inner.file.get() {
            let written = serde_json::to_string(&record)
                .map_err(std::io::Error::from)
                .and_then(|line| file.append_line(&line));
            if let Err(e) = written {
                console::report(&format!(
                    "opgate: failed to write log file {}: {}",
                    file.path().display(),
                    e
                ));
            }
        }

        let _ = self.inner.console.write_line(&record.console_line());
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.should_log(LogLevel::from(metadata.level()))
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.write(
            LogLevel::from(record.level()),
            &record.args().to_string(),
            Map::new(),
        );
    }

    fn flush(&self) {}
}
