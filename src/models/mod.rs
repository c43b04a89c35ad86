//! Data models module
//!
//! Defines core data structures:
//! - LogRecord / LogLevel: diagnostic log lines
//! - AuditEvent / AuditResult: audit trail entries
//! - ExecutionRequest / ExecutionResult / ScriptOutput: script bridge I/O
//! - OperationRequest / OperationResult / BulkTally: orchestrator contract
//! - TicketUpdate: one item of a bulk ticket update

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Sender half used to stream script stdout chunks and bulk progress lines
pub type ProgressSender = mpsc::UnboundedSender<String>;

/// Receiver half matching [`ProgressSender`]
pub type ProgressReceiver = mpsc::UnboundedReceiver<String>;

/// Create a progress channel pair
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Log levels in increasing order of severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Lowercase name, as written to log files
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// Matching `log` crate filter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => LogLevel::Error,
            log::Level::Warn => LogLevel::Warn,
            log::Level::Info => LogLevel::Info,
            log::Level::Debug | log::Level::Trace => LogLevel::Debug,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// A single diagnostic log line. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// RFC 3339 timestamp with millisecond precision
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl LogRecord {
    /// Console rendering: `[timestamp] LEVEL message {metadata}`
    pub fn console_line(&self) -> String {
        if self.metadata.is_empty() {
            format!("[{}] {} {}", self.timestamp, self.level, self.message)
        } else {
            format!(
                "[{}] {} {} {}",
                self.timestamp,
                self.level,
                self.message,
                Value::Object(self.metadata.clone())
            )
        }
    }
}

/// Outcome recorded on an audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
}

/// One audit trail entry. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub operation: String,
    /// OS account running the process, never caller-supplied
    pub operator: String,
    pub target: String,
    pub result: AuditResult,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl AuditEvent {
    /// Value of `details.phase`, if present
    pub fn phase(&self) -> Option<&str> {
        self.details.get("phase").and_then(Value::as_str)
    }
}

/// Request handed to the process execution bridge
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Script file to run; never a command string
    pub script_path: PathBuf,
    /// Passed as discrete `-Key value` argv pairs
    pub simple_args: BTreeMap<String, String>,
    /// Serialized to a transient JSON file whose path is passed as `-ParamsFile`
    pub complex_params: Option<Value>,
    /// Receives stdout chunks as they arrive
    pub progress: Option<ProgressSender>,
    /// Zero disables the timeout
    pub timeout_ms: u64,
}

impl ExecutionRequest {
    pub fn new(script_path: impl Into<PathBuf>) -> Self {
        Self {
            script_path: script_path.into(),
            simple_args: BTreeMap::new(),
            complex_params: None,
            progress: None,
            timeout_ms: 0,
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.simple_args.insert(key.into(), value.into());
        self
    }

    pub fn args(mut self, args: BTreeMap<String, String>) -> Self {
        self.simple_args.extend(args);
        self
    }

    pub fn complex_params(mut self, params: Value) -> Self {
        self.complex_params = Some(params);
        self
    }

    pub fn progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Successful script completion
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptOutput {
    /// Full accumulated stdout
    pub output: String,
    /// JSON object extracted from stdout, if one parsed
    pub parsed_result: Option<Value>,
}

/// Flattened bridge result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Failure categories surfaced at the orchestrator boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    PermissionDenied,
    Busy,
    Spawn,
    Script,
    Timeout,
    Persistence,
    Api,
    UnknownOperation,
}

/// Per-item tally of a bulk operation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BulkTally {
    pub success: usize,
    pub failed: usize,
    /// `"<item key>: <message>"`, in input order
    pub errors: Vec<String>,
}

/// Discriminated result of every orchestrator operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<BulkTally>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl OperationResult {
    pub fn from_script(output: ScriptOutput) -> Self {
        Self {
            success: true,
            output: Some(output.output),
            parsed_result: output.parsed_result,
            results: None,
            error: None,
            error_kind: None,
        }
    }

    pub fn from_bulk(tally: BulkTally) -> Self {
        Self {
            success: true,
            output: None,
            parsed_result: None,
            results: Some(tally),
            error: None,
            error_kind: None,
        }
    }

    pub fn with_data(data: Value) -> Self {
        Self {
            success: true,
            output: None,
            parsed_result: Some(data),
            results: None,
            error: None,
            error_kind: None,
        }
    }

    pub fn failure(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            parsed_result: None,
            results: None,
            error: Some(error.into()),
            error_kind: Some(kind),
        }
    }
}

/// A named operation as requested by the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub operation: String,
    /// What the operation acts on (account name, file, ...); recorded in the audit trail
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    #[serde(default)]
    pub complex_params: Option<Value>,
    /// Overrides the configured timeout for this call
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl OperationRequest {
    pub fn new(operation: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            target: target.into(),
            ..Default::default()
        }
    }
}

/// One ticket in a bulk update; absent actions are skipped
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TicketUpdate {
    pub key: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub transition_id: Option<String>,
    /// Account id of the new assignee
    #[serde(default)]
    pub assignee: Option<String>,
}

/// Listing entry for `operations`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescriptor {
    pub name: String,
    pub admin_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
}
