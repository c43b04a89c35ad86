//! Settings file handling
//!
//! Handles TOML parsing, defaults and validation. Every section is optional;
//! a missing default settings file means built-in defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::audit::AuditSettings;
use crate::bridge::BridgeSettings;
use crate::constants::{
    APP_NAME, AUDIT_FILE_NAME, AUDIT_MAX_BYTES, AUDIT_MAX_FILES, DEFAULT_INTERPRETER,
    DEFAULT_INTERPRETER_ARGS, DEFAULT_TICKET_TOKEN_ENV, DEFAULT_TIMEOUT_MS, LOG_FILE_NAME,
    LOG_MAX_BYTES, LOG_MAX_FILES, RBAC_FILE_NAME, SETTINGS_FILE_NAME,
};
use crate::logging::LogFileSettings;
use crate::models::LogLevel;
use crate::orchestrator::ScriptDefinition;
use crate::rbac::InvalidConfigPolicy;
use crate::tickets::http::TicketApiSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid settings: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub audit: AuditFileSettings,
    pub rbac: RbacSettings,
    pub execution: ExecutionSettings,
    /// Script-backed operations keyed by operation name
    pub operations: BTreeMap<String, OperationSettings>,
    pub tickets: Option<TicketSettings>,
    /// Directory relative script paths resolve against
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: LogLevel,
    /// Log directory; defaults to `<data_local_dir>/opgate/logs`
    pub directory: Option<PathBuf>,
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            directory: None,
            max_bytes: LOG_MAX_BYTES,
            max_files: LOG_MAX_FILES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditFileSettings {
    /// Defaults to the log directory
    pub directory: Option<PathBuf>,
    pub file_name: String,
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for AuditFileSettings {
    fn default() -> Self {
        Self {
            directory: None,
            file_name: AUDIT_FILE_NAME.to_string(),
            max_bytes: AUDIT_MAX_BYTES,
            max_files: AUDIT_MAX_FILES,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RbacSettings {
    /// Defaults to `<config_dir>/opgate/rbac.json`
    pub config_path: Option<PathBuf>,
    pub on_invalid: InvalidConfigPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub interpreter: String,
    pub interpreter_args: Vec<String>,
    /// Where parameter files are written; defaults to the OS temp directory
    pub temp_dir: Option<PathBuf>,
    pub default_timeout_ms: u64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            interpreter: DEFAULT_INTERPRETER.to_string(),
            interpreter_args: DEFAULT_INTERPRETER_ARGS.iter().map(|s| s.to_string()).collect(),
            temp_dir: None,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSettings {
    pub script: PathBuf,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketSettings {
    pub base_url: String,
    pub email: String,
    /// Environment variable holding the API token; the token itself is
    /// never stored in the settings file
    #[serde(default = "default_token_env")]
    pub api_token_env: String,
}

fn default_token_env() -> String {
    DEFAULT_TICKET_TOKEN_ENV.to_string()
}

/// `<config_dir>/opgate/opgate.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME).join(SETTINGS_FILE_NAME))
}

impl Settings {
    /// Parse and validate settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load `path`; relative script paths resolve against its directory
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut settings = Self::from_toml(&content)?;
        settings.base_dir = path.parent().map(Path::to_path_buf);
        Ok(settings)
    }

    /// An explicit path must exist. Without one, the default location is
    /// used if present, built-in defaults otherwise.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Validation(msg));

        if self.logging.max_bytes == 0 {
            return invalid("logging.max_bytes must be greater than 0".to_string());
        }
        if self.logging.max_files == 0 {
            return invalid("logging.max_files must be at least 1".to_string());
        }
        if self.audit.max_bytes == 0 {
            return invalid("audit.max_bytes must be greater than 0".to_string());
        }
        if self.audit.max_files == 0 {
            return invalid("audit.max_files must be at least 1".to_string());
        }
        if self.audit.file_name.trim().is_empty() {
            return invalid("audit.file_name cannot be empty".to_string());
        }
        if self.execution.interpreter.trim().is_empty() {
            return invalid("execution.interpreter cannot be empty".to_string());
        }

        for (name, operation) in &self.operations {
            if name.trim().is_empty() {
                return invalid("operation names cannot be empty".to_string());
            }
            if operation.script.as_os_str().is_empty() {
                return invalid(format!("operations.{}.script cannot be empty", name));
            }
        }

        if let Some(ref tickets) = self.tickets {
            if tickets.base_url.trim().is_empty() {
                return invalid("tickets.base_url cannot be empty".to_string());
            }
            if tickets.api_token_env.trim().is_empty() {
                return invalid("tickets.api_token_env cannot be empty".to_string());
            }
        }

        Ok(())
    }

    pub fn log_directory(&self) -> PathBuf {
        self.logging.directory.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_NAME)
                .join("logs")
        })
    }

    pub fn audit_directory(&self) -> PathBuf {
        self.audit
            .directory
            .clone()
            .unwrap_or_else(|| self.log_directory())
    }

    pub fn rbac_path(&self) -> PathBuf {
        self.rbac.config_path.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_NAME)
                .join(RBAC_FILE_NAME)
        })
    }

    pub fn log_file_settings(&self) -> LogFileSettings {
        LogFileSettings {
            file_name: LOG_FILE_NAME.to_string(),
            max_bytes: self.logging.max_bytes,
            max_files: self.logging.max_files,
        }
    }

    pub fn audit_settings(&self) -> AuditSettings {
        AuditSettings {
            file_name: self.audit.file_name.clone(),
            max_bytes: self.audit.max_bytes,
            max_files: self.audit.max_files,
        }
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            interpreter: self.execution.interpreter.clone(),
            interpreter_args: self.execution.interpreter_args.clone(),
            temp_dir: self
                .execution
                .temp_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        }
    }

    /// Configured operations with script paths resolved
    pub fn script_definitions(&self) -> BTreeMap<String, ScriptDefinition> {
        self.operations
            .iter()
            .map(|(name, operation)| {
                let script = match self.base_dir {
                    Some(ref base) if operation.script.is_relative() => base.join(&operation.script),
                    _ => operation.script.clone(),
                };
                (
                    name.clone(),
                    ScriptDefinition {
                        script,
                        timeout_ms: operation.timeout_ms,
                    },
                )
            })
            .collect()
    }

    /// Ticketing API connection, or `None` when no `[tickets]` section is
    /// configured. The token is read from the configured environment variable.
    pub fn ticket_api_settings(&self) -> Result<Option<TicketApiSettings>, ConfigError> {
        let Some(ref tickets) = self.tickets else {
            return Ok(None);
        };

        let api_token = std::env::var(&tickets.api_token_env).map_err(|_| {
            ConfigError::Validation(format!(
                "ticket API token variable {} is not set",
                tickets.api_token_env
            ))
        })?;

        Ok(Some(TicketApiSettings {
            base_url: tickets.base_url.clone(),
            email: tickets.email.clone(),
            api_token,
        }))
    }
}
