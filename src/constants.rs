//! Global constants for opgate
//!
//! Centralized location for application-wide names, thresholds and messages

/// Application name, used for config/data directory names and the binary
pub const APP_NAME: &str = "opgate";

/// Settings file name inside the config directory
pub const SETTINGS_FILE_NAME: &str = "opgate.toml";

/// Persisted RBAC role file name inside the config directory
pub const RBAC_FILE_NAME: &str = "rbac.json";

/// Diagnostic log file name
pub const LOG_FILE_NAME: &str = "opgate.log";

/// Audit trail file name
pub const AUDIT_FILE_NAME: &str = "audit.log";

/// Diagnostic log rotation threshold (5 MiB)
pub const LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;

/// Number of rotated diagnostic log siblings kept
pub const LOG_MAX_FILES: usize = 5;

/// Audit trail rotation threshold (10 MiB)
pub const AUDIT_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Number of rotated audit siblings kept
pub const AUDIT_MAX_FILES: usize = 10;

/// Default script interpreter
pub const DEFAULT_INTERPRETER: &str = "pwsh";

/// Flags placed before the script path: non-interactive, no profile,
/// execution policy bypassed, and a named script file only
pub const DEFAULT_INTERPRETER_ARGS: &[&str] =
    &["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"];

/// Argument name carrying the complex-parameter file path
pub const PARAMS_FILE_ARG: &str = "-ParamsFile";

/// Prefix for transient complex-parameter files
pub const PARAMS_FILE_PREFIX: &str = "opgate-params";

/// Default script timeout (5 minutes)
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// Message returned when a channel already has an operation in flight
pub const BUSY_MESSAGE: &str = "Operation already in progress. Please wait for it to complete.";

/// Environment variable holding the ticketing API token by default
pub const DEFAULT_TICKET_TOKEN_ENV: &str = "OPGATE_TICKET_TOKEN";

/// HTTP timeout for ticketing API calls, in seconds
pub const TICKET_HTTP_TIMEOUT_SECS: u64 = 30;

/// Admin-only operation: create a new directory account
pub const OP_CREATE_NEW_USER: &str = "create-new-user";

/// Admin-only operation: process contractor accounts
pub const OP_PROCESS_CONTRACTORS: &str = "process-contractor-accounts";

/// Admin-only operation: bulk-process directory accounts
pub const OP_BULK_PROCESS_USERS: &str = "bulk-process-users";

/// Admin-only operation: change the active RBAC role
pub const OP_SET_ROLE: &str = "set-rbac-role";

/// Admin-only operation: bulk ticket update
pub const OP_TICKET_BULK_UPDATE: &str = "jira-bulk-update";

/// Fixed set of operations only the admin role may run
pub const ADMIN_ONLY_OPERATIONS: &[&str] = &[
    OP_CREATE_NEW_USER,
    OP_PROCESS_CONTRACTORS,
    OP_BULK_PROCESS_USERS,
    OP_SET_ROLE,
    OP_TICKET_BULK_UPDATE,
];
