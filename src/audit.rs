//! Append-only audit trail for sensitive operations
//!
//! Independent of the leveled logger: audit records are never filtered by
//! level. Each one is appended as a JSON line to its own rotating file and
//! then echoed to the console sink (stderr, prefixed `[AUDIT]`), so stdout
//! stays free for command output. Nothing in this module returns an error to
//! the caller; a failed file write is reported through the `log` facade, a
//! failed console write is dropped, and the operation carries on.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::logging::console::{self, ConsoleSink};
use crate::logging::rotation::RotatingFile;
use crate::logging::{metadata_map, now_timestamp};
use crate::models::{AuditEvent, AuditResult};

/// Audit file naming and rotation
#[derive(Debug, Clone)]
pub struct AuditSettings {
    pub file_name: String,
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            file_name: crate::constants::AUDIT_FILE_NAME.to_string(),
            max_bytes: crate::constants::AUDIT_MAX_BYTES,
            max_files: crate::constants::AUDIT_MAX_FILES,
        }
    }
}

#[derive(Debug)]
pub struct AuditTrail {
    settings: AuditSettings,
    operator: String,
    file: OnceLock<RotatingFile>,
    console: Arc<dyn ConsoleSink>,
}

impl AuditTrail {
    /// Console-only trail attributed to the current OS account
    pub fn new(settings: AuditSettings) -> Self {
        Self {
            settings,
            operator: current_username(),
            file: OnceLock::new(),
            console: console::stderr(),
        }
    }

    /// Echo events to `console` instead of stderr
    pub fn with_console(mut self, console: Arc<dyn ConsoleSink>) -> Self {
        self.console = console;
        self
    }

    /// Enable the audit file under `directory`. Idempotent; on failure the
    /// error is logged and file writes stay disabled.
    pub fn initialize(&self, directory: &Path) {
        if self.file.get().is_some() {
            return;
        }

        if let Err(e) = std::fs::create_dir_all(directory) {
            log::error!(
                "Failed to create audit directory {}: {} (audit file disabled)",
                directory.display(),
                e
            );
            return;
        }

        let _ = self.file.set(RotatingFile::new(
            directory.join(&self.settings.file_name),
            self.settings.max_bytes,
            self.settings.max_files,
        ));
    }

    pub fn file_path(&self) -> Option<PathBuf> {
        self.file.get().map(|f| f.path().to_path_buf())
    }

    /// Account name every event is attributed to
    pub fn operator(&self) -> &str {
        &self.operator
    }

    /// Append one event to the file, then echo it to the console
    pub fn record(&self, operation: &str, target: &str, result: AuditResult, details: Map<String, Value>) {
        let event = AuditEvent {
            timestamp: now_timestamp(),
            operation: operation.to_string(),
            operator: self.operator.clone(),
            target: target.to_string(),
            result,
            details,
        };

        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to serialize audit event for {}: {}", operation, e);
                return;
            }
        };

        if let Some(file) = self.file.get() {
            if let Err(e) = file.append_line(&line) {
                log::error!("Failed to write audit file {}: {}", file.path().display(), e);
            }
        }

        let _ = self.console.write_line(&format!("[AUDIT] {}", line));
    }

    pub fn record_start(&self, operation: &str, target: &str, details: Value) {
        let mut details = metadata_map(details);
        details.insert("phase".to_string(), Value::from("start"));
        self.record(operation, target, AuditResult::Success, details);
    }

    pub fn record_success(&self, operation: &str, target: &str, details: Value) {
        let mut details = metadata_map(details);
        details.insert("phase".to_string(), Value::from("complete"));
        self.record(operation, target, AuditResult::Success, details);
    }

    pub fn record_failure(&self, operation: &str, target: &str, error: &str, details: Value) {
        let mut details = metadata_map(details);
        details.insert("phase".to_string(), Value::from("complete"));
        details.insert("error".to_string(), Value::from(error));
        self.record(operation, target, AuditResult::Failure, details);
    }
}

/// OS-reported name of the account running this process
pub fn current_username() -> String {
    #[cfg(unix)]
    {
        use nix::unistd::{Uid, User};
        if let Ok(Some(user)) = User::from_uid(Uid::current()) {
            return user.name;
        }
    }

    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use std::io;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Debug)]
    struct ClosedPipe;

    impl ConsoleSink for ClosedPipe {
        fn write_line(&self, _line: &str) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    /// Records, for each console line, whether the audit file already held it
    #[derive(Debug)]
    struct FileWitness {
        path: PathBuf,
        seen: Mutex<Vec<bool>>,
    }

    impl ConsoleSink for FileWitness {
        fn write_line(&self, line: &str) -> io::Result<()> {
            let json = line.trim_start_matches("[AUDIT] ");
            let on_disk = fs::read_to_string(&self.path).unwrap_or_default();
            self.seen.lock().unwrap().push(on_disk.lines().any(|l| l == json));
            Ok(())
        }
    }

    fn read_events(path: &Path) -> Vec<AuditEvent> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_start_success_failure_phases() {
        let dir = tempdir().unwrap();
        let trail = AuditTrail::new(AuditSettings::default());
        trail.initialize(dir.path());

        trail.record_start("create-new-user", "jdoe", json!({"ticket": "OPS-1"}));
        trail.record_success("create-new-user", "jdoe", Value::Null);
        trail.record_failure("bulk-process-users", "batch.csv", "exit code 1", Value::Null);

        let events = read_events(&trail.file_path().unwrap());
        assert_eq!(events.len(), 3);

        assert_eq!(events[0].result, AuditResult::Success);
        assert_eq!(events[0].phase(), Some("start"));
        assert_eq!(events[0].details.get("ticket"), Some(&json!("OPS-1")));

        assert_eq!(events[1].result, AuditResult::Success);
        assert_eq!(events[1].phase(), Some("complete"));

        assert_eq!(events[2].result, AuditResult::Failure);
        assert_eq!(events[2].phase(), Some("complete"));
        assert_eq!(events[2].details.get("error"), Some(&json!("exit code 1")));
    }

    #[test]
    fn test_operator_is_os_account() {
        let dir = tempdir().unwrap();
        let trail = AuditTrail::new(AuditSettings::default());
        trail.initialize(dir.path());

        trail.record_start("set-rbac-role", "operator", json!({"operator": "spoofed"}));

        let events = read_events(&trail.file_path().unwrap());
        assert_eq!(events[0].operator, current_username());
        assert!(!events[0].operator.is_empty());
    }

    #[test]
    fn test_record_without_initialize_does_not_panic() {
        let trail = AuditTrail::new(AuditSettings::default());
        trail.record_failure("jira-bulk-update", "2 tickets", "boom", Value::Null);
        assert!(trail.file_path().is_none());
    }

    #[test]
    fn test_unwritable_directory_disables_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();

        let trail = AuditTrail::new(AuditSettings::default());
        trail.initialize(&blocker.join("audit"));
        trail.record_start("create-new-user", "jdoe", Value::Null);

        assert!(trail.file_path().is_none());
    }

    #[test]
    fn test_closed_console_keeps_file_record() {
        let dir = tempdir().unwrap();
        let trail = AuditTrail::new(AuditSettings::default()).with_console(Arc::new(ClosedPipe));
        trail.initialize(dir.path());

        trail.record_start("unlock-account", "jdoe", Value::Null);
        trail.record_success("unlock-account", "jdoe", Value::Null);

        let events = read_events(&trail.file_path().unwrap());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].phase(), Some("start"));
        assert_eq!(events[1].phase(), Some("complete"));
    }

    #[test]
    fn test_file_written_before_console() {
        let dir = tempdir().unwrap();
        let witness = Arc::new(FileWitness {
            path: dir.path().join(crate::constants::AUDIT_FILE_NAME),
            seen: Mutex::new(Vec::new()),
        });
        let trail = AuditTrail::new(AuditSettings::default()).with_console(witness.clone());
        trail.initialize(dir.path());

        trail.record_start("create-new-user", "jdoe", Value::Null);
        trail.record_failure("create-new-user", "jdoe", "exit code 1", Value::Null);

        assert_eq!(*witness.seen.lock().unwrap(), vec![true, true]);
    }

    #[test]
    fn test_audit_rotation_threshold() {
        let dir = tempdir().unwrap();
        let trail = AuditTrail::new(AuditSettings {
            file_name: "audit.log".to_string(),
            max_bytes: 512,
            max_files: 3,
        });
        trail.initialize(dir.path());
        let path = trail.file_path().unwrap();

        let mut before = 0;
        while fs::metadata(&path).map(|m| m.len()).unwrap_or(0) < 512 {
            trail.record_start("create-new-user", &format!("user{}", before), Value::Null);
            before += 1;
        }
        let pre_rotation = fs::read_to_string(&path).unwrap();

        trail.record_success("create-new-user", "last", Value::Null);

        assert_eq!(fs::read_to_string(dir.path().join("audit.log.1")).unwrap(), pre_rotation);
        let active = read_events(&path);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].target, "last");
    }
}
