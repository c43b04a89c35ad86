//! Output formatting module
//!
//! Handles:
//! - Human-readable rendering of operation results, roles and listings
//! - JSON output of the same values
//! - Live printing of script stdout and bulk progress lines

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use tokio::task::JoinHandle;

use crate::models::{OperationDescriptor, OperationResult, ProgressReceiver};
use crate::rbac::RbacConfig;

/// Print progress chunks as they arrive until the sender side is dropped.
/// JSON mode sends them to stderr so stdout stays machine-readable.
pub fn spawn_progress_printer(mut receiver: ProgressReceiver, json_output: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(chunk) = receiver.recv().await {
            if json_output {
                let mut err = std::io::stderr().lock();
                let _ = err.write_all(chunk.as_bytes());
                let _ = err.flush();
            } else {
                let mut out = std::io::stdout().lock();
                let _ = out.write_all(chunk.as_bytes());
                let _ = out.flush();
            }
        }
    })
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut rendered = serde_json::to_string_pretty(value)?;
    rendered.push('\n');
    print_text(&rendered)
}

/// Write already formatted text to stdout. A closed pipe comes back as an
/// error instead of a panic.
pub fn print_text(text: &str) -> Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(text.as_bytes())?;
    out.flush()?;
    Ok(())
}

pub fn print_result(result: &OperationResult, json_output: bool) -> Result<()> {
    if json_output {
        // Stdout was already streamed live; keep the JSON document compact
        let mut trimmed = result.clone();
        trimmed.output = None;
        print_json(&trimmed)
    } else {
        print_text(&format_result(result))
    }
}

/// Human rendering of an operation result. Script stdout is not repeated
/// because it was streamed while the script ran.
pub fn format_result(result: &OperationResult) -> String {
    let mut out = String::new();

    if !result.success {
        let error = result.error.as_deref().unwrap_or("Operation failed");
        match result.error_kind {
            Some(kind) => out.push_str(&format!("Error ({}): {}\n", kind_name(kind), error)),
            None => out.push_str(&format!("Error: {}\n", error)),
        }
        return out;
    }

    if let Some(ref tally) = result.results {
        out.push_str("Bulk Update Summary:\n");
        out.push_str(&format!("  Succeeded: {}\n", tally.success));
        out.push_str(&format!("  Failed: {}\n", tally.failed));
        if !tally.errors.is_empty() {
            out.push_str("  Errors:\n");
            for error in &tally.errors {
                out.push_str(&format!("    {}\n", error));
            }
        }
        return out;
    }

    match result.parsed_result {
        Some(Value::Object(ref fields)) => {
            out.push_str("Result:\n");
            for (key, value) in fields {
                out.push_str(&format!("  {}: {}\n", key, display_value(value)));
            }
        }
        Some(ref other) => out.push_str(&format!("Result: {}\n", other)),
        None => out.push_str("Completed successfully.\n"),
    }
    out
}

pub fn format_role(config: &RbacConfig) -> String {
    format!(
        "Role: {}\n  Configured by: {}\n  Configured at: {}\n",
        config.role, config.configured_by, config.configured_at
    )
}

pub fn format_operations(operations: &[OperationDescriptor]) -> String {
    if operations.is_empty() {
        return "No operations configured.\n".to_string();
    }

    let width = operations.iter().map(|o| o.name.len()).max().unwrap_or(0);
    let mut out = format!("Found {} operations:\n\n", operations.len());
    for operation in operations {
        let gating = if operation.admin_only { "admin" } else { "any role" };
        let source = operation
            .script
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "built-in".to_string());
        out.push_str(&format!(
            "  {:<width$}  [{}]  {}\n",
            operation.name,
            gating,
            source,
            width = width
        ));
    }
    out
}

/// One line per issue: `KEY  field=value ...`
pub fn format_issues(issues: &[Value]) -> String {
    if issues.is_empty() {
        return "No tickets found.\n".to_string();
    }

    let mut out = String::new();
    for issue in issues {
        let key = issue.get("key").and_then(Value::as_str).unwrap_or("?");
        out.push_str(key);
        if let Some(fields) = issue.get("fields").and_then(Value::as_object) {
            for (name, value) in fields {
                out.push_str(&format!("  {}={}", name, display_value(value)));
            }
        }
        out.push('\n');
    }
    out
}

fn kind_name(kind: crate::models::ErrorKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Strings unquoted; objects with a display name collapsed to it
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        Value::Object(fields) => fields
            .get("displayName")
            .or_else(|| fields.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BulkTally, ErrorKind};
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn test_failure_shows_kind() {
        let result = OperationResult::failure(ErrorKind::PermissionDenied, "Permission denied");
        assert_eq!(format_result(&result), "Error (permission-denied): Permission denied\n");
    }

    #[test]
    fn test_bulk_summary() {
        let result = OperationResult::from_bulk(BulkTally {
            success: 1,
            failed: 1,
            errors: vec!["OPS-2: Ticket not found".to_string()],
        });
        let text = format_result(&result);
        assert!(text.contains("Succeeded: 1"));
        assert!(text.contains("Failed: 1"));
        assert!(text.contains("    OPS-2: Ticket not found"));
    }

    #[test]
    fn test_parsed_object_rendered_as_fields() {
        let result = OperationResult::with_data(json!({"sam": "jdoe", "created": true}));
        let text = format_result(&result);
        assert!(text.contains("  sam: jdoe\n"));
        assert!(text.contains("  created: true\n"));
    }

    #[test]
    fn test_operations_listing() {
        let text = format_operations(&[
            OperationDescriptor {
                name: "create-new-user".to_string(),
                admin_only: true,
                script: Some(PathBuf::from("/opt/New-User.ps1")),
            },
            OperationDescriptor {
                name: "set-rbac-role".to_string(),
                admin_only: true,
                script: None,
            },
        ]);
        assert!(text.starts_with("Found 2 operations:"));
        assert!(text.contains("[admin]  /opt/New-User.ps1"));
        assert!(text.contains("built-in"));
    }

    #[test]
    fn test_issue_lines() {
        let text = format_issues(&[json!({
            "key": "OPS-7",
            "fields": {"summary": "Unlock account", "assignee": {"displayName": "Dana"}, "status": null}
        })]);
        assert_eq!(text, "OPS-7  assignee=Dana  status=-  summary=Unlock account\n");
        assert_eq!(format_issues(&[]), "No tickets found.\n");
    }
}
