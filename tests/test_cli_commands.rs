//! Binary-level tests with an isolated settings file

use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

struct Workspace {
    dir: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new(operations: &str) -> Self {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let config = root.join("opgate.toml");
        fs::write(
            &config,
            format!(
                "[logging]\nlevel = 'error'\ndirectory = '{logs}'\n\n\
                 [rbac]\nconfig_path = '{rbac}'\n\n\
                 [execution]\ninterpreter = 'sh'\ninterpreter_args = []\ntemp_dir = '{tmp}'\n\n\
                 {operations}",
                logs = root.join("logs").display(),
                rbac = root.join("rbac.json").display(),
                tmp = root.join("tmp").display(),
                operations = operations,
            ),
        )
        .unwrap();
        Self { dir, config }
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo_bin_cmd!("opgate");
        cmd.arg("--config").arg(&self.config);
        cmd.env_remove("OPGATE_TICKET_TOKEN");
        cmd
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }
}

#[test]
fn test_operations_json_lists_builtins() {
    let ws = Workspace::new("[operations.unlock-account]\nscript = 'unlock.sh'\n");

    let output = ws.cmd().args(["operations", "--json"]).output().unwrap();
    assert!(output.status.success());

    let listed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let names: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["jira-bulk-update", "set-rbac-role", "unlock-account"]);
    assert_eq!(listed[2]["adminOnly"], serde_json::json!(false));
}

#[test]
fn test_missing_role_file_defaults_to_admin() {
    let ws = Workspace::new("");

    ws.cmd()
        .args(["role", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Role: admin"));
}

#[test]
fn test_operator_is_denied_admin_operations() {
    let ws = Workspace::new("[operations.create-new-user]\nscript = 'new-user.sh'\n");

    ws.cmd()
        .args(["role", "set", "operator"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[AUDIT]").not())
        .stderr(predicate::str::contains("[AUDIT]"));

    ws.cmd()
        .args(["run", "create-new-user", "--target", "jdoe"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("permission-denied"));

    let audit = fs::read_to_string(ws.path().join("logs").join("audit.log")).unwrap();
    assert!(audit.contains("\"reason\":\"permission-denied\""));
}

#[test]
fn test_role_set_json_output_is_one_document() {
    let ws = Workspace::new("");

    let output = ws.cmd().args(["role", "set", "operator", "--json"]).output().unwrap();
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["success"], serde_json::json!(true));
    assert_eq!(result["parsedResult"]["role"], "operator");
    assert!(String::from_utf8_lossy(&output.stderr).contains("[AUDIT]"));
}

#[test]
fn test_malformed_items_file_rejected_before_startup() {
    let ws = Workspace::new("");
    let items = ws.path().join("items.json");
    fs::write(&items, "[{\"key\": ").unwrap();

    ws.cmd()
        .arg("bulk-update")
        .arg(&items)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid JSON"));

    // Nothing was initialized, so no log directory was created
    assert!(!ws.path().join("logs").exists());
}

#[test]
fn test_unknown_operation_exits_nonzero() {
    let ws = Workspace::new("");

    ws.cmd()
        .args(["run", "format-all-drives"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Unknown operation"));
}

#[test]
fn test_bulk_update_without_ticket_api() {
    let ws = Workspace::new("");
    let items = ws.path().join("items.json");
    fs::write(&items, r#"[{"key": "OPS-1", "comment": "done"}]"#).unwrap();

    ws.cmd()
        .arg("bulk-update")
        .arg(&items)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Ticket API is not configured"));
}

#[cfg(unix)]
#[test]
fn test_run_streams_script_output() {
    let ws = Workspace::new("[operations.unlock-account]\nscript = 'unlock.sh'\n");
    fs::write(
        ws.path().join("unlock.sh"),
        "echo \"Unlocking $2\"\necho '{\"unlocked\": true}'\n",
    )
    .unwrap();

    ws.cmd()
        .args(["run", "unlock-account", "--target", "jdoe", "--arg", "Identity=jdoe"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Unlocking jdoe"))
        .stdout(predicate::str::contains("unlocked: true"));
}
