//! Operation orchestrator
//!
//! Every privileged operation goes through the same pipeline:
//! 1. role check (admin-only operations); a denial is audited once and
//!    touches neither the guard nor the bridge
//! 2. single-flight guard keyed by the operation name
//! 3. audit "start"
//! 4. the work itself: a configured script through the bridge, or a
//!    sequential bulk ticket update
//! 5. exactly one terminal audit event, then the guard is released
//!
//! Operation methods never return `Err`; every outcome is an
//! [`OperationResult`].

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::audit::AuditTrail;
use crate::bridge::ProcessBridge;
use crate::constants::{DEFAULT_TIMEOUT_MS, OP_SET_ROLE, OP_TICKET_BULK_UPDATE};
use crate::guard::ConcurrencyGuard;
use crate::logging::Logger;
use crate::models::{
    BulkTally, ErrorKind, ExecutionRequest, OperationDescriptor, OperationRequest, OperationResult,
    ProgressSender, TicketUpdate,
};
use crate::rbac::{is_admin_only, RbacConfig, RbacEngine, Role};
use crate::tickets::{self, TicketClient};

/// Script backing a named operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDefinition {
    pub script: PathBuf,
    /// Overrides the orchestrator's default timeout
    pub timeout_ms: Option<u64>,
}

pub struct Orchestrator {
    logger: Logger,
    audit: Arc<AuditTrail>,
    rbac: Arc<RbacEngine>,
    guard: ConcurrencyGuard,
    bridge: ProcessBridge,
    scripts: BTreeMap<String, ScriptDefinition>,
    default_timeout_ms: u64,
    tickets: Option<Arc<dyn TicketClient>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("scripts", &self.scripts)
            .field("default_timeout_ms", &self.default_timeout_ms)
            .field("tickets", &self.tickets.is_some())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(logger: Logger, audit: Arc<AuditTrail>, rbac: Arc<RbacEngine>, bridge: ProcessBridge) -> Self {
        Self {
            logger,
            audit,
            rbac,
            guard: ConcurrencyGuard::new(),
            bridge,
            scripts: BTreeMap::new(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            tickets: None,
        }
    }

    pub fn with_scripts(mut self, scripts: BTreeMap<String, ScriptDefinition>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    pub fn with_ticket_client(mut self, client: Arc<dyn TicketClient>) -> Self {
        self.tickets = Some(client);
        self
    }

    pub fn guard(&self) -> &ConcurrencyGuard {
        &self.guard
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn current_role(&self) -> RbacConfig {
        self.rbac.config()
    }

    /// Run a configured script-backed operation
    pub async fn run_script_operation(
        &self,
        request: OperationRequest,
        progress: Option<ProgressSender>,
    ) -> OperationResult {
        let operation = request.operation.as_str();
        let Some(definition) = self.scripts.get(operation) else {
            self.logger
                .warn("Unknown operation requested", json!({ "operation": operation }));
            return OperationResult::failure(
                ErrorKind::UnknownOperation,
                format!("Unknown operation '{}'", operation),
            );
        };

        if let Some(denied) = self.authorize(operation, &request.target) {
            return denied;
        }

        let timeout_ms = request
            .timeout_ms
            .or(definition.timeout_ms)
            .unwrap_or(self.default_timeout_ms);

        let mut execution = ExecutionRequest::new(&definition.script)
            .args(request.args.clone())
            .timeout_ms(timeout_ms);
        if let Some(ref params) = request.complex_params {
            execution = execution.complex_params(params.clone());
        }
        if let Some(sender) = progress {
            execution = execution.progress(sender);
        }

        let target = request.target.as_str();
        // Argument values may be sensitive; only names reach the audit trail
        let arg_names: Vec<&str> = request.args.keys().map(String::as_str).collect();
        let start_details = json!({
            "script": definition.script.display().to_string(),
            "args": arg_names,
            "complexParams": request.complex_params.is_some(),
            "timeoutMs": timeout_ms,
        });

        let outcome = self
            .guard
            .run(operation, move || async move {
                self.audit.record_start(operation, target, start_details);
                let started = Instant::now();

                match self.bridge.try_execute(execution).await {
                    Ok(output) => {
                        let duration_ms = started.elapsed().as_millis() as u64;
                        self.audit.record_success(
                            operation,
                            target,
                            json!({ "durationMs": duration_ms }),
                        );
                        self.logger.info(
                            "Operation completed",
                            json!({ "operation": operation, "durationMs": duration_ms }),
                        );
                        OperationResult::from_script(output)
                    }
                    Err(e) => {
                        let message = e.to_string();
                        let duration_ms = started.elapsed().as_millis() as u64;
                        self.audit.record_failure(
                            operation,
                            target,
                            &message,
                            json!({ "kind": e.kind(), "durationMs": duration_ms }),
                        );
                        self.logger.error(
                            "Operation failed",
                            json!({ "operation": operation, "error": message }),
                        );
                        OperationResult::failure(e.kind(), message)
                    }
                }
            })
            .await;

        outcome.unwrap_or_else(|busy| OperationResult::failure(ErrorKind::Busy, busy.to_string()))
    }

    /// Apply `items` one after another. Per-item failures are tallied and
    /// never stop later items; the call itself succeeds once it has run.
    pub async fn bulk_update_tickets(
        &self,
        items: Vec<TicketUpdate>,
        progress: Option<ProgressSender>,
    ) -> OperationResult {
        let operation = OP_TICKET_BULK_UPDATE;
        let target = format!("{} tickets", items.len());

        if let Some(denied) = self.authorize(operation, &target) {
            return denied;
        }

        let Some(client) = self.tickets.clone() else {
            return OperationResult::failure(ErrorKind::Api, "Ticket API is not configured");
        };

        let target = target.as_str();
        let outcome = self
            .guard
            .run(operation, move || async move {
                let total = items.len();
                self.audit
                    .record_start(operation, target, json!({ "items": total }));

                let mut tally = BulkTally::default();
                for (index, item) in items.iter().enumerate() {
                    let line = match tickets::apply_update(client.as_ref(), item).await {
                        Ok(()) => {
                            tally.success += 1;
                            format!("[{}/{}] {}: ok\n", index + 1, total, item.key)
                        }
                        Err(e) => {
                            tally.failed += 1;
                            tally.errors.push(format!("{}: {}", item.key, e));
                            format!("[{}/{}] {}: {}\n", index + 1, total, item.key, e)
                        }
                    };
                    if let Some(ref sender) = progress {
                        let _ = sender.send(line);
                    }
                }

                let details = json!({
                    "success": tally.success,
                    "failed": tally.failed,
                    "errors": tally.errors,
                });
                if tally.failed > 0 {
                    let summary = format!("{} tickets failed", tally.failed);
                    self.audit.record_failure(operation, target, &summary, details);
                    self.logger.warn("Bulk ticket update finished with failures", json!({
                        "success": tally.success,
                        "failed": tally.failed,
                    }));
                } else {
                    self.audit.record_success(operation, target, details);
                    self.logger
                        .info("Bulk ticket update finished", json!({ "success": tally.success }));
                }

                OperationResult::from_bulk(tally)
            })
            .await;

        outcome.unwrap_or_else(|busy| OperationResult::failure(ErrorKind::Busy, busy.to_string()))
    }

    /// Change the persisted role. Admin-only, single-flight, audited with the
    /// previous and new role.
    pub async fn set_role(&self, role: Role) -> OperationResult {
        let operation = OP_SET_ROLE;
        let target = role.as_str();

        if let Some(denied) = self.authorize(operation, target) {
            return denied;
        }

        let outcome = self
            .guard
            .run(operation, move || async move {
                let previous = self.rbac.current_role();
                let details = json!({ "previousRole": previous, "newRole": role });
                self.audit.record_start(operation, target, details.clone());

                match self.rbac.set_role(role).await {
                    Ok(config) => {
                        self.audit.record_success(operation, target, details);
                        OperationResult::with_data(json!({
                            "role": config.role,
                            "configuredBy": config.configured_by,
                            "configuredAt": config.configured_at,
                        }))
                    }
                    Err(e) => {
                        let message = e.to_string();
                        self.audit.record_failure(operation, target, &message, details);
                        OperationResult::failure(ErrorKind::Persistence, message)
                    }
                }
            })
            .await;

        outcome.unwrap_or_else(|busy| OperationResult::failure(ErrorKind::Busy, busy.to_string()))
    }

    /// Read-only ticket search; not gated and not audited
    pub async fn search_tickets(&self, jql: &str, fields: &[String], max_results: u32) -> OperationResult {
        let Some(ref client) = self.tickets else {
            return OperationResult::failure(ErrorKind::Api, "Ticket API is not configured");
        };

        self.logger.info(
            "Searching tickets",
            json!({ "jql": jql, "fields": fields, "maxResults": max_results }),
        );

        match client.search(jql, fields, max_results).await {
            Ok(issues) => {
                self.logger
                    .debug("Ticket search returned", json!({ "count": issues.len() }));
                OperationResult::with_data(Value::Array(issues))
            }
            Err(e) => {
                self.logger
                    .error("Ticket search failed", json!({ "error": e.to_string() }));
                OperationResult::failure(ErrorKind::Api, e.to_string())
            }
        }
    }

    /// Configured script operations plus the built-in ones, sorted by name
    pub fn list_operations(&self) -> Vec<OperationDescriptor> {
        let mut operations: BTreeMap<String, OperationDescriptor> = self
            .scripts
            .iter()
            .map(|(name, definition)| {
                (
                    name.clone(),
                    OperationDescriptor {
                        name: name.clone(),
                        admin_only: is_admin_only(name),
                        script: Some(definition.script.clone()),
                    },
                )
            })
            .collect();

        for builtin in [OP_SET_ROLE, OP_TICKET_BULK_UPDATE] {
            operations
                .entry(builtin.to_string())
                .or_insert_with(|| OperationDescriptor {
                    name: builtin.to_string(),
                    admin_only: is_admin_only(builtin),
                    script: None,
                });
        }

        operations.into_values().collect()
    }

    /// `None` when permitted; otherwise the denial result, already audited
    fn authorize(&self, operation: &str, target: &str) -> Option<OperationResult> {
        if self.rbac.is_permitted(operation) {
            return None;
        }

        let role = self.rbac.current_role();
        let message = format!(
            "Permission denied: '{}' requires the admin role (current role: {})",
            operation, role
        );
        self.logger.warn(
            "Permission denied",
            json!({ "operation": operation, "role": role }),
        );
        self.audit.record_failure(
            operation,
            target,
            &message,
            json!({ "reason": "permission-denied", "role": role }),
        );
        Some(OperationResult::failure(ErrorKind::PermissionDenied, message))
    }
}
