//! Component wiring and lifecycle
//!
//! Builds the logger, audit trail, role engine, guard and bridge from
//! [`Settings`] and hands them to one [`Orchestrator`]. All state lives on
//! the context; nothing is held in statics.

use serde_json::json;
use std::sync::Arc;

use crate::audit::AuditTrail;
use crate::bridge::ProcessBridge;
use crate::config::Settings;
use crate::logging::Logger;
use crate::orchestrator::Orchestrator;
use crate::rbac::RbacEngine;
use crate::tickets::TicketClient;

#[derive(Debug)]
pub struct OpsContext {
    logger: Logger,
    orchestrator: Orchestrator,
}

impl OpsContext {
    /// Construct and initialize every component. Sink and role-file problems
    /// degrade (console-only logging, fallback role) rather than fail.
    pub fn initialize(settings: &Settings, tickets: Option<Arc<dyn TicketClient>>) -> Self {
        let logger = Logger::with_file_settings(settings.logging.level, settings.log_file_settings());
        logger.initialize(&settings.log_directory());
        Self::with_logger(logger, settings, tickets)
    }

    /// Like [`OpsContext::initialize`], reusing an already configured logger
    pub fn with_logger(logger: Logger, settings: &Settings, tickets: Option<Arc<dyn TicketClient>>) -> Self {
        let audit = Arc::new(AuditTrail::new(settings.audit_settings()));
        audit.initialize(&settings.audit_directory());

        let rbac = Arc::new(RbacEngine::new(settings.rbac_path(), settings.rbac.on_invalid));
        let role = rbac.initialize();

        let mut orchestrator = Orchestrator::new(
            logger.clone(),
            audit,
            rbac,
            ProcessBridge::new(settings.bridge_settings()),
        )
        .with_scripts(settings.script_definitions())
        .with_default_timeout_ms(settings.execution.default_timeout_ms);
        if let Some(client) = tickets {
            orchestrator = orchestrator.with_ticket_client(client);
        }

        let log_file = logger.file_path().map(|p| p.display().to_string());
        let audit_file = orchestrator.audit().file_path().map(|p| p.display().to_string());
        logger.info(
            "Context initialized",
            json!({
                "role": role.role,
                "operations": orchestrator.list_operations().len(),
                "logFile": log_file,
                "auditFile": audit_file,
            }),
        );

        Self { logger, orchestrator }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Log shutdown and flush sinks
    pub fn shutdown(self) {
        let in_flight = self.orchestrator.guard().in_flight();
        if !in_flight.is_empty() {
            self.logger
                .warn("Shutting down with operations in flight", json!({ "channels": in_flight }));
        }
        self.logger.info("Context shut down", json!({}));
        log::logger().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LogLevel, OperationRequest};
    use crate::rbac::Role;
    use tempfile::tempdir;

    fn settings_in(dir: &std::path::Path) -> Settings {
        let mut settings = Settings::default();
        settings.logging.level = LogLevel::Error;
        settings.logging.directory = Some(dir.join("logs"));
        settings.rbac.config_path = Some(dir.join("rbac.json"));
        settings.execution.temp_dir = Some(dir.join("tmp"));
        settings
    }

    #[tokio::test]
    async fn test_initialize_wires_components() {
        let dir = tempdir().unwrap();
        let ctx = OpsContext::initialize(&settings_in(dir.path()), None);

        assert_eq!(ctx.logger().file_path(), Some(dir.path().join("logs").join("opgate.log")));
        assert_eq!(
            ctx.orchestrator().audit().file_path(),
            Some(dir.path().join("logs").join("audit.log"))
        );
        assert_eq!(ctx.orchestrator().current_role().role, Role::Admin);

        let result = ctx
            .orchestrator()
            .run_script_operation(OperationRequest::new("not-configured", "x"), None)
            .await;
        assert!(!result.success);

        ctx.shutdown();
    }

    #[test]
    fn test_contexts_do_not_share_state() {
        let a_dir = tempdir().unwrap();
        let b_dir = tempdir().unwrap();
        let a = OpsContext::initialize(&settings_in(a_dir.path()), None);
        let b = OpsContext::initialize(&settings_in(b_dir.path()), None);

        let _lease = a.orchestrator().guard().try_acquire("create-new-user").unwrap();
        assert!(!b.orchestrator().guard().is_in_flight("create-new-user"));
    }
}
