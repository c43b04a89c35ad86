#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use opgate::cli::{self, CliArgs, CliCommand};
use opgate::config::Settings;
use opgate::context::OpsContext;
use opgate::logging::Logger;
use opgate::models::{progress_channel, OperationRequest, OperationResult, TicketUpdate};
use opgate::output;
use opgate::tickets::http::HttpTicketClient;
use opgate::tickets::TicketClient;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse_args()?;
    let success = run(args).await?;
    if !success {
        std::process::exit(1);
    }
    Ok(())
}

/// Files named on the command line, read before any component is built
#[derive(Default)]
struct CommandInputs {
    complex_params: Option<serde_json::Value>,
    ticket_updates: Vec<TicketUpdate>,
}

impl CommandInputs {
    fn load(command: &CliCommand) -> Result<Self> {
        let mut inputs = Self::default();
        match command {
            CliCommand::Run {
                params_file: Some(path),
                ..
            } => {
                inputs.complex_params = Some(read_json(path)?);
            }
            CliCommand::BulkUpdate { items_file } => {
                inputs.ticket_updates = serde_json::from_value(read_json(items_file)?)
                    .with_context(|| format!("Invalid ticket update list in {}", items_file.display()))?;
            }
            _ => {}
        }
        Ok(inputs)
    }
}

async fn run(args: CliArgs) -> Result<bool> {
    let mut settings = Settings::load_or_default(args.config_path.as_deref())?;
    if let Some(level) = args.log_level {
        settings.logging.level = level;
    }
    let inputs = CommandInputs::load(&args.command)?;

    let logger = Logger::with_file_settings(settings.logging.level, settings.log_file_settings());
    logger.initialize(&settings.log_directory());
    logger.install()?;

    let tickets = ticket_client(&settings);
    let ctx = OpsContext::with_logger(logger, &settings, tickets);

    let outcome = dispatch(&ctx, args.command, inputs, args.json_output).await;
    ctx.shutdown();
    outcome
}

async fn dispatch(ctx: &OpsContext, command: CliCommand, inputs: CommandInputs, json_output: bool) -> Result<bool> {
    let success = match command {
        CliCommand::Run {
            operation,
            target,
            args: script_args,
            timeout_ms,
            ..
        } => {
            let mut request = OperationRequest::new(operation, target);
            request.args = script_args;
            request.timeout_ms = timeout_ms;
            request.complex_params = inputs.complex_params;

            let (tx, rx) = progress_channel();
            let printer = output::spawn_progress_printer(rx, json_output);
            let result = ctx.orchestrator().run_script_operation(request, Some(tx)).await;
            let _ = printer.await;
            report(&result, json_output)?
        }
        CliCommand::BulkUpdate { .. } => {
            let (tx, rx) = progress_channel();
            let printer = output::spawn_progress_printer(rx, json_output);
            let result = ctx
                .orchestrator()
                .bulk_update_tickets(inputs.ticket_updates, Some(tx))
                .await;
            let _ = printer.await;
            report(&result, json_output)?
        }
        CliCommand::Search {
            jql,
            fields,
            max_results,
        } => {
            let result = ctx.orchestrator().search_tickets(&jql, &fields, max_results).await;
            match result.parsed_result {
                Some(serde_json::Value::Array(ref issues)) if result.success => {
                    if json_output {
                        output::print_json(issues)?;
                    } else {
                        output::print_text(&output::format_issues(issues))?;
                    }
                    true
                }
                _ => report(&result, json_output)?,
            }
        }
        CliCommand::RoleShow => {
            let config = ctx.orchestrator().current_role();
            if json_output {
                output::print_json(&config)?;
            } else {
                output::print_text(&output::format_role(&config))?;
            }
            true
        }
        CliCommand::RoleSet { role } => {
            let result = ctx.orchestrator().set_role(role).await;
            report(&result, json_output)?
        }
        CliCommand::Operations => {
            let operations = ctx.orchestrator().list_operations();
            if json_output {
                output::print_json(&operations)?;
            } else {
                output::print_text(&output::format_operations(&operations))?;
            }
            true
        }
    };

    Ok(success)
}

/// Ticket client from settings; a missing token only disables ticket commands
fn ticket_client(settings: &Settings) -> Option<Arc<dyn TicketClient>> {
    let api = match settings.ticket_api_settings() {
        Ok(api) => api?,
        Err(e) => {
            log::warn!("Ticket API disabled: {}", e);
            return None;
        }
    };

    match HttpTicketClient::new(api) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            log::warn!("Ticket API disabled: {}", e);
            None
        }
    }
}

fn report(result: &OperationResult, json_output: bool) -> Result<bool> {
    output::print_result(result, json_output)?;
    Ok(result.success)
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}
