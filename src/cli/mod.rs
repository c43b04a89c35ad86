//! CLI argument parsing and validation module
//!
//! Handles command-line interface using clap, including:
//! - Script-backed operations with `--arg KEY=VALUE` pairs
//! - Bulk ticket updates and ticket search
//! - Role inspection and changes
//! - Output format selection (human/JSON)

use anyhow::{anyhow, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::constants::APP_NAME;
use crate::models::LogLevel;
use crate::rbac::Role;

/// Default page size for ticket search
const DEFAULT_MAX_RESULTS: u32 = 50;

/// Default field projection for ticket search
const DEFAULT_SEARCH_FIELDS: &[&str] = &["summary", "status", "assignee"];

#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    /// Overrides the settings file's level
    pub log_level: Option<LogLevel>,
    pub json_output: bool,
    pub command: CliCommand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Run {
        operation: String,
        target: String,
        args: BTreeMap<String, String>,
        params_file: Option<PathBuf>,
        timeout_ms: Option<u64>,
    },
    BulkUpdate {
        items_file: PathBuf,
    },
    Search {
        jql: String,
        fields: Vec<String>,
        max_results: u32,
    },
    RoleShow,
    RoleSet {
        role: Role,
    },
    Operations,
}

pub fn build_command() -> Command {
    Command::new(APP_NAME)
        .version(env!("OPGATE_VERSION"))
        .long_version(concat!(env!("OPGATE_VERSION"), " (commit ", env!("GIT_HASH"), ")"))
        .about("Governed execution of privileged operator scripts")
        .long_about(
            "Runs privileged directory-management scripts and bulk ticket updates behind \
             role-based access control, a single-flight guard per operation, and an \
             append-only audit trail.",
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Settings file (default: <config dir>/opgate/opgate.toml)")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Minimum log level: debug, info, warn, error")
                .global(true),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .help("Output in JSON format")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("run")
                .about("Run a configured script-backed operation")
                .arg(
                    Arg::new("operation")
                        .value_name("OPERATION")
                        .help("Operation name as configured under [operations]")
                        .required(true),
                )
                .arg(
                    Arg::new("target")
                        .short('t')
                        .long("target")
                        .value_name("TARGET")
                        .help("What the operation acts on, recorded in the audit trail"),
                )
                .arg(
                    Arg::new("arg")
                        .short('a')
                        .long("arg")
                        .value_name("KEY=VALUE")
                        .help("Script parameter passed as -KEY VALUE (repeatable)")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("params")
                        .short('p')
                        .long("params")
                        .value_name("FILE")
                        .help("JSON file with structured parameters for the script")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("timeout-ms")
                        .long("timeout-ms")
                        .value_name("MS")
                        .help("Script timeout in milliseconds (0 disables)")
                        .value_parser(value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("bulk-update")
                .about("Apply comments, transitions and reassignments to many tickets")
                .arg(
                    Arg::new("items")
                        .value_name("ITEMS_JSON")
                        .help("JSON array of {key, comment?, transitionId?, assignee?}")
                        .value_parser(value_parser!(PathBuf))
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("search")
                .about("Search tickets with a JQL query")
                .arg(
                    Arg::new("jql")
                        .value_name("JQL")
                        .help("Query, e.g. \"project = OPS AND status = Open\"")
                        .required(true),
                )
                .arg(
                    Arg::new("fields")
                        .short('f')
                        .long("fields")
                        .value_name("FIELDS")
                        .help("Comma-separated fields to return")
                        .value_delimiter(','),
                )
                .arg(
                    Arg::new("max-results")
                        .short('n')
                        .long("max-results")
                        .value_name("N")
                        .help("Maximum number of tickets to return")
                        .value_parser(value_parser!(u32)),
                ),
        )
        .subcommand(
            Command::new("role")
                .about("Show or change the active role")
                .subcommand_required(true)
                .subcommand(Command::new("show").about("Show the active role"))
                .subcommand(
                    Command::new("set")
                        .about("Change the active role (admin only)")
                        .arg(
                            Arg::new("role")
                                .value_name("ROLE")
                                .help("admin or operator")
                                .value_parser(["admin", "operator"])
                                .required(true),
                        ),
                ),
        )
        .subcommand(Command::new("operations").about("List operations and their gating"))
}

/// Parse process arguments
pub fn parse_args() -> Result<CliArgs> {
    parse_from(std::env::args_os())
}

/// Parse an explicit argument list; clap errors (including --help and
/// --version) exit the process the way clap always does
pub fn parse_from<I, T>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = build_command().get_matches_from(args);
    from_matches(&matches)
}

fn from_matches(matches: &ArgMatches) -> Result<CliArgs> {
    let log_level = match matches.get_one::<String>("log-level") {
        Some(level) => Some(LogLevel::parse(level).ok_or_else(|| anyhow!("Invalid log level: {}", level))?),
        None => None,
    };

    let command = match matches.subcommand() {
        Some(("run", sub)) => {
            let mut args = BTreeMap::new();
            if let Some(pairs) = sub.get_many::<String>("arg") {
                for pair in pairs {
                    let (key, value) = parse_key_value(pair)?;
                    args.insert(key, value);
                }
            }
            CliCommand::Run {
                operation: required(sub, "operation")?,
                target: sub.get_one::<String>("target").cloned().unwrap_or_default(),
                args,
                params_file: sub.get_one::<PathBuf>("params").cloned(),
                timeout_ms: sub.get_one::<u64>("timeout-ms").copied(),
            }
        }
        Some(("bulk-update", sub)) => CliCommand::BulkUpdate {
            items_file: sub
                .get_one::<PathBuf>("items")
                .cloned()
                .context("Missing items file")?,
        },
        Some(("search", sub)) => CliCommand::Search {
            jql: required(sub, "jql")?,
            fields: sub
                .get_many::<String>("fields")
                .map(|values| values.map(|f| f.trim().to_string()).filter(|f| !f.is_empty()).collect())
                .unwrap_or_else(|| DEFAULT_SEARCH_FIELDS.iter().map(|f| f.to_string()).collect()),
            max_results: sub
                .get_one::<u32>("max-results")
                .copied()
                .unwrap_or(DEFAULT_MAX_RESULTS),
        },
        Some(("role", sub)) => match sub.subcommand() {
            Some(("set", set)) => {
                let role = required(set, "role")?;
                CliCommand::RoleSet {
                    role: Role::parse(&role).ok_or_else(|| anyhow!("Invalid role: {}", role))?,
                }
            }
            _ => CliCommand::RoleShow,
        },
        Some(("operations", _)) => CliCommand::Operations,
        _ => return Err(anyhow!("No command given; see --help")),
    };

    Ok(CliArgs {
        config_path: matches.get_one::<PathBuf>("config").cloned(),
        log_level,
        json_output: matches.get_flag("json"),
        command,
    })
}

fn required(matches: &ArgMatches, id: &str) -> Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .ok_or_else(|| anyhow!("Missing required argument: {}", id))
}

/// Split `KEY=VALUE` at the first `=`; the value may itself contain `=`
fn parse_key_value(pair: &str) -> Result<(String, String)> {
    let (key, value) = pair
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid --arg '{}': expected KEY=VALUE", pair))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("Invalid --arg '{}': empty key", pair));
    }
    Ok((key.to_string(), value.to_string()))
}
