//! opgate - governed execution of privileged operations
//!
//! This library exposes the execution bridge, concurrency guard, role
//! engine, audit trail, structured logger and the orchestrator that ties
//! them together.

pub mod audit;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod constants;
pub mod context;
pub mod guard;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod rbac;
pub mod tickets;
