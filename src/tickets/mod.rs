//! Ticketing API collaborator
//!
//! The orchestrator only depends on [`TicketClient`]; [`http::HttpTicketClient`]
//! is the REST implementation used by the binary.

pub mod http;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::TicketUpdate;

#[derive(Debug, Error)]
pub enum TicketError {
    /// The API answered with an error; carries its message
    #[error("{0}")]
    Api(String),

    #[error("Ticket API request failed: {0}")]
    Transport(String),

    #[error("Invalid ticket key '{0}'")]
    InvalidKey(String),

    #[error("Ticket API is not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for TicketError {
    fn from(err: reqwest::Error) -> Self {
        TicketError::Transport(err.to_string())
    }
}

#[async_trait]
pub trait TicketClient: Send + Sync {
    /// Issues matching `jql`, projected to `fields`
    async fn search(&self, jql: &str, fields: &[String], max_results: u32) -> Result<Vec<Value>, TicketError>;

    async fn add_comment(&self, key: &str, body: &str) -> Result<(), TicketError>;

    async fn transition(&self, key: &str, transition_id: &str) -> Result<(), TicketError>;

    /// Assign the issue to `account_id`
    async fn reassign(&self, key: &str, account_id: &str) -> Result<(), TicketError>;
}

/// Apply the actions present on `update` in order: comment, transition,
/// reassign. Stops at the first failing action.
pub async fn apply_update(client: &dyn TicketClient, update: &TicketUpdate) -> Result<(), TicketError> {
    if !is_valid_key(&update.key) {
        return Err(TicketError::InvalidKey(update.key.clone()));
    }
    if let Some(ref body) = update.comment {
        client.add_comment(&update.key, body).await?;
    }
    if let Some(ref transition_id) = update.transition_id {
        client.transition(&update.key, transition_id).await?;
    }
    if let Some(ref assignee) = update.assignee {
        client.reassign(&update.key, assignee).await?;
    }
    Ok(())
}

/// Issue keys are interpolated into URL paths, so only `PROJECT-123` style
/// characters are accepted
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
