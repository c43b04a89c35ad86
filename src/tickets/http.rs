//! REST client for the ticketing API
//!
//! Basic auth with `email:token`; JSON in and out. Endpoint paths follow the
//! ticketing service's v2 REST API.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use super::{is_valid_key, TicketClient, TicketError};
use crate::constants::TICKET_HTTP_TIMEOUT_SECS;

/// Connection details for the ticketing API
#[derive(Clone)]
pub struct TicketApiSettings {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
}

impl std::fmt::Debug for TicketApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketApiSettings")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct HttpTicketClient {
    http: Client,
    settings: TicketApiSettings,
}

impl HttpTicketClient {
    pub fn new(settings: TicketApiSettings) -> Result<Self, TicketError> {
        if settings.base_url.trim().is_empty() {
            return Err(TicketError::NotConfigured("base_url is empty".to_string()));
        }
        if settings.email.trim().is_empty() || settings.api_token.is_empty() {
            return Err(TicketError::NotConfigured("email and API token are required".to_string()));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(TICKET_HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self { http, settings })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn issue_url(&self, key: &str, suffix: &str) -> Result<String, TicketError> {
        if !is_valid_key(key) {
            return Err(TicketError::InvalidKey(key.to_string()));
        }
        Ok(self.url(&format!("/rest/api/2/issue/{}/{}", key, suffix)))
    }

    /// Authenticate, send, and turn non-2xx answers into `TicketError::Api`
    async fn send(&self, request: RequestBuilder) -> Result<Response, TicketError> {
        let response = request
            .basic_auth(&self.settings.email, Some(&self.settings.api_token))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(TicketError::Api(api_error_message(status, &body)))
    }
}

#[async_trait]
impl TicketClient for HttpTicketClient {
    async fn search(&self, jql: &str, fields: &[String], max_results: u32) -> Result<Vec<Value>, TicketError> {
        let request = self.http.post(self.url("/rest/api/2/search")).json(&json!({
            "jql": jql,
            "fields": fields,
            "maxResults": max_results,
        }));

        let body: Value = self.send(request).await?.json().await?;
        Ok(body
            .get("issues")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_comment(&self, key: &str, body: &str) -> Result<(), TicketError> {
        let request = self
            .http
            .post(self.issue_url(key, "comment")?)
            .json(&json!({ "body": body }));
        self.send(request).await?;
        Ok(())
    }

    async fn transition(&self, key: &str, transition_id: &str) -> Result<(), TicketError> {
        let request = self
            .http
            .post(self.issue_url(key, "transitions")?)
            .json(&json!({ "transition": { "id": transition_id } }));
        self.send(request).await?;
        Ok(())
    }

    async fn reassign(&self, key: &str, account_id: &str) -> Result<(), TicketError> {
        let request = self
            .http
            .put(self.issue_url(key, "assignee")?)
            .json(&json!({ "accountId": account_id }));
        self.send(request).await?;
        Ok(())
    }
}

/// Best human-readable message from an error response body
fn api_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let first_message = value
            .get("errorMessages")
            .and_then(Value::as_array)
            .and_then(|messages| messages.iter().find_map(Value::as_str));
        if let Some(message) = first_message {
            return message.to_string();
        }

        let first_field_error = value
            .get("errors")
            .and_then(Value::as_object)
            .and_then(|errors| errors.values().find_map(Value::as_str));
        if let Some(message) = first_field_error {
            return message.to_string();
        }

        if let Some(message) = value.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
    }

    match status.canonical_reason() {
        Some(reason) => format!("HTTP {} {}", status.as_u16(), reason),
        None => format!("HTTP {}", status.as_u16()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TicketApiSettings {
        TicketApiSettings {
            base_url: "https://tickets.example.com/".to_string(),
            email: "ops@example.com".to_string(),
            api_token: "secret".to_string(),
        }
    }

    #[test]
    fn test_error_message_prefers_error_messages() {
        let body = r#"{"errorMessages":["Issue does not exist or you do not have permission to see it."],"errors":{}}"#;
        assert_eq!(
            api_error_message(StatusCode::NOT_FOUND, body),
            "Issue does not exist or you do not have permission to see it."
        );
    }

    #[test]
    fn test_error_message_falls_back_to_field_errors() {
        let body = r#"{"errorMessages":[],"errors":{"assignee":"User 'x' cannot be assigned issues."}}"#;
        assert_eq!(
            api_error_message(StatusCode::BAD_REQUEST, body),
            "User 'x' cannot be assigned issues."
        );
    }

    #[test]
    fn test_error_message_falls_back_to_status() {
        assert_eq!(api_error_message(StatusCode::UNAUTHORIZED, "<html>"), "HTTP 401 Unauthorized");
    }

    #[test]
    fn test_issue_url_rejects_path_injection() {
        let client = HttpTicketClient::new(settings()).unwrap();
        assert_eq!(
            client.issue_url("OPS-1", "comment").unwrap(),
            "https://tickets.example.com/rest/api/2/issue/OPS-1/comment"
        );
        assert!(client.issue_url("../admin", "comment").is_err());
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let mut incomplete = settings();
        incomplete.api_token = String::new();
        assert!(matches!(
            HttpTicketClient::new(incomplete),
            Err(TicketError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", settings());
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
