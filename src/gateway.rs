//! Parser and chat-query gateway client
//!
//! Both endpoints live on the same backend. Uses a long-lived reqwest::Client
//! for connection pooling.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use crate::error::ChatError;
use crate::ledger::LedgerEntry;
use crate::models::{ParseResult, UserContext};
use crate::Result;

/// Turns free text into transaction candidates
#[async_trait]
pub trait TransactionParser: Send + Sync {
    async fn parse(&self, text: &str) -> Result<ParseResult>;
}

/// Answers questions about the ledger
#[async_trait]
pub trait QueryGateway: Send + Sync {
    async fn ask(&self, request: &QueryRequest) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ParseRequest<'a> {
    text: &'a str,
}

/// Payload of the chat endpoint. Exactly one of the two data fields is set.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRequest {
    pub text: String,
    pub user_id: uuid::Uuid,
    pub user_email: Option<String>,
    pub user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expenses_data: Option<Vec<LedgerEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_expenses_data: Option<Vec<LedgerEntry>>,
}

impl QueryRequest {
    pub fn new(text: &str, user: &UserContext, rows: Vec<LedgerEntry>) -> Self {
        let (group_name, expenses_data, group_expenses_data) = match &user.group {
            Some(group) => (Some(group.name.clone()), None, Some(rows)),
            None => (None, Some(rows), None),
        };

        Self {
            text: text.to_string(),
            user_id: user.user_id,
            user_email: user.email.clone(),
            user_name: user.chat_name(),
            group_name,
            expenses_data,
            group_expenses_data,
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    reply: String,
}

/// Reusable HTTP client for the parse and chat endpoints (connection-pooled)
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);

        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            error!("Gateway request to {} failed: {}", path, e);
            if e.is_timeout() {
                ChatError::GatewayError(format!("{} timed out", path))
            } else {
                ChatError::GatewayError(format!("{}: {}", path, e))
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Gateway error response from {} ({}): {}", path, status, error_text);
            return Err(ChatError::GatewayError(format!(
                "{} returned {}: {}",
                path, status, error_text
            )));
        }

        response.json::<R>().await.map_err(|e| {
            error!("Failed to decode gateway response from {}: {}", path, e);
            ChatError::GatewayError(format!("{} decode error: {}", path, e))
        })
    }
}

#[async_trait]
impl TransactionParser for HttpGateway {
    async fn parse(&self, text: &str) -> Result<ParseResult> {
        info!("Calling parse endpoint");
        let result: ParseResult = self.post("/api/expenses/parse", &ParseRequest { text }).await?;
        info!(candidates = result.expenses.len(), "Parse response received");
        Ok(result)
    }
}

#[async_trait]
impl QueryGateway for HttpGateway {
    async fn ask(&self, request: &QueryRequest) -> Result<String> {
        info!("Calling chat endpoint");
        let response: QueryResponse = self.post("/api/expenses/chat", request).await?;
        Ok(response.reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GroupContext;
    use uuid::Uuid;

    #[test]
    fn test_personal_query_payload() {
        let user = UserContext {
            user_id: Uuid::nil(),
            email: Some("asha@example.com".to_string()),
            name: None,
            group: None,
        };

        let json = serde_json::to_value(QueryRequest::new("total spent?", &user, vec![])).unwrap();

        assert_eq!(json["text"], "total spent?");
        assert_eq!(json["user_name"], "asha");
        assert_eq!(json["user_email"], "asha@example.com");
        assert!(json["expenses_data"].is_array());
        assert!(json.get("group_expenses_data").is_none());
        assert!(json.get("group_name").is_none());
    }

    #[test]
    fn test_group_query_payload() {
        let user = UserContext {
            group: Some(GroupContext {
                id: Uuid::new_v4(),
                name: "Flat 4B".to_string(),
            }),
            ..UserContext::anonymous()
        };

        let json = serde_json::to_value(QueryRequest::new("who owes what", &user, vec![])).unwrap();

        assert_eq!(json["group_name"], "Flat 4B");
        assert!(json["group_expenses_data"].is_array());
        assert!(json.get("expenses_data").is_none());
    }

    #[test]
    fn test_base_url_is_normalized() {
        let gateway = HttpGateway::new("http://localhost:8000/", Duration::from_secs(5)).unwrap();
        assert_eq!(gateway.base_url, "http://localhost:8000");
    }
}
