//! Gateway Client - Authenticated table fetches from the upstream services
//!
//! One token acquisition per refresh, then one GET per table using that
//! token. A refresh is all-or-nothing; the store aborts on the first failed
//! call without mutating anything.

use crate::error::{CopilotError, Result};
use crate::tables::TableName;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Validity window requested for the bearer token.
const TOKEN_DURATION: &str = "72h";

/// Source of table rows. The store depends on this seam so that refresh
/// semantics can be exercised against scripted sources in tests.
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Exchange the configured user id for a bearer token. Called once per
    /// refresh.
    async fn acquire_token(&self) -> Result<String>;

    /// Fetch the raw (still nested) rows of one table.
    async fn fetch_rows(&self, table: TableName, token: &str) -> Result<Vec<Value>>;
}

#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    ai_key: String,
    user_id: String,
}

impl GatewayClient {
    pub fn new(base_url: String, ai_key: String, user_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            ai_key,
            user_id,
        }
    }
}

#[async_trait]
impl TableSource for GatewayClient {
    async fn acquire_token(&self) -> Result<String> {
        let url = format!("{}/user_management_service/ai/v1/auth", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("user_id", self.user_id.as_str()), ("duration", TOKEN_DURATION)])
            .header("ai-key", &self.ai_key)
            .send()
            .await
            .map_err(|e| CopilotError::Fetch(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CopilotError::Fetch(format!(
                "Token request returned {}",
                status
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CopilotError::Fetch(format!("Failed to parse token response: {}", e)))?;

        body["token"]
            .as_str()
            .map(|t| t.to_string())
            .ok_or_else(|| CopilotError::Fetch("No token in auth response".to_string()))
    }

    async fn fetch_rows(&self, table: TableName, token: &str) -> Result<Vec<Value>> {
        let url = format!("{}/{}", self.base_url, table.endpoint_path());
        debug!("Fetching table '{}' from {}", table, url);

        let response = self
            .http
            .get(&url)
            .header("ai-key", &self.ai_key)
            .header("user-token", token)
            .send()
            .await
            .map_err(|e| CopilotError::Fetch(format!("Request for '{}' failed: {}", table, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CopilotError::Fetch(format!(
                "Fetch for '{}' returned {}",
                table, status
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            CopilotError::Fetch(format!("Failed to parse body for '{}': {}", table, e))
        })?;

        // The services wrap rows in a "data" envelope, but some endpoints have
        // returned bare arrays; anything else is treated as an empty table.
        let rows = match body {
            Value::Object(ref obj) if obj.get("data").map_or(false, Value::is_array) => obj
                .get("data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            Value::Array(rows) => rows,
            _ => Vec::new(),
        };
        Ok(rows)
    }
}
