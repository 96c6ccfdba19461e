//! HTTP client for the sales backend (`/api/v1/chat`, `/api/v1/query`, `/api/v1/health`).

use crate::backend::types::{ChatReply, ChatRequest, HistoryEntry, QueryFilters, StructuredSummary};
use crate::health::HealthStatus;
use async_trait::async_trait;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend api error: {0}")]
    Api(String),
}

/// The sales backend as seen by the agent and the health monitor.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send a message plus formatted history; the backend generates the reply and may attach data.
    async fn chat(&self, message: &str, history: Vec<HistoryEntry>) -> Result<ChatReply, BackendError>;

    /// Run a structured sales query.
    async fn query(&self, filters: &QueryFilters) -> Result<StructuredSummary, BackendError>;

    /// Backend, store, and model-credential status.
    async fn health(&self) -> Result<HealthStatus, BackendError>;
}

/// reqwest-backed [`ChatBackend`].
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(res: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(BackendError::Api(format!("{} {}", status, body)));
        }
        Ok(res)
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    /// POST /api/v1/chat.
    async fn chat(&self, message: &str, history: Vec<HistoryEntry>) -> Result<ChatReply, BackendError> {
        let url = format!("{}/api/v1/chat", self.base_url);
        let body = ChatRequest {
            message: message.to_string(),
            history,
        };
        let res = self.client.post(&url).json(&body).send().await?;
        let reply: ChatReply = Self::check(res).await?.json().await?;
        Ok(reply)
    }

    /// POST /api/v1/query.
    async fn query(&self, filters: &QueryFilters) -> Result<StructuredSummary, BackendError> {
        let url = format!("{}/api/v1/query", self.base_url);
        let res = self.client.post(&url).json(filters).send().await?;
        let summary: StructuredSummary = Self::check(res).await?.json().await?;
        Ok(summary)
    }

    /// GET /api/v1/health.
    async fn health(&self) -> Result<HealthStatus, BackendError> {
        let url = format!("{}/api/v1/health", self.base_url);
        let res = self.client.get(&url).send().await?;
        let status: HealthStatus = Self::check(res).await?.json().await?;
        Ok(status)
    }
}
