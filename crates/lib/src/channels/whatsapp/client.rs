//! Messaging gateway HTTP client (create/delete/connect instance, send text).
//!
//! Stateless: every call is built from the base URL and the `apikey` credential. Status codes are
//! returned to the caller as-is; deciding what a 403 or 404 means is the session manager's job.

use crate::channels::whatsapp::protocol::{CreateInstanceRequest, SendTextRequest};
use serde_json::Value;

/// Client for the WhatsApp-compatible gateway.
#[derive(Clone)]
pub struct GatewayClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("gateway api error: {status} {body}")]
    Api { status: u16, body: String },
}

/// Status code and body of a gateway response, uninterpreted.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: String,
}

impl GatewayResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body parsed as JSON; `Value::Null` when it is empty or not JSON.
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_client(base_url, api_key, reqwest::Client::new())
    }

    /// Share an existing reqwest client (connection pool).
    pub fn with_client(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn finish(res: reqwest::Response) -> Result<GatewayResponse, GatewayError> {
        let status = res.status().as_u16();
        let body = res.text().await?;
        Ok(GatewayResponse { status, body })
    }

    /// DELETE /instance/delete/{name}.
    pub async fn delete_instance(&self, name: &str) -> Result<GatewayResponse, GatewayError> {
        let url = format!("{}/instance/delete/{}", self.base_url, name);
        let res = self
            .client
            .delete(&url)
            .header("apikey", &self.api_key)
            .send()
            .await?;
        Self::finish(res).await
    }

    /// POST /instance/create with QR-code pairing requested.
    pub async fn create_instance(
        &self,
        name: &str,
        integration: &str,
    ) -> Result<GatewayResponse, GatewayError> {
        let url = format!("{}/instance/create", self.base_url);
        let body = CreateInstanceRequest {
            instance_name: name.to_string(),
            qrcode: true,
            integration: integration.to_string(),
        };
        let res = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await?;
        Self::finish(res).await
    }

    /// GET /instance/connect/{name}: connection state and/or a fresh QR image.
    pub async fn connect_instance(&self, name: &str) -> Result<GatewayResponse, GatewayError> {
        let url = format!("{}/instance/connect/{}", self.base_url, name);
        let res = self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .send()
            .await?;
        Self::finish(res).await
    }

    /// POST /message/sendText/{name}. Non-success status is an error.
    pub async fn send_text(&self, name: &str, number: &str, text: &str) -> Result<(), GatewayError> {
        let url = format!("{}/message/sendText/{}", self.base_url, name);
        let body = SendTextRequest {
            number: number.to_string(),
            text: text.to_string(),
        };
        let res = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(GatewayError::Api { status, body });
        }
        Ok(())
    }
}
