//! rollcall-sms: SMS gateway client.
//!
//! The engine only sees the `SmsGateway` trait; `HttpSmsGateway` is the
//! production implementation against the provider's JSON API. Anything the
//! provider does not explicitly acknowledge as delivered — rejection,
//! malformed reply, transport error, timeout — surfaces as a `DeliveryError`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rollcall_types::MAX_SENDER_NAME_LEN;

/// Provider acknowledgement of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAck {
    /// Provider-assigned message id, for audit correlation.
    pub message_id: String,
}

/// A failed delivery attempt. Retryable by the backoff policy.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("gateway transport error: {0}")]
    Transport(String),
    #[error("gateway rejected message: {0}")]
    Rejected(String),
    #[error("sender id '{0}' exceeds {MAX_SENDER_NAME_LEN} characters")]
    SenderTooLong(String),
}

/// Outbound SMS delivery seam.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(
        &self,
        sender_id: &str,
        phone: &str,
        content: &str,
    ) -> Result<DeliveryAck, DeliveryError>;
}

// ─── Wire Types ───────────────────────────────────

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    sender: &'a str,
    recipient: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    /// "success" on acceptance; anything else is a rejection.
    status: String,
    #[serde(default)]
    message_id: Option<String>,
    /// Human-readable reason accompanying a non-success status.
    #[serde(default)]
    message: Option<String>,
}

// ─── HTTP Implementation ───────────────────────────────────

/// HTTP client for the SMS provider API.
pub struct HttpSmsGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpSmsGateway {
    /// Create a client with the given provider endpoint and key.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn send(
        &self,
        sender_id: &str,
        phone: &str,
        content: &str,
    ) -> Result<DeliveryAck, DeliveryError> {
        // The schedule layer validates this too; the gateway would silently
        // truncate an over-long sender id, so refuse rather than mangle.
        if sender_id.chars().count() > MAX_SENDER_NAME_LEN {
            return Err(DeliveryError::SenderTooLong(sender_id.to_string()));
        }

        let body = SendRequest {
            sender: sender_id,
            recipient: phone,
            content,
        };

        let resp: SendResponse = self
            .client
            .post(format!("{}/messages", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(format!("send request failed: {e}")))?
            .json()
            .await
            .map_err(|e| DeliveryError::Transport(format!("send response parse failed: {e}")))?;

        if resp.status != "success" {
            return Err(DeliveryError::Rejected(
                resp.message
                    .unwrap_or_else(|| format!("provider status '{}'", resp.status)),
            ));
        }

        let message_id = resp
            .message_id
            .ok_or_else(|| DeliveryError::Rejected("success reply without message id".into()))?;

        tracing::debug!(%message_id, %phone, "SMS accepted by gateway");
        Ok(DeliveryAck { message_id })
    }
}
