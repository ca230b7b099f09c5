//! WhatsApp transport over the UltraMsg HTTP API

use super::{ChannelTransport, TransportError};
use async_trait::async_trait;
use courier_common::config::WhatsappConfig;
use courier_common::types::Channel;
use courier_storage::models::ComposedContent;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// UltraMsg send response
#[derive(Debug, Deserialize)]
struct UltraMsgResponse {
    #[serde(default)]
    sent: Option<serde_json::Value>,
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// WhatsApp transport backed by an UltraMsg instance
pub struct UltraMsgTransport {
    config: WhatsappConfig,
    client: Client,
}

impl UltraMsgTransport {
    /// Create a new UltraMsg transport
    pub fn new(config: WhatsappConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TransportError::ProviderError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}/messages/chat",
            self.config.base_url.trim_end_matches('/'),
            self.config.instance_id
        )
    }

    /// Map an UltraMsg `error` payload, which is either a string or a list of
    /// `{field: message}` objects
    fn classify_error(error: &serde_json::Value) -> TransportError {
        let message = match error {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(|item| item.as_object())
                .flat_map(|obj| obj.iter().map(|(k, v)| format!("{}: {}", k, v.as_str().unwrap_or_default())))
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        };

        let lower = message.to_lowercase();
        if lower.starts_with("to:") || lower.contains("invalid phone") || lower.contains("not a valid") {
            TransportError::InvalidAddress(message)
        } else if lower.contains("limit") {
            TransportError::RateLimited(message)
        } else {
            TransportError::ProviderError(message)
        }
    }
}

#[async_trait]
impl ChannelTransport for UltraMsgTransport {
    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    async fn send(
        &self,
        address: &str,
        content: &ComposedContent,
    ) -> Result<String, TransportError> {
        let url = self.endpoint();
        debug!(to = %address, "Sending WhatsApp message via UltraMsg");

        let response = self
            .client
            .post(&url)
            .form(&[
                ("token", self.config.token.as_str()),
                ("to", address),
                ("body", content.body.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                warn!("UltraMsg request failed: {}", e);
                TransportError::ProviderError(format!("UltraMsg request failed: {}", e))
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::RateLimited(format!(
                "UltraMsg returned {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::ProviderError(format!(
                "UltraMsg returned error status {}: {}",
                status, body
            )));
        }

        let parsed: UltraMsgResponse = response.json().await.map_err(|e| {
            TransportError::ProviderError(format!("Failed to parse UltraMsg response: {}", e))
        })?;

        if let Some(error) = parsed.error {
            return Err(Self::classify_error(&error));
        }

        let sent = match &parsed.sent {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => s == "true",
            _ => false,
        };
        if !sent {
            return Err(TransportError::ProviderError(
                "UltraMsg did not accept the message".to_string(),
            ));
        }

        match parsed.id {
            Some(serde_json::Value::String(id)) => Ok(id),
            Some(serde_json::Value::Number(id)) => Ok(id.to_string()),
            _ => Err(TransportError::ProviderError(
                "UltraMsg response carried no message id".to_string(),
            )),
        }
    }
}
