//! OpenAI-compatible chat completions client for content variation

use super::{ContentVariation, VariationError};
use async_trait::async_trait;
use courier_common::config::VariationConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const SYSTEM_PROMPT: &str = "You rewrite outbound campaign messages. Produce one paraphrase \
that keeps the meaning, the language, every link, every number and any HTML markup of the \
original. Reply with the rewritten message only.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Content variation through an OpenAI-compatible API
pub struct OpenAiVariation {
    config: VariationConfig,
    client: Client,
}

impl OpenAiVariation {
    /// Create a new client; the caller bounds each call with its own timeout
    pub fn new(config: VariationConfig) -> Result<Self, VariationError> {
        let client = Client::builder()
            .build()
            .map_err(|e| VariationError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn build_request<'a>(&'a self, base: &str, hints: Option<&str>) -> ChatRequest<'a> {
        let mut system = SYSTEM_PROMPT.to_string();
        if let Some(hints) = hints.filter(|h| !h.trim().is_empty()) {
            system.push_str("\nStyle: ");
            system.push_str(hints.trim());
        }

        ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: base.to_string(),
                },
            ],
        }
    }
}

#[async_trait]
impl ContentVariation for OpenAiVariation {
    async fn rewrite(&self, base: &str, hints: Option<&str>) -> Result<String, VariationError> {
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .json(&self.build_request(base, hints));

        if let Some(ref api_key) = self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VariationError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VariationError::Request(format!(
                "variation service returned {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| VariationError::InvalidResponse(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(VariationError::InvalidResponse("empty rewrite".to_string()));
        }

        debug!(chars = text.len(), "Received content variation");
        Ok(text)
    }
}
