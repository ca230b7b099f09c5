//! Content Composer - Personalizes campaign content per recipient

use crate::variation::{ContentVariation, VariationError};
use courier_common::types::Channel;
use courier_storage::models::{Campaign, ComposedContent, Recipient};
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Composition errors, recorded as a FAILED outcome for the recipient
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompositionError {
    #[error("Rendered body is empty")]
    EmptyBody,

    #[error("Rendered subject is empty")]
    EmptySubject,
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{([^{}]*)\}\}").expect("placeholder pattern is valid"))
}

/// Template renderer for `{{variable}}` placeholders
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render a template with recipient data; unknown placeholders are removed
    pub fn render(&self, template: &str, recipient: &Recipient) -> String {
        placeholder()
            .replace_all(template, |caps: &Captures| {
                self.lookup(caps[1].trim(), recipient).unwrap_or_default()
            })
            .into_owned()
    }

    fn lookup(&self, key: &str, recipient: &Recipient) -> Option<String> {
        let name = recipient.display_name.as_deref().unwrap_or("");
        match key {
            "name" => Some(name.to_string()),
            "first_name" => Some(name.split_whitespace().next().unwrap_or("").to_string()),
            "last_name" => {
                let parts: Vec<&str> = name.split_whitespace().collect();
                Some(parts.get(1..).map(|rest| rest.join(" ")).unwrap_or_default())
            }
            "phone" => Some(recipient.phone.clone().unwrap_or_default()),
            "email" => Some(recipient.email.clone().unwrap_or_default()),
            _ => {
                let field = key.strip_prefix("fields.").unwrap_or(key);
                recipient.fields.get(field).map(value_to_string)
            }
        }
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Content composed for one recipient, with the reason it was degraded if so
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composition {
    pub content: ComposedContent,
    pub degraded_reason: Option<String>,
}

/// Composes per-recipient content, optionally varied by the variation service
#[derive(Clone)]
pub struct ContentComposer {
    renderer: TemplateRenderer,
    variation: Option<Arc<dyn ContentVariation>>,
    timeout: Duration,
}

impl ContentComposer {
    pub fn new(variation: Option<Arc<dyn ContentVariation>>, timeout: Duration) -> Self {
        Self {
            renderer: TemplateRenderer::new(),
            variation,
            timeout,
        }
    }

    /// Render the base content; pure and deterministic
    pub fn render_base(
        &self,
        campaign: &Campaign,
        recipient: &Recipient,
    ) -> Result<ComposedContent, CompositionError> {
        let body = self.renderer.render(&campaign.content.body, recipient);
        if body.trim().is_empty() {
            return Err(CompositionError::EmptyBody);
        }

        let subject = match campaign.channel {
            Channel::Email => {
                let template = campaign.content.subject.as_deref().unwrap_or("");
                let subject = self.renderer.render(template, recipient);
                if subject.trim().is_empty() {
                    return Err(CompositionError::EmptySubject);
                }
                Some(subject.trim().to_string())
            }
            Channel::Whatsapp => None,
        };

        Ok(ComposedContent {
            subject,
            body,
            degraded: false,
        })
    }

    /// Compose content for one recipient.
    ///
    /// Variation failures never fail composition: the base content is used
    /// and the result is marked degraded.
    pub async fn compose(
        &self,
        campaign: &Campaign,
        recipient: &Recipient,
    ) -> Result<Composition, CompositionError> {
        let mut content = self.render_base(campaign, recipient)?;
        if !campaign.content.use_ai_variation {
            return Ok(Composition {
                content,
                degraded_reason: None,
            });
        }

        let hints = campaign.content.variation_prompt.as_deref();
        let outcome = match &self.variation {
            None => Err("variation service not configured".to_string()),
            Some(variation) => {
                match tokio::time::timeout(self.timeout, variation.rewrite(&content.body, hints)).await {
                    Ok(Ok(text)) if !text.trim().is_empty() => Ok(text),
                    Ok(Ok(_)) => Err("variation service returned a blank rewrite".to_string()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(VariationError::Timeout(self.timeout.as_millis() as u64).to_string()),
                }
            }
        };

        match outcome {
            Ok(text) => {
                content.body = text;
                Ok(Composition {
                    content,
                    degraded_reason: None,
                })
            }
            Err(reason) => {
                warn!(
                    campaign_id = %campaign.id,
                    address = %recipient.address,
                    reason = %reason,
                    "Composition degraded, using base content"
                );
                content.degraded = true;
                Ok(Composition {
                    content,
                    degraded_reason: Some(reason),
                })
            }
        }
    }
}
