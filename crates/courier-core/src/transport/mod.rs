//! Channel transports - the sending primitive for each channel

mod smtp;
mod whatsapp;

pub use smtp::SmtpTransport;
pub use whatsapp::UltraMsgTransport;

use async_trait::async_trait;
use courier_common::config::TransportConfig;
use courier_common::types::Channel;
use courier_storage::models::ComposedContent;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Per-recipient send failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The provider asked us to slow down; the caller backs off and retries
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Provider error: {0}")]
    ProviderError(String),
}

/// Channel transport trait
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    fn channel(&self) -> Channel;

    /// Send composed content to one address, returning the provider's message id
    async fn send(&self, address: &str, content: &ComposedContent)
        -> Result<String, TransportError>;
}

/// Configured transports, keyed by channel
#[derive(Clone, Default)]
pub struct Transports {
    whatsapp: Option<Arc<dyn ChannelTransport>>,
    email: Option<Arc<dyn ChannelTransport>>,
}

impl Transports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport under its own channel
    pub fn with(mut self, transport: Arc<dyn ChannelTransport>) -> Self {
        match transport.channel() {
            Channel::Whatsapp => self.whatsapp = Some(transport),
            Channel::Email => self.email = Some(transport),
        }
        self
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelTransport>> {
        match channel {
            Channel::Whatsapp => self.whatsapp.clone(),
            Channel::Email => self.email.clone(),
        }
    }

    /// Build the transports present in the configuration
    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut transports = Self::new();

        if let Some(whatsapp) = &config.whatsapp {
            info!(instance_id = %whatsapp.instance_id, "WhatsApp transport enabled");
            transports = transports.with(Arc::new(UltraMsgTransport::new(whatsapp.clone())?));
        }

        if let Some(email) = &config.email {
            info!(host = %email.host, port = email.port, "Email transport enabled");
            transports = transports.with(Arc::new(SmtpTransport::new(email.clone())?));
        }

        Ok(transports)
    }
}
