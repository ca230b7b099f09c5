//! Email transport over SMTP

use super::{ChannelTransport, TransportError};
use async_trait::async_trait;
use chrono::Utc;
use courier_common::config::EmailConfig;
use courier_common::types::Channel;
use courier_storage::models::ComposedContent;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// HTML email transport backed by an SMTP relay
pub struct SmtpTransport {
    from: Mailbox,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    /// Create a new SMTP transport
    pub fn new(config: EmailConfig) -> Result<Self, TransportError> {
        let from = match &config.from_name {
            Some(name) => format!("{} <{}>", name, config.from_address),
            None => config.from_address.clone(),
        };
        let from: Mailbox = from
            .parse()
            .map_err(|e| TransportError::ProviderError(format!("Invalid from address: {}", e)))?;

        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else if config.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        } else {
            Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host))
        }
        .map_err(|e| {
            TransportError::ProviderError(format!("Failed to create SMTP transport: {}", e))
        })?
        .port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let mailer = builder
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();

        Ok(Self { from, mailer })
    }

    /// Build the HTML message for one recipient
    fn build_message(
        &self,
        address: &str,
        content: &ComposedContent,
        message_id: &str,
    ) -> Result<Message, TransportError> {
        let to: Mailbox = address
            .parse()
            .map_err(|e| TransportError::InvalidAddress(format!("{}: {}", address, e)))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(content.subject.clone().unwrap_or_default())
            .message_id(Some(message_id.to_string()))
            .header(ContentType::TEXT_HTML)
            .body(content.body.clone())
            .map_err(|e| TransportError::ProviderError(format!("Failed to build email: {}", e)))
    }

    /// Map an SMTP failure onto the transport error taxonomy
    fn classify(error: lettre::transport::smtp::Error) -> TransportError {
        let message = error.to_string();
        let code = error.status().map(|c| c.to_string()).unwrap_or_default();

        if error.is_permanent()
            && (code == "550"
                || code == "553"
                || message.contains("5.1.1")
                || message.contains("User unknown")
                || message.contains("does not exist"))
        {
            TransportError::InvalidAddress(message)
        } else if error.is_transient()
            && (code == "421" || code == "451" || code == "452" || message.contains("4.7."))
        {
            TransportError::RateLimited(message)
        } else {
            TransportError::ProviderError(message)
        }
    }
}

#[async_trait]
impl ChannelTransport for SmtpTransport {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(
        &self,
        address: &str,
        content: &ComposedContent,
    ) -> Result<String, TransportError> {
        let message_id = format!("<{}.{}@courier>", Uuid::new_v4(), Utc::now().timestamp());
        let email = self.build_message(address, content, &message_id)?;

        let response = self.mailer.send(email).await.map_err(Self::classify)?;
        debug!(to = %address, code = %response.code(), "Email accepted by relay");

        Ok(message_id)
    }
}
