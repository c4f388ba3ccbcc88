//! SMTP reply transport via lettre.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox as Sender, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{error, info};

use crate::channels::{MailTransport, OutgoingEmail};
use crate::config::TransportConfig;
use crate::error::ChannelError;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Port on which the relay expects TLS from the first byte.
const IMPLICIT_TLS_PORT: u16 = 465;

/// Sends replies through an authenticated SMTP relay.
pub struct SmtpMailer {
    transport: Arc<SmtpTransport>,
    host: String,
    /// Display name for the From header.
    sender_name: String,
    /// Address for the From header.
    sender_address: String,
}

impl SmtpMailer {
    /// Build a mailer for `config`, sending as `"<sender_name> <SMTP_USER>"`.
    pub fn new(config: &TransportConfig, sender_name: &str) -> Result<Self, ChannelError> {
        let connection_error = |e: lettre::transport::smtp::Error| ChannelError::Connection {
            target: format!("smtp://{}:{}", config.host, config.port),
            reason: e.to_string(),
        };

        let builder = if config.port == IMPLICIT_TLS_PORT {
            SmtpTransport::relay(&config.host)
        } else {
            SmtpTransport::starttls_relay(&config.host)
        }
        .map_err(connection_error)?;

        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = builder
            .port(config.port)
            .credentials(creds)
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        Ok(Self {
            transport: Arc::new(transport),
            host: config.host.clone(),
            sender_name: sender_name.to_string(),
            sender_address: config.username.clone(),
        })
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message, ChannelError> {
        let send_failed = |reason: String| ChannelError::SendFailed {
            to: email.to.clone(),
            reason,
        };

        let from = Sender::new(
            Some(self.sender_name.clone()),
            self.sender_address
                .parse()
                .map_err(|e| send_failed(format!("Invalid from address: {e}")))?,
        );
        let to: Sender = email
            .to
            .parse()
            .map_err(|e| send_failed(format!("Invalid to address: {e}")))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.as_str())
            .multipart(MultiPart::alternative_plain_html(
                email.text_body.clone(),
                email.html_body.clone(),
            ))
            .map_err(|e| send_failed(format!("Failed to build email: {e}")))
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn verify_connectivity(&self) -> bool {
        let transport = Arc::clone(&self.transport);
        let result = tokio::task::spawn_blocking(move || transport.test_connection()).await;
        match result {
            Ok(Ok(true)) => {
                info!(host = %self.host, "SMTP connection verified successfully");
                true
            }
            Ok(Ok(false)) => {
                error!(host = %self.host, "SMTP connection failed: server not ready");
                false
            }
            Ok(Err(e)) => {
                error!(host = %self.host, error = %e, "SMTP connection failed");
                false
            }
            Err(e) => {
                error!(host = %self.host, error = %e, "SMTP verification task panicked");
                false
            }
        }
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<String, ChannelError> {
        let message = self.build_message(email)?;
        let transport = Arc::clone(&self.transport);
        let response = tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| ChannelError::SendFailed {
                to: email.to.clone(),
                reason: format!("SMTP task panicked: {e}"),
            })?
            .map_err(|e| ChannelError::SendFailed {
                to: email.to.clone(),
                reason: format!("SMTP send failed: {e}"),
            })?;

        let delivery_id = response
            .first_line()
            .map(str::to_string)
            .unwrap_or_else(|| response.code().to_string());
        info!(to = %email.to, delivery_id = %delivery_id, "Email sent");
        Ok(delivery_id)
    }
}
