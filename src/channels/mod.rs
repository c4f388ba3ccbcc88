//! Mail collaborators: the polled mailbox and the reply transport.

pub mod email_types;
pub mod imap;
pub mod smtp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ChannelError;

pub use email_types::IncomingMessage;
pub use imap::ImapMailbox;
pub use smtp::SmtpMailer;

/// Inbound mailbox session.
///
/// Owned exclusively by the cycle orchestrator; every call takes
/// `&mut self`, so only one connect/fetch/disconnect sequence is ever in
/// flight.
#[async_trait]
pub trait Mailbox: Send {
    /// Open and authenticate a session.
    async fn connect(&mut self) -> Result<(), ChannelError>;

    /// Whether a live session exists.
    fn is_connected(&self) -> bool;

    /// Unread messages received on or after `since`.
    ///
    /// Messages that cannot be decoded are logged and left out; the call
    /// only fails when the search or transfer itself fails.
    async fn fetch_unseen_since(
        &mut self,
        since: DateTime<Utc>,
    ) -> Result<Vec<IncomingMessage>, ChannelError>;

    /// Flag a message as read. Callers treat failures as best-effort.
    async fn mark_read(&mut self, message: &IncomingMessage) -> Result<(), ChannelError>;

    /// Close the session. A no-op when not connected.
    async fn disconnect(&mut self) -> Result<(), ChannelError>;
}

/// A reply ready to hand to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// Outbound mail transport.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Check the relay is reachable and accepts our credentials.
    async fn verify_connectivity(&self) -> bool;

    /// Deliver one message, returning the relay's confirmation id.
    async fn send(&self, email: &OutgoingEmail) -> Result<String, ChannelError>;
}
