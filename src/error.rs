//! Error types for the reservation autoresponder.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised by the mailbox and mail transport collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Connection to {target} failed: {reason}")]
    Connection { target: String, reason: String },

    #[error("Not connected to {target}")]
    NotConnected { target: String },

    #[error("Mailbox fetch failed: {0}")]
    Fetch(String),

    #[error("Failed to parse message {reference}: {reason}")]
    Parse { reference: String, reason: String },

    #[error("Failed to send to {to}: {reason}")]
    SendFailed { to: String, reason: String },
}

/// Failures at the per-message pipeline boundary.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Reply to {to} failed (confirmation {}): {source}", .confirmation_number.as_deref().unwrap_or("none"))]
    Send {
        to: String,
        confirmation_number: Option<String>,
        #[source]
        source: ChannelError,
    },

    #[error("Message pipeline panicked: {0}")]
    Panicked(String),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
