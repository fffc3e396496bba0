//! Protocol adapter error types.

use thiserror::Error;

/// Errors that can occur while talking to a mail server.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Failed to reach the server (TCP level).
    #[error("Connection failed: {0}")]
    Connection(String),

    /// TLS handshake or stream error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The server rejected the credentials.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A message vanished or could not be retrieved mid-batch.
    #[error("Failed to fetch message {id}: {reason}")]
    Fetch { id: u32, reason: String },

    /// The server sent something the adapter could not interpret.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The requested mailbox does not exist on the server.
    #[error("Mailbox '{0}' not found")]
    MailboxNotFound(String),

    /// The per-session deadline elapsed.
    #[error("Session exceeded deadline of {0}s")]
    Timeout(u64),
}

impl From<async_native_tls::Error> for ProtocolError {
    fn from(err: async_native_tls::Error) -> Self {
        ProtocolError::Tls(err.to_string())
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        ProtocolError::Connection(err.to_string())
    }
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
