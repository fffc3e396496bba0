//! Crate-level error type folding the per-module errors together.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailkeepError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Credential vault error: {0}")]
    Vault(#[from] crate::vault::VaultError),

    #[error("Mail server error: {0}")]
    Protocol(#[from] crate::protocol::ProtocolError),

    #[error("Decode error: {0}")]
    Decode(#[from] crate::decode::DecodeError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Account error: {0}")]
    Account(String),
}

pub type Result<T> = std::result::Result<T, MailkeepError>;
