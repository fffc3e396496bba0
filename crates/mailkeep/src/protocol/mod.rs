//! Protocol client adapter: uniform operations over IMAP and POP3.
//!
//! The two backends expose the same capability set (connect, list
//! mailboxes, list ids newer than a cursor, fetch raw bytes) behind one
//! enum, bound once per account at creation time. IMAP ids are
//! server-assigned UIDs, stable per mailbox; POP3 has no cross-session id,
//! so positions are synthesized from message counts (see [`pop3`]).

pub mod error;
pub mod imap;
pub mod pop3;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

pub use error::{ProtocolError, Result};
pub use imap::ImapSession;
pub use pop3::Pop3Session;

/// Mailbox protocol for an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Imap,
    /// The default when a registration request leaves it unspecified.
    #[default]
    Pop3,
}

impl Protocol {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Imap => "imap",
            Protocol::Pop3 => "pop3",
        }
    }

    /// Parses the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "imap" => Some(Protocol::Imap),
            "pop3" => Some(Protocol::Pop3),
            _ => None,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection parameters for a mail server.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub protocol: Protocol,
    pub server: String,
    pub port: u16,
    /// Login name, normally the account's email address.
    pub username: String,
}

/// One batch of not-yet-archived message ids for a mailbox, together with
/// the cursor marker to store once the batch is durably committed.
#[derive(Debug, Clone)]
pub struct NewMessages {
    /// Ids newer than the cursor, ascending.
    pub ids: Vec<u32>,
    /// Opaque marker for the next pass (IMAP: UIDNEXT; POP3: message count).
    pub next_cursor: String,
}

/// An authenticated session with a mail server, IMAP or POP3.
pub enum MailSession {
    Imap(ImapSession),
    Pop3(Pop3Session),
}

impl MailSession {
    /// Connects and authenticates using the account's protocol.
    pub async fn connect(
        settings: &ConnectionSettings,
        password: &SecretString,
    ) -> Result<Self> {
        match settings.protocol {
            Protocol::Imap => ImapSession::connect(settings, password)
                .await
                .map(MailSession::Imap),
            Protocol::Pop3 => Pop3Session::connect(settings, password)
                .await
                .map(MailSession::Pop3),
        }
    }

    /// Lists the mailboxes available on the server.
    ///
    /// POP3 exposes exactly one implicit mailbox.
    pub async fn list_mailboxes(&mut self) -> Result<Vec<String>> {
        match self {
            MailSession::Imap(s) => s.list_mailboxes().await,
            MailSession::Pop3(_) => Ok(vec![pop3::IMPLICIT_MAILBOX.to_string()]),
        }
    }

    /// Lists message ids newer than the given cursor, ascending, together
    /// with the marker to store after the batch commits.
    pub async fn list_new(
        &mut self,
        mailbox: &str,
        cursor: Option<&str>,
    ) -> Result<NewMessages> {
        match self {
            MailSession::Imap(s) => s.list_new(mailbox, cursor).await,
            MailSession::Pop3(s) => s.list_new(cursor).await,
        }
    }

    /// Fetches the full raw bytes of one message.
    pub async fn fetch_raw(&mut self, id: u32) -> Result<Vec<u8>> {
        match self {
            MailSession::Imap(s) => s.fetch_raw(id).await,
            MailSession::Pop3(s) => s.fetch_raw(id).await,
        }
    }

    /// Ends the session gracefully. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        match self {
            MailSession::Imap(s) => s.close().await,
            MailSession::Pop3(s) => s.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_string_roundtrip() {
        assert_eq!(Protocol::parse("imap"), Some(Protocol::Imap));
        assert_eq!(Protocol::parse("pop3"), Some(Protocol::Pop3));
        assert_eq!(Protocol::parse("smtp"), None);
        assert_eq!(Protocol::Imap.as_str(), "imap");
        assert_eq!(Protocol::Pop3.as_str(), "pop3");
    }

    #[test]
    fn test_protocol_display() {
        assert_eq!(Protocol::Imap.to_string(), "imap");
        assert_eq!(Protocol::Pop3.to_string(), "pop3");
    }

    #[test]
    fn test_protocol_defaults_to_pop3() {
        assert_eq!(Protocol::default(), Protocol::Pop3);
    }
}
