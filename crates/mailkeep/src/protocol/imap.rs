//! IMAP backend for the protocol adapter.
//!
//! Read-only archiving: mailboxes are opened with EXAMINE and messages are
//! fetched with BODY.PEEK[] so nothing on the server is marked as read.

use async_imap::Session;
use async_native_tls::TlsConnector;
use futures_util::StreamExt;
use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};

use super::error::{ProtocolError, Result};
use super::{ConnectionSettings, NewMessages};

/// Type alias for the underlying async stream (async-std compatible TcpStream).
type AsyncTcpStream = async_io::Async<std::net::TcpStream>;

/// Type alias for the TLS stream used by the IMAP session.
type TlsStream = async_native_tls::TlsStream<AsyncTcpStream>;

/// An authenticated IMAP session.
pub struct ImapSession {
    session: Option<Session<TlsStream>>,
    server: String,
}

impl ImapSession {
    /// Connects to the IMAP server over TLS and logs in.
    pub async fn connect(
        settings: &ConnectionSettings,
        password: &SecretString,
    ) -> Result<Self> {
        let addr = format!("{}:{}", settings.server, settings.port);
        info!("Connecting to IMAP server at {}", addr);

        let std_stream = std::net::TcpStream::connect(&addr)
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        std_stream
            .set_nonblocking(true)
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        let tcp_stream = async_io::Async::new(std_stream)
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;

        let tls = TlsConnector::new();
        let tls_stream = tls
            .connect(&settings.server, tcp_stream)
            .await
            .map_err(|e| ProtocolError::Tls(e.to_string()))?;

        let client = async_imap::Client::new(tls_stream);
        let session = client
            .login(&settings.username, password.expose_secret())
            .await
            .map_err(|(e, _)| ProtocolError::Auth(e.to_string()))?;

        info!("Authenticated to IMAP server {}", settings.server);
        Ok(Self {
            session: Some(session),
            server: settings.server.clone(),
        })
    }

    fn session_mut(&mut self) -> Result<&mut Session<TlsStream>> {
        self.session
            .as_mut()
            .ok_or_else(|| ProtocolError::Connection("Not connected".to_string()))
    }

    /// Lists all mailbox names on the server.
    pub async fn list_mailboxes(&mut self) -> Result<Vec<String>> {
        let session = self.session_mut()?;

        let stream = session
            .list(Some(""), Some("*"))
            .await
            .map_err(|e| ProtocolError::Protocol(e.to_string()))?;
        let names: Vec<_> = stream.collect().await;

        let mut mailboxes = Vec::with_capacity(names.len());
        for name in names {
            let name = name.map_err(|e| ProtocolError::Protocol(e.to_string()))?;
            mailboxes.push(name.name().to_string());
        }

        debug!("Server reports {} mailboxes", mailboxes.len());
        Ok(mailboxes)
    }

    /// Lists UIDs in `mailbox` newer than the cursor, ascending.
    ///
    /// The cursor marker is the mailbox's UIDNEXT: everything at or above
    /// the stored marker has not been archived yet. The next marker is the
    /// UIDNEXT reported when the mailbox is examined, so it covers exactly
    /// the batch returned here.
    pub async fn list_new(
        &mut self,
        mailbox: &str,
        cursor: Option<&str>,
    ) -> Result<NewMessages> {
        let session = self.session_mut()?;

        let mailbox_status = session.examine(mailbox).await.map_err(|e| {
            let msg = e.to_string();
            if msg.contains("NO") || msg.contains("doesn't exist") {
                ProtocolError::MailboxNotFound(mailbox.to_string())
            } else {
                ProtocolError::Protocol(msg)
            }
        })?;

        let start = parse_marker(cursor);
        let query = format!("UID {}:*", start);
        debug!("Searching '{}' with query: {}", mailbox, query);

        let uids = session
            .uid_search(&query)
            .await
            .map_err(|e| ProtocolError::Protocol(e.to_string()))?;

        // A `start:*` range always matches the highest UID, even when it is
        // below `start`, so ids behind the cursor must be filtered out.
        let ids = uids_since(uids.into_iter().collect(), start);
        let next_cursor = next_marker(mailbox_status.uid_next, &ids, start);

        debug!(
            "Mailbox '{}': {} new messages, next cursor {}",
            mailbox,
            ids.len(),
            next_cursor
        );

        Ok(NewMessages {
            ids,
            next_cursor,
        })
    }

    /// Fetches one message by UID using BODY.PEEK[].
    pub async fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>> {
        let session = self.session_mut()?;

        debug!("Fetching message UID {}", uid);

        let mut messages = session
            .uid_fetch(uid.to_string(), "BODY.PEEK[]")
            .await
            .map_err(|e| ProtocolError::Protocol(e.to_string()))?;

        let message = messages
            .next()
            .await
            .ok_or_else(|| ProtocolError::Fetch {
                id: uid,
                reason: "message not found".to_string(),
            })?
            .map_err(|e| ProtocolError::Fetch {
                id: uid,
                reason: e.to_string(),
            })?;

        let body = message.body().ok_or_else(|| ProtocolError::Fetch {
            id: uid,
            reason: "message has no body".to_string(),
        })?;

        Ok(body.to_vec())
    }

    /// Logs out. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            info!("Disconnecting from IMAP server {}", self.server);
            session
                .logout()
                .await
                .map_err(|e| ProtocolError::Protocol(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for ImapSession {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!(
                "IMAP session to {} dropped without logout - connection will be closed",
                self.server
            );
        }
    }
}

/// Parses a stored cursor marker, defaulting to UID 1 (archive everything).
fn parse_marker(cursor: Option<&str>) -> u32 {
    cursor
        .and_then(|c| c.parse::<u32>().ok())
        .filter(|&c| c > 0)
        .unwrap_or(1)
}

/// Keeps only UIDs at or above the cursor, sorted ascending.
fn uids_since(mut uids: Vec<u32>, start: u32) -> Vec<u32> {
    uids.retain(|&uid| uid >= start);
    uids.sort_unstable();
    uids.dedup();
    uids
}

/// Computes the next cursor marker from the examined mailbox's UIDNEXT,
/// falling back to highest-seen-UID + 1 when the server omits it.
fn next_marker(uid_next: Option<u32>, ids: &[u32], start: u32) -> String {
    let next = uid_next
        .or_else(|| ids.last().map(|&max| max + 1))
        .unwrap_or(start);
    next.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_marker() {
        assert_eq!(parse_marker(None), 1);
        assert_eq!(parse_marker(Some("42")), 42);
        assert_eq!(parse_marker(Some("0")), 1);
        assert_eq!(parse_marker(Some("not-a-number")), 1);
    }

    #[test]
    fn test_uids_since_filters_and_sorts() {
        assert_eq!(uids_since(vec![9, 3, 7, 5], 5), vec![5, 7, 9]);
        assert_eq!(uids_since(vec![3, 1], 5), Vec::<u32>::new());
        assert_eq!(uids_since(vec![5, 5, 6], 5), vec![5, 6]);
    }

    #[test]
    fn test_next_marker_prefers_uidnext() {
        assert_eq!(next_marker(Some(10), &[7, 8, 9], 7), "10");
    }

    #[test]
    fn test_next_marker_falls_back_to_max_plus_one() {
        assert_eq!(next_marker(None, &[7, 8, 9], 7), "10");
    }

    #[test]
    fn test_next_marker_empty_batch_keeps_cursor() {
        // No new messages and no UIDNEXT: the cursor must not move backwards.
        assert_eq!(next_marker(None, &[], 7), "7");
    }

    #[test]
    fn test_cursor_never_decreases() {
        // Successive passes: marker 7 -> batch [7,8] with UIDNEXT 9 -> marker 9.
        let first = next_marker(Some(9), &[7, 8], 7);
        assert_eq!(first, "9");
        let second = next_marker(Some(9), &[], parse_marker(Some(&first)));
        assert!(second.parse::<u32>().unwrap() >= first.parse::<u32>().unwrap());
    }
}
