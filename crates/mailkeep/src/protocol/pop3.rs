//! POP3 backend for the protocol adapter.
//!
//! POP3 has no server-issued id that survives across sessions; the protocol
//! only exposes a 1..N message count. The adapter synthesizes positions from
//! the counts seen since the last cursor. Server-side deletions that shift
//! indices between polls can make already-archived messages reappear as
//! "new"; the deduplicator absorbs most of those, but this is a known,
//! accepted correctness gap of the protocol, not something to paper over.

use async_native_tls::TlsConnector;
use futures_util::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};

use super::error::{ProtocolError, Result};
use super::{ConnectionSettings, NewMessages};

/// The single mailbox a POP3 server exposes.
pub const IMPLICIT_MAILBOX: &str = "INBOX";

type AsyncTcpStream = async_io::Async<std::net::TcpStream>;
type TlsStream = async_native_tls::TlsStream<AsyncTcpStream>;

/// An authenticated POP3 session.
pub struct Pop3Session {
    stream: Option<BufReader<TlsStream>>,
    server: String,
}

impl Pop3Session {
    /// Connects to the POP3 server over TLS and authenticates with USER/PASS.
    pub async fn connect(
        settings: &ConnectionSettings,
        password: &SecretString,
    ) -> Result<Self> {
        let addr = format!("{}:{}", settings.server, settings.port);
        info!("Connecting to POP3 server at {}", addr);

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

        let mut session = Self {
            stream: Some(BufReader::new(tls_stream)),
            server: settings.server.clone(),
        };

        // Server speaks first.
        let greeting = session.read_status_line().await?;
        debug!("POP3 greeting: {}", greeting);

        session
            .command(&format!("USER {}", settings.username), "USER")
            .await
            .map_err(auth_error)?;
        session
            .command(&format!("PASS {}", password.expose_secret()), "PASS")
            .await
            .map_err(auth_error)?;

        info!("Authenticated to POP3 server {}", settings.server);
        Ok(session)
    }

    fn stream_mut(&mut self) -> Result<&mut BufReader<TlsStream>> {
        self.stream
            .as_mut()
            .ok_or_else(|| ProtocolError::Connection("Not connected".to_string()))
    }

    /// Sends a command and reads the single status line reply.
    ///
    /// `log_as` is logged instead of the raw command so credentials never
    /// reach the log output.
    async fn command(&mut self, cmd: &str, log_as: &str) -> Result<String> {
        debug!("POP3 >> {}", log_as);
        let stream = self.stream_mut()?;
        stream
            .get_mut()
            .write_all(format!("{}\r\n", cmd).as_bytes())
            .await?;
        self.read_status_line().await
    }

    /// Reads one `+OK`/`-ERR` status line, returning the text after `+OK`.
    async fn read_status_line(&mut self) -> Result<String> {
        read_status_from(self.stream_mut()?).await
    }

    /// Reads a multi-line response body terminated by a lone `.`,
    /// reversing dot-stuffing.
    async fn read_multiline(&mut self) -> Result<Vec<u8>> {
        read_multiline_from(self.stream_mut()?).await
    }

    /// Returns the current message count via STAT.
    pub async fn stat(&mut self) -> Result<u32> {
        let reply = self.command("STAT", "STAT").await?;
        let count = reply
            .split_whitespace()
            .next()
            .and_then(|c| c.parse::<u32>().ok())
            .ok_or_else(|| {
                ProtocolError::Protocol(format!("Malformed STAT reply: {}", reply))
            })?;
        Ok(count)
    }

    /// Lists positions newer than the cursor, ascending.
    pub async fn list_new(&mut self, cursor: Option<&str>) -> Result<NewMessages> {
        let count = self.stat().await?;
        let (ids, next_cursor, shrunk) = positions_since(cursor, count);
        if shrunk {
            warn!(
                "POP3 mailbox on {} shrank below the stored cursor; replaying all {} \
                 messages (duplicates are absorbed by the fingerprint check)",
                self.server, count
            );
        }
        debug!("POP3: {} new messages, next cursor {}", ids.len(), next_cursor);
        Ok(NewMessages { ids, next_cursor })
    }

    /// Fetches one message by position via RETR.
    pub async fn fetch_raw(&mut self, id: u32) -> Result<Vec<u8>> {
        self.command(&format!("RETR {}", id), &format!("RETR {}", id))
            .await
            .map_err(|e| ProtocolError::Fetch {
                id,
                reason: e.to_string(),
            })?;
        self.read_multiline().await
    }

    /// Sends QUIT and drops the connection. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if self.stream.is_some() {
            info!("Disconnecting from POP3 server {}", self.server);
            let result = self.command("QUIT", "QUIT").await;
            self.stream = None;
            result?;
        }
        Ok(())
    }
}

/// Reads one CRLF-terminated line as raw bytes, without the terminator.
/// `None` means the server closed the connection.
///
/// Message payloads are raw octets (an 8bit transfer encoding is legal),
/// so nothing on this path may assume utf-8.
async fn read_line_bytes<R>(stream: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = stream.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    if line.ends_with(b"\n") {
        line.pop();
    }
    if line.ends_with(b"\r") {
        line.pop();
    }
    Ok(Some(line))
}

/// Reads and parses one `+OK`/`-ERR` status line.
async fn read_status_from<R>(stream: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line_bytes(stream).await?.ok_or_else(|| {
        ProtocolError::Connection("Server closed the connection".to_string())
    })?;
    // Status lines are ASCII per the protocol; stray bytes are replaced
    // rather than failing the read.
    let line = String::from_utf8_lossy(&line);

    if let Some(rest) = line.strip_prefix("+OK") {
        Ok(rest.trim_start().to_string())
    } else if let Some(rest) = line.strip_prefix("-ERR") {
        Err(ProtocolError::Protocol(rest.trim_start().to_string()))
    } else {
        Err(ProtocolError::Protocol(format!(
            "Unexpected POP3 response: {}",
            line
        )))
    }
}

/// Reads a multi-line response terminated by a lone `.`, reversing
/// dot-stuffing. The payload is returned byte for byte.
async fn read_multiline_from<R>(stream: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let line = read_line_bytes(stream).await?.ok_or_else(|| {
            ProtocolError::Connection("Connection closed mid-response".to_string())
        })?;
        if line == b"." {
            break;
        }
        // Any other line starting with a dot was stuffed by the server.
        let line = line.strip_prefix(b".").unwrap_or(&line[..]);
        body.extend_from_slice(line);
        body.extend_from_slice(b"\r\n");
    }
    Ok(body)
}

/// Maps a command failure during login to an authentication error.
fn auth_error(err: ProtocolError) -> ProtocolError {
    match err {
        ProtocolError::Protocol(msg) => ProtocolError::Auth(msg),
        other => other,
    }
}

/// Synthesizes the not-yet-seen positions from the stored cursor and the
/// current message count. Returns `(ids, next_cursor, shrunk)`; `shrunk`
/// is set when the count dropped below the cursor (server-side deletions),
/// in which case the whole mailbox is replayed.
fn positions_since(cursor: Option<&str>, count: u32) -> (Vec<u32>, String, bool) {
    let prev = cursor.and_then(|c| c.parse::<u32>().ok()).unwrap_or(0);
    if count >= prev {
        ((prev + 1..=count).collect(), count.to_string(), false)
    } else {
        ((1..=count).collect(), count.to_string(), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::io::Cursor;

    #[tokio::test]
    async fn test_multiline_preserves_non_utf8_bytes() {
        // A latin-1 body with an 8bit transfer encoding is a valid
        // payload and must survive the read byte for byte.
        let mut stream = Cursor::new(&b"caf\xe9 au lait\r\n.\r\n"[..]);
        let body = read_multiline_from(&mut stream).await.unwrap();
        assert_eq!(body, b"caf\xe9 au lait\r\n");
    }

    #[tokio::test]
    async fn test_multiline_reverses_dot_stuffing() {
        let mut stream = Cursor::new(&b"..leading dot\r\nplain\r\n.\r\n"[..]);
        let body = read_multiline_from(&mut stream).await.unwrap();
        assert_eq!(body, b".leading dot\r\nplain\r\n");
    }

    #[tokio::test]
    async fn test_multiline_truncated_stream_is_an_error() {
        let mut stream = Cursor::new(&b"partial line\r\n"[..]);
        let result = read_multiline_from(&mut stream).await;
        assert!(matches!(result, Err(ProtocolError::Connection(_))));
    }

    #[tokio::test]
    async fn test_status_line_parsing() {
        let mut stream = Cursor::new(&b"+OK 2 320\r\n"[..]);
        assert_eq!(read_status_from(&mut stream).await.unwrap(), "2 320");

        let mut stream = Cursor::new(&b"-ERR no such message\r\n"[..]);
        let result = read_status_from(&mut stream).await;
        match result {
            Err(ProtocolError::Protocol(msg)) => assert_eq!(msg, "no such message"),
            other => panic!("Expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_positions_first_pass() {
        let (ids, next, shrunk) = positions_since(None, 3);
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(next, "3");
        assert!(!shrunk);
    }

    #[test]
    fn test_positions_incremental() {
        let (ids, next, shrunk) = positions_since(Some("3"), 5);
        assert_eq!(ids, vec![4, 5]);
        assert_eq!(next, "5");
        assert!(!shrunk);
    }

    #[test]
    fn test_positions_no_new_mail() {
        let (ids, next, shrunk) = positions_since(Some("5"), 5);
        assert!(ids.is_empty());
        assert_eq!(next, "5");
        assert!(!shrunk);
    }

    #[test]
    fn test_positions_shrunk_mailbox_replays() {
        // Deletions shifted indices; the adapter replays everything rather
        // than guessing which positions map to which messages.
        let (ids, next, shrunk) = positions_since(Some("5"), 2);
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(next, "2");
        assert!(shrunk);
    }

    #[test]
    fn test_positions_garbage_cursor() {
        let (ids, next, shrunk) = positions_since(Some("bogus"), 2);
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(next, "2");
        assert!(!shrunk);
    }

    #[test]
    fn test_positions_empty_mailbox() {
        let (ids, next, shrunk) = positions_since(None, 0);
        assert!(ids.is_empty());
        assert_eq!(next, "0");
        assert!(!shrunk);
    }
}
