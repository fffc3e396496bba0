//! The retrieval pass for a single account.
//!
//! One pass walks the account's selected mailboxes, fetches everything
//! newer than the stored cursor, decodes it, and commits each mailbox's
//! batch together with its advanced cursor in a single transaction. A
//! crash between fetch and commit therefore re-fetches the batch on the
//! next pass instead of losing it; the fingerprint check absorbs the
//! duplicates.

use std::time::Duration;

use tracing::{debug, error, info, info_span, warn};

use crate::config::EngineConfig;
use crate::db::account_repo::AccountRow;
use crate::db::{cursor_repo, message_repo, Database, DatabaseError};
use crate::decode::{self, DecodedMessage};
use crate::error::{MailkeepError, Result};
use crate::protocol::{ConnectionSettings, MailSession, Protocol, ProtocolError};
use crate::vault::Vault;

/// Counters for one retrieval pass over an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Messages picked up this pass (newer than the cursor, within the
    /// batch limit).
    pub found: usize,
    /// Messages archived for the first time.
    pub new: usize,
    /// Messages dropped because their fingerprint was already archived.
    pub skipped_duplicate: usize,
    /// Messages that failed to fetch or decode.
    pub failed: usize,
}

/// Raw messages pulled from one mailbox, with the cursor to store once
/// they are committed.
struct MailboxBatch {
    mailbox: String,
    raw: Vec<(u32, Vec<u8>)>,
    next_cursor: String,
    found: usize,
    fetch_failed: usize,
}

/// Runs one retrieval pass for `account`.
///
/// The network portion runs under the configured session deadline; on
/// timeout the connection is dropped and nothing is committed. Decoding
/// and persistence happen after the connection is torn down.
pub async fn run_pass(
    db: &Database,
    vault: &Vault,
    config: &EngineConfig,
    account: &AccountRow,
) -> Result<SyncOutcome> {
    let _span = info_span!("retrieval_pass", account = %account.address).entered();
    info!("Starting retrieval pass for '{}'", account.address);

    let password = vault.decrypt(&account.encrypted_password).map_err(|e| {
        error!(
            "Cannot decrypt credentials for '{}' (wrong or rotated secret key?): {}",
            account.address, e
        );
        e
    })?;

    let settings = ConnectionSettings {
        protocol: account.protocol,
        server: account.server.clone(),
        port: account.port,
        username: account.address.clone(),
    };

    // Cursors are read up front so the whole network phase can run
    // without touching the database.
    let mut cursors = Vec::with_capacity(account.selected_mailboxes.len());
    for mailbox in &account.selected_mailboxes {
        cursors.push((mailbox.clone(), cursor_repo::get(db, account.id, mailbox)?));
    }

    let deadline = Duration::from_secs(config.session_timeout_secs);
    let batches = match tokio::time::timeout(
        deadline,
        fetch_phase(&settings, &password, &cursors, config.batch_size),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            error!(
                "Session for '{}' exceeded {}s deadline, dropping connection",
                account.address, config.session_timeout_secs
            );
            return Err(MailkeepError::Protocol(ProtocolError::Timeout(
                config.session_timeout_secs,
            )));
        }
    };

    let mut outcome = SyncOutcome::default();
    for batch in batches {
        outcome.found += batch.found;
        outcome.failed += batch.fetch_failed;

        let mut decoded = Vec::with_capacity(batch.raw.len());
        for (id, raw) in &batch.raw {
            match decode::decode(raw) {
                Ok(message) => decoded.push(message),
                Err(e) => {
                    error!(
                        "Failed to decode message {} in '{}': {}",
                        id, batch.mailbox, e
                    );
                    outcome.failed += 1;
                }
            }
        }

        let counts = commit_batch(db, account.id, &batch.mailbox, &decoded, &batch.next_cursor)?;
        outcome.new += counts.new;
        outcome.skipped_duplicate += counts.skipped_duplicate;
    }

    info!(
        "Pass complete for '{}': {} found, {} new, {} duplicate, {} failed",
        account.address, outcome.found, outcome.new, outcome.skipped_duplicate, outcome.failed
    );

    Ok(outcome)
}

/// The network phase: connect, enumerate and fetch every selected
/// mailbox, disconnect. Runs entirely under the caller's deadline.
async fn fetch_phase(
    settings: &ConnectionSettings,
    password: &secrecy::SecretString,
    cursors: &[(String, Option<String>)],
    batch_size: usize,
) -> Result<Vec<MailboxBatch>> {
    let mut session = MailSession::connect(settings, password).await?;

    let mut batches = Vec::new();
    for (mailbox, cursor) in cursors {
        let new = match session.list_new(mailbox, cursor.as_deref()).await {
            Ok(new) => new,
            Err(e) => {
                // One broken mailbox must not sink the rest of the pass.
                error!("Cannot enumerate mailbox '{}': {}", mailbox, e);
                continue;
            }
        };

        let found = new.ids.len();
        let (ids, next_cursor) =
            clamp_batch(settings.protocol, new.ids, new.next_cursor, batch_size);
        if ids.len() < found {
            debug!(
                "Mailbox '{}': clamping batch to {} of {} messages",
                mailbox,
                ids.len(),
                found
            );
        }

        let mut raw = Vec::with_capacity(ids.len());
        let mut fetch_failed = 0;
        for id in &ids {
            match session.fetch_raw(*id).await {
                Ok(bytes) => raw.push((*id, bytes)),
                Err(e) => {
                    error!("Failed to fetch message {} from '{}': {}", id, mailbox, e);
                    fetch_failed += 1;
                }
            }
        }

        batches.push(MailboxBatch {
            mailbox: mailbox.clone(),
            raw,
            next_cursor,
            found: ids.len(),
            fetch_failed,
        });
    }

    if let Err(e) = session.close().await {
        warn!("Error during disconnect from {}: {}", settings.server, e);
    }

    Ok(batches)
}

/// Counters for one committed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounts {
    pub new: usize,
    pub skipped_duplicate: usize,
}

/// Persists a decoded batch and its cursor as one atomic unit.
///
/// Runs the fingerprint check inside the same transaction as the
/// inserts, so a batch that contains the same message twice still
/// archives it exactly once.
pub fn commit_batch(
    db: &Database,
    account_id: i64,
    mailbox: &str,
    messages: &[DecodedMessage],
    next_cursor: &str,
) -> std::result::Result<BatchCounts, DatabaseError> {
    db.with_tx(|conn| {
        let mut counts = BatchCounts::default();

        for message in messages {
            let fingerprint = message.fingerprint();
            if message_repo::exists_fingerprint(conn, &fingerprint)? {
                debug!("Skipping duplicate message '{}'", message.subject);
                counts.skipped_duplicate += 1;
                continue;
            }

            let message_id = message_repo::insert_message(
                conn,
                account_id,
                &message_repo::NewMessage {
                    mailbox: mailbox.to_string(),
                    subject: message.subject.clone(),
                    sender: message.sender.clone(),
                    recipients: message.recipients.clone(),
                    date: message.date.clone(),
                    body: message.body.clone(),
                    fingerprint,
                },
            )?;

            for attachment in &message.attachments {
                message_repo::insert_attachment(
                    conn,
                    message_id,
                    &attachment.filename,
                    &attachment.content,
                    attachment.content_id.as_deref(),
                )?;
            }

            counts.new += 1;
        }

        cursor_repo::set(conn, account_id, mailbox, next_cursor)?;
        Ok(counts)
    })
}

/// Limits a batch to `batch_size` ids and rewinds the cursor so the
/// remainder is picked up on the next pass.
///
/// The rewound marker depends on the protocol's cursor semantics: IMAP
/// markers name the next expected UID, POP3 markers name the last seen
/// position.
fn clamp_batch(
    protocol: Protocol,
    mut ids: Vec<u32>,
    next_cursor: String,
    batch_size: usize,
) -> (Vec<u32>, String) {
    if ids.len() <= batch_size {
        return (ids, next_cursor);
    }
    ids.truncate(batch_size);
    // Non-empty because batch_size is validated to be > 0.
    let last = ids[ids.len() - 1];
    let marker = match protocol {
        Protocol::Imap => last + 1,
        Protocol::Pop3 => last,
    };
    (ids, marker.to_string())
}
