//! Cursor repository — per account and mailbox high-water marks.
//!
//! The marker is opaque to the store: a UIDNEXT value for IMAP, a message
//! count for POP3. Writes take a plain `&Connection` so the marker commits
//! in the same transaction as the message batch it covers.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{Database, DatabaseError};

/// Returns the stored marker for an account's mailbox, if any.
pub fn get(
    db: &Database,
    account_id: i64,
    mailbox: &str,
) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let marker = conn
            .query_row(
                "SELECT marker FROM cursors WHERE account_id = ?1 AND mailbox = ?2",
                params![account_id, mailbox],
                |r| r.get(0),
            )
            .optional()?;
        Ok(marker)
    })
}

/// Upserts the marker for an account's mailbox.
pub fn set(
    conn: &Connection,
    account_id: i64,
    mailbox: &str,
    marker: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO cursors (account_id, mailbox, marker, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (account_id, mailbox)
         DO UPDATE SET marker = excluded.marker, updated_at = excluded.updated_at",
        params![account_id, mailbox, marker, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::account_repo::{self, NewAccount};
    use crate::protocol::Protocol;

    fn test_db_with_account() -> (Database, i64) {
        let db = Database::open_in_memory().expect("Failed to create test database");
        let account_id = account_repo::insert(
            &db,
            &NewAccount {
                address: "a@example.com".to_string(),
                encrypted_password: "enc".to_string(),
                protocol: Protocol::Imap,
                server: "mail.example.com".to_string(),
                port: 993,
                available_mailboxes: vec!["INBOX".to_string()],
                selected_mailboxes: vec!["INBOX".to_string()],
                poll_interval: 300,
            },
        )
        .unwrap();
        (db, account_id)
    }

    #[test]
    fn test_missing_cursor_is_none() {
        let (db, account_id) = test_db_with_account();
        assert_eq!(get(&db, account_id, "INBOX").unwrap(), None);
    }

    #[test]
    fn test_set_and_get() {
        let (db, account_id) = test_db_with_account();
        db.with_conn(|conn| set(conn, account_id, "INBOX", "42")).unwrap();
        assert_eq!(get(&db, account_id, "INBOX").unwrap(), Some("42".to_string()));
    }

    #[test]
    fn test_upsert_replaces_marker() {
        let (db, account_id) = test_db_with_account();
        db.with_conn(|conn| {
            set(conn, account_id, "INBOX", "42")?;
            set(conn, account_id, "INBOX", "57")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(get(&db, account_id, "INBOX").unwrap(), Some("57".to_string()));
    }

    #[test]
    fn test_cursors_are_per_mailbox() {
        let (db, account_id) = test_db_with_account();
        db.with_conn(|conn| {
            set(conn, account_id, "INBOX", "10")?;
            set(conn, account_id, "Sent", "3")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(get(&db, account_id, "INBOX").unwrap(), Some("10".to_string()));
        assert_eq!(get(&db, account_id, "Sent").unwrap(), Some("3".to_string()));
    }
}
