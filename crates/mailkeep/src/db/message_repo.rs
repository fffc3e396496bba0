//! Archived message repository — the `messages` and `attachments` tables.
//!
//! Write operations take a plain `&Connection` so the retrieval pass can
//! run them inside a single transaction together with the cursor update
//! (see [`Database::with_tx`]). Read operations take the shared handle.

use rusqlite::{params, Connection, OptionalExtension};

use super::{Database, DatabaseError};

/// An archived message row.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub account_id: i64,
    pub mailbox: String,
    pub subject: String,
    pub sender: String,
    pub recipients: String,
    pub date: Option<String>,
    pub body: String,
    pub fingerprint: String,
    pub archived_at: String,
}

/// Fields for a new archived message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub mailbox: String,
    pub subject: String,
    pub sender: String,
    pub recipients: String,
    pub date: Option<String>,
    pub body: String,
    pub fingerprint: String,
}

/// An attachment row. `content` is the decoded bytes, stored verbatim.
#[derive(Debug, Clone)]
pub struct AttachmentRow {
    pub id: i64,
    pub message_id: i64,
    pub filename: String,
    pub content: Vec<u8>,
    pub content_id: Option<String>,
}

/// Checks whether a message with this fingerprint is already archived.
pub fn exists_fingerprint(conn: &Connection, fingerprint: &str) -> Result<bool, DatabaseError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE fingerprint = ?1",
        params![fingerprint],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Inserts an archived message and returns its id.
pub fn insert_message(
    conn: &Connection,
    account_id: i64,
    message: &NewMessage,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO messages
         (account_id, mailbox, subject, sender, recipients, date, body, fingerprint)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            account_id,
            message.mailbox,
            message.subject,
            message.sender,
            message.recipients,
            message.date,
            message.body,
            message.fingerprint,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Inserts an attachment belonging to an archived message.
pub fn insert_attachment(
    conn: &Connection,
    message_id: i64,
    filename: &str,
    content: &[u8],
    content_id: Option<&str>,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO attachments (message_id, filename, content, content_id)
         VALUES (?1, ?2, ?3, ?4)",
        params![message_id, filename, content, content_id],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Finds a single archived message by id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<MessageRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT),
                params![id],
                message_from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Lists archived messages for an account, newest first.
pub fn list_for_account(
    db: &Database,
    account_id: i64,
) -> Result<Vec<MessageRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE account_id = ?1 ORDER BY id DESC",
            SELECT
        ))?;
        let rows = stmt
            .query_map(params![account_id], message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts archived messages for an account.
pub fn count_for_account(db: &Database, account_id: i64) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE account_id = ?1",
            params![account_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Lists attachments for a message.
pub fn attachments_for(
    db: &Database,
    message_id: i64,
) -> Result<Vec<AttachmentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, message_id, filename, content, content_id
             FROM attachments WHERE message_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![message_id], attachment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Finds an inline attachment of a message by its Content-ID, for
/// resolving `cid:` references in HTML bodies.
///
/// The column holds the header value verbatim, usually `<...>`, while
/// `cid:` references carry the bare id, so both forms match.
pub fn find_attachment_by_content_id(
    db: &Database,
    message_id: i64,
    content_id: &str,
) -> Result<Option<AttachmentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT id, message_id, filename, content, content_id
                 FROM attachments
                 WHERE message_id = ?1
                   AND (content_id = ?2 OR content_id = '<' || ?2 || '>')",
                params![message_id, content_id],
                attachment_from_row,
            )
            .optional()?;
        Ok(row)
    })
}

const SELECT: &str = "SELECT id, account_id, mailbox, subject, sender, recipients,
     date, body, fingerprint, archived_at FROM messages";

fn message_from_row(row: &rusqlite::Row<'_>) -> Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        account_id: row.get(1)?,
        mailbox: row.get(2)?,
        subject: row.get(3)?,
        sender: row.get(4)?,
        recipients: row.get(5)?,
        date: row.get(6)?,
        body: row.get(7)?,
        fingerprint: row.get(8)?,
        archived_at: row.get(9)?,
    })
}

fn attachment_from_row(row: &rusqlite::Row<'_>) -> Result<AttachmentRow, rusqlite::Error> {
    Ok(AttachmentRow {
        id: row.get(0)?,
        message_id: row.get(1)?,
        filename: row.get(2)?,
        content: row.get(3)?,
        content_id: row.get(4)?,
    })
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

    fn sample_message(fingerprint: &str) -> NewMessage {
        NewMessage {
            mailbox: "INBOX".to_string(),
            subject: "Hello".to_string(),
            sender: "Alice <alice@example.com>".to_string(),
            recipients: "bob@example.com".to_string(),
            date: Some("2024-02-12T10:30:00+00:00".to_string()),
            body: "hello world".to_string(),
            fingerprint: fingerprint.to_string(),
        }
    }

    #[test]
    fn test_insert_and_find() {
        let (db, account_id) = test_db_with_account();
        let id = db
            .with_conn(|conn| insert_message(conn, account_id, &sample_message("fp1")))
            .unwrap();

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(found.subject, "Hello");
        assert_eq!(found.fingerprint, "fp1");
        assert_eq!(found.account_id, account_id);
        assert!(!found.archived_at.is_empty());
    }

    #[test]
    fn test_exists_fingerprint() {
        let (db, account_id) = test_db_with_account();
        db.with_conn(|conn| {
            assert!(!exists_fingerprint(conn, "fp1")?);
            insert_message(conn, account_id, &sample_message("fp1"))?;
            assert!(exists_fingerprint(conn, "fp1")?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_duplicate_fingerprint_rejected() {
        let (db, account_id) = test_db_with_account();
        db.with_conn(|conn| {
            insert_message(conn, account_id, &sample_message("fp1"))?;
            assert!(insert_message(conn, account_id, &sample_message("fp1")).is_err());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_list_for_account_newest_first() {
        let (db, account_id) = test_db_with_account();
        db.with_conn(|conn| {
            insert_message(conn, account_id, &sample_message("fp1"))?;
            insert_message(conn, account_id, &sample_message("fp2"))?;
            Ok(())
        })
        .unwrap();

        let rows = list_for_account(&db, account_id).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].fingerprint, "fp2");
        assert_eq!(rows[1].fingerprint, "fp1");
        assert_eq!(count_for_account(&db, account_id).unwrap(), 2);
    }

    #[test]
    fn test_attachments() {
        let (db, account_id) = test_db_with_account();
        let message_id = db
            .with_conn(|conn| {
                let id = insert_message(conn, account_id, &sample_message("fp1"))?;
                insert_attachment(conn, id, "invoice.pdf", b"%PDF-1.4", None)?;
                insert_attachment(conn, id, "logo.png", b"\x89PNG", Some("<logo001>"))?;
                Ok(id)
            })
            .unwrap();

        let attachments = attachments_for(&db, message_id).unwrap();
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].filename, "invoice.pdf");
        assert_eq!(attachments[0].content, b"%PDF-1.4");
        assert!(attachments[0].content_id.is_none());

        // The stored value is verbatim; a bare cid reference still resolves.
        let inline = find_attachment_by_content_id(&db, message_id, "logo001")
            .unwrap()
            .unwrap();
        assert_eq!(inline.filename, "logo.png");
        assert_eq!(inline.content_id.as_deref(), Some("<logo001>"));

        let exact = find_attachment_by_content_id(&db, message_id, "<logo001>")
            .unwrap()
            .unwrap();
        assert_eq!(exact.id, inline.id);

        assert!(find_attachment_by_content_id(&db, message_id, "missing")
            .unwrap()
            .is_none());
    }
}
