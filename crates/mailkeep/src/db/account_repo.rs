//! Account repository — CRUD operations for the `accounts` table.
//!
//! Passwords are stored only in encrypted form; this module never sees
//! plaintext credentials.

use rusqlite::params;

use crate::protocol::Protocol;

use super::{Database, DatabaseError};

/// A stored mail account.
#[derive(Debug, Clone)]
pub struct AccountRow {
    pub id: i64,
    pub address: String,
    pub encrypted_password: String,
    pub protocol: Protocol,
    pub server: String,
    pub port: u16,
    /// Mailboxes the server reported at creation time.
    pub available_mailboxes: Vec<String>,
    /// Mailboxes this account actually polls.
    pub selected_mailboxes: Vec<String>,
    /// Seconds between retrieval passes.
    pub poll_interval: u64,
    pub created_at: String,
}

/// Fields for a new account record.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub address: String,
    pub encrypted_password: String,
    pub protocol: Protocol,
    pub server: String,
    pub port: u16,
    pub available_mailboxes: Vec<String>,
    pub selected_mailboxes: Vec<String>,
    pub poll_interval: u64,
}

/// Inserts a new account and returns its id.
///
/// Fails on a duplicate address (UNIQUE constraint).
pub fn insert(db: &Database, account: &NewAccount) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO accounts
             (address, encrypted_password, protocol, server, port,
              available_mailboxes, selected_mailboxes, poll_interval)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                account.address,
                account.encrypted_password,
                account.protocol.as_str(),
                account.server,
                account.port,
                serde_json::to_string(&account.available_mailboxes)?,
                serde_json::to_string(&account.selected_mailboxes)?,
                account.poll_interval,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds an account by id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<AccountRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT))?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    })
}

/// Finds an account by email address.
pub fn find_by_address(
    db: &Database,
    address: &str,
) -> Result<Option<AccountRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!("{} WHERE address = ?1", SELECT))?;
        let mut rows = stmt.query(params![address])?;
        match rows.next()? {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    })
}

/// Lists all accounts, oldest first.
pub fn list_all(db: &Database) -> Result<Vec<AccountRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!("{} ORDER BY id", SELECT))?;
        let mut rows = stmt.query([])?;
        let mut accounts = Vec::new();
        while let Some(row) = rows.next()? {
            accounts.push(from_row(row)?);
        }
        Ok(accounts)
    })
}

/// Updates the mutable settings of an account. The encrypted password is
/// replaced only when `encrypted_password` is `Some` (i.e. the caller
/// re-encrypted a new plaintext).
pub fn update(
    db: &Database,
    id: i64,
    encrypted_password: Option<&str>,
    selected_mailboxes: &[String],
    poll_interval: u64,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let selected = serde_json::to_string(selected_mailboxes)?;
        let changed = match encrypted_password {
            Some(enc) => conn.execute(
                "UPDATE accounts SET encrypted_password = ?2, selected_mailboxes = ?3,
                 poll_interval = ?4 WHERE id = ?1",
                params![id, enc, selected, poll_interval],
            )?,
            None => conn.execute(
                "UPDATE accounts SET selected_mailboxes = ?2, poll_interval = ?3
                 WHERE id = ?1",
                params![id, selected, poll_interval],
            )?,
        };
        Ok(changed > 0)
    })
}

/// Refreshes the server-reported mailbox list for an account.
pub fn update_available_mailboxes(
    db: &Database,
    id: i64,
    mailboxes: &[String],
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE accounts SET available_mailboxes = ?2 WHERE id = ?1",
            params![id, serde_json::to_string(mailboxes)?],
        )?;
        Ok(changed > 0)
    })
}

/// Deletes an account. Archived messages, attachments and cursors go
/// with it (ON DELETE CASCADE).
pub fn delete(db: &Database, id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM accounts WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}

const SELECT: &str = "SELECT id, address, encrypted_password, protocol, server, port,
     available_mailboxes, selected_mailboxes, poll_interval, created_at FROM accounts";

fn from_row(row: &rusqlite::Row<'_>) -> Result<AccountRow, DatabaseError> {
    let protocol: String = row.get(3)?;
    let protocol = Protocol::parse(&protocol)
        .ok_or_else(|| DatabaseError::CorruptRow(format!("unknown protocol '{}'", protocol)))?;
    let available: String = row.get(6)?;
    let selected: String = row.get(7)?;

    Ok(AccountRow {
        id: row.get(0)?,
        address: row.get(1)?,
        encrypted_password: row.get(2)?,
        protocol,
        server: row.get(4)?,
        port: row.get(5)?,
        available_mailboxes: serde_json::from_str(&available)?,
        selected_mailboxes: serde_json::from_str(&selected)?,
        poll_interval: row.get(8)?,
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_account(address: &str) -> NewAccount {
        NewAccount {
            address: address.to_string(),
            encrypted_password: "abcd1234".to_string(),
            protocol: Protocol::Imap,
            server: "mail.example.com".to_string(),
            port: 993,
            available_mailboxes: vec!["INBOX".to_string(), "Sent".to_string()],
            selected_mailboxes: vec!["INBOX".to_string()],
            poll_interval: 300,
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let id = insert(&db, &sample_account("a@example.com")).unwrap();

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(found.address, "a@example.com");
        assert_eq!(found.protocol, Protocol::Imap);
        assert_eq!(found.port, 993);
        assert_eq!(found.available_mailboxes, vec!["INBOX", "Sent"]);
        assert_eq!(found.selected_mailboxes, vec!["INBOX"]);
        assert_eq!(found.poll_interval, 300);
        assert!(!found.created_at.is_empty());
    }

    #[test]
    fn test_find_by_address() {
        let db = test_db();
        insert(&db, &sample_account("a@example.com")).unwrap();

        assert!(find_by_address(&db, "a@example.com").unwrap().is_some());
        assert!(find_by_address(&db, "missing@example.com").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let db = test_db();
        insert(&db, &sample_account("a@example.com")).unwrap();
        assert!(insert(&db, &sample_account("a@example.com")).is_err());
    }

    #[test]
    fn test_list_all() {
        let db = test_db();
        insert(&db, &sample_account("a@example.com")).unwrap();
        insert(&db, &sample_account("b@example.com")).unwrap();

        let all = list_all(&db).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].address, "a@example.com");
        assert_eq!(all[1].address, "b@example.com");
    }

    #[test]
    fn test_update_keeps_password_when_none() {
        let db = test_db();
        let id = insert(&db, &sample_account("a@example.com")).unwrap();

        let changed = update(&db, id, None, &["Sent".to_string()], 600).unwrap();
        assert!(changed);

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(found.encrypted_password, "abcd1234");
        assert_eq!(found.selected_mailboxes, vec!["Sent"]);
        assert_eq!(found.poll_interval, 600);
    }

    #[test]
    fn test_update_replaces_password_when_some() {
        let db = test_db();
        let id = insert(&db, &sample_account("a@example.com")).unwrap();

        update(&db, id, Some("newenc"), &["INBOX".to_string()], 300).unwrap();

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(found.encrypted_password, "newenc");
    }

    #[test]
    fn test_update_missing_account() {
        let db = test_db();
        assert!(!update(&db, 999, None, &[], 300).unwrap());
    }

    #[test]
    fn test_delete() {
        let db = test_db();
        let id = insert(&db, &sample_account("a@example.com")).unwrap();

        assert!(delete(&db, id).unwrap());
        assert!(!delete(&db, id).unwrap());
        assert!(find_by_id(&db, id).unwrap().is_none());
    }

    #[test]
    fn test_pop3_protocol_roundtrips() {
        let db = test_db();
        let mut account = sample_account("p@example.com");
        account.protocol = Protocol::Pop3;
        account.port = 995;
        let id = insert(&db, &account).unwrap();

        let found = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(found.protocol, Protocol::Pop3);
    }
}
