//! Task definitions for the scheduler queue.

use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;

use crate::protocol::Protocol;

/// Everything needed to register a new account.
///
/// The password arrives in plaintext exactly once, wrapped in a
/// [`SecretString`] so it never shows up in debug output, and is
/// encrypted before it reaches the database.
#[derive(Debug, Clone)]
pub struct CreateAccountRequest {
    pub address: String,
    pub password: SecretString,
    pub protocol: Protocol,
    pub server: String,
    pub port: u16,
    /// Mailboxes to poll. Names the server does not report are dropped;
    /// an empty result falls back to INBOX.
    pub selected_mailboxes: Vec<String>,
    /// Seconds between retrieval passes; `None` means the configured
    /// default.
    pub poll_interval: Option<u64>,
}

/// What a queued task does when it runs.
#[derive(Debug, Clone)]
pub enum TaskKind {
    /// Validate connectivity, encrypt the password, store the account,
    /// then queue an immediate first retrieval. One-shot: a failed
    /// creation is reported, not retried.
    AccountCreation(CreateAccountRequest),
    /// Run one retrieval pass for a stored account. With an interval the
    /// task is re-armed after every run, successful or not; without one
    /// it runs exactly once.
    EmailRetrieval { account_id: i64 },
}

/// A queued unit of work with its timing state.
#[derive(Debug, Clone)]
pub struct Task {
    pub kind: TaskKind,
    /// Re-arm interval in seconds; `None` makes the task one-shot.
    pub interval: Option<u64>,
    pub next_execution: DateTime<Utc>,
    /// Bypasses `next_execution` for the first run.
    pub execute_immediately: bool,
}

impl Task {
    /// A one-shot account creation task, eligible right away.
    pub fn account_creation(request: CreateAccountRequest) -> Self {
        Self {
            kind: TaskKind::AccountCreation(request),
            interval: None,
            next_execution: Utc::now(),
            execute_immediately: true,
        }
    }

    /// A periodic retrieval task for a stored account.
    pub fn retrieval(account_id: i64, interval: u64, immediate: bool) -> Self {
        let now = Utc::now();
        Self {
            kind: TaskKind::EmailRetrieval { account_id },
            interval: Some(interval),
            next_execution: now + Duration::seconds(interval as i64),
            execute_immediately: immediate,
        }
    }

    /// Whether the task may run at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.execute_immediately || now >= self.next_execution
    }

    /// Schedules the next run after a completed one. Returns `false` for
    /// one-shot tasks, which must not go back on the queue.
    pub fn rearm(&mut self, now: DateTime<Utc>) -> bool {
        self.execute_immediately = false;
        match self.interval {
            Some(interval) => {
                self.next_execution = now + Duration::seconds(interval as i64);
                true
            }
            None => false,
        }
    }
}
