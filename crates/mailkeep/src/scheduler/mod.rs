//! Background scheduler driving account creation and periodic retrieval.
//!
//! Tasks live on an unbounded channel worked by a single background
//! thread with a current-thread tokio runtime, so at most one network
//! session is open at a time. A task that is not yet due goes to the
//! back of the queue; a finished retrieval task re-arms itself at the
//! account's poll interval.

pub mod task;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use thiserror::Error;

pub use task::{CreateAccountRequest, Task, TaskKind};

use crate::config::EngineConfig;
use crate::db::account_repo::{self, NewAccount};
use crate::db::Database;
use crate::protocol::{ConnectionSettings, MailSession, ProtocolError};
use crate::sync;
use crate::vault::Vault;

/// How long the scheduler sleeps when the queue has nothing due.
const IDLE_TICK: Duration = Duration::from_millis(250);

/// Errors from scheduler operations.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler queue is closed")]
    ChannelClosed,

    #[error("Failed to build scheduler runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

/// Handle to the background scheduler thread.
pub struct Scheduler {
    sender: Sender<Task>,
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    /// Starts the scheduler thread and queues an immediate retrieval
    /// task for every account already on file.
    pub fn start(db: Database, vault: Vault, config: EngineConfig) -> Result<Self, SchedulerError> {
        let (sender, receiver) = unbounded::<Task>();
        let shutdown = Arc::new(AtomicBool::new(false));

        for account in account_repo::list_all(&db)? {
            sender
                .send(Task::retrieval(account.id, account.poll_interval, true))
                .map_err(|_| SchedulerError::ChannelClosed)?;
        }

        let loop_sender = sender.clone();
        let shutdown_flag = Arc::clone(&shutdown);
        let handle = thread::spawn(move || {
            run_scheduler(db, vault, config, receiver, loop_sender, shutdown_flag);
        });

        Ok(Self {
            sender,
            handle: Some(handle),
            shutdown,
        })
    }

    /// Queues an account creation task.
    pub fn create_account(&self, request: CreateAccountRequest) -> Result<(), SchedulerError> {
        self.submit(Task::account_creation(request))
    }

    /// Queues an immediate retrieval pass for a stored account.
    pub fn queue_retrieval(&self, account_id: i64, interval: u64) -> Result<(), SchedulerError> {
        self.submit(Task::retrieval(account_id, interval, true))
    }

    /// Puts a task on the queue.
    pub fn submit(&self, task: Task) -> Result<(), SchedulerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(SchedulerError::ChannelClosed);
        }
        self.sender
            .send(task)
            .map_err(|_| SchedulerError::ChannelClosed)
    }

    /// Signals the scheduler to stop after the current task.
    pub fn shutdown(&self) {
        info!("Shutting down scheduler...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Signals shutdown (the loop keeps its own sender clone, so dropping
    /// ours alone would never end it) and waits for the thread to finish.
    pub fn wait(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        drop(self.sender);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                error!("Scheduler thread panicked: {:?}", e);
            }
        }
        info!("Scheduler stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_scheduler(
    db: Database,
    vault: Vault,
    config: EngineConfig,
    receiver: Receiver<Task>,
    sender: Sender<Task>,
    shutdown: Arc<AtomicBool>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build scheduler runtime: {}", e);
            return;
        }
    };

    info!("Scheduler started");

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Scheduler received shutdown signal");
            break;
        }

        match receiver.recv_timeout(IDLE_TICK) {
            Ok(task) => {
                if !task.is_eligible(Utc::now()) {
                    // Not due yet, back of the queue.
                    if sender.send(task).is_err() {
                        break;
                    }
                    thread::sleep(IDLE_TICK);
                    continue;
                }
                handle_task(&runtime, &db, &vault, &config, &sender, task);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Scheduler queue disconnected");
                break;
            }
        }
    }
}

fn handle_task(
    runtime: &tokio::runtime::Runtime,
    db: &Database,
    vault: &Vault,
    config: &EngineConfig,
    sender: &Sender<Task>,
    mut task: Task,
) {
    match &task.kind {
        TaskKind::AccountCreation(request) => {
            let address = request.address.clone();
            match runtime.block_on(create_account(db, vault, config, request)) {
                Ok((account_id, interval)) => {
                    info!("Account '{}' created (id {})", address, account_id);
                    // First pass runs right away.
                    if sender.send(Task::retrieval(account_id, interval, true)).is_err() {
                        warn!("Queue closed before first retrieval for '{}'", address);
                    }
                }
                Err(e) => {
                    // One-shot: the caller corrects the request and re-submits.
                    error!("Account creation for '{}' failed: {}", address, e);
                }
            }
        }
        TaskKind::EmailRetrieval { account_id } => {
            let account = match account_repo::find_by_id(db, *account_id) {
                Ok(Some(account)) => account,
                Ok(None) => {
                    warn!("Account {} no longer exists, dropping its task", account_id);
                    return;
                }
                Err(e) => {
                    error!("Failed to load account {}: {}", account_id, e);
                    return;
                }
            };

            match runtime.block_on(sync::run_pass(db, vault, config, &account)) {
                Ok(outcome) => debug!("Retrieval for '{}' done: {:?}", account.address, outcome),
                Err(e) => error!("Retrieval for '{}' failed: {}", account.address, e),
            }

            // Failures re-arm too; transient server trouble should not
            // stop the polling loop. One-shot tasks are done here.
            if task.rearm(Utc::now()) {
                if sender.send(task).is_err() {
                    debug!("Queue closed, not re-arming task for '{}'", account.address);
                }
            } else {
                debug!("One-shot retrieval for '{}' finished", account.address);
            }
        }
    }
}

/// Validates connectivity, encrypts the password and stores the account.
/// Returns the new account id and its poll interval.
async fn create_account(
    db: &Database,
    vault: &Vault,
    config: &EngineConfig,
    request: &CreateAccountRequest,
) -> crate::error::Result<(i64, u64)> {
    let settings = ConnectionSettings {
        protocol: request.protocol,
        server: request.server.clone(),
        port: request.port,
        username: request.address.clone(),
    };

    let deadline = Duration::from_secs(config.session_timeout_secs);
    let available = match tokio::time::timeout(deadline, async {
        let mut session = MailSession::connect(&settings, &request.password).await?;
        let available = session.list_mailboxes().await?;
        if let Err(e) = session.close().await {
            warn!("Error during disconnect from {}: {}", settings.server, e);
        }
        Ok::<_, ProtocolError>(available)
    })
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            return Err(crate::error::MailkeepError::Protocol(ProtocolError::Timeout(
                config.session_timeout_secs,
            )))
        }
    };

    for mailbox in &request.selected_mailboxes {
        if !available.contains(mailbox) {
            warn!(
                "Requested mailbox '{}' not reported by {}, skipping it",
                mailbox, request.server
            );
        }
    }
    let selected = select_mailboxes(&request.selected_mailboxes, &available);

    let encrypted_password = vault.encrypt(&request.password)?;
    let poll_interval = request.poll_interval.unwrap_or(config.poll_interval_secs);

    let account_id = account_repo::insert(
        db,
        &NewAccount {
            address: request.address.clone(),
            encrypted_password,
            protocol: request.protocol,
            server: request.server.clone(),
            port: request.port,
            available_mailboxes: available,
            selected_mailboxes: selected,
            poll_interval,
        },
    )?;

    Ok((account_id, poll_interval))
}

/// Keeps the requested mailboxes the server actually reports, in
/// request order, falling back to INBOX when nothing survives.
fn select_mailboxes(requested: &[String], available: &[String]) -> Vec<String> {
    let mut selected: Vec<String> = requested
        .iter()
        .filter(|m| available.contains(m))
        .cloned()
        .collect();
    if selected.is_empty() {
        selected.push(crate::protocol::pop3::IMPLICIT_MAILBOX.to_string());
    }
    selected
}
