pub mod config;
pub mod db;
pub mod decode;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod protocol;
pub mod scheduler;
pub mod sync;
pub mod vault;

pub use config::{load_config, ConfigError, EngineConfig};
pub use db::Database;
pub use decode::{DecodedAttachment, DecodedMessage};
pub use error::{MailkeepError, Result};
pub use protocol::{MailSession, Protocol, ProtocolError};
pub use scheduler::{CreateAccountRequest, Scheduler, SchedulerError, Task, TaskKind};
pub use sync::{run_pass, SyncOutcome};
pub use vault::{Vault, VaultError};
