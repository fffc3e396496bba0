//! Retrieval pass: poll one account, archive what is new.

pub mod engine;

pub use engine::{run_pass, SyncOutcome};
