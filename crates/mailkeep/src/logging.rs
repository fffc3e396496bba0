//! Tracing setup for embedding applications.
//!
//! The crate logs through both the `log` and `tracing` macros; the
//! `LogTracer` bridge routes the former into whatever subscriber is
//! installed here.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber: env-filtered, human-readable output.
///
/// The filter comes from `RUST_LOG`, defaulting to `mailkeep=info`.
/// Calling this twice is an error (there can be only one global
/// subscriber), so embedders that install their own should skip it.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_log::LogTracer::init()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailkeep=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Like [`init`] but emits JSON lines, for log shippers.
pub fn init_json() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_log::LogTracer::init()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailkeep=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()?;

    Ok(())
}
