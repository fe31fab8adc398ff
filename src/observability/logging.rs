//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global subscriber
//! - Honor `RUST_LOG` first, then the configured level
//!
//! # Design Decisions
//! - Uses the tracing crate for structured logging
//! - Installing twice is reported, not fatal (tests share one process)

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when neither `RUST_LOG` nor a level is given.
pub const DEFAULT_FILTER: &str = "embedded_container=info,tower_http=info";

/// Build the filter directive for a plain level such as `debug`.
pub fn filter_for(level: Option<&str>) -> String {
    match level {
        Some(level) if !level.trim().is_empty() => {
            format!("embedded_container={0},tower_http={0}", level.trim())
        }
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// Install the fmt subscriber.
pub fn init(level: Option<&str>) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(level).into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}
