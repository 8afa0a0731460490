//! Structured logging bootstrap for keymesh processes.
//!
//! Library crates only emit `tracing` events; installing a subscriber is the
//! host process's job. `RUST_LOG` always wins over the configured directive.

use crate::error::{CoreError, CoreResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter from `RUST_LOG`, falling back to `default_directive`.
fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install a human readable subscriber.
///
/// # Example
/// ```no_run
/// use keymesh_core::logging;
///
/// logging::try_init("info").ok();
/// tracing::info!("Node started");
/// ```
pub fn try_init(default_directive: &str) -> CoreResult<()> {
    tracing_subscriber::registry()
        .with(env_filter(default_directive))
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init()
        .map_err(|e| CoreError::Logging(e.to_string()))
}

/// Install a JSON-lines subscriber for log aggregation.
pub fn try_init_json(default_directive: &str) -> CoreResult<()> {
    tracing_subscriber::registry()
        .with(env_filter(default_directive))
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .try_init()
        .map_err(|e| CoreError::Logging(e.to_string()))
}

/// Install the subscriber selected by the node configuration.
pub fn init_from_config(node: &crate::config::NodeConfig) -> CoreResult<()> {
    if node.log_json {
        try_init_json(&node.log_level)
    } else {
        try_init(&node.log_level)
    }
}
