//! Core functionality shared by every keymesh crate.
//!
//! This crate owns the ambient pieces of a node: the TOML configuration
//! model, the `tracing` subscriber bootstrap, and the core error type.
//! Nothing here knows about certificates or gossip.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, GossipConfig, NodeConfig, StoreConfig};
pub use error::{CoreError, CoreResult};
