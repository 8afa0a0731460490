//! Keymesh Mesh - gossip replication of self-signed node keys
//!
//! Every node publishes its own self-signed certificate and gossips the
//! certificates it has accepted. Receivers verify each entry before it is
//! stored, so the set of trusted keys grows monotonically and converges
//! across the mesh without central coordination.
//!
//! # Core Components
//!
//! - **KeySet**: grow-only replicated set of certificates
//! - **Wire format**: versioned envelope carrying certificates byte-for-byte
//! - **Peer**: single-consumer actor bridging a transport, the set and the
//!   key store
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use keymesh_core::GossipConfig;
//! use keymesh_mesh::{Gossiper, Peer};
//! use keymesh_store::{KeyStore, PUBLIC_BUCKET};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(KeyStore::open("keys/keystore.db", 2048)?);
//! let peer = Peer::new(store, PUBLIC_BUCKET, &GossipConfig::default())?;
//!
//! // Hand the periodic payload to the transport.
//! let outgoing = peer.gossip()?;
//! println!("{} bytes of gossip", outgoing.len());
//!
//! peer.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod gossip;
pub mod peer;
pub mod state;

// Re-export main types
pub use error::{MeshError, MeshResult};
pub use gossip::{
    decode_payload, encode_payload, GossipSender, Gossiper, WireEntry, WirePayload, WIRE_VERSION,
};
pub use peer::Peer;
pub use state::KeySet;
