//! Error types for keymesh gossip operations.

use keymesh_crypto::CertificateError;
use keymesh_store::StoreError;
use thiserror::Error;

/// Errors that can occur while producing or consuming gossip.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Inbound payload could not be decoded at all
    #[error("Gossip payload decode failed: {0}")]
    Decode(String),

    /// Inbound payload uses a wire version this node does not speak
    #[error("Unsupported gossip payload version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// Key store errors
    #[error("Key store error: {0}")]
    Store(#[from] StoreError),

    /// Certificate errors
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Outbound transport rejected a payload
    #[error("Send failed: {0}")]
    Send(String),

    /// The peer's action loop has exited
    #[error("Peer stopped")]
    Stopped,
}

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;
