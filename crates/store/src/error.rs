//! Error types for the key store.

use keymesh_crypto::CertificateError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in key store operations.
///
/// Only [`StoreError::StorageUnavailable`] at open time is fatal to a node;
/// everything else means "this key is not available" to gossip callers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage unavailable at {path}: {reason}")]
    StorageUnavailable { path: PathBuf, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Corrupt record {fingerprint} in bucket {bucket}: {reason}")]
    Decode {
        fingerprint: String,
        bucket: String,
        reason: String,
    },

    #[error("Key {fingerprint} not found in bucket {bucket}")]
    NotFound { fingerprint: String, bucket: String },

    #[error("Certificate {fingerprint} failed verification: {source}")]
    VerificationFailed {
        fingerprint: String,
        #[source]
        source: CertificateError,
    },

    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for key store operations.
pub type StoreResult<T> = Result<T, StoreError>;
