//! Persistent key store for keymesh nodes.
//!
//! One SQLite file per node holds named buckets of records: `private` keeps
//! the node's own [`StoredKeyPair`](keymesh_crypto::StoredKeyPair) and
//! `public` (or any channel bucket) keeps accepted certificates keyed by
//! fingerprint. Reads through the cache are verified once and then served
//! from memory for the lifetime of the process.

pub mod cache;
pub mod error;
pub mod keystore;

pub use cache::CertificateCache;
pub use error::{StoreError, StoreResult};
pub use keystore::{Fingerprints, KeyStore, PRIVATE_BUCKET, PUBLIC_BUCKET};
