//! Per-bucket certificate read cache.
//!
//! Entries are content-addressed and immutable, so nothing is ever evicted
//! or invalidated. Each bucket has its own lock: a slow miss in one bucket
//! never blocks lookups in another, while lookups within one bucket are
//! serialized.

use crate::error::StoreResult;
use keymesh_crypto::Certificate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

type BucketCache = Arc<Mutex<HashMap<String, Certificate>>>;

#[derive(Debug, Default)]
pub struct CertificateCache {
    buckets: RwLock<HashMap<String, BucketCache>>,
}

impl CertificateCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, bucket: &str) -> BucketCache {
        {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cache) = buckets.get(bucket) {
                return Arc::clone(cache);
            }
        }

        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(buckets.entry(bucket.to_string()).or_default())
    }

    /// Return the cached certificate, or run `load` on a miss and cache its
    /// result. A failed load is reported as absent and nothing is cached.
    pub fn get_or_load<F>(&self, bucket: &str, fingerprint: &str, load: F) -> Option<Certificate>
    where
        F: FnOnce() -> StoreResult<Certificate>,
    {
        let cache = self.bucket(bucket);
        let mut entries = cache.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(cert) = entries.get(fingerprint) {
            return Some(cert.clone());
        }

        match load() {
            Ok(cert) => {
                entries.insert(fingerprint.to_string(), cert.clone());
                Some(cert)
            }
            Err(e) => {
                debug!(bucket, fingerprint, error = %e, "Cache fill failed");
                None
            }
        }
    }

    /// Record a certificate that has already been verified and persisted.
    pub fn insert(&self, bucket: &str, cert: &Certificate) {
        let cache = self.bucket(bucket);
        let mut entries = cache.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(cert.fingerprint().to_string())
            .or_insert_with(|| cert.clone());
    }

    pub fn len(&self, bucket: &str) -> usize {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        buckets
            .get(bucket)
            .map(|cache| cache.lock().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, bucket: &str) -> bool {
        self.len(bucket) == 0
    }
}
