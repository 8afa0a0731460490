//! Grow-only replicated key set.
//!
//! `KeySet` maps fingerprints to certificates. The only mutation is
//! insertion, so merges commute and are idempotent: any peers that see the
//! same certificates converge on the same set regardless of delivery order.
//!
//! The set never verifies what it holds. Callers verify untrusted
//! certificates before merging them.

use keymesh_crypto::Certificate;
use rand::seq::IteratorRandom;
use rand::thread_rng;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Grow-only set of certificates keyed by fingerprint.
#[derive(Debug, Default)]
pub struct KeySet {
    entries: RwLock<HashMap<String, Certificate>>,
}

impl KeySet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Certificate>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Certificate>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `cert` under its fingerprint. Returns `false` if it was already
    /// present, in which case the set is unchanged.
    pub fn insert(&self, cert: Certificate) -> bool {
        let mut entries = self.write();
        if entries.contains_key(cert.fingerprint()) {
            return false;
        }
        entries.insert(cert.fingerprint().to_string(), cert);
        true
    }

    /// Look up a certificate by fingerprint
    pub fn get(&self, fingerprint: &str) -> Option<Certificate> {
        self.read().get(fingerprint).cloned()
    }

    /// Whether a fingerprint is present
    pub fn contains(&self, fingerprint: &str) -> bool {
        self.read().contains_key(fingerprint)
    }

    /// Number of certificates held
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All fingerprints, sorted
    pub fn fingerprints(&self) -> Vec<String> {
        let mut fps: Vec<String> = self.read().keys().cloned().collect();
        fps.sort();
        fps
    }

    /// All certificates, in no particular order
    pub fn certificates(&self) -> Vec<Certificate> {
        self.read().values().cloned().collect()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> KeySet {
        KeySet::from_map(self.read().clone())
    }

    /// Uniformly random subset of at most `k` entries.
    pub fn sample(&self, k: usize) -> KeySet {
        let entries = self.read();
        let chosen = entries
            .iter()
            .choose_multiple(&mut thread_rng(), k)
            .into_iter()
            .map(|(fp, cert)| (fp.clone(), cert.clone()))
            .collect();
        KeySet::from_map(chosen)
    }

    /// Insert every entry of `incoming` not already present.
    ///
    /// Returns the entries that were new, or `None` when `incoming`
    /// contributed nothing. `incoming` is left untouched.
    pub fn merge_novel(&self, incoming: &KeySet) -> Option<KeySet> {
        // Copy first so merging a set into itself cannot deadlock.
        let candidates = incoming.certificates();

        let mut entries = self.write();
        let mut novel = HashMap::new();
        for cert in candidates {
            if entries.contains_key(cert.fingerprint()) {
                continue;
            }
            entries.insert(cert.fingerprint().to_string(), cert.clone());
            novel.insert(cert.fingerprint().to_string(), cert);
        }

        if novel.is_empty() {
            None
        } else {
            Some(KeySet::from_map(novel))
        }
    }

    /// Union `incoming` into this set and return the complete result.
    pub fn merge_all(&self, incoming: &KeySet) -> KeySet {
        let candidates = incoming.certificates();

        let mut entries = self.write();
        for cert in candidates {
            entries
                .entry(cert.fingerprint().to_string())
                .or_insert(cert);
        }
        KeySet::from_map(entries.clone())
    }

    fn from_map(entries: HashMap<String, Certificate>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }
}

impl Clone for KeySet {
    fn clone(&self) -> Self {
        self.snapshot()
    }
}

impl PartialEq for KeySet {
    fn eq(&self, other: &Self) -> bool {
        // Never hold two read guards on the same lock.
        if std::ptr::eq(self, other) {
            return true;
        }
        *self.read() == *other.read()
    }
}

impl From<Vec<Certificate>> for KeySet {
    fn from(certs: Vec<Certificate>) -> Self {
        certs.into_iter().collect()
    }
}

impl FromIterator<Certificate> for KeySet {
    fn from_iter<I: IntoIterator<Item = Certificate>>(iter: I) -> Self {
        let mut entries = HashMap::new();
        for cert in iter {
            entries.entry(cert.fingerprint().to_string()).or_insert(cert);
        }
        KeySet::from_map(entries)
    }
}
