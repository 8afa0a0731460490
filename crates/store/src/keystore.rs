//! Key Store - SQLite-backed bucketed storage for node keys
//!
//! Each record lives in a named bucket under a string key:
//! - `private`: the node's own keypair, keyed by its fingerprint
//! - `public` (and any other channel bucket): accepted certificates, keyed
//!   by fingerprint
//!
//! # Guarantees
//!
//! - Certificates read back from disk are re-verified before they are
//!   returned; a corrupt or forged record is never trusted
//! - `try_insert` is the only path for untrusted certificates and verifies
//!   before persisting
//! - Verified reads are cached per bucket for the process lifetime

use crate::cache::CertificateCache;
use crate::error::{StoreError, StoreResult};
use keymesh_crypto::{Certificate, CertificateError, StoredKeyPair};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Bucket holding the node's own keypair.
pub const PRIVATE_BUCKET: &str = "private";
/// Default bucket for accepted certificates.
pub const PUBLIC_BUCKET: &str = "public";

const LIST_PAGE_SIZE: usize = 64;

/// Persistent key store with a per-bucket read cache.
pub struct KeyStore {
    conn: Mutex<Connection>,
    path: PathBuf,
    identity: StoredKeyPair,
    local_cert: Certificate,
    cache: CertificateCache,
}

impl KeyStore {
    /// Open or create the store at `path`.
    ///
    /// On first open a `key_bits` RSA keypair is generated, written to the
    /// `private` bucket, self-signed, and its certificate seeded into the
    /// `public` bucket.
    pub fn open(path: impl AsRef<Path>, key_bits: usize) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        info!(path = %path.display(), "Opening key store");

        let conn = Self::connect(&path).map_err(|e| StoreError::StorageUnavailable {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let identity = Self::load_or_create_identity(&conn, key_bits)?;
        let fingerprint = identity.fingerprint();

        let mut store = Self {
            conn: Mutex::new(conn),
            path,
            local_cert: identity.self_sign()?,
            identity,
            cache: CertificateCache::new(),
        };

        // Keep the already-published certificate when it is still valid.
        // A missing, unreadable or unverifiable record is re-seeded.
        match store.get_certificate(&fingerprint, PUBLIC_BUCKET) {
            Ok(existing) => store.local_cert = existing,
            Err(StoreError::NotFound { .. })
            | Err(StoreError::Decode { .. })
            | Err(StoreError::VerificationFailed { .. }) => {
                info!(fingerprint = %fingerprint, "Seeding public bucket with local certificate");
                let cert = store.local_cert.clone();
                store.put_certificate(&cert, PUBLIC_BUCKET)?;
            }
            Err(e) => return Err(e),
        }
        store.cache.insert(PUBLIC_BUCKET, &store.local_cert);

        info!(
            path = %store.path.display(),
            fingerprint = %fingerprint,
            "Key store ready"
        );

        Ok(store)
    }

    fn connect(path: &Path) -> StoreResult<Connection> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Self::init_schema(&conn)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS buckets (
                name TEXT PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS entries (
                bucket TEXT NOT NULL REFERENCES buckets(name),
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000),
                PRIMARY KEY (bucket, key)
            );
            "#,
        )?;

        Self::ensure_bucket(conn, PRIVATE_BUCKET)?;
        Self::ensure_bucket(conn, PUBLIC_BUCKET)?;
        Ok(())
    }

    fn ensure_bucket(conn: &Connection, bucket: &str) -> StoreResult<()> {
        conn.execute("INSERT OR IGNORE INTO buckets (name) VALUES (?1)", [bucket])?;
        Ok(())
    }

    fn load_or_create_identity(conn: &Connection, key_bits: usize) -> StoreResult<StoredKeyPair> {
        let existing: Option<(String, Vec<u8>)> = conn
            .query_row(
                "SELECT key, value FROM entries WHERE bucket = ?1 ORDER BY key LIMIT 1",
                [PRIVATE_BUCKET],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((key, value)) = existing {
            let identity = StoredKeyPair::decode(&value).map_err(|e| StoreError::Decode {
                fingerprint: key,
                bucket: PRIVATE_BUCKET.to_string(),
                reason: e.to_string(),
            })?;
            debug!(fingerprint = %identity.fingerprint(), "Loaded node keypair");
            return Ok(identity);
        }

        let identity = StoredKeyPair::generate(key_bits)?;
        conn.execute(
            "INSERT INTO entries (bucket, key, value) VALUES (?1, ?2, ?3)",
            params![PRIVATE_BUCKET, identity.fingerprint(), identity.encode()?],
        )?;
        info!(fingerprint = %identity.fingerprint(), "Created node keypair");
        Ok(identity)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The node's own keypair.
    pub fn local_keypair(&self) -> &StoredKeyPair {
        &self.identity
    }

    /// The node's own published certificate.
    pub fn local_certificate(&self) -> &Certificate {
        &self.local_cert
    }

    pub fn local_fingerprint(&self) -> &str {
        self.local_cert.fingerprint()
    }

    /// Sign a fresh certificate with the local private key.
    pub fn sign_local(&self) -> StoreResult<Certificate> {
        Ok(self.identity.self_sign()?)
    }

    /// Lazily enumerate the keys of `bucket` in ascending order.
    pub fn list_fingerprints(&self, bucket: &str) -> Fingerprints<'_> {
        Fingerprints::new(self, bucket)
    }

    fn fingerprint_page(&self, bucket: &str, after: Option<&str>) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let keys = match after {
            Some(after) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT key FROM entries WHERE bucket = ?1 AND key > ?2 ORDER BY key LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![bucket, after, LIST_PAGE_SIZE as i64], |row| {
                    row.get(0)
                })?;
                rows.collect::<Result<Vec<String>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare_cached(
                    "SELECT key FROM entries WHERE bucket = ?1 ORDER BY key LIMIT ?2",
                )?;
                let rows =
                    stmt.query_map(params![bucket, LIST_PAGE_SIZE as i64], |row| row.get(0))?;
                rows.collect::<Result<Vec<String>, _>>()?
            }
        };
        Ok(keys)
    }

    /// Number of records in `bucket`.
    pub fn count(&self, bucket: &str) -> StoreResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE bucket = ?1",
            [bucket],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Read, decode and re-verify a certificate.
    pub fn get_certificate(&self, fingerprint: &str, bucket: &str) -> StoreResult<Certificate> {
        let data: Option<Vec<u8>> = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT value FROM entries WHERE bucket = ?1 AND key = ?2",
                params![bucket, fingerprint],
                |row| row.get(0),
            )
            .optional()?
        };

        let data = data.ok_or_else(|| StoreError::NotFound {
            fingerprint: fingerprint.to_string(),
            bucket: bucket.to_string(),
        })?;

        let cert = Certificate::decode(&data).map_err(|e| StoreError::Decode {
            fingerprint: fingerprint.to_string(),
            bucket: bucket.to_string(),
            reason: e.to_string(),
        })?;

        if cert.fingerprint() != fingerprint {
            return Err(StoreError::VerificationFailed {
                fingerprint: fingerprint.to_string(),
                source: CertificateError::FingerprintMismatch {
                    embedded: cert.fingerprint().to_string(),
                    computed: fingerprint.to_string(),
                },
            });
        }

        cert.check().map_err(|source| StoreError::VerificationFailed {
            fingerprint: fingerprint.to_string(),
            source,
        })?;

        Ok(cert)
    }

    /// Persist `cert` under its fingerprint without verifying it.
    ///
    /// Untrusted certificates must go through [`KeyStore::try_insert`].
    pub fn put_certificate(&self, cert: &Certificate, bucket: &str) -> StoreResult<()> {
        let data = cert.encode()?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        Self::ensure_bucket(&tx, bucket)?;
        tx.execute(
            r#"
            INSERT INTO entries (bucket, key, value) VALUES (?1, ?2, ?3)
            ON CONFLICT (bucket, key) DO UPDATE SET value = excluded.value
            "#,
            params![bucket, cert.fingerprint(), data],
        )?;
        tx.commit()?;

        debug!(fingerprint = %cert.fingerprint(), bucket, "Certificate stored");
        Ok(())
    }

    /// Verify then persist a certificate received from elsewhere.
    pub fn try_insert(&self, cert: &Certificate, bucket: &str) -> StoreResult<()> {
        if let Err(source) = cert.check() {
            warn!(
                fingerprint = %cert.fingerprint(),
                bucket,
                error = %source,
                "Rejected certificate"
            );
            return Err(StoreError::VerificationFailed {
                fingerprint: cert.fingerprint().to_string(),
                source,
            });
        }

        self.put_certificate(cert, bucket)?;
        self.cache.insert(bucket, cert);
        Ok(())
    }

    /// Whether a verified certificate for `fingerprint` is available.
    pub fn have_cached(&self, fingerprint: &str, bucket: &str) -> bool {
        self.get_cached(fingerprint, bucket).is_some()
    }

    /// Cached lookup falling back to a verified store read.
    ///
    /// Storage and verification failures are reported as `None`.
    pub fn get_cached(&self, fingerprint: &str, bucket: &str) -> Option<Certificate> {
        self.cache
            .get_or_load(bucket, fingerprint, || self.get_certificate(fingerprint, bucket))
    }

    /// Flush and release the database handle.
    pub fn close(self) -> StoreResult<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        conn.close().map_err(|(_, e)| StoreError::Storage(e))?;
        info!(path = %self.path.display(), "Key store closed");
        Ok(())
    }

    /// Write raw bytes into a bucket, bypassing encoding and verification.
    ///
    /// **WARNING**: only for tests that need corrupt or forged records.
    #[doc(hidden)]
    pub fn __test_put_raw(&self, bucket: &str, key: &str, value: &[u8]) -> StoreResult<()> {
        let conn = self.conn()?;
        Self::ensure_bucket(&conn, bucket)?;
        conn.execute(
            "INSERT OR REPLACE INTO entries (bucket, key, value) VALUES (?1, ?2, ?3)",
            params![bucket, key, value],
        )?;
        Ok(())
    }
}

/// Lazy, restartable enumeration of the keys in one bucket.
///
/// Keys are fetched a page at a time in ascending order, resuming after the
/// last key seen, so the iterator never holds the database lock between
/// calls. Once an error is yielded the iterator is exhausted.
pub struct Fingerprints<'a> {
    store: &'a KeyStore,
    bucket: String,
    last: Option<String>,
    page: VecDeque<String>,
    done: bool,
}

impl<'a> Fingerprints<'a> {
    fn new(store: &'a KeyStore, bucket: &str) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
            last: None,
            page: VecDeque::new(),
            done: false,
        }
    }

    /// Start again from the first key.
    pub fn restart(&mut self) {
        self.last = None;
        self.page.clear();
        self.done = false;
    }
}

impl Iterator for Fingerprints<'_> {
    type Item = StoreResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.done {
            match self.store.fingerprint_page(&self.bucket, self.last.as_deref()) {
                Ok(keys) => {
                    if keys.len() < LIST_PAGE_SIZE {
                        self.done = true;
                    }
                    self.page.extend(keys);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }

        let key = self.page.pop_front()?;
        self.last = Some(key.clone());
        Some(Ok(key))
    }
}
