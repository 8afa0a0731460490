//! Node identity keypairs.
//!
//! The local node owns exactly one RSA keypair. It is stored as PEM text
//! (PKCS#1 private key, SPKI public key), never gossiped, and zeroized when
//! dropped.

use crate::certificate::{fingerprint, self_sign, Certificate};
use crate::error::{CertificateError, CertificateResult};
use rand::thread_rng;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Parse a PKCS#1 `RSA PRIVATE KEY` PEM block and validate the key.
pub fn parse_private_pem(pem: &str) -> CertificateResult<RsaPrivateKey> {
    let key = RsaPrivateKey::from_pkcs1_pem(pem)
        .map_err(|e| CertificateError::BadKeyEncoding(e.to_string()))?;
    key.validate()
        .map_err(|e| CertificateError::BadKeyEncoding(e.to_string()))?;
    Ok(key)
}

/// Parse an SPKI `PUBLIC KEY` PEM block holding an RSA key.
pub fn parse_public_pem(pem: &str) -> CertificateResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|e| CertificateError::BadKeyEncoding(e.to_string()))
}

/// The local node's keypair as persisted in the `private` bucket.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct StoredKeyPair {
    has_private: bool,
    private_key_pem: String,
    public_key_pem: String,
}

impl StoredKeyPair {
    /// Generate a fresh keypair with a `bits`-bit modulus.
    pub fn generate(bits: usize) -> CertificateResult<Self> {
        info!(bits, "Generating node keypair");

        let private_key = RsaPrivateKey::new(&mut thread_rng(), bits)
            .map_err(|e| CertificateError::KeyGeneration(e.to_string()))?;
        let public_key = private_key.to_public_key();

        let private_key_pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CertificateError::KeyGeneration(e.to_string()))?
            .to_string();
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CertificateError::KeyGeneration(e.to_string()))?;

        Ok(Self {
            has_private: true,
            private_key_pem,
            public_key_pem,
        })
    }

    /// A keypair record that only knows its public half.
    pub fn public_only(public_key_pem: impl Into<String>) -> Self {
        Self {
            has_private: false,
            private_key_pem: String::new(),
            public_key_pem: public_key_pem.into(),
        }
    }

    pub fn has_private(&self) -> bool {
        self.has_private
    }

    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_key_pem)
    }

    pub fn private_key(&self) -> CertificateResult<RsaPrivateKey> {
        if !self.has_private {
            return Err(CertificateError::NoPrivateKey);
        }
        parse_private_pem(&self.private_key_pem)
    }

    /// Produce this node's self-signed certificate.
    pub fn self_sign(&self) -> CertificateResult<Certificate> {
        let private_key = self.private_key()?;
        let cert = self_sign(&private_key, &self.public_key_pem)?;
        debug!(fingerprint = %cert.fingerprint(), "Self-signed certificate");
        Ok(cert)
    }

    pub fn encode(&self) -> CertificateResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> CertificateResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| CertificateError::Decode(e.to_string()))
    }

    /// Export the keypair to `<dir>/<fingerprint>.key`.
    ///
    /// On Unix a missing directory is created `0700` and the file is
    /// written `0600`. An existing directory keeps its mode.
    pub fn save(&self, dir: impl AsRef<Path>) -> CertificateResult<PathBuf> {
        let dir = dir.as_ref();
        create_owner_dir(dir)?;

        let path = dir.join(format!("{}.key", self.fingerprint()));
        let encoded = serde_json::to_vec_pretty(self)?;
        write_owner_only(&path, &encoded)?;

        info!(path = %path.display(), "Keypair exported");
        Ok(path)
    }
}

#[cfg(unix)]
fn create_owner_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

#[cfg(not(unix))]
fn create_owner_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

#[cfg(unix)]
fn write_owner_only(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_owner_only(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

impl fmt::Debug for StoredKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredKeyPair")
            .field("has_private", &self.has_private)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}
