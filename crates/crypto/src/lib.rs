//! Certificate format and key handling for keymesh.
//!
//! Every node owns one RSA keypair and distributes its public key as a
//! self-signed [`Certificate`]: the PEM public key and its truncated
//! SHA-256 fingerprint, serialized once and signed with RSA-PSS (SHA-256).
//! Peers accept a foreign certificate only after [`Certificate::check`]
//! succeeds.
//!
//! # Security Principles
//!
//! - Verification runs over the exact signed bytes, never a re-encoding
//! - Private keys never leave [`StoredKeyPair`] and are zeroized on drop
//! - A self-signed certificate proves key possession, not identity

pub mod certificate;
pub mod error;
pub mod keys;

pub use certificate::{fingerprint, self_sign, Certificate, DistKey, SignedKey, FINGERPRINT_SIZE};
pub use error::{CertificateError, CertificateResult};
pub use keys::{parse_private_pem, parse_public_pem, StoredKeyPair};
