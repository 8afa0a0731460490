//! Error types for certificate and key handling.

use thiserror::Error;

/// Errors raised while building, parsing or verifying certificates.
///
/// Every verification variant is non-fatal: callers reject the offending
/// certificate and carry on.
#[derive(Debug, Error)]
pub enum CertificateError {
    /// Public or private key PEM/ASN.1 could not be parsed
    #[error("Bad key encoding: {0}")]
    BadKeyEncoding(String),

    /// Embedded fingerprint has the wrong length
    #[error("Incorrect fingerprint size: expected {expected}, got {actual}")]
    FingerprintSize { expected: usize, actual: usize },

    /// Embedded fingerprint does not match the public key
    #[error("Fingerprint does not match: embedded {embedded}, computed {computed}")]
    FingerprintMismatch { embedded: String, computed: String },

    /// Signature is malformed or does not verify over the payload
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// Payload or record bytes are not a certificate
    #[error("Certificate decode error: {0}")]
    Decode(String),

    /// Signing was requested from a keypair without its private half
    #[error("No private key")]
    NoPrivateKey,

    /// RSA key generation failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// RSA signing failed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Encoding a payload or record failed
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Key export I/O failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for certificate operations.
pub type CertificateResult<T> = Result<T, CertificateError>;
