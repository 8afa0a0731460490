//! Self-signed key certificates for gossip distribution.
//!
//! A certificate binds an RSA public key to its truncated SHA-256
//! fingerprint and carries a PSS signature made with the matching private
//! key. The signed bytes (`payload`) are kept verbatim: verification always
//! runs over the exact bytes that were signed, never over a re-serialized
//! copy.
//!
//! # Wire form
//!
//! Certificates serialize as a [`SignedKey`] record holding the hex encoded
//! payload and the hex encoded signature. Decoding parses the payload to
//! recover the public key and fingerprint but does not verify it; call
//! [`Certificate::check`] before trusting a decoded certificate.

use crate::error::{CertificateError, CertificateResult};
use crate::keys::parse_public_pem;
use rand::thread_rng;
use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of hex characters kept from the SHA-256 digest.
pub const FINGERPRINT_SIZE: usize = 32;

/// Truncated, hex encoded SHA-256 of a PEM public key.
pub fn fingerprint(public_key_pem: &str) -> String {
    let digest = Sha256::digest(public_key_pem.as_bytes());
    let mut fp = hex::encode(digest);
    fp.truncate(FINGERPRINT_SIZE);
    fp
}

/// The signed content of a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistKey {
    /// PEM encoded SubjectPublicKeyInfo
    pub public_key: String,
    /// `fingerprint(public_key)`
    pub fingerprint: String,
}

impl DistKey {
    pub fn new(public_key_pem: impl Into<String>) -> Self {
        let public_key = public_key_pem.into();
        let fingerprint = fingerprint(&public_key);
        Self {
            public_key,
            fingerprint,
        }
    }

    /// Serialize to the bytes that get signed.
    pub fn to_payload(&self) -> CertificateResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn from_payload(payload: &[u8]) -> CertificateResult<Self> {
        serde_json::from_slice(payload).map_err(|e| CertificateError::Decode(e.to_string()))
    }
}

/// Serialized certificate record, as stored and gossiped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedKey {
    /// Hex encoded signed payload
    pub data: String,
    /// Hex encoded PSS signature over the payload
    pub signature: String,
}

/// A parsed, immutable self-signed certificate.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SignedKey", into = "SignedKey")]
pub struct Certificate {
    public_key: String,
    fingerprint: String,
    payload: Vec<u8>,
    signature: String,
}

impl Certificate {
    /// Rebuild a certificate from its signed payload and hex signature.
    ///
    /// The payload is parsed to expose the public key and fingerprint; the
    /// signature is not checked here.
    pub fn from_parts(payload: Vec<u8>, signature: impl Into<String>) -> CertificateResult<Self> {
        let dist = DistKey::from_payload(&payload)?;
        Ok(Self {
            public_key: dist.public_key,
            fingerprint: dist.fingerprint,
            payload,
            signature: signature.into(),
        })
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The exact bytes covered by the signature.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Hex encoded signature.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Verify the certificate.
    ///
    /// Checks, in order: signature hex encoding, payload structure,
    /// fingerprint length, fingerprint against the embedded public key,
    /// public key encoding, and finally the PSS signature over the
    /// signed payload bytes.
    pub fn check(&self) -> CertificateResult<()> {
        let signature_bytes = hex::decode(&self.signature)
            .map_err(|e| CertificateError::SignatureInvalid(format!("bad hex: {e}")))?;

        let dist = DistKey::from_payload(&self.payload)?;

        if dist.fingerprint.len() != FINGERPRINT_SIZE {
            return Err(CertificateError::FingerprintSize {
                expected: FINGERPRINT_SIZE,
                actual: dist.fingerprint.len(),
            });
        }

        let computed = fingerprint(&dist.public_key);
        if computed != dist.fingerprint {
            return Err(CertificateError::FingerprintMismatch {
                embedded: dist.fingerprint,
                computed,
            });
        }

        let public_key = parse_public_pem(&dist.public_key)?;

        let signature = Signature::try_from(signature_bytes.as_slice())
            .map_err(|e| CertificateError::SignatureInvalid(e.to_string()))?;
        VerifyingKey::<Sha256>::new(public_key)
            .verify(&self.payload, &signature)
            .map_err(|e| CertificateError::SignatureInvalid(e.to_string()))
    }

    /// Convert into the serialized record form.
    pub fn to_signed_key(&self) -> SignedKey {
        SignedKey {
            data: hex::encode(&self.payload),
            signature: self.signature.clone(),
        }
    }

    /// JSON encoding used for storage.
    pub fn encode(&self) -> CertificateResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> CertificateResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| CertificateError::Decode(e.to_string()))
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("fingerprint", &self.fingerprint)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl TryFrom<SignedKey> for Certificate {
    type Error = CertificateError;

    fn try_from(record: SignedKey) -> CertificateResult<Self> {
        let payload = hex::decode(&record.data)
            .map_err(|e| CertificateError::Decode(format!("payload hex: {e}")))?;
        Self::from_parts(payload, record.signature)
    }
}

impl From<Certificate> for SignedKey {
    fn from(cert: Certificate) -> Self {
        SignedKey {
            data: hex::encode(&cert.payload),
            signature: cert.signature,
        }
    }
}

/// Build and sign a certificate for `public_key_pem` with `private_key`.
pub fn self_sign(private_key: &RsaPrivateKey, public_key_pem: &str) -> CertificateResult<Certificate> {
    let dist = DistKey::new(public_key_pem);
    let payload = dist.to_payload()?;

    let signing_key = BlindedSigningKey::<Sha256>::new(private_key.clone());
    let signature = signing_key
        .try_sign_with_rng(&mut thread_rng(), &payload)
        .map_err(|e| CertificateError::Signing(e.to_string()))?;

    Ok(Certificate {
        public_key: dist.public_key,
        fingerprint: dist.fingerprint,
        payload,
        signature: hex::encode(signature.to_bytes()),
    })
}
