//! Gossip wire format and transport-facing traits.
//!
//! A gossip payload is a versioned JSON envelope mapping fingerprints to
//! serialized certificates:
//!
//! ```json
//! { "version": 1, "keys": { "<fingerprint>": { "data": "<hex>", "signature": "<hex>" } } }
//! ```
//!
//! The signed payload travels as hex of the exact signed bytes, so a
//! certificate survives any number of hops byte-for-byte.

use crate::error::{MeshError, MeshResult};
use crate::state::KeySet;
use keymesh_crypto::{Certificate, CertificateError, SignedKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current wire envelope version
pub const WIRE_VERSION: u32 = 1;

/// Versioned gossip envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePayload {
    /// Envelope version, must equal [`WIRE_VERSION`]
    pub version: u32,
    /// Fingerprint to serialized certificate
    pub keys: BTreeMap<String, WireEntry>,
}

/// One entry of the envelope.
///
/// Anything that is not shaped like a certificate record is kept as raw
/// JSON so it can be skipped on its own instead of failing the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireEntry {
    /// A well-formed certificate record
    Record(SignedKey),
    /// Any other JSON value
    Malformed(serde_json::Value),
}

impl WireEntry {
    /// Parse the entry into a certificate. The signature is not checked.
    pub fn into_certificate(self) -> Result<Certificate, CertificateError> {
        match self {
            WireEntry::Record(record) => Certificate::try_from(record),
            WireEntry::Malformed(value) => Err(CertificateError::Decode(format!(
                "not a certificate record: {value}"
            ))),
        }
    }
}

impl From<SignedKey> for WireEntry {
    fn from(record: SignedKey) -> Self {
        WireEntry::Record(record)
    }
}

impl From<Certificate> for WireEntry {
    fn from(cert: Certificate) -> Self {
        WireEntry::Record(cert.into())
    }
}

impl WirePayload {
    /// Build an envelope holding every entry of `set`
    pub fn from_set(set: &KeySet) -> Self {
        let keys = set
            .certificates()
            .into_iter()
            .map(|cert| (cert.fingerprint().to_string(), cert.into()))
            .collect();
        Self {
            version: WIRE_VERSION,
            keys,
        }
    }

    /// Number of entries carried
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the envelope carries no entries
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Encode a key set for the wire.
pub fn encode_payload(set: &KeySet) -> MeshResult<Vec<u8>> {
    Ok(serde_json::to_vec(&WirePayload::from_set(set))?)
}

/// Decode a wire payload.
///
/// Only the envelope is validated here. Individual entries are neither
/// parsed nor verified; a single bad entry must not poison the batch.
/// Entries of the wrong shape decode as [`WireEntry::Malformed`].
pub fn decode_payload(buf: &[u8]) -> MeshResult<WirePayload> {
    let payload: WirePayload =
        serde_json::from_slice(buf).map_err(|e| MeshError::Decode(e.to_string()))?;

    if payload.version != WIRE_VERSION {
        return Err(MeshError::UnsupportedVersion {
            found: payload.version,
            expected: WIRE_VERSION,
        });
    }

    Ok(payload)
}

/// Callbacks a gossip transport drives.
///
/// The transport may invoke these from many connections at once.
pub trait Gossiper: Send + Sync {
    /// Produce the next periodic outgoing payload
    fn gossip(&self) -> MeshResult<Vec<u8>>;

    /// Merge a delta; returns the newly accepted entries, encoded, if any
    fn on_gossip(&self, buf: &[u8]) -> MeshResult<Option<Vec<u8>>>;

    /// Merge a broadcast from `src`; returns what should be re-broadcast
    fn on_gossip_broadcast(&self, src: &str, buf: &[u8]) -> MeshResult<Option<Vec<u8>>>;

    /// Merge a full-state push from `src`
    fn on_gossip_unicast(&self, src: &str, buf: &[u8]) -> MeshResult<()>;
}

/// Outbound half of a gossip transport.
pub trait GossipSender: Send + Sync {
    /// Broadcast an encoded payload to every reachable peer
    fn gossip_broadcast(&self, payload: &[u8]) -> MeshResult<()>;
}
