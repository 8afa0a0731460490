//! Test utilities for multi-peer gossip tests

use keymesh_core::{logging, GossipConfig};
use keymesh_crypto::{Certificate, StoredKeyPair};
use keymesh_mesh::{GossipSender, Gossiper, MeshResult, Peer};
use keymesh_store::{KeyStore, PUBLIC_BUCKET};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// RSA modulus used by every test identity
pub const TEST_KEY_BITS: usize = 1024;

/// Install a quiet subscriber once; later calls are no-ops.
pub fn init_test_logging() {
    let _ = logging::try_init("warn");
}

/// Gossip settings for tests: full sync every `rounds` payloads.
pub fn gossip_config(rounds: u32, sample_size: usize) -> GossipConfig {
    GossipConfig {
        full_sync_rounds: rounds,
        sample_size,
        ..GossipConfig::default()
    }
}

/// A fresh, valid certificate for a throwaway keypair
pub fn fresh_certificate() -> Certificate {
    StoredKeyPair::generate(TEST_KEY_BITS)
        .and_then(|pair| pair.self_sign())
        .unwrap()
}

/// A node under test: a temporary key store and a peer on the public channel
pub struct TestNode {
    pub name: String,
    pub dir: PathBuf,
    pub store: Arc<KeyStore>,
    pub peer: Arc<Peer>,
}

impl TestNode {
    /// Create a node with a brand new identity
    pub fn new(name: &str, config: &GossipConfig) -> Self {
        let dir = std::env::temp_dir().join(format!("keymesh_it_{}_{}", name, uuid::Uuid::new_v4()));
        Self::open(name, dir, config)
    }

    /// Open (or reopen) a node whose store lives in `dir`
    pub fn open(name: &str, dir: PathBuf, config: &GossipConfig) -> Self {
        let store = Arc::new(KeyStore::open(dir.join("keystore.db"), TEST_KEY_BITS).unwrap());
        let peer = Arc::new(Peer::new(Arc::clone(&store), PUBLIC_BUCKET, config).unwrap());
        Self {
            name: name.to_string(),
            dir,
            store,
            peer,
        }
    }

    pub fn fingerprint(&self) -> String {
        self.store.local_fingerprint().to_string()
    }

    /// Fingerprints persisted in the public bucket
    pub fn stored_fingerprints(&self) -> Vec<String> {
        self.store
            .list_fingerprints(PUBLIC_BUCKET)
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    /// Stop the peer and close the store, keeping the directory
    pub async fn stop(self) -> PathBuf {
        self.peer.shutdown().await;
        let TestNode { dir, store, peer, .. } = self;
        drop(peer);
        if let Ok(store) = Arc::try_unwrap(store) {
            store.close().unwrap();
        }
        dir
    }

    /// Stop the peer and delete the store
    pub async fn destroy(self) {
        let dir = self.stop().await;
        std::fs::remove_dir_all(dir).ok();
    }
}

/// In-memory transport connecting every attached peer to every other.
///
/// Broadcasts are flooded: whatever a receiver reports as newly accepted is
/// re-broadcast on its behalf, so an update reaches the whole mesh in one
/// call. Peers are held weakly to avoid a cycle through the registered
/// senders.
#[derive(Default)]
pub struct MemoryRouter {
    peers: Mutex<BTreeMap<String, Weak<Peer>>>,
    delivered: Mutex<usize>,
}

impl MemoryRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a node and register the router as its sender
    pub async fn attach(self: &Arc<Self>, node: &TestNode) {
        self.peers
            .lock()
            .unwrap()
            .insert(node.name.clone(), Arc::downgrade(&node.peer));

        let handle = RouterHandle {
            router: Arc::clone(self),
            name: node.name.clone(),
        };
        node.peer.register(Arc::new(handle)).await.unwrap();
    }

    fn others(&self, src: &str) -> Vec<(String, Arc<Peer>)> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name.as_str() != src)
            .filter_map(|(name, peer)| peer.upgrade().map(|p| (name.clone(), p)))
            .collect()
    }

    /// Flood `payload` from `src` to every other peer
    pub fn broadcast(&self, src: &str, payload: &[u8]) -> MeshResult<()> {
        for (name, peer) in self.others(src) {
            *self.delivered.lock().unwrap() += 1;
            if let Some(delta) = peer.on_gossip_broadcast(src, payload)? {
                debug!(from = %name, bytes = delta.len(), "Re-broadcasting delta");
                self.broadcast(&name, &delta)?;
            }
        }
        Ok(())
    }

    /// One periodic round: every peer gossips to every other peer
    pub fn gossip_round(&self) -> MeshResult<()> {
        let all = self.others("");
        for (src, peer) in &all {
            let payload = peer.gossip()?;
            for (dst, other) in &all {
                if dst == src {
                    continue;
                }
                *self.delivered.lock().unwrap() += 1;
                if let Some(delta) = other.on_gossip(&payload)? {
                    self.broadcast(dst, &delta)?;
                }
            }
        }
        Ok(())
    }

    /// Push `src`'s full state to `dst`
    pub fn unicast_full(&self, src: &TestNode, dst: &TestNode) -> MeshResult<()> {
        let payload = keymesh_mesh::encode_payload(&src.peer.snapshot())?;
        *self.delivered.lock().unwrap() += 1;
        dst.peer.on_gossip_unicast(&src.name, &payload)
    }

    /// Total payload deliveries so far
    pub fn delivered(&self) -> usize {
        *self.delivered.lock().unwrap()
    }
}

struct RouterHandle {
    router: Arc<MemoryRouter>,
    name: String,
}

impl GossipSender for RouterHandle {
    fn gossip_broadcast(&self, payload: &[u8]) -> MeshResult<()> {
        self.router.broadcast(&self.name, payload)
    }
}
