//! Peer - one node's participation in one gossip channel
//!
//! The peer bridges the transport, the in-memory [`KeySet`] and the
//! [`KeyStore`]:
//!
//! - Local updates and sender registration go through a single-consumer
//!   action queue, so "insert then broadcast" is never interleaved
//! - Transport callbacks (`gossip`, `on_gossip*`) run on the caller's task
//!   and only touch the set and the store, both of which lock internally
//! - Every certificate received from the network is verified by the store
//!   before it reaches the set
//!
//! Newly accepted certificates are published to [`Peer::subscribe`]rs.

use crate::error::{MeshError, MeshResult};
use crate::gossip::{decode_payload, encode_payload, GossipSender, Gossiper};
use crate::state::KeySet;
use keymesh_core::GossipConfig;
use keymesh_crypto::Certificate;
use keymesh_store::KeyStore;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Commands drained by the peer's action loop
enum Action {
    InsertLocal {
        cert: Certificate,
        reply: oneshot::Sender<()>,
    },
    Register {
        sender: Arc<dyn GossipSender>,
        reply: oneshot::Sender<()>,
    },
}

/// State shared between the peer handle and its action loop
struct Shared {
    state: KeySet,
    store: Arc<KeyStore>,
    channel: String,
    config: GossipConfig,
    countdown: AtomicU32,
    updates: broadcast::Sender<Certificate>,
}

/// Gossip peer for a single channel.
pub struct Peer {
    shared: Arc<Shared>,
    actions: mpsc::Sender<Action>,
    quit: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Peer {
    /// Create a peer for `channel` and start its action loop.
    ///
    /// The in-memory set is seeded from every certificate stored in the
    /// channel's bucket plus the node's own certificate. Failing to
    /// enumerate the bucket is fatal. Must be called inside a Tokio
    /// runtime.
    pub fn new(store: Arc<KeyStore>, channel: &str, config: &GossipConfig) -> MeshResult<Self> {
        let state = KeySet::new();

        for fingerprint in store.list_fingerprints(channel) {
            let fingerprint = fingerprint?;
            match store.get_cached(&fingerprint, channel) {
                Some(cert) => {
                    state.insert(cert);
                }
                None => warn!(
                    fingerprint = %fingerprint,
                    channel,
                    "Skipping unreadable stored certificate"
                ),
            }
        }

        let local = store.local_certificate().clone();
        if !state.contains(local.fingerprint()) {
            store.put_certificate(&local, channel)?;
            state.insert(local);
        }

        let (updates, _) = broadcast::channel(config.update_buffer.max(1));
        let (actions, action_rx) = mpsc::channel(config.action_queue.max(1));
        let (quit_tx, quit_rx) = oneshot::channel();

        let shared = Arc::new(Shared {
            state,
            store,
            channel: channel.to_string(),
            config: config.clone(),
            countdown: AtomicU32::new(config.full_sync_rounds.max(1)),
            updates,
        });

        info!(
            channel,
            keys = shared.state.len(),
            fingerprint = %shared.store.local_fingerprint(),
            "Peer started"
        );

        let task = tokio::spawn(run_actions(Arc::clone(&shared), action_rx, quit_rx));

        Ok(Self {
            shared,
            actions,
            quit: Mutex::new(Some(quit_tx)),
            task: Mutex::new(Some(task)),
        })
    }

    /// Channel name, also the store bucket for accepted keys
    pub fn channel(&self) -> &str {
        &self.shared.channel
    }

    /// Backing key store
    pub fn store(&self) -> &Arc<KeyStore> {
        &self.shared.store
    }

    /// Insert a locally produced certificate and advertise it.
    ///
    /// The certificate is trusted as-is. If no sender is registered yet it
    /// is kept locally and goes out with the next full sync.
    pub async fn insert_local(&self, cert: Certificate) -> MeshResult<()> {
        let (reply, done) = oneshot::channel();
        self.actions
            .send(Action::InsertLocal { cert, reply })
            .await
            .map_err(|_| MeshError::Stopped)?;
        done.await.map_err(|_| MeshError::Stopped)
    }

    /// Bind the outbound transport.
    pub async fn register(&self, sender: Arc<dyn GossipSender>) -> MeshResult<()> {
        let (reply, done) = oneshot::channel();
        self.actions
            .send(Action::Register { sender, reply })
            .await
            .map_err(|_| MeshError::Stopped)?;
        done.await.map_err(|_| MeshError::Stopped)
    }

    /// Next periodic outgoing set.
    ///
    /// Every `full_sync_rounds`-th call returns the complete set; the
    /// others return a random sample of `sample_size` entries.
    pub fn produce_gossip_payload(&self) -> KeySet {
        let rounds = self.shared.config.full_sync_rounds.max(1);
        let previous = match self.shared.countdown.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |n| Some(if n <= 1 { rounds } else { n - 1 }),
        ) {
            Ok(n) | Err(n) => n,
        };

        if previous <= 1 {
            debug!(channel = %self.shared.channel, keys = self.shared.state.len(), "Full sync payload");
            self.shared.state.snapshot()
        } else {
            self.shared.state.sample(self.shared.config.sample_size)
        }
    }

    /// Verify and merge a received delta.
    ///
    /// Returns the entries that were new to this peer, or `None`. An
    /// undecodable payload fails as a whole; bad entries are skipped.
    ///
    /// The delta is decided by the set merge, so concurrent deliveries of
    /// the same certificate report it exactly once.
    pub fn on_receive_set(&self, buf: &[u8]) -> MeshResult<Option<KeySet>> {
        let valid: KeySet = self.resolve(buf)?.into_iter().collect();

        let Some(delta) = self.shared.state.merge_novel(&valid) else {
            return Ok(None);
        };

        self.notify(&delta);
        info!(
            channel = %self.shared.channel,
            accepted = delta.len(),
            "Merged gossip delta"
        );
        Ok(Some(delta))
    }

    /// Verify and merge a full-state push. Returns the complete local set.
    pub fn on_receive_full(&self, buf: &[u8]) -> MeshResult<KeySet> {
        let valid: KeySet = self.resolve(buf)?.into_iter().collect();

        let fresh = self.shared.state.merge_novel(&valid);
        let complete = self.shared.state.merge_all(&valid);
        if let Some(fresh) = &fresh {
            self.notify(fresh);
        }
        debug!(
            channel = %self.shared.channel,
            accepted = fresh.as_ref().map_or(0, KeySet::len),
            total = complete.len(),
            "Merged full state"
        );
        Ok(complete)
    }

    /// Decode `buf` and verify each entry against the store.
    ///
    /// Entries the store already holds resolve to the stored copy, never
    /// to the inbound bytes. Malformed, misfiled and unverifiable entries
    /// are dropped.
    fn resolve(&self, buf: &[u8]) -> MeshResult<Vec<Certificate>> {
        let payload = decode_payload(buf)?;
        let store = &self.shared.store;
        let channel = self.shared.channel.as_str();
        let mut resolved = Vec::with_capacity(payload.len());

        for (key, entry) in payload.keys {
            let cert = match entry.into_certificate() {
                Ok(cert) => cert,
                Err(e) => {
                    warn!(fingerprint = %key, error = %e, "Skipping malformed gossip entry");
                    continue;
                }
            };

            if cert.fingerprint() != key {
                warn!(
                    key = %key,
                    fingerprint = %cert.fingerprint(),
                    "Skipping gossip entry filed under wrong fingerprint"
                );
                continue;
            }

            if let Some(existing) = store.get_cached(&key, channel) {
                resolved.push(existing);
                continue;
            }

            match store.try_insert(&cert, channel) {
                Ok(()) => resolved.push(cert),
                Err(e) => warn!(fingerprint = %key, error = %e, "Rejected gossip entry"),
            }
        }

        Ok(resolved)
    }

    fn notify(&self, accepted: &KeySet) {
        self.shared.notify(accepted.certificates());
    }

    /// Receive every certificate accepted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Certificate> {
        self.shared.updates.subscribe()
    }

    /// Copy of the current set
    pub fn snapshot(&self) -> KeySet {
        self.shared.state.snapshot()
    }

    /// Look up a certificate in the current set
    pub fn get(&self, fingerprint: &str) -> Option<Certificate> {
        self.shared.state.get(fingerprint)
    }

    /// Sorted fingerprints in the current set
    pub fn fingerprints(&self) -> Vec<String> {
        self.shared.state.fingerprints()
    }

    /// Signal the action loop to exit after the action in progress.
    pub fn stop(&self) {
        let quit = self.quit.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(quit) = quit {
            let _ = quit.send(());
        }
    }

    /// Stop the action loop and wait for it to finish.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Peer action loop ended abnormally");
            }
        }
        info!(channel = %self.shared.channel, "Peer stopped");
    }
}

impl Shared {
    fn notify(&self, certs: Vec<Certificate>) {
        for cert in certs {
            // No subscribers is fine.
            let _ = self.updates.send(cert);
        }
    }

    fn insert_local(&self, cert: Certificate, sender: Option<&Arc<dyn GossipSender>>) {
        let fingerprint = cert.fingerprint().to_string();

        if let Err(e) = self.store.put_certificate(&cert, &self.channel) {
            warn!(fingerprint = %fingerprint, error = %e, "Failed to persist local certificate");
        }

        if self.state.insert(cert.clone()) {
            self.notify(vec![cert.clone()]);
        }

        let Some(sender) = sender else {
            warn!(
                fingerprint = %fingerprint,
                "No sender registered, update not broadcast yet"
            );
            return;
        };

        let update = KeySet::from(vec![cert]);
        let result = encode_payload(&update).and_then(|payload| sender.gossip_broadcast(&payload));
        match result {
            Ok(()) => debug!(fingerprint = %fingerprint, "Broadcast local update"),
            Err(e) => warn!(fingerprint = %fingerprint, error = %e, "Broadcast failed"),
        }
    }
}

async fn run_actions(
    shared: Arc<Shared>,
    mut actions: mpsc::Receiver<Action>,
    mut quit: oneshot::Receiver<()>,
) {
    let mut sender: Option<Arc<dyn GossipSender>> = None;

    loop {
        tokio::select! {
            biased;

            _ = &mut quit => {
                debug!(channel = %shared.channel, "Action loop received stop");
                break;
            }
            action = actions.recv() => {
                let Some(action) = action else {
                    debug!(channel = %shared.channel, "Action queue closed");
                    break;
                };
                match action {
                    Action::InsertLocal { cert, reply } => {
                        shared.insert_local(cert, sender.as_ref());
                        let _ = reply.send(());
                    }
                    Action::Register { sender: new_sender, reply } => {
                        sender = Some(new_sender);
                        info!(channel = %shared.channel, "Gossip sender registered");
                        let _ = reply.send(());
                    }
                }
            }
        }
    }
}

impl Gossiper for Peer {
    fn gossip(&self) -> MeshResult<Vec<u8>> {
        encode_payload(&self.produce_gossip_payload())
    }

    fn on_gossip(&self, buf: &[u8]) -> MeshResult<Option<Vec<u8>>> {
        self.on_receive_set(buf)?
            .map(|delta| encode_payload(&delta))
            .transpose()
    }

    fn on_gossip_broadcast(&self, src: &str, buf: &[u8]) -> MeshResult<Option<Vec<u8>>> {
        debug!(src, bytes = buf.len(), "Broadcast received");
        self.on_gossip(buf)
    }

    fn on_gossip_unicast(&self, src: &str, buf: &[u8]) -> MeshResult<()> {
        debug!(src, bytes = buf.len(), "Unicast received");
        self.on_receive_full(buf).map(|_| ())
    }
}
