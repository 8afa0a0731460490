//! Convergence of honest peers
//!
//! # Test Scenarios
//!
//! 1. **First Contact**: a fresh peer learns another peer's identity from one payload
//! 2. **Periodic Gossip**: three peers converge within one full-sync cadence
//! 3. **Local Update Flooding**: a locally inserted key reaches every attached peer at once
//! 4. **Late Joiner**: a full-state push brings a new peer up to date
//! 5. **Restart**: accepted keys are reloaded from the store
//! 6. **Concurrent Delivery**: the same broadcast arriving on many connections is accepted once

use crate::test_utils::*;
use keymesh_mesh::{Gossiper, KeySet};
use std::collections::BTreeSet;
use std::sync::Barrier;
use std::thread;

fn fingerprint_set(fps: Vec<String>) -> BTreeSet<String> {
    fps.into_iter().collect()
}

#[tokio::test]
async fn test_first_contact_delivers_exactly_one_key() {
    init_test_logging();
    let x = TestNode::new("x", &gossip_config(5, 5));
    let y = TestNode::new("y", &gossip_config(5, 5));

    let payload = x.peer.gossip().unwrap();
    let delta = y.peer.on_receive_set(&payload).unwrap().unwrap();

    assert_eq!(delta.fingerprints(), vec![x.fingerprint()]);

    let stored = y.stored_fingerprints();
    assert_eq!(stored.iter().filter(|fp| **fp == x.fingerprint()).count(), 1);
    assert_eq!(fingerprint_set(stored), fingerprint_set(vec![x.fingerprint(), y.fingerprint()]));

    x.destroy().await;
    y.destroy().await;
}

#[tokio::test]
async fn test_periodic_gossip_converges() {
    init_test_logging();
    let rounds = 3;
    let config = gossip_config(rounds, 1);
    let nodes: Vec<TestNode> = ["a", "b", "c"]
        .iter()
        .map(|name| TestNode::new(name, &config))
        .collect();

    let router = MemoryRouter::new();
    for node in &nodes {
        router.attach(node).await;
    }

    for _ in 0..rounds {
        router.gossip_round().unwrap();
    }

    let expected = fingerprint_set(nodes.iter().map(TestNode::fingerprint).collect());
    for node in &nodes {
        assert_eq!(fingerprint_set(node.peer.fingerprints()), expected, "peer {}", node.name);
        assert_eq!(fingerprint_set(node.stored_fingerprints()), expected, "store {}", node.name);
    }
    assert!(router.delivered() > 0);

    for node in nodes {
        node.destroy().await;
    }
}

#[tokio::test]
async fn test_local_update_floods_mesh() {
    init_test_logging();
    let config = gossip_config(5, 5);
    let a = TestNode::new("a", &config);
    let b = TestNode::new("b", &config);
    let c = TestNode::new("c", &config);

    let router = MemoryRouter::new();
    for node in [&a, &b, &c] {
        router.attach(node).await;
    }

    let mut b_updates = b.peer.subscribe();
    let cert = fresh_certificate();
    a.peer.insert_local(cert.clone()).await.unwrap();

    for node in [&a, &b, &c] {
        assert!(node.peer.get(cert.fingerprint()).is_some(), "peer {}", node.name);
    }
    assert!(c.stored_fingerprints().contains(&cert.fingerprint().to_string()));
    assert_eq!(b_updates.recv().await.unwrap(), cert);

    a.destroy().await;
    b.destroy().await;
    c.destroy().await;
}

#[tokio::test]
async fn test_late_joiner_catches_up() {
    init_test_logging();
    let config = gossip_config(5, 5);
    let a = TestNode::new("a", &config);
    let b = TestNode::new("b", &config);
    let router = MemoryRouter::new();
    router.attach(&a).await;
    router.attach(&b).await;
    router.gossip_round().unwrap();

    let late = TestNode::new("late", &config);
    router.unicast_full(&a, &late).unwrap();

    let expected = fingerprint_set(vec![a.fingerprint(), b.fingerprint(), late.fingerprint()]);
    assert_eq!(fingerprint_set(late.peer.fingerprints()), expected);
    assert_eq!(fingerprint_set(late.stored_fingerprints()), expected);

    a.destroy().await;
    b.destroy().await;
    late.destroy().await;
}

#[tokio::test]
async fn test_accepted_keys_survive_restart() {
    init_test_logging();
    let config = gossip_config(5, 5);
    let x = TestNode::new("x", &config);
    let y = TestNode::new("y", &config);

    y.peer.on_receive_set(&x.peer.gossip().unwrap()).unwrap();
    let y_fingerprint = y.fingerprint();

    let dir = y.stop().await;
    let reopened = TestNode::open("y", dir, &config);

    assert_eq!(reopened.fingerprint(), y_fingerprint);
    assert!(reopened.peer.get(&x.fingerprint()).is_some());

    // Nothing is novel the second time around.
    assert!(reopened.peer.on_receive_set(&x.peer.gossip().unwrap()).unwrap().is_none());

    x.destroy().await;
    reopened.destroy().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_broadcast_accepted_once() {
    init_test_logging();
    const CONNECTIONS: usize = 6;
    let node = TestNode::new("hub", &gossip_config(5, 5));
    let mut updates = node.peer.subscribe();

    let certs: Vec<_> = (0..3).map(|_| fresh_certificate()).collect();
    let bytes = keymesh_mesh::encode_payload(&KeySet::from(certs.clone())).unwrap();
    let barrier = Barrier::new(CONNECTIONS);

    let rebroadcasts: Vec<Vec<u8>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..CONNECTIONS)
            .map(|i| {
                let (peer, bytes, barrier) = (&node.peer, &bytes, &barrier);
                scope.spawn(move || {
                    barrier.wait();
                    peer.on_gossip_broadcast(&format!("conn-{i}"), bytes).unwrap()
                })
            })
            .collect();
        handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect()
    });

    // Every certificate is re-broadcast by exactly one connection.
    for cert in &certs {
        let carriers = rebroadcasts
            .iter()
            .map(|buf| keymesh_mesh::decode_payload(buf).unwrap())
            .filter(|payload| payload.keys.contains_key(cert.fingerprint()))
            .count();
        assert_eq!(carriers, 1, "cert {}", cert.fingerprint());
    }

    let mut notified = Vec::new();
    while let Ok(cert) = updates.try_recv() {
        notified.push(cert.fingerprint().to_string());
    }
    notified.sort();
    let mut expected: Vec<String> = certs.iter().map(|c| c.fingerprint().to_string()).collect();
    expected.sort();
    assert_eq!(notified, expected);

    node.destroy().await;
}
