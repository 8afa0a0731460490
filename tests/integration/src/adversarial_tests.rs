//! Forged and malformed gossip
//!
//! Untrusted bytes enter only through the receive callbacks. These tests
//! check that every forgery is dropped at that boundary while honest
//! entries in the same batch still get through.

use crate::test_utils::*;
use keymesh_crypto::Certificate;
use keymesh_mesh::{Gossiper, KeySet, MeshError, WireEntry, WirePayload};
use keymesh_store::PUBLIC_BUCKET;

fn encode(payload: &WirePayload) -> Vec<u8> {
    serde_json::to_vec(payload).unwrap()
}

/// `victim`'s signed payload paired with someone else's signature
fn forged_signature(victim: &Certificate, donor: &Certificate) -> Certificate {
    Certificate::from_parts(victim.payload().to_vec(), donor.signature()).unwrap()
}

#[tokio::test]
async fn test_forged_entry_skipped_rest_accepted() {
    init_test_logging();
    let node = TestNode::new("target", &gossip_config(5, 5));
    let mut updates = node.peer.subscribe();

    let honest_a = fresh_certificate();
    let honest_b = fresh_certificate();
    let victim = fresh_certificate();
    let forged = forged_signature(&victim, &honest_a);

    let batch = KeySet::from(vec![honest_a.clone(), honest_b.clone(), forged.clone()]);
    let before = node.stored_fingerprints();

    let delta = node
        .peer
        .on_receive_set(&keymesh_mesh::encode_payload(&batch).unwrap())
        .unwrap()
        .unwrap();

    let mut expected = vec![honest_a.fingerprint().to_string(), honest_b.fingerprint().to_string()];
    expected.sort();
    assert_eq!(delta.fingerprints(), expected);

    assert!(node.peer.get(victim.fingerprint()).is_none());
    assert!(!node.store.have_cached(victim.fingerprint(), PUBLIC_BUCKET));
    assert_eq!(node.stored_fingerprints().len(), before.len() + 2);

    let mut notified = vec![
        updates.recv().await.unwrap().fingerprint().to_string(),
        updates.recv().await.unwrap().fingerprint().to_string(),
    ];
    notified.sort();
    assert_eq!(notified, expected);
    assert!(updates.try_recv().is_err());

    node.destroy().await;
}

#[tokio::test]
async fn test_key_filed_under_foreign_fingerprint_rejected() {
    init_test_logging();
    let node = TestNode::new("target", &gossip_config(5, 5));
    let victim = fresh_certificate();
    let attacker = fresh_certificate();

    // Valid certificate, but claimed to be the victim's.
    let mut payload = WirePayload::from_set(&KeySet::new());
    payload
        .keys
        .insert(victim.fingerprint().to_string(), WireEntry::from(attacker.clone()));

    assert!(node.peer.on_receive_set(&encode(&payload)).unwrap().is_none());
    assert!(node.peer.get(victim.fingerprint()).is_none());
    assert!(node.peer.get(attacker.fingerprint()).is_none());

    // The genuine certificate is still accepted afterwards.
    let genuine = KeySet::from(vec![victim.clone()]);
    let delta = node
        .peer
        .on_receive_set(&keymesh_mesh::encode_payload(&genuine).unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(delta.fingerprints(), vec![victim.fingerprint().to_string()]);

    node.destroy().await;
}

#[tokio::test]
async fn test_misshapen_entry_does_not_sink_batch() {
    init_test_logging();
    let node = TestNode::new("target", &gossip_config(5, 5));
    let honest = fresh_certificate();

    let mut payload = WirePayload::from_set(&KeySet::from(vec![honest.clone()]));
    payload
        .keys
        .insert("f".repeat(32), WireEntry::Malformed(serde_json::json!({ "data": 5 })));
    payload
        .keys
        .insert("e".repeat(32), WireEntry::Malformed(serde_json::json!([1, 2, 3])));

    let delta = node
        .peer
        .on_gossip(&encode(&payload))
        .unwrap()
        .expect("honest entry accepted");
    let delta = keymesh_mesh::decode_payload(&delta).unwrap();

    assert_eq!(delta.keys.keys().cloned().collect::<Vec<_>>(), vec![honest.fingerprint().to_string()]);
    assert!(node.peer.get(honest.fingerprint()).is_some());
    assert!(node.stored_fingerprints().contains(&honest.fingerprint().to_string()));
    assert!(!node.stored_fingerprints().contains(&"f".repeat(32)));

    node.destroy().await;
}

#[tokio::test]
async fn test_known_fingerprint_keeps_stored_copy() {
    init_test_logging();
    let node = TestNode::new("target", &gossip_config(5, 5));
    let original = fresh_certificate();
    let donor = fresh_certificate();

    node.peer
        .on_receive_set(&keymesh_mesh::encode_payload(&KeySet::from(vec![original.clone()])).unwrap())
        .unwrap();

    // Same payload, bogus signature, pushed as full state.
    let replay = KeySet::from(vec![forged_signature(&original, &donor)]);
    node.peer
        .on_gossip_unicast("mallory", &keymesh_mesh::encode_payload(&replay).unwrap())
        .unwrap();

    assert_eq!(node.peer.get(original.fingerprint()), Some(original.clone()));
    assert_eq!(
        node.store
            .get_certificate(original.fingerprint(), PUBLIC_BUCKET)
            .unwrap(),
        original
    );

    node.destroy().await;
}

#[tokio::test]
async fn test_malformed_payload_fails_whole_call() {
    init_test_logging();
    let node = TestNode::new("target", &gossip_config(5, 5));
    let before = node.peer.fingerprints();

    assert!(matches!(
        node.peer.on_gossip(b"\xff\xfe definitely not gossip"),
        Err(MeshError::Decode(_))
    ));
    assert!(matches!(
        node.peer.on_gossip_broadcast("mallory", br#"{"version": 2, "keys": {}}"#),
        Err(MeshError::UnsupportedVersion { found: 2, .. })
    ));
    assert_eq!(node.peer.fingerprints(), before);

    node.destroy().await;
}

#[tokio::test]
async fn test_forged_broadcast_not_propagated() {
    init_test_logging();
    let config = gossip_config(5, 5);
    let a = TestNode::new("a", &config);
    let b = TestNode::new("b", &config);
    let router = MemoryRouter::new();
    router.attach(&a).await;
    router.attach(&b).await;

    let victim = fresh_certificate();
    let forged = KeySet::from(vec![forged_signature(&victim, &fresh_certificate())]);
    let before = router.delivered();

    router
        .broadcast("mallory", &keymesh_mesh::encode_payload(&forged).unwrap())
        .unwrap();

    // One delivery per honest peer, and no re-broadcast.
    assert_eq!(router.delivered() - before, 2);
    for node in [&a, &b] {
        assert!(node.peer.get(victim.fingerprint()).is_none());
        assert!(!node
            .stored_fingerprints()
            .contains(&victim.fingerprint().to_string()));
    }

    a.destroy().await;
    b.destroy().await;
}
