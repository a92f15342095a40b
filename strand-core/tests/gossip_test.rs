//! Gossip reconciliation between peers of one application.

mod common;

use common::{spawn_peer, test_dna};
use strand_core::transport::{MemMesh, MeshRouting};

#[tokio::test]
async fn s6_gossip_converges_and_is_idempotent() {
    let mesh = MemMesh::new(MeshRouting::SelfOnly);
    let dna = test_dna();
    let (_dir_a, a) = spawn_peer(&mesh, dna.clone(), "alice").await;
    let (_dir_b, b) = spawn_peer(&mesh, dna, "bob").await;

    // peer A commits an even number; its own shard records put index 4
    let even = a.commit("evenNumbers", "2").await.unwrap();
    assert_eq!(a.dht().get_idx().unwrap(), 4);

    // peer B reconciles with A and re-validates everything it learns
    b.add_gossiper(&a.peer_id()).unwrap();
    b.gossip_tick().await.unwrap();

    assert!(b.dht().exists(&even).unwrap());
    assert!(b.dht().exists(&a.agent_entry_hash().unwrap()).unwrap());
    assert_eq!(b.dht().get_gossiper(&a.peer_id()).unwrap(), 4);

    // re-running the tick without new puts changes nothing
    let idx_before = b.dht().get_idx().unwrap();
    let log_before = b.dht().get_puts(0).unwrap().len();
    b.gossip_tick().await.unwrap();
    assert_eq!(b.dht().get_idx().unwrap(), idx_before);
    assert_eq!(b.dht().get_puts(0).unwrap().len(), log_before);
    assert_eq!(b.dht().get_gossiper(&a.peer_id()).unwrap(), 4);
}

#[tokio::test]
async fn gossip_carries_later_commits() {
    let mesh = MemMesh::new(MeshRouting::SelfOnly);
    let dna = test_dna();
    let (_dir_a, a) = spawn_peer(&mesh, dna.clone(), "alice").await;
    let (_dir_b, b) = spawn_peer(&mesh, dna, "bob").await;

    b.add_gossiper(&a.peer_id()).unwrap();
    b.gossip_tick().await.unwrap();
    let first_last_seen = b.dht().get_gossiper(&a.peer_id()).unwrap();

    // A keeps committing after the first reconciliation
    let later = a.commit("evenNumbers", "42").await.unwrap();
    assert!(!b.dht().exists(&later).unwrap());

    b.gossip_tick().await.unwrap();
    assert!(b.dht().exists(&later).unwrap());
    assert!(b.dht().get_gossiper(&a.peer_id()).unwrap() > first_last_seen);
}

#[tokio::test]
async fn gossip_rejects_invalid_remote_records() {
    // the receiving peer re-runs validation: an entry that fails the
    // nucleus put rule on B never lands in B's shard, even though A's
    // (differently configured) instance accepted it
    let mesh = MemMesh::new(MeshRouting::SelfOnly);

    let mut permissive = test_dna();
    // strip the even-int rule on A's side only
    permissive.zomes[0].code = r#"{ "validators": {}, "functions": {} }"#.into();
    let strict = test_dna();

    let (_dir_a, a) = spawn_peer(&mesh, permissive, "alice").await;
    let (_dir_b, b) = spawn_peer(&mesh, strict, "bob").await;

    let odd = a.commit("evenNumbers", "5").await.unwrap();
    assert!(a.dht().exists(&odd).unwrap());

    b.add_gossiper(&a.peer_id()).unwrap();
    b.gossip_tick().await.unwrap();

    // B applied A's genesis puts but stopped at the invalid one
    assert!(!b.dht().exists(&odd).unwrap());
    assert!(b.dht().get_gossiper(&a.peer_id()).unwrap() < a.dht().get_idx().unwrap());
}

#[tokio::test]
async fn two_peer_responsibility_routing() {
    let mesh = MemMesh::new(MeshRouting::ByDigest);
    let dna = test_dna();
    let (_dir_a, a) = spawn_peer(&mesh, dna.clone(), "alice").await;
    let (_dir_b, b) = spawn_peer(&mesh, dna, "bob").await;

    // the commit dispatches the put to whichever peer is responsible;
    // both peers can then resolve the entry through routed gets
    let even = a.commit("evenNumbers", "124").await.unwrap();
    assert_eq!(a.get(&even).await.unwrap().content, "124");
    assert_eq!(b.get(&even).await.unwrap().content, "124");
}
