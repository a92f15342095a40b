//! End-to-end action pipeline scenarios on a single-peer mesh.

mod common;

use common::{spawn_peer, test_dna};
use strand_core::action::GetLinkOptions;
use strand_core::error::CoreError;
use strand_core::nucleus::Host;
use strand_core::transport::{MemMesh, MeshRouting};
use strand_model::entry::{DEL_ENTRY_TYPE, DNA_ENTRY_TYPE};
use strand_model::hash::Hash;

#[tokio::test]
async fn genesis_establishes_chain_and_shard() {
    let mesh = MemMesh::new(MeshRouting::SelfOnly);
    let (_dir, engine) = spawn_peer(&mesh, test_dna(), "zippy").await;

    let chain = engine.chain().read().await;
    assert_eq!(chain.len(), 2);
    assert_eq!(chain.headers()[0].entry_type, DNA_ENTRY_TYPE);
    chain.validate().unwrap();
    drop(chain);

    // the three genesis puts: DNA, Agent, Key
    assert_eq!(engine.dht().get_idx().unwrap(), 3);
    let dna_hash = engine.dna_entry_hash().unwrap();
    let agent_hash = engine.agent_entry_hash().unwrap();
    assert!(engine.dht().exists(&dna_hash).unwrap());
    assert!(engine.dht().exists(&agent_hash).unwrap());

    // genesis refuses to run twice
    assert!(matches!(engine.genesis().await, Err(CoreError::ChainAlreadyStarted)));
}

#[tokio::test]
async fn s1_even_commit_accepted() {
    let mesh = MemMesh::new(MeshRouting::SelfOnly);
    let (_dir, engine) = spawn_peer(&mesh, test_dna(), "zippy").await;

    let hash = engine.commit("evenNumbers", "2").await.unwrap();

    let chain = engine.chain().read().await;
    assert_eq!(chain.len(), 3);
    let (_, top) = chain.top().unwrap();
    assert_eq!(top.entry_type, "evenNumbers");
    drop(chain);

    // the put request landed on the responsible peer (self)
    assert!(engine.dht().exists(&hash).unwrap());
    assert_eq!(engine.dht().get_idx().unwrap(), 4);
}

#[tokio::test]
async fn s2_odd_commit_rejected() {
    let mesh = MemMesh::new(MeshRouting::SelfOnly);
    let (_dir, engine) = spawn_peer(&mesh, test_dna(), "zippy").await;

    let err = engine.commit("evenNumbers", "5").await.unwrap_err();
    match &err {
        CoreError::ValidationFailed(reason) => assert_eq!(reason, "Invalid entry: 5"),
        other => panic!("wrong error: {other}"),
    }

    assert_eq!(engine.chain().read().await.len(), 2);
    assert_eq!(engine.dht().get_idx().unwrap(), 3);
}

#[tokio::test]
async fn s3_profile_schema_enforced() {
    let mesh = MemMesh::new(MeshRouting::SelfOnly);
    let (_dir, engine) = spawn_peer(&mesh, test_dna(), "zippy").await;

    let err = engine.commit("profile", r#"{"firstName":"Eric"}"#).await.unwrap_err();
    match &err {
        CoreError::ValidationFailed(reason) => assert_eq!(
            reason,
            "validator profile.json failed: object property 'lastName' is required"
        ),
        other => panic!("wrong error: {other}"),
    }
    assert_eq!(engine.chain().read().await.len(), 2);
}

async fn commit_rating(
    engine: &strand_core::engine::Engine,
) -> (Hash /* profile */, Hash /* even */) {
    let profile = engine
        .commit("profile", r#"{"firstName":"Zippy","lastName":"Pinhead"}"#)
        .await
        .unwrap();
    let even = engine.commit("evenNumbers", "124").await.unwrap();
    let links = format!(
        r#"{{"Links":[{{"Base":"{even}","Link":"{profile}","Tag":"4stars"}}]}}"#
    );
    engine.commit("rating", &links).await.unwrap();
    (profile, even)
}

#[tokio::test]
async fn s4_links_flow() {
    let mesh = MemMesh::new(MeshRouting::SelfOnly);
    let (_dir, engine) = spawn_peer(&mesh, test_dna(), "zippy").await;
    let (profile, even) = commit_rating(&engine).await;

    let links = engine.get_link(&even, "4stars", GetLinkOptions::default()).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].h, profile);
    assert_eq!(links[0].t, "4stars");
    assert!(links[0].e.is_none());

    // a tag that matches nothing
    assert!(engine.get_link(&even, "1star", GetLinkOptions::default()).await.unwrap().is_empty());

    // empty tag matches all tags
    let all = engine.get_link(&even, "", GetLinkOptions::default()).await.unwrap();
    assert_eq!(all.len(), 1);

    // load inlines the target entry's content
    let loaded = engine.get_link(&even, "4stars", GetLinkOptions { load: true }).await.unwrap();
    assert_eq!(
        loaded[0].e.as_deref(),
        Some(r#"{"firstName":"Zippy","lastName":"Pinhead"}"#)
    );
}

#[tokio::test]
async fn s5_deletion() {
    let mesh = MemMesh::new(MeshRouting::SelfOnly);
    let (_dir, engine) = spawn_peer(&mesh, test_dna(), "zippy").await;
    let (_profile, even) = commit_rating(&engine).await;
    let len_before = engine.chain().read().await.len();

    engine.del(&even).await.unwrap();

    // the deletion is chain provenance
    let chain = engine.chain().read().await;
    assert_eq!(chain.len(), len_before + 1);
    let (_, top) = chain.top().unwrap();
    assert_eq!(top.entry_type, DEL_ENTRY_TYPE);
    drop(chain);

    // the record transitioned and the default lookup hides it
    use strand_core::dht::RecordStatus;
    assert_eq!(engine.dht().get(&even).unwrap().status, RecordStatus::Deleted);
    assert!(matches!(engine.get(&even).await, Err(CoreError::HashNotFound)));

    // incoming links stay until explicitly deleted
    let links = engine.get_link(&even, "4stars", GetLinkOptions::default()).await.unwrap();
    assert_eq!(links.len(), 1);
}

#[tokio::test]
async fn del_link_transitions_link() {
    let mesh = MemMesh::new(MeshRouting::SelfOnly);
    let (_dir, engine) = spawn_peer(&mesh, test_dna(), "zippy").await;
    let (profile, even) = commit_rating(&engine).await;

    engine.del_link(&even, &profile, "4stars").await.unwrap();
    assert!(engine.get_link(&even, "4stars", GetLinkOptions::default()).await.unwrap().is_empty());

    // deleting the same link again is NotFound at the handler
    assert!(engine.del_link(&even, &profile, "4stars").await.is_err());
}

#[tokio::test]
async fn duplicate_link_request_is_a_no_op() {
    use strand_model::msg::{Message, MsgBody, MsgKind};

    let mesh = MemMesh::new(MeshRouting::SelfOnly);
    let (_dir, engine) = spawn_peer(&mesh, test_dna(), "zippy").await;

    let profile = engine
        .commit("profile", r#"{"firstName":"Zippy","lastName":"Pinhead"}"#)
        .await
        .unwrap();
    let even = engine.commit("evenNumbers", "124").await.unwrap();
    let links = format!(
        r#"{{"Links":[{{"Base":"{even}","Link":"{profile}","Tag":"4stars"}}]}}"#
    );
    let rating = engine.commit("rating", &links).await.unwrap();

    let idx = engine.dht().get_idx().unwrap();
    let count = engine
        .get_link(&even, "", GetLinkOptions::default())
        .await
        .unwrap()
        .len();

    // replay the exact link request the commit already dispatched
    let replay = Message::new(
        MsgKind::Link,
        engine.peer_id(),
        MsgBody::LinkReq { base: even.clone(), links: rating },
    );
    let reply = engine.receive_inner(replay).await;
    assert!(matches!(reply.body, MsgBody::Ok(_)));

    assert_eq!(engine.dht().get_idx().unwrap(), idx);
    assert_eq!(
        engine.get_link(&even, "", GetLinkOptions::default()).await.unwrap().len(),
        count
    );
}

#[tokio::test]
async fn private_entries_stay_off_the_dht() {
    let mesh = MemMesh::new(MeshRouting::SelfOnly);
    let (_dir, engine) = spawn_peer(&mesh, test_dna(), "zippy").await;

    let hash = engine.commit("privateNotes", "remember the milk").await.unwrap();
    assert_eq!(engine.chain().read().await.len(), 3);
    assert!(!engine.dht().exists(&hash).unwrap());
    assert_eq!(engine.dht().get_idx().unwrap(), 3);
}

#[tokio::test]
async fn exposed_function_commits_through_the_pipeline() {
    let mesh = MemMesh::new(MeshRouting::SelfOnly);
    let (_dir, engine) = spawn_peer(&mesh, test_dna(), "zippy").await;

    let result = engine.call("app", "addEven", "124").await.unwrap();
    let hash = Hash::from_b58(&result).unwrap();
    assert!(engine.dht().exists(&hash).unwrap());
    assert_eq!(engine.chain().read().await.len(), 3);

    // the full pipeline runs: an odd argument is rejected
    let err = engine.call("app", "addEven", "7").await.unwrap_err();
    assert!(matches!(err, CoreError::ValidationFailed(_)));

    // unknown function
    assert!(engine.call("app", "subtract", "1").await.is_err());
}

#[tokio::test]
async fn json_calling_convention_round_trip() {
    let mesh = MemMesh::new(MeshRouting::SelfOnly);
    let (_dir, engine) = spawn_peer(&mesh, test_dna(), "zippy").await;

    let profile = r#"{"firstName":"Zippy","lastName":"Pinhead"}"#;
    let result = engine.call("app", "addProfile", profile).await.unwrap();

    // the result comes back marshaled as a json document: here the
    // committed entry hash as a json string
    let value: serde_json::Value = serde_json::from_str(&result).unwrap();
    let hash = Hash::from_b58(value.as_str().expect("json string result")).unwrap();
    assert!(engine.dht().exists(&hash).unwrap());
    assert_eq!(engine.get(&hash).await.unwrap().content, profile);

    // arguments to a json function must parse; nothing mutates otherwise
    let err = engine.call("app", "addProfile", "{not json").await.unwrap_err();
    assert!(matches!(err, CoreError::ValidationFailed(_)));
    assert_eq!(engine.chain().read().await.len(), 3);
}

#[tokio::test]
async fn host_properties_and_constants() {
    let mesh = MemMesh::new(MeshRouting::SelfOnly);
    let (_dir, engine) = spawn_peer(&mesh, test_dna(), "zippy").await;

    assert_eq!(engine.call("app", "appProperty", "description").await.unwrap(), "a test app");
    assert_eq!(Host::property(&*engine, "_agent_name").unwrap(), "zippy");
    assert_eq!(
        Host::property(&*engine, "_id").unwrap(),
        engine.dna_entry_hash().unwrap().to_b58()
    );
    assert!(Host::property(&*engine, "nonsense").is_err());
}

#[tokio::test]
async fn unknown_entry_type_is_an_input_error() {
    let mesh = MemMesh::new(MeshRouting::SelfOnly);
    let (_dir, engine) = spawn_peer(&mesh, test_dna(), "zippy").await;
    assert!(matches!(
        engine.commit("noSuchType", "x").await,
        Err(CoreError::Dna(_))
    ));
}
