//! Shared fixtures: a test application DNA and peers on an in-memory mesh.

use std::fs;
use std::sync::Arc;
use strand_core::agent::Agent;
use strand_core::config::Config;
use strand_core::engine::Engine;
use strand_core::nucleus::NucleusRegistry;
use strand_core::transport::{MemMesh, MemTransport};
use strand_model::dna::{CallingType, Dna, EntryDef, Exposure, FunctionDef, Sharing, Zome};
use strand_model::entry::EntryFormat;

pub const PROFILE_SCHEMA: &str = r#"{
    "title": "Profile",
    "type": "object",
    "properties": {
        "firstName": { "type": "string" },
        "lastName": { "type": "string" }
    },
    "required": ["firstName", "lastName"]
}"#;

const ZOME_CODE: &str = r#"{
    "validators": {
        "evenNumbers": {
            "commit": { "kind": "even_int" },
            "put": { "kind": "even_int" }
        }
    },
    "functions": {
        "addEven": [ { "op": "commit", "entry_type": "evenNumbers", "value": "$arg" } ],
        "addProfile": [ { "op": "commit", "entry_type": "profile", "value": "$arg" } ],
        "appProperty": [ { "op": "property", "name": "$arg" } ]
    }
}"#;

/// The test application: even numbers, schematized profiles, ratings as
/// links, and a private notebook.
pub fn test_dna() -> Dna {
    let mut dna = Dna::new("testApp", 1);
    dna.properties.insert("description".into(), "a test app".into());
    dna.zomes.push(Zome {
        name: "app".into(),
        description: "test zome".into(),
        code_file: "app.rules".into(),
        code_hash: None,
        nucleus_type: "rules".into(),
        entries: vec![
            EntryDef {
                name: "evenNumbers".into(),
                data_format: EntryFormat::String,
                schema: None,
                schema_hash: None,
                sharing: Sharing::Public,
                schema_text: None,
            },
            EntryDef {
                name: "profile".into(),
                data_format: EntryFormat::Json,
                schema: Some("profile.json".into()),
                schema_hash: None,
                sharing: Sharing::Public,
                schema_text: Some(PROFILE_SCHEMA.into()),
            },
            EntryDef {
                name: "rating".into(),
                data_format: EntryFormat::Links,
                schema: None,
                schema_hash: None,
                sharing: Sharing::Public,
                schema_text: None,
            },
            EntryDef {
                name: "privateNotes".into(),
                data_format: EntryFormat::String,
                schema: None,
                schema_hash: None,
                sharing: Sharing::Private,
                schema_text: None,
            },
        ],
        functions: vec![
            FunctionDef {
                name: "addEven".into(),
                calling_type: CallingType::String,
                exposed_to: Exposure::Public,
            },
            FunctionDef {
                name: "addProfile".into(),
                calling_type: CallingType::Json,
                exposed_to: Exposure::Public,
            },
            FunctionDef {
                name: "appProperty".into(),
                calling_type: CallingType::String,
                exposed_to: Exposure::Public,
            },
        ],
        code: ZOME_CODE.into(),
    });
    dna
}

/// Spin up one peer on the mesh and run its genesis.
pub async fn spawn_peer(
    mesh: &Arc<MemMesh>,
    dna: Dna,
    name: &str,
) -> (tempfile::TempDir, Arc<Engine>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let agent = Agent::generate(name);
    let dir = tempfile::tempdir().unwrap();
    let db_dir = dir.path().join("db");
    fs::create_dir_all(&db_dir).unwrap();

    let transport = Arc::new(MemTransport::new(mesh.clone(), agent.peer_id()));
    let engine = Arc::new(
        Engine::new(
            dna,
            agent,
            &db_dir,
            transport,
            NucleusRegistry::with_defaults(),
            Config::default(),
        )
        .unwrap(),
    );
    mesh.register(engine.peer_id(), engine.clone());
    engine.genesis().await.unwrap();
    (dir, engine)
}
