//! strand-core - a peer-to-peer data-integrity engine
//!
//! Each agent authors a local append-only hash-chain of signed, typed
//! entries; public entries and links are published into a validating DHT
//! where every receiving peer re-runs application-defined validation before
//! accepting a record. The action pipeline bridges the two: system-level
//! structural validation, application validation in a pluggable scripting
//! nucleus, local chain mutation, then network dispatch. A gossip loop
//! reconciles DHT state between peers.
//!
//! Start with [`service::Service`] to scaffold or open a chain root, then
//! [`engine::Engine`] for the action surface.

pub mod action;
pub mod agent;
pub mod chain;
pub mod config;
pub mod dht;
pub mod engine;
pub mod error;
pub mod gossip;
pub mod nucleus;
pub mod router;
pub mod schema;
pub mod service;
pub mod transport;

pub use action::{Action, ArgDef, ArgKind, GetLinkOptions};
pub use agent::{Agent, AgentError};
pub use chain::{Chain, ChainError};
pub use config::Config;
pub use dht::{DhtError, DhtRecord, DhtStore, LinkRecord, RecordStatus};
pub use engine::{ActionResponse, Engine, ENGINE_VERSION};
pub use error::CoreError;
pub use gossip::spawn_gossip_loop;
pub use nucleus::{CallData, Host, Nucleus, NucleusError, NucleusRegistry};
pub use schema::{SchemaError, Validator};
pub use service::{Service, ServiceError, TestFixture};
pub use transport::{MemMesh, MemTransport, MeshRouting, MsgReceiver, Transport, TransportError};
