//! The engine - one peer's running instance of an application
//!
//! Binds the chain, the DHT shard, the nucleus registry, and the transport
//! into the action pipeline: every mutation runs system validation, then
//! application validation in the zome's nucleus, then the local chain
//! mutation, then network dispatch. The engine is also the [`Host`] the
//! nuclei call back into.
//!
//! Concurrency: the chain is exclusive-writer many-reader behind a
//! `tokio::sync::RwLock` with short critical sections; nucleus validation
//! runs outside any lock and `add_entry`'s optimistic position gate catches
//! interleavings. The DHT store serializes its own write transactions.

use crate::action::{Action, GetLinkOptions};
use crate::agent::Agent;
use crate::chain::Chain;
use crate::config::Config;
use crate::dht::{DhtStore, RecordStatus};
use crate::error::CoreError;
use crate::nucleus::{CallData, Host, NucleusError, NucleusRegistry};
use crate::schema;
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use strand_model::dna::{Dna, DnaFileFormat, Sharing};
use strand_model::entry::{
    parse_links, DelContent, Entry, EntryFormat, AGENT_ENTRY_TYPE, DNA_ENTRY_TYPE, KEY_ENTRY_TYPE,
};
use strand_model::hash::{Hash, HashSpec};
use strand_model::msg::{Message, MsgBody, MsgKind, PeerId, TaggedHash};
use tokio::sync::RwLock;
use tracing::debug;

/// Engine version gating `Dna::requires_version`.
pub const ENGINE_VERSION: u32 = 1;

/// The body of the `%agent` genesis entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentContent {
    #[serde(rename = "Identity")]
    pub identity: String,
    #[serde(rename = "Key")]
    pub key: String,
}

/// What genesis pinned down for this instance.
#[derive(Clone, Debug)]
struct GenesisInfo {
    dna_hash: Hash,
    agent_hash: Hash,
}

/// The result of locally running an action.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionResponse {
    Hash(Hash),
    Entry(Entry),
    Links(Vec<TaggedHash>),
    Ok,
}

/// One peer's running application instance.
pub struct Engine {
    pub(crate) dna: Dna,
    pub(crate) agent: Agent,
    pub(crate) spec: HashSpec,
    pub(crate) chain: RwLock<Chain>,
    pub(crate) dht: DhtStore,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) registry: NucleusRegistry,
    pub(crate) config: Config,
    genesis_info: StdRwLock<Option<GenesisInfo>>,
    /// Sticky corruption message; set once, never cleared.
    poisoned: StdMutex<Option<String>>,
}

impl Engine {
    /// Open an engine over the databases in `db_dir`. Does not create the
    /// genesis entries; see [`Engine::genesis`].
    pub fn new(
        dna: Dna,
        agent: Agent,
        db_dir: impl AsRef<Path>,
        transport: Arc<dyn Transport>,
        registry: NucleusRegistry,
        config: Config,
    ) -> Result<Self, CoreError> {
        dna.check(ENGINE_VERSION)?;
        let spec = dna.hash_type;
        let db_dir = db_dir.as_ref();
        let chain = Chain::open(spec, db_dir.join("chain.db"))?;
        let dht = DhtStore::open(db_dir.join("dht.db"), spec)?;

        let genesis_info = match (chain.dna_hash().cloned(), chain.top_of_type(AGENT_ENTRY_TYPE)) {
            (Some(dna_hash), Some((_, agent_header))) => Some(GenesisInfo {
                dna_hash,
                agent_hash: agent_header.entry_hash.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            dna,
            agent,
            spec,
            chain: RwLock::new(chain),
            dht,
            transport,
            registry,
            config,
            genesis_info: StdRwLock::new(genesis_info),
            poisoned: StdMutex::new(None),
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.transport.self_id()
    }

    pub fn dht(&self) -> &DhtStore {
        &self.dht
    }

    pub fn chain(&self) -> &RwLock<Chain> {
        &self.chain
    }

    pub fn dna(&self) -> &Dna {
        &self.dna
    }

    /// Whether genesis has run on this root.
    pub fn started(&self) -> bool {
        self.genesis_info.read().unwrap().is_some()
    }

    pub fn dna_entry_hash(&self) -> Option<Hash> {
        self.genesis_info.read().unwrap().as_ref().map(|g| g.dna_hash.clone())
    }

    pub fn agent_entry_hash(&self) -> Option<Hash> {
        self.genesis_info.read().unwrap().as_ref().map(|g| g.agent_hash.clone())
    }

    /// The virtual key record: the agent's public key as a `%key` entry.
    pub(crate) fn key_entry(&self) -> Entry {
        Entry::new(KEY_ENTRY_TYPE, EntryFormat::String, self.agent.peer_id().0)
    }

    pub(crate) fn key_entry_hash(&self) -> Result<Hash, CoreError> {
        Ok(self.key_entry().sum(&self.spec)?)
    }

    // ---------------------------------------------------------------
    // genesis

    /// Establish the chain: append the DNA and Agent entries, run every
    /// zome's `genesis()`, and seed the local shard with the three genesis
    /// puts (DNA, Agent, Key). Returns the DNA entry hash.
    pub async fn genesis(&self) -> Result<Hash, CoreError> {
        if self.started() {
            return Err(CoreError::ChainAlreadyStarted);
        }

        let dna_body = serde_json::to_string(&self.dna)
            .map_err(|e| CoreError::ValidationFailed(format!("unserializable DNA: {e}")))?;
        let dna_entry = Entry::new(DNA_ENTRY_TYPE, EntryFormat::Json, dna_body);
        let (dna_hash, _) = self.append_raw(&dna_entry).await?;

        let agent_body = serde_json::to_string(&AgentContent {
            identity: self.agent.name().to_string(),
            key: self.agent.peer_id().0,
        })
        .map_err(|e| CoreError::ValidationFailed(format!("unserializable agent: {e}")))?;
        let agent_entry = Entry::new(AGENT_ENTRY_TYPE, EntryFormat::Json, agent_body);
        let (agent_hash, _) = self.append_raw(&agent_entry).await?;

        *self.genesis_info.write().unwrap() = Some(GenesisInfo {
            dna_hash: dna_hash.clone(),
            agent_hash: agent_hash.clone(),
        });

        // each zome gets exactly one genesis run; a false verdict aborts
        for zome in &self.dna.zomes {
            let nucleus = self.registry.make(zome).map_err(CoreError::from)?;
            let ok = self.run_nucleus(nucleus.genesis(self)).await?;
            if !ok {
                *self.genesis_info.write().unwrap() = None;
                return Err(CoreError::ValidationFailed(format!(
                    "genesis failed in zome '{}'",
                    zome.name
                )));
            }
        }

        let key_entry = self.key_entry();
        let key_hash = key_entry.sum(&self.spec)?;
        let me = self.peer_id();
        let seeds = [
            (dna_hash.clone(), dna_entry, DNA_ENTRY_TYPE),
            (agent_hash, agent_entry, AGENT_ENTRY_TYPE),
            (key_hash, key_entry, KEY_ENTRY_TYPE),
        ];
        for (hash, entry, entry_type) in seeds {
            let msg = Message::new(MsgKind::Put, me.clone(), MsgBody::PutReq { h: hash.clone() });
            let idx = self.dht.record_change(&msg)?;
            self.dht.put(&hash, entry, entry_type, &me, idx)?;
        }
        debug!(peer = %me, dna = %dna_hash, "genesis complete");
        Ok(dna_hash)
    }

    /// Append a system entry without validation, in one critical section.
    async fn append_raw(&self, entry: &Entry) -> Result<(Hash, Hash), CoreError> {
        let mut chain = self.chain.write().await;
        let (pos, header_hash, header) =
            chain.prepare_header(Utc::now(), entry, self.agent.signing_key())?;
        let entry_hash = header.entry_hash.clone();
        chain
            .add_entry(pos, header_hash.clone(), header, entry.clone())
            .map_err(|e| self.note(e.into()))?;
        Ok((entry_hash, header_hash))
    }

    // ---------------------------------------------------------------
    // the action pipeline, locally initiated

    /// Run a locally initiated action.
    pub async fn do_action(&self, action: Action) -> Result<ActionResponse, CoreError> {
        match action {
            Action::Commit { entry_type, content } => {
                self.commit(&entry_type, &content).await.map(ActionResponse::Hash)
            }
            Action::Get { hash } => self.get(&hash).await.map(ActionResponse::Entry),
            Action::Del { hash } => self.del(&hash).await.map(|()| ActionResponse::Ok),
            Action::GetLink { base, tag, options } => {
                self.get_link(&base, &tag, options).await.map(ActionResponse::Links)
            }
            Action::DelLink { base, target, tag } => self
                .del_link(&base, &target, &tag)
                .await
                .map(|()| ActionResponse::Ok),
            Action::Put { .. } => Err(CoreError::NonCallableAction("put")),
            Action::Link { .. } => Err(CoreError::NonCallableAction("link")),
        }
    }

    /// Commit an entry: structural validation, nucleus commit validation,
    /// chain append, then network dispatch for Links and Public types.
    pub async fn commit(&self, entry_type: &str, content: &str) -> Result<Hash, CoreError> {
        self.check_poisoned()?;
        if !self.started() {
            return Err(CoreError::NotStarted);
        }
        let (zome, def) = self.dna.entry_def(entry_type)?;
        let entry = Entry::new(entry_type, def.data_format, content);

        let (pos, header_hash, header) = {
            let chain = self.chain.read().await;
            chain.prepare_header(Utc::now(), &entry, self.agent.signing_key())?
        };

        schema::sys_validate_entry(def, &entry)?;

        let nucleus = self.registry.make(zome).map_err(CoreError::from)?;
        let sources = vec![self.peer_id().0];
        let ok = self
            .run_nucleus(nucleus.validate_commit(self, def, &entry, &header, &sources))
            .await?;
        if !ok {
            return Err(CoreError::ValidationFailed(format!("Invalid entry: {}", entry.content)));
        }

        {
            let mut chain = self.chain.write().await;
            chain
                .add_entry(pos, header_hash, header.clone(), entry.clone())
                .map_err(|e| self.note(e.into()))?;
        }
        let entry_hash = header.entry_hash;
        debug!(entry_type, hash = %entry_hash, "committed");

        if def.data_format == EntryFormat::Links {
            let links = parse_links(&entry.content)?;
            // one request per distinct base, keyed on its exact byte form
            let mut seen: HashSet<Vec<u8>> = HashSet::new();
            for link in &links.links {
                let base = Hash::from_b58(&link.base)?;
                if !seen.insert(base.as_bytes().to_vec()) {
                    continue;
                }
                let to = self.transport.peer_for(&base);
                let body = MsgBody::LinkReq { base, links: entry_hash.clone() };
                self.send_msg(&to, Message::new(MsgKind::Link, self.peer_id(), body)).await?;
            }
        } else if def.sharing == Sharing::Public {
            let to = self.transport.peer_for(&entry_hash);
            let body = MsgBody::PutReq { h: entry_hash.clone() };
            self.send_msg(&to, Message::new(MsgKind::Put, self.peer_id(), body)).await?;
        }

        Ok(entry_hash)
    }

    /// Look up an entry by hash, wherever it lives. Deleted records are
    /// reported as not found.
    pub async fn get(&self, hash: &Hash) -> Result<Entry, CoreError> {
        let to = self.transport.peer_for(hash);
        let result = if to == self.peer_id() {
            match self.dht.get(hash) {
                Ok(record) => match record.status {
                    RecordStatus::Live | RecordStatus::Modified => Ok(record.entry),
                    RecordStatus::Deleted => Err(CoreError::HashDeleted),
                },
                Err(crate::dht::DhtError::NotFound) => Err(CoreError::HashNotFound),
                Err(e) => Err(e.into()),
            }
        } else {
            let body = MsgBody::GetReq { h: hash.clone() };
            let reply = self.send_msg(&to, Message::new(MsgKind::Get, self.peer_id(), body)).await?;
            match reply.body {
                MsgBody::GetResponse { entry, .. } => Ok(entry),
                other => Err(CoreError::ProtocolMismatch(format!(
                    "unexpected get response body: {other:?}"
                ))),
            }
        };
        // the default API folds Deleted into NotFound
        result.map_err(|e| match e {
            CoreError::HashDeleted => CoreError::HashNotFound,
            e => e,
        })
    }

    /// Delete an entry: commit a `%del` marker to the chain so the
    /// deletion is provenance, then ask the responsible peer to transition
    /// the record.
    pub async fn del(&self, hash: &Hash) -> Result<(), CoreError> {
        self.check_poisoned()?;
        if !self.started() {
            return Err(CoreError::NotStarted);
        }
        let del_entry = DelContent::new(hash).to_entry();
        self.append_raw(&del_entry).await?;

        let to = self.transport.peer_for(hash);
        let body = MsgBody::DelReq { h: hash.clone() };
        self.send_msg(&to, Message::new(MsgKind::Del, self.peer_id(), body)).await?;
        Ok(())
    }

    /// Query the Live links on a base; empty tag matches all. With
    /// `options.load`, each target entry is fetched and inlined.
    pub async fn get_link(
        &self,
        base: &Hash,
        tag: &str,
        options: GetLinkOptions,
    ) -> Result<Vec<TaggedHash>, CoreError> {
        let to = self.transport.peer_for(base);
        let mut links = if to == self.peer_id() {
            self.dht
                .get_links(base, tag)?
                .into_iter()
                .map(|l| TaggedHash { h: l.target, e: None, t: l.tag })
                .collect()
        } else {
            let body = MsgBody::LinkQuery { base: base.clone(), tag: tag.to_string() };
            let reply =
                self.send_msg(&to, Message::new(MsgKind::GetLink, self.peer_id(), body)).await?;
            match reply.body {
                MsgBody::LinkQueryResp { links } => links,
                other => {
                    return Err(CoreError::ProtocolMismatch(format!(
                        "unexpected getlink response body: {other:?}"
                    )))
                }
            }
        };

        if options.load {
            for link in &mut links {
                if let Ok(entry) = self.get(&link.h).await {
                    link.e = Some(entry.content);
                }
            }
        }
        Ok(links)
    }

    /// Ask the base's responsible peer to transition a link to Deleted.
    pub async fn del_link(&self, base: &Hash, target: &Hash, tag: &str) -> Result<(), CoreError> {
        self.check_poisoned()?;
        if !self.started() {
            return Err(CoreError::NotStarted);
        }
        let to = self.transport.peer_for(base);
        let body = MsgBody::DelLinkReq {
            base: base.clone(),
            link: target.clone(),
            tag: tag.to_string(),
        };
        self.send_msg(&to, Message::new(MsgKind::DelLink, self.peer_id(), body)).await?;
        Ok(())
    }

    /// Invoke a function a zome exposes. Arguments are marshaled into the
    /// function's declared calling convention (`string` passes the text
    /// through, `json` parses it into a document) and the result is
    /// unmarshaled symmetrically.
    pub async fn call(&self, zome_name: &str, function: &str, args: &str) -> Result<String, CoreError> {
        if !self.started() {
            return Err(CoreError::NotStarted);
        }
        let (zome, fn_def) = self.dna.function_def(zome_name, function)?;
        let payload = CallData::marshal(fn_def.calling_type, args).map_err(CoreError::from)?;
        let nucleus = self.registry.make(zome).map_err(CoreError::from)?;
        let result = self.run_nucleus(nucleus.call(self, fn_def, payload)).await?;
        Ok(result.unmarshal())
    }

    /// Walk the whole chain and recompute every hash; corruption poisons
    /// the instance.
    pub async fn validate_chain(&self) -> Result<(), CoreError> {
        let chain = self.chain.read().await;
        chain.validate().map_err(|e| self.note(e.into()))
    }

    // ---------------------------------------------------------------
    // plumbing

    /// Run a nucleus future, converting panics into validation failures so
    /// they never escape the engine.
    pub(crate) async fn run_nucleus<T>(
        &self,
        fut: impl Future<Output = Result<T, NucleusError>>,
    ) -> Result<T, CoreError> {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result.map_err(CoreError::from),
            Err(_) => Err(CoreError::ValidationFailed("nucleus panicked".into())),
        }
    }

    /// Send a request and await the reply: self-sends bypass the network,
    /// transient failures retry with capped exponential backoff, error
    /// replies map back into the local taxonomy.
    pub(crate) async fn send_msg(&self, to: &PeerId, msg: Message) -> Result<Message, CoreError> {
        if *to == self.peer_id() {
            // bypass the network; the boxed trait call also keeps the
            // send/receive recursion finite
            let reply = crate::transport::MsgReceiver::receive(self, msg).await;
            return Self::unwrap_reply(reply);
        }

        let mut delay = self.config.retry_base();
        let mut attempt: u32 = 0;
        loop {
            let outcome =
                tokio::time::timeout(self.config.send_timeout(), self.transport.send(to, msg.clone()))
                    .await;
            let err = match outcome {
                Ok(Ok(reply)) => return Self::unwrap_reply(reply),
                Ok(Err(e)) if e.is_transient() => e,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => TransportError::Timeout(to.clone()),
            };
            attempt += 1;
            if attempt > self.config.max_retries {
                return Err(CoreError::ValidationFailed(format!("network: {err}")));
            }
            debug!(peer = %to, attempt, "transient send failure: {err}; retrying");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.config.retry_cap());
        }
    }

    fn unwrap_reply(reply: Message) -> Result<Message, CoreError> {
        if reply.kind == MsgKind::ErrorResponse {
            let reason = match reply.body {
                MsgBody::Err(reason) => reason,
                other => format!("malformed error response: {other:?}"),
            };
            return Err(match reason.as_str() {
                "hash not found" => CoreError::HashNotFound,
                "hash deleted" => CoreError::HashDeleted,
                _ => CoreError::Remote(reason),
            });
        }
        Ok(reply)
    }

    pub(crate) fn check_poisoned(&self) -> Result<(), CoreError> {
        match self.poisoned.lock().unwrap().as_ref() {
            Some(msg) => Err(CoreError::Corrupt(msg.clone())),
            None => Ok(()),
        }
    }

    /// Make corruption sticky; passes the error through unchanged.
    pub(crate) fn note(&self, err: CoreError) -> CoreError {
        if let Some(msg) = err.corruption() {
            let mut poisoned = self.poisoned.lock().unwrap();
            if poisoned.is_none() {
                tracing::error!("instance poisoned: {msg}");
                *poisoned = Some(msg);
            }
        }
        err
    }

    /// The sources list handed to nuclei: base58 peer ids.
    pub(crate) fn sources_of(&self, from: &PeerId) -> Vec<String> {
        vec![from.0.clone()]
    }
}

#[async_trait]
impl Host for Engine {
    fn app_name(&self) -> String {
        self.dna.name.clone()
    }

    fn dna_hash(&self) -> Hash {
        self.dna_entry_hash().unwrap_or_else(Hash::null)
    }

    fn agent_hash(&self) -> Hash {
        self.agent_entry_hash().unwrap_or_else(Hash::null)
    }

    fn agent_name(&self) -> String {
        self.agent.name().to_string()
    }

    fn peer_id(&self) -> PeerId {
        self.transport.self_id()
    }

    fn engine_version(&self) -> u32 {
        ENGINE_VERSION
    }

    fn property(&self, name: &str) -> Result<String, NucleusError> {
        match name {
            strand_model::dna::ID_PROPERTY => {
                Ok(self.dna_entry_hash().unwrap_or_else(Hash::null).to_b58())
            }
            strand_model::dna::AGENT_ID_PROPERTY => {
                Ok(self.agent_entry_hash().unwrap_or_else(Hash::null).to_b58())
            }
            strand_model::dna::AGENT_NAME_PROPERTY => Ok(self.agent.name().to_string()),
            other => self
                .dna
                .property(other)
                .map(String::from)
                .ok_or_else(|| NucleusError::UnknownProperty(other.to_string())),
        }
    }

    fn debug(&self, msg: &str) {
        if self.config.debug_log {
            debug!(target: "strand::app", "{msg}");
        }
    }

    async fn commit(&self, entry_type: &str, value: &str) -> Result<Hash, NucleusError> {
        Engine::commit(self, entry_type, value)
            .await
            .map_err(|e| NucleusError::Host(e.to_string()))
    }

    async fn get(&self, hash: &Hash) -> Result<Entry, NucleusError> {
        Engine::get(self, hash).await.map_err(|e| NucleusError::Host(e.to_string()))
    }

    async fn get_links(
        &self,
        base: &Hash,
        tag: &str,
        load: bool,
    ) -> Result<Vec<TaggedHash>, NucleusError> {
        Engine::get_link(self, base, tag, GetLinkOptions { load })
            .await
            .map_err(|e| NucleusError::Host(e.to_string()))
    }

    async fn del(&self, hash: &Hash) -> Result<(), NucleusError> {
        Engine::del(self, hash).await.map_err(|e| NucleusError::Host(e.to_string()))
    }

    async fn del_link(&self, base: &Hash, target: &Hash, tag: &str) -> Result<(), NucleusError> {
        Engine::del_link(self, base, target, tag)
            .await
            .map_err(|e| NucleusError::Host(e.to_string()))
    }
}

/// Export the DNA in a human-readable file format.
pub fn encode_dna(dna: &Dna, format: DnaFileFormat) -> Result<String, CoreError> {
    Ok(dna.to_file(format)?)
}
