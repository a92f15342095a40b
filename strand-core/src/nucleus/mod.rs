//! The nucleus contract
//!
//! A nucleus is the script host that evaluates application validation and
//! exposed functions for one zome. The engine is agnostic to how a host
//! parses its code: hosts are registered in a [`NucleusRegistry`] keyed by
//! the zome's `nucleus_type`, and everything the engine asks of them goes
//! through the [`Nucleus`] trait. Hosts call back into the engine through
//! the [`Host`] capability surface; those calls look synchronous from the
//! nucleus's point of view, though the engine may suspend on network I/O
//! behind `get`/`get_links`.

pub mod rules;

use async_trait::async_trait;
use std::collections::HashMap;
use strand_model::dna::{CallingType, EntryDef, FunctionDef, Zome};
use strand_model::entry::Entry;
use strand_model::hash::Hash;
use strand_model::header::Header;
use strand_model::msg::{PeerId, TaggedHash};
use thiserror::Error;

/// Errors crossing the nucleus boundary
#[derive(Error, Debug)]
pub enum NucleusError {
    #[error("Unknown nucleus type: {0}")]
    UnknownNucleusType(String),

    #[error("Bad nucleus code: {0}")]
    BadCode(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    /// The host rule produced something other than a boolean verdict;
    /// fatal, distinct from a `false` rejection.
    #[error("Application error: {0}")]
    App(String),

    /// A host capability call failed.
    #[error("Host error: {0}")]
    Host(String),
}

/// A call payload, marshaled per the function's declared calling type:
/// an opaque string for `string` functions, a parsed JSON document for
/// `json` functions. The engine builds the argument and unmarshals the
/// result symmetrically.
#[derive(Clone, Debug, PartialEq)]
pub enum CallData {
    Str(String),
    Json(serde_json::Value),
}

impl CallData {
    /// Marshal an argument string for the given convention. Arguments to
    /// a `json` function must parse.
    pub fn marshal(calling_type: CallingType, args: &str) -> Result<Self, NucleusError> {
        match calling_type {
            CallingType::String => Ok(CallData::Str(args.to_string())),
            CallingType::Json => {
                let value = serde_json::from_str(args)
                    .map_err(|e| NucleusError::App(format!("expecting json args: {e}")))?;
                Ok(CallData::Json(value))
            }
        }
    }

    /// Unmarshal back to the textual form handed to external callers:
    /// the raw string, or the serialized JSON document.
    pub fn unmarshal(&self) -> String {
        match self {
            CallData::Str(s) => s.clone(),
            CallData::Json(v) => v.to_string(),
        }
    }

    /// The payload as text for templating into host operations. A JSON
    /// string argument templates its inner text, not its quoted form.
    pub fn as_text(&self) -> String {
        match self {
            CallData::Str(s) => s.clone(),
            CallData::Json(serde_json::Value::String(s)) => s.clone(),
            CallData::Json(v) => v.to_string(),
        }
    }
}

/// Host-exposed capabilities: what a running nucleus may ask of the engine.
#[async_trait]
pub trait Host: Send + Sync {
    fn app_name(&self) -> String;
    fn dna_hash(&self) -> Hash;
    fn agent_hash(&self) -> Hash;
    fn agent_name(&self) -> String;
    fn peer_id(&self) -> PeerId;
    fn engine_version(&self) -> u32;

    /// Read-only DNA properties, including the reserved `_id`,
    /// `_agent_id` and `_agent_name`.
    fn property(&self, name: &str) -> Result<String, NucleusError>;

    fn debug(&self, msg: &str);

    /// Run the full commit action as if invoked externally.
    async fn commit(&self, entry_type: &str, value: &str) -> Result<Hash, NucleusError>;

    async fn get(&self, hash: &Hash) -> Result<Entry, NucleusError>;

    async fn get_links(
        &self,
        base: &Hash,
        tag: &str,
        load: bool,
    ) -> Result<Vec<TaggedHash>, NucleusError>;

    async fn del(&self, hash: &Hash) -> Result<(), NucleusError>;

    async fn del_link(&self, base: &Hash, target: &Hash, tag: &str) -> Result<(), NucleusError>;
}

/// The polymorphic capability set every script host implements.
///
/// All validators return a verdict: `Ok(false)` is an application
/// rejection, `Err` is a fatal host failure. Sources are base58 peer ids.
#[async_trait]
pub trait Nucleus: Send + Sync {
    fn kind(&self) -> &str;

    /// Runs exactly once, after the DNA and Agent entries are appended.
    /// A `false` verdict aborts chain creation.
    async fn genesis(&self, host: &dyn Host) -> Result<bool, NucleusError>;

    async fn validate_commit(
        &self,
        host: &dyn Host,
        def: &EntryDef,
        entry: &Entry,
        header: &Header,
        sources: &[String],
    ) -> Result<bool, NucleusError>;

    async fn validate_put(
        &self,
        host: &dyn Host,
        def: &EntryDef,
        entry: &Entry,
        header: &Header,
        sources: &[String],
    ) -> Result<bool, NucleusError>;

    async fn validate_del(
        &self,
        host: &dyn Host,
        entry_type: &str,
        hash: &Hash,
        sources: &[String],
    ) -> Result<bool, NucleusError>;

    async fn validate_link(
        &self,
        host: &dyn Host,
        linking_entry_type: &str,
        base: &Hash,
        target: &Hash,
        tag: &str,
        sources: &[String],
    ) -> Result<bool, NucleusError>;

    async fn validate_del_link(
        &self,
        host: &dyn Host,
        base: &Hash,
        target: &Hash,
        tag: &str,
        sources: &[String],
    ) -> Result<bool, NucleusError>;

    /// Invoke a function declared in the DNA. The engine marshals `args`
    /// into [`CallData`] per the declared calling type and unmarshals the
    /// returned payload symmetrically; the host must produce a result in
    /// the same convention.
    async fn call(
        &self,
        host: &dyn Host,
        fn_def: &FunctionDef,
        args: CallData,
    ) -> Result<CallData, NucleusError>;
}

/// Builds a nucleus from zome code.
pub type NucleusFactory =
    Box<dyn Fn(&str) -> Result<Box<dyn Nucleus>, NucleusError> + Send + Sync>;

/// Explicit, per-engine registry of script hosts keyed by `nucleus_type`.
pub struct NucleusRegistry {
    factories: HashMap<String, NucleusFactory>,
}

impl NucleusRegistry {
    /// An empty registry; tests can construct fully isolated engines.
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    /// The default registry with the in-tree `rules` host.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(rules::RULES_NUCLEUS_TYPE, Box::new(|code| rules::RulesNucleus::from_code(code)));
        registry
    }

    pub fn register(&mut self, nucleus_type: impl Into<String>, factory: NucleusFactory) {
        self.factories.insert(nucleus_type.into(), factory);
    }

    /// Instantiate the host for one zome from its code.
    pub fn make(&self, zome: &Zome) -> Result<Box<dyn Nucleus>, NucleusError> {
        let factory = self
            .factories
            .get(&zome.nucleus_type)
            .ok_or_else(|| NucleusError::UnknownNucleusType(zome.nucleus_type.clone()))?;
        factory(&zome.code)
    }
}

impl Default for NucleusRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
