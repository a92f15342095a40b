//! The `rules` nucleus - the in-tree reference host
//!
//! Zome code for this host is a declarative JSON document: per-entry-type
//! validation predicates plus named function programs over host operations.
//! It exists to exercise the whole nucleus contract without embedding a
//! language VM; real script runtimes register in the same registry.
//!
//! ```json
//! {
//!   "genesis": true,
//!   "validators": {
//!     "evenNumbers": { "commit": { "kind": "even_int" } }
//!   },
//!   "functions": {
//!     "addEven": [ { "op": "commit", "entry_type": "evenNumbers", "value": "$arg" } ]
//!   }
//! }
//! ```

use super::{CallData, Host, Nucleus, NucleusError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use strand_model::dna::{CallingType, EntryDef, FunctionDef};
use strand_model::entry::Entry;
use strand_model::hash::Hash;
use strand_model::header::Header;

pub const RULES_NUCLEUS_TYPE: &str = "rules";

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct RulesDoc {
    #[serde(default = "default_true")]
    genesis: bool,
    #[serde(default)]
    validators: BTreeMap<String, TypeRules>,
    /// Predicate over the tag of a link being deleted; links carry no
    /// entry type of their own at deletion time.
    #[serde(default)]
    del_link: Option<Predicate>,
    #[serde(default)]
    functions: BTreeMap<String, Vec<OpStep>>,
}

// empty zome code accepts everything; `genesis` must still be true
impl Default for RulesDoc {
    fn default() -> Self {
        Self {
            genesis: true,
            validators: BTreeMap::new(),
            del_link: None,
            functions: BTreeMap::new(),
        }
    }
}

/// Per-phase predicates for one entry type. Missing phases accept.
#[derive(Deserialize, Default, Clone)]
#[serde(default)]
struct TypeRules {
    commit: Option<Predicate>,
    put: Option<Predicate>,
    del: Option<Predicate>,
    link: Option<Predicate>,
}

/// A validation predicate over a string payload: the entry content for
/// commit/put, the target hash for del, the tag for link/del-link.
#[derive(Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Predicate {
    Any,
    Never,
    EvenInt,
    OddInt,
    NonEmpty,
    RequireFields { fields: Vec<String> },
    Equals { value: String },
    /// Simulates a host whose rule evaluation blows up: a fatal
    /// application error, distinct from a `false` verdict.
    Fail { message: String },
}

impl Predicate {
    fn eval(&self, payload: &str) -> Result<bool, NucleusError> {
        match self {
            Predicate::Any => Ok(true),
            Predicate::Never => Ok(false),
            Predicate::EvenInt => Ok(payload.trim().parse::<i64>().map(|n| n % 2 == 0).unwrap_or(false)),
            Predicate::OddInt => Ok(payload.trim().parse::<i64>().map(|n| n % 2 != 0).unwrap_or(false)),
            Predicate::NonEmpty => Ok(!payload.trim().is_empty()),
            Predicate::RequireFields { fields } => {
                let value: serde_json::Value = match serde_json::from_str(payload) {
                    Ok(v) => v,
                    Err(_) => return Ok(false),
                };
                let Some(obj) = value.as_object() else { return Ok(false) };
                Ok(fields.iter().all(|f| obj.contains_key(f)))
            }
            Predicate::Equals { value } => Ok(payload == value),
            Predicate::Fail { message } => Err(NucleusError::App(message.clone())),
        }
    }
}

/// One step of a function program. `$arg` substitutes the call argument,
/// `$prev` the previous step's result.
#[derive(Deserialize, Clone)]
#[serde(tag = "op", rename_all = "snake_case")]
enum OpStep {
    Commit { entry_type: String, value: String },
    Get { hash: String },
    GetLinks { base: String, tag: String, #[serde(default)] load: bool },
    Del { hash: String },
    DelLink { base: String, link: String, tag: String },
    Property { name: String },
    Debug { msg: String },
}

fn subst(template: &str, arg: &str, prev: &str) -> String {
    template.replace("$arg", arg).replace("$prev", prev)
}

fn parse_hash(s: &str) -> Result<Hash, NucleusError> {
    Hash::from_b58(s).map_err(|e| NucleusError::Host(e.to_string()))
}

/// Reference nucleus over a parsed rules document.
pub struct RulesNucleus {
    doc: RulesDoc,
}

impl RulesNucleus {
    /// Parse zome code; empty code means "accept everything, no functions".
    pub fn from_code(code: &str) -> Result<Box<dyn Nucleus>, NucleusError> {
        let doc = if code.trim().is_empty() {
            RulesDoc::default()
        } else {
            serde_json::from_str(code).map_err(|e| NucleusError::BadCode(e.to_string()))?
        };
        Ok(Box::new(Self { doc }))
    }

    fn rules_for(&self, entry_type: &str) -> TypeRules {
        self.doc.validators.get(entry_type).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Nucleus for RulesNucleus {
    fn kind(&self) -> &str {
        RULES_NUCLEUS_TYPE
    }

    async fn genesis(&self, _host: &dyn Host) -> Result<bool, NucleusError> {
        Ok(self.doc.genesis)
    }

    async fn validate_commit(
        &self,
        _host: &dyn Host,
        def: &EntryDef,
        entry: &Entry,
        _header: &Header,
        _sources: &[String],
    ) -> Result<bool, NucleusError> {
        match self.rules_for(&def.name).commit {
            Some(p) => p.eval(&entry.content),
            None => Ok(true),
        }
    }

    async fn validate_put(
        &self,
        _host: &dyn Host,
        def: &EntryDef,
        entry: &Entry,
        _header: &Header,
        _sources: &[String],
    ) -> Result<bool, NucleusError> {
        match self.rules_for(&def.name).put {
            Some(p) => p.eval(&entry.content),
            None => Ok(true),
        }
    }

    async fn validate_del(
        &self,
        _host: &dyn Host,
        entry_type: &str,
        hash: &Hash,
        _sources: &[String],
    ) -> Result<bool, NucleusError> {
        match self.rules_for(entry_type).del {
            Some(p) => p.eval(&hash.to_b58()),
            None => Ok(true),
        }
    }

    async fn validate_link(
        &self,
        _host: &dyn Host,
        linking_entry_type: &str,
        _base: &Hash,
        _target: &Hash,
        tag: &str,
        _sources: &[String],
    ) -> Result<bool, NucleusError> {
        match self.rules_for(linking_entry_type).link {
            Some(p) => p.eval(tag),
            None => Ok(true),
        }
    }

    async fn validate_del_link(
        &self,
        _host: &dyn Host,
        _base: &Hash,
        _target: &Hash,
        tag: &str,
        _sources: &[String],
    ) -> Result<bool, NucleusError> {
        match &self.doc.del_link {
            Some(p) => p.eval(tag),
            None => Ok(true),
        }
    }

    async fn call(
        &self,
        host: &dyn Host,
        fn_def: &FunctionDef,
        args: CallData,
    ) -> Result<CallData, NucleusError> {
        let steps = self
            .doc
            .functions
            .get(&fn_def.name)
            .ok_or_else(|| NucleusError::UnknownFunction(fn_def.name.clone()))?;

        // program templates see the textual form of the argument
        let arg_text = args.as_text();
        let args = arg_text.as_str();
        let mut prev = String::new();
        for step in steps {
            prev = match step {
                OpStep::Commit { entry_type, value } => {
                    let hash = host.commit(entry_type, &subst(value, args, &prev)).await?;
                    hash.to_b58()
                }
                OpStep::Get { hash } => {
                    let h = parse_hash(&subst(hash, args, &prev))?;
                    host.get(&h).await?.content
                }
                OpStep::GetLinks { base, tag, load } => {
                    let b = parse_hash(&subst(base, args, &prev))?;
                    let links = host.get_links(&b, &subst(tag, args, &prev), *load).await?;
                    serde_json::to_string(&links).map_err(|e| NucleusError::Host(e.to_string()))?
                }
                OpStep::Del { hash } => {
                    let h = parse_hash(&subst(hash, args, &prev))?;
                    host.del(&h).await?;
                    "ok".to_string()
                }
                OpStep::DelLink { base, link, tag } => {
                    let b = parse_hash(&subst(base, args, &prev))?;
                    let l = parse_hash(&subst(link, args, &prev))?;
                    host.del_link(&b, &l, &subst(tag, args, &prev)).await?;
                    "ok".to_string()
                }
                OpStep::Property { name } => host.property(&subst(name, args, &prev))?,
                OpStep::Debug { msg } => {
                    host.debug(&subst(msg, args, &prev));
                    prev
                }
            };
        }

        // marshal the result back in the function's own convention; a
        // non-document result of a json function is a JSON string value
        match fn_def.calling_type {
            CallingType::String => Ok(CallData::Str(prev)),
            CallingType::Json => match serde_json::from_str(&prev) {
                Ok(value) => Ok(CallData::Json(value)),
                Err(_) => Ok(CallData::Json(serde_json::Value::String(prev))),
            },
        }
    }
}
