//! Actions - envelopes of intent
//!
//! One action is one mutation or lookup flowing through the pipeline:
//! Commit, Get, Del, Link, DelLink, GetLink, Put. Actions are a tagged
//! variant with per-variant data; each capability (argument descriptors,
//! system validation, local run, remote receive) dispatches by `match`, so
//! the compiler checks exhaustiveness. The local-run and remote-receive
//! capabilities live on the engine; this module owns the shape, the
//! argument contract, and its checking.

use crate::error::CoreError;
use serde_json::Value;
use strand_model::hash::Hash;
use strand_model::msg::MsgKind;

/// Argument types an action can declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgKind {
    Hash,
    Str,
    Entry,
    Int,
    Bool,
    Map,
}

/// One declared argument of an action.
#[derive(Clone, Copy, Debug)]
pub struct ArgDef {
    pub name: &'static str,
    pub kind: ArgKind,
    pub optional: bool,
}

/// Options for a GetLink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GetLinkOptions {
    /// Also fetch each target entry and inline its content.
    pub load: bool,
}

/// An envelope of intent moving through the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Commit { entry_type: String, content: String },
    Get { hash: Hash },
    Del { hash: Hash },
    Link { base: Hash, linking_entry: Hash },
    DelLink { base: Hash, target: Hash, tag: String },
    GetLink { base: Hash, tag: String, options: GetLinkOptions },
    Put { hash: Hash },
}

const COMMIT_ARGS: &[ArgDef] = &[
    ArgDef { name: "entryType", kind: ArgKind::Str, optional: false },
    ArgDef { name: "entry", kind: ArgKind::Entry, optional: false },
];
const GET_ARGS: &[ArgDef] = &[ArgDef { name: "hash", kind: ArgKind::Hash, optional: false }];
const DEL_ARGS: &[ArgDef] = &[ArgDef { name: "hash", kind: ArgKind::Hash, optional: false }];
const LINK_ARGS: &[ArgDef] = &[
    ArgDef { name: "base", kind: ArgKind::Hash, optional: false },
    ArgDef { name: "links", kind: ArgKind::Hash, optional: false },
];
const DEL_LINK_ARGS: &[ArgDef] = &[
    ArgDef { name: "base", kind: ArgKind::Hash, optional: false },
    ArgDef { name: "link", kind: ArgKind::Hash, optional: false },
    ArgDef { name: "tag", kind: ArgKind::Str, optional: false },
];
const GET_LINK_ARGS: &[ArgDef] = &[
    ArgDef { name: "base", kind: ArgKind::Hash, optional: false },
    ArgDef { name: "tag", kind: ArgKind::Str, optional: false },
    ArgDef { name: "options", kind: ArgKind::Map, optional: true },
];
const PUT_ARGS: &[ArgDef] = &[ArgDef { name: "hash", kind: ArgKind::Hash, optional: false }];

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Commit { .. } => "commit",
            Action::Get { .. } => "get",
            Action::Del { .. } => "del",
            Action::Link { .. } => "link",
            Action::DelLink { .. } => "delLink",
            Action::GetLink { .. } => "getLink",
            Action::Put { .. } => "put",
        }
    }

    pub fn args(&self) -> &'static [ArgDef] {
        match self {
            Action::Commit { .. } => COMMIT_ARGS,
            Action::Get { .. } => GET_ARGS,
            Action::Del { .. } => DEL_ARGS,
            Action::Link { .. } => LINK_ARGS,
            Action::DelLink { .. } => DEL_LINK_ARGS,
            Action::GetLink { .. } => GET_LINK_ARGS,
            Action::Put { .. } => PUT_ARGS,
        }
    }

    /// The wire kind this action handles remotely. Commit is the one
    /// action with no meaning as a received DHT message.
    pub fn receive_kind(&self) -> Result<MsgKind, CoreError> {
        match self {
            Action::Commit { .. } => Err(CoreError::NonDHTAction("commit")),
            Action::Get { .. } => Ok(MsgKind::Get),
            Action::Del { .. } => Ok(MsgKind::Del),
            Action::Link { .. } => Ok(MsgKind::Link),
            Action::DelLink { .. } => Ok(MsgKind::DelLink),
            Action::GetLink { .. } => Ok(MsgKind::GetLink),
            Action::Put { .. } => Ok(MsgKind::Put),
        }
    }

    /// Build an action from a named invocation with JSON-typed arguments,
    /// checking arity and types before anything mutates. The DHT-only
    /// actions cannot be built this way.
    pub fn from_call(name: &str, args: &[Value]) -> Result<Action, CoreError> {
        match name {
            "commit" => {
                check_arity("commit", COMMIT_ARGS, args)?;
                Ok(Action::Commit {
                    entry_type: want_str("commit", COMMIT_ARGS[0], &args[0])?,
                    content: want_str("commit", COMMIT_ARGS[1], &args[1])?,
                })
            }
            "get" => {
                check_arity("get", GET_ARGS, args)?;
                Ok(Action::Get { hash: want_hash("get", GET_ARGS[0], &args[0])? })
            }
            "del" => {
                check_arity("del", DEL_ARGS, args)?;
                Ok(Action::Del { hash: want_hash("del", DEL_ARGS[0], &args[0])? })
            }
            "delLink" => {
                check_arity("delLink", DEL_LINK_ARGS, args)?;
                Ok(Action::DelLink {
                    base: want_hash("delLink", DEL_LINK_ARGS[0], &args[0])?,
                    target: want_hash("delLink", DEL_LINK_ARGS[1], &args[1])?,
                    tag: want_str("delLink", DEL_LINK_ARGS[2], &args[2])?,
                })
            }
            "getLink" => {
                check_arity("getLink", GET_LINK_ARGS, args)?;
                let options = match args.get(2) {
                    None => GetLinkOptions::default(),
                    Some(v) => {
                        let map = v.as_object().ok_or(CoreError::WrongArgType {
                            action: "getLink",
                            arg: "options",
                            expected: "map",
                        })?;
                        GetLinkOptions {
                            load: map.get("load").and_then(Value::as_bool).unwrap_or(false),
                        }
                    }
                };
                Ok(Action::GetLink {
                    base: want_hash("getLink", GET_LINK_ARGS[0], &args[0])?,
                    tag: want_str("getLink", GET_LINK_ARGS[1], &args[1])?,
                    options,
                })
            }
            "put" | "link" => Err(CoreError::NonCallableAction(if name == "put" {
                "put"
            } else {
                "link"
            })),
            other => Err(CoreError::UnknownAction(other.to_string())),
        }
    }
}

fn check_arity(action: &'static str, defs: &[ArgDef], args: &[Value]) -> Result<(), CoreError> {
    let required = defs.iter().filter(|d| !d.optional).count();
    if args.len() < required || args.len() > defs.len() {
        return Err(CoreError::WrongArgCount { action, expected: required, got: args.len() });
    }
    Ok(())
}

fn want_str(action: &'static str, def: ArgDef, value: &Value) -> Result<String, CoreError> {
    value
        .as_str()
        .map(String::from)
        .ok_or(CoreError::WrongArgType { action, arg: def.name, expected: "string" })
}

fn want_hash(action: &'static str, def: ArgDef, value: &Value) -> Result<Hash, CoreError> {
    let s = value
        .as_str()
        .ok_or(CoreError::WrongArgType { action, arg: def.name, expected: "hash" })?;
    Hash::from_b58(s)
        .map_err(|_| CoreError::WrongArgType { action, arg: def.name, expected: "hash" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strand_model::hash::HashSpec;

    fn b58() -> String {
        HashSpec::default().sum(b"target").unwrap().to_b58()
    }

    #[test]
    fn test_commit_from_call() {
        let action = Action::from_call("commit", &[json!("evenNumbers"), json!("2")]).unwrap();
        assert_eq!(
            action,
            Action::Commit { entry_type: "evenNumbers".into(), content: "2".into() }
        );
        assert_eq!(action.name(), "commit");
        assert_eq!(action.args().len(), 2);
    }

    #[test]
    fn test_wrong_arg_count() {
        let err = Action::from_call("commit", &[json!("evenNumbers")]).unwrap_err();
        assert!(matches!(
            err,
            CoreError::WrongArgCount { action: "commit", expected: 2, got: 1 }
        ));
    }

    #[test]
    fn test_wrong_arg_type() {
        let err = Action::from_call("get", &[json!(42)]).unwrap_err();
        assert!(matches!(err, CoreError::WrongArgType { action: "get", arg: "hash", .. }));

        let err = Action::from_call("get", &[json!("not@a@hash")]).unwrap_err();
        assert!(matches!(err, CoreError::WrongArgType { .. }));
    }

    #[test]
    fn test_get_link_options() {
        let base = b58();
        let bare = Action::from_call("getLink", &[json!(base), json!("4stars")]).unwrap();
        match bare {
            Action::GetLink { options, .. } => assert!(!options.load),
            other => panic!("wrong action: {other:?}"),
        }

        let loaded =
            Action::from_call("getLink", &[json!(base), json!(""), json!({"load": true})]).unwrap();
        match loaded {
            Action::GetLink { options, tag, .. } => {
                assert!(options.load);
                assert!(tag.is_empty());
            }
            other => panic!("wrong action: {other:?}"),
        }
    }

    #[test]
    fn test_dht_only_actions_not_callable() {
        assert!(matches!(
            Action::from_call("put", &[json!(b58())]),
            Err(CoreError::NonCallableAction("put"))
        ));
        assert!(matches!(
            Action::from_call("link", &[]),
            Err(CoreError::NonCallableAction("link"))
        ));
    }

    #[test]
    fn test_unknown_action() {
        assert!(matches!(
            Action::from_call("teleport", &[]),
            Err(CoreError::UnknownAction(_))
        ));
    }

    #[test]
    fn test_commit_is_not_a_dht_action() {
        let commit = Action::Commit { entry_type: "t".into(), content: "x".into() };
        assert!(matches!(commit.receive_kind(), Err(CoreError::NonDHTAction("commit"))));
        let get = Action::Get { hash: HashSpec::default().sum(b"x").unwrap() };
        assert_eq!(get.receive_kind().unwrap(), MsgKind::Get);
    }

    #[test]
    fn test_del_link_from_call() {
        let action =
            Action::from_call("delLink", &[json!(b58()), json!(b58()), json!("4stars")]).unwrap();
        match action {
            Action::DelLink { tag, .. } => assert_eq!(tag, "4stars"),
            other => panic!("wrong action: {other:?}"),
        }
    }
}
