//! Wire messages
//!
//! Every protocol exchange is one `Message { kind, from, body }` envelope in
//! the canonical framing. The fingerprint of a message is the hash of its
//! canonical bytes and is used for receive-side deduplication of change
//! requests.

use crate::codec::{self, CodecError};
use crate::entry::Entry;
use crate::hash::{Hash, HashError, HashSpec};
use crate::header::Header;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors decoding messages
#[derive(Error, Debug)]
pub enum MsgError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Hash error: {0}")]
    Hash(#[from] HashError),
}

/// A peer identity: the base58 form of the peer's public key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

/// Protocol message kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MsgKind {
    Put,
    Get,
    Del,
    Link,
    GetLink,
    DelLink,
    ValidatePut,
    ValidateLink,
    Gossip,
    GossipReq,
    /// Generic success reply.
    Response,
    /// Failure reply carrying a reason.
    ErrorResponse,
}

/// One link in a `GetLink` reply: target hash, optional loaded content,
/// and the link's tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaggedHash {
    #[serde(rename = "H")]
    pub h: Hash,
    #[serde(rename = "E", default)]
    pub e: Option<String>,
    #[serde(rename = "T")]
    pub t: String,
}

/// A fully resolved link as stored and validated: base, target, tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub base: Hash,
    pub target: Hash,
    pub tag: String,
}

/// One put-log element exchanged during gossip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Put {
    pub idx: u64,
    pub msg: Message,
}

/// Message bodies; each kind admits exactly one body shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MsgBody {
    GetReq { h: Hash },
    PutReq { h: Hash },
    DelReq { h: Hash },
    LinkReq { base: Hash, links: Hash },
    DelLinkReq { base: Hash, link: Hash, tag: String },
    LinkQuery { base: Hash, tag: String },
    LinkQueryResp { links: Vec<TaggedHash> },
    ValidateQuery { h: Hash },
    ValidateResponse { entry_type: String, entry: Entry, header: Header },
    ValidateLinkResponse { entry_type: String, links: Vec<Link> },
    GossipReq { from: PeerId, your_idx: u64, my_idx: u64 },
    Gossip { puts: Vec<Put> },
    GetResponse { entry: Entry, entry_type: String },
    Ok(String),
    Err(String),
}

impl MsgBody {
    /// The request kind this body belongs to, if it is a request body.
    pub fn request_kind(&self) -> Option<MsgKind> {
        match self {
            MsgBody::GetReq { .. } => Some(MsgKind::Get),
            MsgBody::PutReq { .. } => Some(MsgKind::Put),
            MsgBody::DelReq { .. } => Some(MsgKind::Del),
            MsgBody::LinkReq { .. } => Some(MsgKind::Link),
            MsgBody::DelLinkReq { .. } => Some(MsgKind::DelLink),
            MsgBody::LinkQuery { .. } => Some(MsgKind::GetLink),
            MsgBody::GossipReq { .. } => Some(MsgKind::GossipReq),
            _ => None,
        }
    }
}

/// The protocol envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MsgKind,
    pub from: PeerId,
    pub body: MsgBody,
}

impl Message {
    pub fn new(kind: MsgKind, from: PeerId, body: MsgBody) -> Self {
        Self { kind, from, body }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MsgError> {
        Ok(codec::to_canonical(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MsgError> {
        Ok(codec::from_canonical(bytes)?)
    }

    /// Deterministic hash of the canonical message bytes; used to suppress
    /// duplicate change requests at the receiver.
    pub fn fingerprint(&self, spec: &HashSpec) -> Result<Hash, MsgError> {
        Ok(spec.sum(&self.to_bytes()?)?)
    }
}
