//! Engine-level error taxonomy
//!
//! One roll-up error for the action pipeline and engine surface. Input,
//! structural/application, lookup, protocol, and corruption failures each
//! keep their identity; transient network failures are retried inside the
//! pipeline and only surface after exhaustion.

use crate::agent::AgentError;
use crate::chain::ChainError;
use crate::dht::DhtError;
use crate::nucleus::NucleusError;
use crate::schema::SchemaError;
use crate::transport::TransportError;
use strand_model::dna::DnaError;
use strand_model::entry::EntryError;
use strand_model::hash::HashError;
use strand_model::header::HeaderError;
use strand_model::msg::MsgError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Wrong number of arguments to {action}: expected {expected}, got {got}")]
    WrongArgCount { action: &'static str, expected: usize, got: usize },

    #[error("Wrong type for argument '{arg}' of {action}: expected {expected}")]
    WrongArgType { action: &'static str, arg: &'static str, expected: &'static str },

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Not a callable action: {0}")]
    NonCallableAction(&'static str),

    #[error("Not a DHT action: {0}")]
    NonDHTAction(&'static str),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("hash not found")]
    HashNotFound,

    #[error("hash deleted")]
    HashDeleted,

    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("chain not started")]
    NotStarted,

    #[error("chain already started")]
    ChainAlreadyStarted,

    /// Sticky: once an instance hits corruption, every further mutation
    /// attempt returns this.
    #[error("instance corrupt: {0}")]
    Corrupt(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("DHT error: {0}")]
    Dht(#[from] DhtError),

    #[error("Nucleus error: {0}")]
    Nucleus(NucleusError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Service error: {0}")]
    Service(#[from] crate::service::ServiceError),

    #[error("DNA error: {0}")]
    Dna(#[from] DnaError),

    #[error("Entry error: {0}")]
    Entry(#[from] EntryError),

    #[error("Header error: {0}")]
    Header(#[from] HeaderError),

    #[error("Hash error: {0}")]
    Hash(#[from] HashError),

    #[error("Message error: {0}")]
    Msg(#[from] MsgError),
}

// Structural rejections surface verbatim as validation failures.
impl From<SchemaError> for CoreError {
    fn from(e: SchemaError) -> Self {
        CoreError::ValidationFailed(e.0)
    }
}

// Nuclei translate their host-specific failures into validation failures;
// infrastructure problems (unknown host type, bad code) keep their identity.
impl From<NucleusError> for CoreError {
    fn from(e: NucleusError) -> Self {
        match e {
            NucleusError::App(reason) | NucleusError::Host(reason) => {
                CoreError::ValidationFailed(reason)
            }
            other => CoreError::Nucleus(other),
        }
    }
}

impl CoreError {
    /// The corruption message to make sticky, if this error poisons the
    /// instance.
    pub fn corruption(&self) -> Option<String> {
        match self {
            CoreError::Chain(e) if e.is_corruption() => Some(e.to_string()),
            CoreError::Corrupt(msg) => Some(msg.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_becomes_validation_failed() {
        let err: CoreError = SchemaError("validator x failed: nope".into()).into();
        match err {
            CoreError::ValidationFailed(reason) => {
                assert_eq!(reason, "validator x failed: nope")
            }
            other => panic!("wrong variant: {other}"),
        }
    }

    #[test]
    fn test_nucleus_app_error_becomes_validation_failed() {
        let err: CoreError = NucleusError::App("rule exploded".into()).into();
        assert!(matches!(err, CoreError::ValidationFailed(_)));

        let err: CoreError = NucleusError::UnknownNucleusType("lisp".into()).into();
        assert!(matches!(err, CoreError::Nucleus(_)));
    }

    #[test]
    fn test_corruption_detection() {
        let err = CoreError::Chain(ChainError::BadTermination);
        assert!(err.corruption().is_some());
        assert!(CoreError::HashNotFound.corruption().is_none());
    }
}
