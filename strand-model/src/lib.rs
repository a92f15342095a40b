//! strand-model - the data model of the strand data-integrity engine
//!
//! Content addresses, entries, headers, the DNA application descriptor, and
//! the wire message envelope. Everything here has exactly one canonical byte
//! form (see [`codec`]); the engine crates build chains and DHT state on top.

pub mod codec;
pub mod dna;
pub mod entry;
pub mod hash;
pub mod header;
pub mod msg;

pub use codec::{CodecError, WIRE_FORMAT};
pub use dna::{CallingType, Dna, DnaError, DnaFileFormat, EntryDef, Exposure, FunctionDef, Sharing, Zome};
pub use entry::{
    is_system_type, parse_links, DelContent, Entry, EntryError, EntryFormat, LinkSpec, LinksContent,
    AGENT_ENTRY_TYPE, DEL_ENTRY_TYPE, DNA_ENTRY_TYPE, KEY_ENTRY_TYPE,
};
pub use hash::{Hash, HashError, HashSpec, HASH_CODE_SHA2_256, HASH_WIRE_LEN};
pub use header::{Header, HeaderError, Signature};
pub use msg::{Link, Message, MsgBody, MsgError, MsgKind, PeerId, Put, TaggedHash};
