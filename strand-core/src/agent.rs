//! Agent identity and cryptographic keys
//!
//! Each chain is authored by one agent: an Ed25519 keypair plus a display
//! name. The private key is stored locally in `priv.key` (never replicated);
//! the base58 public key doubles as the agent's peer id.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fs;
use std::io;
use std::path::Path;
use strand_model::msg::PeerId;
use thiserror::Error;

/// File holding the agent's display name.
pub const AGENT_FILE: &str = "agent.txt";
/// File holding the raw 32-byte private key.
pub const PRIV_KEY_FILE: &str = "priv.key";
/// File holding the raw 32-byte public key.
pub const PUB_KEY_FILE: &str = "pub.key";

/// Errors that can occur during agent key operations
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,
}

/// The authoring identity on one chain.
#[derive(Clone)]
pub struct Agent {
    name: String,
    signing_key: SigningKey,
}

impl Agent {
    /// Generate a new agent with a random keypair.
    pub fn generate(name: impl Into<String>) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { name: name.into(), signing_key }
    }

    pub fn from_signing_key(name: impl Into<String>, signing_key: SigningKey) -> Self {
        Self { name: name.into(), signing_key }
    }

    /// Load an agent from a chain root directory, or generate and save one.
    pub fn load_or_generate(dir: impl AsRef<Path>, name: &str) -> Result<Self, AgentError> {
        let dir = dir.as_ref();
        if dir.join(PRIV_KEY_FILE).exists() {
            Self::load(dir)
        } else {
            let agent = Self::generate(name);
            agent.save(dir)?;
            Ok(agent)
        }
    }

    /// Load the agent name and keypair from a chain root directory.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, AgentError> {
        use zeroize::Zeroizing;

        let dir = dir.as_ref();
        let name = fs::read_to_string(dir.join(AGENT_FILE))?.trim().to_string();

        let bytes = Zeroizing::new(fs::read(dir.join(PRIV_KEY_FILE))?);
        if bytes.len() != 32 {
            return Err(AgentError::InvalidKeyLength(bytes.len()));
        }
        let mut key_bytes = Zeroizing::new([0u8; 32]);
        key_bytes.copy_from_slice(&bytes);

        let signing_key = SigningKey::from_bytes(&key_bytes);
        Ok(Self { name, signing_key })
    }

    /// Save the agent name and keypair into a chain root directory.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<(), AgentError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        fs::write(dir.join(AGENT_FILE), format!("{}\n", self.name))?;
        fs::write(dir.join(PRIV_KEY_FILE), self.signing_key.to_bytes())?;
        fs::write(dir.join(PUB_KEY_FILE), self.signing_key.verifying_key().to_bytes())?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The agent's identity on the wire: base58 of the public key.
    pub fn peer_id(&self) -> PeerId {
        PeerId(bs58::encode(self.public_key_bytes()).into_string())
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Verify a signature against this agent's public key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), AgentError> {
        self.verifying_key()
            .verify(message, signature)
            .map_err(|_| AgentError::InvalidSignature)
    }

    /// Parse a peer id back into a verifying key.
    pub fn verifying_key_of(peer: &PeerId) -> Result<VerifyingKey, AgentError> {
        let bytes = bs58::decode(peer.as_str())
            .into_vec()
            .map_err(|_| AgentError::InvalidPublicKey)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| AgentError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&arr).map_err(|_| AgentError::InvalidPublicKey)
    }
}
