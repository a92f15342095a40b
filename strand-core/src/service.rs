//! Service - the per-chain root directory
//!
//! Owns the on-disk layout around one chain:
//!
//! ```text
//! <root>/
//!   dna/dna.<ext>            the application descriptor
//!   dna/<zome>/<code file>   zome code
//!   dna/<zome>/<schemas>     entry schemas
//!   db/chain.db  db/dht.db   transactional stores
//!   config.json              peer-local configuration
//!   agent.txt  pub.key  priv.key
//!   dna_hash.txt             written at genesis; self-integrity check
//!   ui/  test/               static assets and test fixtures
//! ```

use crate::agent::{Agent, AgentError};
use crate::config::Config;
use crate::engine::Engine;
use crate::error::CoreError;
use crate::nucleus::NucleusRegistry;
use crate::transport::Transport;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strand_model::dna::{Dna, DnaError, DnaFileFormat};
use strand_model::hash::{Hash, HashError};
use thiserror::Error;

pub const DNA_DIR: &str = "dna";
pub const DB_DIR: &str = "db";
pub const UI_DIR: &str = "ui";
pub const TEST_DIR: &str = "test";
pub const DNA_HASH_FILE: &str = "dna_hash.txt";
pub const CONFIG_FILE: &str = "config.json";
const DNA_FILE_STEM: &str = "dna";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("DNA error: {0}")]
    Dna(#[from] DnaError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Hash error: {0}")]
    Hash(#[from] HashError),

    #[error("root already configured: {0}")]
    AlreadyConfigured(PathBuf),

    #[error("service not initialized at {0}")]
    NotConfigured(PathBuf),

    #[error("DNA mismatch: recorded {recorded}, computed {computed}")]
    DnaMismatch { recorded: Hash, computed: Hash },

    #[error("hash mismatch for {0}; the file changed since creation")]
    FileHashMismatch(String),

    #[error("Config error: {0}")]
    Config(String),
}

/// Handle on one chain root directory.
pub struct Service {
    root: PathBuf,
}

impl Service {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dna_path(&self) -> PathBuf {
        self.root.join(DNA_DIR)
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_DIR)
    }

    fn zome_path(&self, zome_name: &str) -> PathBuf {
        self.dna_path().join(zome_name)
    }

    /// The DNA file in this root, if the root has been scaffolded.
    pub fn is_configured(&self) -> Result<PathBuf, ServiceError> {
        for ext in ["json", "toml"] {
            let candidate = self.dna_path().join(format!("{DNA_FILE_STEM}.{ext}"));
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(ServiceError::NotConfigured(self.root.clone()))
    }

    /// Scaffold a fresh root: directories, DNA file, zome code and schema
    /// files, agent keys, config. Computes and records the code and
    /// schema hashes the load path verifies against.
    pub fn create(
        &self,
        dna: &Dna,
        format: DnaFileFormat,
        agent: &Agent,
        config: &Config,
    ) -> Result<(), ServiceError> {
        if self.is_configured().is_ok() {
            return Err(ServiceError::AlreadyConfigured(self.root.clone()));
        }

        fs::create_dir_all(self.dna_path())?;
        fs::create_dir_all(self.db_path())?;
        fs::create_dir_all(self.root.join(UI_DIR))?;
        fs::create_dir_all(self.root.join(TEST_DIR))?;

        let spec = dna.hash_type;
        let mut dna = dna.clone();
        for zome in &mut dna.zomes {
            let zpath = self.zome_path(&zome.name);
            fs::create_dir_all(&zpath)?;
            if !zome.code_file.is_empty() {
                fs::write(zpath.join(&zome.code_file), &zome.code)?;
                zome.code_hash = Some(spec.sum(zome.code.as_bytes())?);
            }
            for entry in &mut zome.entries {
                if let (Some(schema_file), Some(schema_text)) = (&entry.schema, &entry.schema_text)
                {
                    fs::write(zpath.join(schema_file), schema_text)?;
                    entry.schema_hash = Some(spec.sum(schema_text.as_bytes())?);
                }
            }
        }

        let dna_file = self.dna_path().join(format!("{DNA_FILE_STEM}.{}", format.extension()));
        fs::write(dna_file, dna.to_file(format)?)?;

        agent.save(&self.root)?;

        let config_body = serde_json::to_string_pretty(config)
            .map_err(|e| ServiceError::Config(e.to_string()))?;
        fs::write(self.root.join(CONFIG_FILE), config_body)?;
        Ok(())
    }

    /// Load the DNA (with zome code and schemas read back in and their
    /// hashes verified), the agent, and the config from this root.
    pub fn load(&self) -> Result<(Dna, Agent, Config), ServiceError> {
        let dna_file = self.is_configured()?;
        let ext = dna_file.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let format = DnaFileFormat::from_extension(ext)?;
        let mut dna = Dna::from_file(&fs::read_to_string(&dna_file)?, format)?;

        let spec = dna.hash_type;
        for zome in &mut dna.zomes {
            let zpath = self.zome_path(&zome.name);
            if !zome.code_file.is_empty() {
                zome.code = fs::read_to_string(zpath.join(&zome.code_file))?;
                if let Some(recorded) = &zome.code_hash {
                    if spec.sum(zome.code.as_bytes())? != *recorded {
                        return Err(ServiceError::FileHashMismatch(zome.code_file.clone()));
                    }
                }
            }
            for entry in &mut zome.entries {
                if let Some(schema_file) = &entry.schema {
                    let text = fs::read_to_string(zpath.join(schema_file))?;
                    if let Some(recorded) = &entry.schema_hash {
                        if spec.sum(text.as_bytes())? != *recorded {
                            return Err(ServiceError::FileHashMismatch(schema_file.clone()));
                        }
                    }
                    entry.schema_text = Some(text);
                }
            }
        }

        let agent = Agent::load(&self.root)?;
        let config: Config = serde_json::from_str(&fs::read_to_string(self.root.join(CONFIG_FILE))?)
            .map_err(|e| ServiceError::Config(e.to_string()))?;
        Ok((dna, agent, config))
    }

    /// The base58 DNA hash recorded at genesis, if genesis has run.
    pub fn read_dna_hash(&self) -> Result<Option<Hash>, ServiceError> {
        let path = self.root.join(DNA_HASH_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let body = fs::read_to_string(path)?;
        Ok(Some(Hash::from_b58(body.trim())?))
    }

    fn write_dna_hash(&self, hash: &Hash) -> Result<(), ServiceError> {
        fs::write(self.root.join(DNA_HASH_FILE), format!("{}\n", hash.to_b58()))?;
        Ok(())
    }

    /// Build the engine for this root from its stored DNA, agent, and
    /// config, verifying a previously recorded DNA hash.
    pub fn open_engine(
        &self,
        transport: Arc<dyn Transport>,
        registry: NucleusRegistry,
    ) -> Result<Engine, CoreError> {
        let (dna, agent, config) = self.load()?;
        let engine = Engine::new(dna, agent, self.db_path(), transport, registry, config)?;

        if let Some(recorded) = self.read_dna_hash()? {
            match engine.dna_entry_hash() {
                Some(computed) if computed == recorded => {}
                Some(computed) => {
                    return Err(ServiceError::DnaMismatch { recorded, computed }.into())
                }
                None => return Err(CoreError::NotStarted),
            }
        }
        Ok(engine)
    }

    /// Run genesis on a freshly opened engine and record the DNA hash.
    /// Refuses to run twice on the same root.
    pub async fn gen_chain(&self, engine: &Engine) -> Result<Hash, CoreError> {
        if self.read_dna_hash()?.is_some() {
            return Err(CoreError::ChainAlreadyStarted);
        }
        let dna_hash = engine.genesis().await?;
        self.write_dna_hash(&dna_hash)?;
        Ok(dna_hash)
    }

    /// Load every fixture file under `test/`, sorted by file name.
    pub fn load_fixtures(&self) -> Result<Vec<TestFixture>, ServiceError> {
        let dir = self.root.join(TEST_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        files.sort();

        let mut fixtures = Vec::new();
        for file in files {
            let body = fs::read_to_string(&file)?;
            let mut batch: Vec<TestFixture> = serde_json::from_str(&body)
                .map_err(|e| ServiceError::Config(format!("{}: {e}", file.display())))?;
            fixtures.append(&mut batch);
        }
        Ok(fixtures)
    }
}

/// One entry of a `test/*.json` fixture file: a zome call and what it
/// should produce. The test driver itself lives outside the engine, but
/// the fixture shape is part of the on-disk contract.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TestFixture {
    #[serde(rename = "Zome")]
    pub zome: String,
    #[serde(rename = "FnName")]
    pub function: String,
    #[serde(rename = "Input")]
    pub input: String,
    #[serde(rename = "Output", default)]
    pub output: Option<String>,
    #[serde(rename = "Err", default)]
    pub err: Option<String>,
}
