//! The application descriptor
//!
//! The DNA declares everything that defines one application: its zomes,
//! their entry types and schemas, the functions they expose, application
//! properties, and the hash/wire configuration every peer must share. The
//! serialized DNA is the genesis entry of every chain.

use crate::codec::WIRE_FORMAT;
use crate::entry::EntryFormat;
use crate::hash::{Hash, HashSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Reserved application property names.
pub const ID_PROPERTY: &str = "_id";
pub const AGENT_ID_PROPERTY: &str = "_agent_id";
pub const AGENT_NAME_PROPERTY: &str = "_agent_name";

/// Errors loading or querying a DNA
#[derive(Error, Debug)]
pub enum DnaError {
    #[error("Chain requires engine version {required}, have {have}")]
    UnsupportedVersion { required: u32, have: u32 },

    #[error("Unknown DNA file format: {0}")]
    UnknownFormat(String),

    #[error("DNA parse error: {0}")]
    Parse(String),

    #[error("Entry definition not found: {0}")]
    UnknownEntryType(String),

    #[error("Zome not found: {0}")]
    UnknownZome(String),

    #[error("Function not found: {0}")]
    UnknownFunction(String),
}

/// Who may see entries of a type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sharing {
    /// Published to the DHT.
    Public,
    /// Shared with selected peers only; never broadcast.
    Partial,
    /// Chain-local.
    Private,
}

/// How arguments and results of an exposed function are marshaled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallingType {
    String,
    Json,
}

/// Whether a function is callable from outside the zome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exposure {
    Public,
    Private,
}

/// An entry type declaration inside a zome.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntryDef {
    pub name: String,
    pub data_format: EntryFormat,
    /// Schema file name under the zome directory, or a format directive.
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub schema_hash: Option<Hash>,
    pub sharing: Sharing,
    /// Loaded schema source; filled by the service, not serialized.
    #[serde(skip)]
    pub schema_text: Option<String>,
}

/// A function a zome exposes through `call`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub calling_type: CallingType,
    pub exposed_to: Exposure,
}

/// A logically grouped subset of the application: code, entry types,
/// exposed functions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Zome {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Code file name under the zome directory.
    #[serde(rename = "code", default)]
    pub code_file: String,
    #[serde(default)]
    pub code_hash: Option<Hash>,
    pub nucleus_type: String,
    pub entries: Vec<EntryDef>,
    #[serde(default)]
    pub functions: Vec<FunctionDef>,
    /// Loaded code source; filled by the service, not serialized.
    #[serde(skip)]
    pub code: String,
}

impl Zome {
    pub fn entry_def(&self, entry_type: &str) -> Option<&EntryDef> {
        self.entries.iter().find(|e| e.name == entry_type)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// The top-level application descriptor.
///
/// Scalar fields precede tables so the TOML rendering stays valid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dna {
    pub version: u32,
    pub uuid: Uuid,
    pub name: String,
    pub requires_version: u32,
    #[serde(default = "default_wire_format")]
    pub wire_format: String,
    #[serde(default)]
    pub properties_schema: Option<String>,
    #[serde(default)]
    pub based_on: Option<Hash>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub hash_type: HashSpec,
    pub zomes: Vec<Zome>,
}

fn default_wire_format() -> String {
    WIRE_FORMAT.to_string()
}

impl Dna {
    /// A fresh descriptor with a random id and default hash/wire config.
    pub fn new(name: impl Into<String>, requires_version: u32) -> Self {
        Self {
            version: 1,
            uuid: Uuid::new_v4(),
            name: name.into(),
            properties: BTreeMap::new(),
            properties_schema: None,
            hash_type: HashSpec::default(),
            wire_format: default_wire_format(),
            based_on: None,
            requires_version,
            zomes: Vec::new(),
        }
    }

    /// Refuse to run a chain authored for a newer engine.
    pub fn check(&self, engine_version: u32) -> Result<(), DnaError> {
        if self.requires_version > engine_version {
            return Err(DnaError::UnsupportedVersion {
                required: self.requires_version,
                have: engine_version,
            });
        }
        Ok(())
    }

    pub fn zome(&self, name: &str) -> Result<&Zome, DnaError> {
        self.zomes
            .iter()
            .find(|z| z.name == name)
            .ok_or_else(|| DnaError::UnknownZome(name.to_string()))
    }

    /// Find the zome and definition that declare `entry_type`.
    pub fn entry_def(&self, entry_type: &str) -> Result<(&Zome, &EntryDef), DnaError> {
        for zome in &self.zomes {
            if let Some(def) = zome.entry_def(entry_type) {
                return Ok((zome, def));
            }
        }
        Err(DnaError::UnknownEntryType(entry_type.to_string()))
    }

    /// Find the zome and declaration of an exposed function.
    pub fn function_def(&self, zome_name: &str, function: &str) -> Result<(&Zome, &FunctionDef), DnaError> {
        let zome = self.zome(zome_name)?;
        let def = zome
            .function(function)
            .ok_or_else(|| DnaError::UnknownFunction(function.to_string()))?;
        Ok((zome, def))
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Serialize to a human-readable file body.
    pub fn to_file(&self, format: DnaFileFormat) -> Result<String, DnaError> {
        match format {
            DnaFileFormat::Json => {
                serde_json::to_string_pretty(self).map_err(|e| DnaError::Parse(e.to_string()))
            }
            DnaFileFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| DnaError::Parse(e.to_string()))
            }
        }
    }

    /// Parse from a human-readable file body.
    pub fn from_file(body: &str, format: DnaFileFormat) -> Result<Self, DnaError> {
        match format {
            DnaFileFormat::Json => {
                serde_json::from_str(body).map_err(|e| DnaError::Parse(e.to_string()))
            }
            DnaFileFormat::Toml => toml::from_str(body).map_err(|e| DnaError::Parse(e.to_string())),
        }
    }
}

/// Human-readable serializations the DNA file may use; recorded in the
/// file extension at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DnaFileFormat {
    Json,
    Toml,
}

impl DnaFileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            DnaFileFormat::Json => "json",
            DnaFileFormat::Toml => "toml",
        }
    }

    pub fn from_extension(ext: &str) -> Result<Self, DnaError> {
        match ext {
            "json" => Ok(DnaFileFormat::Json),
            "toml" => Ok(DnaFileFormat::Toml),
            other => Err(DnaError::UnknownFormat(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dna() -> Dna {
        let mut dna = Dna::new("testApp", 1);
        dna.properties.insert("description".into(), "a test app".into());
        dna.zomes.push(Zome {
            name: "main".into(),
            description: "test zome".into(),
            code_file: "main.rules".into(),
            code_hash: None,
            nucleus_type: "rules".into(),
            entries: vec![
                EntryDef {
                    name: "evenNumbers".into(),
                    data_format: EntryFormat::String,
                    schema: None,
                    schema_hash: None,
                    sharing: Sharing::Public,
                    schema_text: None,
                },
                EntryDef {
                    name: "profile".into(),
                    data_format: EntryFormat::Json,
                    schema: Some("profile.json".into()),
                    schema_hash: None,
                    sharing: Sharing::Public,
                    schema_text: None,
                },
            ],
            functions: vec![FunctionDef {
                name: "addEven".into(),
                calling_type: CallingType::String,
                exposed_to: Exposure::Public,
            }],
            code: String::new(),
        });
        dna
    }

    #[test]
    fn test_entry_def_lookup() {
        let dna = sample_dna();
        let (zome, def) = dna.entry_def("profile").unwrap();
        assert_eq!(zome.name, "main");
        assert_eq!(def.data_format, EntryFormat::Json);
        assert!(matches!(dna.entry_def("nope"), Err(DnaError::UnknownEntryType(_))));
    }

    #[test]
    fn test_function_lookup() {
        let dna = sample_dna();
        let (_, f) = dna.function_def("main", "addEven").unwrap();
        assert_eq!(f.calling_type, CallingType::String);
        assert!(dna.function_def("main", "missing").is_err());
        assert!(dna.function_def("ghost", "addEven").is_err());
    }

    #[test]
    fn test_version_check() {
        let dna = sample_dna();
        assert!(dna.check(1).is_ok());

        let mut newer = sample_dna();
        newer.requires_version = 99;
        assert!(matches!(
            newer.check(1),
            Err(DnaError::UnsupportedVersion { required: 99, have: 1 })
        ));
    }

    #[test]
    fn test_json_file_round_trip() {
        let dna = sample_dna();
        let body = dna.to_file(DnaFileFormat::Json).unwrap();
        let back = Dna::from_file(&body, DnaFileFormat::Json).unwrap();
        assert_eq!(back.uuid, dna.uuid);
        assert_eq!(back.zomes.len(), 1);
        assert_eq!(back.wire_format, WIRE_FORMAT);
        assert_eq!(back.zomes[0].entries[1].schema.as_deref(), Some("profile.json"));
    }

    #[test]
    fn test_toml_file_round_trip() {
        let dna = sample_dna();
        let body = dna.to_file(DnaFileFormat::Toml).unwrap();
        let back = Dna::from_file(&body, DnaFileFormat::Toml).unwrap();
        assert_eq!(back.uuid, dna.uuid);
        assert_eq!(back.zomes[0].nucleus_type, "rules");
    }

    #[test]
    fn test_extension_round_trip() {
        assert_eq!(DnaFileFormat::from_extension("json").unwrap(), DnaFileFormat::Json);
        assert_eq!(DnaFileFormat::from_extension("toml").unwrap(), DnaFileFormat::Toml);
        assert!(DnaFileFormat::from_extension("yaml").is_err());
    }
}
