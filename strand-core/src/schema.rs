//! Structural validation
//!
//! Per entry type the DNA carries either a declarative schema reference or
//! nothing. JSON entries are checked against a small schema dialect (root
//! type plus required properties with optional per-property types); Links
//! entries get the built-in links-shape check. Application-level rules live
//! in the nucleus, not here.

use serde_json::Value;
use strand_model::dna::EntryDef;
use strand_model::entry::{Entry, EntryFormat};
use strand_model::hash::Hash;
use thiserror::Error;

/// Structural rejection; the reason is surfaced verbatim to the caller.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct SchemaError(pub String);

/// A compiled structural validator for one entry type.
pub struct Validator {
    name: String,
    root_type: Option<String>,
    required: Vec<String>,
    property_types: Vec<(String, String)>,
}

impl Validator {
    /// Compile a schema document. The dialect is the subset the engine
    /// needs: `{ "type": "object", "properties": { n: {"type": t} },
    /// "required": [n, ...] }`.
    pub fn compile(name: &str, schema_text: &str) -> Result<Self, SchemaError> {
        let doc: Value = serde_json::from_str(schema_text)
            .map_err(|e| SchemaError(format!("schema {name} is not valid json: {e}")))?;

        let root_type = doc.get("type").and_then(Value::as_str).map(String::from);
        let required = doc
            .get("required")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let property_types = doc
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .filter_map(|(k, v)| {
                        v.get("type")
                            .and_then(Value::as_str)
                            .map(|t| (k.clone(), t.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self { name: name.to_string(), root_type, required, property_types })
    }

    /// Validate a parsed value; errors carry the schema name so the
    /// pipeline can surface `validator <name> failed: <reason>`.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        if let Some(want) = &self.root_type {
            if json_type_of(value) != want {
                return Err(self.fail(format!("value should be {want}")));
            }
        }
        if let Some(obj) = value.as_object() {
            for prop in &self.required {
                if !obj.contains_key(prop) {
                    return Err(self.fail(format!("object property '{prop}' is required")));
                }
            }
            for (prop, want) in &self.property_types {
                if let Some(v) = obj.get(prop) {
                    if json_type_of(v) != want {
                        return Err(
                            self.fail(format!("object property '{prop}' should be {want}"))
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn fail(&self, reason: String) -> SchemaError {
        SchemaError(format!("validator {} failed: {}", self.name, reason))
    }
}

fn json_type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The built-in shape check for Links-format entries: a top-level
/// `{ Links: [...] }` with at least one link, every Base and Link parsable
/// as a hash, and Tag present.
pub fn validate_links_shape(content: &str) -> Result<(), SchemaError> {
    let doc: Value = serde_json::from_str(content)
        .map_err(|e| SchemaError(format!("invalid links entry, invalid json: {e}")))?;

    let links = doc
        .get("Links")
        .and_then(Value::as_array)
        .ok_or_else(|| SchemaError("invalid links entry: you must specify at least one link".into()))?;
    if links.is_empty() {
        return Err(SchemaError("invalid links entry: you must specify at least one link".into()));
    }

    for link in links {
        let base = link
            .get("Base")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError("invalid links entry: missing Base".into()))?;
        Hash::from_b58(base)
            .map_err(|e| SchemaError(format!("invalid links entry: Base {e}")))?;

        let target = link
            .get("Link")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError("invalid links entry: missing Link".into()))?;
        Hash::from_b58(target)
            .map_err(|e| SchemaError(format!("invalid links entry: Link {e}")))?;

        // presence only; the tag's type is not constrained here
        if link.get("Tag").is_none() {
            return Err(SchemaError("invalid links entry: missing Tag".into()));
        }
    }
    Ok(())
}

/// System-level validation for an entry: schema for schematized types,
/// links shape for Links entries. No I/O.
pub fn sys_validate_entry(def: &EntryDef, entry: &Entry) -> Result<(), SchemaError> {
    if let Some(schema_text) = &def.schema_text {
        let name = def.schema.as_deref().unwrap_or(&def.name);
        let validator = Validator::compile(name, schema_text)?;
        let value: Value = if def.data_format == EntryFormat::Json {
            serde_json::from_str(&entry.content)
                .map_err(|e| SchemaError(format!("invalid entry json: {e}")))?
        } else {
            Value::String(entry.content.clone())
        };
        validator.validate(&value)?;
    } else if def.data_format == EntryFormat::Links {
        validate_links_shape(&entry.content)?;
    }
    Ok(())
}
