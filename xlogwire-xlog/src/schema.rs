//! Per-space field type hints used when rows are re-encoded.
//!
//! Schemas are loaded from YAML:
//!
//! ```yaml
//! spaces:
//!   - space: 0
//!     fields: [num, str, num]
//!     key_fields: [num]
//!     default: str
//! ```

use crate::error::XlogError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// How a raw field is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Opaque bytes.
    #[default]
    Str,
    /// Little-endian unsigned number of 4 or 8 bytes.
    Num,
}

fn default_true() -> bool {
    true
}

/// Type hints for one space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceSchema {
    pub space: u32,
    /// Hints for tuple fields, by position.
    #[serde(default)]
    pub fields: Vec<FieldType>,
    /// Hints for key fields, by position.
    #[serde(default)]
    pub key_fields: Vec<FieldType>,
    /// Type of fields without a hint.
    #[serde(default)]
    pub default: FieldType,
    /// Fail on a NUM field of the wrong width instead of emitting it as a
    /// string.
    #[serde(default = "default_true")]
    pub throws: bool,
    /// Apply the per-field hints. When unset only `default` is used.
    #[serde(default = "default_true")]
    pub convert: bool,
}

impl SpaceSchema {
    pub fn new(space: u32) -> Self {
        Self {
            space,
            fields: Vec::new(),
            key_fields: Vec::new(),
            default: FieldType::Str,
            throws: true,
            convert: true,
        }
    }

    pub fn with_fields(mut self, fields: Vec<FieldType>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_key_fields(mut self, fields: Vec<FieldType>) -> Self {
        self.key_fields = fields;
        self
    }

    pub fn with_default(mut self, default: FieldType) -> Self {
        self.default = default;
        self
    }

    pub fn with_throws(mut self, throws: bool) -> Self {
        self.throws = throws;
        self
    }

    pub fn with_convert(mut self, convert: bool) -> Self {
        self.convert = convert;
        self
    }

    /// Type of tuple field `index`.
    pub fn field_type(&self, index: usize) -> FieldType {
        self.hint(&self.fields, index)
    }

    /// Type of key field `index`.
    pub fn key_type(&self, index: usize) -> FieldType {
        self.hint(&self.key_fields, index)
    }

    fn hint(&self, hints: &[FieldType], index: usize) -> FieldType {
        if self.convert {
            if let Some(ty) = hints.get(index) {
                return *ty;
            }
        }
        self.default
    }
}

/// Looks up type hints by space id.
pub trait SchemaRegistry {
    fn space(&self, id: u32) -> Option<&SpaceSchema>;
}

/// No hints: every field is a string.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSchema;

impl SchemaRegistry for NoSchema {
    fn space(&self, _id: u32) -> Option<&SpaceSchema> {
        None
    }
}

#[derive(Debug, Default, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    spaces: Vec<SpaceSchema>,
}

/// In-memory schema registry.
#[derive(Debug, Clone, Default)]
pub struct Schemas {
    spaces: HashMap<u32, SpaceSchema>,
}

impl Schemas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a YAML schema document. Later entries for the same space win.
    pub fn from_yaml(yaml: &str) -> Result<Self, XlogError> {
        let file: SchemaFile = serde_yaml::from_str(yaml)?;
        let mut schemas = Self::new();
        for space in file.spaces {
            schemas.insert(space);
        }
        Ok(schemas)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, XlogError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn insert(&mut self, schema: SpaceSchema) -> Option<SpaceSchema> {
        self.spaces.insert(schema.space, schema)
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }
}

impl SchemaRegistry for Schemas {
    fn space(&self, id: u32) -> Option<&SpaceSchema> {
        self.spaces.get(&id)
    }
}
