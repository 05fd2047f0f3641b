use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BeadError, Result};

/// Metadata version for compatibility
pub const META_VERSION: &str = "aaa947a6-1f7a-11e6-ba3a-0021cc73492e";

/// Type-safe wrapper for bead names
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BeadName(String);

impl BeadName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if Self::is_valid(&name) {
            Ok(BeadName(name))
        } else {
            Err(BeadError::InvalidBeadName(name))
        }
    }

    pub fn is_valid(name: &str) -> bool {
        !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains('/')
            && !name.contains('\\')
            && !name.contains("__")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BeadName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-safe wrapper for input names (the local alias of a dependency)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputName(String);

impl InputName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if BeadName::is_valid(&name) {
            Ok(InputName(name))
        } else {
            Err(BeadError::Value(format!("Invalid input name: {}", name)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InputName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-safe wrapper for content IDs
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        ContentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference from a bead to another bead used as input.
///
/// `name` is the local alias under which the input was used; `kind` and
/// `content_id` identify the referenced bead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub kind: String,
    pub content_id: String,
    pub freeze_time: String,
}

impl InputSpec {
    pub fn new(name: String, kind: String, content_id: String, freeze_time: String) -> Self {
        InputSpec {
            name,
            kind,
            content_id,
            freeze_time,
        }
    }

    pub fn freeze_time_instant(&self) -> Result<DateTime<Utc>> {
        crate::tech::timestamp::parse_timestamp(&self.freeze_time)
    }
}

/// Main metadata structure for beads.
///
/// The optional fields are unset while the metadata belongs to a workspace
/// and set when the workspace is frozen into an archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeadMeta {
    pub meta_version: String,
    pub kind: String,

    /// Kept ordered by input name so serialization is deterministic.
    #[serde(default)]
    pub inputs: Vec<InputSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub freeze_time: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub freeze_name: Option<String>,
}

impl BeadMeta {
    /// Create a new workspace metadata
    pub fn new_workspace(kind: String) -> Self {
        BeadMeta {
            meta_version: META_VERSION.to_string(),
            kind,
            inputs: Vec::new(),
            content_id: None,
            freeze_time: None,
            freeze_name: None,
        }
    }

    /// Create metadata for a frozen bead
    pub fn new_frozen(
        kind: String,
        name: BeadName,
        freeze_time: String,
        content_id: String,
        inputs: Vec<InputSpec>,
    ) -> Self {
        let mut meta = BeadMeta {
            meta_version: META_VERSION.to_string(),
            kind,
            inputs,
            content_id: Some(content_id),
            freeze_time: Some(freeze_time),
            freeze_name: Some(name.to_string()),
        };
        meta.inputs.sort_by(|a, b| a.name.cmp(&b.name));
        meta
    }

    /// Add an input dependency, keeping the list ordered by name.
    pub fn add_input(&mut self, spec: InputSpec) {
        match self.inputs.binary_search_by(|probe| probe.name.cmp(&spec.name)) {
            Ok(position) => self.inputs[position] = spec,
            Err(position) => self.inputs.insert(position, spec),
        }
    }

    /// Remove an input dependency
    pub fn remove_input(&mut self, name: &str) -> Option<InputSpec> {
        let position = self.inputs.iter().position(|input| input.name == name)?;
        Some(self.inputs.remove(position))
    }

    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|input| input.name == name)
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.input(name).is_some()
    }
}
