//! Subject code → canonical name table.
//!
//! The table is plain configuration injected into the field mapper, so a
//! gazette from another cohort or year can bring its own codes. Unknown
//! codes are never dropped: the mapper keeps the raw code as the name.

use crate::error::GazetteError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// First-year engineering subjects (2019 scheme).
const DEFAULT_SUBJECTS: [(&str, &str); 14] = [
    ("10411", "Applied Mathematics-I"),
    ("10412", "Applied Physics"),
    ("10413", "Applied Chemistry"),
    ("10414", "Engineering Mechanics"),
    ("10415", "Basic Electrical & Electronics Engineering"),
    ("10416", "Applied Physics Lab"),
    ("10417", "Applied Chemistry Lab"),
    ("10418", "Engineering Mechanics Lab"),
    ("10419", "Basic Electrical & Electronics Lab"),
    ("10420", "Professional Communication Ethics"),
    ("10421", "Professional Communication Ethics TW"),
    ("10422", "Engineering Workshop-I"),
    ("10423", "C Programming"),
    ("10424", "Induction cum Universal Human Values"),
];

/// Immutable code → name mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectTable {
    names: BTreeMap<String, String>,
}

impl Default for SubjectTable {
    fn default() -> Self {
        DEFAULT_SUBJECTS
            .iter()
            .map(|(code, name)| (code.to_string(), name.to_string()))
            .collect()
    }
}

impl FromIterator<(String, String)> for SubjectTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}

impl SubjectTable {
    /// An empty table: every code passes through unresolved.
    pub fn empty() -> Self {
        Self {
            names: BTreeMap::new(),
        }
    }

    /// Parse a JSON object of `{"code": "name"}` pairs.
    pub fn from_json(json: &str) -> Result<Self, GazetteError> {
        serde_json::from_str(json).map_err(|source| GazetteError::MalformedJson {
            what: "subject table".to_string(),
            source,
        })
    }

    /// Load a JSON subject table from disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, GazetteError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => GazetteError::FileNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => GazetteError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => GazetteError::Internal(format!("reading {}: {e}", path.display())),
        })?;
        Self::from_json(&json)
    }

    pub fn name(&self, code: &str) -> Option<&str> {
        self.names.get(code).map(String::as_str)
    }

    /// Name for `code`, or the code itself when unknown.
    pub fn resolve<'a>(&'a self, code: &'a str) -> &'a str {
        self.name(code).unwrap_or(code)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
