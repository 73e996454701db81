//! Entity references

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a persisted entity by kind and id.
///
/// `root_kind` is the kind the entity is stored under; a subtype such as
/// `"ProteinSubstance"` keeps `"Substance"` as its root so every alias of the
/// same record maps to one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: String,
    pub root_kind: String,
    pub id: String,
}

impl EntityRef {
    /// Reference whose kind is its own root
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            root_kind: kind.clone(),
            kind,
            id: id.into(),
        }
    }

    /// Reference to a subtype stored under `root_kind`
    pub fn with_root(kind: impl Into<String>, root_kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            root_kind: root_kind.into(),
            id: id.into(),
        }
    }

    /// The canonical root form of this reference
    pub fn to_root(&self) -> Self {
        Self::new(self.root_kind.clone(), self.id.clone())
    }

    pub fn is_root(&self) -> bool {
        self.kind == self.root_kind
    }

    /// Cache key derived from the root form, `"<root kind>:<id>"`
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.root_kind, self.id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.root_kind, self.id)
    }
}
