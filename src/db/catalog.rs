//! Catalog object types shared by the drivers and the vector store.

use serde::{Deserialize, Serialize};

use super::DatabaseKind;

/// Kind of a database system entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    Table,
    View,
    Column,
    System,
}

impl CatalogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::View => "view",
            Self::Column => "column",
            Self::System => "system",
        }
    }
}

/// One catalog object as loaded by a driver. Keyed by
/// `(database_type, owner, name)` once inside the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub kind: CatalogKind,
    pub database_type: DatabaseKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Table/collection a column belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CatalogEntry {
    pub fn new(name: impl Into<String>, kind: CatalogKind, database_type: DatabaseKind) -> Self {
        Self {
            name: name.into(),
            kind,
            database_type,
            owner: None,
            parent: None,
            description: None,
        }
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Text a catalog object is embedded from: kind, qualified name, and
    /// description when present.
    pub fn embedding_text(&self) -> String {
        let mut text = String::new();
        text.push_str(self.kind.as_str());
        text.push(' ');
        if let Some(owner) = &self.owner {
            text.push_str(owner);
            text.push('.');
        }
        if let Some(parent) = &self.parent {
            text.push_str(parent);
            text.push('.');
        }
        text.push_str(&self.name);
        if let Some(description) = &self.description {
            text.push(' ');
            text.push_str(description);
        }
        text
    }
}
