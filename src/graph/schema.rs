//! Declarative node and relationship descriptors.
//!
//! A [`NodeSchema`] says which label a resource type is written under, where
//! each property comes from, how the node hangs off its scope, and which
//! other nodes it links to. Graph stores interpret these descriptors; no
//! store carries per-resource logic.

use serde::Deserialize;
use serde_json::Value;

use super::{Kwargs, Record};

/// Property holding the node identity. Nodes are merged on it.
pub const ID_PROPERTY: &str = "id";

/// Property and kwarg carrying the run tag on every node and relationship.
pub const LASTUPDATED: &str = "lastupdated";

/// Kwarg carrying the scope (project) identity.
pub const SCOPE_KWARG: &str = "PROJECT_ID";

/// Where a property or relationship-match value is read from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertySource {
    /// A key of the normalized record.
    Field(String),
    /// A value supplied once per batch alongside the records.
    Kwarg(String),
}

impl PropertySource {
    /// Resolve against one record and the batch kwargs. Missing values are Null.
    pub fn resolve(&self, record: &Record, kwargs: &Kwargs) -> Value {
        let found = match self {
            Self::Field(key) => record.get(key),
            Self::Kwarg(key) => kwargs.get(key),
        };
        found.cloned().unwrap_or(Value::Null)
    }

    fn key(&self) -> &str {
        match self {
            Self::Field(key) | Self::Kwarg(key) => key,
        }
    }
}

/// One node property and its source.
#[derive(Debug, Clone, Deserialize)]
pub struct PropertyRef {
    pub name: String,
    #[serde(flatten)]
    pub source: PropertySource,
}

/// Relationship direction, seen from the node being loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkDirection {
    /// `(node)<-[:REL]-(target)`
    Inward,
    /// `(node)-[:REL]->(target)`
    Outward,
}

/// A relationship from the loaded node to nodes matched by one property.
#[derive(Debug, Clone, Deserialize)]
pub struct RelSchema {
    pub rel_label: String,
    pub target_label: String,
    /// Property of the target node that must equal the source value.
    pub target_key: String,
    pub source: PropertySource,
    /// The source value is a list; link to every element.
    #[serde(default)]
    pub one_to_many: bool,
    pub direction: LinkDirection,
}

impl RelSchema {
    /// Target match values for one record. Null and empty entries are skipped.
    pub fn target_values(&self, record: &Record, kwargs: &Kwargs) -> Vec<Value> {
        let value = self.source.resolve(record, kwargs);
        let values = match value {
            Value::Array(items) if self.one_to_many => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        values.into_iter().filter(|v| !v.is_null()).collect()
    }
}

/// Descriptor of one node type.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSchema {
    pub label: String,
    #[serde(default)]
    pub extra_labels: Vec<String>,
    pub properties: Vec<PropertyRef>,
    /// Mandatory link to the owning scope node.
    pub scope_rel: RelSchema,
    #[serde(default)]
    pub other_rels: Vec<RelSchema>,
}

impl NodeSchema {
    /// The identity property reference.
    pub fn id_ref(&self) -> Option<&PropertyRef> {
        self.properties.iter().find(|p| p.name == ID_PROPERTY)
    }

    /// Check the invariants every store relies on.
    ///
    /// Labels and keys are interpolated into Cypher, so they must be plain
    /// identifiers.
    pub fn validate(&self) -> Result<(), String> {
        let mut names: Vec<&str> = vec![&self.label];
        names.extend(self.extra_labels.iter().map(String::as_str));
        names.extend(self.properties.iter().map(|p| p.name.as_str()));
        names.extend(self.properties.iter().map(|p| p.source.key()));
        for rel in std::iter::once(&self.scope_rel).chain(&self.other_rels) {
            names.extend([
                rel.rel_label.as_str(),
                rel.target_label.as_str(),
                rel.target_key.as_str(),
                rel.source.key(),
            ]);
        }
        if let Some(bad) = names.iter().find(|n| !is_identifier(n)) {
            return Err(format!("{}: '{}' is not a valid identifier", self.label, bad));
        }

        if self.id_ref().is_none() {
            return Err(format!("{}: no '{}' property", self.label, ID_PROPERTY));
        }

        let stamps_tag = self.properties.iter().any(|p| {
            p.name == LASTUPDATED && p.source == PropertySource::Kwarg(LASTUPDATED.to_string())
        });
        if !stamps_tag {
            return Err(format!(
                "{}: '{}' must be set from the '{}' kwarg",
                self.label, LASTUPDATED, LASTUPDATED
            ));
        }

        if self.scope_rel.source != PropertySource::Kwarg(SCOPE_KWARG.to_string()) {
            return Err(format!(
                "{}: scope relationship must match on the '{}' kwarg",
                self.label, SCOPE_KWARG
            ));
        }

        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {},
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
