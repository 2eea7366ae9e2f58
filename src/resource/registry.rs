//! Resource Registry - Load resource definitions from JSON
//!
//! Every synchronized resource type is described by data: where to list it,
//! how to flatten its records, how to partition them, and which graph schema
//! they are written with. Adding a resource type means adding a JSON file.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;

use crate::graph::schema::ID_PROPERTY;
use crate::graph::NodeSchema;

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[
    include_str!("../resources/functions.json"),
    include_str!("../resources/storage.json"),
];

/// Placeholder replaced by the scope id in `list_path` and `list_query`.
pub const PROJECT_PLACEHOLDER: &str = "{project}";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to parse resource definitions: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("resource '{key}' is invalid: {reason}")]
    Invalid { key: String, reason: String },

    #[error("unknown resource type '{0}'")]
    Unknown(String),
}

/// One normalized field: `name` is read from the dot-separated `path`.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub path: String,
}

/// How the partition key is cut out of the identity key.
#[derive(Debug, Clone, Deserialize)]
pub struct PartitionRule {
    /// Raw field holding a `/`-separated path.
    pub field: String,
    /// Zero-based segment index.
    pub segment: usize,
    /// Kwarg (and node property) the partition value is written to.
    #[serde(default)]
    pub property: Option<String>,
}

/// Derived label nodes built from a map-valued field.
#[derive(Debug, Clone, Deserialize)]
pub struct LabelDef {
    /// Raw map field, e.g. `labels`.
    pub field: String,
    /// Label record field holding the parent identity.
    pub parent_key: String,
    /// Parent record field listing the derived label ids.
    pub ids_field: String,
    pub node: NodeSchema,
}

/// Resource definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDef {
    /// Registry key, filled in from the map key.
    #[serde(skip)]
    pub key: String,
    pub display_name: String,
    pub api_base: String,
    pub list_path: String,
    #[serde(default)]
    pub list_query: BTreeMap<String, String>,
    /// Field of the list response holding the page of items.
    pub response_path: String,
    /// Raw field holding the globally unique identity key, stored as `id`.
    pub identity_field: String,
    #[serde(default)]
    pub partition: Option<PartitionRule>,
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub labels: Option<LabelDef>,
    pub node: NodeSchema,
}

impl ResourceDef {
    /// Every schema this resource writes, in load order.
    pub fn schemas(&self) -> impl Iterator<Item = &NodeSchema> {
        self.labels.iter().map(|l| &l.node).chain(std::iter::once(&self.node))
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: String| RegistryError::Invalid {
            key: self.key.clone(),
            reason,
        };

        for schema in self.schemas() {
            schema.validate().map_err(invalid)?;
        }
        if !self.list_path.starts_with('/') {
            return Err(invalid(format!("list_path '{}' must start with '/'", self.list_path)));
        }
        if self.fields.iter().any(|f| f.name == ID_PROPERTY) {
            return Err(invalid(format!(
                "'{}' is read from identity_field and cannot be declared as a field",
                ID_PROPERTY
            )));
        }
        Ok(())
    }
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResourceConfig {
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceDef>,
}

/// Parse and validate resource definition documents.
pub fn load_registry<'a>(
    sources: impl IntoIterator<Item = &'a str>,
) -> Result<ResourceConfig, RegistryError> {
    let mut config = ResourceConfig::default();
    for content in sources {
        let partial: ResourceConfig = serde_json::from_str(content)?;
        for (key, mut def) in partial.resources {
            def.key = key.clone();
            def.validate()?;
            config.resources.insert(key, def);
        }
    }
    Ok(config)
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<ResourceConfig> = OnceLock::new();

/// Get the resource registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static ResourceConfig {
    REGISTRY.get_or_init(|| {
        load_registry(RESOURCE_FILES.iter().copied())
            .unwrap_or_else(|e| panic!("Embedded resource definitions are invalid: {}", e))
    })
}

/// Get a resource definition by key
pub fn get_resource(key: &str) -> Option<&'static ResourceDef> {
    get_registry().resources.get(key)
}

/// Resolve a list of keys, or every registered resource when empty
pub fn select_resources(keys: &[String]) -> Result<Vec<&'static ResourceDef>, RegistryError> {
    if keys.is_empty() {
        return Ok(get_registry().resources.values().collect());
    }
    keys.iter()
        .map(|k| get_resource(k).ok_or_else(|| RegistryError::Unknown(k.clone())))
        .collect()
}

/// Get all resource keys
pub fn get_all_resource_keys() -> Vec<&'static str> {
    get_registry()
        .resources
        .keys()
        .map(|s| s.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_loads_successfully() {
        assert_eq!(
            get_all_resource_keys(),
            vec!["cloud-functions", "storage-buckets"]
        );
    }

    #[test]
    fn test_cloud_functions_definition() {
        let def = get_resource("cloud-functions").unwrap();
        assert_eq!(def.key, "cloud-functions");
        assert_eq!(def.node.label, "GCPCloudFunction");
        assert_eq!(def.identity_field, "name");
        let partition = def.partition.as_ref().unwrap();
        assert_eq!(partition.segment, 3);
        assert_eq!(partition.property.as_deref(), Some("region"));
        assert!(def.labels.is_none());
    }

    #[test]
    fn test_storage_buckets_load_labels_first() {
        let def = get_resource("storage-buckets").unwrap();
        let labels: Vec<&str> = def.schemas().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["GCPBucketLabel", "GCPBucket"]);
        assert_eq!(def.list_query.get("project").map(String::as_str), Some(PROJECT_PLACEHOLDER));
    }

    #[test]
    fn test_select_resources() {
        assert_eq!(select_resources(&[]).unwrap().len(), 2);
        let picked = select_resources(&["storage-buckets".to_string()]).unwrap();
        assert_eq!(picked[0].key, "storage-buckets");
        assert!(matches!(
            select_resources(&["nope".to_string()]),
            Err(RegistryError::Unknown(_))
        ));
    }

    #[test]
    fn test_declared_id_field_is_rejected() {
        let doc = r#"{"resources": {"dup": {
            "display_name": "Dup", "api_base": "https://x", "list_path": "/v1/x",
            "response_path": "items", "identity_field": "selfLink",
            "fields": [{"name": "id", "path": "name"}],
            "node": {"label": "Dup", "properties": [{"name": "id", "field": "id"},
                     {"name": "lastupdated", "kwarg": "lastupdated"}],
                     "scope_rel": {"rel_label": "RESOURCE", "target_label": "GCPProject",
                                   "target_key": "id", "source": {"kwarg": "PROJECT_ID"},
                                   "direction": "inward"}}
        }}}"#;
        let err = load_registry([doc]).unwrap_err();
        assert!(err.to_string().contains("identity_field"));
    }

    #[test]
    fn test_invalid_definition_is_rejected() {
        let doc = r#"{"resources": {"bad": {
            "display_name": "Bad", "api_base": "https://x", "list_path": "v1/x",
            "response_path": "items", "identity_field": "id",
            "fields": [{"name": "kind", "path": "kind"}],
            "node": {"label": "Bad", "properties": [{"name": "id", "field": "id"},
                     {"name": "lastupdated", "kwarg": "lastupdated"}],
                     "scope_rel": {"rel_label": "RESOURCE", "target_label": "GCPProject",
                                   "target_key": "id", "source": {"kwarg": "PROJECT_ID"},
                                   "direction": "inward"}}
        }}}"#;
        let err = load_registry([doc]).unwrap_err();
        assert!(err.to_string().contains("list_path"));
    }
}
