//! Transformer
//!
//! Flattens raw records and groups them by partition key. Derived label
//! records are split out of their parents here too.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::graph::schema::ID_PROPERTY;
use crate::graph::Record;
use crate::resource::normalize::{extract_path, flatten};
use crate::resource::{LabelDef, ResourceDef};

/// Partition used when the identity key has no usable partition segment.
pub const FALLBACK_PARTITION: &str = "global";

/// Normalized records ready for upsert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    /// Parent records keyed by partition, input order kept within a group.
    pub groups: BTreeMap<String, Vec<Record>>,
    /// Derived label records of every parent in `groups`.
    pub labels: Vec<Record>,
}

impl Batch {
    pub fn record_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// Cut segment `segment` out of a `/`-separated identity key.
///
/// Missing or empty segments fall back to [`FALLBACK_PARTITION`].
pub fn partition_key(identity: &str, segment: usize) -> String {
    identity
        .split('/')
        .nth(segment)
        .filter(|s| !s.is_empty())
        .unwrap_or(FALLBACK_PARTITION)
        .to_string()
}

/// Normalize and group `raw` records of `def`.
pub fn transform(def: &ResourceDef, raw: &[Value]) -> Batch {
    let mut batch = Batch::default();

    for item in raw {
        let mut record = flatten(def, item);
        let Some(id) = record.get(ID_PROPERTY).and_then(id_text) else {
            tracing::warn!(
                resource = %def.key,
                "Skipping record without an '{}' value",
                def.identity_field
            );
            continue;
        };

        let partition = match &def.partition {
            Some(rule) => match extract_path(item, &rule.field) {
                Value::String(identity) => partition_key(&identity, rule.segment),
                _ => FALLBACK_PARTITION.to_string(),
            },
            None => FALLBACK_PARTITION.to_string(),
        };
        if partition == FALLBACK_PARTITION && def.partition.is_some() {
            tracing::debug!(resource = %def.key, id = %id, "Identity has no partition segment");
        }

        if let Some(labels) = &def.labels {
            let derived = derive_labels(labels, &id, item);
            let ids = derived
                .iter()
                .filter_map(|l| l.get(ID_PROPERTY).cloned())
                .collect();
            record.insert(labels.ids_field.clone(), Value::Array(ids));
            batch.labels.extend(derived);
        }

        batch.groups.entry(partition).or_default().push(record);
    }

    batch
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One record per key of the map-valued field, id `{parent}_{key}`.
///
/// The id is not injective when the parent id or key contains `_`:
/// bucket `a_b` key `c` and bucket `a` key `b_c` both yield `a_b_c`.
/// Existing graphs key label nodes this way, so the format is kept.
fn derive_labels(def: &LabelDef, parent_id: &str, item: &Value) -> Vec<Record> {
    let Value::Object(map) = extract_path(item, &def.field) else {
        return Vec::new();
    };

    map.into_iter()
        .map(|(key, value)| {
            let mut label = Record::new();
            label.insert(
                ID_PROPERTY.to_string(),
                Value::String(format!("{}_{}", parent_id, key)),
            );
            label.insert("key".to_string(), Value::String(key));
            label.insert("value".to_string(), value);
            label.insert(def.parent_key.clone(), Value::String(parent_id.to_string()));
            label
        })
        .collect()
}
