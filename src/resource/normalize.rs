//! Record normalization helpers

use serde_json::Value;

use super::registry::ResourceDef;
use crate::graph::schema::ID_PROPERTY;
use crate::graph::Record;

/// Extract a value from JSON using a dot-notation path
///
/// Numeric segments index into arrays. Any missing step yields `Null`.
pub fn extract_path(item: &Value, path: &str) -> Value {
    let mut current = item;

    for part in path.split('.') {
        let next = match part.parse::<usize>() {
            Ok(idx) if current.is_array() => current.get(idx),
            _ => current.get(part),
        };
        current = match next {
            Some(v) => v,
            None => return Value::Null,
        };
    }

    current.clone()
}

/// Extract the page of items from a list response
pub fn extract_items(response: &Value, path: &str) -> Vec<Value> {
    match extract_path(response, path) {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

/// Flatten one raw record into `id` plus the field set declared by `def`
///
/// `id` always comes from the definition's `identity_field`.
pub fn flatten(def: &ResourceDef, raw: &Value) -> Record {
    let mut record = Record::new();
    record.insert(ID_PROPERTY.to_string(), extract_path(raw, &def.identity_field));
    for field in &def.fields {
        record.insert(field.name.clone(), extract_path(raw, &field.path));
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_nested_path() {
        let item = json!({"httpsTrigger": {"url": "https://x"}});
        assert_eq!(extract_path(&item, "httpsTrigger.url"), json!("https://x"));
    }

    #[test]
    fn test_missing_path_is_null() {
        let item = json!({"eventTrigger": null});
        assert_eq!(extract_path(&item, "eventTrigger.eventType"), Value::Null);
        assert_eq!(extract_path(&item, "nothing.here"), Value::Null);
    }

    #[test]
    fn test_array_index() {
        let item = json!({"errors": [{"reason": "forbidden"}]});
        assert_eq!(extract_path(&item, "errors.0.reason"), json!("forbidden"));
    }

    #[test]
    fn test_extract_items_missing_key() {
        assert!(extract_items(&json!({}), "functions").is_empty());
        assert_eq!(extract_items(&json!({"items": [1, 2]}), "items").len(), 2);
    }

    #[test]
    fn test_flatten_takes_id_from_identity_field() {
        let def = crate::resource::get_resource("cloud-functions").unwrap();
        let raw = json!({"name": "projects/p/locations/us-east1/functions/f", "runtime": "go121"});
        let record = flatten(def, &raw);
        assert_eq!(record.get("id"), record.get("name"));
        assert_eq!(record.get("id"), Some(&json!("projects/p/locations/us-east1/functions/f")));
    }

    #[test]
    fn test_flatten_storage_bucket() {
        let def = crate::resource::get_resource("storage-buckets").unwrap();
        let raw = json!({
            "id": "bucket_name",
            "projectNumber": 9999,
            "kind": "storage#bucket",
            "versioning": {"enabled": true},
            "iamConfiguration": {"bucketPolicyOnly": {"enabled": false}}
        });
        let record = flatten(def, &raw);
        assert_eq!(record.get("id"), Some(&json!("bucket_name")));
        assert_eq!(record.get("versioning_enabled"), Some(&json!(true)));
        assert_eq!(record.get("iam_config_bucket_policy_only"), Some(&json!(false)));
        assert_eq!(record.get("log_bucket"), Some(&Value::Null));
        assert_eq!(record.len(), def.fields.len() + 1);
    }
}
