//! Upserter

use serde_json::Value;

use super::transform::Batch;
use crate::graph::schema::{LASTUPDATED, SCOPE_KWARG};
use crate::graph::{GraphError, GraphStore, Kwargs};
use crate::resource::ResourceDef;

/// Kwargs shared by every write of one (resource, scope) run.
pub fn base_kwargs(scope_id: &str, update_tag: i64) -> Kwargs {
    Kwargs::from([
        (LASTUPDATED.to_string(), Value::from(update_tag)),
        (SCOPE_KWARG.to_string(), Value::String(scope_id.to_string())),
    ])
}

/// Write `batch`: derived labels first, then one load per partition.
///
/// Returns the number of load calls issued. The first failing load aborts.
pub async fn upsert(
    store: &dyn GraphStore,
    def: &ResourceDef,
    batch: &Batch,
    scope_id: &str,
    update_tag: i64,
) -> Result<usize, GraphError> {
    let kwargs = base_kwargs(scope_id, update_tag);
    let mut loads = 0;

    // Parents link to label nodes by id, so the labels must exist first.
    if let Some(labels) = &def.labels {
        if !batch.labels.is_empty() {
            store.load(&labels.node, &batch.labels, &kwargs).await?;
            loads += 1;
        }
    }

    let partition_property = def.partition.as_ref().and_then(|p| p.property.as_deref());
    for (partition, records) in &batch.groups {
        let mut kwargs = kwargs.clone();
        if let Some(property) = partition_property {
            kwargs.insert(property.to_string(), Value::String(partition.clone()));
        }
        tracing::debug!(
            "Loading {} {} records for partition {}",
            records.len(),
            def.node.label,
            partition
        );
        store.load(&def.node, records, &kwargs).await?;
        loads += 1;
    }

    Ok(loads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CleanupParams, CleanupStats, NodeSchema, Record, ScopeRef};
    use crate::resource::get_resource;
    use crate::sync::transform::transform;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every load call as (label, record count, kwargs).
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, usize, Kwargs)>>,
    }

    #[async_trait]
    impl GraphStore for Recorder {
        async fn merge_scope(&self, _scope: &ScopeRef, _tag: i64) -> Result<(), GraphError> {
            Ok(())
        }

        async fn load(
            &self,
            schema: &NodeSchema,
            records: &[Record],
            kwargs: &Kwargs,
        ) -> Result<(), GraphError> {
            self.calls
                .lock()
                .unwrap()
                .push((schema.label.clone(), records.len(), kwargs.clone()));
            Ok(())
        }

        async fn cleanup(
            &self,
            _schema: &NodeSchema,
            _params: &CleanupParams,
        ) -> Result<CleanupStats, GraphError> {
            Ok(CleanupStats::default())
        }
    }

    #[tokio::test]
    async fn test_one_load_per_partition_with_region_kwarg() {
        let def = get_resource("cloud-functions").unwrap();
        let batch = transform(
            def,
            &[
                json!({"name": "projects/a/locations/us-central1/functions/one"}),
                json!({"name": "projects/a/locations/us-east1/functions/two"}),
            ],
        );
        let store = Recorder::default();

        assert_eq!(upsert(&store, def, &batch, "a", 7).await.unwrap(), 2);

        let calls = store.calls.lock().unwrap();
        assert_eq!(calls[0].0, "GCPCloudFunction");
        assert_eq!(calls[0].2["region"], json!("us-central1"));
        assert_eq!(calls[1].2["region"], json!("us-east1"));
        assert_eq!(calls[1].2["PROJECT_ID"], json!("a"));
        assert_eq!(calls[1].2["lastupdated"], json!(7));
    }

    #[tokio::test]
    async fn test_labels_load_before_buckets() {
        let def = get_resource("storage-buckets").unwrap();
        let batch = transform(def, &[json!({"id": "b", "labels": {"env": "dev"}})]);
        let store = Recorder::default();

        upsert(&store, def, &batch, "a", 1).await.unwrap();

        let labels: Vec<String> = store.calls.lock().unwrap().iter().map(|c| c.0.clone()).collect();
        assert_eq!(labels, vec!["GCPBucketLabel", "GCPBucket"]);
    }

    #[tokio::test]
    async fn test_empty_batch_writes_nothing() {
        let def = get_resource("storage-buckets").unwrap();
        let store = Recorder::default();
        assert_eq!(upsert(&store, def, &Batch::default(), "a", 1).await.unwrap(), 0);
        assert!(store.calls.lock().unwrap().is_empty());
    }
}
