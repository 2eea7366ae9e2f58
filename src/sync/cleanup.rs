//! Stale-Sweeper

use crate::graph::{CleanupParams, CleanupStats, GraphError, GraphStore};
use crate::resource::ResourceDef;

/// Remove every node and relationship of `def` in the scope not stamped
/// with `params.update_tag`. Parent nodes are swept before their labels.
pub async fn cleanup(
    store: &dyn GraphStore,
    def: &ResourceDef,
    params: &CleanupParams,
) -> Result<CleanupStats, GraphError> {
    let mut stats = CleanupStats::default();

    stats.merge(&store.cleanup(&def.node, params).await?);
    if let Some(labels) = &def.labels {
        stats.merge(&store.cleanup(&labels.node, params).await?);
    }

    tracing::debug!(
        "Cleanup of {} in {} removed {} nodes, {} relationships",
        def.key,
        params.scope_id,
        stats.nodes_deleted,
        stats.relationships_deleted
    );
    Ok(stats)
}
