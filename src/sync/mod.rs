//! Incremental sync engine
//!
//! One invocation of [`sync_resource`] mirrors one resource type of one
//! project into the graph in four strictly ordered phases:
//!
//! 1. [`collect`] - drain the paginated listing
//! 2. [`transform`] - normalize and group records by partition
//! 3. [`upsert`] - batched idempotent writes stamped with the run tag
//! 4. [`cleanup`] - delete whatever the run did not stamp
//!
//! Upsert and cleanup are skipped when the listing was denied, so an
//! unreadable inventory never wipes what an earlier run stored.

pub mod cleanup;
pub mod collect;
pub mod transform;
pub mod upsert;

use std::time::Instant;
use thiserror::Error;

use crate::gcp::error::ApiError;
use crate::graph::{CleanupParams, CleanupStats, GraphError, GraphStore, ScopeRef};
use crate::resource::{RegistryError, ResourceDef};
use collect::{CollectOutcome, ResourceLister};

#[derive(Debug, Error)]
pub enum SyncError {
    /// Unclassified listing failure. Nothing was written.
    #[error("failed to list {resource} in project {scope}: {source}")]
    Api {
        resource: String,
        scope: String,
        source: ApiError,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Run tag for a fresh invocation: current epoch milliseconds.
pub fn current_update_tag() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Per-run parameters shared by every (resource, scope) pair.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub update_tag: i64,
    pub cleanup_batch_size: i64,
}

impl SyncOptions {
    pub fn new(update_tag: i64) -> Self {
        Self {
            update_tag,
            cleanup_batch_size: crate::graph::DEFAULT_CLEANUP_BATCH,
        }
    }
}

/// What one [`sync_resource`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub resource: String,
    pub scope: String,
    pub outcome: CollectOutcome,
    pub records: usize,
    pub labels: usize,
    pub partitions: usize,
    /// `None` when cleanup was skipped.
    pub cleanup: Option<CleanupStats>,
}

/// Synchronize one resource type of one project.
///
/// The project node is merged and stamped before any resource is loaded.
pub async fn sync_resource(
    store: &dyn GraphStore,
    lister: &dyn ResourceLister,
    def: &ResourceDef,
    scope_id: &str,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError> {
    let started = Instant::now();
    let collection = collect::collect(lister, def, scope_id).await?;
    tracing::info!(
        "Collected {} {} in project {} ({:?}) in {:?}",
        collection.records.len(),
        def.display_name,
        scope_id,
        collection.outcome,
        started.elapsed()
    );

    let mut report = SyncReport {
        resource: def.key.clone(),
        scope: scope_id.to_string(),
        outcome: collection.outcome,
        records: 0,
        labels: 0,
        partitions: 0,
        cleanup: None,
    };

    if !collection.outcome.allows_cleanup() {
        tracing::warn!(
            "Keeping existing {} of project {}: listing was denied",
            def.display_name,
            scope_id
        );
        return Ok(report);
    }

    // Nodes only attach to a scope node that already exists.
    store
        .merge_scope(&ScopeRef::project(scope_id), options.update_tag)
        .await?;

    let started = Instant::now();
    let batch = transform::transform(def, &collection.records);
    report.records = batch.record_count();
    report.labels = batch.labels.len();
    report.partitions = batch.groups.len();
    tracing::debug!(
        "Transformed {} records into {} partitions in {:?}",
        report.records,
        report.partitions,
        started.elapsed()
    );

    let started = Instant::now();
    let loads = upsert::upsert(store, def, &batch, scope_id, options.update_tag).await?;
    tracing::info!(
        "Loaded {} {} in {} batches in {:?}",
        report.records,
        def.display_name,
        loads,
        started.elapsed()
    );

    let started = Instant::now();
    let params = CleanupParams {
        update_tag: options.update_tag,
        scope_id: scope_id.to_string(),
        limit: options.cleanup_batch_size,
    };
    let stats = cleanup::cleanup(store, def, &params).await?;
    tracing::info!(
        "Cleaned up {} stale {} nodes in project {} in {:?}",
        stats.nodes_deleted,
        def.display_name,
        scope_id,
        started.elapsed()
    );
    report.cleanup = Some(stats);

    Ok(report)
}

/// Outcome of every resource type of one project.
#[derive(Debug)]
pub struct ProjectReport {
    pub scope: String,
    pub synced: Vec<SyncReport>,
    /// Failed pairs as (resource key, error).
    pub failed: Vec<(String, SyncError)>,
}

impl ProjectReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Stamp the project node, then sync each resource type in order.
///
/// A failing resource type does not stop the others. Failing to write the
/// project node is returned as an error since nothing could attach to it.
pub async fn sync_project(
    store: &dyn GraphStore,
    lister: &dyn ResourceLister,
    defs: &[&ResourceDef],
    scope_id: &str,
    options: &SyncOptions,
) -> Result<ProjectReport, SyncError> {
    store
        .merge_scope(&ScopeRef::project(scope_id), options.update_tag)
        .await?;

    let mut report = ProjectReport {
        scope: scope_id.to_string(),
        synced: Vec::new(),
        failed: Vec::new(),
    };

    for def in defs {
        match sync_resource(store, lister, def, scope_id, options).await {
            Ok(synced) => report.synced.push(synced),
            Err(e) => {
                tracing::error!("Sync of {} in project {} failed: {}", def.key, scope_id, e);
                report.failed.push((def.key.clone(), e));
            }
        }
    }

    Ok(report)
}
