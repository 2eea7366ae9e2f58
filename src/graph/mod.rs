//! Graph store abstraction
//!
//! The engine writes through the [`GraphStore`] trait only. Two stores are
//! provided:
//!
//! - [`neo4j::Neo4jStore`] - production store over Bolt
//! - [`memory::MemoryGraph`] - in-process store with the same semantics,
//!   used for dry runs and tests
//!
//! Both interpret the descriptors in [`schema`]; [`cypher`] compiles them
//! into the statements Neo4j runs.

pub mod cypher;
pub mod memory;
pub mod neo4j;
pub mod schema;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

pub use schema::{LinkDirection, NodeSchema, PropertyRef, PropertySource, RelSchema};

/// A normalized, flat resource record.
pub type Record = serde_json::Map<String, Value>;

/// Out-of-band values shared by every record of one batched write.
pub type Kwargs = BTreeMap<String, Value>;

/// Default number of entities removed per cleanup statement.
pub const DEFAULT_CLEANUP_BATCH: i64 = 100;

/// Graph store failures. Always fatal for the running sync.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("failed to connect to graph store: {0}")]
    Connect(String),

    #[error("graph write failed: {0}")]
    Write(String),

    #[error("invalid batch for {label}: {reason}")]
    InvalidBatch { label: String, reason: String },
}

/// The owning scope node every synchronized node attaches to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRef {
    pub label: String,
    pub id: String,
}

impl ScopeRef {
    pub fn project(id: impl Into<String>) -> Self {
        Self {
            label: "GCPProject".to_string(),
            id: id.into(),
        }
    }
}

/// Parameters of a tag-scoped cleanup.
#[derive(Debug, Clone)]
pub struct CleanupParams {
    pub update_tag: i64,
    pub scope_id: String,
    /// Maximum entities removed per statement execution.
    pub limit: i64,
}

/// What a cleanup removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub nodes_deleted: usize,
    pub relationships_deleted: usize,
}

impl CleanupStats {
    pub fn merge(&mut self, other: &CleanupStats) {
        self.nodes_deleted += other.nodes_deleted;
        self.relationships_deleted += other.relationships_deleted;
    }
}

/// Graph store collaborator.
///
/// Each `load` and each cleanup statement is expected to be atomic; the
/// engine coordinates nothing beyond call ordering.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create the scope node if missing and stamp it with the run tag.
    async fn merge_scope(&self, scope: &ScopeRef, update_tag: i64) -> Result<(), GraphError>;

    /// Idempotently upsert `records` as nodes of `schema` with their relationships.
    async fn load(
        &self,
        schema: &NodeSchema,
        records: &[Record],
        kwargs: &Kwargs,
    ) -> Result<(), GraphError>;

    /// Delete nodes and relationships of `schema` in the scope whose tag is stale.
    async fn cleanup(
        &self,
        schema: &NodeSchema,
        params: &CleanupParams,
    ) -> Result<CleanupStats, GraphError>;
}
