//! In-memory graph store.
//!
//! Interprets node schemas with the same semantics as the Cypher emitted by
//! [`super::cypher`], so the engine can run without a database (`--dry-run`)
//! and the test-suite can assert on graph shape. Every call holds the write
//! lock for its whole duration, which makes each load and cleanup atomic.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

use super::schema::{LinkDirection, NodeSchema, RelSchema, ID_PROPERTY, LASTUPDATED};
use super::{CleanupParams, CleanupStats, GraphError, GraphStore, Kwargs, Record, ScopeRef};

/// A node as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryNode {
    pub labels: BTreeSet<String>,
    pub properties: Record,
}

impl MemoryNode {
    pub fn id(&self) -> Option<&Value> {
        self.properties.get(ID_PROPERTY)
    }
}

/// A relationship with its endpoints resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRelationship {
    pub rel_label: String,
    pub from: MemoryNode,
    pub to: MemoryNode,
    pub properties: Record,
}

/// Whole-graph copy for assertions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GraphSnapshot {
    pub nodes: Vec<MemoryNode>,
    pub relationships: Vec<MemoryRelationship>,
}

/// Node and relationship counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphCounts {
    pub nodes: usize,
    pub relationships: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct EdgeKey {
    from: u64,
    rel: String,
    to: u64,
}

#[derive(Debug, Default)]
struct GraphState {
    next_id: u64,
    nodes: BTreeMap<u64, MemoryNode>,
    edges: BTreeMap<EdgeKey, Record>,
}

fn now_millis() -> Value {
    Value::from(chrono::Utc::now().timestamp_millis())
}

/// `n.lastupdated <> $tag`; a missing tag is never stale.
fn is_stale(properties: &Record, tag: &Value) -> bool {
    matches!(properties.get(LASTUPDATED), Some(v) if !v.is_null() && v != tag)
}

fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl GraphState {
    fn has_label(&self, node: u64, label: &str) -> bool {
        self.nodes
            .get(&node)
            .is_some_and(|n| n.labels.contains(label))
    }

    fn find_nodes(&self, label: &str, key: &str, value: &Value) -> Vec<u64> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.labels.contains(label) && n.properties.get(key) == Some(value))
            .map(|(id, _)| *id)
            .collect()
    }

    fn merge_node(&mut self, label: &str, key: &str, value: &Value) -> u64 {
        if let Some(existing) = self.find_nodes(label, key, value).first() {
            return *existing;
        }
        let id = self.next_id;
        self.next_id += 1;
        let mut properties = Record::new();
        properties.insert(key.to_string(), value.clone());
        properties.insert("firstseen".to_string(), now_millis());
        self.nodes.insert(
            id,
            MemoryNode {
                labels: BTreeSet::from([label.to_string()]),
                properties,
            },
        );
        id
    }

    fn merge_edge(&mut self, from: u64, rel: &str, to: u64) -> &mut Record {
        self.edges
            .entry(EdgeKey {
                from,
                rel: rel.to_string(),
                to,
            })
            .or_insert_with(|| {
                let mut properties = Record::new();
                properties.insert("firstseen".to_string(), now_millis());
                properties
            })
    }

    fn detach_delete(&mut self, node: u64) {
        self.nodes.remove(&node);
        self.edges.retain(|k, _| k.from != node && k.to != node);
    }

    fn link(&mut self, node: u64, rel: &RelSchema, record: &Record, kwargs: &Kwargs, tag: &Value) {
        for value in rel.target_values(record, kwargs) {
            for target in self.find_nodes(&rel.target_label, &rel.target_key, &value) {
                let (from, to) = match rel.direction {
                    LinkDirection::Inward => (target, node),
                    LinkDirection::Outward => (node, target),
                };
                self.merge_edge(from, &rel.rel_label, to)
                    .insert(LASTUPDATED.to_string(), tag.clone());
            }
        }
    }

    /// Edges of `rel` between `node` and a node labelled `rel.target_label`.
    fn edges_of(&self, node: u64, rel: &RelSchema) -> Vec<EdgeKey> {
        self.edges
            .keys()
            .filter(|k| k.rel == rel.rel_label)
            .filter(|k| match rel.direction {
                LinkDirection::Inward => k.to == node && self.has_label(k.from, &rel.target_label),
                LinkDirection::Outward => k.from == node && self.has_label(k.to, &rel.target_label),
            })
            .cloned()
            .collect()
    }

    fn resolve_edge(&self, key: &EdgeKey, properties: &Record) -> Option<MemoryRelationship> {
        Some(MemoryRelationship {
            rel_label: key.rel.clone(),
            from: self.nodes.get(&key.from)?.clone(),
            to: self.nodes.get(&key.to)?.clone(),
            properties: properties.clone(),
        })
    }
}

/// In-memory [`GraphStore`].
#[derive(Debug, Default)]
pub struct MemoryGraph {
    state: RwLock<GraphState>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node directly, bypassing schemas. Used to seed nodes owned
    /// by other connectors (service accounts, projects).
    pub async fn insert_node(&self, labels: &[&str], properties: Record) {
        let mut state = self.state.write().await;
        let id = state.next_id;
        state.next_id += 1;
        state.nodes.insert(
            id,
            MemoryNode {
                labels: labels.iter().map(|l| l.to_string()).collect(),
                properties,
            },
        );
    }

    pub async fn counts(&self) -> GraphCounts {
        let state = self.state.read().await;
        GraphCounts {
            nodes: state.nodes.len(),
            relationships: state.edges.len(),
        }
    }

    /// Ids of every node carrying `label`.
    pub async fn node_ids(&self, label: &str) -> BTreeSet<String> {
        let state = self.state.read().await;
        state
            .nodes
            .values()
            .filter(|n| n.labels.contains(label))
            .filter_map(|n| n.id().map(id_string))
            .collect()
    }

    /// The node with `label` and identity `id`.
    pub async fn node(&self, label: &str, id: &str) -> Option<MemoryNode> {
        let state = self.state.read().await;
        let key = Value::String(id.to_string());
        state
            .find_nodes(label, ID_PROPERTY, &key)
            .first()
            .and_then(|n| state.nodes.get(n))
            .cloned()
    }

    /// `(from.id, to.id)` for every `(:from_label)-[:rel_label]->(:to_label)`.
    pub async fn relationships(
        &self,
        from_label: &str,
        rel_label: &str,
        to_label: &str,
    ) -> BTreeSet<(String, String)> {
        let state = self.state.read().await;
        state
            .edges
            .keys()
            .filter(|k| k.rel == rel_label)
            .filter(|k| state.has_label(k.from, from_label) && state.has_label(k.to, to_label))
            .filter_map(|k| {
                let from = state.nodes.get(&k.from)?.id()?;
                let to = state.nodes.get(&k.to)?.id()?;
                Some((id_string(from), id_string(to)))
            })
            .collect()
    }

    pub async fn snapshot(&self) -> GraphSnapshot {
        let state = self.state.read().await;
        GraphSnapshot {
            nodes: state.nodes.values().cloned().collect(),
            relationships: state
                .edges
                .iter()
                .filter_map(|(k, props)| state.resolve_edge(k, props))
                .collect(),
        }
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn merge_scope(&self, scope: &ScopeRef, update_tag: i64) -> Result<(), GraphError> {
        let mut state = self.state.write().await;
        let node = state.merge_node(&scope.label, ID_PROPERTY, &Value::String(scope.id.clone()));
        if let Some(n) = state.nodes.get_mut(&node) {
            n.properties
                .insert(LASTUPDATED.to_string(), Value::from(update_tag));
        }
        Ok(())
    }

    async fn load(
        &self,
        schema: &NodeSchema,
        records: &[Record],
        kwargs: &Kwargs,
    ) -> Result<(), GraphError> {
        let invalid = |reason: &str| GraphError::InvalidBatch {
            label: schema.label.clone(),
            reason: reason.to_string(),
        };

        let id_ref = schema.id_ref().ok_or_else(|| invalid("schema has no id property"))?;
        let ids: Vec<Value> = records
            .iter()
            .map(|r| id_ref.source.resolve(r, kwargs))
            .collect();
        // Neo4j refuses to MERGE on null; reject before touching anything.
        if ids.iter().any(Value::is_null) {
            return Err(invalid("record with null id"));
        }

        let tag = kwargs.get(LASTUPDATED).cloned().unwrap_or(Value::Null);
        let mut state = self.state.write().await;

        for (record, id) in records.iter().zip(&ids) {
            let node = state.merge_node(&schema.label, ID_PROPERTY, id);
            if let Some(n) = state.nodes.get_mut(&node) {
                for prop in &schema.properties {
                    match prop.source.resolve(record, kwargs) {
                        Value::Null => {
                            n.properties.remove(&prop.name);
                        },
                        value => {
                            n.properties.insert(prop.name.clone(), value);
                        },
                    }
                }
                n.labels.extend(schema.extra_labels.iter().cloned());
            }

            for rel in std::iter::once(&schema.scope_rel).chain(&schema.other_rels) {
                state.link(node, rel, record, kwargs, &tag);
            }
        }

        Ok(())
    }

    async fn cleanup(
        &self,
        schema: &NodeSchema,
        params: &CleanupParams,
    ) -> Result<CleanupStats, GraphError> {
        let mut state = self.state.write().await;
        let tag = Value::from(params.update_tag);
        let scope_rel = &schema.scope_rel;
        let scope_nodes = state.find_nodes(
            &scope_rel.target_label,
            &scope_rel.target_key,
            &Value::String(params.scope_id.clone()),
        );

        let members: Vec<u64> = state
            .nodes
            .iter()
            .filter(|(_, n)| n.labels.contains(&schema.label))
            .map(|(id, _)| *id)
            .filter(|id| {
                state
                    .edges_of(*id, scope_rel)
                    .iter()
                    .any(|k| scope_nodes.contains(&k.from) || scope_nodes.contains(&k.to))
            })
            .collect();

        let mut stats = CleanupStats::default();

        let stale_nodes: Vec<u64> = members
            .iter()
            .copied()
            .filter(|id| state.nodes.get(id).is_some_and(|n| is_stale(&n.properties, &tag)))
            .collect();
        for node in &stale_nodes {
            state.detach_delete(*node);
            stats.nodes_deleted += 1;
        }

        let mut stale_edges = Vec::new();
        for node in members.iter().filter(|n| !stale_nodes.contains(n)) {
            let scoped = state
                .edges_of(*node, scope_rel)
                .into_iter()
                .filter(|k| scope_nodes.contains(&k.from) || scope_nodes.contains(&k.to));
            let others = schema.other_rels.iter().flat_map(|rel| state.edges_of(*node, rel));
            stale_edges.extend(
                scoped
                    .chain(others)
                    .filter(|k| state.edges.get(k).is_some_and(|p| is_stale(p, &tag))),
            );
        }
        for edge in stale_edges {
            if state.edges.remove(&edge).is_some() {
                stats.relationships_deleted += 1;
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> NodeSchema {
        serde_json::from_value(json!({
            "label": "Widget",
            "properties": [
                {"name": "id", "field": "id"},
                {"name": "color", "field": "color"},
                {"name": "lastupdated", "kwarg": "lastupdated"}
            ],
            "scope_rel": {
                "rel_label": "RESOURCE", "target_label": "GCPProject", "target_key": "id",
                "source": {"kwarg": "PROJECT_ID"}, "direction": "inward"
            }
        }))
        .unwrap()
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn kwargs(tag: i64, project: &str) -> Kwargs {
        Kwargs::from([
            (LASTUPDATED.to_string(), json!(tag)),
            ("PROJECT_ID".to_string(), json!(project)),
        ])
    }

    #[tokio::test]
    async fn test_load_overwrites_and_clears_properties() {
        let graph = MemoryGraph::new();
        graph.merge_scope(&ScopeRef::project("p1"), 1).await.unwrap();

        graph
            .load(&schema(), &[record(json!({"id": "w", "color": "red"}))], &kwargs(1, "p1"))
            .await
            .unwrap();
        graph
            .load(&schema(), &[record(json!({"id": "w"}))], &kwargs(2, "p1"))
            .await
            .unwrap();

        let node = graph.node("Widget", "w").await.unwrap();
        assert_eq!(node.properties.get("color"), None);
        assert_eq!(node.properties.get(LASTUPDATED), Some(&json!(2)));
        assert_eq!(graph.counts().await, GraphCounts { nodes: 2, relationships: 1 });
    }

    #[tokio::test]
    async fn test_load_rejects_null_id_without_writing() {
        let graph = MemoryGraph::new();
        let err = graph
            .load(
                &schema(),
                &[record(json!({"id": "ok"})), record(json!({"color": "blue"}))],
                &kwargs(1, "p1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidBatch { .. }));
        assert_eq!(graph.counts().await.nodes, 0);
    }

    #[tokio::test]
    async fn test_cleanup_skips_nodes_outside_scope() {
        let graph = MemoryGraph::new();
        graph.merge_scope(&ScopeRef::project("p1"), 1).await.unwrap();
        graph
            .load(&schema(), &[record(json!({"id": "w"}))], &kwargs(1, "p1"))
            .await
            .unwrap();
        graph
            .insert_node(&["Widget"], record(json!({"id": "untagged"})))
            .await;

        let stats = graph
            .cleanup(
                &schema(),
                &CleanupParams {
                    update_tag: 2,
                    scope_id: "p1".into(),
                    limit: 100,
                },
            )
            .await
            .unwrap();

        assert_eq!(stats.nodes_deleted, 1);
        assert_eq!(graph.node_ids("Widget").await, BTreeSet::from(["untagged".to_string()]));
    }
}
