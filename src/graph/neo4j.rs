//! Neo4j graph store.

use async_trait::async_trait;
use neo4rs::{
    BoltBoolean, BoltFloat, BoltInteger, BoltList, BoltMap, BoltNull, BoltString, BoltType,
    ConfigBuilder, Graph, Query,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::cypher::{self, Deletes, DICT_LIST};
use super::{CleanupParams, CleanupStats, GraphError, GraphStore, Kwargs, NodeSchema, Record, ScopeRef};

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_database() -> String {
    "neo4j".to_string()
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            database: default_database(),
        }
    }
}

/// Convert a JSON value into a Bolt parameter.
pub fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::Boolean(BoltBoolean::new(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::Integer(BoltInteger::new(i)),
            None => BoltType::Float(BoltFloat::new(n.as_f64().unwrap_or_default())),
        },
        Value::String(s) => BoltType::String(BoltString::new(s)),
        Value::Array(items) => {
            let mut list = BoltList::new();
            for item in items {
                list.push(to_bolt(item));
            }
            BoltType::List(list)
        },
        Value::Object(map) => BoltType::Map(record_to_bolt(map)),
    }
}

fn record_to_bolt(record: &Record) -> BoltMap {
    let mut map = BoltMap::new();
    for (key, value) in record {
        map.put(BoltString::new(key), to_bolt(value));
    }
    map
}

/// [`GraphStore`] backed by a Neo4j database.
#[derive(Clone)]
pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    /// Connect and verify the server answers.
    ///
    /// neo4rs builds its pool lazily, so a `RETURN 1` ping forces the Bolt
    /// handshake here instead of on the first write.
    pub async fn connect(config: &GraphConfig) -> Result<Self, GraphError> {
        let neo4j_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .db(config.database.as_str())
            .max_connections(4)
            .fetch_size(100)
            .build()
            .map_err(|e| GraphError::Connect(e.to_string()))?;

        let graph = Graph::connect(neo4j_config)
            .await
            .map_err(|e| GraphError::Connect(e.to_string()))?;

        graph
            .run(Query::new("RETURN 1".to_string()))
            .await
            .map_err(|e| GraphError::Connect(format!("{} is not responding: {}", config.uri, e)))?;

        info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Create lookup indexes for every schema the sync writes.
    ///
    /// Safe to run repeatedly, every statement uses IF NOT EXISTS.
    pub async fn ensure_indexes<'a>(
        &self,
        schemas: impl IntoIterator<Item = &'a NodeSchema>,
    ) -> Result<(), GraphError> {
        let statements = cypher::index_statements(schemas);
        for statement in &statements {
            self.run(Query::new(statement.clone())).await?;
        }
        info!("Ensured {} graph indexes", statements.len());
        Ok(())
    }

    async fn run(&self, query: Query) -> Result<(), GraphError> {
        self.graph
            .run(query)
            .await
            .map_err(|e| GraphError::Write(e.to_string()))
    }

    async fn run_counting(&self, query: Query) -> Result<usize, GraphError> {
        let mut stream = self
            .graph
            .execute(query)
            .await
            .map_err(|e| GraphError::Write(e.to_string()))?;

        let mut deleted = 0;
        while let Some(row) = stream
            .next()
            .await
            .map_err(|e| GraphError::Write(e.to_string()))?
        {
            let count: i64 = row
                .get("deleted")
                .map_err(|e| GraphError::Write(format!("missing 'deleted' column: {:?}", e)))?;
            deleted += usize::try_from(count).unwrap_or_default();
        }
        Ok(deleted)
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn merge_scope(&self, scope: &ScopeRef, update_tag: i64) -> Result<(), GraphError> {
        let query = Query::new(format!(
            "MERGE (p:{} {{id: $id}})
             ON CREATE SET p.firstseen = timestamp()
             SET p.lastupdated = $tag",
            scope.label
        ))
        .param("id", scope.id.as_str())
        .param("tag", update_tag);

        self.run(query).await
    }

    async fn load(
        &self,
        schema: &NodeSchema,
        records: &[Record],
        kwargs: &Kwargs,
    ) -> Result<(), GraphError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut dict_list = BoltList::new();
        for record in records {
            dict_list.push(BoltType::Map(record_to_bolt(record)));
        }

        let mut query =
            Query::new(cypher::ingestion_query(schema)).param(DICT_LIST, BoltType::List(dict_list));
        for (key, value) in kwargs {
            query = query.param(key, to_bolt(value));
        }

        debug!(label = %schema.label, records = records.len(), "Running batched upsert");
        self.run(query).await
    }

    async fn cleanup(
        &self,
        schema: &NodeSchema,
        params: &CleanupParams,
    ) -> Result<CleanupStats, GraphError> {
        let mut stats = CleanupStats::default();

        for statement in cypher::cleanup_statements(schema) {
            loop {
                let query = Query::new(statement.query.clone())
                    .param("UPDATE_TAG", params.update_tag)
                    .param("PROJECT_ID", params.scope_id.as_str())
                    .param("LIMIT_SIZE", params.limit);

                let deleted = self.run_counting(query).await?;
                match statement.deletes {
                    Deletes::Nodes => stats.nodes_deleted += deleted,
                    Deletes::Relationships => stats.relationships_deleted += deleted,
                }

                if (deleted as i64) < params.limit {
                    break;
                }
            }
        }

        debug!(
            label = %schema.label,
            nodes = stats.nodes_deleted,
            relationships = stats.relationships_deleted,
            "Cleanup statements finished"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_bolt_scalars() {
        assert!(matches!(to_bolt(&json!(null)), BoltType::Null(_)));
        assert!(matches!(to_bolt(&json!(true)), BoltType::Boolean(_)));
        assert!(matches!(to_bolt(&json!(42)), BoltType::Integer(_)));
        assert!(matches!(to_bolt(&json!(1.5)), BoltType::Float(_)));
        assert!(matches!(to_bolt(&json!("x")), BoltType::String(_)));
    }

    #[test]
    fn test_to_bolt_nested() {
        let value = json!({"ids": ["a", "b"], "n": 1});
        match to_bolt(&value) {
            BoltType::Map(map) => assert_eq!(map.value.len(), 2),
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn test_default_config_points_at_localhost() {
        let config = GraphConfig::default();
        assert_eq!(config.uri, "bolt://localhost:7687");
        assert_eq!(config.database, "neo4j");
    }
}
