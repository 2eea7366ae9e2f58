//! Cypher generation from node schemas.
//!
//! All statements take their data as parameters: records are bound as
//! `$DictList` and each kwarg as `$<name>`. Cleanup statements take
//! `$UPDATE_TAG`, `$PROJECT_ID` and `$LIMIT_SIZE` and return the number of
//! entities removed as `deleted`.

use std::collections::BTreeSet;
use std::fmt::Write;

use super::schema::{LinkDirection, NodeSchema, PropertySource, RelSchema, ID_PROPERTY, LASTUPDATED};

/// Parameter holding the record list of a batched write.
pub const DICT_LIST: &str = "DictList";

/// What a cleanup statement removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletes {
    Nodes,
    Relationships,
}

/// One cleanup statement, run repeatedly until a batch comes back short.
#[derive(Debug, Clone)]
pub struct CleanupStatement {
    pub query: String,
    pub deletes: Deletes,
}

fn value_expr(source: &PropertySource) -> String {
    match source {
        PropertySource::Field(key) => format!("item.{}", key),
        PropertySource::Kwarg(key) => format!("${}", key),
    }
}

fn rel_pattern(rel: &RelSchema, var: &str, target: &str) -> String {
    match rel.direction {
        LinkDirection::Inward => format!("(i)<-[{}:{}]-({})", var, rel.rel_label, target),
        LinkDirection::Outward => format!("(i)-[{}:{}]->({})", var, rel.rel_label, target),
    }
}

fn rel_subquery(rel: &RelSchema) -> String {
    let mut q = String::from("CALL {\n    WITH i, item\n");
    let match_value = if rel.one_to_many {
        let _ = writeln!(q, "    UNWIND {} AS rel_target", value_expr(&rel.source));
        "rel_target".to_string()
    } else {
        value_expr(&rel.source)
    };
    let _ = writeln!(
        q,
        "    OPTIONAL MATCH (j:{} {{{}: {}}})",
        rel.target_label, rel.target_key, match_value
    );
    q.push_str("    WITH i, item, j WHERE j IS NOT NULL\n");
    let _ = writeln!(q, "    MERGE {}", rel_pattern(rel, "r", "j"));
    q.push_str("    ON CREATE SET r.firstseen = timestamp()\n");
    let _ = writeln!(q, "    SET r.{} = ${}", LASTUPDATED, LASTUPDATED);
    q.push('}');
    q
}

/// The batched upsert statement for `schema`.
///
/// One row of `$DictList` per node: MERGE on `id`, overwrite every schema
/// property, then MERGE the scope relationship and each other relationship
/// whose target exists.
pub fn ingestion_query(schema: &NodeSchema) -> String {
    let id_expr = schema
        .id_ref()
        .map(|p| value_expr(&p.source))
        .unwrap_or_else(|| format!("item.{}", ID_PROPERTY));

    let mut q = format!("UNWIND ${} AS item\n", DICT_LIST);
    let _ = writeln!(q, "MERGE (i:{} {{{}: {}}})", schema.label, ID_PROPERTY, id_expr);
    q.push_str("ON CREATE SET i.firstseen = timestamp()\n");

    let assignments: Vec<String> = schema
        .properties
        .iter()
        .map(|p| format!("    i.{} = {}", p.name, value_expr(&p.source)))
        .collect();
    let _ = writeln!(q, "SET\n{}", assignments.join(",\n"));

    if !schema.extra_labels.is_empty() {
        let _ = writeln!(q, "SET i:{}", schema.extra_labels.join(":"));
    }

    q.push_str("WITH i, item\n");
    let subqueries: Vec<String> = std::iter::once(&schema.scope_rel)
        .chain(&schema.other_rels)
        .map(rel_subquery)
        .collect();
    q.push_str(&subqueries.join("\n"));
    q
}

fn scope_match(schema: &NodeSchema, rel_var: &str) -> String {
    let rel = &schema.scope_rel;
    let target = format!("(:{} {{{}: $PROJECT_ID}})", rel.target_label, rel.target_key);
    match rel.direction {
        LinkDirection::Inward => format!(
            "MATCH (n:{})<-[{}:{}]-{}",
            schema.label, rel_var, rel.rel_label, target
        ),
        LinkDirection::Outward => format!(
            "MATCH (n:{})-[{}:{}]->{}",
            schema.label, rel_var, rel.rel_label, target
        ),
    }
}

/// Tag-scoped cleanup statements for `schema`, in execution order.
///
/// Only nodes of `schema.label` attached to `$PROJECT_ID` through the scope
/// relationship are candidates; nothing else in the graph is touched.
pub fn cleanup_statements(schema: &NodeSchema) -> Vec<CleanupStatement> {
    let mut statements = vec![
        CleanupStatement {
            query: format!(
                "{}\nWHERE n.{tag} <> $UPDATE_TAG\nWITH DISTINCT n LIMIT $LIMIT_SIZE\nDETACH DELETE n\nRETURN count(*) AS deleted",
                scope_match(schema, ""),
                tag = LASTUPDATED
            ),
            deletes: Deletes::Nodes,
        },
        CleanupStatement {
            query: format!(
                "{}\nWHERE s.{tag} <> $UPDATE_TAG\nWITH s LIMIT $LIMIT_SIZE\nDELETE s\nRETURN count(*) AS deleted",
                scope_match(schema, "s"),
                tag = LASTUPDATED
            ),
            deletes: Deletes::Relationships,
        },
    ];

    for rel in &schema.other_rels {
        let pattern = match rel.direction {
            LinkDirection::Inward => format!("(n)<-[r:{}]-(:{})", rel.rel_label, rel.target_label),
            LinkDirection::Outward => format!("(n)-[r:{}]->(:{})", rel.rel_label, rel.target_label),
        };
        statements.push(CleanupStatement {
            query: format!(
                "{}\nMATCH {}\nWHERE r.{tag} <> $UPDATE_TAG\nWITH r LIMIT $LIMIT_SIZE\nDELETE r\nRETURN count(*) AS deleted",
                scope_match(schema, ""),
                pattern,
                tag = LASTUPDATED
            ),
            deletes: Deletes::Relationships,
        });
    }

    statements
}

/// `CREATE INDEX IF NOT EXISTS` statements for every label/key the schemas match on.
pub fn index_statements<'a>(schemas: impl IntoIterator<Item = &'a NodeSchema>) -> Vec<String> {
    let mut pairs = BTreeSet::new();
    for schema in schemas {
        pairs.insert((schema.label.clone(), ID_PROPERTY.to_string()));
        pairs.insert((schema.label.clone(), LASTUPDATED.to_string()));
        for rel in std::iter::once(&schema.scope_rel).chain(&schema.other_rels) {
            pairs.insert((rel.target_label.clone(), rel.target_key.clone()));
        }
    }
    pairs
        .into_iter()
        .map(|(label, key)| format!("CREATE INDEX IF NOT EXISTS FOR (n:{}) ON (n.{})", label, key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bucket_like() -> NodeSchema {
        serde_json::from_value(json!({
            "label": "GCPBucket",
            "extra_labels": ["GCPResource"],
            "properties": [
                {"name": "id", "field": "id"},
                {"name": "kind", "field": "kind"},
                {"name": "lastupdated", "kwarg": "lastupdated"}
            ],
            "scope_rel": {
                "rel_label": "RESOURCE", "target_label": "GCPProject", "target_key": "id",
                "source": {"kwarg": "PROJECT_ID"}, "direction": "inward"
            },
            "other_rels": [{
                "rel_label": "LABELED", "target_label": "GCPBucketLabel", "target_key": "id",
                "source": {"field": "label_ids"}, "one_to_many": true, "direction": "outward"
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_ingestion_merges_on_id_and_sets_properties() {
        let q = ingestion_query(&bucket_like());
        assert!(q.starts_with("UNWIND $DictList AS item\nMERGE (i:GCPBucket {id: item.id})"));
        assert!(q.contains("i.kind = item.kind"));
        assert!(q.contains("i.lastupdated = $lastupdated"));
        assert!(q.contains("SET i:GCPResource"));
    }

    #[test]
    fn test_ingestion_links_scope_and_other_rels() {
        let q = ingestion_query(&bucket_like());
        assert!(q.contains("OPTIONAL MATCH (j:GCPProject {id: $PROJECT_ID})"));
        assert!(q.contains("MERGE (i)<-[r:RESOURCE]-(j)"));
        assert!(q.contains("UNWIND item.label_ids AS rel_target"));
        assert!(q.contains("MERGE (i)-[r:LABELED]->(j)"));
        assert_eq!(q.matches("SET r.lastupdated = $lastupdated").count(), 2);
    }

    #[test]
    fn test_cleanup_is_scoped_to_label_and_project() {
        let statements = cleanup_statements(&bucket_like());
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0].deletes, Deletes::Nodes);
        for s in &statements {
            assert!(s.query.contains("MATCH (n:GCPBucket)<-["));
            assert!(s.query.contains(":RESOURCE]-(:GCPProject {id: $PROJECT_ID})"));
            assert!(s.query.contains("LIMIT $LIMIT_SIZE"));
            assert!(s.query.ends_with("RETURN count(*) AS deleted"));
        }
        assert!(statements[0].query.contains("DETACH DELETE n"));
        assert!(statements[2].query.contains("MATCH (n)-[r:LABELED]->(:GCPBucketLabel)"));
    }

    #[test]
    fn test_index_statements_are_deduplicated() {
        let schema = bucket_like();
        let statements = index_statements([&schema, &schema]);
        assert_eq!(statements.len(), 4);
        assert!(statements.contains(&"CREATE INDEX IF NOT EXISTS FOR (n:GCPProject) ON (n.id)".to_string()));
    }
}
