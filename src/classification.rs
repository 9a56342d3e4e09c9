//! Classification hierarchies (iterations, areas)
//!
//! The tree is not persisted as parent/child rows; every node becomes one flat
//! row carrying its full path and scheduling attributes.

use crate::db::{ClassificationNodeRow, Database};
use crate::identity::scalar_text;
use crate::remote::{ClassificationNodePayload, RemoteError, StructureGroup, WorkTrackingApi};
use serde_json::Value;

/// Attribute lookup that degrades to None for a missing or non-object map
fn attribute(attributes: Option<&Value>, key: &str) -> Option<String> {
    scalar_text(attributes?.as_object()?.get(key))
}

fn node_row(node: &ClassificationNodePayload, group: StructureGroup) -> ClassificationNodeRow {
    let attributes = node.attributes.as_ref();
    ClassificationNodeRow {
        node_id: node.id,
        structure_group: group.as_str().to_string(),
        name: node.name.clone(),
        path: node.path.clone(),
        start_date: attribute(attributes, "startDate"),
        finish_date: attribute(attributes, "finishDate"),
        timeframe: attribute(attributes, "timeFrame"),
    }
}

/// Flatten a tree in pre-order: each node is emitted before its children, root included.
pub fn flatten(root: &ClassificationNodePayload, group: StructureGroup) -> Vec<ClassificationNodeRow> {
    let mut rows = Vec::with_capacity(root.count_nodes());
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        rows.push(node_row(node, group));
        // Reversed so the first child is visited next
        stack.extend(node.children().iter().rev());
    }
    rows
}

/// Outcome of one hierarchy ingestion
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ClassificationSummary {
    pub group: String,
    pub nodes: usize,
    pub written: usize,
    pub failed: usize,
    /// Nodes without a positive id
    pub skipped: usize,
}

/// Fetch one hierarchy, flatten it and upsert every node.
///
/// Failing to fetch the tree is returned to the caller; a node that fails to
/// persist is logged and counted, and the remaining nodes are still written.
/// Nodes without a positive id are skipped, their children are not.
pub fn ingest_classification<A: WorkTrackingApi + ?Sized>(
    api: &A,
    db: &Database,
    group: StructureGroup,
    depth: u32,
) -> Result<ClassificationSummary, RemoteError> {
    let root = api.fetch_classification_tree(group, "", depth)?;
    let rows = flatten(&root, group);

    let mut summary = ClassificationSummary {
        group: group.to_string(),
        nodes: rows.len(),
        ..Default::default()
    };

    for row in &rows {
        if row.node_id <= 0 {
            summary.skipped += 1;
            tracing::warn!(node_id = row.node_id, name = %row.name, path = ?row.path, "classification node has no id");
            continue;
        }
        match db.upsert_classification_node(row) {
            Ok(()) => {
                summary.written += 1;
                tracing::debug!(node_id = row.node_id, name = %row.name, "classification node stored");
            }
            Err(e) => {
                summary.failed += 1;
                tracing::error!(node_id = row.node_id, error = %e, "failed to store classification node");
            }
        }
    }

    tracing::info!(
        group = %group,
        nodes = summary.nodes,
        failed = summary.failed,
        skipped = summary.skipped,
        "classification hierarchy stored"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::stub::StubApi;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn node(id: i32, name: &str, children: Vec<ClassificationNodePayload>) -> ClassificationNodePayload {
        ClassificationNodePayload {
            id,
            name: name.to_string(),
            path: Some(format!("\\Proj\\{}", name)),
            children: if children.is_empty() { None } else { Some(children) },
            ..Default::default()
        }
    }

    #[test]
    fn test_flatten_is_pre_order() {
        let tree = node(
            1,
            "Root",
            vec![
                node(2, "A", vec![node(3, "A1", vec![]), node(4, "A2", vec![])]),
                node(5, "B", vec![]),
            ],
        );
        let ids: Vec<i32> = flatten(&tree, StructureGroup::Iterations)
            .iter()
            .map(|r| r.node_id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_attributes_degrade_to_null() {
        let mut sprint = node(2, "Sprint 1", vec![]);
        sprint.attributes = Some(json!({
            "startDate": "2024-01-01T00:00:00Z",
            "finishDate": "2024-01-14T00:00:00Z",
            "timeFrame": "past"
        }));
        let mut broken = node(3, "Broken", vec![]);
        broken.attributes = Some(json!(["not", "a", "map"]));
        let tree = node(1, "Root", vec![sprint, broken]);

        let rows = flatten(&tree, StructureGroup::Iterations);
        assert_eq!(rows[0].start_date, None);
        assert_eq!(rows[1].start_date.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(rows[1].timeframe.as_deref(), Some("past"));
        assert_eq!(rows[2].finish_date, None);
        assert_eq!(rows[2].timeframe, None);
        assert!(rows.iter().all(|r| r.structure_group == "iterations"));
    }

    #[test]
    fn test_ingest_classification_writes_every_node() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = Database::open_at(dir.path().join("test.db")).unwrap();
        let api = StubApi {
            tree: Some(node(1, "Root", vec![node(2, "S1", vec![]), node(3, "S2", vec![])])),
            ..Default::default()
        };

        let summary = ingest_classification(&api, &db, StructureGroup::Areas, 10).unwrap();
        assert_eq!(summary.nodes, 3);
        assert_eq!(summary.written, 3);
        assert_eq!(db.classification_nodes("areas").unwrap().len(), 3);

        // Re-ingesting the same tree keeps one row per node
        ingest_classification(&api, &db, StructureGroup::Areas, 10).unwrap();
        assert_eq!(db.summary().unwrap().classification_nodes, 3);
    }

    #[test]
    fn test_nodes_without_id_are_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = Database::open_at(dir.path().join("test.db")).unwrap();
        let api = StubApi {
            tree: Some(node(
                1,
                "Root",
                vec![
                    node(0, "Unnamed", vec![node(4, "Nested", vec![])]),
                    node(0, "Other", vec![]),
                    node(-2, "Negative", vec![]),
                    node(3, "S1", vec![]),
                ],
            )),
            ..Default::default()
        };

        let summary = ingest_classification(&api, &db, StructureGroup::Iterations, 10).unwrap();
        assert_eq!(summary.nodes, 6);
        assert_eq!(summary.written, 3);
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.failed, 0);

        let mut ids: Vec<i32> = db
            .classification_nodes("iterations")
            .unwrap()
            .iter()
            .map(|n| n.node_id)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 3, 4]);
    }

    #[test]
    fn test_ingest_classification_propagates_fetch_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = Database::open_at(dir.path().join("test.db")).unwrap();
        let api = StubApi::default();
        assert!(ingest_classification(&api, &db, StructureGroup::Iterations, 10).is_err());
    }

    fn arb_tree() -> impl Strategy<Value = ClassificationNodePayload> {
        let leaf = Just(()).prop_map(|_| ClassificationNodePayload::default());
        leaf.prop_recursive(4, 64, 5, |inner| {
            prop::collection::vec(inner, 0..5).prop_map(|children| ClassificationNodePayload {
                children: Some(children),
                ..Default::default()
            })
        })
    }

    /// Assign distinct ids in an arbitrary (post-order) sequence
    fn number(tree: &mut ClassificationNodePayload, next: &mut i32) {
        if let Some(children) = tree.children.as_mut() {
            for child in children {
                number(child, next);
            }
        }
        *next += 1;
        tree.id = *next;
    }

    proptest! {
        #[test]
        fn prop_flatten_emits_each_node_once(mut tree in arb_tree()) {
            let mut next = 0;
            number(&mut tree, &mut next);

            let rows = flatten(&tree, StructureGroup::Iterations);
            prop_assert_eq!(rows.len(), tree.count_nodes());

            let ids: HashSet<i32> = rows.iter().map(|r| r.node_id).collect();
            prop_assert_eq!(ids.len(), rows.len());
            prop_assert_eq!(rows[0].node_id, tree.id);
        }
    }
}
