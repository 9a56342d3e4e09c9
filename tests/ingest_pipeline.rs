//! End-to-end pipeline tests against an in-process work-tracking service

use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use tempfile::TempDir;
use ticketlog::remote::{
    ClassificationNodePayload, CommentPayload, RemoteError, Result, RevisionPayload,
    WorkItemPayload,
};
use ticketlog::{
    ingest_classification, Database, IngestOptions, Orchestrator, RevisionPolicy, StructureGroup,
    TagPolicy, WorkTrackingApi,
};

/// Mutable fake service: tests edit items between runs
#[derive(Default)]
struct FakeService {
    items: Mutex<BTreeMap<i32, Value>>,
    revisions: BTreeMap<i32, Vec<Value>>,
    comments: BTreeMap<i32, Vec<Value>>,
    broken_detail: BTreeSet<i32>,
    tree: Option<Value>,
    bulk_calls: Mutex<Vec<Vec<i32>>>,
}

impl FakeService {
    fn set_fields(&self, id: i32, fields: Value) {
        self.items.lock().unwrap().insert(id, fields);
    }

    fn payload(&self, id: i32) -> Option<WorkItemPayload> {
        let fields = self.items.lock().unwrap().get(&id)?.clone();
        Some(WorkItemPayload {
            id,
            rev: Some(1),
            fields,
            ..Default::default()
        })
    }
}

impl WorkTrackingApi for FakeService {
    fn query_ids(&self, _query: &str) -> Result<Vec<i32>> {
        Ok(self.items.lock().unwrap().keys().copied().collect())
    }

    fn fetch_bulk(&self, ids: &[i32]) -> Result<Vec<WorkItemPayload>> {
        self.bulk_calls.lock().unwrap().push(ids.to_vec());
        Ok(ids.iter().filter_map(|&id| self.payload(id)).collect())
    }

    fn fetch_detail(&self, id: i32) -> Result<WorkItemPayload> {
        if self.broken_detail.contains(&id) {
            return Err(RemoteError::Status {
                status: 500,
                url: format!("workitems/{}", id),
                body: "internal error".to_string(),
            });
        }
        self.payload(id)
            .ok_or_else(|| RemoteError::NotFound(format!("workitems/{}", id)))
    }

    fn fetch_revisions(&self, id: i32) -> Result<Vec<RevisionPayload>> {
        Ok(self
            .revisions
            .get(&id)
            .map(|revs| {
                revs.iter()
                    .map(|fields| WorkItemPayload {
                        id,
                        rev: None,
                        fields: fields.clone(),
                        ..Default::default()
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn fetch_comments(&self, id: i32) -> Result<Vec<CommentPayload>> {
        Ok(self
            .comments
            .get(&id)
            .map(|all| {
                all.iter()
                    .filter_map(|c| c.as_object().cloned())
                    .collect::<Vec<Map<String, Value>>>()
            })
            .unwrap_or_default())
    }

    fn fetch_classification_tree(
        &self,
        _group: StructureGroup,
        _path: &str,
        _depth: u32,
    ) -> Result<ClassificationNodePayload> {
        let tree = self
            .tree
            .clone()
            .ok_or_else(|| RemoteError::NotFound("classificationnodes".to_string()))?;
        serde_json::from_value(tree).map_err(|e| RemoteError::Parse(e.to_string()))
    }
}

fn temp_db() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::open_at(dir.path().join("history.db")).unwrap();
    (dir, db)
}

fn options(chunk_size: usize) -> IngestOptions {
    IngestOptions {
        chunk_size,
        workers: 3,
        ..Default::default()
    }
}

#[test]
fn test_three_items_in_two_chunks_with_one_broken_detail() {
    let (_dir, db) = temp_db();
    let mut service = FakeService::default();
    for id in [101, 102, 103] {
        service.set_fields(id, json!({ "System.Title": format!("Item {}", id) }));
    }
    service.broken_detail.insert(102);

    let summary = Orchestrator::new(&service, &db, options(2)).run("q").unwrap();

    assert_eq!(
        *service.bulk_calls.lock().unwrap(),
        vec![vec![101, 102], vec![103]]
    );
    assert_eq!(db.work_item_ids().unwrap(), vec![101, 103]);
    assert_eq!(summary.ingested, 2);
    assert_eq!(summary.skipped_count(), 1);
    assert!(summary.skipped[0].reason.contains("500"));
    assert_eq!(db.recent_runs(1).unwrap()[0].skipped, 1);
}

#[test]
fn test_first_identity_wins_across_records() {
    let (_dir, db) = temp_db();
    let service = FakeService::default();
    service.set_fields(
        1,
        json!({ "System.CreatedBy": { "id": "u1", "displayName": "Jane" } }),
    );
    service.set_fields(
        2,
        json!({ "System.CreatedBy": { "id": "u1", "displayName": "Jane Doe" } }),
    );

    // One id per chunk keeps record order deterministic
    let opts = IngestOptions {
        workers: 1,
        ..options(1)
    };
    Orchestrator::new(&service, &db, opts).run("q").unwrap();

    let identity = db.get_identity("u1").unwrap().unwrap();
    assert_eq!(identity.display_name.as_deref(), Some("Jane"));
    assert_eq!(db.summary().unwrap().identities, 1);
    assert_eq!(
        db.get_work_item(2).unwrap().unwrap().created_by_id.as_deref(),
        Some("u1")
    );
}

#[test]
fn test_anonymous_actor_leaves_reference_unset() {
    let (_dir, db) = temp_db();
    let service = FakeService::default();
    service.set_fields(
        5,
        json!({ "System.AssignedTo": { "displayName": "Someone" }, "System.ChangedBy": null }),
    );

    let summary = Orchestrator::new(&service, &db, options(10)).run("q").unwrap();
    assert_eq!(summary.ingested, 1);
    let row = db.get_work_item(5).unwrap().unwrap();
    assert_eq!(row.assigned_to_id, None);
    assert_eq!(row.changed_by_id, None);
    assert_eq!(db.summary().unwrap().identities, 0);
}

#[test]
fn test_removed_remote_tag_follows_policy() {
    let (_dir, db) = temp_db();
    let service = FakeService::default();
    service.set_fields(9, json!({ "System.Tags": "backend; urgent" }));
    Orchestrator::new(&service, &db, options(10)).run("q").unwrap();

    service.set_fields(9, json!({ "System.Tags": "backend" }));
    let accumulate = IngestOptions {
        tag_policy: TagPolicy::Accumulate,
        ..options(10)
    };
    Orchestrator::new(&service, &db, accumulate).run("q").unwrap();
    assert_eq!(db.tags_for(9).unwrap(), vec!["backend", "urgent"]);

    let summary = Orchestrator::new(&service, &db, options(10)).run("q").unwrap();
    assert_eq!(summary.tags_removed, 1);
    assert_eq!(db.tags_for(9).unwrap(), vec!["backend"]);
}

#[test]
fn test_revision_policies_across_runs() {
    let (_dir, db) = temp_db();
    let mut service = FakeService::default();
    service.set_fields(3, json!({ "System.State": "Closed" }));
    service.revisions.insert(
        3,
        vec![
            json!({ "System.Rev": 1, "System.State": "New" }),
            json!({ "System.Rev": 2, "System.State": "Closed" }),
        ],
    );

    let append = IngestOptions {
        revision_policy: RevisionPolicy::Append,
        ..options(10)
    };
    Orchestrator::new(&service, &db, append.clone()).run("q").unwrap();
    Orchestrator::new(&service, &db, append).run("q").unwrap();
    assert_eq!(db.revisions_for(3).unwrap().len(), 4);

    Orchestrator::new(&service, &db, options(10)).run("q").unwrap();
    let states: Vec<Option<String>> = db
        .revisions_for(3)
        .unwrap()
        .into_iter()
        .map(|r| r.state)
        .collect();
    assert_eq!(
        states,
        vec![Some("New".to_string()), Some("Closed".to_string())]
    );
}

#[test]
fn test_comments_are_stored_with_authors() {
    let (_dir, db) = temp_db();
    let mut service = FakeService::default();
    service.set_fields(4, json!({ "System.Title": "Commented" }));
    service.comments.insert(
        4,
        vec![
            json!({ "id": 41, "text": "first", "createdBy": { "id": "u7", "displayName": "Ann" } }),
            json!({ "id": 42, "text": "second", "modifiedBy": { "uniqueName": "bot@contoso.com" } }),
        ],
    );

    let summary = Orchestrator::new(&service, &db, options(10)).run("q").unwrap();
    assert_eq!(summary.comments_written, 2);

    let comments = db.comments_for(4).unwrap();
    assert_eq!(comments[0].created_by_id.as_deref(), Some("u7"));
    assert_eq!(comments[1].modified_by_id.as_deref(), Some("bot@contoso.com"));
    assert_eq!(db.summary().unwrap().identities, 2);
}

#[test]
fn test_iteration_tree_is_flattened_into_store() {
    let (_dir, db) = temp_db();
    let service = FakeService {
        tree: Some(json!({
            "id": 1,
            "name": "Fabrikam",
            "path": "\\Fabrikam\\Iteration",
            "children": [
                {
                    "id": 2,
                    "name": "Release 1",
                    "path": "\\Fabrikam\\Iteration\\Release 1",
                    "children": [
                        {
                            "id": 3,
                            "name": "Sprint 1",
                            "path": "\\Fabrikam\\Iteration\\Release 1\\Sprint 1",
                            "attributes": {
                                "startDate": "2024-01-01T00:00:00Z",
                                "finishDate": "2024-01-14T00:00:00Z",
                                "timeFrame": "past"
                            }
                        }
                    ]
                },
                { "id": 4, "name": "Backlog", "path": "\\Fabrikam\\Iteration\\Backlog", "attributes": null }
            ]
        })),
        ..Default::default()
    };

    let summary = ingest_classification(&service, &db, StructureGroup::Iterations, 10).unwrap();
    assert_eq!(summary.nodes, 4);
    assert_eq!(summary.failed, 0);

    let nodes = db.classification_nodes("iterations").unwrap();
    assert_eq!(nodes.len(), 4);
    let sprint = nodes.iter().find(|n| n.node_id == 3).unwrap();
    assert_eq!(sprint.timeframe.as_deref(), Some("past"));
    let backlog = nodes.iter().find(|n| n.node_id == 4).unwrap();
    assert_eq!(backlog.start_date, None);
}
