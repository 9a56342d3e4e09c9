//! Remote work-tracking capability
//!
//! The ingestion pipeline only needs "fetch items / revisions / comments /
//! classification nodes by criteria". [`WorkTrackingApi`] is that seam;
//! [`crate::azure::AzureDevOpsClient`] is the HTTP implementation.
//!
//! Payloads are kept loosely typed: work-item fields arrive as a JSON map whose
//! members come and go between items, so normalization reads them with explicit
//! defaults instead of deserializing into a rigid struct.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Documented upper bound on identifiers per bulk fetch
pub const MAX_BULK_IDS: usize = 200;

/// A work item as returned by the bulk or detail endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkItemPayload {
    #[serde(default)]
    pub id: i32,
    #[serde(default)]
    pub rev: Option<i32>,
    /// Field reference name -> value; expected to be a JSON object
    #[serde(default)]
    pub fields: Value,
    #[serde(default)]
    pub relations: Option<Vec<Value>>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Revisions share the work-item shape: id, revision number, field snapshot
pub type RevisionPayload = WorkItemPayload;

/// Comments are consumed as raw maps
pub type CommentPayload = Map<String, Value>;

/// One node of an iteration or area hierarchy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationNodePayload {
    #[serde(default)]
    pub id: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    /// startDate / finishDate / timeFrame; may be absent or malformed
    #[serde(default)]
    pub attributes: Option<Value>,
    #[serde(default)]
    pub children: Option<Vec<ClassificationNodePayload>>,
}

impl ClassificationNodePayload {
    pub fn children(&self) -> &[ClassificationNodePayload] {
        self.children.as_deref().unwrap_or_default()
    }

    /// Number of nodes in this subtree, root included
    pub fn count_nodes(&self) -> usize {
        1 + self.children().iter().map(Self::count_nodes).sum::<usize>()
    }
}

/// Which classification hierarchy to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureGroup {
    Iterations,
    Areas,
}

impl StructureGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            StructureGroup::Iterations => "iterations",
            StructureGroup::Areas => "areas",
        }
    }
}

impl std::fmt::Display for StructureGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StructureGroup {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "iterations" | "iteration" => Ok(StructureGroup::Iterations),
            "areas" | "area" => Ok(StructureGroup::Areas),
            other => Err(format!("unknown structure group '{}' (expected iterations or areas)", other)),
        }
    }
}

/// Error type for remote operations
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned {status}: {body}")]
    Status { status: u16, url: String, body: String },

    #[error("Not authenticated with the work-tracking service. Check the personal access token.")]
    NotAuthenticated,

    #[error("Rate limit exceeded. Try again later.")]
    RateLimited,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Bulk request of {count} ids exceeds the limit of {max}")]
    ChunkTooLarge { count: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Capability consumed by the ingestion pipeline.
///
/// Implementations are shared by the worker pool, hence `Send + Sync`.
pub trait WorkTrackingApi: Send + Sync {
    /// Candidate work-item ids matching a query, in the order the service returns them
    fn query_ids(&self, query: &str) -> Result<Vec<i32>>;

    /// Summary payloads for at most [`MAX_BULK_IDS`] ids
    fn fetch_bulk(&self, ids: &[i32]) -> Result<Vec<WorkItemPayload>>;

    /// Full payload (fields and relations) for one id
    fn fetch_detail(&self, id: i32) -> Result<WorkItemPayload>;

    fn fetch_revisions(&self, id: i32) -> Result<Vec<RevisionPayload>>;

    fn fetch_comments(&self, id: i32) -> Result<Vec<CommentPayload>>;

    /// Hierarchy rooted at `path` (empty for the group root), `depth` levels deep
    fn fetch_classification_tree(
        &self,
        group: StructureGroup,
        path: &str,
        depth: u32,
    ) -> Result<ClassificationNodePayload>;
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_work_item_payload_tolerates_missing_members() {
        let payload: WorkItemPayload = serde_json::from_value(json!({ "id": 42 })).unwrap();
        assert_eq!(payload.id, 42);
        assert_eq!(payload.rev, None);
        assert!(payload.fields.is_null());
    }

    #[test]
    fn test_classification_node_counts() {
        let tree: ClassificationNodePayload = serde_json::from_value(json!({
            "id": 1,
            "name": "Proj",
            "children": [
                { "id": 2, "name": "Sprint 1", "attributes": { "timeFrame": "past" } },
                { "id": 3, "name": "Release", "children": [ { "id": 4, "name": "Sprint 2" } ] }
            ]
        }))
        .unwrap();

        assert_eq!(tree.count_nodes(), 4);
        assert_eq!(tree.children()[1].children()[0].name, "Sprint 2");
    }

    #[test]
    fn test_structure_group_parse() {
        assert_eq!("Iterations".parse::<StructureGroup>(), Ok(StructureGroup::Iterations));
        assert_eq!("area".parse::<StructureGroup>(), Ok(StructureGroup::Areas));
        assert!("sprints".parse::<StructureGroup>().is_err());
        assert_eq!(StructureGroup::Areas.to_string(), "areas");
    }
}
