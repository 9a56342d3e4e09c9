//! Work-item normalization
//!
//! Maps one loosely-typed work-item payload (plus its fetched revision and
//! comment history) onto the relational rows in [`crate::db`]. Every field is
//! read with an explicit default: a missing member becomes NULL, never an error.

use crate::db::{CommentRow, NewRevisionRow, RecordRows, WorkItemRow};
use crate::identity::{scalar_text, IdentityResolver};
use crate::remote::{CommentPayload, RemoteError, RevisionPayload, WorkItemPayload, WorkTrackingApi};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use thiserror::Error;

/// Field reference names read by the normalizer
pub mod field {
    pub const REV: &str = "System.Rev";
    pub const WORK_ITEM_TYPE: &str = "System.WorkItemType";
    pub const TITLE: &str = "System.Title";
    pub const STATE: &str = "System.State";
    pub const REASON: &str = "System.Reason";
    pub const HISTORY: &str = "System.History";
    pub const DESCRIPTION: &str = "System.Description";
    pub const CREATED_DATE: &str = "System.CreatedDate";
    pub const CHANGED_DATE: &str = "System.ChangedDate";
    pub const AUTHORIZED_DATE: &str = "System.AuthorizedDate";
    pub const REVISED_DATE: &str = "System.RevisedDate";
    pub const STATE_CHANGE_DATE: &str = "Microsoft.VSTS.Common.StateChangeDate";
    pub const ACTIVATED_DATE: &str = "Microsoft.VSTS.Common.ActivatedDate";
    pub const CLOSED_DATE: &str = "Microsoft.VSTS.Common.ClosedDate";
    pub const COMMENT_COUNT: &str = "System.CommentCount";
    pub const TEAM_PROJECT: &str = "System.TeamProject";
    pub const AREA_PATH: &str = "System.AreaPath";
    pub const AREA_ID: &str = "System.AreaId";
    pub const AREA_LEVEL: &str = "System.AreaLevel";
    pub const NODE_NAME: &str = "System.NodeName";
    pub const ITERATION_PATH: &str = "System.IterationPath";
    pub const ITERATION_ID: &str = "System.IterationId";
    pub const ITERATION_LEVEL: &str = "System.IterationLevel";
    pub const PARENT: &str = "System.Parent";
    pub const STORY_POINTS: &str = "Microsoft.VSTS.Scheduling.StoryPoints";
    pub const ORIGINAL_ESTIMATE: &str = "Microsoft.VSTS.Scheduling.OriginalEstimate";
    pub const REMAINING_WORK: &str = "Microsoft.VSTS.Scheduling.RemainingWork";
    pub const COMPLETED_WORK: &str = "Microsoft.VSTS.Scheduling.CompletedWork";
    pub const PRIORITY: &str = "Microsoft.VSTS.Common.Priority";
    pub const STACK_RANK: &str = "Microsoft.VSTS.Common.StackRank";
    pub const WATERMARK: &str = "System.Watermark";
    pub const PERSON_ID: &str = "System.PersonId";
    pub const CUSTOM_WORK: &str = "Custom.Work";
    pub const CREATED_BY: &str = "System.CreatedBy";
    pub const CHANGED_BY: &str = "System.ChangedBy";
    pub const AUTHORIZED_AS: &str = "System.AuthorizedAs";
    pub const ASSIGNED_TO: &str = "System.AssignedTo";
    pub const CLOSED_BY: &str = "Microsoft.VSTS.Common.ClosedBy";
    pub const TAGS: &str = "System.Tags";
}

/// Link type pointing from a child to its parent
const PARENT_LINK: &str = "System.LinkTypes.Hierarchy-Reverse";

/// Classification levels stored per path
const LEVELS: usize = 4;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("work item {id}: {reason}")]
    Malformed { id: i32, reason: String },

    #[error("work item {id}: failed to serialize fields: {source}")]
    Serialize {
        id: i32,
        source: serde_json::Error,
    },
}

/// Read-only view over a field map with lenient conversions
#[derive(Clone, Copy)]
struct Fields<'a>(&'a Map<String, Value>);

impl<'a> Fields<'a> {
    fn get(&self, key: &str) -> Option<&'a Value> {
        self.0.get(key)
    }

    fn text(&self, key: &str) -> Option<String> {
        scalar_text(self.get(key))
    }

    fn big(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn int(&self, key: &str) -> Option<i32> {
        self.big(key).and_then(|v| i32::try_from(v).ok())
    }

    fn float(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// `{prefix}1..4`, falling back to the backslash-separated path segments
    fn levels(&self, prefix: &str, path: Option<&str>) -> [Option<String>; LEVELS] {
        let segments: Vec<&str> = path
            .map(|p| p.split('\\').filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        std::array::from_fn(|i| {
            self.text(&format!("{}{}", prefix, i + 1))
                .or_else(|| segments.get(i).map(|s| s.to_string()))
        })
    }
}

/// Split a semicolon-delimited tag string into trimmed, non-empty, distinct tags
pub fn split_tags(raw: Option<&str>) -> BTreeSet<String> {
    raw.unwrap_or_default()
        .split(';')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parent id from a hierarchy-reverse relation URL (".../workItems/123")
fn parent_from_relations(relations: Option<&[Value]>) -> Option<i32> {
    relations?
        .iter()
        .filter(|rel| rel.get("rel").and_then(Value::as_str) == Some(PARENT_LINK))
        .filter_map(|rel| rel.get("url").and_then(Value::as_str))
        .find_map(|url| url.rsplit('/').next()?.parse().ok())
}

/// Rows for one work item plus what could not be fetched or mapped
#[derive(Debug)]
pub struct NormalizedRecord {
    pub rows: RecordRows,
    pub revisions_error: Option<RemoteError>,
    pub comments_error: Option<RemoteError>,
    /// Revision payloads without a usable revision number
    pub revisions_dropped: usize,
    /// Comment payloads without a usable comment id
    pub comments_dropped: usize,
}

/// Normalizes work items, resolving every embedded actor through the identity resolver
pub struct RecordNormalizer<'a, A: ?Sized> {
    api: &'a A,
    identities: &'a IdentityResolver<'a>,
}

impl<'a, A: WorkTrackingApi + ?Sized> RecordNormalizer<'a, A> {
    pub fn new(api: &'a A, identities: &'a IdentityResolver<'a>) -> Self {
        Self { api, identities }
    }

    fn actor(&self, fields: Fields<'_>, key: &str) -> Option<String> {
        self.identities.resolve(fields.get(key))
    }

    /// Map a payload to its work-item row and tag set (no history fetches)
    pub fn normalize_item(&self, payload: &WorkItemPayload) -> Result<(WorkItemRow, BTreeSet<String>), NormalizeError> {
        let id = payload.id;
        if id <= 0 {
            return Err(NormalizeError::Malformed {
                id,
                reason: "missing or non-positive id".to_string(),
            });
        }
        let map = payload.fields.as_object().ok_or_else(|| NormalizeError::Malformed {
            id,
            reason: format!("fields is {} instead of an object", json_kind(&payload.fields)),
        })?;
        let f = Fields(map);

        let tags = split_tags(f.get(field::TAGS).and_then(Value::as_str));

        let area_path = f.text(field::AREA_PATH);
        let iteration_path = f.text(field::ITERATION_PATH);
        let [area_level1, area_level2, area_level3, area_level4] =
            f.levels(field::AREA_LEVEL, area_path.as_deref());
        let [iteration_level1, iteration_level2, iteration_level3, iteration_level4] =
            f.levels(field::ITERATION_LEVEL, iteration_path.as_deref());

        let extra_fields = serde_json::to_string(map).map_err(|source| NormalizeError::Serialize { id, source })?;

        let row = WorkItemRow {
            id,
            rev: payload.rev.or_else(|| f.int(field::REV)),
            work_item_type: f.text(field::WORK_ITEM_TYPE),
            title: f.text(field::TITLE),
            state: f.text(field::STATE),
            reason: f.text(field::REASON),
            history: f.text(field::HISTORY),
            description: f.text(field::DESCRIPTION),
            created_date: f.text(field::CREATED_DATE),
            changed_date: f.text(field::CHANGED_DATE),
            state_change_date: f.text(field::STATE_CHANGE_DATE),
            activated_date: f.text(field::ACTIVATED_DATE),
            closed_date: f.text(field::CLOSED_DATE),
            comment_count: f.int(field::COMMENT_COUNT),
            team_project: f.text(field::TEAM_PROJECT),
            area_path,
            area_id: f.int(field::AREA_ID),
            area_level1,
            area_level2,
            area_level3,
            area_level4,
            iteration_path,
            iteration_id: f.int(field::ITERATION_ID),
            iteration_level1,
            iteration_level2,
            iteration_level3,
            iteration_level4,
            parent: f
                .int(field::PARENT)
                .or_else(|| parent_from_relations(payload.relations.as_deref())),
            story_points: f.float(field::STORY_POINTS),
            original_estimate: f.float(field::ORIGINAL_ESTIMATE),
            remaining_work: f.float(field::REMAINING_WORK),
            completed_work: f.float(field::COMPLETED_WORK),
            priority: f.int(field::PRIORITY),
            stack_rank: f.float(field::STACK_RANK),
            watermark: f.big(field::WATERMARK),
            person_id: f.big(field::PERSON_ID),
            custom_work: f.text(field::CUSTOM_WORK),
            created_by_id: self.actor(f, field::CREATED_BY),
            changed_by_id: self.actor(f, field::CHANGED_BY),
            authorized_as_id: self.actor(f, field::AUTHORIZED_AS),
            assigned_to_id: self.actor(f, field::ASSIGNED_TO),
            extra_fields,
        };

        Ok((row, tags))
    }

    /// Map one revision snapshot; None when it has no field map or revision number
    pub fn normalize_revision(&self, work_item_id: i32, payload: &RevisionPayload) -> Option<NewRevisionRow> {
        let f = Fields(payload.fields.as_object()?);
        let rev = payload.rev.or_else(|| f.int(field::REV))?;
        let iteration_path = f.text(field::ITERATION_PATH);
        let [iteration_level1, iteration_level2, iteration_level3, iteration_level4] =
            f.levels(field::ITERATION_LEVEL, iteration_path.as_deref());

        Some(NewRevisionRow {
            work_item_id,
            rev,
            work_item_type: f.text(field::WORK_ITEM_TYPE),
            title: f.text(field::TITLE),
            state: f.text(field::STATE),
            reason: f.text(field::REASON),
            team_project: f.text(field::TEAM_PROJECT),
            area_path: f.text(field::AREA_PATH),
            area_id: f.int(field::AREA_ID),
            node_name: f.text(field::NODE_NAME),
            iteration_path,
            iteration_id: f.int(field::ITERATION_ID),
            iteration_level1,
            iteration_level2,
            iteration_level3,
            iteration_level4,
            assigned_to_id: self.actor(f, field::ASSIGNED_TO),
            created_date: f.text(field::CREATED_DATE),
            created_by_id: self.actor(f, field::CREATED_BY),
            changed_date: f.text(field::CHANGED_DATE),
            changed_by_id: self.actor(f, field::CHANGED_BY),
            authorized_date: f.text(field::AUTHORIZED_DATE),
            authorized_as_id: self.actor(f, field::AUTHORIZED_AS),
            revised_date: f.text(field::REVISED_DATE),
            closed_date: f.text(field::CLOSED_DATE),
            closed_by_id: self.actor(f, field::CLOSED_BY),
            watermark: f.big(field::WATERMARK),
            comment_count: f.int(field::COMMENT_COUNT),
            story_points: f.float(field::STORY_POINTS),
            original_estimate: f.float(field::ORIGINAL_ESTIMATE),
            remaining_work: f.float(field::REMAINING_WORK),
            completed_work: f.float(field::COMPLETED_WORK),
            priority: f.int(field::PRIORITY),
            stack_rank: f.float(field::STACK_RANK),
        })
    }

    /// Map one comment; None when it carries no comment id
    pub fn normalize_comment(&self, work_item_id: i32, payload: &CommentPayload) -> Option<CommentRow> {
        let f = Fields(payload);
        let comment_id = f.int("id")?;
        let deleted = f.get("isDeleted").and_then(Value::as_bool) == Some(true);

        Some(CommentRow {
            comment_id,
            work_item_id,
            rev: f.int("rev").or_else(|| f.int("version")),
            comment_type: f.text("commentType").or_else(|| f.text("format")),
            state: f.text("state").or_else(|| deleted.then(|| "deleted".to_string())),
            body: f.text("text"),
            created_date: f.text("createdDate"),
            created_by_id: self.actor(f, "createdBy"),
            modified_date: f.text("modifiedDate"),
            modified_by_id: self.actor(f, "modifiedBy"),
        })
    }

    /// Normalize a work item and fetch its revision and comment history.
    ///
    /// History fetch failures are reported on the result, not raised: the item
    /// row is still produced, and each history kind is isolated from the other.
    pub fn normalize(&self, payload: &WorkItemPayload) -> Result<NormalizedRecord, NormalizeError> {
        let (item, tags) = self.normalize_item(payload)?;
        let id = item.id;

        let mut revisions_dropped = 0;
        let (revisions, revisions_error) = match self.api.fetch_revisions(id) {
            Ok(payloads) => {
                let rows: Vec<NewRevisionRow> = payloads
                    .iter()
                    .filter_map(|p| self.normalize_revision(id, p))
                    .collect();
                revisions_dropped = payloads.len() - rows.len();
                (Some(rows), None)
            }
            Err(e) => {
                tracing::error!(work_item = id, error = %e, "failed to fetch revisions");
                (None, Some(e))
            }
        };

        let mut comments_dropped = 0;
        let (comments, comments_error) = match self.api.fetch_comments(id) {
            Ok(payloads) => {
                let rows: Vec<CommentRow> = payloads
                    .iter()
                    .filter_map(|p| self.normalize_comment(id, p))
                    .collect();
                comments_dropped = payloads.len() - rows.len();
                (Some(rows), None)
            }
            Err(e) => {
                tracing::error!(work_item = id, error = %e, "failed to fetch comments");
                (None, Some(e))
            }
        };

        if revisions_dropped > 0 || comments_dropped > 0 {
            tracing::warn!(
                work_item = id,
                revisions_dropped,
                comments_dropped,
                "history entries without a usable key were dropped"
            );
        }

        Ok(NormalizedRecord {
            rows: RecordRows {
                item,
                tags,
                revisions,
                comments,
            },
            revisions_error,
            comments_error,
            revisions_dropped,
            comments_dropped,
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
