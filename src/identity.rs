//! Actor deduplication
//!
//! Identity references are embedded all over the payload graph (work-item fields,
//! revision snapshots, comment authors). [`IdentityResolver`] turns each one into
//! an `identities` primary key, inserting the row the first time an id is seen in
//! a run and never overwriting an existing row.

use crate::db::{Database, IdentityRow};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Render a scalar JSON value as text; objects, arrays, null and blank strings yield None
pub(crate) fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Build the identity row for an actor reference, or None when it carries neither
/// an id nor a unique name. Non-object references are treated as absent.
pub fn identity_row(actor: &Value) -> Option<IdentityRow> {
    let obj = actor.as_object()?;
    let unique_name = scalar_text(obj.get("uniqueName"));
    let id = scalar_text(obj.get("id")).or_else(|| unique_name.clone())?;

    Some(IdentityRow {
        id,
        display_name: scalar_text(obj.get("displayName")),
        url: scalar_text(obj.get("url")),
        unique_name,
        image_url: scalar_text(obj.get("imageUrl")),
        descriptor: scalar_text(obj.get("descriptor")),
    })
}

/// Per-run identity resolver; safe to share between worker threads
pub struct IdentityResolver<'a> {
    db: &'a Database,
    seen: Mutex<HashSet<String>>,
    inserted: AtomicUsize,
    failed: AtomicUsize,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            seen: Mutex::new(HashSet::new()),
            inserted: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// Resolve an optional actor reference to an identity id.
    ///
    /// Returns None for absent or anonymous references and when the identity row
    /// could not be persisted; the caller leaves its foreign key unset either way.
    pub fn resolve(&self, actor: Option<&Value>) -> Option<String> {
        let row = identity_row(actor?)?;

        // The lock is held across the insert so a concurrent caller never
        // returns an id whose row is not committed yet.
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if seen.contains(&row.id) {
            return Some(row.id);
        }

        match self.db.insert_identity_if_absent(&row) {
            Ok(added) => {
                if added {
                    self.inserted.fetch_add(1, Ordering::Relaxed);
                }
                seen.insert(row.id.clone());
                Some(row.id)
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(identity = %row.id, error = %e, "failed to persist identity");
                None
            }
        }
    }

    /// Distinct identities seen so far in this run
    pub fn seen_count(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or_default()
    }

    /// Rows newly added to the store by this run
    pub fn inserted_count(&self) -> usize {
        self.inserted.load(Ordering::Relaxed)
    }

    /// References dropped because their row could not be persisted
    pub fn failed_count(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn temp_db() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_identity_row_prefers_id() {
        let row = identity_row(&json!({
            "id": "abc",
            "uniqueName": "jane@contoso.com",
            "displayName": "Jane"
        }))
        .unwrap();
        assert_eq!(row.id, "abc");
        assert_eq!(row.unique_name.as_deref(), Some("jane@contoso.com"));
    }

    #[test]
    fn test_identity_row_falls_back_to_unique_name() {
        let row = identity_row(&json!({ "id": "", "uniqueName": "svc@contoso.com" })).unwrap();
        assert_eq!(row.id, "svc@contoso.com");
    }

    #[test]
    fn test_identity_row_requires_a_key() {
        assert!(identity_row(&json!({ "displayName": "Ghost" })).is_none());
        assert!(identity_row(&json!("Jane <CONTOSO\\jane>")).is_none());
        assert!(identity_row(&Value::Null).is_none());
    }

    #[test]
    fn test_resolve_absent_reference() {
        let (_dir, db) = temp_db();
        let resolver = IdentityResolver::new(&db);
        assert_eq!(resolver.resolve(None), None);
        assert_eq!(resolver.resolve(Some(&json!({}))), None);
        assert_eq!(db.summary().unwrap().identities, 0);
    }

    #[test]
    fn test_first_reference_wins_within_a_run() {
        let (_dir, db) = temp_db();
        let resolver = IdentityResolver::new(&db);

        let first = json!({ "id": "u1", "displayName": "Jane" });
        let later = json!({ "id": "u1", "displayName": "Jane Doe" });
        assert_eq!(resolver.resolve(Some(&first)).as_deref(), Some("u1"));
        assert_eq!(resolver.resolve(Some(&later)).as_deref(), Some("u1"));

        let stored = db.get_identity("u1").unwrap().unwrap();
        assert_eq!(stored.display_name.as_deref(), Some("Jane"));
        assert_eq!(resolver.seen_count(), 1);
        assert_eq!(resolver.inserted_count(), 1);
    }

    #[test]
    fn test_existing_row_survives_a_new_run() {
        let (_dir, db) = temp_db();
        IdentityResolver::new(&db).resolve(Some(&json!({ "id": "u2", "displayName": "Old" })));

        let next_run = IdentityResolver::new(&db);
        next_run.resolve(Some(&json!({ "id": "u2", "displayName": "New" })));

        assert_eq!(next_run.inserted_count(), 0);
        let stored = db.get_identity("u2").unwrap().unwrap();
        assert_eq!(stored.display_name.as_deref(), Some("Old"));
    }
}
