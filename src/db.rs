//! SQLite store with Diesel ORM
//!
//! Holds the normalized work-tracking tables: identities, work items, tags,
//! revisions, comments, flattened classification nodes and the run log.
//! The schema is created idempotently on open and can be rebuilt with [`Database::reset`].

use crate::config::{RevisionPolicy, TagPolicy};
use crate::schema::*;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Walk up directory tree to find .ticketlog folder (like git finds .git)
/// Can be overridden with TICKETLOG_DB_PATH env var
fn get_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("TICKETLOG_DB_PATH") {
        return PathBuf::from(path);
    }

    if let Ok(current_dir) = std::env::current_dir() {
        let mut dir = current_dir.as_path();
        loop {
            let store_dir = dir.join(".ticketlog");
            if store_dir.is_dir() {
                return store_dir.join("history.db");
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }

    PathBuf::from(".ticketlog/history.db")
}

/// Current schema version for ticketlog
pub const CURRENT_SCHEMA: StoreSchema = StoreSchema {
    major: 1,
    minor: 2,
    patch: 0,
    name: "work-tracking-history",
    features: &[
        "identities",
        "work_items",
        "work_item_tags",
        "revisions",
        "comments",
        "classification_nodes",
        "ingest_runs",
    ],
};

/// Describes the version and capabilities of the schema
#[derive(Debug, Clone)]
pub struct StoreSchema {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub name: &'static str,
    pub features: &'static [&'static str],
}

impl StoreSchema {
    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(&feature)
    }
}

impl std::fmt::Display for StoreSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({})", self.version_string(), self.name)
    }
}

// ============================================================================
// Diesel Models
// ============================================================================

#[derive(Insertable)]
#[diesel(table_name = schema_versions)]
struct NewSchemaVersion<'a> {
    version: &'a str,
    name: &'a str,
    features: &'a str,
    introduced_at: &'a str,
}

/// An actor referenced by work items, revisions or comments
#[derive(Insertable, Queryable, Selectable, Debug, Clone, Default, PartialEq, serde::Serialize)]
#[diesel(table_name = identities)]
pub struct IdentityRow {
    pub id: String,
    pub display_name: Option<String>,
    pub url: Option<String>,
    pub unique_name: Option<String>,
    pub image_url: Option<String>,
    pub descriptor: Option<String>,
}

/// One work item; written as a whole-row overwrite on every ingestion
#[derive(Insertable, AsChangeset, Queryable, Selectable, Debug, Clone, Default, PartialEq, serde::Serialize)]
#[diesel(table_name = work_items)]
#[diesel(treat_none_as_null = true)]
pub struct WorkItemRow {
    pub id: i32,
    pub rev: Option<i32>,
    pub work_item_type: Option<String>,
    pub title: Option<String>,
    pub state: Option<String>,
    pub reason: Option<String>,
    pub history: Option<String>,
    pub description: Option<String>,
    pub created_date: Option<String>,
    pub changed_date: Option<String>,
    pub state_change_date: Option<String>,
    pub activated_date: Option<String>,
    pub closed_date: Option<String>,
    pub comment_count: Option<i32>,
    pub team_project: Option<String>,
    pub area_path: Option<String>,
    pub area_id: Option<i32>,
    pub area_level1: Option<String>,
    pub area_level2: Option<String>,
    pub area_level3: Option<String>,
    pub area_level4: Option<String>,
    pub iteration_path: Option<String>,
    pub iteration_id: Option<i32>,
    pub iteration_level1: Option<String>,
    pub iteration_level2: Option<String>,
    pub iteration_level3: Option<String>,
    pub iteration_level4: Option<String>,
    pub parent: Option<i32>,
    pub story_points: Option<f64>,
    pub original_estimate: Option<f64>,
    pub remaining_work: Option<f64>,
    pub completed_work: Option<f64>,
    pub priority: Option<i32>,
    pub stack_rank: Option<f64>,
    pub watermark: Option<i64>,
    pub person_id: Option<i64>,
    pub custom_work: Option<String>,
    pub created_by_id: Option<String>,
    pub changed_by_id: Option<String>,
    pub authorized_as_id: Option<String>,
    pub assigned_to_id: Option<String>,
    pub extra_fields: String,
}

/// Insertable revision snapshot (the row id is assigned by SQLite)
#[derive(Insertable, Debug, Clone, Default, PartialEq)]
#[diesel(table_name = revisions)]
pub struct NewRevisionRow {
    pub work_item_id: i32,
    pub rev: i32,
    pub work_item_type: Option<String>,
    pub title: Option<String>,
    pub state: Option<String>,
    pub reason: Option<String>,
    pub team_project: Option<String>,
    pub area_path: Option<String>,
    pub area_id: Option<i32>,
    pub node_name: Option<String>,
    pub iteration_path: Option<String>,
    pub iteration_id: Option<i32>,
    pub iteration_level1: Option<String>,
    pub iteration_level2: Option<String>,
    pub iteration_level3: Option<String>,
    pub iteration_level4: Option<String>,
    pub assigned_to_id: Option<String>,
    pub created_date: Option<String>,
    pub created_by_id: Option<String>,
    pub changed_date: Option<String>,
    pub changed_by_id: Option<String>,
    pub authorized_date: Option<String>,
    pub authorized_as_id: Option<String>,
    pub revised_date: Option<String>,
    pub closed_date: Option<String>,
    pub closed_by_id: Option<String>,
    pub watermark: Option<i64>,
    pub comment_count: Option<i32>,
    pub story_points: Option<f64>,
    pub original_estimate: Option<f64>,
    pub remaining_work: Option<f64>,
    pub completed_work: Option<f64>,
    pub priority: Option<i32>,
    pub stack_rank: Option<f64>,
}

/// Stored revision, trimmed to the columns read paths care about
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = revisions)]
pub struct StoredRevision {
    pub id: i32,
    pub work_item_id: i32,
    pub rev: i32,
    pub state: Option<String>,
    pub changed_date: Option<String>,
    pub changed_by_id: Option<String>,
}

#[derive(Insertable, AsChangeset, Queryable, Selectable, Debug, Clone, Default, PartialEq, serde::Serialize)]
#[diesel(table_name = comments)]
#[diesel(primary_key(comment_id))]
#[diesel(treat_none_as_null = true)]
pub struct CommentRow {
    pub comment_id: i32,
    pub work_item_id: i32,
    pub rev: Option<i32>,
    pub comment_type: Option<String>,
    pub state: Option<String>,
    pub body: Option<String>,
    pub created_date: Option<String>,
    pub created_by_id: Option<String>,
    pub modified_date: Option<String>,
    pub modified_by_id: Option<String>,
}

#[derive(Insertable, AsChangeset, Queryable, Selectable, Debug, Clone, Default, PartialEq, serde::Serialize)]
#[diesel(table_name = classification_nodes)]
#[diesel(primary_key(node_id))]
#[diesel(treat_none_as_null = true)]
pub struct ClassificationNodeRow {
    pub node_id: i32,
    pub structure_group: String,
    pub name: String,
    pub path: Option<String>,
    pub start_date: Option<String>,
    pub finish_date: Option<String>,
    pub timeframe: Option<String>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = ingest_runs)]
pub struct NewIngestRun<'a> {
    pub run_id: &'a str,
    pub status: &'a str,
    pub started_at: &'a str,
    pub completed_at: &'a str,
    pub ids_total: i32,
    pub chunks: i32,
    pub ingested: i32,
    pub skipped: i32,
    pub identities_skipped: i32,
    pub revisions_skipped: i32,
    pub comments_skipped: i32,
    pub tags_written: i32,
    pub revisions_written: i32,
    pub comments_written: i32,
}

#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = ingest_runs)]
pub struct IngestRun {
    pub id: i32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: String,
    pub ids_total: i32,
    pub chunks: i32,
    pub ingested: i32,
    pub skipped: i32,
    pub identities_skipped: i32,
    pub revisions_skipped: i32,
    pub comments_skipped: i32,
    pub tags_written: i32,
    pub revisions_written: i32,
    pub comments_written: i32,
}

/// Everything written for one work item inside a single transaction.
///
/// `None` for revisions or comments means that history could not be fetched;
/// stored rows of that kind are then left as they are.
#[derive(Debug, Clone, Default)]
pub struct RecordRows {
    pub item: WorkItemRow,
    pub tags: BTreeSet<String>,
    pub revisions: Option<Vec<NewRevisionRow>>,
    pub comments: Option<Vec<CommentRow>>,
}

/// Row counts produced by one [`Database::write_record`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordWriteStats {
    pub tags_written: usize,
    pub tags_removed: usize,
    pub revisions_written: usize,
    pub revisions_replaced: usize,
    pub comments_written: usize,
}

/// Row counts for every table
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreSummary {
    pub identities: i64,
    pub work_items: i64,
    pub tags: i64,
    pub revisions: i64,
    pub comments: i64,
    pub classification_nodes: i64,
    pub runs: i64,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Pragmas applied to every pooled connection
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {}; PRAGMA journal_mode = WAL;",
            self.busy_timeout.as_millis()
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Error type for database operations
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Store handle with connection pool; cheap to share across worker threads
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Get the database path that will be used
    pub fn db_path() -> PathBuf {
        get_db_path()
    }

    /// Open database at specified path, creating parent directories and schema
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = ConnectionManager::<SqliteConnection>::new(path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(8)
            .connection_customizer(Box::new(ConnectionOptions {
                busy_timeout: Duration::from_secs(10),
            }))
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        tracing::debug!(path = %path.display(), "store opened");
        Ok(db)
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| DbError::Connection(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS schema_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                version TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                features TEXT NOT NULL,
                introduced_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS identities (
                id TEXT PRIMARY KEY NOT NULL,
                display_name TEXT,
                url TEXT,
                unique_name TEXT,
                image_url TEXT,
                descriptor TEXT
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS work_items (
                id INTEGER PRIMARY KEY NOT NULL,
                rev INTEGER,
                work_item_type TEXT,
                title TEXT,
                state TEXT,
                reason TEXT,
                history TEXT,
                description TEXT,
                created_date TEXT,
                changed_date TEXT,
                state_change_date TEXT,
                activated_date TEXT,
                closed_date TEXT,
                comment_count INTEGER,
                team_project TEXT,
                area_path TEXT,
                area_id INTEGER,
                area_level1 TEXT,
                area_level2 TEXT,
                area_level3 TEXT,
                area_level4 TEXT,
                iteration_path TEXT,
                iteration_id INTEGER,
                iteration_level1 TEXT,
                iteration_level2 TEXT,
                iteration_level3 TEXT,
                iteration_level4 TEXT,
                parent INTEGER,
                story_points REAL,
                original_estimate REAL,
                remaining_work REAL,
                completed_work REAL,
                priority INTEGER,
                stack_rank REAL,
                watermark INTEGER,
                person_id INTEGER,
                custom_work TEXT,
                created_by_id TEXT REFERENCES identities(id),
                changed_by_id TEXT REFERENCES identities(id),
                authorized_as_id TEXT REFERENCES identities(id),
                assigned_to_id TEXT REFERENCES identities(id),
                extra_fields TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS work_item_tags (
                work_item_id INTEGER NOT NULL,
                tag TEXT NOT NULL,
                PRIMARY KEY (work_item_id, tag),
                FOREIGN KEY (work_item_id) REFERENCES work_items(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS revisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                work_item_id INTEGER NOT NULL,
                rev INTEGER NOT NULL,
                work_item_type TEXT,
                title TEXT,
                state TEXT,
                reason TEXT,
                team_project TEXT,
                area_path TEXT,
                area_id INTEGER,
                node_name TEXT,
                iteration_path TEXT,
                iteration_id INTEGER,
                iteration_level1 TEXT,
                iteration_level2 TEXT,
                iteration_level3 TEXT,
                iteration_level4 TEXT,
                assigned_to_id TEXT REFERENCES identities(id),
                created_date TEXT,
                created_by_id TEXT REFERENCES identities(id),
                changed_date TEXT,
                changed_by_id TEXT REFERENCES identities(id),
                authorized_date TEXT,
                authorized_as_id TEXT REFERENCES identities(id),
                revised_date TEXT,
                closed_date TEXT,
                closed_by_id TEXT REFERENCES identities(id),
                watermark INTEGER,
                comment_count INTEGER,
                story_points REAL,
                original_estimate REAL,
                remaining_work REAL,
                completed_work REAL,
                priority INTEGER,
                stack_rank REAL,
                FOREIGN KEY (work_item_id) REFERENCES work_items(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS comments (
                comment_id INTEGER PRIMARY KEY NOT NULL,
                work_item_id INTEGER NOT NULL,
                rev INTEGER,
                comment_type TEXT,
                state TEXT,
                body TEXT,
                created_date TEXT,
                created_by_id TEXT REFERENCES identities(id),
                modified_date TEXT,
                modified_by_id TEXT REFERENCES identities(id),
                FOREIGN KEY (work_item_id) REFERENCES work_items(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS classification_nodes (
                node_id INTEGER PRIMARY KEY NOT NULL,
                structure_group TEXT NOT NULL,
                name TEXT NOT NULL,
                path TEXT,
                start_date TEXT,
                finish_date TEXT,
                timeframe TEXT
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS ingest_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                run_id TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                ids_total INTEGER NOT NULL,
                chunks INTEGER NOT NULL,
                ingested INTEGER NOT NULL,
                skipped INTEGER NOT NULL,
                identities_skipped INTEGER NOT NULL,
                revisions_skipped INTEGER NOT NULL,
                comments_skipped INTEGER NOT NULL,
                tags_written INTEGER NOT NULL,
                revisions_written INTEGER NOT NULL,
                comments_written INTEGER NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_work_items_parent ON work_items(parent)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_work_items_changed ON work_items(changed_date)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_revisions_item_rev ON revisions(work_item_id, rev)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_comments_item ON comments(work_item_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_classification_group ON classification_nodes(structure_group)").execute(&mut conn)?;

        self.register_schema(&mut conn, &CURRENT_SCHEMA)?;
        Ok(())
    }

    fn register_schema(&self, conn: &mut SqliteConnection, schema: &StoreSchema) -> Result<()> {
        let now = chrono::Local::now().to_rfc3339();
        let features_json = serde_json::to_string(&schema.features).unwrap_or_default();

        let new_schema = NewSchemaVersion {
            version: &schema.version_string(),
            name: schema.name,
            features: &features_json,
            introduced_at: &now,
        };

        diesel::insert_or_ignore_into(schema_versions::table)
            .values(&new_schema)
            .execute(conn)?;

        Ok(())
    }

    /// Drop every table and recreate the schema (full rebuild before ingesting)
    pub fn reset(&self) -> Result<()> {
        let mut conn = self.get_conn()?;
        conn.batch_execute(
            r#"
            DROP TABLE IF EXISTS comments;
            DROP TABLE IF EXISTS revisions;
            DROP TABLE IF EXISTS work_item_tags;
            DROP TABLE IF EXISTS work_items;
            DROP TABLE IF EXISTS identities;
            DROP TABLE IF EXISTS classification_nodes;
            DROP TABLE IF EXISTS ingest_runs;
            DROP TABLE IF EXISTS schema_versions;
            "#,
        )?;
        drop(conn);
        tracing::info!("store reset: all tables dropped");
        self.init_schema()
    }

    // ========================================================================
    // Identities
    // ========================================================================

    /// Insert an identity unless one with the same id exists. Returns true when a row was added.
    pub fn insert_identity_if_absent(&self, identity: &IdentityRow) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let inserted = diesel::insert_or_ignore_into(identities::table)
            .values(identity)
            .execute(&mut conn)?;
        Ok(inserted > 0)
    }

    pub fn get_identity(&self, id: &str) -> Result<Option<IdentityRow>> {
        let mut conn = self.get_conn()?;
        let row = identities::table
            .filter(identities::id.eq(id))
            .select(IdentityRow::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(row)
    }

    // ========================================================================
    // Work items and dependents
    // ========================================================================

    /// Write one work item and its dependent rows atomically.
    ///
    /// The item row is overwritten column-for-column, tags follow `tag_policy`,
    /// revisions follow `revision_policy`, and comments are upserted by comment id.
    pub fn write_record(
        &self,
        rows: &RecordRows,
        revision_policy: RevisionPolicy,
        tag_policy: TagPolicy,
    ) -> Result<RecordWriteStats> {
        let mut conn = self.get_conn()?;
        let item_id = rows.item.id;

        conn.immediate_transaction::<_, DbError, _>(|conn| {
            let mut stats = RecordWriteStats::default();

            diesel::insert_into(work_items::table)
                .values(&rows.item)
                .on_conflict(work_items::id)
                .do_update()
                .set(&rows.item)
                .execute(conn)?;

            if tag_policy == TagPolicy::Sync {
                let keep: Vec<&str> = rows.tags.iter().map(String::as_str).collect();
                stats.tags_removed = diesel::delete(
                    work_item_tags::table
                        .filter(work_item_tags::work_item_id.eq(item_id))
                        .filter(work_item_tags::tag.ne_all(keep)),
                )
                .execute(conn)?;
            }
            for tag in &rows.tags {
                stats.tags_written += diesel::insert_or_ignore_into(work_item_tags::table)
                    .values((
                        work_item_tags::work_item_id.eq(item_id),
                        work_item_tags::tag.eq(tag),
                    ))
                    .execute(conn)?;
            }

            if let Some(revs) = &rows.revisions {
                if revision_policy == RevisionPolicy::Replace {
                    stats.revisions_replaced = diesel::delete(
                        revisions::table.filter(revisions::work_item_id.eq(item_id)),
                    )
                    .execute(conn)?;
                }
                for rev in revs {
                    stats.revisions_written += diesel::insert_into(revisions::table)
                        .values(rev)
                        .execute(conn)?;
                }
            }

            if let Some(comment_rows) = &rows.comments {
                for comment in comment_rows {
                    stats.comments_written += diesel::insert_into(comments::table)
                        .values(comment)
                        .on_conflict(comments::comment_id)
                        .do_update()
                        .set(comment)
                        .execute(conn)?;
                }
            }

            Ok(stats)
        })
    }

    pub fn get_work_item(&self, id: i32) -> Result<Option<WorkItemRow>> {
        let mut conn = self.get_conn()?;
        let row = work_items::table
            .filter(work_items::id.eq(id))
            .select(WorkItemRow::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(row)
    }

    pub fn work_item_ids(&self) -> Result<Vec<i32>> {
        let mut conn = self.get_conn()?;
        let ids = work_items::table
            .select(work_items::id)
            .order(work_items::id.asc())
            .load(&mut conn)?;
        Ok(ids)
    }

    pub fn tags_for(&self, work_item_id: i32) -> Result<Vec<String>> {
        let mut conn = self.get_conn()?;
        let tags = work_item_tags::table
            .filter(work_item_tags::work_item_id.eq(work_item_id))
            .select(work_item_tags::tag)
            .order(work_item_tags::tag.asc())
            .load(&mut conn)?;
        Ok(tags)
    }

    /// Revisions of a work item ordered by revision number
    pub fn revisions_for(&self, work_item_id: i32) -> Result<Vec<StoredRevision>> {
        let mut conn = self.get_conn()?;
        let revs = revisions::table
            .filter(revisions::work_item_id.eq(work_item_id))
            .order((revisions::rev.asc(), revisions::id.asc()))
            .select(StoredRevision::as_select())
            .load(&mut conn)?;
        Ok(revs)
    }

    pub fn comments_for(&self, work_item_id: i32) -> Result<Vec<CommentRow>> {
        let mut conn = self.get_conn()?;
        let rows = comments::table
            .filter(comments::work_item_id.eq(work_item_id))
            .order(comments::comment_id.asc())
            .select(CommentRow::as_select())
            .load(&mut conn)?;
        Ok(rows)
    }

    // ========================================================================
    // Classification nodes
    // ========================================================================

    /// Insert or replace a flattened classification node keyed by node id
    pub fn upsert_classification_node(&self, node: &ClassificationNodeRow) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::insert_into(classification_nodes::table)
            .values(node)
            .on_conflict(classification_nodes::node_id)
            .do_update()
            .set(node)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn classification_nodes(&self, structure_group: &str) -> Result<Vec<ClassificationNodeRow>> {
        let mut conn = self.get_conn()?;
        let rows = classification_nodes::table
            .filter(classification_nodes::structure_group.eq(structure_group))
            .order(classification_nodes::path.asc())
            .select(ClassificationNodeRow::as_select())
            .load(&mut conn)?;
        Ok(rows)
    }

    // ========================================================================
    // Run log and summaries
    // ========================================================================

    pub fn record_run(&self, run: &NewIngestRun<'_>) -> Result<()> {
        let mut conn = self.get_conn()?;
        diesel::insert_into(ingest_runs::table)
            .values(run)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn recent_runs(&self, limit: i64) -> Result<Vec<IngestRun>> {
        let mut conn = self.get_conn()?;
        let runs = ingest_runs::table
            .order(ingest_runs::id.desc())
            .limit(limit)
            .select(IngestRun::as_select())
            .load(&mut conn)?;
        Ok(runs)
    }

    pub fn summary(&self) -> Result<StoreSummary> {
        let mut conn = self.get_conn()?;
        Ok(StoreSummary {
            identities: identities::table.count().get_result(&mut conn)?,
            work_items: work_items::table.count().get_result(&mut conn)?,
            tags: work_item_tags::table.count().get_result(&mut conn)?,
            revisions: revisions::table.count().get_result(&mut conn)?,
            comments: comments::table.count().get_result(&mut conn)?,
            classification_nodes: classification_nodes::table.count().get_result(&mut conn)?,
            runs: ingest_runs::table.count().get_result(&mut conn)?,
        })
    }
}
