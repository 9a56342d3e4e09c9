//! Ingestion run orchestration
//!
//! A run moves through `Idle → Querying → Retrieving ⇄ Processing → Finalizing → Done`.
//! Only id enumeration and chunk retrieval can fail a run; every per-record
//! problem is logged, tallied in the [`RunSummary`] and skipped.
//!
//! Cancellation is honored at chunk boundaries: a chunk that has started is
//! always processed to the end, so no record is left half written.

use crate::batch::{BatchRetriever, SkippedItem};
use crate::config::{IngestConfig, RevisionPolicy, TagPolicy};
use crate::db::{Database, NewIngestRun, RecordWriteStats};
use crate::identity::IdentityResolver;
use crate::normalize::RecordNormalizer;
use crate::remote::{RemoteError, WorkItemPayload, WorkTrackingApi, MAX_BULK_IDS};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Querying,
    Retrieving,
    Processing,
    Finalizing,
    Done,
    Failed,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Querying => "querying",
            RunPhase::Retrieving => "retrieving",
            RunPhase::Processing => "processing",
            RunPhase::Finalizing => "finalizing",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Fatal run errors. Per-record failures never appear here.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to enumerate work items: {0}")]
    Query(#[source] RemoteError),

    #[error("failed to retrieve chunk {index} of {total}: {source}")]
    Chunk {
        index: usize,
        total: usize,
        #[source]
        source: RemoteError,
    },

    #[error("failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Shared cancellation flag with an optional deadline
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that also trips once `timeout` has elapsed from now
    pub fn with_deadline(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chunk_size: usize,
    pub workers: usize,
    pub expand_detail: bool,
    pub revision_policy: RevisionPolicy,
    pub tag_policy: TagPolicy,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for IngestOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.clamp(1, MAX_BULK_IDS),
            workers: config.workers.max(1),
            expand_detail: config.expand_detail,
            revision_policy: config.revision_policy,
            tag_policy: config.tag_policy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// Outcome of a run that was not aborted
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: String,
    pub finished_at: String,
    /// Distinct ids enumerated for the run
    pub ids_total: usize,
    pub chunks_total: usize,
    /// Chunks retrieved and processed before finishing or cancelling
    pub chunks: usize,
    pub ingested: usize,
    pub skipped: Vec<SkippedItem>,
    /// Actor references dropped because their identity row could not be stored
    pub identities_skipped: usize,
    /// Revision histories that failed to fetch plus revisions without a revision number
    pub revisions_skipped: usize,
    /// Comment histories that failed to fetch plus comments without an id
    pub comments_skipped: usize,
    pub tags_written: usize,
    pub tags_removed: usize,
    pub revisions_written: usize,
    pub comments_written: usize,
}

impl RunSummary {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == RunStatus::Cancelled
    }

    fn absorb(&mut self, outcome: RecordOutcome) {
        self.revisions_skipped += outcome.revisions_skipped;
        self.comments_skipped += outcome.comments_skipped;
        match outcome.result {
            Ok(stats) => {
                self.ingested += 1;
                self.tags_written += stats.tags_written;
                self.tags_removed += stats.tags_removed;
                self.revisions_written += stats.revisions_written;
                self.comments_written += stats.comments_written;
            }
            Err(reason) => self.skipped.push(SkippedItem::new(outcome.id, reason)),
        }
    }
}

/// Per-record result handed back from the worker pool
struct RecordOutcome {
    id: i32,
    result: Result<RecordWriteStats, String>,
    revisions_skipped: usize,
    comments_skipped: usize,
}

/// Normalizes and writes single records; shared by the worker pool
struct RecordProcessor<'r, A: ?Sized> {
    normalizer: RecordNormalizer<'r, A>,
    db: &'r Database,
    revision_policy: RevisionPolicy,
    tag_policy: TagPolicy,
}

impl<A: WorkTrackingApi + ?Sized> RecordProcessor<'_, A> {
    fn process(&self, payload: &WorkItemPayload) -> RecordOutcome {
        let id = payload.id;
        let normalized = match self.normalizer.normalize(payload) {
            Ok(normalized) => normalized,
            Err(e) => {
                tracing::error!(work_item = id, error = %e, "normalization failed, skipping record");
                return RecordOutcome {
                    id,
                    result: Err(e.to_string()),
                    revisions_skipped: 0,
                    comments_skipped: 0,
                };
            }
        };

        let revisions_skipped =
            usize::from(normalized.revisions_error.is_some()) + normalized.revisions_dropped;
        let comments_skipped =
            usize::from(normalized.comments_error.is_some()) + normalized.comments_dropped;

        let result = self
            .db
            .write_record(&normalized.rows, self.revision_policy, self.tag_policy)
            .map_err(|e| {
                tracing::error!(work_item = id, error = %e, "failed to store record, skipping");
                format!("store write failed: {}", e)
            });

        RecordOutcome {
            id,
            result,
            revisions_skipped,
            comments_skipped,
        }
    }
}

/// Drives one ingestion run against an API and a store
pub struct Orchestrator<'a, A: ?Sized> {
    api: &'a A,
    db: &'a Database,
    options: IngestOptions,
    cancel: CancelToken,
    phase: RunPhase,
}

impl<'a, A: WorkTrackingApi + ?Sized> Orchestrator<'a, A> {
    pub fn new(api: &'a A, db: &'a Database, options: IngestOptions) -> Self {
        Self {
            api,
            db,
            options,
            cancel: CancelToken::new(),
            phase: RunPhase::Idle,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn transition(&mut self, next: RunPhase) {
        tracing::debug!(from = %self.phase, to = %next, "run phase");
        self.phase = next;
    }

    fn build_pool(&self) -> Result<ThreadPool, IngestError> {
        Ok(ThreadPoolBuilder::new()
            .num_threads(self.options.workers.max(1))
            .thread_name(|i| format!("ticketlog-worker-{}", i))
            .build()?)
    }

    /// Enumerate ids with `query`, then ingest them
    pub fn run(&mut self, query: &str) -> Result<RunSummary, IngestError> {
        let started = chrono::Local::now();
        let pool = self.build_pool()?;

        self.transition(RunPhase::Querying);
        let ids = match self.api.query_ids(query) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "id enumeration failed");
                self.transition(RunPhase::Failed);
                return Err(IngestError::Query(e));
            }
        };
        tracing::info!(count = ids.len(), "work items enumerated");

        self.ingest(&pool, ids, started)
    }

    /// Ingest an explicit id list, skipping enumeration
    pub fn run_ids(&mut self, ids: Vec<i32>) -> Result<RunSummary, IngestError> {
        let started = chrono::Local::now();
        let pool = self.build_pool()?;
        self.ingest(&pool, ids, started)
    }

    fn ingest(
        &mut self,
        pool: &ThreadPool,
        ids: Vec<i32>,
        started: chrono::DateTime<chrono::Local>,
    ) -> Result<RunSummary, IngestError> {
        // Every id is attempted exactly once
        let mut seen = HashSet::with_capacity(ids.len());
        let ids: Vec<i32> = ids.into_iter().filter(|id| seen.insert(*id)).collect();

        let api = self.api;
        let db = self.db;
        let retriever = BatchRetriever::new(api, pool, self.options.chunk_size, self.options.expand_detail);
        let resolver = IdentityResolver::new(db);
        let processor = RecordProcessor {
            normalizer: RecordNormalizer::new(api, &resolver),
            db,
            revision_policy: self.options.revision_policy,
            tag_policy: self.options.tag_policy,
        };

        let mut summary = RunSummary {
            run_id: uuid::Uuid::new_v4().to_string(),
            status: RunStatus::Completed,
            started_at: started.to_rfc3339(),
            finished_at: String::new(),
            ids_total: ids.len(),
            chunks_total: retriever.chunk_count(&ids),
            chunks: 0,
            ingested: 0,
            skipped: Vec::new(),
            identities_skipped: 0,
            revisions_skipped: 0,
            comments_skipped: 0,
            tags_written: 0,
            tags_removed: 0,
            revisions_written: 0,
            comments_written: 0,
        };

        for (index, chunk) in retriever.chunks(&ids).enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!(
                    processed = summary.chunks,
                    remaining = summary.chunks_total - summary.chunks,
                    "run cancelled at chunk boundary"
                );
                summary.status = RunStatus::Cancelled;
                break;
            }

            self.transition(RunPhase::Retrieving);
            let fetched = match retriever.fetch_chunk(chunk) {
                Ok(fetched) => fetched,
                Err(source) => {
                    tracing::error!(chunk = index + 1, error = %source, "chunk retrieval failed, aborting run");
                    self.transition(RunPhase::Failed);
                    return Err(IngestError::Chunk {
                        index: index + 1,
                        total: summary.chunks_total,
                        source,
                    });
                }
            };
            summary.skipped.extend(fetched.skipped);

            self.transition(RunPhase::Processing);
            let outcomes: Vec<RecordOutcome> = pool.install(|| {
                fetched
                    .payloads
                    .par_iter()
                    .map(|payload| processor.process(payload))
                    .collect()
            });
            for outcome in outcomes {
                summary.absorb(outcome);
            }

            summary.chunks += 1;
            tracing::info!(
                chunk = index + 1,
                of = summary.chunks_total,
                ingested = summary.ingested,
                skipped = summary.skipped_count(),
                "chunk complete"
            );
        }

        self.transition(RunPhase::Finalizing);
        summary.identities_skipped = resolver.failed_count();
        summary.finished_at = chrono::Local::now().to_rfc3339();
        self.record_run(&summary);

        tracing::info!(
            run_id = %summary.run_id,
            status = summary.status.as_str(),
            ingested = summary.ingested,
            skipped = summary.skipped_count(),
            identities_skipped = summary.identities_skipped,
            revisions_skipped = summary.revisions_skipped,
            comments_skipped = summary.comments_skipped,
            identities_added = resolver.inserted_count(),
            "ingestion run finished"
        );

        self.transition(RunPhase::Done);
        Ok(summary)
    }

    /// Append the run to the run log; failure to do so does not undo the run
    fn record_run(&self, summary: &RunSummary) {
        let run = NewIngestRun {
            run_id: &summary.run_id,
            status: summary.status.as_str(),
            started_at: &summary.started_at,
            completed_at: &summary.finished_at,
            ids_total: count(summary.ids_total),
            chunks: count(summary.chunks),
            ingested: count(summary.ingested),
            skipped: count(summary.skipped_count()),
            identities_skipped: count(summary.identities_skipped),
            revisions_skipped: count(summary.revisions_skipped),
            comments_skipped: count(summary.comments_skipped),
            tags_written: count(summary.tags_written),
            revisions_written: count(summary.revisions_written),
            comments_written: count(summary.comments_written),
        };
        if let Err(e) = self.db.record_run(&run) {
            tracing::error!(run_id = %summary.run_id, error = %e, "failed to record run");
        }
    }
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}
