//! Chunked retrieval of work-item payloads
//!
//! Ids are split into bulk-sized chunks. Each chunk costs one bulk call and,
//! when detail expansion is on, one detail call per returned id; those detail
//! calls run on the shared worker pool.

use crate::remote::{RemoteError, WorkItemPayload, WorkTrackingApi, MAX_BULK_IDS};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::HashSet;

/// An id that was attempted but produced no payload (or no stored record)
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SkippedItem {
    pub id: i32,
    pub reason: String,
}

impl SkippedItem {
    pub fn new(id: i32, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }
}

/// Result of retrieving one chunk
#[derive(Debug, Default)]
pub struct ChunkFetch {
    /// Ids submitted in this chunk
    pub requested: Vec<i32>,
    pub payloads: Vec<WorkItemPayload>,
    /// Ids dropped by the service or whose detail call failed
    pub skipped: Vec<SkippedItem>,
}

pub struct BatchRetriever<'a, A: ?Sized> {
    api: &'a A,
    pool: &'a ThreadPool,
    chunk_size: usize,
    expand_detail: bool,
}

impl<'a, A: WorkTrackingApi + ?Sized> BatchRetriever<'a, A> {
    /// `chunk_size` is clamped into `1..=MAX_BULK_IDS`
    pub fn new(api: &'a A, pool: &'a ThreadPool, chunk_size: usize, expand_detail: bool) -> Self {
        Self {
            api,
            pool,
            chunk_size: chunk_size.clamp(1, MAX_BULK_IDS),
            expand_detail,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Order-preserving partition of `ids`
    pub fn chunks<'i>(&self, ids: &'i [i32]) -> std::slice::Chunks<'i, i32> {
        ids.chunks(self.chunk_size)
    }

    pub fn chunk_count(&self, ids: &[i32]) -> usize {
        ids.len().div_ceil(self.chunk_size)
    }

    /// Retrieve one chunk. A bulk failure is returned; detail failures are collected.
    pub fn fetch_chunk(&self, ids: &[i32]) -> Result<ChunkFetch, RemoteError> {
        let summaries = self.api.fetch_bulk(ids)?;

        let returned: HashSet<i32> = summaries.iter().map(|p| p.id).collect();
        let mut skipped: Vec<SkippedItem> = ids
            .iter()
            .filter(|id| !returned.contains(id))
            .map(|&id| {
                tracing::warn!(work_item = id, "id missing from bulk response");
                SkippedItem::new(id, "missing from bulk response")
            })
            .collect();

        if !self.expand_detail {
            return Ok(ChunkFetch {
                requested: ids.to_vec(),
                payloads: summaries,
                skipped,
            });
        }

        let api = self.api;
        let details: Vec<(i32, Result<WorkItemPayload, RemoteError>)> = self.pool.install(|| {
            summaries
                .par_iter()
                .map(|summary| (summary.id, api.fetch_detail(summary.id)))
                .collect()
        });

        let mut payloads = Vec::with_capacity(details.len());
        for (id, detail) in details {
            match detail {
                Ok(payload) => payloads.push(payload),
                Err(e) => {
                    tracing::error!(work_item = id, error = %e, "detail fetch failed, skipping");
                    skipped.push(SkippedItem::new(id, format!("detail fetch failed: {}", e)));
                }
            }
        }

        Ok(ChunkFetch {
            requested: ids.to_vec(),
            payloads,
            skipped,
        })
    }

    /// Lazily retrieve every chunk in order; stop consuming after the first error
    pub fn fetch_all<'i>(
        &'i self,
        ids: &'i [i32],
    ) -> impl Iterator<Item = Result<ChunkFetch, RemoteError>> + 'i {
        self.chunks(ids).map(move |chunk| self.fetch_chunk(chunk))
    }
}
