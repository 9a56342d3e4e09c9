//! Ticketlog - work-tracking history ingestion
//!
//! Pulls work items, their revision and comment history, and the iteration/area
//! hierarchies from a work-tracking service into a normalized SQLite store.
//!
//! # Pipeline
//!
//! | Stage | Module |
//! |-------|--------|
//! | Enumerate ids and drive the run | [`ingest`] |
//! | Fetch payloads in bulk-sized chunks | [`batch`] |
//! | Map payloads onto rows | [`normalize`] |
//! | Deduplicate actors | [`identity`] |
//! | Flatten classification trees | [`classification`] |
//! | Persist | [`db`] |
//!
//! # Quick Start
//!
//! ```no_run
//! use ticketlog::{AzureDevOpsClient, Config, Database, IngestOptions, Orchestrator};
//!
//! let config = Config::load().unwrap().normalized();
//! let client = AzureDevOpsClient::new(&config.credentials().unwrap(), &config.remote).unwrap();
//! let db = Database::open_at(config.database_path()).unwrap();
//!
//! let query = ticketlog::azure::default_query(client.project());
//! let summary = Orchestrator::new(&client, &db, IngestOptions::from(&config.ingest))
//!     .run(&query)
//!     .unwrap();
//! println!("ingested {}, skipped {}", summary.ingested, summary.skipped_count());
//! ```

pub mod azure;
pub mod batch;
pub mod classification;
pub mod config;
pub mod db;
pub mod identity;
pub mod ingest;
pub mod logging;
pub mod normalize;
pub mod remote;
pub mod schema;

pub use azure::AzureDevOpsClient;
pub use batch::{BatchRetriever, ChunkFetch, SkippedItem};
pub use classification::{flatten, ingest_classification, ClassificationSummary};
pub use config::{Config, ConfigError, Credentials, RevisionPolicy, TagPolicy};
pub use db::{Database, DbError, StoreSummary, CURRENT_SCHEMA};
pub use identity::IdentityResolver;
pub use ingest::{CancelToken, IngestError, IngestOptions, Orchestrator, RunPhase, RunStatus, RunSummary};
pub use normalize::{split_tags, NormalizeError, RecordNormalizer};
pub use remote::{RemoteError, StructureGroup, WorkTrackingApi, MAX_BULK_IDS};
