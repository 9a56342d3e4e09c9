//! Configuration file support for ticketlog
//!
//! Reads from .ticketlog/config.toml, with credentials taken from the environment.

use crate::remote::{StructureGroup, MAX_BULK_IDS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing {0}. Set it in .ticketlog/config.toml or the environment.")]
    Missing(&'static str),
}

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub classification: ClassificationConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Remote work-tracking service settings. The access token is never read from the file.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RemoteConfig {
    /// Organization name, e.g. "contoso" for https://dev.azure.com/contoso
    #[serde(default)]
    pub organization: Option<String>,

    /// Team project whose work items are ingested
    #[serde(default)]
    pub project: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// How stored revisions are treated when a work item is ingested again
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RevisionPolicy {
    /// Replace the item's stored revisions with the fetched history
    #[default]
    Replace,
    /// Keep every inserted revision row (audit trail; rows repeat across runs)
    Append,
}

/// How stored tags are treated when a work item is ingested again
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TagPolicy {
    /// Delete tags that are no longer present remotely
    #[default]
    Sync,
    /// Only ever add tags
    Accumulate,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IngestConfig {
    /// Identifiers per bulk fetch, at most 200
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Concurrent per-item fetches within a chunk
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Re-fetch every item individually after the bulk call
    #[serde(default = "default_true")]
    pub expand_detail: bool,

    #[serde(default)]
    pub revision_policy: RevisionPolicy,

    #[serde(default)]
    pub tag_policy: TagPolicy,

    /// Query used to enumerate candidate items; defaults to every item in the project
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClassificationConfig {
    #[serde(default = "default_groups")]
    pub groups: Vec<StructureGroup>,

    #[serde(default = "default_depth")]
    pub depth: u32,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Resolved remote credentials
#[derive(Clone)]
pub struct Credentials {
    pub organization: String,
    pub project: String,
    pub token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("organization", &self.organization)
            .field("project", &self.project)
            .field("token", &"<redacted>")
            .finish()
    }
}

fn default_base_url() -> String {
    "https://dev.azure.com".to_string()
}

fn default_api_version() -> String {
    "7.1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    MAX_BULK_IDS
}

fn default_workers() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_groups() -> Vec<StructureGroup> {
    vec![StructureGroup::Iterations]
}

fn default_depth() -> u32 {
    10
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            organization: None,
            project: None,
            base_url: default_base_url(),
            api_version: default_api_version(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            workers: default_workers(),
            expand_detail: true,
            revision_policy: RevisionPolicy::default(),
            tag_policy: TagPolicy::default(),
            query: None,
        }
    }
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            groups: default_groups(),
            depth: default_depth(),
        }
    }
}

/// First non-empty value among the given environment variables
fn env_any(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

impl Config {
    /// Load config from .ticketlog/config.toml found by walking up from the current directory.
    /// Returns default config if no file exists; a file that exists but fails to parse is an error.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load config from an explicit path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config.normalized())
    }

    /// Find config.toml by walking up directory tree
    fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(".ticketlog").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }

    /// Clamp numeric settings into their valid ranges
    pub fn normalized(mut self) -> Self {
        self.ingest.chunk_size = self.ingest.chunk_size.clamp(1, MAX_BULK_IDS);
        self.ingest.workers = self.ingest.workers.max(1);
        self.classification.depth = self.classification.depth.max(1);
        self
    }

    /// Organization, project and token, with the environment taking priority over the file
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let organization = env_any(&["TICKETLOG_ORG", "AZURE_DEVOPS_ORG"])
            .or_else(|| self.remote.organization.clone())
            .ok_or(ConfigError::Missing("organization (TICKETLOG_ORG)"))?;
        let project = env_any(&["TICKETLOG_PROJECT", "AZURE_DEVOPS_PROJECT"])
            .or_else(|| self.remote.project.clone())
            .ok_or(ConfigError::Missing("project (TICKETLOG_PROJECT)"))?;
        let token = env_any(&["TICKETLOG_PAT", "AZURE_DEVOPS_PAT"])
            .ok_or(ConfigError::Missing("personal access token (TICKETLOG_PAT)"))?;

        Ok(Credentials {
            organization,
            project,
            token,
        })
    }

    /// Store location: explicit config path, otherwise the default lookup
    pub fn database_path(&self) -> PathBuf {
        if std::env::var_os("TICKETLOG_DB_PATH").is_some() {
            return crate::db::Database::db_path();
        }
        self.database
            .path
            .clone()
            .unwrap_or_else(crate::db::Database::db_path)
    }
}
