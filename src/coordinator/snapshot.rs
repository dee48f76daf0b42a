//! Snapshot persistence
//!
//! The whole coordinator state is written as one JSON record and overwritten
//! on every dump. The record carries a `schema_version` that is checked before
//! anything else on load, so a newer or foreign file is refused instead of
//! being half-read.
//!
//! Storage goes through [`SnapshotBackend`]:
//!
//! - [`FileBackend`] - writes `<path>.tmp` then renames over `<path>`
//! - [`MemoryBackend`] - in-process, for tests and `--no-persist` runs
//!
//! # Example
//!
//! ```no_run
//! use concord::coordinator::snapshot::SnapshotStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = SnapshotStore::file("data/coordinator.json");
//! if let Some(snapshot) = store.load().await? {
//!     println!("{} services restored", snapshot.services.len());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::error::{ConcordErrorTrait, ErrorKind};
use crate::metrics;

use super::cluster::ClusterMap;
use super::service::Service;

/// Snapshot layout version written by this build
pub const SCHEMA_VERSION: u32 = 1;

// ============================================================================
// Errors
// ============================================================================

/// Snapshot errors
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to {operation} snapshot at {}: {source}", .path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),

    #[error("Unsupported snapshot schema version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Snapshot storage unavailable: {0}")]
    Unavailable(String),
}

impl ConcordErrorTrait for SnapshotError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::PersistenceFailure
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Unavailable(_))
    }
}

// ============================================================================
// Snapshot record
// ============================================================================

/// Durable image of the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,

    /// When the coordinator was first created (epoch millis)
    pub created: i64,

    /// Last registry mutation (epoch millis)
    pub modified: i64,

    pub port: u16,

    /// Version of the coordinator that wrote the record
    pub version: String,

    /// Service id -> service with registrations, heartbeats, subscriptions
    pub services: BTreeMap<String, Service>,

    pub clusters: ClusterMap,
}

#[derive(Deserialize)]
struct SchemaProbe {
    schema_version: Option<u32>,
}

impl Snapshot {
    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        serde_json::to_vec_pretty(self).map_err(SnapshotError::Encode)
    }

    /// Decode a record, refusing unknown schema versions
    pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let probe: SchemaProbe = serde_json::from_slice(bytes)
            .map_err(|e| SnapshotError::Corrupt(e.to_string()))?;

        match probe.schema_version {
            Some(SCHEMA_VERSION) => {}
            Some(found) => {
                return Err(SnapshotError::UnsupportedVersion {
                    found,
                    supported: SCHEMA_VERSION,
                })
            }
            None => return Err(SnapshotError::Corrupt("missing schema_version".to_string())),
        }

        serde_json::from_slice(bytes).map_err(|e| SnapshotError::Corrupt(e.to_string()))
    }

    pub fn registration_count(&self) -> usize {
        self.services
            .values()
            .map(|s| s.registrations().len())
            .sum()
    }

    pub fn subscription_count(&self) -> usize {
        self.services
            .values()
            .map(|s| s.subscriptions().len())
            .sum()
    }

    /// Format as display string
    pub fn display(&self) -> String {
        let mut output = String::from("Coordinator Snapshot\n");
        output.push_str(&format!("{:-<40}\n", ""));
        output.push_str(&format!("Schema: v{}\n", self.schema_version));
        output.push_str(&format!("Written by: {}\n", self.version));
        output.push_str(&format!("Port: {}\n", self.port));
        output.push_str(&format!("Created: {}\n", format_millis(self.created)));
        output.push_str(&format!("Modified: {}\n", format_millis(self.modified)));
        output.push_str(&format!("Services: {}\n", self.services.len()));
        output.push_str(&format!("Registrations: {}\n", self.registration_count()));
        output.push_str(&format!("Subscriptions: {}\n", self.subscription_count()));
        output.push_str(&format!("Clusters: {}\n", self.clusters.len()));
        for (id, service) in &self.services {
            output.push_str(&format!(
                "  - {id}: {} provider(s), {} subscriber(s)\n",
                service.registrations().len(),
                service.subscriptions().len()
            ));
        }
        output
    }
}

fn format_millis(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}

fn io_err(operation: &'static str, path: &Path) -> impl FnOnce(io::Error) -> SnapshotError {
    let path = path.to_path_buf();
    move |source| SnapshotError::Io {
        operation,
        path,
        source,
    }
}

// ============================================================================
// Backends
// ============================================================================

/// Where snapshot bytes live
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Human-readable location, for logs
    fn describe(&self) -> String;

    /// Replace the stored snapshot
    async fn write(&self, bytes: &[u8]) -> Result<(), SnapshotError>;

    /// Stored snapshot, or `None` if nothing was ever written
    async fn read(&self) -> Result<Option<Vec<u8>>, SnapshotError>;

    /// Move an unreadable snapshot out of the way; returns where it went
    async fn quarantine(&self, suffix: &str) -> Result<Option<String>, SnapshotError>;
}

/// Snapshot stored as a JSON file
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }
}

#[async_trait]
impl SnapshotBackend for FileBackend {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err("create directory for", parent))?;
        }

        // Write to temp file first, then rename (atomic)
        let temp_path = self.sibling(".tmp");
        tokio::fs::write(&temp_path, bytes)
            .await
            .map_err(io_err("write", &temp_path))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(io_err("rename", &self.path))?;

        tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "Snapshot written");
        Ok(())
    }

    async fn read(&self) -> Result<Option<Vec<u8>>, SnapshotError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SnapshotError::Io {
                operation: "read",
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn quarantine(&self, suffix: &str) -> Result<Option<String>, SnapshotError> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(None);
        }

        let target = self.sibling(&format!(".corrupt-{suffix}"));
        tokio::fs::rename(&self.path, &target)
            .await
            .map_err(|source| SnapshotError::Io {
                operation: "quarantine",
                path: self.path.clone(),
                source,
            })?;

        Ok(Some(target.display().to_string()))
    }
}

/// Snapshot kept in memory; can be told to fail writes
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: RwLock<Option<Vec<u8>>>,
    failing: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn contents(&self) -> Option<Vec<u8>> {
        self.data.read().await.clone()
    }
}

#[async_trait]
impl SnapshotBackend for MemoryBackend {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), SnapshotError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SnapshotError::Unavailable("memory backend is read-only".to_string()));
        }
        *self.data.write().await = Some(bytes.to_vec());
        Ok(())
    }

    async fn read(&self) -> Result<Option<Vec<u8>>, SnapshotError> {
        Ok(self.data.read().await.clone())
    }

    async fn quarantine(&self, _suffix: &str) -> Result<Option<String>, SnapshotError> {
        Ok(self.data.write().await.take().map(|_| "discarded".to_string()))
    }
}

// ============================================================================
// Snapshot Store
// ============================================================================

/// Outcome history of snapshot dumps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceStatus {
    pub location: String,
    pub dumps: u64,
    pub last_success_at: Option<i64>,
    pub last_failure_at: Option<i64>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl PersistenceStatus {
    /// True unless the most recent dump failed
    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures == 0
    }
}

/// Dumps and loads snapshots through a backend, tracking outcomes
pub struct SnapshotStore {
    backend: Arc<dyn SnapshotBackend>,
    status: RwLock<PersistenceStatus>,
}

impl SnapshotStore {
    pub fn new(backend: Arc<dyn SnapshotBackend>) -> Self {
        let status = PersistenceStatus {
            location: backend.describe(),
            ..PersistenceStatus::default()
        };
        Self {
            backend,
            status: RwLock::new(status),
        }
    }

    /// Store backed by a JSON file
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileBackend::new(path)))
    }

    /// Store that keeps the snapshot in memory
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn location(&self) -> String {
        self.backend.describe()
    }

    /// Overwrite the stored snapshot; `now` stamps the outcome
    pub async fn dump(&self, snapshot: &Snapshot, now: i64) -> Result<(), SnapshotError> {
        let result = match snapshot.encode() {
            Ok(bytes) => self.backend.write(&bytes).await,
            Err(e) => Err(e),
        };

        let mut status = self.status.write().await;
        status.dumps += 1;
        match &result {
            Ok(()) => {
                status.last_success_at = Some(now);
                status.consecutive_failures = 0;
                status.last_error = None;
            }
            Err(e) => {
                status.last_failure_at = Some(now);
                status.consecutive_failures += 1;
                status.last_error = Some(e.to_string());
            }
        }
        metrics::record_dump(result.is_ok());

        result
    }

    /// Most recent snapshot, or `None` when nothing has been written
    pub async fn load(&self) -> Result<Option<Snapshot>, SnapshotError> {
        match self.backend.read().await? {
            Some(bytes) => Snapshot::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Move an unreadable snapshot aside
    pub async fn quarantine(&self, suffix: &str) -> Result<Option<String>, SnapshotError> {
        self.backend.quarantine(suffix).await
    }

    pub async fn status(&self) -> PersistenceStatus {
        self.status.read().await.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================
