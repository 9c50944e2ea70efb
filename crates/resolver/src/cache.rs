//! File-backed TTL cache of resolved events.
//!
//! Expired records are purged on load: [`TtlCache::load_at`] never returns a
//! record whose age is at least the configured TTL, so the next
//! [`TtlCache::write`] of the working set drops them from disk as well.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{ResolverError, Result};
use crate::model::{CacheRecord, WorkingSet};

/// Default TTL for cached resolutions (3 hours).
pub const DEFAULT_TTL: Duration = Duration::from_secs(3 * 60 * 60);

#[derive(Debug, Clone)]
pub struct TtlCache {
    path: PathBuf,
    ttl: Duration,
}

impl TtlCache {
    /// Create a cache backed by `path` with the default TTL.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_ttl(path, DEFAULT_TTL)
    }

    /// Create a cache backed by `path` with the given TTL.
    pub fn with_ttl(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `now - resolved_at >= ttl`. Records stamped in the future count as fresh.
    pub fn is_expired(&self, record: &CacheRecord, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(record.resolved_at).to_std() {
            Ok(age) => age >= self.ttl,
            Err(_) => false,
        }
    }

    /// Load all non-expired records.
    ///
    /// A missing, unreadable or malformed store yields an empty set.
    pub async fn load(&self) -> WorkingSet {
        self.load_at(Utc::now()).await
    }

    pub async fn load_at(&self, now: DateTime<Utc>) -> WorkingSet {
        let records = self.read_all().await;
        let total = records.len();
        let fresh: WorkingSet = records
            .into_iter()
            .filter(|(_, record)| !self.is_expired(record, now))
            .collect();

        debug!(
            path = %self.path.display(),
            loaded = fresh.len(),
            expired = total - fresh.len(),
            "Cache loaded"
        );
        fresh
    }

    /// Rewrite the store without its expired records. Returns how many
    /// records were dropped.
    pub async fn prune(&self) -> Result<usize> {
        self.prune_at(Utc::now()).await
    }

    pub async fn prune_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut records = self.read_all().await;
        let total = records.len();
        records.retain(|_, record| !self.is_expired(record, now));
        self.write(&records).await?;

        let removed = total - records.len();
        debug!(path = %self.path.display(), removed, "Cache pruned");
        Ok(removed)
    }

    async fn read_all(&self) -> WorkingSet {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No cache file, starting empty");
                return WorkingSet::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cache unreadable, starting empty");
                return WorkingSet::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cache malformed, starting empty");
                WorkingSet::new()
            }
        }
    }

    /// Persist the full working set, replacing the previous content.
    ///
    /// The set is written to a temporary file in the target directory and
    /// renamed over the store, so readers see either the old or the new set.
    pub async fn write(&self, records: &WorkingSet) -> Result<()> {
        let sorted: BTreeMap<&String, &CacheRecord> = records.iter().collect();
        let payload = serde_json::to_vec_pretty(&sorted)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&path, &payload))
            .await
            .map_err(|e| ResolverError::cache_write(self.path.clone(), std::io::Error::other(e)))?
            .map_err(|e| ResolverError::cache_write(self.path.clone(), e))?;

        debug!(path = %self.path.display(), records = records.len(), "Cache written");
        Ok(())
    }
}

fn write_atomic(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(payload)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
