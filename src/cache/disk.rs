//! Durable tier of the API cache: one JSON file per key.
//!
//! Every failure here is soft. Reads degrade to a miss and writes to a
//! memory-only entry; the caller only learns about it through the error counter.

use super::entry::CacheEntry;
use super::key::CacheKey;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

pub(crate) enum DiskRead {
    Hit(CacheEntry),
    Expired,
    Miss,
    Failed,
}

pub(crate) struct DiskTier {
    dir: PathBuf,
}

impl DiskTier {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str()))
    }

    /// Read an entry; a stale file is deleted on the spot.
    pub(crate) async fn read(&self, key: &CacheKey, ttl: Duration, now: i64) -> DiskRead {
        let path = self.path_for(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return DiskRead::Miss,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "API cache disk read failed");
                return DiskRead::Failed;
            }
        };

        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding unreadable API cache file");
                self.remove_path(&path).await;
                return DiskRead::Failed;
            }
        };

        if entry.is_fresh(ttl, now) {
            DiskRead::Hit(entry)
        } else {
            debug!(key = %key, "API cache disk entry expired");
            self.remove_path(&path).await;
            DiskRead::Expired
        }
    }

    /// Whole-file replace of the entry. Returns false when the write failed.
    pub(crate) async fn write(&self, key: &CacheKey, bytes: &[u8]) -> bool {
        if let Err(e) = fs::create_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), error = %e, "cannot create API cache directory");
            return false;
        }
        let path = self.path_for(key);
        match fs::write(&path, bytes).await {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "API cache disk write failed; keeping entry in memory only");
                false
            }
        }
    }

    pub(crate) async fn remove(&self, key: &CacheKey) -> bool {
        self.remove_path(&self.path_for(key)).await
    }

    async fn remove_path(&self, path: &Path) -> bool {
        match fs::remove_file(path).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot remove API cache file");
                false
            }
        }
    }

    /// Delete every file whose entry is older than `ttl`, or unreadable.
    /// Returns `(files removed, bytes freed)`.
    pub(crate) async fn remove_expired(&self, ttl: Duration, now: i64) -> (usize, u64) {
        let mut removed = 0;
        let mut freed = 0;
        for (path, size) in self.files().await {
            let fresh = match fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<CacheEntry>(&bytes)
                    .map(|entry| entry.is_fresh(ttl, now))
                    .unwrap_or(false),
                Err(_) => continue,
            };
            if !fresh && self.remove_path(&path).await {
                removed += 1;
                freed += size;
            }
        }
        (removed, freed)
    }

    /// Bytes currently held on disk.
    pub(crate) async fn usage(&self) -> u64 {
        self.files().await.iter().map(|(_, size)| size).sum()
    }

    pub(crate) async fn file_count(&self) -> usize {
        self.files().await.len()
    }

    pub(crate) async fn clear(&self) {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %self.dir.display(), error = %e, "cannot clear API cache directory"),
        }
    }

    async fn files(&self) -> Vec<(PathBuf, u64)> {
        let mut out = Vec::new();
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(_) => return out,
        };
        while let Ok(Some(item)) = dir.next_entry().await {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // Only files named after a cache key belong to this tier.
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if CacheKey::from_hex(stem).is_none() {
                continue;
            }
            if let Ok(meta) = item.metadata().await {
                if meta.is_file() {
                    out.push((path, meta.len()));
                }
            }
        }
        out
    }
}
