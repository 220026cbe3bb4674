//! Template cache operations.

use super::codec;
use super::manifest::{Manifest, TemplateIdentity, TemplateKind, TemplateManifestEntry};
use super::tree::{self, TreeNode};
use crate::{Error, ErrorContext, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const TEMPLATES_DIR: &str = "templates";

/// Share of the size limit that eviction brings usage back down to.
pub const EVICTION_TARGET_RATIO: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct TemplateCacheConfig {
    /// Cache root; holds `manifest.json` and `templates/`.
    pub root: PathBuf,
    /// Bytes of compressed artifacts allowed before eviction.
    pub max_size: u64,
    pub compression_level: u32,
    /// File and directory names skipped when capturing a source tree.
    pub ignore: Vec<String>,
}

impl TemplateCacheConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_size: 100 * 1024 * 1024,
            compression_level: 6,
            ignore: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                ".DS_Store".to_string(),
            ],
        }
    }
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size = bytes;
        self
    }
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }
    pub fn with_ignore(mut self, names: Vec<String>) -> Self {
        self.ignore = names;
        self
    }
}

/// Result of caching one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTemplate {
    pub identity: TemplateIdentity,
    pub checksum: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub evicted: Vec<TemplateIdentity>,
    pub bytes_freed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub files: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateCacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub max_size: u64,
    /// `kind -> (entries, bytes)`
    pub by_kind: BTreeMap<TemplateKind, (usize, u64)>,
    pub last_update_check: Option<DateTime<Utc>>,
}

struct Inner {
    config: TemplateCacheConfig,
    manifest_path: PathBuf,
    manifest: Mutex<Manifest>,
}

/// Content-addressed cache of compressed directory snapshots.
///
/// Every read re-hashes the artifact against the manifest checksum; a
/// mismatch is reported as a miss and never served.
#[derive(Clone)]
pub struct TemplateCache {
    inner: Arc<Inner>,
}

fn check_identity_part(field: &str, value: &str) -> Result<()> {
    tree::check_entry_name(value).map_err(|_| {
        Error::runtime_with_context(
            format!("invalid template {}: {:?}", field, value),
            ErrorContext::new()
                .with_field_path(field)
                .with_source("template_cache"),
        )
    })?;
    if value.contains('@') {
        return Err(Error::runtime_with_context(
            format!("template {} must not contain '@': {:?}", field, value),
            ErrorContext::new()
                .with_field_path(field)
                .with_source("template_cache"),
        ));
    }
    Ok(())
}

async fn remove_artifact(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "cannot remove template artifact"),
    }
}

impl TemplateCache {
    /// Open the cache, loading the manifest from disk.
    pub async fn open(config: TemplateCacheConfig) -> Self {
        let manifest_path = config.root.join(MANIFEST_FILE);
        let manifest = Manifest::load(&manifest_path).await;
        Self {
            inner: Arc::new(Inner {
                config,
                manifest_path,
                manifest: Mutex::new(manifest),
            }),
        }
    }

    pub fn config(&self) -> &TemplateCacheConfig {
        &self.inner.config
    }

    fn relative_artifact_path(kind: TemplateKind, name: &str, version: &str) -> String {
        format!("{}/{}/{}@{}.tar.gz", TEMPLATES_DIR, kind, name, version)
    }

    fn resolve(&self, artifact_path: &str) -> PathBuf {
        artifact_path
            .split('/')
            .fold(self.inner.config.root.clone(), |acc, part| acc.join(part))
    }

    /// Snapshot `source`, compress it and record it under `(kind, name, version)`.
    ///
    /// Any I/O failure is returned: a template without its artifact is useless.
    pub async fn cache_template(
        &self,
        kind: TemplateKind,
        name: &str,
        source: &Path,
        version: &str,
    ) -> Result<CachedTemplate> {
        check_identity_part("name", name)?;
        check_identity_part("version", version)?;

        let tree = tree::capture(source, &self.inner.config.ignore).await?;
        let bytes = codec::compress(&tree, self.inner.config.compression_level)?;
        let checksum = codec::checksum(&bytes);
        let size = bytes.len() as u64;

        let artifact_path = Self::relative_artifact_path(kind, name, version);
        let path = self.resolve(&artifact_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io("create_dir_all", parent, e))?;
        }

        let mut manifest = self.inner.manifest.lock().await;
        let tmp_path = path.with_extension("gz.tmp");
        fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| Error::io("write", &tmp_path, e))?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| Error::io("rename", &path, e))?;

        manifest.insert(
            kind,
            name,
            TemplateManifestEntry {
                version: version.to_string(),
                cached_at: Utc::now(),
                size,
                checksum: checksum.clone(),
                artifact_path,
            },
        );
        manifest.save(&self.inner.manifest_path).await?;

        info!(
            kind = %kind,
            name,
            version,
            size,
            files = tree.file_count(),
            "template cached"
        );
        Ok(CachedTemplate {
            identity: TemplateIdentity {
                kind,
                name: name.to_string(),
                version: version.to_string(),
            },
            checksum,
            size,
        })
    }

    async fn lookup(
        &self,
        kind: TemplateKind,
        name: &str,
        version: Option<&str>,
    ) -> Option<TemplateManifestEntry> {
        let manifest = self.inner.manifest.lock().await;
        match version {
            Some(v) => manifest.get(kind, name, v).cloned(),
            None => manifest.latest(kind, name).cloned(),
        }
    }

    /// Manifest entry plus artifact bytes, only if the bytes match the checksum.
    async fn load_verified(
        &self,
        kind: TemplateKind,
        name: &str,
        version: Option<&str>,
    ) -> Option<(TemplateManifestEntry, Vec<u8>)> {
        let entry = self.lookup(kind, name, version).await?;
        let path = self.resolve(&entry.artifact_path);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "template artifact missing");
                return None;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read template artifact");
                return None;
            }
        };

        let actual = codec::checksum(&bytes);
        if actual != entry.checksum {
            warn!(
                kind = %kind,
                name,
                version = %entry.version,
                expected = %entry.checksum,
                actual = %actual,
                "template checksum mismatch, possible cache corruption"
            );
            return None;
        }
        Some((entry, bytes))
    }

    /// Verified manifest entry for `(kind, name, version)`; `None` for the
    /// latest version.
    pub async fn get_template(
        &self,
        kind: TemplateKind,
        name: &str,
        version: Option<&str>,
    ) -> Option<TemplateManifestEntry> {
        self.load_verified(kind, name, version)
            .await
            .map(|(entry, _)| entry)
    }

    /// Recreate the cached tree below `target`.
    pub async fn extract_to_directory(
        &self,
        kind: TemplateKind,
        name: &str,
        target: &Path,
        version: Option<&str>,
    ) -> Result<ExtractReport> {
        let (entry, bytes) =
            self.load_verified(kind, name, version)
                .await
                .ok_or_else(|| Error::NotCached {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    version: version.unwrap_or("latest").to_string(),
                })?;

        let tree = codec::decompress(&bytes)?;
        if !matches!(tree, TreeNode::Directory { .. }) {
            return Err(Error::Integrity(format!(
                "artifact {} does not hold a directory",
                entry.artifact_path
            )));
        }
        let files = tree::materialize(&tree, target).await?;
        let report = ExtractReport {
            files,
            bytes: tree.logical_size(),
        };
        debug!(kind = %kind, name, version = %entry.version, files, "template extracted");
        Ok(report)
    }

    /// Remove entries cached longer ago than `max_age`. Returns bytes freed.
    pub async fn cleanup(&self, max_age: Duration) -> Result<u64> {
        // An age beyond chrono's range expires nothing.
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let mut manifest = self.inner.manifest.lock().await;

        let expired: Vec<TemplateIdentity> = manifest
            .entries()
            .filter(|(_, e)| cutoff.map_or(false, |c| e.cached_at < c))
            .map(|(id, _)| id)
            .collect();

        let report = self.evict_locked(&mut manifest, expired).await?;
        if report.bytes_freed > 0 {
            info!(
                removed = report.evicted.len(),
                bytes_freed = report.bytes_freed,
                "template cleanup finished"
            );
        }
        Ok(report.bytes_freed)
    }

    /// Evict oldest-first down to 80% of `max_size` once it is exceeded.
    pub async fn check_size_limit(&self) -> Result<EvictionReport> {
        let max = self.inner.config.max_size;
        if self.total_size().await <= max {
            return Ok(EvictionReport::default());
        }
        let target = (max as f64 * EVICTION_TARGET_RATIO) as u64;
        self.evict_until(target).await
    }

    /// Evict entries with the oldest `cached_at` until usage is at most `target` bytes.
    pub async fn evict_until(&self, target: u64) -> Result<EvictionReport> {
        let mut manifest = self.inner.manifest.lock().await;
        let mut total = manifest.total_size();
        if total <= target {
            return Ok(EvictionReport::default());
        }

        let mut by_age: Vec<(TemplateIdentity, DateTime<Utc>, u64)> = manifest
            .entries()
            .map(|(id, e)| (id, e.cached_at, e.size))
            .collect();
        by_age.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut victims = Vec::new();
        for (id, _, size) in by_age {
            if total <= target {
                break;
            }
            total = total.saturating_sub(size);
            victims.push(id);
        }

        let report = self.evict_locked(&mut manifest, victims).await?;
        info!(
            evicted = report.evicted.len(),
            bytes_freed = report.bytes_freed,
            target,
            "template cache evicted to target"
        );
        Ok(report)
    }

    /// Keep only the `keep` most recently cached versions of `(kind, name)`.
    pub async fn prune_versions(
        &self,
        kind: TemplateKind,
        name: &str,
        keep: usize,
    ) -> Result<EvictionReport> {
        let mut manifest = self.inner.manifest.lock().await;
        let mut versions: Vec<(TemplateIdentity, DateTime<Utc>)> = manifest
            .entries()
            .filter(|(id, _)| id.kind == kind && id.name == name)
            .map(|(id, e)| (id, e.cached_at))
            .collect();
        versions.sort_by(|a, b| b.1.cmp(&a.1));
        let victims = versions.into_iter().skip(keep).map(|(id, _)| id).collect();
        self.evict_locked(&mut manifest, victims).await
    }

    async fn evict_locked(
        &self,
        manifest: &mut Manifest,
        victims: Vec<TemplateIdentity>,
    ) -> Result<EvictionReport> {
        if victims.is_empty() {
            return Ok(EvictionReport::default());
        }
        let mut report = EvictionReport::default();
        for id in victims {
            if let Some(entry) = manifest.remove(&id) {
                remove_artifact(&self.resolve(&entry.artifact_path)).await;
                debug!(template = %id, size = entry.size, "template evicted");
                report.bytes_freed += entry.size;
                report.evicted.push(id);
            }
        }
        manifest.save(&self.inner.manifest_path).await?;
        Ok(report)
    }

    /// Delete every artifact and reset the manifest.
    pub async fn clear(&self) -> Result<()> {
        let mut manifest = self.inner.manifest.lock().await;
        let dir = self.inner.config.root.join(TEMPLATES_DIR);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io("remove_dir_all", &dir, e)),
        }
        *manifest = Manifest::empty();
        manifest.save(&self.inner.manifest_path).await?;
        info!("template cache cleared");
        Ok(())
    }

    /// Compressed bytes recorded in the manifest.
    pub async fn total_size(&self) -> u64 {
        self.inner.manifest.lock().await.total_size()
    }

    pub async fn list(&self) -> Vec<(TemplateIdentity, TemplateManifestEntry)> {
        let manifest = self.inner.manifest.lock().await;
        manifest.entries().map(|(id, e)| (id, e.clone())).collect()
    }

    /// Record that remote templates were checked for updates just now.
    pub async fn mark_update_check(&self) -> Result<()> {
        let mut manifest = self.inner.manifest.lock().await;
        manifest.last_update_check = Some(Utc::now());
        manifest.save(&self.inner.manifest_path).await
    }

    pub async fn stats(&self) -> TemplateCacheStats {
        let manifest = self.inner.manifest.lock().await;
        let mut stats = TemplateCacheStats {
            max_size: self.inner.config.max_size,
            last_update_check: manifest.last_update_check,
            ..Default::default()
        };
        for (id, entry) in manifest.entries() {
            stats.entries += 1;
            stats.total_size += entry.size;
            let slot = stats.by_kind.entry(id.kind).or_default();
            slot.0 += 1;
            slot.1 += entry.size;
        }
        stats
    }
}
