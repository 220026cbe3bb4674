//! Template manifest: the single source of truth for cached artifacts.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

/// Closed set of template categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    /// Templates for individual tools.
    Tool,
    /// Whole-project scaffolds.
    Project,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 2] = [TemplateKind::Tool, TemplateKind::Project];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::Tool => "tool",
            TemplateKind::Project => "project",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl std::fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(kind, name, version)` of one cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateIdentity {
    pub kind: TemplateKind,
    pub name: String,
    pub version: String,
}

impl std::fmt::Display for TemplateIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.kind, self.name, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateManifestEntry {
    pub version: String,
    pub cached_at: DateTime<Utc>,
    /// Compressed artifact size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the compressed artifact.
    pub checksum: String,
    /// Artifact location relative to the cache root, `/`-separated.
    pub artifact_path: String,
}

impl TemplateManifestEntry {
    /// True when `artifact_path` stays inside the cache root: relative, with
    /// no empty, `.` or `..` segments.
    pub fn has_contained_artifact_path(&self) -> bool {
        self.artifact_path
            .split('/')
            .all(|part| super::tree::check_entry_name(part).is_ok())
    }
}

/// `name -> version -> entry`
pub type VersionMap = BTreeMap<String, BTreeMap<String, TemplateManifestEntry>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    /// `kind -> name -> version -> entry`
    pub templates: BTreeMap<TemplateKind, VersionMap>,
    pub last_update_check: Option<DateTime<Utc>>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::empty()
    }
}

impl Manifest {
    /// Bumped whenever the artifact or manifest layout changes; older
    /// manifests are discarded on load.
    pub const FORMAT_VERSION: &'static str = "1.0.0";

    pub fn empty() -> Self {
        Self {
            version: Self::FORMAT_VERSION.to_string(),
            templates: TemplateKind::ALL
                .into_iter()
                .map(|k| (k, VersionMap::new()))
                .collect(),
            last_update_check: None,
        }
    }

    /// Read the manifest at `path`. Missing, unreadable, or other-version
    /// manifests yield an empty one.
    pub async fn load(path: &Path) -> Self {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no manifest yet");
                return Self::empty();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read manifest; starting empty");
                return Self::empty();
            }
        };

        match serde_json::from_slice::<Manifest>(&bytes) {
            Ok(mut manifest) if manifest.version == Self::FORMAT_VERSION => {
                for kind in TemplateKind::ALL {
                    manifest.templates.entry(kind).or_default();
                }
                manifest.drop_uncontained_entries();
                manifest
            }
            Ok(manifest) => {
                warn!(
                    found = %manifest.version,
                    expected = Self::FORMAT_VERSION,
                    "manifest format changed; discarding cached templates"
                );
                Self::empty()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt manifest; starting empty");
                Self::empty()
            }
        }
    }

    fn drop_uncontained_entries(&mut self) {
        for (kind, names) in self.templates.iter_mut() {
            for (name, versions) in names.iter_mut() {
                versions.retain(|version, entry| {
                    let keep = entry.has_contained_artifact_path();
                    if !keep {
                        warn!(
                            kind = %kind,
                            name = %name,
                            version = %version,
                            artifact_path = %entry.artifact_path,
                            "manifest entry points outside the cache; dropping it"
                        );
                    }
                    keep
                });
            }
            names.retain(|_, versions| !versions.is_empty());
        }
    }

    /// Write to a temporary sibling, then rename over `path`.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io("create_dir_all", parent, e))?;
        }
        let bytes = serde_json::to_vec_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| Error::io("write", &tmp_path, e))?;
        fs::rename(&tmp_path, path)
            .await
            .map_err(|e| Error::io("rename", path, e))?;
        Ok(())
    }

    pub fn get(&self, kind: TemplateKind, name: &str, version: &str) -> Option<&TemplateManifestEntry> {
        self.templates.get(&kind)?.get(name)?.get(version)
    }

    /// Most recently cached version of `(kind, name)`.
    pub fn latest(&self, kind: TemplateKind, name: &str) -> Option<&TemplateManifestEntry> {
        self.templates
            .get(&kind)?
            .get(name)?
            .values()
            .max_by(|a, b| a.cached_at.cmp(&b.cached_at).then_with(|| a.version.cmp(&b.version)))
    }

    pub fn insert(&mut self, kind: TemplateKind, name: &str, entry: TemplateManifestEntry) {
        self.templates
            .entry(kind)
            .or_default()
            .entry(name.to_string())
            .or_default()
            .insert(entry.version.clone(), entry);
    }

    pub fn remove(&mut self, id: &TemplateIdentity) -> Option<TemplateManifestEntry> {
        let names = self.templates.get_mut(&id.kind)?;
        let versions = names.get_mut(&id.name)?;
        let removed = versions.remove(&id.version);
        if versions.is_empty() {
            names.remove(&id.name);
        }
        removed
    }

    pub fn entries(&self) -> impl Iterator<Item = (TemplateIdentity, &TemplateManifestEntry)> {
        self.templates.iter().flat_map(|(kind, names)| {
            names.iter().flat_map(move |(name, versions)| {
                versions.iter().map(move |(version, entry)| {
                    (
                        TemplateIdentity {
                            kind: *kind,
                            name: name.clone(),
                            version: version.clone(),
                        },
                        entry,
                    )
                })
            })
        })
    }

    pub fn total_size(&self) -> u64 {
        self.entries().map(|(_, e)| e.size).sum()
    }
}
