//! # Template Cache
//!
//! Caches directory trees (tool and project templates) as single compressed,
//! checksummed artifacts so they can be installed without network access.
//!
//! ## Layout
//!
//! ```text
//! <cache_dir>/manifest.json
//! <cache_dir>/templates/<kind>/<name>@<version>.tar.gz
//! ```
//!
//! Despite the extension an artifact is not a tar archive: it is a gzip stream
//! over the JSON encoding of a [`TreeNode`]. The manifest records, for each
//! `kind -> name -> version`, the artifact's compressed size and SHA-256.
//!
//! ## Integrity
//!
//! The checksum is re-computed on every read. A mismatch, or a missing
//! artifact, makes the template a miss; corrupted bytes are never returned.
//!
//! ## Size policy
//!
//! [`TemplateCache::check_size_limit`] evicts the oldest entries once the
//! compressed total exceeds `max_size`, stopping at 80% of it so the next
//! write does not immediately trigger another eviction.

pub mod codec;
mod manifest;
mod store;
pub mod tree;

pub use manifest::{Manifest, TemplateIdentity, TemplateKind, TemplateManifestEntry};
pub use store::{
    CachedTemplate, EvictionReport, ExtractReport, TemplateCache, TemplateCacheConfig,
    TemplateCacheStats, EVICTION_TARGET_RATIO, MANIFEST_FILE, TEMPLATES_DIR,
};
pub use tree::TreeNode;
