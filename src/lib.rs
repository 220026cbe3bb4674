//! # tiercache
//!
//! Tiered caching and offline delivery for tools that pull data and templates
//! from remote sources.
//!
//! ## Overview
//!
//! Three caches, leaf first:
//!
//! - **Rate limiter**: a sliding window bounding outbound fetches
//! - **API cache**: memory + disk TTL cache keyed by a SHA-256 of the request,
//!   coalescing concurrent fetches of the same key into one
//! - **Template cache**: directory trees stored as gzip-compressed,
//!   checksummed artifacts with a versioned manifest
//!
//! and a **coordinator** that puts both caches under one byte budget, evicts in a
//! configured priority order, and serves cache-only while offline.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tiercache::{CacheSettings, IntegratedCache, RequestHeaders, StaticProbe};
//!
//! #[tokio::main]
//! async fn main() -> tiercache::Result<()> {
//!     let cache = IntegratedCache::builder(CacheSettings::from_env()?)
//!         .with_probe(Arc::new(StaticProbe::online()))
//!         .build()
//!         .await?;
//!     cache.init().await;
//!
//!     let repo: serde_json::Value = cache
//!         .get_github_data("https://api.github.com/repos/rust-lang/rust", &RequestHeaders::new())
//!         .await?;
//!     println!("{}", repo["full_name"]);
//!
//!     cache.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`resilience`] | Sliding-window rate limiter |
//! | [`cache`] | Coalescing memory + disk API cache |
//! | [`templates`] | Content-addressed template cache |
//! | [`coordinator`] | Budget-aware facade over both caches |
//! | [`offline`] | Connectivity probe interface |
//! | [`fetch`] | Remote fetchers (HTTP) |
//! | [`config`] | Settings, defaults and loading |
//! | [`lock`] | Advisory maintenance lock |

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod fetch;
pub mod lock;
pub mod offline;
pub mod resilience;
pub mod templates;

pub use cache::{ApiCache, ApiCacheConfig, CacheKey, RequestHeaders};
pub use config::{CacheSettings, CacheSource};
pub use coordinator::{BudgetState, IntegratedCache, SmartCleanupReport, SyncOutcome};
pub use offline::{ConnectivityProbe, NetworkStats, StaticProbe};
pub use templates::{TemplateCache, TemplateCacheConfig, TemplateKind, TemplateManifestEntry};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, SharedFetchError};
