use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Error produced by a caller-supplied fetch function.
///
/// Wrapped in an `Arc` so that every caller coalesced onto the same in-flight
/// fetch receives the same error value.
pub type SharedFetchError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "settings.max_total_size")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "template_cache", "coordinator")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the cache subsystem.
///
/// Cache misses are not errors; lookups return `Option`. Only conditions a
/// caller must react to surface here.
#[derive(Debug, Error)]
pub enum Error {
    /// A remote fetch was required while offline and nothing was cached.
    #[error("'{identifier}' is not cached and cannot be fetched while offline")]
    Offline { identifier: String },

    /// The caller-supplied fetch function failed. Never cached.
    #[error("fetch failed: {0}")]
    Fetch(SharedFetchError),

    #[error("I/O error during {operation} on {}: {source}", .path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Compression error: {0}")]
    Compression(String),

    /// Artifact content that cannot be trusted (bad checksum, unsafe entry names).
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("template {kind}/{name}@{version} is not cached")]
    NotCached {
        kind: String,
        name: String,
        version: String,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn io(operation: &'static str, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Io {
            operation,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn offline(identifier: impl Into<String>) -> Self {
        Error::Offline {
            identifier: identifier.into(),
        }
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// True when the failure is the offline-unavailable condition.
    pub fn is_offline(&self) -> bool {
        matches!(self, Error::Offline { .. })
    }

    /// True when the failure came from the caller-supplied fetch function.
    pub fn is_fetch(&self) -> bool {
        matches!(self, Error::Fetch(_))
    }

    /// The shared fetch error, if this is a fetch failure.
    pub fn fetch_error(&self) -> Option<&SharedFetchError> {
        match self {
            Error::Fetch(e) => Some(e),
            _ => None,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_formatting() {
        let err = Error::configuration_with_context(
            "budget must be positive",
            ErrorContext::new()
                .with_field_path("max_total_size")
                .with_source("settings"),
        );
        assert_eq!(
            err.to_string(),
            "Configuration error: budget must be positive (field: max_total_size, source: settings)"
        );
        assert!(err.context().is_some());
    }

    #[test]
    fn test_category_predicates() {
        let offline = Error::offline("https://api.github.com/repos/a/b");
        assert!(offline.is_offline());
        assert!(!offline.is_fetch());

        let inner: SharedFetchError = Arc::new(std::io::Error::other("boom"));
        let fetch = Error::Fetch(inner);
        assert!(fetch.is_fetch());
        assert_eq!(fetch.fetch_error().map(|e| e.to_string()).as_deref(), Some("boom"));
    }
}
