//! Error types for the `docqa-rag` crate.

use std::fmt;

use thiserror::Error;

/// Why a persisted index could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexFault {
    /// Nothing is persisted at the location.
    Missing,
    /// The stored bytes could not be read, parsed, or verified.
    Corrupt(String),
    /// The index was built by a different embedding configuration.
    Incompatible {
        /// What the active embedder expects.
        expected: String,
        /// What the stored index declares.
        found: String,
    },
}

impl fmt::Display for IndexFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "no index is persisted"),
            Self::Corrupt(reason) => write!(f, "corrupt index: {reason}"),
            Self::Incompatible { expected, found } => {
                write!(f, "incompatible index: expected {expected}, found {found}")
            }
        }
    }
}

/// Errors that can occur while indexing or answering queries.
#[derive(Debug, Error)]
pub enum RagError {
    /// The embedding backend cannot be reached, loaded, or returned unusable output.
    #[error("Embedding capability unavailable ({provider}): {message}")]
    CapabilityUnavailable {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// There was nothing to index.
    #[error("Nothing to index: {0}")]
    EmptyCorpus(String),

    /// The persisted index is missing, corrupt, or incompatible.
    #[error("Index unavailable at '{location}': {fault}")]
    IndexUnavailable {
        /// The storage location that was consulted.
        location: String,
        /// The specific reason.
        fault: IndexFault,
    },

    /// Writing the index to its storage location failed.
    #[error("Index storage error at '{location}': {message}")]
    Storage {
        /// The storage location being written.
        location: String,
        /// A description of the failure.
        message: String,
    },

    /// A vector did not have the dimension the index was built with.
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// The index dimension.
        expected: usize,
        /// The dimension of the offending vector.
        found: usize,
    },

    /// Listing, fetching, or extracting a source file failed.
    #[error("Ingestion error ({source_id}): {message}")]
    Ingestion {
        /// The file that failed, or `*` for listing failures.
        source_id: String,
        /// A description of the failure.
        message: String,
    },

    /// The query text is empty.
    #[error("Query must not be empty")]
    InvalidQuery,

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A rebuild of the index failed; the query was not answered.
    #[error("could not build the index: {0}")]
    IndexBuildFailed(Box<RagError>),

    /// The index was available but the query could not be executed.
    #[error("could not answer the query: {0}")]
    QueryFailed(Box<RagError>),
}

impl RagError {
    /// Returns `true` for errors the retrieval engine recovers from by rebuilding.
    pub fn is_index_unavailable(&self) -> bool {
        matches!(self, Self::IndexUnavailable { .. })
    }

    /// Returns `true` if the failure happened while building the index.
    pub fn is_build_failure(&self) -> bool {
        matches!(self, Self::IndexBuildFailed(_))
    }

    /// The innermost error, looking through build/query wrappers.
    pub fn root_cause(&self) -> &RagError {
        match self {
            Self::IndexBuildFailed(inner) | Self::QueryFailed(inner) => inner.root_cause(),
            other => other,
        }
    }

    pub(crate) fn corrupt(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IndexUnavailable {
            location: location.into(),
            fault: IndexFault::Corrupt(reason.into()),
        }
    }
}

/// A convenience result type for indexing and retrieval operations.
pub type Result<T> = std::result::Result<T, RagError>;
