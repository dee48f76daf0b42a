//! Unified error handling for the concord crate
//!
//! Domain errors ([`RegistryError`], [`SnapshotError`]) live next to the code
//! that raises them. This module ties them together:
//!
//! - [`ConcordErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorKind`] - Stable classification clients can act on
//! - [`Error`] - Unified error enum wrapping all domain-specific errors,
//!   returned by [`CoordinatorServer`](crate::coordinator::CoordinatorServer)
//!
//! # Usage
//!
//! ```rust,ignore
//! use concord::error::{ConcordErrorTrait, ErrorKind};
//!
//! match registry.route("svc1", &token).await {
//!     Ok(route) => forward(route.address()),
//!     Err(e) if e.kind() == ErrorKind::Unavailable => retry_later(),
//!     Err(e) => eprintln!("query failed: {e}"),
//! }
//! ```

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::coordinator::registry::RegistryError;
pub use crate::coordinator::snapshot::SnapshotError;

/// Common trait for all concord error types
pub trait ConcordErrorTrait: std::error::Error {
    /// Stable kind for callers to branch on
    fn kind(&self) -> ErrorKind;

    /// Check if retrying the same call later may succeed
    fn is_recoverable(&self) -> bool;
}

/// Client-visible error classification.
///
/// Each kind tells the caller what to do next: pick another service
/// (`NotFound`), stop retrying the same write (`Conflict`), subscribe again
/// (`Unauthorized`) or retry shortly (`Unavailable`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Service, endpoint, token or cluster absent
    NotFound,
    /// Duplicate registration, existing service or cluster membership clash
    Conflict,
    /// Token not valid for the service
    Unauthorized,
    /// No eligible provider to route to
    Unavailable,
    /// Malformed service id or endpoint
    InvalidArgument,
    /// Snapshot write or read failed
    PersistenceFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Unauthorized => "unauthorized",
            Self::Unavailable => "unavailable",
            Self::InvalidArgument => "invalid_argument",
            Self::PersistenceFailure => "persistence_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the concord crate
#[derive(Error, Debug)]
pub enum Error {
    /// Registry operation errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Snapshot dump/load errors
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ConcordErrorTrait for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Registry(e) => e.kind(),
            Self::Snapshot(e) => e.kind(),
            Self::Io(_) => ErrorKind::PersistenceFailure,
            Self::Config(_) => ErrorKind::InvalidArgument,
            Self::Other { .. } => ErrorKind::Unavailable,
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Registry(e) => e.is_recoverable(),
            Self::Snapshot(e) => e.is_recoverable(),
            Self::Io(_) => true, // I/O errors are often transient
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }
}

impl Error {
    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
