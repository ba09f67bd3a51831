//! Error types shared across the crate.
//!
//! Fatal startup errors ([`SearchboxError::Extraction`], [`SearchboxError::Launch`],
//! [`SearchboxError::HealthTimeout`], [`SearchboxError::PluginInstall`]) abort the
//! remaining startup sequence and are replayed to every readiness query as
//! [`SearchboxError::Startup`]. Transient probe failures never surface here; they
//! are retried inside the health-poll loop. Disposal failures are logged and
//! swallowed so teardown always runs to completion.

use std::time::Duration;
use thiserror::Error;

/// Crate-wide result alias.
pub type SearchboxResult<T> = Result<T, SearchboxError>;

/// Errors produced while bootstrapping or supervising the embedded engine.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SearchboxError {
    /// Malformed or truncated archive stream, or an entry the format cannot
    /// represent (oversized content, path escaping the target directory).
    #[error("archive error: {0}")]
    Extraction(String),

    /// The OS could not start the requested process.
    #[error("failed to launch `{executable}`: {source}")]
    Launch {
        /// Executable that failed to spawn.
        executable: String,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The health wait expired before the engine reported a serviceable
    /// status. Raised only on timeout expiry, never on outer cancellation.
    #[error("timed out after {timeout:?} waiting for engine health: {cause}")]
    HealthTimeout {
        /// The configured wait budget that was exhausted.
        timeout: Duration,
        /// Last observed probe outcome before the deadline.
        cause: String,
    },

    /// A plugin install sub-invocation exited unsuccessfully.
    #[error("plugin `{plugin}` install failed: {reason}")]
    PluginInstall {
        /// Plugin that failed to install.
        plugin: String,
        /// Exit status or failure description.
        reason: String,
    },

    /// The outer cancellation signal fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid or missing configuration (unset bundle, missing port).
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem or pipe-level failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Replay of an earlier startup failure, delivered identically to the
    /// async and blocking readiness accessors.
    #[error("engine startup failed: {0}")]
    Startup(String),

    /// The instance has been disposed.
    #[error("instance already disposed")]
    Disposed,

    /// Invariant violation inside the orchestrator (background task panic,
    /// closed channel).
    #[error("internal error: {0}")]
    Internal(String),
}

impl SearchboxError {
    /// True when the error is the plain-cancellation outcome rather than a
    /// distinguished failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SearchboxError::Cancelled)
    }
}
