//! Error types for the rouse scheduling core.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type RouseResult<T> = Result<T, RouseError>;

/// Errors surfaced by the reactor, the await/rouse protocol, and the codec.
///
/// Every variant is reported synchronously to the call that triggered it;
/// nothing is retried by the core. Retry, if desired, is the caller's job.
#[derive(Debug, Error)]
pub enum RouseError {
    /// A reactor resource or handle could not be created.
    ///
    /// Fatal to the requested operation; the actor never enters `Active`.
    #[error("resource allocation failed: {0}")]
    Allocation(String),

    /// The underlying asynchronous operation failed (spawn, signal delivery).
    ///
    /// Affects only the issuing caller, never other actors.
    #[error("reactor operation failed: {0}")]
    Reactor(#[from] std::io::Error),

    /// The awaited actor was closed before it naturally signaled.
    ///
    /// A definite, non-retryable outcome, not a transient failure.
    #[error("actor closed before signaling")]
    Closed,

    /// A value could not cross an isolation boundary.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// The reactor behind a weak handle has already been torn down.
    #[error("reactor has been dropped")]
    ReactorGone,
}
