use thiserror::Error;

/// Primary error type for Tessera MVCC operations.
///
/// Only conditions a correct caller can run into are represented here.
/// Violated preconditions (illegal state-machine transitions, timestamps
/// below the new-op floor, double termination of a scoped op) are panics:
/// they mean the caller broke its contract and must be loud and immediate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TesseraError {
    /// State a caller demanded has not been initialized yet.
    #[error("uninitialized: {detail}")]
    Uninitialized { detail: String },

    /// The operation was cut short, typically by registry shutdown.
    #[error("aborted: {reason}")]
    Aborted { reason: String },

    /// A wait deadline expired before the awaited condition held.
    #[error("timed out: {detail}")]
    TimedOut { detail: String },

    /// The component cannot serve this request at all.
    #[error("service unavailable: {detail}")]
    ServiceUnavailable { detail: String },
}

impl TesseraError {
    /// Create an `Uninitialized` error.
    pub fn uninitialized(detail: impl Into<String>) -> Self {
        Self::Uninitialized {
            detail: detail.into(),
        }
    }

    /// Create an `Aborted` error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Create a `TimedOut` error.
    pub fn timed_out(detail: impl Into<String>) -> Self {
        Self::TimedOut {
            detail: detail.into(),
        }
    }

    /// Create a `ServiceUnavailable` error.
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            detail: detail.into(),
        }
    }

    /// Whether this is an `Uninitialized` error.
    #[must_use]
    pub const fn is_uninitialized(&self) -> bool {
        matches!(self, Self::Uninitialized { .. })
    }

    /// Whether this is an `Aborted` error.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Whether this is a `TimedOut` error.
    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Whether this is a `ServiceUnavailable` error.
    #[must_use]
    pub const fn is_service_unavailable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable { .. })
    }

    /// Whether retrying the same call later may succeed.
    ///
    /// Timeouts are retryable with a fresh deadline. `Uninitialized` clears
    /// once the watermarks move. `Aborted` and `ServiceUnavailable` are
    /// terminal for the component that raised them.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TimedOut { .. } | Self::Uninitialized { .. })
    }
}

/// Result type alias using `TesseraError`.
pub type Result<T> = std::result::Result<T, TesseraError>;
