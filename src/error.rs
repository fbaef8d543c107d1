//! Error types for hutwatch.
//!
//! All errors are strongly typed using thiserror. Each error is handled at
//! the layer that detects it: fetch errors are retried by the scheduler,
//! notify errors are logged and counted, and nothing propagates past the
//! scheduler boundary.

use thiserror::Error;

use crate::date::ParseDateError;
use crate::persist::PersistError;

/// Errors raised while fetching an availability snapshot.
///
/// Every fetch error is retried by the scheduler after the retry interval;
/// none are surfaced to subscribers except indirectly via continued silence.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or the connection failed.
    #[error("upstream request failed: {message}")]
    Request {
        message: String,
    },

    /// The request exceeded its upper wait bound.
    #[error("upstream request timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    /// The upstream answered with a non-success HTTP status.
    #[error("upstream returned HTTP status {status}")]
    Status {
        status: u16,
    },

    /// The response body did not contain a parseable availability payload.
    #[error("could not parse availability payload: {message}")]
    Parse {
        message: String,
    },
}

/// Errors raised while delivering a notification to the chat transport.
///
/// Delivery is best-effort: a failed notification is logged and counted but
/// never rolls back a registry mutation or affects the poll cycle.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The message could not be sent.
    #[error("notification transport failed: {message}")]
    Transport {
        message: String,
    },

    /// The transport answered with a non-success status.
    #[error("notification rejected with status {status}: {message}")]
    Rejected {
        status: u16,
        message: String,
    },
}

/// Top-level error type for hutwatch.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Snapshot fetch failed.
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Notification delivery failed.
    #[error("notify error: {0}")]
    Notify(#[from] NotifyError),

    /// Durable watch store operation failed.
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),

    /// A date string did not parse as `YYYY-MM-DD`.
    #[error("invalid date: {0}")]
    InvalidDate(#[from] ParseDateError),

    /// The scheduler worker is no longer running.
    #[error("scheduler worker is no longer running")]
    SchedulerGone,
}

impl WatchError {
    /// Returns true if this is a fetch error.
    #[must_use]
    pub const fn is_fetch(&self) -> bool {
        matches!(self, Self::Fetch(_))
    }

    /// Returns true if this is a notify error.
    #[must_use]
    pub const fn is_notify(&self) -> bool {
        matches!(self, Self::Notify(_))
    }

    /// Returns true if this is a persistence error.
    #[must_use]
    pub const fn is_persist(&self) -> bool {
        matches!(self, Self::Persist(_))
    }

    /// Returns true if the scheduler worker has shut down.
    #[must_use]
    pub const fn is_scheduler_gone(&self) -> bool {
        matches!(self, Self::SchedulerGone)
    }
}

/// Result type alias for hutwatch operations.
pub type WatchResult<T> = Result<T, WatchError>;
