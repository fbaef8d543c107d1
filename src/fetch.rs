//! The collaborator seam for the remote availability source.
//!
//! The scheduler owns all retry timing; implementations only normalize
//! transport and parse failures into [`FetchError`] and must never panic
//! past this boundary.

use crate::error::FetchError;
use crate::snapshot::Snapshot;

/// Fetches one availability snapshot from the remote source.
///
/// Implementations must be safe to call repeatedly and must bound their
/// wait (for HTTP, a client-level request timeout). There is no
/// cancellation of an in-flight fetch beyond that bound; the scheduler
/// treats a timeout as a failed cycle and retries.
pub trait SnapshotFetcher: Send + Sync {
    /// Fetch the current date -> availability-count snapshot.
    fn fetch_snapshot(&self) -> Result<Snapshot, FetchError>;
}
