//! Durable watch sets.
//!
//! Persistence is an optional durability layer external to the core: the
//! scheduler treats store calls as fire-and-forget side effects triggered
//! by registry mutations, never as a precondition for scheduling
//! decisions. `load` is consumed once at startup to rehydrate previously
//! active watches across a process restart.

use thiserror::Error;

use crate::date::WatchDate;
use crate::registry::SubscriberId;

#[cfg(feature = "persistent")]
mod file;

#[cfg(feature = "persistent")]
pub use file::FileWatchStore;

/// Errors that can occur during watch store operations.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Reading or writing the backing storage failed.
    #[error("watch store io error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored payload could not be encoded or decoded.
    #[error("watch store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend error.
    #[error("watch store backend error: {0}")]
    Backend(String),
}

/// Records watch set mutations and rehydrates them at startup.
///
/// Implementations should handle concurrent access safely; the scheduler
/// only ever calls mutation methods from its single worker thread.
pub trait WatchStore: Send + Sync {
    /// All persisted watches, for startup rehydration.
    fn load(&self) -> Result<Vec<(SubscriberId, WatchDate)>, PersistError>;

    /// Record that a subscriber started watching a date.
    fn record_add(&self, subscriber: SubscriberId, date: WatchDate) -> Result<(), PersistError>;

    /// Record that a subscriber stopped watching a date.
    fn record_remove(&self, subscriber: SubscriberId, date: WatchDate) -> Result<(), PersistError>;

    /// Record that a subscriber's watch set was cleared.
    fn record_clear(&self, subscriber: SubscriberId) -> Result<(), PersistError>;
}

/// A store that persists nothing. The default for purely in-memory use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWatchStore;

impl WatchStore for NoopWatchStore {
    fn load(&self) -> Result<Vec<(SubscriberId, WatchDate)>, PersistError> {
        Ok(Vec::new())
    }

    fn record_add(&self, _subscriber: SubscriberId, _date: WatchDate) -> Result<(), PersistError> {
        Ok(())
    }

    fn record_remove(
        &self,
        _subscriber: SubscriberId,
        _date: WatchDate,
    ) -> Result<(), PersistError> {
        Ok(())
    }

    fn record_clear(&self, _subscriber: SubscriberId) -> Result<(), PersistError> {
        Ok(())
    }
}
