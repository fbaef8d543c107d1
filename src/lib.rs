//! # hutwatch - availability watch scheduler
//!
//! hutwatch notifies subscribers over a chat transport when a reservation
//! date they are watching becomes available at a mountain hut. It polls a
//! third-party availability source on one shared schedule, multiplexes an
//! arbitrary number of per-subscriber watch sets onto that single poll
//! loop, and notifies each subscriber exactly once per state transition.
//!
//! ## Core Concepts
//!
//! - **WatchDate**: a calendar date a subscriber wants checked against each
//!   fetched snapshot
//! - **Snapshot**: one fetched, immutable view of date -> availability count
//! - **WatchRegistry**: the per-subscriber watch sets; a subscriber entry
//!   exists iff it has at least one watched date
//! - **PollScheduler**: the Idle/Armed/Fetching state machine deciding when
//!   the next fetch happens; at most one fetch in flight, at most one timer
//!   pending
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hutwatch::{NoopWatchStore, PollScheduler, SchedulerConfig, SubscriberId, WatchDate};
//!
//! let scheduler = PollScheduler::new(
//!     SchedulerConfig::default(),
//!     fetcher,   // Arc<dyn SnapshotFetcher>
//!     notifier,  // Arc<dyn Notifier>
//!     Arc::new(NoopWatchStore),
//! );
//!
//! let chat = SubscriberId::new(42);
//! scheduler.watch(chat, "2024-07-11".parse::<WatchDate>()?)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod date;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod notify;
pub mod persist;
pub mod registry;
pub mod scheduler;
pub mod snapshot;

#[cfg(feature = "transport-telegram")]
pub mod telegram;

#[cfg(feature = "upstream-ffcam")]
pub mod upstream;

// Re-export primary types at crate root for convenience
pub use date::{ParseDateError, WatchDate};
pub use dispatch::{dispatch, IntentKind, NotificationIntent};
pub use error::{FetchError, NotifyError, WatchError, WatchResult};
pub use fetch::SnapshotFetcher;
pub use notify::Notifier;
pub use persist::{NoopWatchStore, PersistError, WatchStore};
pub use registry::{SubscriberId, WatchRegistry};
pub use scheduler::{PollScheduler, SchedulerConfig, SchedulerPhase};
pub use snapshot::{AvailabilityCount, SlotStatus, Snapshot};

#[cfg(feature = "persistent")]
pub use persist::FileWatchStore;

#[cfg(feature = "transport-telegram")]
pub use telegram::TelegramNotifier;

#[cfg(feature = "upstream-ffcam")]
pub use upstream::{FfcamConfig, FfcamFetcher};
