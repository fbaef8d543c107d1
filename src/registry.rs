//! Per-subscriber watch sets.
//!
//! The registry is a pure in-memory data structure with no locking of its
//! own; the scheduler worker is its single owner and serializes all
//! mutations. Invariant: a subscriber key exists iff its set is non-empty.
//! Removing the last date for a subscriber removes the subscriber entry
//! entirely, which is what drives scheduler deactivation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::date::WatchDate;

/// Opaque chat/account identifier. Equality and ordering by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(i64);

impl SubscriberId {
    /// Wrap a raw chat id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw chat id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The mapping from subscriber to their set of watched dates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchRegistry {
    watches: BTreeMap<SubscriberId, BTreeSet<WatchDate>>,
}

impl WatchRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a date into a subscriber's watch set, creating the set if
    /// absent. Idempotent; returns whether the date was newly inserted.
    pub fn add(&mut self, subscriber: SubscriberId, date: WatchDate) -> bool {
        self.watches.entry(subscriber).or_default().insert(date)
    }

    /// Remove a date from a subscriber's watch set. A no-op (not an error)
    /// if the subscriber or date is absent. Returns whether the date was
    /// present. An emptied set deletes the subscriber entry.
    pub fn remove(&mut self, subscriber: SubscriberId, date: WatchDate) -> bool {
        let Some(dates) = self.watches.get_mut(&subscriber) else {
            return false;
        };
        let removed = dates.remove(&date);
        if dates.is_empty() {
            self.watches.remove(&subscriber);
        }
        removed
    }

    /// Remove all dates for a subscriber, returning the removed dates
    /// (sorted; possibly empty) for reporting to the caller.
    pub fn clear(&mut self, subscriber: SubscriberId) -> Vec<WatchDate> {
        self.watches
            .remove(&subscriber)
            .map(|dates| dates.into_iter().collect())
            .unwrap_or_default()
    }

    /// A sorted snapshot copy of a subscriber's current watch set; empty
    /// if the subscriber has no watches. Never exposes the live set.
    #[must_use]
    pub fn dates_of(&self, subscriber: SubscriberId) -> Vec<WatchDate> {
        self.watches
            .get(&subscriber)
            .map(|dates| dates.iter().copied().collect())
            .unwrap_or_default()
    }

    /// True if a subscriber is watching a specific date.
    #[must_use]
    pub fn contains(&self, subscriber: SubscriberId, date: WatchDate) -> bool {
        self.watches
            .get(&subscriber)
            .is_some_and(|dates| dates.contains(&date))
    }

    /// True iff no subscriber has any watched date. Drives scheduler
    /// deactivation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Number of subscribers with non-empty watch sets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.watches.len()
    }

    /// Ordered subscribers with non-empty sets, for fan-out during dispatch.
    #[must_use]
    pub fn subscribers(&self) -> Vec<SubscriberId> {
        self.watches.keys().copied().collect()
    }

    /// Every subscriber with their sorted watch set, for status reporting.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<(SubscriberId, Vec<WatchDate>)> {
        self.watches
            .iter()
            .map(|(subscriber, dates)| (*subscriber, dates.iter().copied().collect()))
            .collect()
    }
}
