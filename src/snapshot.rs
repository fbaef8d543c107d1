//! One fetched view of per-date availability.
//!
//! A snapshot is immutable once built. Absence of a date means the source
//! does not know it (out of the bookable range), which is a distinct
//! outcome from a present date with zero places.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::date::WatchDate;

/// Number of available places for one date. Non-negative by construction.
pub type AvailabilityCount = u32;

/// Classification of one watched date against a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// The date is absent from the snapshot: unknown/out of range.
    Unlisted,
    /// The date is listed with zero places.
    Full,
    /// The date is listed with at least one place.
    Open(AvailabilityCount),
}

/// An immutable date -> availability-count mapping as of one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    counts: BTreeMap<WatchDate, AvailabilityCount>,
}

impl Snapshot {
    /// Build a snapshot from a fetched availability map.
    #[must_use]
    pub fn new(counts: BTreeMap<WatchDate, AvailabilityCount>) -> Self {
        Self { counts }
    }

    /// Classify one date against this snapshot.
    #[must_use]
    pub fn status(&self, date: WatchDate) -> SlotStatus {
        match self.counts.get(&date).copied() {
            None => SlotStatus::Unlisted,
            Some(0) => SlotStatus::Full,
            Some(n) => SlotStatus::Open(n),
        }
    }

    /// The raw count for a date, if the source listed it.
    #[must_use]
    pub fn count(&self, date: WatchDate) -> Option<AvailabilityCount> {
        self.counts.get(&date).copied()
    }

    /// Number of dates the source reported.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// True if the source reported no dates at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl FromIterator<(WatchDate, AvailabilityCount)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (WatchDate, AvailabilityCount)>>(iter: I) -> Self {
        Self {
            counts: iter.into_iter().collect(),
        }
    }
}
