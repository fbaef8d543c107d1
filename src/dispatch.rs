//! Fan-out of one snapshot to every interested subscriber.
//!
//! Dispatch partitions each subscriber's watched dates against a fresh
//! snapshot, mutates the registry accordingly, and emits notification
//! intents. Satisfied and out-of-range watches are removed immediately so
//! a later cycle never re-notifies for the same transition.

use std::collections::BTreeMap;

use crate::date::WatchDate;
use crate::registry::{SubscriberId, WatchRegistry};
use crate::snapshot::{AvailabilityCount, SlotStatus, Snapshot};

/// Where satisfied subscribers are pointed to complete the booking.
const BOOKING_URL: &str = "http://refugedugouter.ffcam.fr/resapublic.html";

/// The class of a notification intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    /// Watched dates the source does not know; dropped from the watch set.
    Invalid,
    /// Watched dates with at least one open place; satisfied and dropped.
    Available,
}

/// One outbound notification for one subscriber.
///
/// A value object produced and consumed within a single poll cycle, never
/// persisted. Multiple dates of the same class for one subscriber are
/// batched into a single intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationIntent {
    /// Who to notify.
    pub subscriber: SubscriberId,
    /// What happened.
    pub kind: IntentKind,
    /// Affected dates, sorted.
    pub dates: Vec<WatchDate>,
    /// Observed counts per date. Empty for `Invalid` intents.
    pub counts: BTreeMap<WatchDate, AvailabilityCount>,
}

impl NotificationIntent {
    /// Render the outbound message text for this intent.
    #[must_use]
    pub fn render(&self) -> String {
        match self.kind {
            IntentKind::Invalid => {
                let dates = join_dates(&self.dates);
                if self.dates.len() == 1 {
                    format!(
                        "Unable to watch date {dates} as it's out of the bookable range.\n\
                         Please pick another date."
                    )
                } else {
                    format!(
                        "Unable to watch dates {dates} as they're out of the bookable range.\n\
                         Please pick other dates."
                    )
                }
            }
            IntentKind::Available => {
                let lines: Vec<String> = self
                    .dates
                    .iter()
                    .map(|date| {
                        let count = self.counts.get(date).copied().unwrap_or_default();
                        let noun = if count == 1 { "place" } else { "places" };
                        format!("{count} {noun} found for date {date}!")
                    })
                    .collect();
                format!(
                    "{}\n\nYou can book them here: {BOOKING_URL}",
                    lines.join("\n")
                )
            }
        }
    }
}

fn join_dates(dates: &[WatchDate]) -> String {
    dates
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Check every watched date against a fresh snapshot.
///
/// For each subscriber, dates absent from the snapshot are removed and
/// batched into one `Invalid` intent; dates listed with zero places stay
/// watched silently; dates with open places are removed on satisfaction
/// and batched into one `Available` intent carrying the observed counts.
/// Intents are ordered by subscriber, `Invalid` before `Available`.
pub fn dispatch(snapshot: &Snapshot, registry: &mut WatchRegistry) -> Vec<NotificationIntent> {
    let mut intents = Vec::new();

    for subscriber in registry.subscribers() {
        let mut invalid = Vec::new();
        let mut available = Vec::new();

        for date in registry.dates_of(subscriber) {
            match snapshot.status(date) {
                SlotStatus::Unlisted => invalid.push(date),
                SlotStatus::Full => {}
                SlotStatus::Open(count) => available.push((date, count)),
            }
        }

        for date in &invalid {
            registry.remove(subscriber, *date);
        }
        for (date, _) in &available {
            registry.remove(subscriber, *date);
        }

        if !invalid.is_empty() {
            intents.push(NotificationIntent {
                subscriber,
                kind: IntentKind::Invalid,
                dates: invalid,
                counts: BTreeMap::new(),
            });
        }
        if !available.is_empty() {
            intents.push(NotificationIntent {
                subscriber,
                kind: IntentKind::Available,
                dates: available.iter().map(|(date, _)| *date).collect(),
                counts: available.into_iter().collect(),
            });
        }
    }

    intents
}
