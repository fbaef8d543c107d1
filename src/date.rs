//! The watched identifier: a calendar date.
//!
//! Dates are compared by value and render as `YYYY-MM-DD`, the format the
//! reservation source keys its availability map with and the format
//! subscribers type into the chat.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A calendar date a subscriber wants checked against each snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchDate(NaiveDate);

impl WatchDate {
    /// Wrap an existing date.
    #[must_use]
    pub const fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// The underlying calendar date.
    #[must_use]
    pub const fn into_inner(self) -> NaiveDate {
        self.0
    }
}

impl From<NaiveDate> for WatchDate {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl fmt::Display for WatchDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // NaiveDate displays as %Y-%m-%d, the wire format.
        self.0.fmt(f)
    }
}

impl FromStr for WatchDate {
    type Err = ParseDateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Self)
            .map_err(|_| ParseDateError {
                input: s.to_string(),
            })
    }
}

/// Error parsing a date string that is not `YYYY-MM-DD`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid watch date '{input}': expected YYYY-MM-DD")]
pub struct ParseDateError {
    /// The rejected input.
    pub input: String,
}
