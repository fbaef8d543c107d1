//! JSON-file-backed watch store.
//!
//! The whole watch set is kept in memory and rewritten to disk on every
//! mutation, via a temp file and rename so a crash mid-write never leaves
//! a truncated store behind. Suitable for the single-process bot this
//! crate serves; it is not a database.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::date::WatchDate;
use crate::registry::SubscriberId;

use super::{PersistError, WatchStore};

#[derive(Debug, Serialize, Deserialize)]
struct StoredWatch {
    subscriber: SubscriberId,
    dates: BTreeSet<WatchDate>,
}

type WatchMap = BTreeMap<SubscriberId, BTreeSet<WatchDate>>;

fn lock_err(context: &'static str) -> PersistError {
    PersistError::Backend(format!("poisoned lock: {context}"))
}

/// A watch store backed by one JSON file.
#[derive(Debug)]
pub struct FileWatchStore {
    path: PathBuf,
    state: Mutex<WatchMap>,
}

impl FileWatchStore {
    /// Open a store at `path`, reading any existing content. A missing
    /// file is an empty store, not an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let path = path.into();
        let state = read_watch_map(&path)?;
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn flush(&self, state: &WatchMap) -> Result<(), PersistError> {
        let records: Vec<StoredWatch> = state
            .iter()
            .map(|(subscriber, dates)| StoredWatch {
                subscriber: *subscriber,
                dates: dates.clone(),
            })
            .collect();
        let payload = serde_json::to_string_pretty(&records)?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn read_watch_map(path: &Path) -> Result<WatchMap, PersistError> {
    if !path.exists() {
        return Ok(WatchMap::new());
    }

    let content = fs::read_to_string(path)?;
    let records: Vec<StoredWatch> = serde_json::from_str(&content)?;

    let mut map = WatchMap::new();
    for record in records {
        if record.dates.is_empty() {
            continue;
        }
        map.entry(record.subscriber).or_default().extend(record.dates);
    }
    Ok(map)
}

impl WatchStore for FileWatchStore {
    fn load(&self) -> Result<Vec<(SubscriberId, WatchDate)>, PersistError> {
        let state = self.state.lock().map_err(|_| lock_err("load"))?;
        Ok(state
            .iter()
            .flat_map(|(subscriber, dates)| dates.iter().map(|date| (*subscriber, *date)))
            .collect())
    }

    fn record_add(&self, subscriber: SubscriberId, date: WatchDate) -> Result<(), PersistError> {
        let mut state = self.state.lock().map_err(|_| lock_err("record_add"))?;
        if state.entry(subscriber).or_default().insert(date) {
            self.flush(&state)?;
        }
        Ok(())
    }

    fn record_remove(&self, subscriber: SubscriberId, date: WatchDate) -> Result<(), PersistError> {
        let mut state = self.state.lock().map_err(|_| lock_err("record_remove"))?;
        let Some(dates) = state.get_mut(&subscriber) else {
            return Ok(());
        };
        if !dates.remove(&date) {
            return Ok(());
        }
        if dates.is_empty() {
            state.remove(&subscriber);
        }
        self.flush(&state)
    }

    fn record_clear(&self, subscriber: SubscriberId) -> Result<(), PersistError> {
        let mut state = self.state.lock().map_err(|_| lock_err("record_clear"))?;
        if state.remove(&subscriber).is_none() {
            return Ok(());
        }
        self.flush(&state)
    }
}
