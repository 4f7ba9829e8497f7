//! Per-day sketch cache and rolling-window union (§4.4).
//!
//! A [`DaySnapshot`] folds a day's turnstile events (insertion order
//! authoritative) into the set of still-active users, then hashes survivors
//! into a fresh [`Sketch`]. Snapshots are cached and only rebuilt when marked
//! dirty by a later insertion, retraction, or erasure on that day.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use parking_lot::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::ledger::Ledger;
use crate::sketches::{Sketch, SketchFactory};

#[derive(Clone)]
pub struct DaySnapshot {
    pub sketch: Sketch,
    pub keys: BTreeSet<u64>,
}

struct Entry {
    snapshot: DaySnapshot,
    dirty: bool,
}

pub struct WindowManager {
    factory: Arc<SketchFactory>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl WindowManager {
    pub fn new(factory: Arc<SketchFactory>) -> Self {
        Self { factory, entries: Mutex::new(HashMap::new()) }
    }

    /// Marks a cached day as stale. A day never cached is left alone: it will
    /// be built fresh, dirty bit and all, the first time it's requested.
    pub fn mark_dirty(&self, day: &str) {
        if let Some(entry) = self.entries.lock().get_mut(day) {
            entry.dirty = true;
        }
    }

    fn build_snapshot(&self, ledger: &Ledger, day: &str) -> CoreResult<DaySnapshot> {
        let events = ledger.fetch_day_events(day)?;
        let mut active: BTreeSet<Vec<u8>> = BTreeSet::new();
        for (op, key) in events {
            match op {
                '+' => {
                    active.insert(key);
                }
                '-' => {
                    active.remove(&key);
                }
                other => {
                    return Err(CoreError::InvalidEvent(format!("unknown ledger op '{other}'")));
                }
            }
        }

        let mut sketch = self.factory.create();
        let mut keys = BTreeSet::new();
        for raw_key in &active {
            let hashed = dpdau_membrane::sketch_hash(raw_key);
            sketch.add(hashed);
            keys.insert(hashed);
        }
        Ok(DaySnapshot { sketch, keys })
    }

    /// Returns the cached snapshot for `day`, rebuilding it first if it is
    /// missing or dirty.
    pub fn get_snapshot(&self, ledger: &Ledger, day: &str) -> CoreResult<DaySnapshot> {
        let needs_rebuild = {
            let entries = self.entries.lock();
            match entries.get(day) {
                Some(entry) => entry.dirty,
                None => true,
            }
        };
        if needs_rebuild {
            let snapshot = self.build_snapshot(ledger, day)?;
            self.entries.lock().insert(day.to_string(), Entry { snapshot, dirty: false });
        }
        Ok(self.entries.lock().get(day).expect("just inserted or already present").snapshot.clone())
    }

    /// DAU for `day`: estimate, the underlying sketch, and the exact hashed
    /// key set (used by callers that need `|keys|` as the release base value).
    pub fn get_dau(&self, ledger: &Ledger, day: &str) -> CoreResult<(f64, Sketch, BTreeSet<u64>)> {
        let snapshot = self.get_snapshot(ledger, day)?;
        Ok((snapshot.sketch.estimate(), snapshot.sketch, snapshot.keys))
    }

    /// MAU over the `window_days` days ending at (and including) `end_day`:
    /// a fresh union sketch built from each day's cached snapshot.
    pub fn get_mau(&self, ledger: &Ledger, end_day: &str, window_days: i64) -> CoreResult<(f64, Sketch)> {
        let days = days_in_window(end_day, window_days)?;
        let mut union = self.factory.create();
        for day in &days {
            let snapshot = self.get_snapshot(ledger, day)?;
            union.union(&snapshot.sketch)?;
        }
        Ok((union.estimate(), union))
    }
}

fn days_in_window(end_day: &str, window_days: i64) -> CoreResult<Vec<String>> {
    if window_days < 1 {
        return Err(CoreError::InvalidConfig("window_days must be >= 1".into()));
    }
    let end = NaiveDate::parse_from_str(end_day, "%Y-%m-%d")
        .map_err(|e| CoreError::InvalidEvent(format!("invalid day '{end_day}': {e}")))?;
    let mut days = Vec::with_capacity(window_days as usize);
    for offset in 0..window_days {
        let day = end - Duration::days(offset);
        days.push(day.format("%Y-%m-%d").to_string());
    }
    days.reverse();
    Ok(days)
}
