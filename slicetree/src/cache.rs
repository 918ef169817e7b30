//! Slice descriptor cache.
//!
//! Deciding where a datapoint goes requires the slice boundaries of the
//! target archive. Without a cache every write reads the slice index (and
//! the tail of each slice) from the column store. [`SliceCache`] keeps those
//! boundaries in memory according to a [`SliceCachingBehavior`]:
//!
//! - `none` caches nothing
//! - `latest` keeps the newest slice per (metric, step); writes at or after
//!   its start skip the store entirely
//! - `all` keeps the complete slice list per (metric, step) once loaded
//!
//! Only boundaries are cached. Datapoints are always written through to the
//! store by the caller.
//!
//! The behavior can be switched at runtime; the switch applies to later
//! calls and does not drop what is already cached.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::slice::Slice;

/// Which slices are kept in memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SliceCachingBehavior {
    /// Always read slice boundaries from the store.
    None,
    /// Keep only the newest slice of each archive.
    #[default]
    Latest,
    /// Keep every slice of each archive once loaded.
    All,
}

impl SliceCachingBehavior {
    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Latest => "latest",
            Self::All => "all",
        }
    }
}

impl FromStr for SliceCachingBehavior {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "latest" => Ok(Self::Latest),
            "all" => Ok(Self::All),
            _ => Err(ConfigError::UnknownCachingBehavior {
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for SliceCachingBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key: metric path and archive step.
type ArchiveKey = (String, u64);

#[derive(Debug, Default)]
struct CachedArchive {
    /// Slices by start timestamp.
    slices: BTreeMap<u64, Slice>,
    /// Whether `slices` is the full list for the archive.
    complete: bool,
}

/// In-memory cache of slice boundaries, safe to share between threads.
#[derive(Debug, Default)]
pub struct SliceCache {
    behavior: RwLock<SliceCachingBehavior>,
    archives: Mutex<HashMap<ArchiveKey, CachedArchive>>,
}

impl SliceCache {
    /// Creates an empty cache with the given behavior.
    pub fn new(behavior: SliceCachingBehavior) -> Self {
        Self {
            behavior: RwLock::new(behavior),
            archives: Mutex::new(HashMap::new()),
        }
    }

    /// The current behavior.
    pub fn behavior(&self) -> SliceCachingBehavior {
        *self.behavior.read()
    }

    /// Changes the behavior for subsequent operations.
    pub fn set_behavior(&self, behavior: SliceCachingBehavior) {
        *self.behavior.write() = behavior;
    }

    /// The newest cached slice of an archive.
    ///
    /// Always `None` under [`SliceCachingBehavior::None`].
    pub fn get(&self, metric: &str, step: u64) -> Option<Slice> {
        if self.behavior() == SliceCachingBehavior::None {
            return None;
        }
        self.archives
            .lock()
            .get(&(metric.to_string(), step))
            .and_then(|archive| archive.slices.values().next_back().copied())
    }

    /// The complete slice list of an archive, ordered by start.
    ///
    /// Only available under [`SliceCachingBehavior::All`] once the list was
    /// stored with [`SliceCache::put_all`].
    pub fn all(&self, metric: &str, step: u64) -> Option<Vec<Slice>> {
        if self.behavior() != SliceCachingBehavior::All {
            return None;
        }
        self.archives
            .lock()
            .get(&(metric.to_string(), step))
            .filter(|archive| archive.complete)
            .map(|archive| archive.slices.values().copied().collect())
    }

    /// Records one slice.
    ///
    /// Under `latest` the slice replaces the cached one unless it is older.
    /// Under `all` it is added to (or updated in) the cached list. Under
    /// `none` the archive's entry is dropped.
    pub fn put(&self, metric: &str, step: u64, slice: Slice) {
        let behavior = self.behavior();
        let mut archives = self.archives.lock();
        if behavior == SliceCachingBehavior::None {
            archives.remove(&(metric.to_string(), step));
            return;
        }

        let archive = archives.entry((metric.to_string(), step)).or_default();
        match behavior {
            SliceCachingBehavior::Latest => {
                let newest = archive.slices.keys().next_back().copied();
                if newest.is_none_or(|start| slice.start >= start) {
                    archive.slices.clear();
                    archive.slices.insert(slice.start, slice);
                }
                // Older slices are not tracked under `latest`.
                archive.complete = false;
            }
            SliceCachingBehavior::All => {
                archive.slices.insert(slice.start, slice);
            }
            SliceCachingBehavior::None => {}
        }
    }

    /// Records the complete slice list of an archive.
    ///
    /// Under `latest` only the newest slice is kept; under `none` the
    /// archive's entry is dropped.
    pub fn put_all(&self, metric: &str, step: u64, slices: &[Slice]) {
        match self.behavior() {
            SliceCachingBehavior::None => {
                self.archives.lock().remove(&(metric.to_string(), step));
            }
            SliceCachingBehavior::Latest => {
                if let Some(newest) = slices.iter().max_by_key(|s| s.start) {
                    self.put(metric, step, *newest);
                }
            }
            SliceCachingBehavior::All => {
                let archive = CachedArchive {
                    slices: slices.iter().map(|s| (s.start, *s)).collect(),
                    complete: true,
                };
                self.archives
                    .lock()
                    .insert((metric.to_string(), step), archive);
            }
        }
    }

    /// Drops every cached slice of `metric`. Returns how many were dropped.
    pub fn flush(&self, metric: &str) -> usize {
        let mut dropped = 0;
        self.archives.lock().retain(|(cached_metric, _), archive| {
            if cached_metric == metric {
                dropped += archive.slices.len();
                false
            } else {
                true
            }
        });
        dropped
    }

    /// Drops everything.
    pub fn clear(&self) {
        self.archives.lock().clear();
    }

    /// Number of cached slices across all archives.
    pub fn len(&self) -> usize {
        self.archives
            .lock()
            .values()
            .map(|archive| archive.slices.len())
            .sum()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice(start: u64, end: u64) -> Slice {
        Slice {
            step: 60,
            start,
            end,
        }
    }

    #[test]
    fn test_behavior_parsing() {
        assert_eq!("none".parse::<SliceCachingBehavior>().unwrap(), SliceCachingBehavior::None);
        assert_eq!("Latest".parse::<SliceCachingBehavior>().unwrap(), SliceCachingBehavior::Latest);
        assert_eq!(" ALL ".parse::<SliceCachingBehavior>().unwrap(), SliceCachingBehavior::All);
        assert!("some".parse::<SliceCachingBehavior>().is_err());
        assert_eq!(SliceCachingBehavior::default(), SliceCachingBehavior::Latest);
    }

    #[test]
    fn test_none_caches_nothing() {
        let cache = SliceCache::new(SliceCachingBehavior::None);
        cache.put("a.b", 60, slice(0, 600));
        cache.put_all("a.b", 60, &[slice(0, 600), slice(1200, 1800)]);

        assert!(cache.is_empty());
        assert_eq!(cache.get("a.b", 60), None);
        assert_eq!(cache.all("a.b", 60), None);
    }

    #[test]
    fn test_latest_keeps_only_newest() {
        let cache = SliceCache::new(SliceCachingBehavior::Latest);

        cache.put_all("a.b", 60, &[slice(0, 600), slice(1200, 1800)]);
        assert_eq!(cache.get("a.b", 60), Some(slice(1200, 1800)));
        assert_eq!(cache.len(), 1);

        // An older slice never displaces the newest one.
        cache.put("a.b", 60, slice(0, 660));
        assert_eq!(cache.get("a.b", 60), Some(slice(1200, 1800)));

        cache.put("a.b", 60, slice(1200, 1860));
        assert_eq!(cache.get("a.b", 60), Some(slice(1200, 1860)));

        // Never complete under latest.
        assert_eq!(cache.all("a.b", 60), None);
    }

    #[test]
    fn test_all_keeps_complete_lists() {
        let cache = SliceCache::new(SliceCachingBehavior::All);

        // A lone put does not make the list complete.
        cache.put("a.b", 60, slice(0, 600));
        assert_eq!(cache.all("a.b", 60), None);

        cache.put_all("a.b", 60, &[slice(1200, 1800), slice(0, 600)]);
        assert_eq!(cache.all("a.b", 60), Some(vec![slice(0, 600), slice(1200, 1800)]));

        cache.put("a.b", 60, slice(3000, 3060));
        assert_eq!(cache.all("a.b", 60).unwrap().len(), 3);
        assert_eq!(cache.get("a.b", 60), Some(slice(3000, 3060)));
    }

    #[test]
    fn test_flush_is_per_metric() {
        let cache = SliceCache::new(SliceCachingBehavior::All);
        cache.put_all("a.b", 60, &[slice(0, 600)]);
        cache.put_all("a.b", 300, &[slice(0, 600)]);
        cache.put_all("a.c", 60, &[slice(0, 600)]);

        assert_eq!(cache.flush("a.b"), 2);
        assert_eq!(cache.get("a.b", 60), None);
        assert_eq!(cache.get("a.c", 60), Some(slice(0, 600)));
    }

    #[test]
    fn test_behavior_change_is_not_retroactive() {
        let cache = SliceCache::new(SliceCachingBehavior::All);
        cache.put_all("a.b", 60, &[slice(0, 600), slice(1200, 1800)]);

        cache.set_behavior(SliceCachingBehavior::Latest);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a.b", 60), Some(slice(1200, 1800)));
        assert_eq!(cache.all("a.b", 60), None);

        cache.set_behavior(SliceCachingBehavior::None);
        assert_eq!(cache.get("a.b", 60), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_updates_under_none_evict_entries() {
        let cache = SliceCache::new(SliceCachingBehavior::Latest);
        cache.put("a.b", 60, slice(0, 600));
        cache.put_all("a.b", 300, &[slice(0, 600)]);
        cache.put("a.c", 60, slice(0, 600));

        cache.set_behavior(SliceCachingBehavior::None);
        cache.put("a.b", 60, slice(0, 660));
        cache.put_all("a.b", 300, &[slice(0, 900)]);

        cache.set_behavior(SliceCachingBehavior::Latest);
        assert_eq!(cache.get("a.b", 60), None);
        assert_eq!(cache.get("a.b", 300), None);
        assert_eq!(cache.get("a.c", 60), Some(slice(0, 600)));
    }

    #[test]
    fn test_older_update_under_latest_invalidates_complete_list() {
        let cache = SliceCache::new(SliceCachingBehavior::All);
        cache.put_all("a.b", 60, &[slice(0, 600), slice(1200, 1800)]);

        cache.set_behavior(SliceCachingBehavior::Latest);
        cache.put("a.b", 60, slice(0, 660));

        cache.set_behavior(SliceCachingBehavior::All);
        assert_eq!(cache.all("a.b", 60), None);
        assert_eq!(cache.get("a.b", 60), Some(slice(1200, 1800)));
    }
}
