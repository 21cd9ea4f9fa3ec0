//! Memoization of derived effect series.
//!
//! Entries are keyed by a fingerprint of the calculation settings and a
//! fingerprint of the requested range. New raw data invalidates every entry
//! whose range reaches the new data's date.

use crate::{GlucoseEffect, InsulinValue, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

pub type Fingerprint = u64;

/// Hash the JSON form of `value`
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<Fingerprint> {
    let bytes = serde_json::to_vec(value)?;
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    Ok(hasher.finish())
}

/// Which derived series an entry holds
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    InsulinOnBoard,
    GlucoseEffect,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub configuration: Fingerprint,
    pub input_range: Fingerprint,
}

impl CacheKey {
    /// Key for `kind` over `[start, end]` under `configuration`
    pub fn for_range(
        configuration: Fingerprint,
        kind: SeriesKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            configuration,
            input_range: fingerprint(&(kind, start, end))?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CachedSeries {
    InsulinOnBoard(Vec<InsulinValue>),
    GlucoseEffect(Vec<GlucoseEffect>),
}

#[derive(Clone, Debug)]
struct CacheEntry {
    range_end: DateTime<Utc>,
    series: CachedSeries,
}

/// In-memory cache of derived series
#[derive(Clone, Debug, Default)]
pub struct EffectCache {
    entries: HashMap<CacheKey, CacheEntry>,
}

impl EffectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<&CachedSeries> {
        self.entries.get(key).map(|entry| &entry.series)
    }

    /// Store `series`, computed from data up to `range_end`
    pub fn insert(&mut self, key: CacheKey, range_end: DateTime<Utc>, series: CachedSeries) {
        self.entries.insert(key, CacheEntry { range_end, series });
    }

    /// Drop every entry whose input range reaches `date`; returns how many
    /// were removed
    pub fn invalidate_from(&mut self, date: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.range_end < date);
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!("Invalidated {} cached series from {}", removed, date);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn series(value: f64) -> CachedSeries {
        CachedSeries::InsulinOnBoard(vec![InsulinValue {
            start_date: at(0),
            value,
        }])
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(fingerprint(&(1, "a")).unwrap(), fingerprint(&(1, "a")).unwrap());
        assert_ne!(fingerprint(&(1, "a")).unwrap(), fingerprint(&(2, "a")).unwrap());
    }

    #[test]
    fn test_keys_distinguish_kind_and_range() {
        let iob = CacheKey::for_range(7, SeriesKind::InsulinOnBoard, at(0), at(60)).unwrap();
        let effect = CacheKey::for_range(7, SeriesKind::GlucoseEffect, at(0), at(60)).unwrap();
        let later = CacheKey::for_range(7, SeriesKind::InsulinOnBoard, at(5), at(60)).unwrap();
        let other_config =
            CacheKey::for_range(8, SeriesKind::InsulinOnBoard, at(0), at(60)).unwrap();

        assert_ne!(iob, effect);
        assert_ne!(iob, later);
        assert_ne!(iob, other_config);
    }

    #[test]
    fn test_insert_and_get() {
        let mut cache = EffectCache::new();
        let key = CacheKey::for_range(1, SeriesKind::InsulinOnBoard, at(0), at(60)).unwrap();

        assert!(cache.get(&key).is_none());
        cache.insert(key, at(60), series(1.5));
        assert_eq!(cache.get(&key), Some(&series(1.5)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_from() {
        let mut cache = EffectCache::new();
        let early = CacheKey::for_range(1, SeriesKind::InsulinOnBoard, at(0), at(60)).unwrap();
        let late = CacheKey::for_range(1, SeriesKind::InsulinOnBoard, at(60), at(120)).unwrap();
        cache.insert(early, at(60), series(1.0));
        cache.insert(late, at(120), series(2.0));

        assert_eq!(cache.invalidate_from(at(90)), 1);
        assert!(cache.get(&early).is_some());
        assert!(cache.get(&late).is_none());

        // Data at the very end of a range still invalidates it
        assert_eq!(cache.invalidate_from(at(60)), 1);
        assert!(cache.is_empty());
    }
}
