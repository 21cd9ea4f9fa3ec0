//! Data source interfaces for dose history and glucose samples.
//!
//! The pipeline pulls raw records through these traits; the JSONL store is
//! one implementation, and the in-memory impls here back tests and callers
//! that already hold their data.

use crate::time::filter_date_range;
use crate::{DoseEntry, GlucoseSample, ReservoirValue, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw dose records for a time range
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DoseHistory {
    /// Pump events in chronological order
    pub events: Vec<DoseEntry>,
    /// Reservoir readings in chronological order
    pub reservoir: Vec<ReservoirValue>,
}

impl DoseHistory {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.reservoir.is_empty()
    }
}

/// Yields raw pump events and reservoir readings
pub trait DoseSource {
    fn fetch_dose_history(&self, start: DateTime<Utc>, end: DateTime<Utc>)
        -> Result<DoseHistory>;
}

/// Yields glucose samples
pub trait GlucoseSource {
    fn fetch_glucose(&self, start: DateTime<Utc>, end: DateTime<Utc>)
        -> Result<Vec<GlucoseSample>>;
}

impl DoseSource for DoseHistory {
    fn fetch_dose_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<DoseHistory> {
        Ok(DoseHistory {
            events: filter_date_range(&self.events, Some(start), Some(end)),
            reservoir: reservoir_covering(&self.reservoir, start, end),
        })
    }
}

/// Readings inside `[start, end]` plus the last reading before `start`, so
/// continuity can be judged from the beginning of the range
pub fn reservoir_covering(
    values: &[ReservoirValue],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<ReservoirValue> {
    let first_inside = values.partition_point(|value| value.start_date < start);
    let from = first_inside.saturating_sub(1);
    values[from..]
        .iter()
        .take_while(|value| value.start_date <= end)
        .cloned()
        .collect()
}

impl GlucoseSource for Vec<GlucoseSample> {
    fn fetch_glucose(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GlucoseSample>> {
        Ok(filter_date_range(self, Some(start), Some(end)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GlucoseUnit;
    use chrono::{Duration, TimeZone};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn test_history_fetch_filters_by_overlap() {
        let history = DoseHistory {
            events: vec![
                DoseEntry::bolus(at(0), 1.0),
                DoseEntry::temp_basal(at(20), at(50), 2.0).unwrap(),
                DoseEntry::bolus(at(90), 1.0),
            ],
            reservoir: vec![
                ReservoirValue::new(at(0), 100.0),
                ReservoirValue::new(at(30), 99.0),
            ],
        };

        let fetched = history.fetch_dose_history(at(40), at(60)).unwrap();
        assert_eq!(fetched.events.len(), 1);
        assert_eq!(fetched.events[0].start_date, at(20));
        // The reading before the range is kept as the continuity anchor
        assert_eq!(fetched.reservoir, vec![ReservoirValue::new(at(30), 99.0)]);
    }

    #[test]
    fn test_reservoir_covering() {
        let readings: Vec<ReservoirValue> = (0..5)
            .map(|i| ReservoirValue::new(at(i * 10), 100.0 - i as f64))
            .collect();

        let covered = reservoir_covering(&readings, at(15), at(30));
        let dates: Vec<_> = covered.iter().map(|r| r.start_date).collect();
        assert_eq!(dates, vec![at(10), at(20), at(30)]);

        assert_eq!(reservoir_covering(&readings, at(0), at(5)).len(), 1);
        assert!(reservoir_covering(&readings, at(50), at(10)).len() <= 1);
    }

    #[test]
    fn test_glucose_fetch() {
        let samples: Vec<GlucoseSample> = (0..6)
            .map(|i| GlucoseSample::new(at(i * 5), 100.0, GlucoseUnit::MgDl, "cgm"))
            .collect();

        let fetched = samples.fetch_glucose(at(10), at(20)).unwrap();
        assert_eq!(fetched.len(), 3);
    }
}
