//! Dose derivation from pump reservoir volume readings.
//!
//! Pumps that only report remaining reservoir volume give us delivery as the
//! drop between consecutive readings. Each plausible drop becomes a
//! temp-basal-typed entry in units spanning the two readings.

use crate::time::minutes;
use crate::{DoseEntry, DoseType, DoseUnit, ReservoirValue};
use chrono::{DateTime, Duration, Utc};

/// Fastest believable delivery rate, in U per minute
pub const MAXIMUM_RESERVOIR_DROP_PER_MINUTE: f64 = 6.5;

/// Default tolerated gap between readings for continuity
pub fn default_maximum_gap() -> Duration {
    Duration::minutes(30)
}

/// Volume rises smaller than this are treated as reading noise
const REWIND_TOLERANCE_UNITS: f64 = 1.0;

/// Convert chronological reservoir readings into dose entries.
///
/// Pairs with no elapsed time, a volume rise (rewind/prime) or an
/// impossibly fast drop are skipped; the skipped reading still serves as
/// the reference for the next pair.
pub fn derive_doses(values: &[ReservoirValue]) -> Vec<DoseEntry> {
    let mut doses = Vec::with_capacity(values.len().saturating_sub(1));

    for pair in values.windows(2) {
        let (previous, value) = (&pair[0], &pair[1]);
        let volume_drop = previous.unit_volume - value.unit_volume;
        let duration = value.start_date - previous.start_date;
        let duration_minutes = minutes(duration);

        if duration_minutes > 0.0
            && (0.0..=MAXIMUM_RESERVOIR_DROP_PER_MINUTE * duration_minutes).contains(&volume_drop)
        {
            doses.push(DoseEntry {
                dose_type: DoseType::TempBasal,
                start_date: previous.start_date,
                end_date: value.start_date,
                value: volume_drop,
                unit: DoseUnit::Units,
                delivered_units: None,
                scheduled_basal_rate: None,
                description: None,
            });
        } else {
            tracing::trace!(
                "Skipping reservoir pair {} -> {}: drop {:.3}U over {:.1} min",
                previous.start_date,
                value.start_date,
                volume_drop,
                duration_minutes
            );
        }
    }

    tracing::debug!(
        "Derived {} doses from {} reservoir readings",
        doses.len(),
        values.len()
    );
    doses
}

/// Whether the readings can be trusted as a complete record of delivery
/// between `start` and `end`.
///
/// `start` defaults to the first reading. The series is discontinuous when
/// the first reading is newer than `start`, when any reading in range is
/// exactly zero, when the volume rises by more than 1 U (rewind and prime),
/// or when consecutive readings in range are more than `maximum_duration`
/// apart.
pub fn is_continuous(
    values: &[ReservoirValue],
    start: Option<DateTime<Utc>>,
    end: DateTime<Utc>,
    maximum_duration: Duration,
) -> bool {
    let Some(first) = values.first() else {
        return false;
    };

    let start = start.unwrap_or(first.start_date);
    if first.start_date > start {
        tracing::debug!(
            "Reservoir history starts at {}, after requested {}",
            first.start_date,
            start
        );
        return false;
    }

    // The first reading is checked against itself so its volume counts too
    let mut last = first;
    for value in values {
        // Only readings inside the window are held to account
        if value.start_date < start || value.start_date > end {
            continue;
        }

        // Zero means the pump lost track of what it delivered
        if value.unit_volume <= 0.0 {
            tracing::debug!("Reservoir read empty at {}", value.start_date);
            return false;
        }

        if value.unit_volume > last.unit_volume + REWIND_TOLERANCE_UNITS {
            tracing::debug!(
                "Reservoir rose from {:.2}U to {:.2}U at {}",
                last.unit_volume,
                value.unit_volume,
                value.start_date
            );
            return false;
        }

        if value.start_date - last.start_date > maximum_duration {
            tracing::debug!(
                "Reservoir gap of {} min before {}",
                (value.start_date - last.start_date).num_minutes(),
                value.start_date
            );
            return false;
        }

        last = value;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn readings(points: &[(i64, f64)]) -> Vec<ReservoirValue> {
        points
            .iter()
            .map(|&(minute, volume)| ReservoirValue::new(at(minute), volume))
            .collect()
    }

    #[test]
    fn test_derive_doses_from_steady_drop() {
        let values = readings(&[(0, 100.0), (5, 99.9), (10, 99.75)]);
        let doses = derive_doses(&values);

        assert_eq!(doses.len(), 2);
        assert_eq!(doses[0].dose_type, DoseType::TempBasal);
        assert_eq!(doses[0].unit, DoseUnit::Units);
        assert_eq!(doses[0].start_date, at(0));
        assert_eq!(doses[0].end_date, at(5));
        assert!((doses[0].value - 0.1).abs() < 1e-9);
        assert!((doses[1].value - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_volume_increase_never_produces_dose() {
        let values = readings(&[(0, 10.0), (5, 15.0), (10, 14.5)]);
        let doses = derive_doses(&values);

        // The rewind pair is skipped but the 15U reading anchors the next pair
        assert_eq!(doses.len(), 1);
        assert_eq!(doses[0].start_date, at(5));
        assert!((doses[0].value - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_implausible_drop_rejected() {
        // 40U in 5 minutes exceeds 6.5U/min
        let values = readings(&[(0, 100.0), (5, 60.0), (10, 59.0)]);
        let doses = derive_doses(&values);

        assert_eq!(doses.len(), 1);
        assert_eq!(doses[0].start_date, at(5));
    }

    #[test]
    fn test_zero_duration_pair_rejected() {
        let values = readings(&[(0, 100.0), (0, 99.0)]);
        assert!(derive_doses(&values).is_empty());
    }

    #[test]
    fn test_no_change_is_zero_dose() {
        let values = readings(&[(0, 50.0), (5, 50.0)]);
        let doses = derive_doses(&values);
        assert_eq!(doses.len(), 1);
        assert_eq!(doses[0].value, 0.0);
    }

    #[test]
    fn test_continuous_series() {
        let values = readings(&[(0, 100.0), (5, 99.0), (10, 98.0), (15, 97.0)]);
        assert!(is_continuous(&values, Some(at(0)), at(15), default_maximum_gap()));
        assert!(is_continuous(&values, None, at(15), default_maximum_gap()));
    }

    #[test]
    fn test_empty_series_not_continuous() {
        assert!(!is_continuous(&[], None, at(0), default_maximum_gap()));
    }

    #[test]
    fn test_first_value_newer_than_start() {
        let values = readings(&[(10, 100.0), (15, 99.0)]);
        assert!(!is_continuous(&values, Some(at(0)), at(15), default_maximum_gap()));
    }

    #[test]
    fn test_zero_volume_breaks_continuity() {
        let values = readings(&[(0, 2.0), (5, 1.0), (10, 0.0)]);
        assert!(!is_continuous(&values, None, at(10), default_maximum_gap()));
    }

    #[test]
    fn test_rewind_breaks_continuity() {
        let values = readings(&[(0, 10.0), (5, 9.0), (10, 150.0)]);
        assert!(!is_continuous(&values, None, at(10), default_maximum_gap()));
    }

    #[test]
    fn test_small_rise_tolerated() {
        let values = readings(&[(0, 10.0), (5, 9.0), (10, 9.8)]);
        assert!(is_continuous(&values, None, at(10), default_maximum_gap()));
    }

    #[test]
    fn test_gap_breaks_continuity() {
        let values = readings(&[(0, 10.0), (5, 9.0), (45, 8.0)]);
        assert!(!is_continuous(&values, None, at(45), default_maximum_gap()));
        assert!(is_continuous(&values, None, at(45), Duration::minutes(45)));
    }

    #[test]
    fn test_problems_outside_window_ignored() {
        let values = readings(&[(0, 10.0), (5, 9.0), (60, 0.0)]);
        assert!(is_continuous(&values, Some(at(0)), at(30), default_maximum_gap()));
    }

    #[test]
    fn test_empty_first_reading_breaks_continuity() {
        let values = readings(&[(0, 0.0), (5, 0.5)]);
        assert!(!is_continuous(&values, Some(at(0)), at(5), default_maximum_gap()));
    }
}
