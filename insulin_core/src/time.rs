//! Time interval helpers and date-range filtering for timeline values.

use chrono::{DateTime, Duration, Utc};

/// Anything positioned on the timeline by a start (and optional end) date
pub trait TimelineValue {
    fn start_date(&self) -> DateTime<Utc>;

    /// Point-like values end where they start
    fn end_date(&self) -> DateTime<Utc> {
        self.start_date()
    }
}

/// Duration in fractional seconds (millisecond precision)
pub fn seconds(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

pub fn minutes(duration: Duration) -> f64 {
    seconds(duration) / 60.0
}

pub fn hours(duration: Duration) -> f64 {
    seconds(duration) / 3600.0
}

/// Round `date` down to a whole multiple of `interval` since the Unix epoch.
///
/// Sub-millisecond precision is discarded. A non-positive interval returns
/// the date unchanged.
pub fn floor_date(date: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.num_milliseconds();
    let date = truncate_to_millis(date);
    if step <= 0 {
        return date;
    }
    let remainder = date.timestamp_millis().rem_euclid(step);
    date - Duration::milliseconds(remainder)
}

/// Round `date` up to a whole multiple of `interval` since the Unix epoch.
pub fn ceil_date(date: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.num_milliseconds();
    let floored = floor_date(date, interval);
    if step <= 0 || floored == date {
        floored
    } else {
        floored + Duration::milliseconds(step)
    }
}

fn truncate_to_millis(date: DateTime<Utc>) -> DateTime<Utc> {
    let sub_millis = date.timestamp_subsec_nanos() % 1_000_000;
    date - Duration::nanoseconds(i64::from(sub_millis))
}

/// Keep values overlapping `[start, end]`; either bound may be open.
pub fn filter_date_range<T: TimelineValue + Clone>(
    values: &[T],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Vec<T> {
    values
        .iter()
        .filter(|value| {
            start.map_or(true, |start| value.end_date() >= start)
                && end.map_or(true, |end| value.start_date() <= end)
        })
        .cloned()
        .collect()
}
