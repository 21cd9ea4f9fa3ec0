//! Daily repeating value schedules (basal rates, insulin sensitivity).
//!
//! A schedule is a list of `(start minute, value)` items covering one day in
//! a fixed UTC offset. The same item list repeats every day.

use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// One schedule item, active from `start_minute` past local midnight until
/// the next item starts
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct RepeatingScheduleValue {
    pub start_minute: u32,
    pub value: f64,
}

/// A schedule value pinned to absolute dates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AbsoluteScheduleValue {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub value: f64,
}

/// Supplies scheduled basal rates (U/hr) for a window
pub trait BasalScheduleProvider {
    /// Ordered, contiguous segments covering `[start, end]`, beginning with
    /// the segment active at `start`. Empty when `start > end`.
    fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<AbsoluteScheduleValue>;
}

/// Supplies insulin sensitivity (mg/dL per U) at an instant
pub trait SensitivityProvider {
    fn sensitivity_at(&self, date: DateTime<Utc>) -> f64;
}

/// A validated daily schedule
#[derive(Clone, Debug, PartialEq)]
pub struct DailySchedule {
    items: Vec<RepeatingScheduleValue>,
    utc_offset: Duration,
}

impl DailySchedule {
    /// Build a schedule. Items must be non-empty, start at minute 0, be
    /// strictly increasing, fall within one day and carry finite values.
    pub fn new(items: Vec<RepeatingScheduleValue>, utc_offset_minutes: i32) -> Result<Self> {
        let Some(first) = items.first() else {
            return Err(Error::InvalidSchedule("schedule has no items".into()));
        };
        if first.start_minute != 0 {
            return Err(Error::InvalidSchedule(format!(
                "first item must start at minute 0, got {}",
                first.start_minute
            )));
        }
        for pair in items.windows(2) {
            if pair[1].start_minute <= pair[0].start_minute {
                return Err(Error::InvalidSchedule(format!(
                    "item at minute {} does not follow minute {}",
                    pair[1].start_minute, pair[0].start_minute
                )));
            }
        }
        if let Some(last) = items.last() {
            if last.start_minute >= MINUTES_PER_DAY {
                return Err(Error::InvalidSchedule(format!(
                    "item at minute {} is past the end of the day",
                    last.start_minute
                )));
            }
        }
        if let Some(bad) = items.iter().find(|item| !item.value.is_finite()) {
            return Err(Error::InvalidSchedule(format!(
                "item at minute {} has non-finite value",
                bad.start_minute
            )));
        }
        if utc_offset_minutes.unsigned_abs() >= MINUTES_PER_DAY {
            return Err(Error::InvalidSchedule(format!(
                "UTC offset of {} minutes is out of range",
                utc_offset_minutes
            )));
        }

        Ok(Self {
            items,
            utc_offset: Duration::minutes(i64::from(utc_offset_minutes)),
        })
    }

    /// A schedule with one value all day
    pub fn constant(value: f64) -> Result<Self> {
        Self::new(
            vec![RepeatingScheduleValue {
                start_minute: 0,
                value,
            }],
            0,
        )
    }

    pub fn items(&self) -> &[RepeatingScheduleValue] {
        &self.items
    }

    pub fn utc_offset_minutes(&self) -> i32 {
        // Bounded to less than a day by `new`
        self.utc_offset.num_minutes() as i32
    }

    fn day() -> Duration {
        Duration::minutes(i64::from(MINUTES_PER_DAY))
    }

    fn item_start(&self, index: usize) -> Duration {
        Duration::minutes(i64::from(self.items[index].start_minute))
    }

    fn item_end(&self, index: usize) -> Duration {
        if index + 1 < self.items.len() {
            self.item_start(index + 1)
        } else {
            Self::day()
        }
    }

    /// Offset of `date` past local midnight
    fn schedule_offset(&self, date: DateTime<Utc>) -> Duration {
        let local_millis = date.timestamp_millis() + self.utc_offset.num_milliseconds();
        Duration::milliseconds(local_millis.rem_euclid(Self::day().num_milliseconds()))
    }

    /// The value active at `date`
    pub fn value_at(&self, date: DateTime<Utc>) -> f64 {
        let offset = self.schedule_offset(date);
        self.items
            .iter()
            .rev()
            .find(|item| Duration::minutes(i64::from(item.start_minute)) <= offset)
            .map_or(self.items[0].value, |item| item.value)
    }

    /// Absolute segments covering `[start, end]`
    pub fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<AbsoluteScheduleValue> {
        if start > end {
            return Vec::new();
        }

        let mut segments = Vec::new();
        let mut day_start = start;

        // Walk one local day at a time
        loop {
            let start_offset = self.schedule_offset(day_start);
            let midnight = day_start - start_offset;
            let next_midnight = midnight + Self::day();
            let end_offset = end.min(next_midnight) - midnight;

            for index in 0..self.items.len() {
                let item_start = self.item_start(index);
                let item_end = self.item_end(index);

                // Keep the item active at the window start and any that
                // begin strictly inside the window
                let overlaps = item_end > start_offset
                    && (item_start < end_offset || item_start <= start_offset);
                if !overlaps {
                    continue;
                }

                segments.push(AbsoluteScheduleValue {
                    start_date: midnight + item_start,
                    end_date: midnight + item_end,
                    value: self.items[index].value,
                });
            }

            if end <= next_midnight {
                break;
            }
            day_start = next_midnight;
        }

        segments
    }
}

impl BasalScheduleProvider for DailySchedule {
    fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<AbsoluteScheduleValue> {
        DailySchedule::between(self, start, end)
    }
}

impl SensitivityProvider for DailySchedule {
    fn sensitivity_at(&self, date: DateTime<Utc>) -> f64 {
        self.value_at(date)
    }
}
