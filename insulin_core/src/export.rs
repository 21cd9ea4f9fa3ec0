//! CSV export of computed time series.
//!
//! Every series is written as `start_date,end_date,value` rows with RFC 3339
//! timestamps. Point-in-time series repeat the start date as the end date.

use crate::time::TimelineValue;
use crate::{GlucoseEffect, GlucoseEffectVelocity, InsulinValue, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// A time-series value that can be exported
pub trait SeriesPoint: TimelineValue {
    fn value(&self) -> f64;
}

impl SeriesPoint for InsulinValue {
    fn value(&self) -> f64 {
        self.value
    }
}

impl SeriesPoint for GlucoseEffect {
    fn value(&self) -> f64 {
        self.value
    }
}

impl SeriesPoint for GlucoseEffectVelocity {
    fn value(&self) -> f64 {
        self.value
    }
}

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    start_date: String,
    end_date: String,
    value: f64,
}

impl CsvRow {
    fn from_point<T: SeriesPoint>(point: &T) -> Self {
        CsvRow {
            start_date: point.start_date().to_rfc3339(),
            end_date: point.end_date().to_rfc3339(),
            value: point.value(),
        }
    }
}

/// Write `series` with a header row; returns the number of data rows
pub fn write_series_csv<W: Write, T: SeriesPoint>(writer: W, series: &[T]) -> Result<usize> {
    let mut writer = csv::Writer::from_writer(writer);

    // Header is written with the first row, so an empty series needs it
    // spelled out
    if series.is_empty() {
        writer.write_record(["start_date", "end_date", "value"])?;
    }
    for point in series {
        writer.serialize(CsvRow::from_point(point))?;
    }

    writer.flush()?;
    Ok(series.len())
}

/// Write `series` to a new file at `path`, replacing any existing one
pub fn export_series_csv<T: SeriesPoint>(path: &Path, series: &[T]) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = File::create(path)?;
    let count = write_series_csv(&mut file, series)?;
    file.sync_all()?;

    tracing::info!("Exported {} rows to {:?}", count, path);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn test_point_series_repeats_start_date() {
        let series = vec![
            InsulinValue {
                start_date: at(0),
                value: 1.5,
            },
            InsulinValue {
                start_date: at(5),
                value: 1.25,
            },
        ];

        let mut buffer = Vec::new();
        let count = write_series_csv(&mut buffer, &series).unwrap();
        assert_eq!(count, 2);

        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "start_date,end_date,value");
        assert_eq!(
            lines[1],
            "2024-03-01T12:00:00+00:00,2024-03-01T12:00:00+00:00,1.5"
        );
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_velocity_series_carries_interval() {
        let series = vec![GlucoseEffectVelocity {
            start_date: at(0),
            end_date: at(5),
            value: 0.05,
        }];

        let mut buffer = Vec::new();
        write_series_csv(&mut buffer, &series).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("2024-03-01T12:00:00+00:00,2024-03-01T12:05:00+00:00,0.05"));
    }

    #[test]
    fn test_empty_series_still_has_header() {
        let mut buffer = Vec::new();
        let count = write_series_csv::<_, GlucoseEffect>(&mut buffer, &[]).unwrap();
        assert_eq!(count, 0);
        assert_eq!(String::from_utf8(buffer).unwrap(), "start_date,end_date,value\n");
    }

    #[test]
    fn test_export_to_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let csv_path = temp_dir.path().join("out").join("iob.csv");

        let series = vec![GlucoseEffect {
            start_date: at(0),
            value: -3.0,
        }];
        assert_eq!(export_series_csv(&csv_path, &series).unwrap(), 1);

        let reader = csv::Reader::from_path(&csv_path).unwrap();
        assert_eq!(reader.into_records().count(), 1);
    }
}
