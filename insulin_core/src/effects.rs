//! Insulin-on-board and glucose-effect calculators.
//!
//! Both calculators integrate a set of (normalized) dose entries against an
//! [`InsulinModel`] on an evenly spaced grid of `delta` steps, shifted by an
//! absorption `delay`.

use crate::insulin_model::InsulinModel;
use crate::schedule::SensitivityProvider;
use crate::time::{ceil_date, floor_date, seconds, TimelineValue};
use crate::{DoseEntry, Error, GlucoseEffect, InsulinValue, Result};
use chrono::{DateTime, Duration, Utc};

/// Doses no longer than this multiple of `delta` are treated as instantaneous
const MOMENTARY_DOSE_FACTOR: f64 = 1.05;

/// Absorption delay and simulation step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EffectTiming {
    delay: Duration,
    delta: Duration,
}

impl EffectTiming {
    /// `delta` must be at least one millisecond and `delay` non-negative
    pub fn new(delay: Duration, delta: Duration) -> Result<Self> {
        if delta.num_milliseconds() < 1 {
            return Err(Error::InvalidTiming(format!(
                "simulation step must be at least 1ms, got {}s",
                seconds(delta)
            )));
        }
        if delay < Duration::zero() {
            return Err(Error::InvalidTiming(format!(
                "absorption delay must not be negative, got {}s",
                seconds(delay)
            )));
        }
        Ok(Self { delay, delta })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn delta(&self) -> Duration {
        self.delta
    }
}

impl Default for EffectTiming {
    fn default() -> Self {
        Self {
            delay: Duration::minutes(10),
            delta: Duration::minutes(5),
        }
    }
}

/// Optional explicit bounds for a simulated series
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DateWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateWindow {
    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self::new(Some(from), Some(to))
    }
}

/// Derive the `[start, end]` grid for simulating `samples`.
///
/// Explicit window bounds win. Otherwise the series starts at the earliest
/// sample start and ends `effect_duration + delay` after the latest sample
/// end. The start is floored and the end ceiled to `delta`. Returns `None`
/// when no bound can be derived or the bounds are reversed.
pub fn simulation_date_range<T: TimelineValue>(
    samples: &[T],
    window: &DateWindow,
    effect_duration: Duration,
    timing: &EffectTiming,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let (start, end) = match (window.from, window.to) {
        (Some(from), Some(to)) => (from, to),
        _ => {
            let earliest = samples.iter().map(|s| s.start_date()).min()?;
            let latest = samples.iter().map(|s| s.end_date()).max()?;
            (
                window.from.unwrap_or(earliest),
                window
                    .to
                    .unwrap_or(latest + effect_duration + timing.delay),
            )
        }
    };

    let start = floor_date(start, timing.delta);
    let end = ceil_date(end, timing.delta);
    (start <= end).then_some((start, end))
}

fn is_momentary(dose: &DoseEntry, timing: &EffectTiming) -> bool {
    seconds(dose.duration()) <= MOMENTARY_DOSE_FACTOR * seconds(timing.delta)
}

/// Sum `effect` over `delta`-wide slices of a continuous dose, each slice
/// weighted by its share of the dose and evaluated at its own elapsed time.
/// Slices not yet delivered (beyond `time + delay`) are left out.
fn continuous_delivery<F>(dose_duration: Duration, time: Duration, timing: &EffectTiming, effect: F) -> f64
where
    F: Fn(Duration) -> f64,
{
    let step = timing.delta.num_milliseconds();
    let delivered = (time + timing.delay).num_milliseconds().div_euclid(step) * step;
    let last_offset = Duration::milliseconds(delivered).min(dose_duration);
    let dose_seconds = seconds(dose_duration);

    let mut total = 0.0;
    let mut offset = Duration::zero();
    loop {
        let segment = if dose_seconds > 0.0 {
            (seconds((offset + timing.delta).min(dose_duration) - offset)).max(0.0) / dose_seconds
        } else {
            1.0
        };
        total += segment * effect(time - timing.delay - offset);

        offset = offset + timing.delta;
        if offset > last_offset {
            break;
        }
    }
    total
}

/// Insulin from `dose` still on board at `date`, in U
pub fn dose_insulin_on_board(
    dose: &DoseEntry,
    date: DateTime<Utc>,
    model: &dyn InsulinModel,
    timing: &EffectTiming,
) -> f64 {
    let time = date - dose.start_date;
    if time < Duration::zero() {
        return 0.0;
    }

    if is_momentary(dose, timing) {
        dose.units() * model.percent_effect_remaining(time - timing.delay)
    } else {
        dose.units()
            * continuous_delivery(dose.duration(), time, timing, |t| {
                model.percent_effect_remaining(t)
            })
    }
}

/// Cumulative glucose change caused by `dose` by `date`, in mg/dL.
///
/// `insulin_sensitivity` is mg/dL per U at the dose start.
pub fn dose_glucose_effect(
    dose: &DoseEntry,
    date: DateTime<Utc>,
    model: &dyn InsulinModel,
    insulin_sensitivity: f64,
    timing: &EffectTiming,
) -> f64 {
    let time = date - dose.start_date;
    if time < Duration::zero() {
        return 0.0;
    }

    let absorbed = if is_momentary(dose, timing) {
        1.0 - model.percent_effect_remaining(time - timing.delay)
    } else {
        continuous_delivery(dose.duration(), time, timing, |t| {
            1.0 - model.percent_effect_remaining(t)
        })
    };

    dose.units() * -insulin_sensitivity * absorbed
}

fn grid_len(start: DateTime<Utc>, end: DateTime<Utc>, delta: Duration) -> usize {
    let steps = (end - start).num_milliseconds() / delta.num_milliseconds();
    usize::try_from(steps).map_or(0, |steps| steps + 1)
}

/// Total insulin on board across `doses` at every grid point
pub fn insulin_on_board(
    doses: &[DoseEntry],
    model: &dyn InsulinModel,
    window: &DateWindow,
    timing: &EffectTiming,
) -> Vec<InsulinValue> {
    let Some((start, end)) = simulation_date_range(doses, window, model.effect_duration(), timing)
    else {
        return Vec::new();
    };

    let mut values = Vec::with_capacity(grid_len(start, end, timing.delta));
    let mut date = start;
    while date <= end {
        values.push(InsulinValue {
            start_date: date,
            value: insulin_on_board_at(doses, date, model, timing),
        });
        date = date + timing.delta;
    }

    tracing::debug!(
        "Computed {} IOB points from {} doses ({} to {})",
        values.len(),
        doses.len(),
        start,
        end
    );
    values
}

/// Total insulin on board across `doses` at one instant
pub fn insulin_on_board_at(
    doses: &[DoseEntry],
    date: DateTime<Utc>,
    model: &dyn InsulinModel,
    timing: &EffectTiming,
) -> f64 {
    doses
        .iter()
        .map(|dose| dose_insulin_on_board(dose, date, model, timing))
        .sum()
}

/// Cumulative glucose effect of `doses` at every grid point
pub fn glucose_effects(
    doses: &[DoseEntry],
    model: &dyn InsulinModel,
    sensitivity: &dyn SensitivityProvider,
    window: &DateWindow,
    timing: &EffectTiming,
) -> Vec<GlucoseEffect> {
    let Some((start, end)) = simulation_date_range(doses, window, model.effect_duration(), timing)
    else {
        return Vec::new();
    };

    let sensitivities: Vec<f64> = doses
        .iter()
        .map(|dose| sensitivity.sensitivity_at(dose.start_date))
        .collect();

    let mut effects = Vec::with_capacity(grid_len(start, end, timing.delta));
    let mut date = start;
    while date <= end {
        let value: f64 = doses
            .iter()
            .zip(&sensitivities)
            .map(|(dose, &isf)| dose_glucose_effect(dose, date, model, isf, timing))
            .sum();
        effects.push(GlucoseEffect {
            start_date: date,
            value,
        });
        date = date + timing.delta;
    }

    tracing::debug!(
        "Computed {} glucose effect points from {} doses",
        effects.len(),
        doses.len()
    );
    effects
}

/// Insulin delivered across `doses`, preferring reported delivered amounts
pub fn total_delivery(doses: &[DoseEntry]) -> f64 {
    doses.iter().map(DoseEntry::delivered_or_programmed_units).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insulin_model::ExponentialInsulinModel;
    use crate::schedule::DailySchedule;
    use chrono::TimeZone;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn model() -> ExponentialInsulinModel {
        ExponentialInsulinModel::new(Duration::minutes(360), Duration::minutes(75)).unwrap()
    }

    fn no_delay() -> EffectTiming {
        EffectTiming::new(Duration::zero(), Duration::minutes(5)).unwrap()
    }

    #[test]
    fn test_timing_validation() {
        assert!(EffectTiming::new(Duration::minutes(10), Duration::zero()).is_err());
        assert!(EffectTiming::new(Duration::zero(), Duration::microseconds(500)).is_err());
        assert!(EffectTiming::new(Duration::zero(), Duration::milliseconds(1)).is_ok());
        assert!(EffectTiming::new(Duration::minutes(-1), Duration::minutes(5)).is_err());
        let timing = EffectTiming::default();
        assert_eq!(timing.delay(), Duration::minutes(10));
        assert_eq!(timing.delta(), Duration::minutes(5));
    }

    #[test]
    fn test_date_range_from_doses() {
        let doses = vec![
            DoseEntry::bolus(at(2), 1.0),
            DoseEntry::temp_basal(at(10), at(41), 1.0).unwrap(),
        ];
        let (start, end) = simulation_date_range(
            &doses,
            &DateWindow::default(),
            Duration::minutes(360),
            &EffectTiming::default(),
        )
        .unwrap();

        assert_eq!(start, at(0));
        // 41 + 360 + 10, ceiled to 5 minutes
        assert_eq!(end, at(415));
    }

    #[test]
    fn test_date_range_explicit_window() {
        let window = DateWindow::between(at(3), at(21));
        let (start, end) = simulation_date_range::<DoseEntry>(
            &[],
            &window,
            Duration::minutes(360),
            &EffectTiming::default(),
        )
        .unwrap();
        assert_eq!((start, end), (at(0), at(25)));
    }

    #[test]
    fn test_date_range_empty_input() {
        let range = simulation_date_range::<DoseEntry>(
            &[],
            &DateWindow::default(),
            Duration::minutes(360),
            &EffectTiming::default(),
        );
        assert!(range.is_none());
        assert!(insulin_on_board(&[], &model(), &DateWindow::default(), &no_delay()).is_empty());
    }

    #[test]
    fn test_single_bolus_iob_decays_to_zero() {
        let doses = vec![DoseEntry::bolus(at(0), 1.0)];
        let iob = insulin_on_board(&doses, &model(), &DateWindow::default(), &no_delay());

        assert_eq!(iob.len(), 73);
        assert_eq!(iob[0].start_date, at(0));
        assert_eq!(iob[0].value, 1.0);
        for pair in iob.windows(2) {
            assert!(
                pair[1].value < pair[0].value,
                "IOB did not decrease at {}",
                pair[1].start_date
            );
        }
        let last = iob.last().unwrap();
        assert_eq!(last.start_date, at(360));
        assert_eq!(last.value, 0.0);
    }

    #[test]
    fn test_delay_holds_iob_flat() {
        let doses = vec![DoseEntry::bolus(at(0), 2.0)];
        let iob = insulin_on_board(&doses, &model(), &DateWindow::default(), &EffectTiming::default());

        assert_eq!(iob[0].value, 2.0);
        assert_eq!(iob[1].value, 2.0);
        assert_eq!(iob[2].value, 2.0);
        assert!(iob[3].value < 2.0);
    }

    #[test]
    fn test_dose_before_start_contributes_nothing() {
        let dose = DoseEntry::bolus(at(30), 1.0);
        assert_eq!(dose_insulin_on_board(&dose, at(0), &model(), &no_delay()), 0.0);
        assert_eq!(dose_glucose_effect(&dose, at(0), &model(), 40.0, &no_delay()), 0.0);
    }

    #[test]
    fn test_bolus_glucose_effect_reaches_full_sensitivity() {
        let doses = vec![DoseEntry::bolus(at(0), 1.5)];
        let isf = DailySchedule::constant(40.0).unwrap();
        let effects = glucose_effects(
            &doses,
            &model(),
            &isf,
            &DateWindow::default(),
            &EffectTiming::default(),
        );

        assert_eq!(effects[0].value, 0.0);
        let last = effects.last().unwrap();
        assert_eq!(last.start_date, at(370));
        assert!((last.value + 60.0).abs() < 1e-9);
        for pair in effects.windows(2) {
            assert!(pair[1].value <= pair[0].value);
        }
    }

    #[test]
    fn test_continuous_dose_fully_absorbed() {
        let doses = vec![DoseEntry::temp_basal(at(0), at(60), 1.0).unwrap()];
        let isf = DailySchedule::constant(50.0).unwrap();
        let timing = EffectTiming::default();

        let iob = insulin_on_board(&doses, &model(), &DateWindow::default(), &timing);
        let effects = glucose_effects(&doses, &model(), &isf, &DateWindow::default(), &timing);

        assert_eq!(iob.last().unwrap().start_date, at(430));
        assert!(iob.last().unwrap().value.abs() < 1e-9);
        assert!((effects.last().unwrap().value + 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_continuous_dose_counts_only_delivered_portion() {
        let dose = DoseEntry::temp_basal(at(0), at(60), 1.0).unwrap();
        let early = dose_insulin_on_board(&dose, at(0), &model(), &no_delay());
        let mid = dose_insulin_on_board(&dose, at(30), &model(), &no_delay());

        // Only the first slice has started at t=0
        assert!((early - 5.0 / 60.0).abs() < 1e-9);
        assert!(mid > early);
        assert!(mid < 0.6);
    }

    #[test]
    fn test_negative_net_basal_reduces_iob() {
        let mut suspend = DoseEntry::suspend(at(0));
        suspend.end_date = at(60);
        suspend.value = -1.0;
        let bolus = DoseEntry::bolus(at(0), 1.0);

        let with_suspend = insulin_on_board_at(&[bolus.clone(), suspend], at(90), &model(), &no_delay());
        let bolus_only = insulin_on_board_at(&[bolus], at(90), &model(), &no_delay());
        assert!(with_suspend < bolus_only);
    }

    #[test]
    fn test_series_without_duplicates() {
        let doses = vec![
            DoseEntry::bolus(at(0), 1.0),
            DoseEntry::bolus(at(7), 1.0),
        ];
        let iob = insulin_on_board(&doses, &model(), &DateWindow::default(), &EffectTiming::default());
        for pair in iob.windows(2) {
            assert_eq!(pair[1].start_date - pair[0].start_date, Duration::minutes(5));
        }
    }

    #[test]
    fn test_total_delivery() {
        let doses = vec![
            DoseEntry::bolus(at(0), 2.0).with_delivered_units(1.5),
            DoseEntry::temp_basal(at(0), at(30), 1.0).unwrap(),
        ];
        assert!((total_delivery(&doses) - 2.0).abs() < 1e-12);
    }
}
