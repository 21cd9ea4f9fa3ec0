//! Glucose series analytics.
//!
//! This module provides:
//! - Reliability checks over sample series (density, calibration, provenance)
//! - Linear-regression momentum effect
//! - Counteraction effects (observed change minus modeled change)

use crate::time::seconds;
use crate::{Error, GlucoseEffect, GlucoseEffectVelocity, GlucoseSample, Result};
use chrono::Duration;

/// Minimum spacing between samples used for a counteraction velocity
const MINIMUM_COUNTERACTION_INTERVAL_MINUTES: i64 = 4;

pub fn default_continuity_interval() -> Duration {
    Duration::minutes(5)
}

/// Weak density check: the series spans less than `count × interval`
pub fn is_continuous(samples: &[GlucoseSample], interval: Duration) -> bool {
    match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => {
            let span = seconds(last.start_date - first.start_date).abs();
            span < seconds(interval) * samples.len() as f64
        }
        _ => false,
    }
}

/// No sample is a calibration or display-only record
pub fn is_calibrated(samples: &[GlucoseSample]) -> bool {
    samples.iter().all(|sample| !sample.is_display_only)
}

/// Every sample shares the first sample's provenance
pub fn has_single_provenance(samples: &[GlucoseSample]) -> bool {
    match samples.first() {
        Some(first) => samples
            .iter()
            .all(|sample| sample.provenance_identifier == first.provenance_identifier),
        None => true,
    }
}

/// Samples strictly after the most recent calibration/display-only sample
pub fn filter_after_calibration(samples: &[GlucoseSample]) -> Vec<GlucoseSample> {
    match samples.iter().rposition(|sample| sample.is_display_only) {
        Some(index) => samples[index + 1..].to_vec(),
        None => samples.to_vec(),
    }
}

/// Ordinary least squares fit of `(x, y)` points, returning
/// `(slope, intercept)`. Degenerate inputs yield non-finite values.
pub fn linear_regression(points: &[(f64, f64)]) -> (f64, f64) {
    let count = points.len() as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_x2) = (0.0, 0.0, 0.0, 0.0);

    for &(x, y) in points {
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }

    let denominator = count * sum_x2 - sum_x * sum_x;
    let slope = (count * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y * sum_x2 - sum_x * sum_xy) / denominator;
    (slope, intercept)
}

/// Why a series cannot produce a momentum effect
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MomentumRejection {
    #[error("momentum needs more than two samples")]
    TooFewSamples,
    #[error("samples are too sparse to be continuous")]
    Discontinuous,
    #[error("series contains calibration or display-only samples")]
    Uncalibrated,
    #[error("samples come from more than one source")]
    MixedProvenance,
}

/// Check whether `samples` can feed a momentum regression
pub fn momentum_preconditions(
    samples: &[GlucoseSample],
) -> std::result::Result<(), MomentumRejection> {
    if samples.len() <= 2 {
        return Err(MomentumRejection::TooFewSamples);
    }
    if !is_continuous(samples, default_continuity_interval()) {
        return Err(MomentumRejection::Discontinuous);
    }
    if !is_calibrated(samples) {
        return Err(MomentumRejection::Uncalibrated);
    }
    if !has_single_provenance(samples) {
        return Err(MomentumRejection::MixedProvenance);
    }
    Ok(())
}

/// Momentum projection parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MomentumSettings {
    duration: Duration,
    delta: Duration,
    velocity_maximum: f64,
}

impl MomentumSettings {
    /// `velocity_maximum` is in mg/dL per minute and caps rising trends only
    pub fn new(duration: Duration, delta: Duration, velocity_maximum: f64) -> Result<Self> {
        if delta.num_milliseconds() < 1 {
            return Err(Error::InvalidTiming(format!(
                "momentum step must be at least 1ms, got {}s",
                seconds(delta)
            )));
        }
        if duration < Duration::zero() {
            return Err(Error::InvalidTiming(format!(
                "momentum duration must not be negative, got {}s",
                seconds(duration)
            )));
        }
        if !(velocity_maximum.is_finite() && velocity_maximum > 0.0) {
            return Err(Error::Config(format!(
                "momentum velocity maximum must be positive, got {}",
                velocity_maximum
            )));
        }
        Ok(Self {
            duration,
            delta,
            velocity_maximum,
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn velocity_maximum(&self) -> f64 {
        self.velocity_maximum
    }
}

impl Default for MomentumSettings {
    fn default() -> Self {
        Self {
            duration: Duration::minutes(30),
            delta: Duration::minutes(5),
            velocity_maximum: 4.0,
        }
    }
}

/// Project the recent glucose trend forward from the last sample.
///
/// The slope of a least squares fit over the samples (mg/dL per second) is
/// capped at the configured maximum rise; falls are not capped. Each point
/// is `elapsed since last sample × slope`. Returns an empty series when the
/// preconditions fail or the fit is degenerate.
pub fn linear_momentum_effect(
    samples: &[GlucoseSample],
    settings: &MomentumSettings,
) -> Vec<GlucoseEffect> {
    if let Err(reason) = momentum_preconditions(samples) {
        tracing::debug!("Skipping momentum effect: {}", reason);
        return Vec::new();
    }
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return Vec::new();
    };

    let points: Vec<(f64, f64)> = samples
        .iter()
        .map(|sample| {
            (
                seconds(sample.start_date - first.start_date),
                sample.quantity_mg_dl(),
            )
        })
        .collect();

    let (slope, _) = linear_regression(&points);
    if !slope.is_finite() {
        tracing::debug!("Skipping momentum effect: degenerate regression");
        return Vec::new();
    }
    let limited_slope = slope.min(settings.velocity_maximum / 60.0);

    let start_date = last.start_date;
    let end_date = start_date + settings.duration;
    let steps = settings.duration.num_milliseconds() / settings.delta.num_milliseconds();
    let mut effects = Vec::with_capacity(usize::try_from(steps).unwrap_or(0) + 1);

    let mut date = start_date;
    while date <= end_date {
        effects.push(GlucoseEffect {
            start_date: date,
            value: seconds(date - start_date).max(0.0) * limited_slope,
        });
        date = date + settings.delta;
    }
    effects
}

/// Velocity of glucose change not explained by `effects`.
///
/// For each consecutive pair of samples more than four minutes apart, from
/// the same source and neither display-only, the observed change minus the
/// change in `effects` over the same interval is divided by the elapsed
/// seconds. `effects` is scanned forward once; when it runs out no further
/// velocities are produced.
pub fn counteraction_effects(
    samples: &[GlucoseSample],
    effects: &[GlucoseEffect],
) -> Vec<GlucoseEffectVelocity> {
    let mut velocities = Vec::new();
    let Some(mut start_glucose) = samples.first() else {
        return velocities;
    };
    let mut effect_index = 0;

    for end_glucose in &samples[1..] {
        let time_interval = end_glucose.start_date - start_glucose.start_date;
        if time_interval <= Duration::minutes(MINIMUM_COUNTERACTION_INTERVAL_MINUTES) {
            continue;
        }
        let start = std::mem::replace(&mut start_glucose, end_glucose);

        if start.provenance_identifier != end_glucose.provenance_identifier
            || start.is_display_only
            || end_glucose.is_display_only
        {
            continue;
        }

        if effect_index >= effects.len() {
            break;
        }

        let mut start_effect = None;
        let mut end_effect = None;
        for effect in &effects[effect_index..] {
            if start_effect.is_none() && effect.start_date >= start.start_date {
                start_effect = Some(effect);
            } else if end_effect.is_none() && effect.start_date >= end_glucose.start_date {
                end_effect = Some(effect);
                break;
            }
            effect_index += 1;
        }

        let (Some(start_effect), Some(end_effect)) = (start_effect, end_effect) else {
            break;
        };

        let glucose_change = end_glucose.quantity_mg_dl() - start.quantity_mg_dl();
        let effect_change = end_effect.value - start_effect.value;
        let discrepancy = glucose_change - effect_change;

        velocities.push(GlucoseEffectVelocity {
            start_date: start.start_date,
            end_date: end_glucose.start_date,
            value: discrepancy / seconds(time_interval),
        });
    }

    tracing::debug!(
        "Computed {} counteraction velocities from {} samples",
        velocities.len(),
        samples.len()
    );
    velocities
}
