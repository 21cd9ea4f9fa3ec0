//! Insulin activity curves.
//!
//! An insulin model answers one question: what fraction of a dose is still
//! "on board" some time after it was delivered. The calculators in
//! [`crate::effects`] only depend on the [`InsulinModel`] trait.

use crate::time::seconds;
use crate::{Error, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Pharmacokinetic model of insulin absorption
pub trait InsulinModel {
    /// Fraction of a dose's effect remaining `time` after delivery.
    ///
    /// Returns 1 for `time <= 0` and 0 for `time >= effect_duration()`,
    /// non-increasing in between.
    fn percent_effect_remaining(&self, time: Duration) -> f64;

    /// Time after which a dose has no remaining effect
    fn effect_duration(&self) -> Duration;
}

/// Common rapid-acting insulin curves
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelPreset {
    RapidActingAdult,
    RapidActingChild,
    Fiasp,
}

impl ModelPreset {
    /// (action duration, peak activity time)
    pub fn parameters(self) -> (Duration, Duration) {
        match self {
            ModelPreset::RapidActingAdult => (Duration::minutes(360), Duration::minutes(75)),
            ModelPreset::RapidActingChild => (Duration::minutes(360), Duration::minutes(65)),
            ModelPreset::Fiasp => (Duration::minutes(360), Duration::minutes(55)),
        }
    }
}

/// Exponential insulin curve fitted to a total action duration and a peak
/// activity time.
///
/// Coefficients are solved once at construction:
///
/// ```text
/// τ = P(1 − P/T) / (1 − 2P/T)
/// a = 2τ/T
/// S = 1 / (1 − a + (1 + a)e^(−T/τ))
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ExponentialInsulinModel {
    action_duration: Duration,
    peak_activity_time: Duration,
    // Cached in seconds
    action_seconds: f64,
    tau: f64,
    a: f64,
    s: f64,
}

impl ExponentialInsulinModel {
    /// Build the curve, failing unless `0 < peak < action_duration / 2`.
    pub fn new(action_duration: Duration, peak_activity_time: Duration) -> Result<Self> {
        let t = seconds(action_duration);
        let p = seconds(peak_activity_time);

        if !(t > 0.0) {
            return Err(Error::InvalidInsulinModel(format!(
                "action duration must be positive, got {}s",
                t
            )));
        }
        if !(p > 0.0 && 2.0 * p < t) {
            return Err(Error::InvalidInsulinModel(format!(
                "peak activity time {}s must lie strictly between 0 and half the action duration ({}s)",
                p,
                t / 2.0
            )));
        }

        let tau = p * (1.0 - p / t) / (1.0 - 2.0 * p / t);
        let a = 2.0 * tau / t;
        let s = 1.0 / (1.0 - a + (1.0 + a) * (-t / tau).exp());

        if !(tau.is_finite() && tau > 0.0 && s.is_finite()) {
            return Err(Error::InvalidInsulinModel(format!(
                "degenerate curve for action duration {}s, peak {}s",
                t, p
            )));
        }

        tracing::debug!(tau, a, s, "Built exponential insulin model");

        Ok(Self {
            action_duration,
            peak_activity_time,
            action_seconds: t,
            tau,
            a,
            s,
        })
    }

    pub fn preset(preset: ModelPreset) -> Result<Self> {
        let (action_duration, peak_activity_time) = preset.parameters();
        Self::new(action_duration, peak_activity_time)
    }

    pub fn action_duration(&self) -> Duration {
        self.action_duration
    }

    pub fn peak_activity_time(&self) -> Duration {
        self.peak_activity_time
    }

    /// τ, the time constant of exponential decay (seconds)
    pub fn tau(&self) -> f64 {
        self.tau
    }

    /// a, the rise-time factor
    pub fn a(&self) -> f64 {
        self.a
    }

    /// S, the auxiliary scale factor
    pub fn s(&self) -> f64 {
        self.s
    }

    /// Fraction of the dose absorbed per second at `time` after delivery
    pub fn percent_activity(&self, time: Duration) -> f64 {
        let t = seconds(time);
        if t <= 0.0 || t >= self.action_seconds {
            return 0.0;
        }
        (self.s / self.tau.powi(2)) * t * (1.0 - t / self.action_seconds) * (-t / self.tau).exp()
    }
}

impl InsulinModel for ExponentialInsulinModel {
    fn percent_effect_remaining(&self, time: Duration) -> f64 {
        let t = seconds(time);
        if t <= 0.0 {
            return 1.0;
        }
        if t >= self.action_seconds {
            return 0.0;
        }

        let (tau, a, s, td) = (self.tau, self.a, self.s, self.action_seconds);
        let remaining = 1.0
            - s * (1.0 - a)
                * ((t.powi(2) / (tau * td * (1.0 - a)) - t / tau - 1.0) * (-t / tau).exp() + 1.0);

        remaining.clamp(0.0, 1.0)
    }

    fn effect_duration(&self) -> Duration {
        self.action_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adult() -> ExponentialInsulinModel {
        ExponentialInsulinModel::new(Duration::minutes(360), Duration::minutes(75)).unwrap()
    }

    #[test]
    fn test_boundaries() {
        let model = adult();
        assert_eq!(model.percent_effect_remaining(Duration::minutes(-30)), 1.0);
        assert_eq!(model.percent_effect_remaining(Duration::zero()), 1.0);
        assert_eq!(model.percent_effect_remaining(Duration::minutes(360)), 0.0);
        assert_eq!(model.percent_effect_remaining(Duration::minutes(500)), 0.0);
    }

    #[test]
    fn test_monotonically_non_increasing() {
        let model = adult();
        let mut previous = model.percent_effect_remaining(Duration::zero());
        for minute in 1..=360 {
            let current = model.percent_effect_remaining(Duration::minutes(minute));
            assert!(
                current <= previous,
                "effect rose at minute {}: {} > {}",
                minute,
                current,
                previous
            );
            assert!((0.0..=1.0).contains(&current));
            previous = current;
        }
    }

    #[test]
    fn test_curve_continuous_at_action_duration() {
        let model = adult();
        let almost_done = model.percent_effect_remaining(Duration::minutes(359));
        assert!(almost_done > 0.0);
        assert!(almost_done < 1e-3);
    }

    #[test]
    fn test_activity_peaks_at_peak_time() {
        let model = adult();
        let peak = model.percent_activity(Duration::minutes(75));
        assert!(peak > model.percent_activity(Duration::minutes(70)));
        assert!(peak > model.percent_activity(Duration::minutes(80)));
        assert_eq!(model.percent_activity(Duration::zero()), 0.0);
    }

    #[test]
    fn test_effect_duration_is_action_duration() {
        let model = adult();
        assert_eq!(model.effect_duration(), Duration::minutes(360));
        assert_eq!(model.peak_activity_time(), Duration::minutes(75));
    }

    #[test]
    fn test_rejects_peak_at_half_duration() {
        let result = ExponentialInsulinModel::new(Duration::minutes(360), Duration::minutes(180));
        assert!(matches!(result, Err(Error::InvalidInsulinModel(_))));
    }

    #[test]
    fn test_rejects_non_positive_parameters() {
        assert!(ExponentialInsulinModel::new(Duration::minutes(360), Duration::zero()).is_err());
        assert!(ExponentialInsulinModel::new(Duration::zero(), Duration::minutes(10)).is_err());
        assert!(
            ExponentialInsulinModel::new(Duration::minutes(360), Duration::minutes(-5)).is_err()
        );
    }

    #[test]
    fn test_presets_build() {
        for preset in [
            ModelPreset::RapidActingAdult,
            ModelPreset::RapidActingChild,
            ModelPreset::Fiasp,
        ] {
            let model = ExponentialInsulinModel::preset(preset).unwrap();
            assert_eq!(model.effect_duration(), Duration::minutes(360));
        }
    }

    #[test]
    fn test_faster_peak_absorbs_sooner() {
        let adult = adult();
        let fiasp = ExponentialInsulinModel::preset(ModelPreset::Fiasp).unwrap();
        let hour = Duration::minutes(60);
        assert!(fiasp.percent_effect_remaining(hour) < adult.percent_effect_remaining(hour));
    }
}
