//! End-to-end effect computation over a data source.
//!
//! Fetch raw history → canonical dose timeline (reservoir-derived when the
//! reservoir record is continuous, reconciled pump events otherwise) →
//! normalize against the basal schedule → IOB or glucose effect series.
//! Derived series are memoized in an [`EffectCache`].

use crate::cache::{fingerprint, CacheKey, CachedSeries, EffectCache, Fingerprint, SeriesKind};
use crate::effects::{self, DateWindow, EffectTiming};
use crate::glucose;
use crate::insulin_model::{ExponentialInsulinModel, InsulinModel};
use crate::normalize::normalize;
use crate::reconcile::reconcile;
use crate::reservoir;
use crate::schedule::{DailySchedule, RepeatingScheduleValue};
use crate::source::{DoseSource, GlucoseSource};
use crate::{
    DoseEntry, Error, GlucoseEffect, GlucoseEffectVelocity, InsulinValue, Result,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Everything that changes the numbers a pipeline produces
#[derive(Serialize)]
struct ConfigurationKey<'a> {
    action_duration_ms: i64,
    peak_activity_ms: i64,
    delay_ms: i64,
    delta_ms: i64,
    maximum_reservoir_gap_ms: i64,
    basal_schedule: Option<(i32, &'a [RepeatingScheduleValue])>,
    sensitivity_schedule: Option<(i32, &'a [RepeatingScheduleValue])>,
}

fn schedule_key(schedule: &Option<DailySchedule>) -> Option<(i32, &[RepeatingScheduleValue])> {
    schedule
        .as_ref()
        .map(|schedule| (schedule.utc_offset_minutes(), schedule.items()))
}

pub struct EffectsPipeline {
    model: ExponentialInsulinModel,
    timing: EffectTiming,
    maximum_reservoir_gap: Duration,
    basal_schedule: Option<DailySchedule>,
    sensitivity_schedule: Option<DailySchedule>,
    cache: EffectCache,
}

impl EffectsPipeline {
    pub fn new(model: ExponentialInsulinModel, timing: EffectTiming) -> Self {
        Self {
            model,
            timing,
            maximum_reservoir_gap: reservoir::default_maximum_gap(),
            basal_schedule: None,
            sensitivity_schedule: None,
            cache: EffectCache::new(),
        }
    }

    pub fn with_basal_schedule(mut self, schedule: DailySchedule) -> Self {
        self.basal_schedule = Some(schedule);
        self
    }

    pub fn with_sensitivity_schedule(mut self, schedule: DailySchedule) -> Self {
        self.sensitivity_schedule = Some(schedule);
        self
    }

    pub fn with_maximum_reservoir_gap(mut self, gap: Duration) -> Self {
        self.maximum_reservoir_gap = gap;
        self
    }

    pub fn model(&self) -> &ExponentialInsulinModel {
        &self.model
    }

    pub fn timing(&self) -> &EffectTiming {
        &self.timing
    }

    pub fn cache(&self) -> &EffectCache {
        &self.cache
    }

    pub fn configuration_fingerprint(&self) -> Result<Fingerprint> {
        fingerprint(&ConfigurationKey {
            action_duration_ms: self.model.action_duration().num_milliseconds(),
            peak_activity_ms: self.model.peak_activity_time().num_milliseconds(),
            delay_ms: self.timing.delay().num_milliseconds(),
            delta_ms: self.timing.delta().num_milliseconds(),
            maximum_reservoir_gap_ms: self.maximum_reservoir_gap.num_milliseconds(),
            basal_schedule: schedule_key(&self.basal_schedule),
            sensitivity_schedule: schedule_key(&self.sensitivity_schedule),
        })
    }

    /// Hook for new raw data at `date`; returns the number of cached series
    /// dropped
    pub fn invalidate_from(&mut self, date: DateTime<Utc>) -> usize {
        self.cache.invalidate_from(date)
    }

    fn basal_schedule(&self) -> Result<&DailySchedule> {
        self.basal_schedule
            .as_ref()
            .ok_or(Error::MissingConfiguration("basal schedule"))
    }

    fn sensitivity_schedule(&self) -> Result<&DailySchedule> {
        self.sensitivity_schedule
            .as_ref()
            .ok_or(Error::MissingConfiguration("insulin sensitivity schedule"))
    }

    /// Earliest dose that can still act at `start`
    fn history_start(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start - self.model.effect_duration() - self.timing.delay()
    }

    /// Canonical dose timeline for doses that can act within `[start, end]`
    pub fn dose_timeline(
        &self,
        source: &dyn DoseSource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DoseEntry>> {
        let history_start = self.history_start(start);
        let history = source.fetch_dose_history(history_start, end)?;

        if reservoir::is_continuous(
            &history.reservoir,
            Some(history_start),
            end,
            self.maximum_reservoir_gap,
        ) {
            tracing::debug!(
                "Using {} reservoir readings as the dose record",
                history.reservoir.len()
            );
            Ok(reservoir::derive_doses(&history.reservoir))
        } else {
            tracing::debug!("Reconciling {} pump events", history.events.len());
            Ok(reconcile(&history.events))
        }
    }

    /// Dose timeline for `[start, end]` expressed as deltas from the basal
    /// schedule
    pub fn normalized_doses(
        &self,
        source: &dyn DoseSource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DoseEntry>> {
        let schedule = self.basal_schedule()?;
        let doses = self.dose_timeline(source, start, end)?;
        Ok(normalize(&doses, schedule))
    }

    /// IOB on the `delta` grid covering `[start, end]`
    pub fn insulin_on_board(
        &mut self,
        source: &dyn DoseSource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<InsulinValue>> {
        self.basal_schedule()?;

        let key = CacheKey::for_range(
            self.configuration_fingerprint()?,
            SeriesKind::InsulinOnBoard,
            start,
            end,
        )?;
        if let Some(CachedSeries::InsulinOnBoard(values)) = self.cache.get(&key) {
            tracing::debug!("IOB cache hit for {} to {}", start, end);
            return Ok(values.clone());
        }

        let doses = self.normalized_doses(source, start, end)?;
        let values = effects::insulin_on_board(
            &doses,
            &self.model,
            &DateWindow::between(start, end),
            &self.timing,
        );

        self.cache
            .insert(key, end, CachedSeries::InsulinOnBoard(values.clone()));
        Ok(values)
    }

    /// Cumulative insulin glucose effect on the `delta` grid covering
    /// `[start, end]`
    pub fn glucose_effects(
        &mut self,
        source: &dyn DoseSource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GlucoseEffect>> {
        self.basal_schedule()?;
        self.sensitivity_schedule()?;

        let key = CacheKey::for_range(
            self.configuration_fingerprint()?,
            SeriesKind::GlucoseEffect,
            start,
            end,
        )?;
        if let Some(CachedSeries::GlucoseEffect(effects)) = self.cache.get(&key) {
            tracing::debug!("Glucose effect cache hit for {} to {}", start, end);
            return Ok(effects.clone());
        }

        let doses = self.normalized_doses(source, start, end)?;
        let sensitivity = self.sensitivity_schedule()?;
        let effects = effects::glucose_effects(
            &doses,
            &self.model,
            sensitivity,
            &DateWindow::between(start, end),
            &self.timing,
        );

        self.cache
            .insert(key, end, CachedSeries::GlucoseEffect(effects.clone()));
        Ok(effects)
    }

    /// Glucose velocity in `[start, end]` not explained by insulin
    pub fn counteraction_effects(
        &mut self,
        doses: &dyn DoseSource,
        glucose: &dyn GlucoseSource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GlucoseEffectVelocity>> {
        let effects = self.glucose_effects(doses, start, end)?;
        let samples = glucose.fetch_glucose(start, end)?;
        Ok(glucose::counteraction_effects(&samples, &effects))
    }
}
