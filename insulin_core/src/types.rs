//! Core domain types for insulin delivery and glucose data.
//!
//! This module defines the value records exchanged between the core
//! calculations and the outside world:
//! - Dose entries and reservoir readings (inputs to reconciliation)
//! - Glucose samples (inputs to the glucose analytics)
//! - Time-series points produced by the calculators

use crate::time::{hours, TimelineValue};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Dose Types
// ============================================================================

/// Kind of insulin delivery record or delivery-state transition
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DoseType {
    Bolus,
    Basal,
    TempBasal,
    Suspend,
    Resume,
}

impl DoseType {
    /// Whether this record belongs to the basal delivery channel
    pub fn is_basal_channel(self) -> bool {
        !matches!(self, DoseType::Bolus)
    }
}

/// Unit of a dose entry's `value`
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DoseUnit {
    Units,
    UnitsPerHour,
}

/// A record of insulin delivery or of a delivery-state transition.
///
/// Entries are never mutated by the calculations; every transformation
/// produces new entries.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DoseEntry {
    #[serde(rename = "type")]
    pub dose_type: DoseType,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub value: f64,
    pub unit: DoseUnit,
    /// Amount actually delivered when it differs from what was programmed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_units: Option<f64>,
    /// Scheduled basal rate in effect at the start of the dose (U/hr)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_basal_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DoseEntry {
    /// Create a validated dose entry
    pub fn new(
        dose_type: DoseType,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        value: f64,
        unit: DoseUnit,
    ) -> Result<Self> {
        let dose = Self {
            dose_type,
            start_date,
            end_date,
            value,
            unit,
            delivered_units: None,
            scheduled_basal_rate: None,
            description: None,
        };
        dose.validate()?;
        Ok(dose)
    }

    /// A bolus delivered at a single instant
    pub fn bolus(date: DateTime<Utc>, units: f64) -> Self {
        Self::point(DoseType::Bolus, date, units, DoseUnit::Units)
    }

    /// A pump suspend event (open-ended until reconciled)
    pub fn suspend(date: DateTime<Utc>) -> Self {
        Self::point(DoseType::Suspend, date, 0.0, DoseUnit::UnitsPerHour)
    }

    /// A pump resume event
    pub fn resume(date: DateTime<Utc>) -> Self {
        Self::point(DoseType::Resume, date, 0.0, DoseUnit::UnitsPerHour)
    }

    /// A temporary basal rate over `[start_date, end_date]`
    pub fn temp_basal(
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        units_per_hour: f64,
    ) -> Result<Self> {
        Self::new(
            DoseType::TempBasal,
            start_date,
            end_date,
            units_per_hour,
            DoseUnit::UnitsPerHour,
        )
    }

    /// A scheduled basal rate over `[start_date, end_date]`
    pub fn basal(
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        units_per_hour: f64,
    ) -> Result<Self> {
        Self::new(
            DoseType::Basal,
            start_date,
            end_date,
            units_per_hour,
            DoseUnit::UnitsPerHour,
        )
    }

    fn point(dose_type: DoseType, date: DateTime<Utc>, value: f64, unit: DoseUnit) -> Self {
        Self {
            dose_type,
            start_date: date,
            end_date: date,
            value,
            unit,
            delivered_units: None,
            scheduled_basal_rate: None,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_delivered_units(mut self, units: f64) -> Self {
        self.delivered_units = Some(units);
        self
    }

    /// Check the entry's own invariants (used for records read from storage)
    pub fn validate(&self) -> Result<()> {
        if self.end_date < self.start_date {
            return Err(Error::InvalidDose(format!(
                "{:?} ends ({}) before it starts ({})",
                self.dose_type, self.end_date, self.start_date
            )));
        }
        if !self.value.is_finite() {
            return Err(Error::InvalidDose(format!(
                "{:?} at {} has non-finite value",
                self.dose_type, self.start_date
            )));
        }
        if let Some(delivered) = self.delivered_units {
            if !delivered.is_finite() {
                return Err(Error::InvalidDose(format!(
                    "{:?} at {} has non-finite delivered units",
                    self.dose_type, self.start_date
                )));
            }
        }
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        self.end_date - self.start_date
    }

    /// Delivery rate in U/hr
    ///
    /// A zero-duration entry expressed in units has no meaningful rate and
    /// reports 0.
    pub fn units_per_hour(&self) -> f64 {
        match self.unit {
            DoseUnit::UnitsPerHour => self.value,
            DoseUnit::Units => {
                let duration_hours = hours(self.duration());
                if duration_hours > 0.0 {
                    self.value / duration_hours
                } else {
                    0.0
                }
            }
        }
    }

    /// Programmed amount in U
    pub fn units(&self) -> f64 {
        match self.unit {
            DoseUnit::Units => self.value,
            DoseUnit::UnitsPerHour => self.value * hours(self.duration()),
        }
    }

    /// Actual amount when the pump reported one, otherwise the programmed amount
    pub fn delivered_or_programmed_units(&self) -> f64 {
        self.delivered_units.unwrap_or_else(|| self.units())
    }

    /// A copy of this entry clamped to `[start, end]`.
    ///
    /// Rates are preserved. A basal-channel entry measured in units keeps its
    /// rate by scaling the amount to the new span. The delivered amount only
    /// survives when the span is unchanged.
    pub fn trimmed(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let start_date = self.start_date.max(start).min(self.end_date);
        let end_date = self.end_date.min(end).max(start_date);

        if start_date == self.start_date && end_date == self.end_date {
            return self.clone();
        }

        let value = match (self.unit, self.dose_type) {
            (DoseUnit::Units, DoseType::Bolus) => self.value,
            (DoseUnit::Units, _) => self.units_per_hour() * hours(end_date - start_date),
            (DoseUnit::UnitsPerHour, _) => self.value,
        };

        Self {
            dose_type: self.dose_type,
            start_date,
            end_date,
            value,
            unit: self.unit,
            delivered_units: None,
            scheduled_basal_rate: self.scheduled_basal_rate,
            description: self.description.clone(),
        }
    }
}

/// A reading of the insulin volume remaining in the pump reservoir
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReservoirValue {
    pub start_date: DateTime<Utc>,
    pub unit_volume: f64,
}

impl ReservoirValue {
    pub fn new(start_date: DateTime<Utc>, unit_volume: f64) -> Self {
        Self {
            start_date,
            unit_volume,
        }
    }
}

// ============================================================================
// Computed Series Types
// ============================================================================

/// Insulin on board at an instant, in U
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InsulinValue {
    pub start_date: DateTime<Utc>,
    pub value: f64,
}

/// Cumulative glucose effect at an instant, in mg/dL
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GlucoseEffect {
    pub start_date: DateTime<Utc>,
    pub value: f64,
}

/// Rate of glucose change over an interval, in mg/dL per second
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GlucoseEffectVelocity {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub value: f64,
}

impl GlucoseEffectVelocity {
    pub fn value_per_minute(&self) -> f64 {
        self.value * 60.0
    }

    /// Total glucose change implied over the velocity's interval
    pub fn effect(&self) -> GlucoseEffect {
        let seconds = (self.end_date - self.start_date).num_milliseconds() as f64 / 1000.0;
        GlucoseEffect {
            start_date: self.end_date,
            value: self.value * seconds,
        }
    }
}

// ============================================================================
// Glucose Types
// ============================================================================

/// mg/dL per mmol/L for glucose (molar mass 180.15588 g/mol)
pub const MG_DL_PER_MMOL_L: f64 = 18.015588;

/// Glucose concentration unit
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum GlucoseUnit {
    #[default]
    #[serde(rename = "mg/dL")]
    MgDl,
    #[serde(rename = "mmol/L")]
    MmolL,
}

impl GlucoseUnit {
    pub fn to_mg_dl(self, value: f64) -> f64 {
        match self {
            GlucoseUnit::MgDl => value,
            GlucoseUnit::MmolL => value * MG_DL_PER_MMOL_L,
        }
    }

    pub fn from_mg_dl(self, value: f64) -> f64 {
        match self {
            GlucoseUnit::MgDl => value,
            GlucoseUnit::MmolL => value / MG_DL_PER_MMOL_L,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GlucoseUnit::MgDl => "mg/dL",
            GlucoseUnit::MmolL => "mmol/L",
        }
    }
}

/// A glucose measurement from a sensor or meter
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GlucoseSample {
    pub start_date: DateTime<Utc>,
    pub quantity: f64,
    #[serde(default)]
    pub unit: GlucoseUnit,
    /// Calibration or display-only record; not a trustworthy reading
    #[serde(default)]
    pub is_display_only: bool,
    /// Opaque tag naming the device or app that produced the sample
    #[serde(default)]
    pub provenance_identifier: String,
}

impl GlucoseSample {
    pub fn new(
        start_date: DateTime<Utc>,
        quantity: f64,
        unit: GlucoseUnit,
        provenance_identifier: impl Into<String>,
    ) -> Self {
        Self {
            start_date,
            quantity,
            unit,
            is_display_only: false,
            provenance_identifier: provenance_identifier.into(),
        }
    }

    pub fn display_only(mut self) -> Self {
        self.is_display_only = true;
        self
    }

    pub fn quantity_mg_dl(&self) -> f64 {
        self.unit.to_mg_dl(self.quantity)
    }
}

// ============================================================================
// Timeline Implementations
// ============================================================================

impl TimelineValue for DoseEntry {
    fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    fn end_date(&self) -> DateTime<Utc> {
        self.end_date
    }
}

impl TimelineValue for ReservoirValue {
    fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }
}

impl TimelineValue for InsulinValue {
    fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }
}

impl TimelineValue for GlucoseEffect {
    fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }
}

impl TimelineValue for GlucoseEffectVelocity {
    fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    fn end_date(&self) -> DateTime<Utc> {
        self.end_date
    }
}

impl TimelineValue for GlucoseSample {
    fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }
}
