//! Basal normalization against a scheduled basal rate.
//!
//! The scheduled basal is assumed to be accounted for elsewhere (it is what
//! keeps glucose flat), so only deviations from it carry an effect. Temp
//! basals, suspends and resumes are re-expressed as net rates relative to
//! the schedule, split wherever the schedule changes.

use crate::schedule::BasalScheduleProvider;
use crate::{DoseEntry, DoseType, DoseUnit};

/// Rewrite reconciled doses as deltas from the scheduled basal rate.
///
/// - Boluses pass through unchanged.
/// - Scheduled basal entries are dropped.
/// - Temp basal, suspend and resume entries are split at every schedule
///   breakpoint inside their span; each piece carries
///   `dose rate − scheduled rate` in U/hr and records the scheduled rate.
///   Pieces whose delta is within `f64::EPSILON` of zero are dropped.
pub fn normalize(doses: &[DoseEntry], schedule: &dyn BasalScheduleProvider) -> Vec<DoseEntry> {
    let mut normalized = Vec::with_capacity(doses.len());

    for dose in doses {
        match dose.dose_type {
            DoseType::Bolus => normalized.push(dose.clone()),
            DoseType::Basal => {}
            DoseType::TempBasal | DoseType::Suspend | DoseType::Resume => {
                let units_per_hour = dose.units_per_hour();

                for segment in schedule.between(dose.start_date, dose.end_date) {
                    let start_date = segment.start_date.max(dose.start_date);
                    let end_date = segment.end_date.min(dose.end_date);
                    if end_date <= start_date {
                        continue;
                    }

                    let net_rate = units_per_hour - segment.value;
                    if net_rate.abs() <= f64::EPSILON {
                        continue;
                    }

                    normalized.push(DoseEntry {
                        dose_type: dose.dose_type,
                        start_date,
                        end_date,
                        value: net_rate,
                        unit: DoseUnit::UnitsPerHour,
                        delivered_units: None,
                        scheduled_basal_rate: Some(segment.value),
                        description: dose.description.clone(),
                    });
                }
            }
        }
    }

    tracing::debug!(
        "Normalized {} doses into {} net entries",
        doses.len(),
        normalized.len()
    );
    normalized
}
