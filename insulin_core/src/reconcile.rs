//! Reconciliation of raw pump events into a canonical dose timeline.
//!
//! Pump histories record basal changes as open-ended "starts" plus point
//! suspend/resume events. Reconciliation closes every open entry at the
//! event that ends it, so that basal-channel entries never overlap and
//! suspended time is represented explicitly.
//!
//! The scan is a fold over the event stream carrying a small accumulator
//! (pending basal, pending suspend, emitted entries); nothing outside the
//! accumulator is mutated.

use crate::{DoseEntry, DoseType};
use chrono::{DateTime, Utc};

/// An entry tagged with the position of the raw event it came from, so the
/// output can be ordered deterministically.
type Tagged = (usize, DoseEntry);

#[derive(Debug, Default)]
struct Reconciliation {
    pending_basal: Option<Tagged>,
    pending_suspend: Option<Tagged>,
    emitted: Vec<Tagged>,
}

impl Reconciliation {
    /// Emit `dose` clipped to `[start, end]`, dropping zero-duration results
    fn emit_closed(&mut self, (index, dose): &Tagged, start: DateTime<Utc>, end: DateTime<Utc>) {
        let closed = dose.trimmed(start, end);
        if closed.end_date > closed.start_date {
            self.emitted.push((*index, closed));
        }
    }

    /// Emit an open suspend ending at `end`
    fn emit_suspend(&mut self, (index, mut suspend): Tagged, end: DateTime<Utc>) {
        if end > suspend.start_date {
            suspend.end_date = end;
            self.emitted.push((index, suspend));
        }
    }

    fn step(mut self, index: usize, dose: &DoseEntry) -> Self {
        match dose.dose_type {
            DoseType::Bolus => {
                self.emitted.push((index, dose.clone()));
            }
            DoseType::Basal => {
                self.close_recorded_suspend(dose.start_date);

                // A scheduled basal start after a suspend is an implicit resume
                let was_suspended = self.pending_suspend.is_some();
                if let Some(suspend) = self.pending_suspend.take() {
                    self.emit_suspend(suspend, dose.start_date);
                }
                if was_suspended {
                    // Pre-suspend portion of any pending basal is already out
                    self.pending_basal = Some((index, dose.clone()));
                } else {
                    self.start_basal(index, dose);
                }
            }
            DoseType::TempBasal => {
                self.close_recorded_suspend(dose.start_date);
                if self.pending_suspend.is_some() {
                    // Set while suspended; takes effect on resume
                    self.pending_basal = Some((index, dose.clone()));
                } else {
                    self.start_basal(index, dose);
                }
            }
            DoseType::Resume => {
                if let Some(suspend) = self.pending_suspend.take() {
                    self.emit_suspend(suspend, dose.start_date);

                    // Continue a temp basal that was running across the suspend
                    self.pending_basal = self.pending_basal.take().and_then(|(i, basal)| {
                        if basal.end_date > dose.end_date {
                            let end = basal.end_date;
                            Some((i, basal.trimmed(dose.start_date, end)))
                        } else {
                            None
                        }
                    });
                }
            }
            DoseType::Suspend => {
                if let Some(basal) = self.pending_basal.take() {
                    if self.pending_suspend.is_none() {
                        let start = basal.1.start_date;
                        let end = basal.1.end_date.min(dose.start_date);
                        self.emit_closed(&basal, start, end);
                    }
                    if basal.1.end_date > dose.start_date {
                        self.pending_basal = Some(basal);
                    }
                }
                if self.pending_suspend.is_none() {
                    self.pending_suspend = Some((index, dose.clone()));
                }
            }
        }
        self
    }

    /// Replace the pending basal with `dose`, closing the old one first
    fn start_basal(&mut self, index: usize, dose: &DoseEntry) {
        if let Some(last) = self.pending_basal.take() {
            let start = last.1.start_date;
            let end = last.1.end_date.min(dose.start_date);
            self.emit_closed(&last, start, end);
        }
        self.pending_basal = Some((index, dose.clone()));
    }

    /// A suspend that already carries its own end before `date` was resolved
    /// upstream; emit it as recorded.
    fn close_recorded_suspend(&mut self, date: DateTime<Utc>) {
        let resolved = self.pending_suspend.as_ref().is_some_and(|(_, suspend)| {
            suspend.end_date > suspend.start_date && suspend.end_date <= date
        });
        if resolved {
            if let Some(suspend) = self.pending_suspend.take() {
                self.emitted.push(suspend);
                // Whatever basal ran before the suspend has already been closed
                self.pending_basal = None;
            }
        }
    }

    fn finish(mut self) -> Vec<DoseEntry> {
        if let Some(suspend) = self.pending_suspend.take() {
            self.emitted.push(suspend);
        } else if let Some((index, basal)) = self.pending_basal.take() {
            if basal.end_date > basal.start_date {
                self.emitted.push((index, basal));
            }
        }

        self.emitted
            .sort_by(|(ia, a), (ib, b)| a.start_date.cmp(&b.start_date).then(ia.cmp(ib)));
        self.emitted.into_iter().map(|(_, dose)| dose).collect()
    }
}

/// Reconcile a chronological stream of raw pump events.
///
/// Boluses pass through. Basal and temp basal starts are closed by the next
/// basal-channel event or by a suspend. Suspends are closed by a resume or
/// by a scheduled basal start. A temp basal interrupted by a suspend
/// continues after the resume until its original end. Zero-duration closed
/// entries are dropped. The result is ordered by start date.
pub fn reconcile(events: &[DoseEntry]) -> Vec<DoseEntry> {
    let reconciled = events
        .iter()
        .enumerate()
        .fold(Reconciliation::default(), |acc, (index, dose)| acc.step(index, dose))
        .finish();

    tracing::debug!(
        "Reconciled {} pump events into {} dose entries",
        events.len(),
        reconciled.len()
    );
    reconciled
}
