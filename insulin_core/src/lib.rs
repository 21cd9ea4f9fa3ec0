#![forbid(unsafe_code)]

//! Core domain model and calculations for the iobkit insulin toolkit.
//!
//! This crate provides:
//! - Domain types (doses, reservoir readings, glucose samples, effect series)
//! - Insulin activity model and daily schedules
//! - Dose reconstruction (reservoir derivation, event reconciliation,
//!   basal normalization)
//! - Insulin-on-board, glucose effect, momentum and counteraction series
//! - Persistence (JSONL store, CSV export) and an effect cache

pub mod types;
pub mod error;
pub mod time;
pub mod config;
pub mod logging;
pub mod insulin_model;
pub mod schedule;
pub mod reservoir;
pub mod reconcile;
pub mod normalize;
pub mod effects;
pub mod glucose;
pub mod source;
pub mod cache;
pub mod pipeline;
pub mod store;
pub mod export;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use time::TimelineValue;
pub use config::Config;
pub use insulin_model::{ExponentialInsulinModel, InsulinModel, ModelPreset};
pub use schedule::{BasalScheduleProvider, DailySchedule, SensitivityProvider};
pub use reservoir::derive_doses;
pub use reconcile::reconcile;
pub use normalize::normalize;
pub use effects::{glucose_effects, insulin_on_board, DateWindow, EffectTiming};
pub use glucose::{counteraction_effects, linear_momentum_effect, MomentumSettings};
pub use source::{DoseHistory, DoseSource, GlucoseSource};
pub use pipeline::EffectsPipeline;
pub use store::{JsonlSink, JsonlStore, RecordSink};
