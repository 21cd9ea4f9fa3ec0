//! Configuration file support for iobkit.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/iobkit/config.toml`.
//! Every field has a default; basal and sensitivity schedules are optional
//! and only required by the computations that use them.

use crate::effects::EffectTiming;
use crate::glucose::MomentumSettings;
use crate::insulin_model::ExponentialInsulinModel;
use crate::schedule::{DailySchedule, RepeatingScheduleValue};
use crate::{Error, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub insulin_model: InsulinModelConfig,

    #[serde(default)]
    pub effects: EffectsConfig,

    #[serde(default)]
    pub reservoir: ReservoirConfig,

    #[serde(default)]
    pub momentum: MomentumConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basal_schedule: Option<ScheduleConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitivity_schedule: Option<ScheduleConfig>,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Exponential insulin curve parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InsulinModelConfig {
    #[serde(default = "default_action_duration_minutes")]
    pub action_duration_minutes: i64,

    #[serde(default = "default_peak_activity_minutes")]
    pub peak_activity_minutes: i64,
}

impl Default for InsulinModelConfig {
    fn default() -> Self {
        Self {
            action_duration_minutes: default_action_duration_minutes(),
            peak_activity_minutes: default_peak_activity_minutes(),
        }
    }
}

/// Effect simulation grid
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EffectsConfig {
    #[serde(default = "default_delay_minutes")]
    pub delay_minutes: i64,

    #[serde(default = "default_delta_minutes")]
    pub delta_minutes: i64,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            delay_minutes: default_delay_minutes(),
            delta_minutes: default_delta_minutes(),
        }
    }
}

/// Reservoir continuity tolerance
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReservoirConfig {
    #[serde(default = "default_maximum_gap_minutes")]
    pub maximum_gap_minutes: i64,
}

impl Default for ReservoirConfig {
    fn default() -> Self {
        Self {
            maximum_gap_minutes: default_maximum_gap_minutes(),
        }
    }
}

/// Momentum projection parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MomentumConfig {
    #[serde(default = "default_momentum_duration_minutes")]
    pub duration_minutes: i64,

    #[serde(default = "default_delta_minutes")]
    pub delta_minutes: i64,

    /// mg/dL per minute
    #[serde(default = "default_velocity_maximum")]
    pub velocity_maximum: f64,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            duration_minutes: default_momentum_duration_minutes(),
            delta_minutes: default_delta_minutes(),
            velocity_maximum: default_velocity_maximum(),
        }
    }
}

/// Unit a schedule's values are written in
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScheduleUnit {
    #[serde(rename = "mg/dL")]
    MgDl,
    #[serde(rename = "mmol/L")]
    MmolL,
    #[serde(rename = "U/hr")]
    UnitsPerHour,
}

/// Daily repeating schedule as written in the config file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// Defaults to U/hr for basal rates and mg/dL for sensitivity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<ScheduleUnit>,

    pub items: Vec<RepeatingScheduleValue>,
}

impl ScheduleConfig {
    /// Build a schedule with values converted to `target`
    fn build(&self, name: &str, target: ScheduleUnit) -> Result<DailySchedule> {
        let factor = match (self.unit.unwrap_or(target), target) {
            (from, to) if from == to => 1.0,
            (ScheduleUnit::MmolL, ScheduleUnit::MgDl) => crate::MG_DL_PER_MMOL_L,
            (from, to) => {
                return Err(Error::Config(format!(
                    "{} is in {:?} but must be in {:?}",
                    name, from, to
                )))
            }
        };

        let items = self
            .items
            .iter()
            .map(|item| RepeatingScheduleValue {
                start_minute: item.start_minute,
                value: item.value * factor,
            })
            .collect();
        DailySchedule::new(items, self.utc_offset_minutes)
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|| PathBuf::from("."))
    });
    base.join("iobkit")
}

fn default_action_duration_minutes() -> i64 {
    360
}

fn default_peak_activity_minutes() -> i64 {
    75
}

fn default_delay_minutes() -> i64 {
    10
}

fn default_delta_minutes() -> i64 {
    5
}

fn default_maximum_gap_minutes() -> i64 {
    30
}

fn default_momentum_duration_minutes() -> i64 {
    30
}

fn default_velocity_maximum() -> f64 {
    4.0
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        base.join("iobkit").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn insulin_model(&self) -> Result<ExponentialInsulinModel> {
        ExponentialInsulinModel::new(
            Duration::minutes(self.insulin_model.action_duration_minutes),
            Duration::minutes(self.insulin_model.peak_activity_minutes),
        )
    }

    pub fn effect_timing(&self) -> Result<EffectTiming> {
        EffectTiming::new(
            Duration::minutes(self.effects.delay_minutes),
            Duration::minutes(self.effects.delta_minutes),
        )
    }

    pub fn maximum_reservoir_gap(&self) -> Result<Duration> {
        if self.reservoir.maximum_gap_minutes <= 0 {
            return Err(Error::Config(format!(
                "reservoir maximum gap must be positive, got {} minutes",
                self.reservoir.maximum_gap_minutes
            )));
        }
        Ok(Duration::minutes(self.reservoir.maximum_gap_minutes))
    }

    pub fn momentum_settings(&self) -> Result<MomentumSettings> {
        MomentumSettings::new(
            Duration::minutes(self.momentum.duration_minutes),
            Duration::minutes(self.momentum.delta_minutes),
            self.momentum.velocity_maximum,
        )
    }

    /// Basal rates in U/hr, if configured
    pub fn basal_schedule(&self) -> Result<Option<DailySchedule>> {
        self.basal_schedule
            .as_ref()
            .map(|schedule| schedule.build("basal_schedule", ScheduleUnit::UnitsPerHour))
            .transpose()
    }

    /// Insulin sensitivity in mg/dL per U, if configured
    pub fn sensitivity_schedule(&self) -> Result<Option<DailySchedule>> {
        self.sensitivity_schedule
            .as_ref()
            .map(|schedule| schedule.build("sensitivity_schedule", ScheduleUnit::MgDl))
            .transpose()
    }
}
