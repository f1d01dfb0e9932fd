use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{AppError, AppResult};

const DEFAULT_APPLY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_FRAGMENT_THRESHOLD_MINUTES: i64 = 30;
const DEFAULT_LOW_UTILIZATION_PERCENT: f64 = 50.0;
const DEFAULT_ALTERNATIVE_SLOT_COUNT: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    #[serde(default = "default_apply_timeout_ms")]
    pub apply_timeout_ms: u64,
    #[serde(default = "default_fragment_threshold_minutes")]
    pub fragment_threshold_minutes: i64,
    #[serde(default = "default_low_utilization_percent")]
    pub low_utilization_percent: f64,
    #[serde(default = "default_alternative_slot_count")]
    pub alternative_slot_count: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            apply_timeout_ms: DEFAULT_APPLY_TIMEOUT_MS,
            fragment_threshold_minutes: DEFAULT_FRAGMENT_THRESHOLD_MINUTES,
            low_utilization_percent: DEFAULT_LOW_UTILIZATION_PERCENT,
            alternative_slot_count: DEFAULT_ALTERNATIVE_SLOT_COUNT,
        }
    }
}

impl EngineSettings {
    pub fn from_yaml_str(raw: &str) -> AppResult<Self> {
        let settings: EngineSettings = serde_yaml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.apply_timeout_ms == 0 {
            return Err(AppError::validation("apply timeout must be positive"));
        }
        if self.fragment_threshold_minutes <= 0 {
            return Err(AppError::validation_with_details(
                "fragment threshold must be positive",
                json!({"fragmentThresholdMinutes": self.fragment_threshold_minutes}),
            ));
        }
        if !(0.0..=100.0).contains(&self.low_utilization_percent) {
            return Err(AppError::validation_with_details(
                "low utilization threshold must be a percentage",
                json!({"lowUtilizationPercent": self.low_utilization_percent}),
            ));
        }
        Ok(())
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_millis(self.apply_timeout_ms)
    }
}

fn default_apply_timeout_ms() -> u64 {
    DEFAULT_APPLY_TIMEOUT_MS
}

fn default_fragment_threshold_minutes() -> i64 {
    DEFAULT_FRAGMENT_THRESHOLD_MINUTES
}

fn default_low_utilization_percent() -> f64 {
    DEFAULT_LOW_UTILIZATION_PERCENT
}

fn default_alternative_slot_count() -> usize {
    DEFAULT_ALTERNATIVE_SLOT_COUNT
}
