use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::appointment::ResourceKey;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    ConsolidateDay,
    CloseGaps,
    ExtendHours,
    ReviewBreaks,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationSuggestion {
    pub kind: SuggestionKind,
    pub message: String,
    #[serde(default)]
    pub resource: Option<ResourceKey>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DayUtilization {
    pub resource: ResourceKey,
    pub date: NaiveDate,
    pub booked_minutes: i64,
    pub available_minutes: i64,
    pub utilization_percent: f64,
    pub reclaimable_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationReport {
    pub minutes_reclaimable: i64,
    pub utilization_percent: f64,
    pub suggestions: Vec<OptimizationSuggestion>,
    #[serde(default)]
    pub daily: Vec<DayUtilization>,
    /// Set when analysis failed and this report is a placeholder.
    #[serde(default)]
    pub degraded: bool,
    #[serde(default)]
    pub degraded_reason: Option<String>,
}

impl OptimizationReport {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            degraded: true,
            degraded_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}
