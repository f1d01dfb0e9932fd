use std::collections::BTreeSet;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{AppError, AppResult};

/// A daily window expressed as time of day, e.g. opening hours or a lunch break.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DailyWindow {
    #[serde(with = "time_of_day")]
    pub start: NaiveTime,
    #[serde(with = "time_of_day")]
    pub end: NaiveTime,
}

impl DailyWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn minutes(&self) -> i64 {
        self.end.signed_duration_since(self.start).num_minutes()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkingConstraints {
    pub working_hours: DailyWindow,
    /// Weekday indices, Sunday = 0 through Saturday = 6.
    pub working_days: BTreeSet<u8>,
    #[serde(default)]
    pub break_times: Vec<DailyWindow>,
    #[serde(default)]
    pub buffer_minutes: i64,
}

impl Default for WorkingConstraints {
    fn default() -> Self {
        Self {
            working_hours: DailyWindow::new(hm(9, 0), hm(18, 0)),
            working_days: (1..=6).collect(),
            break_times: Vec::new(),
            buffer_minutes: 10,
        }
    }
}

impl WorkingConstraints {
    pub fn validate(&self) -> AppResult<()> {
        if self.working_hours.end <= self.working_hours.start {
            return Err(AppError::validation_with_details(
                "working hours must end after they start",
                json!({"workingHours": self.working_hours}),
            ));
        }

        if let Some(day) = self.working_days.iter().find(|day| **day > 6) {
            return Err(AppError::validation_with_details(
                "working day index out of range",
                json!({"day": day}),
            ));
        }

        if self.buffer_minutes < 0 {
            return Err(AppError::validation_with_details(
                "buffer minutes must not be negative",
                json!({"bufferMinutes": self.buffer_minutes}),
            ));
        }

        for (idx, window) in self.break_times.iter().enumerate() {
            if window.end <= window.start {
                return Err(AppError::validation_with_details(
                    "break must end after it starts",
                    json!({"index": idx, "break": window}),
                ));
            }
        }

        for (idx, pair) in self.break_times.windows(2).enumerate() {
            if pair[1].start < pair[0].end {
                return Err(AppError::validation_with_details(
                    "breaks must be ordered and must not overlap",
                    json!({"index": idx + 1, "previous": pair[0], "break": pair[1]}),
                ));
            }
        }

        Ok(())
    }

    pub fn is_working_day(&self, weekday_index: u8) -> bool {
        self.working_days.contains(&weekday_index)
    }

    /// Bookable minutes in one working day.
    pub fn working_minutes_per_day(&self) -> i64 {
        let breaks: i64 = self
            .break_times
            .iter()
            .map(|window| {
                let start = window.start.max(self.working_hours.start);
                let end = window.end.min(self.working_hours.end);
                end.signed_duration_since(start).num_minutes().max(0)
            })
            .sum();
        (self.working_hours.minutes() - breaks).max(0)
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// `HH:MM` on the wire, `HH:MM:SS` accepted on input.
pub(crate) mod time_of_day {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    use crate::services::schedule_utils;

    pub fn serialize<S>(value: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&schedule_utils::format_time_of_day(*value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        schedule_utils::parse_time_of_day(&raw).map_err(de::Error::custom)
    }
}
