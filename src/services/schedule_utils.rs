use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::json;

use crate::error::{AppError, AppResult};

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

const OUTPUT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parses a wall-clock timestamp. RFC 3339 input keeps its local time and
/// drops the offset.
pub fn parse_datetime(value: &str) -> AppResult<NaiveDateTime> {
    let trimmed = value.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(with_offset.naive_local());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .ok_or_else(|| {
            AppError::validation_with_details("invalid datetime", json!({ "value": value }))
        })
}

pub fn parse_time_of_day(value: &str) -> AppResult<NaiveTime> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|err| {
            AppError::validation_with_details(
                "invalid time of day",
                json!({"value": value, "error": err.to_string()}),
            )
        })
}

pub fn format_datetime(dt: NaiveDateTime) -> String {
    dt.format(OUTPUT_FORMAT).to_string()
}

pub fn format_time_of_day(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

pub fn add_minutes(dt: NaiveDateTime, minutes: i64) -> AppResult<NaiveDateTime> {
    dt.checked_add_signed(Duration::minutes(minutes))
        .ok_or_else(|| AppError::validation("time arithmetic out of range"))
}

pub fn duration_minutes(start: NaiveDateTime, end: NaiveDateTime) -> AppResult<i64> {
    let total = end.signed_duration_since(start).num_minutes();
    if total < 0 {
        Err(AppError::validation("end must not be before start"))
    } else {
        Ok(total)
    }
}

/// Signed idle time between two consecutive ranges; negative means overlap.
pub fn gap_minutes(earlier_end: NaiveDateTime, later_start: NaiveDateTime) -> i64 {
    later_start.signed_duration_since(earlier_end).num_minutes()
}

pub fn overlap_minutes(
    a_start: NaiveDateTime,
    a_end: NaiveDateTime,
    b_start: NaiveDateTime,
    b_end: NaiveDateTime,
) -> i64 {
    let start = a_start.max(b_start);
    let end = a_end.min(b_end);
    end.signed_duration_since(start).num_minutes().max(0)
}

/// Half-open containment: `[inner_start, inner_end)` inside `[outer_start, outer_end)`.
pub fn contains(
    outer_start: NaiveDateTime,
    outer_end: NaiveDateTime,
    inner_start: NaiveDateTime,
    inner_end: NaiveDateTime,
) -> bool {
    inner_start >= outer_start && inner_end <= outer_end
}

/// True when the appointment starts inside the break, ends inside it, or
/// spans it entirely.
pub fn touches_break(
    start: NaiveDateTime,
    end: NaiveDateTime,
    break_start: NaiveDateTime,
    break_end: NaiveDateTime,
) -> bool {
    let starts_inside = start >= break_start && start < break_end;
    let ends_inside = end > break_start && end <= break_end;
    let spans = start <= break_start && end >= break_end;
    starts_inside || ends_inside || spans
}

pub fn at_time(date: NaiveDate, time: NaiveTime) -> NaiveDateTime {
    date.and_time(time)
}

/// Weekday index with Sunday as 0, matching how working days are configured.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}
