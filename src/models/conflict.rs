use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::models::constraints::DailyWindow;
use crate::models::solution::Solution;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    Overlap,
    InsufficientGap,
    DoubleBooking,
    AfterHours,
    BreakConflict,
}

impl ConflictType {
    pub const ALL: [ConflictType; 5] = [
        ConflictType::Overlap,
        ConflictType::InsufficientGap,
        ConflictType::DoubleBooking,
        ConflictType::AfterHours,
        ConflictType::BreakConflict,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::Overlap => "overlap",
            ConflictType::InsufficientGap => "insufficient_gap",
            ConflictType::DoubleBooking => "double_booking",
            ConflictType::AfterHours => "after_hours",
            ConflictType::BreakConflict => "break_conflict",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ConflictSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictSeverity::Low => "low",
            ConflictSeverity::Medium => "medium",
            ConflictSeverity::High => "high",
            ConflictSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn minutes(&self) -> i64 {
        self.end.signed_duration_since(self.start).num_minutes()
    }
}

/// Where one involved appointment sat on the timeline when the conflict was found.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentWindow {
    pub appointment_id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Record version in the snapshot; apply refuses to write over a newer one.
    pub version: i64,
}

impl AppointmentWindow {
    pub fn duration_minutes(&self) -> i64 {
        self.end.signed_duration_since(self.start).num_minutes()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AfterHoursReason {
    NonWorkingDay { weekday: u8 },
    OutsideWorkingHours,
}

/// Measurements behind a conflict, one variant per conflict type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConflictDetail {
    #[serde(rename_all = "camelCase")]
    Overlap {
        earlier: AppointmentWindow,
        later: AppointmentWindow,
        overlap_minutes: i64,
    },
    #[serde(rename_all = "camelCase")]
    InsufficientGap {
        earlier: AppointmentWindow,
        later: AppointmentWindow,
        gap_minutes: i64,
        shortfall_minutes: i64,
    },
    #[serde(rename_all = "camelCase")]
    DoubleBooking {
        client_identity: String,
        bookings: Vec<AppointmentWindow>,
    },
    #[serde(rename_all = "camelCase")]
    AfterHours {
        appointment: AppointmentWindow,
        reason: AfterHoursReason,
        working_hours: DailyWindow,
    },
    #[serde(rename_all = "camelCase")]
    BreakConflict {
        appointment: AppointmentWindow,
        break_index: usize,
        break_window: DailyWindow,
        overlap_minutes: i64,
    },
}

impl ConflictDetail {
    /// The involved appointments, in the order the detector recorded them.
    pub fn windows(&self) -> Vec<&AppointmentWindow> {
        match self {
            ConflictDetail::Overlap { earlier, later, .. }
            | ConflictDetail::InsufficientGap { earlier, later, .. } => vec![earlier, later],
            ConflictDetail::DoubleBooking { bookings, .. } => bookings.iter().collect(),
            ConflictDetail::AfterHours { appointment, .. }
            | ConflictDetail::BreakConflict { appointment, .. } => vec![appointment],
        }
    }

    pub fn conflict_type(&self) -> ConflictType {
        match self {
            ConflictDetail::Overlap { .. } => ConflictType::Overlap,
            ConflictDetail::InsufficientGap { .. } => ConflictType::InsufficientGap,
            ConflictDetail::DoubleBooking { .. } => ConflictType::DoubleBooking,
            ConflictDetail::AfterHours { .. } => ConflictType::AfterHours,
            ConflictDetail::BreakConflict { .. } => ConflictType::BreakConflict,
        }
    }
}

/// Lifecycle of a conflict within one review.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Detected,
    SolutionProposed,
    SolutionSelected,
    Resolving,
    Resolved,
    ResolutionFailed,
}

impl ConflictStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConflictStatus::Resolved | ConflictStatus::ResolutionFailed)
    }

    pub fn can_transition_to(&self, next: ConflictStatus) -> bool {
        use ConflictStatus::*;
        matches!(
            (self, next),
            (Detected, SolutionProposed)
                | (SolutionProposed, SolutionSelected)
                | (SolutionSelected, SolutionSelected)
                | (SolutionSelected, Resolving)
                | (Resolving, Resolved)
                | (Resolving, ResolutionFailed)
        )
    }

    /// Moves to `next` when the lifecycle allows it; returns the state actually held.
    pub fn transition_to(&mut self, next: ConflictStatus) -> Result<ConflictStatus, String> {
        if self.can_transition_to(next) {
            *self = next;
            Ok(next)
        } else {
            Err(format!("illegal conflict transition {self:?} -> {next:?}"))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: String,
    pub conflict_type: ConflictType,
    pub severity: ConflictSeverity,
    pub affected_appointments: Vec<String>,
    pub time_range: TimeRange,
    pub description: String,
    pub detail: ConflictDetail,
    #[serde(default)]
    pub candidate_solutions: Vec<Solution>,
    pub status: ConflictStatus,
}

impl Conflict {
    /// Version of `appointment_id` when this conflict was detected.
    pub fn detected_version(&self, appointment_id: &str) -> Option<i64> {
        self.detail
            .windows()
            .into_iter()
            .find(|window| window.appointment_id == appointment_id)
            .map(|window| window.version)
    }

    pub fn offers(&self, solution: &Solution) -> bool {
        self.candidate_solutions
            .iter()
            .any(|candidate| candidate == solution)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectionErrorReason {
    MissingStart,
    #[serde(rename_all = "camelCase")]
    InvalidStart { value: String },
    #[serde(rename_all = "camelCase")]
    InvalidEnd { value: String },
    MissingDuration,
    NonPositiveLength,
}

impl fmt::Display for DetectionErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionErrorReason::MissingStart => f.write_str("missing start time"),
            DetectionErrorReason::InvalidStart { value } => {
                write!(f, "unparsable start time {value:?}")
            }
            DetectionErrorReason::InvalidEnd { value } => write!(f, "unparsable end time {value:?}"),
            DetectionErrorReason::MissingDuration => f.write_str("neither end time nor duration"),
            DetectionErrorReason::NonPositiveLength => f.write_str("end is not after start"),
        }
    }
}

/// A malformed appointment left out of a detection pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DetectionError {
    pub appointment_id: String,
    pub reason: DetectionErrorReason,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DetectionReport {
    pub conflicts: Vec<Conflict>,
    #[serde(default)]
    pub errors: Vec<DetectionError>,
}

impl DetectionReport {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn find(&self, conflict_id: &str) -> Option<&Conflict> {
        self.conflicts.iter().find(|conflict| conflict.id == conflict_id)
    }

}
