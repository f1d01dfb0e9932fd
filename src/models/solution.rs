use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::models::constraints::time_of_day;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SolutionType {
    Reschedule,
    ExtendGap,
    Cancel,
    MoveToAnotherDay,
    SplitAppointment,
    Delegate,
}

impl SolutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolutionType::Reschedule => "reschedule",
            SolutionType::ExtendGap => "extend_gap",
            SolutionType::Cancel => "cancel",
            SolutionType::MoveToAnotherDay => "move_to_another_day",
            SolutionType::SplitAppointment => "split_appointment",
            SolutionType::Delegate => "delegate",
        }
    }
}

impl fmt::Display for SolutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SolutionImpact {
    Minimal,
    Moderate,
    Significant,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Reschedule,
    Cancel,
    Modify,
    Split,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Reschedule => "reschedule",
            ChangeAction::Cancel => "cancel",
            ChangeAction::Modify => "modify",
            ChangeAction::Split => "split",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProposedChange {
    pub appointment_id: String,
    #[serde(default)]
    pub new_start: Option<NaiveDateTime>,
    #[serde(default)]
    pub new_end: Option<NaiveDateTime>,
    #[serde(default)]
    pub new_date: Option<NaiveDate>,
    pub action: ChangeAction,
}

impl ProposedChange {
    pub fn reschedule(appointment_id: impl Into<String>, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            appointment_id: appointment_id.into(),
            new_start: Some(start),
            new_end: Some(end),
            new_date: None,
            action: ChangeAction::Reschedule,
        }
    }

    pub fn cancel(appointment_id: impl Into<String>) -> Self {
        Self {
            appointment_id: appointment_id.into(),
            new_start: None,
            new_end: None,
            new_date: None,
            action: ChangeAction::Cancel,
        }
    }

    /// Two changes collide when they target the same appointment but disagree.
    pub fn collides_with(&self, other: &ProposedChange) -> bool {
        self.appointment_id == other.appointment_id && self != other
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlternativeTime {
    pub date: NaiveDate,
    #[serde(with = "time_of_day")]
    pub time: NaiveTime,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Solution {
    pub id: String,
    pub solution_type: SolutionType,
    pub description: String,
    pub confidence: f32,
    pub impact: SolutionImpact,
    pub affected_appointments: Vec<String>,
    pub proposed_changes: Vec<ProposedChange>,
    #[serde(default)]
    pub alternative_times: Vec<AlternativeTime>,
}

impl Solution {
    /// Confidence stays in `[0, 1]` and every change targets an affected appointment.
    pub fn is_well_formed(&self) -> bool {
        (0.0..=1.0).contains(&self.confidence)
            && self.proposed_changes.iter().all(|change| {
                self.affected_appointments
                    .iter()
                    .any(|id| *id == change.appointment_id)
            })
    }
}
