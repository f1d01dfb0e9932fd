use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::appointment::AppointmentStatus;
use crate::models::conflict::{ConflictStatus, TimeRange};
use crate::models::solution::{ChangeAction, Solution};

/// Chosen solution per conflict id, owned by the caller until apply.
pub type ResolutionSelections = BTreeMap<String, Solution>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppliedChange {
    pub conflict_id: String,
    pub appointment_id: String,
    pub action: ChangeAction,
    #[serde(default)]
    pub previous_start_at: Option<String>,
    #[serde(default)]
    pub previous_end_at: Option<String>,
    #[serde(default)]
    pub new_start_at: Option<String>,
    #[serde(default)]
    pub new_end_at: Option<String>,
    #[serde(default)]
    pub new_status: Option<AppointmentStatus>,
    /// Time cut off by a split, left for the caller to rebook.
    #[serde(default)]
    pub detached_remainder: Option<TimeRange>,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[serde(rename_all = "camelCase")]
    VersionConflict { expected: i64, actual: Option<i64> },
    NotFound,
    #[serde(rename_all = "camelCase")]
    Store { message: String },
    #[serde(rename_all = "camelCase")]
    Timeout { elapsed_ms: u64 },
    /// The change cannot be applied to the record as it currently stands.
    #[serde(rename_all = "camelCase")]
    InvalidChange { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::VersionConflict { expected, actual } => match actual {
                Some(actual) => write!(f, "stale version: expected {expected}, found {actual}"),
                None => write!(f, "stale version: expected {expected}"),
            },
            FailureReason::NotFound => f.write_str("appointment no longer exists"),
            FailureReason::Store { message } => write!(f, "store rejected update: {message}"),
            FailureReason::Timeout { elapsed_ms } => {
                write!(f, "apply timed out after {elapsed_ms}ms")
            }
            FailureReason::InvalidChange { message } => write!(f, "invalid change: {message}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetail {
    #[serde(default)]
    pub conflict_id: Option<String>,
    #[serde(default)]
    pub appointment_id: Option<String>,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Resolved,
    ResolutionFailed,
}

/// What an apply did. On failure `applied` is empty and every change that
/// had been written is listed in `rolled_back`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionOutcome {
    pub status: ResolutionStatus,
    pub applied: Vec<AppliedChange>,
    #[serde(default)]
    pub rolled_back: Vec<AppliedChange>,
    #[serde(default)]
    pub failed: Vec<FailureDetail>,
    /// Restores that did not go through; non-empty means manual attention.
    #[serde(default)]
    pub rollback_errors: Vec<FailureDetail>,
    pub conflict_statuses: BTreeMap<String, ConflictStatus>,
}

impl ResolutionOutcome {
    pub fn is_resolved(&self) -> bool {
        self.status == ResolutionStatus::Resolved
    }
}
