use crate::models::conflict::{AfterHoursReason, ConflictDetail, ConflictSeverity};

const OVERLAP_CRITICAL_MINUTES: i64 = 30;
const OVERLAP_HIGH_MINUTES: i64 = 15;
const GAP_MEDIUM_SHORTFALL_MINUTES: i64 = 10;

/// Severity is a pure function of conflict type and measured magnitude.
pub fn classify(detail: &ConflictDetail) -> ConflictSeverity {
    match detail {
        ConflictDetail::Overlap {
            overlap_minutes, ..
        } => overlap_severity(*overlap_minutes),
        ConflictDetail::InsufficientGap {
            shortfall_minutes,
            ..
        } => gap_severity(*shortfall_minutes),
        ConflictDetail::DoubleBooking { .. } => ConflictSeverity::Critical,
        ConflictDetail::AfterHours { reason, .. } => after_hours_severity(reason),
        ConflictDetail::BreakConflict { .. } => ConflictSeverity::Medium,
    }
}

/// Half an hour or more of double-occupied chair time is critical.
pub fn overlap_severity(overlap_minutes: i64) -> ConflictSeverity {
    if overlap_minutes >= OVERLAP_CRITICAL_MINUTES {
        ConflictSeverity::Critical
    } else if overlap_minutes > OVERLAP_HIGH_MINUTES {
        ConflictSeverity::High
    } else {
        ConflictSeverity::Medium
    }
}

pub fn gap_severity(shortfall_minutes: i64) -> ConflictSeverity {
    if shortfall_minutes > GAP_MEDIUM_SHORTFALL_MINUTES {
        ConflictSeverity::Medium
    } else {
        ConflictSeverity::Low
    }
}

pub fn after_hours_severity(reason: &AfterHoursReason) -> ConflictSeverity {
    match reason {
        AfterHoursReason::NonWorkingDay { .. } => ConflictSeverity::High,
        AfterHoursReason::OutsideWorkingHours => ConflictSeverity::Medium,
    }
}
