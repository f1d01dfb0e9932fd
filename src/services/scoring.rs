use crate::models::conflict::ConflictType;
use crate::models::solution::{SolutionImpact, SolutionType};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolutionScore {
    pub confidence: f32,
    pub impact: SolutionImpact,
}

impl SolutionScore {
    pub const fn new(confidence: f32, impact: SolutionImpact) -> Self {
        Self { confidence, impact }
    }
}

/// Rates how acceptable a solution kind is for a conflict kind.
///
/// Implementations may draw on acceptance history; the engine only relies on
/// the returned confidence being clamped into `[0, 1]` before use.
pub trait ScoringPolicy: Send + Sync {
    fn score(&self, conflict: ConflictType, solution: SolutionType) -> SolutionScore;
}

/// Fixed per-kind constants.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScoring;

impl ScoringPolicy for HeuristicScoring {
    fn score(&self, conflict: ConflictType, solution: SolutionType) -> SolutionScore {
        use SolutionImpact::{Minimal, Moderate, Significant};

        match (conflict, solution) {
            (ConflictType::Overlap, SolutionType::Reschedule) => SolutionScore::new(0.9, Minimal),
            (ConflictType::Overlap, SolutionType::ExtendGap) => SolutionScore::new(0.7, Moderate),
            (ConflictType::InsufficientGap, SolutionType::ExtendGap) => {
                SolutionScore::new(0.8, Minimal)
            }
            (ConflictType::AfterHours, SolutionType::MoveToAnotherDay) => {
                SolutionScore::new(0.8, Moderate)
            }
            (ConflictType::BreakConflict, SolutionType::Reschedule) => {
                SolutionScore::new(0.9, Moderate)
            }
            (ConflictType::DoubleBooking, SolutionType::Reschedule) => {
                SolutionScore::new(0.9, Moderate)
            }
            (ConflictType::DoubleBooking, SolutionType::Cancel) => {
                SolutionScore::new(0.5, Significant)
            }
            (_, SolutionType::Cancel) => SolutionScore::new(0.3, Significant),
            (_, SolutionType::SplitAppointment) | (_, SolutionType::Delegate) => {
                SolutionScore::new(0.5, Moderate)
            }
            _ => SolutionScore::new(0.6, Moderate),
        }
    }
}

pub(crate) fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
