use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::{debug, warn};

use crate::error::AppResult;
use crate::models::conflict::{AfterHoursReason, AppointmentWindow, Conflict, ConflictDetail, ConflictType};
use crate::models::constraints::WorkingConstraints;
use crate::models::solution::{
    AlternativeTime, ChangeAction, ProposedChange, Solution, SolutionType,
};
use crate::services::schedule_utils;
use crate::services::scoring::{clamp_confidence, HeuristicScoring, ScoringPolicy};

const ALTERNATIVE_STEP_MINUTES: i64 = 15;
const ALTERNATIVE_CONFIDENCE_DECAY: f32 = 0.1;
const DEFAULT_ALTERNATIVE_SLOTS: usize = 3;

/// Everything a strategy may consult besides the conflict itself.
pub struct StrategyContext<'a> {
    pub constraints: &'a WorkingConstraints,
    pub scoring: &'a dyn ScoringPolicy,
    pub alternative_slots: usize,
}

impl StrategyContext<'_> {
    fn draft(
        &self,
        conflict_type: ConflictType,
        solution_type: SolutionType,
        description: String,
        changes: Vec<ProposedChange>,
    ) -> Solution {
        let score = self.scoring.score(conflict_type, solution_type);
        let mut affected = Vec::new();
        for change in &changes {
            if !affected.contains(&change.appointment_id) {
                affected.push(change.appointment_id.clone());
            }
        }

        Solution {
            id: String::new(),
            solution_type,
            description,
            confidence: clamp_confidence(score.confidence),
            impact: score.impact,
            affected_appointments: affected,
            proposed_changes: changes,
            alternative_times: Vec::new(),
        }
    }

    /// Later starts on the same day, in fixed steps, that still fit the
    /// working window and stay clear of breaks.
    fn alternatives_after(
        &self,
        start: NaiveDateTime,
        duration_minutes: i64,
        confidence: f32,
    ) -> Vec<AlternativeTime> {
        let date = start.date();
        let closing = schedule_utils::at_time(date, self.constraints.working_hours.end);
        let mut alternatives = Vec::new();
        let mut step = 1;

        while alternatives.len() < self.alternative_slots {
            let candidate_start = start + Duration::minutes(ALTERNATIVE_STEP_MINUTES * step);
            let candidate_end = candidate_start + Duration::minutes(duration_minutes);
            let candidate_confidence = confidence - ALTERNATIVE_CONFIDENCE_DECAY * step as f32;
            if candidate_start.date() != date || candidate_end > closing || candidate_confidence <= 0.0 {
                break;
            }

            let hits_break = self.constraints.break_times.iter().any(|window| {
                schedule_utils::touches_break(
                    candidate_start,
                    candidate_end,
                    schedule_utils::at_time(date, window.start),
                    schedule_utils::at_time(date, window.end),
                )
            });
            if !hits_break {
                alternatives.push(AlternativeTime {
                    date,
                    time: candidate_start.time(),
                    confidence: clamp_confidence(candidate_confidence),
                });
            }
            step += 1;
        }

        alternatives
    }

    fn next_working_day(&self, after: NaiveDate) -> Option<NaiveDate> {
        (1..=7)
            .filter_map(|offset| after.checked_add_signed(Duration::days(offset)))
            .find(|date| self.constraints.is_working_day(schedule_utils::weekday_index(*date)))
    }
}

/// Produces candidate solutions for one kind of conflict.
pub trait ResolutionStrategy: Send + Sync {
    fn propose(&self, conflict: &Conflict, ctx: &StrategyContext<'_>) -> AppResult<Vec<Solution>>;
}

pub struct OverlapStrategy;

impl ResolutionStrategy for OverlapStrategy {
    fn propose(&self, conflict: &Conflict, ctx: &StrategyContext<'_>) -> AppResult<Vec<Solution>> {
        let ConflictDetail::Overlap { earlier, later, .. } = &conflict.detail else {
            return Ok(Vec::new());
        };
        let buffer = ctx.constraints.buffer_minutes;
        let mut solutions = Vec::new();

        let new_start = schedule_utils::add_minutes(earlier.end, buffer)?;
        let new_end = schedule_utils::add_minutes(new_start, later.duration_minutes())?;
        let mut reschedule = ctx.draft(
            conflict.conflict_type,
            SolutionType::Reschedule,
            format!(
                "Move appointment {} to {} so it starts {} min after appointment {} ends",
                later.appointment_id,
                schedule_utils::format_time_of_day(new_start.time()),
                buffer,
                earlier.appointment_id
            ),
            vec![ProposedChange::reschedule(&later.appointment_id, new_start, new_end)],
        );
        reschedule.alternative_times =
            ctx.alternatives_after(new_start, later.duration_minutes(), reschedule.confidence);
        solutions.push(reschedule);

        let shortened_end = schedule_utils::add_minutes(later.start, -buffer)?;
        if shortened_end > earlier.start {
            solutions.push(ctx.draft(
                conflict.conflict_type,
                SolutionType::ExtendGap,
                format!(
                    "Shorten appointment {} to end at {} leaving a {} min buffer",
                    earlier.appointment_id,
                    schedule_utils::format_time_of_day(shortened_end.time()),
                    buffer
                ),
                vec![ProposedChange {
                    appointment_id: earlier.appointment_id.clone(),
                    new_start: None,
                    new_end: Some(shortened_end),
                    new_date: None,
                    action: ChangeAction::Modify,
                }],
            ));
        }

        Ok(solutions)
    }
}

pub struct InsufficientGapStrategy;

impl ResolutionStrategy for InsufficientGapStrategy {
    fn propose(&self, conflict: &Conflict, ctx: &StrategyContext<'_>) -> AppResult<Vec<Solution>> {
        let ConflictDetail::InsufficientGap {
            later,
            shortfall_minutes,
            ..
        } = &conflict.detail
        else {
            return Ok(Vec::new());
        };

        let new_start = schedule_utils::add_minutes(later.start, *shortfall_minutes)?;
        let new_end = schedule_utils::add_minutes(later.end, *shortfall_minutes)?;
        Ok(vec![ctx.draft(
            conflict.conflict_type,
            SolutionType::ExtendGap,
            format!(
                "Push appointment {} back {} min to {}",
                later.appointment_id,
                shortfall_minutes,
                schedule_utils::format_time_of_day(new_start.time())
            ),
            vec![ProposedChange::reschedule(&later.appointment_id, new_start, new_end)],
        )])
    }
}

pub struct AfterHoursStrategy;

impl AfterHoursStrategy {
    fn target_time(
        appointment: &AppointmentWindow,
        reason: &AfterHoursReason,
        constraints: &WorkingConstraints,
    ) -> Option<NaiveTime> {
        let original = appointment.start.time();
        match reason {
            AfterHoursReason::NonWorkingDay { .. } => Some(original),
            AfterHoursReason::OutsideWorkingHours => {
                let opening = constraints.working_hours.start;
                let closing = constraints.working_hours.end;
                let duration = Duration::minutes(appointment.duration_minutes());
                let fits = |time: NaiveTime| {
                    let (end, wrapped) = time.overflowing_add_signed(duration);
                    wrapped == 0 && time >= opening && end <= closing
                };
                if fits(original) {
                    Some(original)
                } else if fits(opening) {
                    Some(opening)
                } else {
                    None
                }
            }
        }
    }
}

impl ResolutionStrategy for AfterHoursStrategy {
    fn propose(&self, conflict: &Conflict, ctx: &StrategyContext<'_>) -> AppResult<Vec<Solution>> {
        let ConflictDetail::AfterHours {
            appointment,
            reason,
            ..
        } = &conflict.detail
        else {
            return Ok(Vec::new());
        };

        let Some(date) = ctx.next_working_day(appointment.start.date()) else {
            return Ok(Vec::new());
        };
        let Some(time) = Self::target_time(appointment, reason, ctx.constraints) else {
            return Ok(Vec::new());
        };

        let new_start = schedule_utils::at_time(date, time);
        let new_end = schedule_utils::add_minutes(new_start, appointment.duration_minutes())?;
        Ok(vec![ctx.draft(
            conflict.conflict_type,
            SolutionType::MoveToAnotherDay,
            format!(
                "Move appointment {} to {} at {}",
                appointment.appointment_id,
                date,
                schedule_utils::format_time_of_day(time)
            ),
            vec![ProposedChange {
                appointment_id: appointment.appointment_id.clone(),
                new_start: Some(new_start),
                new_end: Some(new_end),
                new_date: Some(date),
                action: ChangeAction::Reschedule,
            }],
        )])
    }
}

pub struct BreakConflictStrategy;

impl ResolutionStrategy for BreakConflictStrategy {
    fn propose(&self, conflict: &Conflict, ctx: &StrategyContext<'_>) -> AppResult<Vec<Solution>> {
        let ConflictDetail::BreakConflict {
            appointment,
            break_window,
            ..
        } = &conflict.detail
        else {
            return Ok(Vec::new());
        };

        let new_start = schedule_utils::at_time(appointment.start.date(), break_window.end);
        let new_end = schedule_utils::add_minutes(new_start, appointment.duration_minutes())?;
        let mut solution = ctx.draft(
            conflict.conflict_type,
            SolutionType::Reschedule,
            format!(
                "Start appointment {} at {} right after the break",
                appointment.appointment_id,
                schedule_utils::format_time_of_day(break_window.end)
            ),
            vec![ProposedChange::reschedule(&appointment.appointment_id, new_start, new_end)],
        );
        solution.alternative_times =
            ctx.alternatives_after(new_start, appointment.duration_minutes(), solution.confidence);
        Ok(vec![solution])
    }
}

pub struct DoubleBookingStrategy;

impl ResolutionStrategy for DoubleBookingStrategy {
    fn propose(&self, conflict: &Conflict, ctx: &StrategyContext<'_>) -> AppResult<Vec<Solution>> {
        let ConflictDetail::DoubleBooking { bookings, .. } = &conflict.detail else {
            return Ok(Vec::new());
        };
        let Some((kept, displaced)) = bookings.split_first() else {
            return Ok(Vec::new());
        };

        let new_start = schedule_utils::add_minutes(kept.end, ctx.constraints.buffer_minutes)?;
        let mut solutions = Vec::new();
        for booking in displaced {
            let new_end = schedule_utils::add_minutes(new_start, booking.duration_minutes())?;
            let mut solution = ctx.draft(
                conflict.conflict_type,
                SolutionType::Reschedule,
                format!(
                    "Keep appointment {} and move duplicate {} to {}",
                    kept.appointment_id,
                    booking.appointment_id,
                    schedule_utils::format_time_of_day(new_start.time())
                ),
                vec![ProposedChange::reschedule(&booking.appointment_id, new_start, new_end)],
            );
            solution.alternative_times =
                ctx.alternatives_after(new_start, booking.duration_minutes(), solution.confidence);
            solutions.push(solution);
        }

        for booking in displaced {
            solutions.push(ctx.draft(
                conflict.conflict_type,
                SolutionType::Cancel,
                format!(
                    "Cancel duplicate appointment {} and keep {}",
                    booking.appointment_id, kept.appointment_id
                ),
                vec![ProposedChange::cancel(&booking.appointment_id)],
            ));
        }

        Ok(solutions)
    }
}

fn default_strategy(kind: ConflictType) -> Box<dyn ResolutionStrategy> {
    match kind {
        ConflictType::Overlap => Box::new(OverlapStrategy),
        ConflictType::InsufficientGap => Box::new(InsufficientGapStrategy),
        ConflictType::DoubleBooking => Box::new(DoubleBookingStrategy),
        ConflictType::AfterHours => Box::new(AfterHoursStrategy),
        ConflictType::BreakConflict => Box::new(BreakConflictStrategy),
    }
}

/// Dispatches conflicts to the strategy registered for their type.
pub struct SolutionGenerator {
    strategies: HashMap<ConflictType, Box<dyn ResolutionStrategy>>,
    scoring: Arc<dyn ScoringPolicy>,
    alternative_slots: usize,
}

impl Default for SolutionGenerator {
    fn default() -> Self {
        Self::with_scoring(Arc::new(HeuristicScoring))
    }
}

impl SolutionGenerator {
    pub fn with_scoring(scoring: Arc<dyn ScoringPolicy>) -> Self {
        let strategies = ConflictType::ALL
            .iter()
            .map(|kind| (*kind, default_strategy(*kind)))
            .collect();
        Self {
            strategies,
            scoring,
            alternative_slots: DEFAULT_ALTERNATIVE_SLOTS,
        }
    }

    pub fn with_alternative_slots(mut self, slots: usize) -> Self {
        self.alternative_slots = slots;
        self
    }

    /// Replaces the strategy for one conflict type, returning the previous one.
    pub fn register(
        &mut self,
        kind: ConflictType,
        strategy: Box<dyn ResolutionStrategy>,
    ) -> Option<Box<dyn ResolutionStrategy>> {
        self.strategies.insert(kind, strategy)
    }

    pub fn propose(&self, conflict: &Conflict, constraints: &WorkingConstraints) -> Vec<Solution> {
        let Some(strategy) = self.strategies.get(&conflict.conflict_type) else {
            warn!(target: "app::solutions", conflict_type = %conflict.conflict_type, "no strategy registered");
            return Vec::new();
        };

        let ctx = StrategyContext {
            constraints,
            scoring: self.scoring.as_ref(),
            alternative_slots: self.alternative_slots,
        };

        let drafts = match strategy.propose(conflict, &ctx) {
            Ok(drafts) => drafts,
            Err(error) => {
                warn!(
                    target: "app::solutions",
                    conflict_id = %conflict.id,
                    error = %error,
                    "strategy failed; conflict left without solutions"
                );
                return Vec::new();
            }
        };

        let solutions: Vec<Solution> = drafts
            .into_iter()
            .filter(Solution::is_well_formed)
            .enumerate()
            .map(|(idx, mut solution)| {
                solution.id = format!("{}-{}-{}", conflict.id, solution.solution_type, idx + 1);
                solution
            })
            .collect();

        debug!(
            target: "app::solutions",
            conflict_id = %conflict.id,
            solutions = solutions.len(),
            "solutions proposed"
        );
        solutions
    }
}

/// Regenerates candidates for one conflict with the default scoring.
pub fn propose_solutions(conflict: &Conflict, constraints: &WorkingConstraints) -> Vec<Solution> {
    SolutionGenerator::default().propose(conflict, constraints)
}
