use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, info};

use crate::error::AppResult;
use crate::models::appointment::{Appointment, ResourceKey};
use crate::models::constraints::WorkingConstraints;
use crate::models::optimization::{
    DayUtilization, OptimizationReport, OptimizationSuggestion, SuggestionKind,
};
use crate::models::settings::EngineSettings;
use crate::services::conflict_detector::resolve_times;
use crate::services::schedule_utils;

const EXTEND_HOURS_PERCENT: f64 = 95.0;
const REVIEW_BREAKS_MIN_DAYS: usize = 2;

type DayKey = (ResourceKey, NaiveDate);

/// Utilisation metrics and advisory suggestions. Read-only: it never
/// touches conflicts or the store.
#[derive(Debug, Clone, Default)]
pub struct OptimizationAdvisor {
    settings: EngineSettings,
}

impl OptimizationAdvisor {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    pub fn analyze(
        &self,
        appointments: &[Appointment],
        constraints: &WorkingConstraints,
    ) -> AppResult<OptimizationReport> {
        constraints.validate()?;
        self.settings.validate()?;

        let mut days: BTreeMap<DayKey, Vec<(NaiveDateTime, NaiveDateTime)>> = BTreeMap::new();
        for appointment in appointments.iter().filter(|a| a.status.holds_time()) {
            // Malformed records are the detector's business.
            let Ok((start, end)) = resolve_times(appointment) else {
                continue;
            };
            days.entry((appointment.resource(), start.date()))
                .or_default()
                .push((start, end));
        }

        let mut daily = Vec::with_capacity(days.len());
        let mut break_days: BTreeMap<(ResourceKey, usize), BTreeSet<NaiveDate>> = BTreeMap::new();

        for ((resource, date), mut spans) in days {
            spans.sort();
            let merged = merge_spans(&spans);
            let day = self.day_utilization(&resource, date, &merged, constraints);

            for (index, window) in constraints.break_times.iter().enumerate() {
                let break_start = schedule_utils::at_time(date, window.start);
                let break_end = schedule_utils::at_time(date, window.end);
                if spans
                    .iter()
                    .any(|(start, end)| schedule_utils::touches_break(*start, *end, break_start, break_end))
                {
                    break_days
                        .entry((resource.clone(), index))
                        .or_default()
                        .insert(date);
                }
            }

            daily.push(day);
        }

        let booked: i64 = daily.iter().map(|day| day.booked_minutes).sum();
        let available: i64 = daily.iter().map(|day| day.available_minutes).sum();
        let minutes_reclaimable = daily.iter().map(|day| day.reclaimable_minutes).sum();

        let mut suggestions = Vec::new();
        for day in &daily {
            suggestions.extend(self.day_suggestions(day));
        }
        for ((resource, index), dates) in &break_days {
            if dates.len() < REVIEW_BREAKS_MIN_DAYS {
                continue;
            }
            let window = &constraints.break_times[*index];
            suggestions.push(OptimizationSuggestion {
                kind: SuggestionKind::ReviewBreaks,
                message: format!(
                    "Bookings for {} ran into the {}-{} break on {} days; consider moving it",
                    resource,
                    schedule_utils::format_time_of_day(window.start),
                    schedule_utils::format_time_of_day(window.end),
                    dates.len()
                ),
                resource: Some(resource.clone()),
                date: None,
                minutes: Some(window.minutes()),
            });
        }

        let report = OptimizationReport {
            minutes_reclaimable,
            utilization_percent: percent(booked, available),
            suggestions,
            daily,
            degraded: false,
            degraded_reason: None,
        };

        info!(
            target: "app::optimizer",
            days = report.daily.len(),
            utilization = report.utilization_percent,
            reclaimable = report.minutes_reclaimable,
            suggestions = report.suggestions.len(),
            "optimization analysis finished"
        );
        Ok(report)
    }

    fn day_utilization(
        &self,
        resource: &ResourceKey,
        date: NaiveDate,
        merged: &[(NaiveDateTime, NaiveDateTime)],
        constraints: &WorkingConstraints,
    ) -> DayUtilization {
        let opening = schedule_utils::at_time(date, constraints.working_hours.start);
        let closing = schedule_utils::at_time(date, constraints.working_hours.end);

        let booked_minutes = merged
            .iter()
            .map(|(start, end)| schedule_utils::overlap_minutes(*start, *end, opening, closing))
            .sum();
        let available_minutes = if constraints.is_working_day(schedule_utils::weekday_index(date)) {
            constraints.working_minutes_per_day()
        } else {
            0
        };

        // Idle time past the buffer that is too short to sell.
        let reclaimable_minutes = merged
            .windows(2)
            .map(|pair| schedule_utils::gap_minutes(pair[0].1, pair[1].0))
            .filter(|gap| {
                *gap > constraints.buffer_minutes && *gap < self.settings.fragment_threshold_minutes
            })
            .map(|gap| gap - constraints.buffer_minutes)
            .sum();

        debug!(
            target: "app::optimizer",
            resource = %resource,
            %date,
            booked_minutes,
            available_minutes,
            reclaimable_minutes,
            "day analysed"
        );

        DayUtilization {
            resource: resource.clone(),
            date,
            booked_minutes,
            available_minutes,
            utilization_percent: percent(booked_minutes, available_minutes),
            reclaimable_minutes,
        }
    }

    fn day_suggestions(&self, day: &DayUtilization) -> Vec<OptimizationSuggestion> {
        let mut suggestions = Vec::new();
        if day.available_minutes == 0 {
            return suggestions;
        }

        if day.booked_minutes > 0 && day.utilization_percent < self.settings.low_utilization_percent {
            suggestions.push(OptimizationSuggestion {
                kind: SuggestionKind::ConsolidateDay,
                message: format!(
                    "{} is only {:.1}% booked on {}; consider consolidating its appointments",
                    day.resource, day.utilization_percent, day.date
                ),
                resource: Some(day.resource.clone()),
                date: Some(day.date),
                minutes: Some(day.available_minutes - day.booked_minutes),
            });
        }
        if day.reclaimable_minutes > 0 {
            suggestions.push(OptimizationSuggestion {
                kind: SuggestionKind::CloseGaps,
                message: format!(
                    "{} min of short idle gaps for {} on {} could be closed up",
                    day.reclaimable_minutes, day.resource, day.date
                ),
                resource: Some(day.resource.clone()),
                date: Some(day.date),
                minutes: Some(day.reclaimable_minutes),
            });
        }
        if day.utilization_percent > EXTEND_HOURS_PERCENT {
            suggestions.push(OptimizationSuggestion {
                kind: SuggestionKind::ExtendHours,
                message: format!(
                    "{} is {:.1}% booked on {}; longer hours would add capacity",
                    day.resource, day.utilization_percent, day.date
                ),
                resource: Some(day.resource.clone()),
                date: Some(day.date),
                minutes: None,
            });
        }
        suggestions
    }
}

/// Analysis with default engine settings.
pub fn analyze_optimization(
    appointments: &[Appointment],
    constraints: &WorkingConstraints,
) -> AppResult<OptimizationReport> {
    OptimizationAdvisor::default().analyze(appointments, constraints)
}

/// Collapses sorted spans so overlapping bookings are not counted twice.
fn merge_spans(sorted: &[(NaiveDateTime, NaiveDateTime)]) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let mut merged: Vec<(NaiveDateTime, NaiveDateTime)> = Vec::with_capacity(sorted.len());
    for &(start, end) in sorted {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

fn percent(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    let value = part as f64 / whole as f64 * 100.0;
    (value * 10.0).round() / 10.0
}
