use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::AppResult;
use crate::models::appointment::{Appointment, ResourceKey};
use crate::models::conflict::{
    AfterHoursReason, AppointmentWindow, Conflict, ConflictDetail, ConflictStatus, ConflictType,
    DetectionError, DetectionErrorReason, DetectionReport, TimeRange,
};
use crate::models::constraints::WorkingConstraints;
use crate::services::schedule_utils;
use crate::services::severity;
use crate::services::solution_generator::SolutionGenerator;

/// An appointment whose times parsed cleanly.
#[derive(Debug, Clone)]
struct ScheduledAppointment<'a> {
    source: &'a Appointment,
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl ScheduledAppointment<'_> {
    fn window(&self) -> AppointmentWindow {
        AppointmentWindow {
            appointment_id: self.source.id.clone(),
            start: self.start,
            end: self.end,
            version: self.source.version,
        }
    }

    fn id(&self) -> &str {
        &self.source.id
    }
}

/// Scans a snapshot for scheduling conflicts and attaches candidate solutions.
///
/// Overlap and gap checks only ever compare appointments on the same
/// [`ResourceKey`]; the snapshot is partitioned before that pass. Working-day,
/// working-hour, break and double-booking checks apply to every appointment.
#[derive(Default)]
pub struct ConflictDetector {
    generator: SolutionGenerator,
}

impl ConflictDetector {
    pub fn new(generator: SolutionGenerator) -> Self {
        Self { generator }
    }

    pub fn generator(&self) -> &SolutionGenerator {
        &self.generator
    }

    pub fn detect(
        &self,
        appointments: &[Appointment],
        constraints: &WorkingConstraints,
    ) -> AppResult<DetectionReport> {
        constraints.validate()?;

        let (mut scheduled, errors) = normalize(appointments);
        scheduled.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id().cmp(b.id())));

        let mut details = Vec::new();
        details.extend(scan_adjacent(&scheduled, constraints));
        details.extend(scan_working_time(&scheduled, constraints));
        details.extend(scan_breaks(&scheduled, constraints));
        details.extend(scan_double_bookings(&scheduled));

        let mut conflicts: Vec<Conflict> = details
            .into_iter()
            .map(|(discriminator, detail, range)| self.build_conflict(&discriminator, detail, range, constraints))
            .collect();

        conflicts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.time_range.start.cmp(&b.time_range.start))
                .then_with(|| a.id.cmp(&b.id))
        });

        info!(
            target: "app::detector",
            appointments = appointments.len(),
            scanned = scheduled.len(),
            conflicts = conflicts.len(),
            excluded = errors.len(),
            "conflict detection finished"
        );

        Ok(DetectionReport { conflicts, errors })
    }

    fn build_conflict(
        &self,
        discriminator: &str,
        detail: ConflictDetail,
        time_range: TimeRange,
        constraints: &WorkingConstraints,
    ) -> Conflict {
        let conflict_type = detail.conflict_type();
        let affected_appointments = affected_ids(&detail);
        let mut conflict = Conflict {
            id: conflict_id(conflict_type, discriminator, &affected_appointments),
            conflict_type,
            severity: severity::classify(&detail),
            affected_appointments,
            time_range,
            description: describe(&detail),
            detail,
            candidate_solutions: Vec::new(),
            status: ConflictStatus::Detected,
        };

        conflict.candidate_solutions = self.generator.propose(&conflict, constraints);
        if !conflict.candidate_solutions.is_empty() {
            conflict.status = ConflictStatus::SolutionProposed;
        }

        debug!(
            target: "app::detector",
            conflict_id = %conflict.id,
            conflict_type = %conflict.conflict_type,
            severity = %conflict.severity,
            solutions = conflict.candidate_solutions.len(),
            "conflict detected"
        );
        conflict
    }
}

/// Runs a full detection pass with the default solution generator.
pub fn detect_conflicts(
    appointments: &[Appointment],
    constraints: &WorkingConstraints,
) -> AppResult<DetectionReport> {
    ConflictDetector::default().detect(appointments, constraints)
}

fn normalize(appointments: &[Appointment]) -> (Vec<ScheduledAppointment<'_>>, Vec<DetectionError>) {
    let mut scheduled = Vec::new();
    let mut errors = Vec::new();

    for appointment in appointments.iter().filter(|a| a.status.holds_time()) {
        match resolve_times(appointment) {
            Ok((start, end)) => scheduled.push(ScheduledAppointment {
                source: appointment,
                start,
                end,
            }),
            Err(reason) => {
                warn!(
                    target: "app::detector",
                    appointment_id = %appointment.id,
                    reason = %reason,
                    "appointment excluded from detection"
                );
                errors.push(DetectionError {
                    appointment_id: appointment.id.clone(),
                    reason,
                });
            }
        }
    }

    (scheduled, errors)
}

pub(crate) fn resolve_times(
    appointment: &Appointment,
) -> Result<(NaiveDateTime, NaiveDateTime), DetectionErrorReason> {
    let raw_start = appointment
        .start_at
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .ok_or(DetectionErrorReason::MissingStart)?;
    let start = schedule_utils::parse_datetime(raw_start).map_err(|_| {
        DetectionErrorReason::InvalidStart {
            value: raw_start.to_string(),
        }
    })?;

    let end = match (appointment.end_at.as_deref(), appointment.duration_minutes) {
        (Some(raw_end), _) if !raw_end.trim().is_empty() => schedule_utils::parse_datetime(raw_end)
            .map_err(|_| DetectionErrorReason::InvalidEnd {
                value: raw_end.to_string(),
            })?,
        (_, Some(minutes)) => schedule_utils::add_minutes(start, minutes)
            .map_err(|_| DetectionErrorReason::NonPositiveLength)?,
        _ => return Err(DetectionErrorReason::MissingDuration),
    };

    if end <= start {
        return Err(DetectionErrorReason::NonPositiveLength);
    }
    Ok((start, end))
}

type Finding = (String, ConflictDetail, TimeRange);

/// Pairs each appointment with the latest-ending earlier appointment on the
/// same resource. For timelines without nesting that is the direct predecessor.
fn scan_adjacent(
    scheduled: &[ScheduledAppointment<'_>],
    constraints: &WorkingConstraints,
) -> Vec<Finding> {
    let mut by_resource: BTreeMap<ResourceKey, Vec<&ScheduledAppointment<'_>>> = BTreeMap::new();
    for appointment in scheduled {
        by_resource
            .entry(appointment.source.resource())
            .or_default()
            .push(appointment);
    }

    let mut findings = Vec::new();
    for timeline in by_resource.values() {
        let Some((first, rest)) = timeline.split_first() else {
            continue;
        };
        let mut frontier = *first;

        for next in rest {
            let gap = schedule_utils::gap_minutes(frontier.end, next.start);
            if gap < 0 {
                // Measured against the frontier's end, so a booking swallowed
                // by a long one counts the whole remaining chair time.
                let overlap_minutes = -gap;
                let overlap_end = frontier.end.min(next.end);
                findings.push((
                    String::new(),
                    ConflictDetail::Overlap {
                        earlier: frontier.window(),
                        later: next.window(),
                        overlap_minutes,
                    },
                    TimeRange::new(next.start, overlap_end),
                ));
            } else if gap < constraints.buffer_minutes {
                findings.push((
                    String::new(),
                    ConflictDetail::InsufficientGap {
                        earlier: frontier.window(),
                        later: next.window(),
                        gap_minutes: gap,
                        shortfall_minutes: constraints.buffer_minutes - gap,
                    },
                    TimeRange::new(frontier.end, next.start),
                ));
            }

            if next.end > frontier.end {
                frontier = next;
            }
        }
    }

    findings
}

fn scan_working_time(
    scheduled: &[ScheduledAppointment<'_>],
    constraints: &WorkingConstraints,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    for appointment in scheduled {
        let date = appointment.start.date();
        let weekday = schedule_utils::weekday_index(date);
        let span = TimeRange::new(appointment.start, appointment.end);

        if !constraints.is_working_day(weekday) {
            findings.push((
                "day".to_string(),
                ConflictDetail::AfterHours {
                    appointment: appointment.window(),
                    reason: AfterHoursReason::NonWorkingDay { weekday },
                    working_hours: constraints.working_hours,
                },
                span,
            ));
        }

        let opening = schedule_utils::at_time(date, constraints.working_hours.start);
        let closing = schedule_utils::at_time(date, constraints.working_hours.end);
        if !schedule_utils::contains(opening, closing, appointment.start, appointment.end) {
            findings.push((
                "hours".to_string(),
                ConflictDetail::AfterHours {
                    appointment: appointment.window(),
                    reason: AfterHoursReason::OutsideWorkingHours,
                    working_hours: constraints.working_hours,
                },
                span,
            ));
        }
    }

    findings
}

fn scan_breaks(
    scheduled: &[ScheduledAppointment<'_>],
    constraints: &WorkingConstraints,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    for appointment in scheduled {
        let date = appointment.start.date();
        for (break_index, break_window) in constraints.break_times.iter().enumerate() {
            let break_start = schedule_utils::at_time(date, break_window.start);
            let break_end = schedule_utils::at_time(date, break_window.end);
            if !schedule_utils::touches_break(appointment.start, appointment.end, break_start, break_end) {
                continue;
            }

            let range = TimeRange::new(
                appointment.start.max(break_start),
                appointment.end.min(break_end),
            );
            findings.push((
                format!("break-{break_index}"),
                ConflictDetail::BreakConflict {
                    appointment: appointment.window(),
                    break_index,
                    break_window: *break_window,
                    overlap_minutes: range.minutes(),
                },
                range,
            ));
        }
    }

    findings
}

/// One finding per (client, start) group holding more than one booking.
/// Bookings without a client identity are walk-ins and never grouped.
fn scan_double_bookings(scheduled: &[ScheduledAppointment<'_>]) -> Vec<Finding> {
    let mut groups: BTreeMap<(&str, NaiveDateTime), Vec<&ScheduledAppointment<'_>>> = BTreeMap::new();
    for appointment in scheduled {
        let client = appointment.source.client_identity.trim();
        if client.is_empty() {
            continue;
        }
        groups.entry((client, appointment.start)).or_default().push(appointment);
    }

    groups
        .into_iter()
        .filter(|(_, bookings)| bookings.len() > 1)
        .map(|((client, start), mut bookings)| {
            bookings.sort_by(|a, b| a.id().cmp(b.id()));
            let latest_end = bookings
                .iter()
                .map(|booking| booking.end)
                .max()
                .unwrap_or(start);
            (
                String::new(),
                ConflictDetail::DoubleBooking {
                    client_identity: client.to_string(),
                    bookings: bookings.iter().map(|booking| booking.window()).collect(),
                },
                TimeRange::new(start, latest_end),
            )
        })
        .collect()
}

fn affected_ids(detail: &ConflictDetail) -> Vec<String> {
    detail
        .windows()
        .into_iter()
        .map(|window| window.appointment_id.clone())
        .collect()
}

/// Same type, discriminator and appointments always give the same id.
fn conflict_id(conflict_type: ConflictType, discriminator: &str, appointment_ids: &[String]) -> String {
    let mut ids: Vec<&str> = appointment_ids.iter().map(String::as_str).collect();
    ids.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(conflict_type.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(discriminator.as_bytes());
    for id in ids {
        hasher.update(b"|");
        hasher.update(id.as_bytes());
    }
    let digest = hasher.finalize();
    let short: String = digest.iter().take(8).map(|byte| format!("{byte:02x}")).collect();
    format!("conflict-{short}")
}

fn describe(detail: &ConflictDetail) -> String {
    match detail {
        ConflictDetail::Overlap {
            earlier,
            later,
            overlap_minutes,
        } => format!(
            "Appointment {} overlaps appointment {} by {} min",
            later.appointment_id, earlier.appointment_id, overlap_minutes
        ),
        ConflictDetail::InsufficientGap {
            earlier,
            later,
            gap_minutes,
            shortfall_minutes,
        } => format!(
            "Only {} min between appointments {} and {} ({} min short of the buffer)",
            gap_minutes, earlier.appointment_id, later.appointment_id, shortfall_minutes
        ),
        ConflictDetail::DoubleBooking {
            client_identity,
            bookings,
        } => format!(
            "Client {} holds {} bookings starting at the same time",
            client_identity,
            bookings.len()
        ),
        ConflictDetail::AfterHours {
            appointment,
            reason: AfterHoursReason::NonWorkingDay { .. },
            ..
        } => format!(
            "Appointment {} falls on a non-working day ({})",
            appointment.appointment_id,
            appointment.start.format("%A")
        ),
        ConflictDetail::AfterHours {
            appointment,
            working_hours,
            ..
        } => format!(
            "Appointment {} runs outside working hours {}-{}",
            appointment.appointment_id,
            schedule_utils::format_time_of_day(working_hours.start),
            schedule_utils::format_time_of_day(working_hours.end)
        ),
        ConflictDetail::BreakConflict {
            appointment,
            break_window,
            overlap_minutes,
            ..
        } => format!(
            "Appointment {} runs {} min into the {}-{} break",
            appointment.appointment_id,
            overlap_minutes,
            schedule_utils::format_time_of_day(break_window.start),
            schedule_utils::format_time_of_day(break_window.end)
        ),
    }
}
