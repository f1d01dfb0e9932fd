mod support;

use chrono::NaiveDateTime;

use schedule_guard::error::AppResult;
use schedule_guard::models::appointment::Appointment;
use schedule_guard::models::conflict::{ConflictDetail, ConflictSeverity, ConflictType};
use schedule_guard::models::constraints::DailyWindow;
use schedule_guard::models::solution::{ChangeAction, SolutionType};
use schedule_guard::services::schedule_utils;
use schedule_guard::{detect_conflicts, propose_solutions};

use support::*;

fn span(appointment: &Appointment) -> (NaiveDateTime, NaiveDateTime) {
    let start = schedule_utils::parse_datetime(appointment.start_at.as_deref().expect("start"))
        .expect("parse start");
    let minutes = appointment.duration_minutes.expect("duration");
    (start, schedule_utils::add_minutes(start, minutes).expect("end"))
}

#[test]
fn well_spaced_day_has_no_conflicts() -> AppResult<()> {
    let mut constraints = weekday_hours(15);
    constraints.break_times = vec![DailyWindow::new(hm(12, 0), hm(13, 0))];

    let mut other_chair = booking("e", "2024-01-15T09:00", 45);
    other_chair.barber_id = "barber-2".to_string();
    let appointments = vec![
        booking("a", "2024-01-15T09:00", 45),
        booking("b", "2024-01-15T10:00", 60),
        booking("c", "2024-01-15T11:15", 45),
        booking("d", "2024-01-15T13:00", 60),
        other_chair,
    ];

    let report = detect_conflicts(&appointments, &constraints)?;
    assert!(report.is_clean(), "unexpected conflicts: {:?}", report.conflicts);
    assert!(report.errors.is_empty());
    Ok(())
}

#[test]
fn fifteen_minute_overlap_stays_medium() -> AppResult<()> {
    let appointments = vec![
        booking("a", "2024-01-15T10:00", 45),
        booking("b", "2024-01-15T10:30", 60),
    ];
    let report = detect_conflicts(&appointments, &weekday_hours(0))?;

    assert_eq!(report.conflicts.len(), 1);
    let conflict = &report.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::Overlap);
    assert_eq!(conflict.severity, ConflictSeverity::Medium);
    match &conflict.detail {
        ConflictDetail::Overlap { overlap_minutes, .. } => assert_eq!(*overlap_minutes, 15),
        other => panic!("unexpected detail {other:?}"),
    }
    Ok(())
}

#[test]
fn ten_minute_shortfall_stays_low() -> AppResult<()> {
    let appointments = vec![
        booking("a", "2024-01-15T10:00", 45),
        booking("b", "2024-01-15T10:50", 30),
    ];
    let report = detect_conflicts(&appointments, &weekday_hours(15))?;

    assert_eq!(report.conflicts.len(), 1);
    let conflict = &report.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::InsufficientGap);
    assert_eq!(conflict.severity, ConflictSeverity::Low);
    match &conflict.detail {
        ConflictDetail::InsufficientGap {
            shortfall_minutes, ..
        } => assert_eq!(*shortfall_minutes, 10),
        other => panic!("unexpected detail {other:?}"),
    }
    Ok(())
}

#[test]
fn same_client_same_start_is_critical() -> AppResult<()> {
    let mut first = booking("1", "2024-01-15T14:00", 30);
    let mut second = booking("2", "2024-01-15T14:00", 30);
    first.client_identity = "ana@mail.test".to_string();
    second.client_identity = "ana@mail.test".to_string();
    second.barber_id = "barber-2".to_string();

    let report = detect_conflicts(&[first, second], &weekday_hours(10))?;
    let doubles: Vec<_> = report
        .conflicts
        .iter()
        .filter(|conflict| conflict.conflict_type == ConflictType::DoubleBooking)
        .collect();
    assert_eq!(doubles.len(), 1);
    assert_eq!(doubles[0].severity, ConflictSeverity::Critical);
    assert_eq!(doubles[0].affected_appointments.len(), 2);
    Ok(())
}

#[test]
fn redetection_is_deterministic() -> AppResult<()> {
    let mut constraints = weekday_hours(15);
    constraints.break_times = vec![DailyWindow::new(hm(12, 0), hm(12, 30))];
    let appointments = vec![
        booking("a", "2024-01-13T09:00", 60),
        booking("b", "2024-01-15T09:30", 30),
        booking("c", "2024-01-15T09:00", 60),
        booking("d", "2024-01-15T11:50", 30),
    ];

    let first = detect_conflicts(&appointments, &constraints)?;
    let second = detect_conflicts(&appointments, &constraints)?;
    let shape = |report: &schedule_guard::models::conflict::DetectionReport| {
        report
            .conflicts
            .iter()
            .map(|c| (c.id.clone(), c.conflict_type, c.severity))
            .collect::<Vec<_>>()
    };
    assert!(!first.conflicts.is_empty());
    assert_eq!(shape(&first), shape(&second));
    Ok(())
}

#[test]
fn thirty_minute_overlap_moves_second_booking_to_ten_fifteen() -> AppResult<()> {
    let appointments = vec![
        booking("1", "2024-01-15T09:00", 60),
        booking("2", "2024-01-15T09:30", 30),
    ];
    let report = detect_conflicts(&appointments, &weekday_hours(15))?;

    assert_eq!(report.conflicts.len(), 1);
    let conflict = &report.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::Overlap);
    assert_eq!(conflict.severity, ConflictSeverity::Critical);
    assert!(matches!(
        conflict.detail,
        ConflictDetail::Overlap { overlap_minutes: 30, .. }
    ));

    let moves_to_ten_fifteen = conflict.candidate_solutions.iter().any(|solution| {
        solution.solution_type == SolutionType::Reschedule
            && solution.proposed_changes.iter().any(|change| {
                change.appointment_id == "2"
                    && change.action == ChangeAction::Reschedule
                    && change.new_start == Some(at(15, 10, 15))
            })
    });
    assert!(moves_to_ten_fifteen);

    assert_eq!(
        propose_solutions(conflict, &weekday_hours(15)),
        conflict.candidate_solutions
    );
    Ok(())
}

#[test]
fn every_conflict_and_solution_keeps_its_invariants() -> AppResult<()> {
    let mut constraints = weekday_hours(10);
    constraints.break_times = vec![DailyWindow::new(hm(12, 0), hm(13, 0))];
    let mut twin = booking("g", "2024-01-16T09:00", 30);
    twin.client_identity = "client-f".to_string();
    twin.barber_id = "barber-2".to_string();
    let appointments = vec![
        booking("a", "2024-01-15T09:00", 90),
        booking("b", "2024-01-15T10:00", 30),
        booking("c", "2024-01-15T10:35", 30),
        booking("d", "2024-01-15T11:45", 60),
        booking("e", "2024-01-15T16:30", 60),
        booking("f", "2024-01-16T09:00", 30),
        twin,
        booking("h", "2024-01-14T10:00", 30),
    ];
    let by_id = |id: &str| {
        appointments
            .iter()
            .find(|appointment| appointment.id == id)
            .map(span)
            .expect("known appointment")
    };

    let report = detect_conflicts(&appointments, &constraints)?;
    let kinds: std::collections::BTreeSet<_> =
        report.conflicts.iter().map(|c| c.conflict_type).collect();
    assert_eq!(kinds.len(), ConflictType::ALL.len());

    for pair in report.conflicts.windows(2) {
        assert!(pair[0].severity >= pair[1].severity);
    }

    for conflict in &report.conflicts {
        assert!(!conflict.affected_appointments.is_empty());
        let earliest = conflict
            .affected_appointments
            .iter()
            .map(|id| by_id(id).0)
            .min()
            .expect("start");
        let latest = conflict
            .affected_appointments
            .iter()
            .map(|id| by_id(id).1)
            .max()
            .expect("end");
        match conflict.conflict_type {
            ConflictType::InsufficientGap => {}
            _ => {
                assert!(conflict.time_range.start >= earliest, "{}", conflict.description);
                assert!(conflict.time_range.end <= latest, "{}", conflict.description);
            }
        }

        assert!(conflict
            .candidate_solutions
            .iter()
            .all(|solution| solution.is_well_formed()));
    }
    Ok(())
}

#[test]
fn malformed_records_are_reported_not_fatal() -> AppResult<()> {
    let mut no_start = booking("x", "2024-01-15T09:00", 30);
    no_start.start_at = None;
    let mut no_length = booking("y", "2024-01-15T09:00", 30);
    no_length.duration_minutes = None;
    let appointments = vec![
        no_start,
        no_length,
        booking("1", "2024-01-15T09:00", 60),
        booking("2", "2024-01-15T09:30", 30),
    ];

    let report = detect_conflicts(&appointments, &weekday_hours(15))?;
    assert_eq!(report.conflicts.len(), 1);
    let excluded: Vec<&str> = report
        .errors
        .iter()
        .map(|error| error.appointment_id.as_str())
        .collect();
    assert_eq!(excluded, vec!["x", "y"]);
    Ok(())
}
