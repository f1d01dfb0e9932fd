mod support;

use schedule_guard::error::{AppError, AppResult, SelectionError};
use schedule_guard::models::appointment::{AppointmentPatch, AppointmentStatus};
use schedule_guard::models::audit::AuditEvent;
use schedule_guard::models::conflict::{Conflict, ConflictSeverity, ConflictStatus, ConflictType};
use schedule_guard::models::resolution::{FailureReason, ResolutionSelections, ResolutionStatus};
use schedule_guard::models::settings::EngineSettings;
use schedule_guard::models::solution::SolutionType;
use schedule_guard::services::collaborators::AppointmentStore;
use schedule_guard::{detect_conflicts, ConflictService, ResolutionCoordinator};

use support::*;

#[tokio::test]
async fn overlap_is_resolved_by_rescheduling_the_later_booking() -> AppResult<()> {
    let db = setup_db();
    db.constraints.save(&resource(), &weekday_hours(15))?;
    db.store.insert(&booking("1", "2024-01-15T09:00", 60))?;
    db.store.insert(&booking("2", "2024-01-15T09:30", 30))?;

    let store = shared(db.store.clone());
    let audit = shared(RecordingAuditSink::default());
    let service = ConflictService::new(
        store.clone(),
        shared(db.constraints.clone()),
        store.clone(),
        audit.clone(),
        EngineSettings::default(),
    )?;

    let mut review = service.review(&resource(), at(15, 0, 0), at(16, 0, 0)).await?;
    assert_eq!(review.report.conflicts.len(), 1);
    let conflict = review.report.conflicts[0].clone();
    assert_eq!(conflict.conflict_type, ConflictType::Overlap);
    assert_eq!(conflict.severity, ConflictSeverity::Critical);
    assert_eq!(conflict.status, ConflictStatus::SolutionProposed);

    let reschedule = conflict
        .candidate_solutions
        .iter()
        .find(|solution| solution.solution_type == SolutionType::Reschedule)
        .cloned()
        .expect("reschedule offered");
    assert_eq!(reschedule.proposed_changes[0].appointment_id, "2");
    assert_eq!(reschedule.proposed_changes[0].new_start, Some(at(15, 10, 15)));

    let mut selections = ResolutionSelections::new();
    selections.insert(conflict.id.clone(), reschedule.clone());
    let outcome = service.apply_resolutions(&mut review, selections.clone()).await?;

    assert_eq!(outcome.status, ResolutionStatus::Resolved);
    assert_eq!(outcome.applied.len(), 1);
    assert_eq!(outcome.applied[0].new_start_at.as_deref(), Some("2024-01-15T10:15:00"));
    assert_eq!(outcome.conflict_statuses[&conflict.id], ConflictStatus::Resolved);
    assert_eq!(review.report.conflicts[0].status, ConflictStatus::Resolved);

    let moved = db.store.fetch_appointment("2").await?.expect("appointment 2");
    assert_eq!(moved.start_at.as_deref(), Some("2024-01-15T10:15:00"));
    assert_eq!(moved.end_at.as_deref(), Some("2024-01-15T10:45:00"));
    assert_eq!(moved.version, 2);

    // The review remembers the conflict is settled.
    let repeated = service.apply_resolutions(&mut review, selections).await;
    assert!(matches!(repeated, Err(AppError::Validation { .. })));
    let unchanged = db.store.fetch_appointment("2").await?.expect("appointment 2");
    assert_eq!(unchanged.version, 2);

    let second_pass = service.review(&resource(), at(15, 0, 0), at(16, 0, 0)).await?;
    assert!(second_pass.report.is_clean());

    assert_eq!(
        audit.names(),
        vec![
            "ConflictsDetected",
            "SolutionSelected",
            "ConflictsResolved",
            "ConflictsDetected"
        ]
    );
    Ok(())
}

#[tokio::test]
async fn record_changed_after_review_is_not_overwritten() -> AppResult<()> {
    let db = setup_db();
    db.constraints.save(&resource(), &weekday_hours(15))?;
    db.store.insert(&booking("1", "2024-01-15T09:00", 60))?;
    db.store.insert(&booking("2", "2024-01-15T09:30", 30))?;

    let store = shared(db.store.clone());
    let service = ConflictService::new(
        store.clone(),
        shared(db.constraints.clone()),
        store.clone(),
        shared(RecordingAuditSink::default()),
        EngineSettings::default(),
    )?;
    let mut review = service.review(&resource(), at(15, 0, 0), at(16, 0, 0)).await?;
    let conflict = review.report.conflicts[0].clone();
    let reschedule = conflict
        .candidate_solutions
        .iter()
        .find(|solution| solution.solution_type == SolutionType::Reschedule)
        .cloned()
        .expect("reschedule offered");

    // The front desk moves appointment 2 before the selection is applied.
    let front_desk = AppointmentPatch {
        start_at: Some("2024-01-15T14:00:00".to_string()),
        end_at: Some("2024-01-15T14:30:00".to_string()),
        ..AppointmentPatch::default()
    };
    db.store.update_appointment("2", &front_desk, 1).await?;

    let mut selections = ResolutionSelections::new();
    selections.insert(conflict.id.clone(), reschedule);
    let outcome = service.apply_resolutions(&mut review, selections).await?;

    assert_eq!(outcome.status, ResolutionStatus::ResolutionFailed);
    assert_eq!(outcome.failed[0].appointment_id.as_deref(), Some("2"));
    assert_eq!(
        outcome.failed[0].reason,
        FailureReason::VersionConflict {
            expected: 1,
            actual: Some(2)
        }
    );
    assert_eq!(review.report.conflicts[0].status, ConflictStatus::ResolutionFailed);

    let current = db.store.fetch_appointment("2").await?.expect("appointment 2");
    assert_eq!(current.start_at.as_deref(), Some("2024-01-15T14:00:00"));
    assert_eq!(current.version, 2);
    Ok(())
}

/// Three Sunday bookings, each moved to Monday by its own conflict.
async fn sunday_batch(db: &TestDb) -> AppResult<(Vec<Conflict>, ResolutionSelections)> {
    for (id, start) in [
        ("a", "2024-01-14T10:00"),
        ("b", "2024-01-14T11:00"),
        ("c", "2024-01-14T12:00"),
    ] {
        db.store.insert(&booking(id, start, 30))?;
    }

    let snapshot = {
        use schedule_guard::services::collaborators::AppointmentSource;
        db.store
            .list_appointments(&resource(), at(14, 0, 0), at(15, 0, 0))
            .await?
    };
    let report = detect_conflicts(&snapshot, &weekday_hours(15))?;
    assert_eq!(report.conflicts.len(), 3);

    let mut selections = ResolutionSelections::new();
    for conflict in &report.conflicts {
        selections.insert(conflict.id.clone(), conflict.candidate_solutions[0].clone());
    }
    Ok((report.conflicts, selections))
}

#[tokio::test]
async fn failed_second_update_restores_the_exact_snapshot() -> AppResult<()> {
    let db = setup_db();
    let (conflicts, selections) = sunday_batch(&db).await?;
    let before = snapshot_bytes(&db.store).await;

    let store = shared(ScriptedStore::new(db.store.clone()).with_fault("b", Fault::StaleVersion));
    let audit = shared(RecordingAuditSink::default());
    let coordinator = ResolutionCoordinator::new(store.clone(), audit.clone());

    let outcome = coordinator.apply_resolutions(&conflicts, selections).await?;

    assert_eq!(outcome.status, ResolutionStatus::ResolutionFailed);
    assert!(outcome.applied.is_empty());
    assert_eq!(outcome.rolled_back.len(), 1);
    assert_eq!(outcome.rolled_back[0].appointment_id, "a");
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].appointment_id.as_deref(), Some("b"));
    assert_eq!(
        outcome.failed[0].reason,
        FailureReason::VersionConflict {
            expected: 1,
            actual: Some(2)
        }
    );
    assert!(outcome.rollback_errors.is_empty());
    assert!(outcome
        .conflict_statuses
        .values()
        .all(|status| *status == ConflictStatus::ResolutionFailed));

    assert_eq!(store.updates(), vec!["a", "b"]);
    assert_eq!(snapshot_bytes(&db.store).await, before);

    match audit.events().last() {
        Some(AuditEvent::ConflictResolutionFailed {
            appointment_id,
            rolled_back,
            ..
        }) => {
            assert_eq!(appointment_id.as_deref(), Some("b"));
            assert_eq!(*rolled_back, 1);
        }
        other => panic!("unexpected last audit event: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn store_error_rolls_back_in_reverse_order() -> AppResult<()> {
    let db = setup_db();
    let (conflicts, selections) = sunday_batch(&db).await?;
    let before = snapshot_bytes(&db.store).await;

    let store = shared(ScriptedStore::new(db.store.clone()).with_fault("c", Fault::StoreError));
    let coordinator = ResolutionCoordinator::new(store, shared(RecordingAuditSink::default()));
    let outcome = coordinator.apply_resolutions(&conflicts, selections).await?;

    let rolled_back: Vec<&str> = outcome
        .rolled_back
        .iter()
        .map(|change| change.appointment_id.as_str())
        .collect();
    assert_eq!(rolled_back, vec!["b", "a"]);
    assert!(matches!(outcome.failed[0].reason, FailureReason::Store { .. }));
    assert_eq!(snapshot_bytes(&db.store).await, before);
    Ok(())
}

#[tokio::test]
async fn successful_batch_moves_every_booking() -> AppResult<()> {
    let db = setup_db();
    let (conflicts, selections) = sunday_batch(&db).await?;

    let coordinator = ResolutionCoordinator::new(
        shared(db.store.clone()),
        shared(RecordingAuditSink::default()),
    );
    let outcome = coordinator.apply_resolutions(&conflicts, selections).await?;
    assert!(outcome.is_resolved());
    assert_eq!(outcome.applied.len(), 3);

    let moved = db.store.fetch_appointment("c").await?.expect("appointment c");
    assert_eq!(moved.start_at.as_deref(), Some("2024-01-15T12:00:00"));
    Ok(())
}

#[tokio::test]
async fn selections_outside_the_review_are_rejected() -> AppResult<()> {
    let db = setup_db();
    let (conflicts, selections) = sunday_batch(&db).await?;
    let store = shared(ScriptedStore::new(db.store.clone()));
    let coordinator = ResolutionCoordinator::new(store.clone(), shared(RecordingAuditSink::default()));

    let empty = coordinator
        .apply_resolutions(&conflicts, ResolutionSelections::new())
        .await;
    assert!(matches!(
        empty,
        Err(AppError::Selection(SelectionError::EmptySelection))
    ));

    let mut unknown = ResolutionSelections::new();
    let any_solution = selections.values().next().cloned().expect("a selection");
    unknown.insert("conflict-missing".to_string(), any_solution);
    let result = coordinator.apply_resolutions(&conflicts, unknown).await;
    assert!(matches!(
        result,
        Err(AppError::Selection(SelectionError::UnknownConflict { .. }))
    ));

    let mut tampered = selections.clone();
    if let Some(solution) = tampered.values_mut().next() {
        solution.confidence = 0.1;
    }
    let result = coordinator.apply_resolutions(&conflicts, tampered).await;
    assert!(matches!(
        result,
        Err(AppError::Selection(SelectionError::SolutionNotOffered { .. }))
    ));

    assert!(store.updates().is_empty());
    Ok(())
}

#[tokio::test]
async fn colliding_selections_name_both_conflicts() -> AppResult<()> {
    let db = setup_db();
    db.store.insert(&booking("late", "2024-01-14T18:00", 30))?;
    let snapshot = vec![db.store.fetch_appointment("late").await?.expect("late")];

    let report = detect_conflicts(&snapshot, &weekday_hours(15))?;
    assert_eq!(report.conflicts.len(), 2);

    let mut selections = ResolutionSelections::new();
    for conflict in &report.conflicts {
        selections.insert(conflict.id.clone(), conflict.candidate_solutions[0].clone());
    }

    let store = shared(ScriptedStore::new(db.store.clone()));
    let coordinator = ResolutionCoordinator::new(store.clone(), shared(RecordingAuditSink::default()));
    match coordinator.apply_resolutions(&report.conflicts, selections).await {
        Err(AppError::Selection(SelectionError::CollidingSelections {
            appointment_id,
            first_conflict_id,
            second_conflict_id,
        })) => {
            assert_eq!(appointment_id, "late");
            assert_ne!(first_conflict_id, second_conflict_id);
            assert!(report.find(&first_conflict_id).is_some());
            assert!(report.find(&second_conflict_id).is_some());
        }
        other => panic!("expected colliding selections, got {other:?}"),
    }

    assert!(store.updates().is_empty());
    let untouched = db.store.fetch_appointment("late").await?.expect("late");
    assert_eq!(untouched.version, 1);
    Ok(())
}

#[tokio::test]
async fn cancelling_a_duplicate_clears_the_double_booking() -> AppResult<()> {
    let db = setup_db();
    let mut first = booking("d1", "2024-01-15T10:00", 30);
    let mut second = booking("d2", "2024-01-15T10:00", 30);
    first.client_identity = "+15550001".to_string();
    second.client_identity = "+15550001".to_string();
    second.barber_id = "barber-2".to_string();
    db.store.insert(&first)?;
    db.store.insert(&second)?;

    let report = detect_conflicts(&[first.clone(), second.clone()], &weekday_hours(10))?;
    assert_eq!(report.conflicts.len(), 1);
    let conflict = &report.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::DoubleBooking);

    let cancel = conflict
        .candidate_solutions
        .iter()
        .find(|solution| solution.solution_type == SolutionType::Cancel)
        .expect("cancel offered");
    let mut selections = ResolutionSelections::new();
    selections.insert(conflict.id.clone(), cancel.clone());

    let coordinator = ResolutionCoordinator::new(
        shared(db.store.clone()),
        shared(RecordingAuditSink::default()),
    );
    let outcome = coordinator.apply_resolutions(&report.conflicts, selections).await?;
    assert!(outcome.is_resolved());
    assert_eq!(outcome.applied[0].new_status, Some(AppointmentStatus::Cancelled));

    let refreshed = vec![
        db.store.fetch_appointment("d1").await?.expect("d1"),
        db.store.fetch_appointment("d2").await?.expect("d2"),
    ];
    assert_eq!(refreshed[1].status, AppointmentStatus::Cancelled);
    assert!(detect_conflicts(&refreshed, &weekday_hours(10))?.is_clean());
    Ok(())
}
