mod support;

use std::time::Duration;

use schedule_guard::error::AppResult;
use schedule_guard::models::conflict::Conflict;
use schedule_guard::models::resolution::{FailureReason, ResolutionSelections, ResolutionStatus};
use schedule_guard::services::collaborators::{AppointmentSource, AppointmentStore};
use schedule_guard::{detect_conflicts, ResolutionCoordinator};

use support::*;

/// Sunday bookings a, b and c, each with a conflict whose first candidate
/// moves it to Monday.
async fn sunday_conflicts(db: &TestDb) -> AppResult<Vec<Conflict>> {
    for (id, start) in [
        ("a", "2024-01-14T10:00"),
        ("b", "2024-01-14T11:00"),
        ("c", "2024-01-14T12:00"),
    ] {
        db.store.insert(&booking(id, start, 30))?;
    }
    let snapshot = db
        .store
        .list_appointments(&resource(), at(14, 0, 0), at(15, 0, 0))
        .await?;
    Ok(detect_conflicts(&snapshot, &weekday_hours(15))?.conflicts)
}

fn select_for(conflicts: &[Conflict], appointment_ids: &[&str]) -> ResolutionSelections {
    conflicts
        .iter()
        .filter(|conflict| {
            conflict
                .affected_appointments
                .iter()
                .any(|id| appointment_ids.contains(&id.as_str()))
        })
        .map(|conflict| (conflict.id.clone(), conflict.candidate_solutions[0].clone()))
        .collect()
}

#[tokio::test]
async fn slow_update_times_out_and_rolls_back() -> AppResult<()> {
    let db = setup_db();
    let conflicts = sunday_conflicts(&db).await?;
    let before = snapshot_bytes(&db.store).await;

    let store = shared(
        ScriptedStore::new(db.store.clone())
            .with_fault("b", Fault::DelayBefore(Duration::from_millis(500))),
    );
    let coordinator = ResolutionCoordinator::new(store, shared(RecordingAuditSink::default()))
        .with_timeout(Duration::from_millis(50));

    let outcome = coordinator
        .apply_resolutions(&conflicts, select_for(&conflicts, &["a", "b", "c"]))
        .await?;

    assert_eq!(outcome.status, ResolutionStatus::ResolutionFailed);
    assert_eq!(outcome.failed[0].appointment_id.as_deref(), Some("b"));
    assert!(matches!(outcome.failed[0].reason, FailureReason::Timeout { .. }));
    let rolled_back: Vec<&str> = outcome
        .rolled_back
        .iter()
        .map(|change| change.appointment_id.as_str())
        .collect();
    assert_eq!(rolled_back, vec!["a"]);
    assert_eq!(snapshot_bytes(&db.store).await, before);
    Ok(())
}

#[tokio::test]
async fn write_that_lands_after_the_deadline_is_rolled_back() -> AppResult<()> {
    let db = setup_db();
    let conflicts = sunday_conflicts(&db).await?;
    let before = snapshot_bytes(&db.store).await;

    let store = shared(
        ScriptedStore::new(db.store.clone())
            .with_fault("b", Fault::DelayAfter(Duration::from_millis(500))),
    );
    let coordinator = ResolutionCoordinator::new(store, shared(RecordingAuditSink::default()))
        .with_timeout(Duration::from_millis(50));

    let outcome = coordinator
        .apply_resolutions(&conflicts, select_for(&conflicts, &["a", "b", "c"]))
        .await?;

    assert!(matches!(outcome.failed[0].reason, FailureReason::Timeout { .. }));
    let rolled_back: Vec<&str> = outcome
        .rolled_back
        .iter()
        .map(|change| change.appointment_id.as_str())
        .collect();
    assert_eq!(rolled_back, vec!["b", "a"]);
    assert!(outcome.rollback_errors.is_empty());
    assert_eq!(snapshot_bytes(&db.store).await, before);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overlapping_batches_on_one_coordinator_do_not_deadlock() -> AppResult<()> {
    let db = setup_db();
    let conflicts = sunday_conflicts(&db).await?;

    let store = shared(
        ScriptedStore::new(db.store.clone())
            .with_fault("b", Fault::DelayBefore(Duration::from_millis(20))),
    );
    let coordinator = ResolutionCoordinator::new(store.clone(), shared(RecordingAuditSink::default()));
    let first = coordinator.clone();
    let second = coordinator.clone();

    let first_selection = select_for(&conflicts, &["a", "b"]);
    let second_selection = select_for(&conflicts, &["b", "c"]);
    let joined = tokio::time::timeout(Duration::from_secs(5), async {
        futures::join!(
            first.apply_resolutions(&conflicts, first_selection),
            second.apply_resolutions(&conflicts, second_selection),
        )
    })
    .await
    .expect("batches finished without deadlock");

    let (first_outcome, second_outcome) = (joined.0?, joined.1?);
    // Both batches were planned from the same detection, so only the
    // first to reach b may move it.
    assert_ne!(first_outcome.is_resolved(), second_outcome.is_resolved());
    let loser = if first_outcome.is_resolved() { &second_outcome } else { &first_outcome };
    assert_eq!(loser.status, ResolutionStatus::ResolutionFailed);
    assert_eq!(loser.failed[0].appointment_id.as_deref(), Some("b"));
    assert_eq!(
        loser.failed[0].reason,
        FailureReason::VersionConflict {
            expected: 1,
            actual: Some(2)
        }
    );

    assert_eq!(store.updates().iter().filter(|id| *id == "b").count(), 1);
    let b = db.store.fetch_appointment("b").await?.expect("appointment b");
    assert_eq!(b.start_at.as_deref(), Some("2024-01-15T11:00:00"));
    assert_eq!(b.version, 2);
    Ok(())
}

#[tokio::test]
async fn dropping_the_caller_does_not_interrupt_the_batch() -> AppResult<()> {
    let db = setup_db();
    let conflicts = sunday_conflicts(&db).await?;

    let store = shared(
        ScriptedStore::new(db.store.clone())
            .with_fault("a", Fault::DelayBefore(Duration::from_millis(40))),
    );
    let coordinator = ResolutionCoordinator::new(store, shared(RecordingAuditSink::default()));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        coordinator.apply_resolutions(&conflicts, select_for(&conflicts, &["a", "b", "c"])),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;
    for (id, moved_to) in [
        ("a", "2024-01-15T10:00:00"),
        ("b", "2024-01-15T11:00:00"),
        ("c", "2024-01-15T12:00:00"),
    ] {
        let appointment = db.store.fetch_appointment(id).await?.expect("appointment");
        assert_eq!(appointment.start_at.as_deref(), Some(moved_to), "appointment {id}");
    }
    Ok(())
}
