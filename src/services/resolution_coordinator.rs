use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::NaiveDateTime;
use serde_json::json;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult, SelectionError};
use crate::models::appointment::{Appointment, AppointmentPatch, AppointmentStatus};
use crate::models::audit::AuditEvent;
use crate::models::conflict::{Conflict, ConflictStatus, TimeRange};
use crate::models::resolution::{
    AppliedChange, FailureDetail, FailureReason, ResolutionOutcome, ResolutionSelections,
    ResolutionStatus,
};
use crate::models::settings::EngineSettings;
use crate::models::solution::{ChangeAction, ProposedChange, SolutionType};
use crate::services::collaborators::{AppointmentStore, AuditSink, UpdateOutcome};
use crate::services::conflict_detector::resolve_times;
use crate::services::schedule_utils;

/// One validated change, tagged with the conflict whose solution asked for it.
#[derive(Debug, Clone)]
struct PlannedChange {
    conflict_id: String,
    change: ProposedChange,
    /// Version the record had when the conflict was detected.
    detected_version: Option<i64>,
}

/// A change that reached the store, with what is needed to undo it.
struct WrittenChange {
    applied: AppliedChange,
    snapshot: Appointment,
}

#[derive(Default)]
struct BatchReport {
    applied: Vec<AppliedChange>,
    rolled_back: Vec<AppliedChange>,
    failed: Option<FailureDetail>,
    rollback_errors: Vec<FailureDetail>,
}

/// Per-appointment async locks shared by every clone of a coordinator.
#[derive(Default)]
struct LockTable {
    entries: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockTable {
    fn handle(&self, appointment_id: &str) -> Arc<Mutex<()>> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries
            .entry(appointment_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops entries nobody holds or waits on.
    fn prune(&self) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

/// The only writer of appointment data.
///
/// Applies a selection set as one batch: every touched appointment is locked
/// in ascending id order, changes are written in that order, and the first
/// failure rolls back everything already written. Clones share the lock
/// table, so concurrent applies must go through clones of one coordinator.
#[derive(Clone)]
pub struct ResolutionCoordinator {
    store: Arc<dyn AppointmentStore>,
    audit: Arc<dyn AuditSink>,
    locks: Arc<LockTable>,
    timeout: Duration,
}

impl ResolutionCoordinator {
    pub fn new(store: Arc<dyn AppointmentStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self::from_settings(store, audit, &EngineSettings::default())
    }

    pub fn from_settings(
        store: Arc<dyn AppointmentStore>,
        audit: Arc<dyn AuditSink>,
        settings: &EngineSettings,
    ) -> Self {
        Self {
            store,
            audit,
            locks: Arc::new(LockTable::default()),
            timeout: settings.apply_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Applies the selected solutions for `conflicts` atomically.
    ///
    /// Selection problems are returned as `Err(AppError::Selection)` before
    /// anything is written. Store failures and timeouts come back as an
    /// `Ok` outcome with status `ResolutionFailed`, after rollback.
    pub async fn apply_resolutions(
        &self,
        conflicts: &[Conflict],
        selections: ResolutionSelections,
    ) -> AppResult<ResolutionOutcome> {
        let plan = validate_selections(conflicts, &selections)?;

        let mut statuses: BTreeMap<String, ConflictStatus> = BTreeMap::new();
        for (conflict_id, solution) in &selections {
            let current = conflicts
                .iter()
                .find(|conflict| &conflict.id == conflict_id)
                .map(|conflict| conflict.status)
                .unwrap_or(ConflictStatus::SolutionProposed);
            let mut status = current;
            advance(conflict_id, &mut status, ConflictStatus::SolutionSelected);
            statuses.insert(conflict_id.clone(), status);

            self.emit(&AuditEvent::SolutionSelected {
                conflict_id: conflict_id.clone(),
                solution_id: solution.id.clone(),
                solution_type: solution.solution_type,
            })
            .await;
        }
        for (conflict_id, status) in statuses.iter_mut() {
            advance(conflict_id, status, ConflictStatus::Resolving);
        }

        info!(
            target: "app::resolution",
            conflicts = selections.len(),
            changes = plan.len(),
            timeout_ms = self.timeout.as_millis() as u64,
            "applying resolutions"
        );

        let store = Arc::clone(&self.store);
        let locks = Arc::clone(&self.locks);
        let batch_timeout = self.timeout;
        // Runs detached so a dropped caller cannot stop the batch halfway.
        let report = tokio::spawn(async move {
            let report = run_batch(store.as_ref(), &locks, &plan, batch_timeout).await;
            locks.prune();
            report
        })
        .await
        .map_err(|err| AppError::other(format!("resolution batch aborted: {err}")))?;

        let terminal = if report.failed.is_none() {
            ConflictStatus::Resolved
        } else {
            ConflictStatus::ResolutionFailed
        };
        for (conflict_id, status) in statuses.iter_mut() {
            advance(conflict_id, status, terminal);
        }

        let outcome = match report.failed {
            None => {
                let mut solution_types: BTreeMap<SolutionType, usize> = BTreeMap::new();
                for solution in selections.values() {
                    *solution_types.entry(solution.solution_type).or_default() += 1;
                }
                self.emit(&AuditEvent::ConflictsResolved {
                    conflicts: selections.len(),
                    changes: report.applied.len(),
                    solution_types,
                })
                .await;
                info!(
                    target: "app::resolution",
                    changes = report.applied.len(),
                    "resolutions applied"
                );

                ResolutionOutcome {
                    status: ResolutionStatus::Resolved,
                    applied: report.applied,
                    rolled_back: Vec::new(),
                    failed: Vec::new(),
                    rollback_errors: Vec::new(),
                    conflict_statuses: statuses,
                }
            }
            Some(failure) => {
                self.emit(&AuditEvent::ConflictResolutionFailed {
                    conflicts: selections.len(),
                    reason: failure.reason.to_string(),
                    appointment_id: failure.appointment_id.clone(),
                    rolled_back: report.rolled_back.len(),
                })
                .await;
                warn!(
                    target: "app::resolution",
                    appointment_id = failure.appointment_id.as_deref().unwrap_or("-"),
                    reason = %failure.reason,
                    rolled_back = report.rolled_back.len(),
                    rollback_errors = report.rollback_errors.len(),
                    "resolution batch failed"
                );

                ResolutionOutcome {
                    status: ResolutionStatus::ResolutionFailed,
                    applied: Vec::new(),
                    rolled_back: report.rolled_back,
                    failed: vec![failure],
                    rollback_errors: report.rollback_errors,
                    conflict_statuses: statuses,
                }
            }
        };

        Ok(outcome)
    }

    async fn emit(&self, event: &AuditEvent) {
        if let Err(err) = self.audit.record(event).await {
            warn!(target: "app::audit", event = event.name(), error = %err, "audit sink rejected event");
        }
    }
}

fn advance(conflict_id: &str, status: &mut ConflictStatus, next: ConflictStatus) {
    if let Err(message) = status.transition_to(next) {
        debug!(target: "app::resolution", conflict_id, %message, "conflict status unchanged");
    }
}

/// Checks the whole selection set and flattens it into changes ordered by
/// appointment id. Identical changes reached through two conflicts are kept once.
fn validate_selections(
    conflicts: &[Conflict],
    selections: &ResolutionSelections,
) -> AppResult<Vec<PlannedChange>> {
    if selections.is_empty() {
        return Err(AppError::selection(SelectionError::EmptySelection));
    }

    let mut by_appointment: BTreeMap<String, PlannedChange> = BTreeMap::new();
    for (conflict_id, solution) in selections {
        let conflict = conflicts
            .iter()
            .find(|conflict| &conflict.id == conflict_id)
            .ok_or_else(|| {
                AppError::selection(SelectionError::UnknownConflict {
                    conflict_id: conflict_id.clone(),
                })
            })?;

        if conflict.status.is_terminal() {
            return Err(AppError::validation_with_details(
                "conflict is already settled in this review",
                json!({"conflictId": conflict_id, "status": conflict.status}),
            ));
        }
        if !conflict.offers(solution) {
            return Err(AppError::selection(SelectionError::SolutionNotOffered {
                conflict_id: conflict_id.clone(),
                solution_id: solution.id.clone(),
            }));
        }

        for change in &solution.proposed_changes {
            match by_appointment.get(&change.appointment_id) {
                Some(existing) if existing.change.collides_with(change) => {
                    return Err(AppError::selection(SelectionError::CollidingSelections {
                        appointment_id: change.appointment_id.clone(),
                        first_conflict_id: existing.conflict_id.clone(),
                        second_conflict_id: conflict_id.clone(),
                    }));
                }
                Some(_) => {}
                None => {
                    by_appointment.insert(
                        change.appointment_id.clone(),
                        PlannedChange {
                            conflict_id: conflict_id.clone(),
                            change: change.clone(),
                            detected_version: conflict.detected_version(&change.appointment_id),
                        },
                    );
                }
            }
        }
    }

    Ok(by_appointment.into_values().collect())
}

async fn run_batch(
    store: &dyn AppointmentStore,
    locks: &LockTable,
    plan: &[PlannedChange],
    batch_timeout: Duration,
) -> BatchReport {
    let started = Instant::now();
    let deadline = started + batch_timeout;
    let elapsed_ms = || started.elapsed().as_millis() as u64;

    // The plan is already in ascending id order.
    let mut guards: Vec<OwnedMutexGuard<()>> = Vec::with_capacity(plan.len());
    for planned in plan {
        let lock = locks.handle(&planned.change.appointment_id);
        match timeout_at(deadline, lock.lock_owned()).await {
            Ok(guard) => guards.push(guard),
            Err(_) => {
                return BatchReport {
                    failed: Some(failure(planned, FailureReason::Timeout { elapsed_ms: elapsed_ms() })),
                    ..BatchReport::default()
                };
            }
        }
    }
    debug!(target: "app::resolution", locks = guards.len(), "appointment locks held");

    let mut written: Vec<WrittenChange> = Vec::with_capacity(plan.len());
    let mut failed = None;

    for planned in plan {
        let appointment_id = planned.change.appointment_id.as_str();

        let snapshot = match timeout_at(deadline, store.fetch_appointment(appointment_id)).await {
            Ok(Ok(Some(snapshot))) => snapshot,
            Ok(Ok(None)) => {
                failed = Some(failure(planned, FailureReason::NotFound));
                break;
            }
            Ok(Err(err)) => {
                failed = Some(failure(planned, FailureReason::Store { message: err.to_string() }));
                break;
            }
            Err(_) => {
                failed = Some(failure(planned, FailureReason::Timeout { elapsed_ms: elapsed_ms() }));
                break;
            }
        };

        // Someone else wrote the record after detection; the plan is stale.
        if let Some(expected) = planned.detected_version.filter(|v| *v != snapshot.version) {
            failed = Some(failure(
                planned,
                FailureReason::VersionConflict {
                    expected,
                    actual: Some(snapshot.version),
                },
            ));
            break;
        }

        let (patch, detached_remainder) = match build_patch(&snapshot, &planned.change) {
            Ok(built) => built,
            Err(message) => {
                failed = Some(failure(planned, FailureReason::InvalidChange { message }));
                break;
            }
        };

        let update = store.update_appointment(appointment_id, &patch, snapshot.version);
        match timeout_at(deadline, update).await {
            Ok(Ok(UpdateOutcome::Applied { version })) => {
                debug!(
                    target: "app::resolution",
                    appointment_id,
                    action = planned.change.action.as_str(),
                    version,
                    "change written"
                );
                written.push(WrittenChange {
                    applied: applied_change(planned, &snapshot, &patch, detached_remainder, version),
                    snapshot,
                });
            }
            Ok(Ok(UpdateOutcome::VersionConflict { current })) => {
                failed = Some(failure(
                    planned,
                    FailureReason::VersionConflict {
                        expected: snapshot.version,
                        actual: current,
                    },
                ));
                break;
            }
            Ok(Ok(UpdateOutcome::NotFound)) => {
                failed = Some(failure(planned, FailureReason::NotFound));
                break;
            }
            Ok(Err(err)) => {
                failed = Some(failure(planned, FailureReason::Store { message: err.to_string() }));
                break;
            }
            Err(_) => {
                // The write may have landed before the deadline hit.
                if let Some(version) = landed_version(store, &snapshot, batch_timeout).await {
                    written.push(WrittenChange {
                        applied: applied_change(planned, &snapshot, &patch, detached_remainder, version),
                        snapshot,
                    });
                }
                failed = Some(failure(planned, FailureReason::Timeout { elapsed_ms: elapsed_ms() }));
                break;
            }
        }
    }

    let report = match failed {
        None => BatchReport {
            applied: written.into_iter().map(|change| change.applied).collect(),
            ..BatchReport::default()
        },
        Some(failure) => {
            let (rolled_back, rollback_errors) = roll_back(store, written, batch_timeout).await;
            BatchReport {
                applied: Vec::new(),
                rolled_back,
                failed: Some(failure),
                rollback_errors,
            }
        }
    };

    drop(guards);
    report
}

/// Re-reads a record whose update timed out and returns its version if the
/// update went through after all.
async fn landed_version(
    store: &dyn AppointmentStore,
    snapshot: &Appointment,
    grace: Duration,
) -> Option<i64> {
    match timeout(grace, store.fetch_appointment(&snapshot.id)).await {
        Ok(Ok(Some(current))) if current != *snapshot => Some(current.version),
        Ok(Ok(_)) => None,
        Ok(Err(err)) => {
            error!(target: "app::resolution", appointment_id = %snapshot.id, error = %err, "re-read after timeout failed");
            None
        }
        Err(_) => {
            error!(target: "app::resolution", appointment_id = %snapshot.id, "re-read after timeout timed out");
            None
        }
    }
}

/// Restores written records newest first. Each restore gets its own bound
/// so a slow store cannot hold the locks forever.
async fn roll_back(
    store: &dyn AppointmentStore,
    written: Vec<WrittenChange>,
    grace: Duration,
) -> (Vec<AppliedChange>, Vec<FailureDetail>) {
    let mut rolled_back = Vec::with_capacity(written.len());
    let mut errors = Vec::new();

    for change in written.into_iter().rev() {
        let conflict_id = Some(change.applied.conflict_id.clone());
        let appointment_id = Some(change.snapshot.id.clone());
        let restore = store.restore_appointment(&change.snapshot, change.applied.version);

        let reason = match timeout(grace, restore).await {
            Ok(Ok(UpdateOutcome::Applied { .. })) => {
                debug!(target: "app::resolution", appointment_id = %change.snapshot.id, "change rolled back");
                rolled_back.push(change.applied);
                continue;
            }
            Ok(Ok(UpdateOutcome::VersionConflict { current })) => FailureReason::VersionConflict {
                expected: change.applied.version,
                actual: current,
            },
            Ok(Ok(UpdateOutcome::NotFound)) => FailureReason::NotFound,
            Ok(Err(err)) => FailureReason::Store {
                message: err.to_string(),
            },
            Err(_) => FailureReason::Timeout {
                elapsed_ms: grace.as_millis() as u64,
            },
        };

        error!(
            target: "app::resolution",
            appointment_id = %change.snapshot.id,
            reason = %reason,
            "rollback failed, record needs manual repair"
        );
        errors.push(FailureDetail {
            conflict_id,
            appointment_id,
            reason,
        });
    }

    (rolled_back, errors)
}

fn failure(planned: &PlannedChange, reason: FailureReason) -> FailureDetail {
    FailureDetail {
        conflict_id: Some(planned.conflict_id.clone()),
        appointment_id: Some(planned.change.appointment_id.clone()),
        reason,
    }
}

fn applied_change(
    planned: &PlannedChange,
    snapshot: &Appointment,
    patch: &AppointmentPatch,
    detached_remainder: Option<TimeRange>,
    version: i64,
) -> AppliedChange {
    AppliedChange {
        conflict_id: planned.conflict_id.clone(),
        appointment_id: snapshot.id.clone(),
        action: planned.change.action,
        previous_start_at: snapshot.start_at.clone(),
        previous_end_at: snapshot.end_at.clone(),
        new_start_at: patch.start_at.clone().or_else(|| snapshot.start_at.clone()),
        new_end_at: patch.end_at.clone().or_else(|| snapshot.end_at.clone()),
        new_status: patch.status,
        detached_remainder,
        version,
    }
}

/// Turns a proposed change into a field patch against the record as it is now.
fn build_patch(
    snapshot: &Appointment,
    change: &ProposedChange,
) -> Result<(AppointmentPatch, Option<TimeRange>), String> {
    match change.action {
        ChangeAction::Cancel => {
            let patch = AppointmentPatch {
                status: Some(AppointmentStatus::Cancelled),
                ..AppointmentPatch::default()
            };
            Ok((patch, None))
        }
        ChangeAction::Reschedule => {
            let (start, _, duration) = current_window(snapshot)?;
            let new_start = match (change.new_start, change.new_date) {
                (Some(new_start), _) => new_start,
                (None, Some(date)) => schedule_utils::at_time(date, start.time()),
                (None, None) => return Err("reschedule without a new start or date".to_string()),
            };
            let new_end = match change.new_end {
                Some(new_end) => new_end,
                None => schedule_utils::add_minutes(new_start, duration).map_err(|err| err.to_string())?,
            };
            Ok((window_patch(snapshot, Some(new_start), new_start, new_end)?, None))
        }
        ChangeAction::Modify => {
            if change.new_start.is_none() && change.new_end.is_none() {
                return Err("modify without new times".to_string());
            }
            let (start, end, _) = current_window(snapshot)?;
            let new_start = change.new_start.unwrap_or(start);
            let new_end = change.new_end.unwrap_or(end);
            Ok((window_patch(snapshot, change.new_start, new_start, new_end)?, None))
        }
        ChangeAction::Split => {
            let cut = change
                .new_end
                .ok_or_else(|| "split without a cut point".to_string())?;
            let (start, end, _) = current_window(snapshot)?;
            if cut <= start || cut >= end {
                return Err(format!(
                    "split point {} is outside the appointment",
                    schedule_utils::format_datetime(cut)
                ));
            }
            let patch = window_patch(snapshot, None, start, cut)?;
            Ok((patch, Some(TimeRange::new(cut, end))))
        }
    }
}

fn current_window(snapshot: &Appointment) -> Result<(NaiveDateTime, NaiveDateTime, i64), String> {
    let (start, end) = resolve_times(snapshot).map_err(|reason| reason.to_string())?;
    let duration = schedule_utils::duration_minutes(start, end).map_err(|err| err.to_string())?;
    Ok((start, end, duration))
}

fn window_patch(
    snapshot: &Appointment,
    written_start: Option<NaiveDateTime>,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<AppointmentPatch, String> {
    let minutes = schedule_utils::duration_minutes(start, end).map_err(|err| err.to_string())?;
    if minutes <= 0 {
        return Err("new end is not after new start".to_string());
    }
    Ok(AppointmentPatch {
        start_at: written_start.map(schedule_utils::format_datetime),
        end_at: Some(schedule_utils::format_datetime(end)),
        duration_minutes: snapshot.duration_minutes.map(|_| minutes),
        status: None,
    })
}
