#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tempfile::{tempdir, TempDir};

use schedule_guard::db::stores::{SqliteAppointmentStore, SqliteConstraintsSource};
use schedule_guard::db::DbPool;
use schedule_guard::error::{AppError, AppResult};
use schedule_guard::models::appointment::{
    Appointment, AppointmentPatch, AppointmentStatus, ResourceKey,
};
use schedule_guard::models::audit::AuditEvent;
use schedule_guard::models::constraints::{DailyWindow, WorkingConstraints};
use schedule_guard::services::collaborators::{
    AppointmentSource, AppointmentStore, AuditSink, UpdateOutcome,
};

pub const BARBER: &str = "barber-1";

pub struct TestDb {
    pub _dir: TempDir,
    pub pool: DbPool,
    pub store: SqliteAppointmentStore,
    pub constraints: SqliteConstraintsSource,
}

pub fn setup_db() -> TestDb {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("schedule.sqlite")).expect("db pool");
    TestDb {
        store: SqliteAppointmentStore::new(pool.clone()),
        constraints: SqliteConstraintsSource::new(pool.clone()),
        pool,
        _dir: dir,
    }
}

pub fn resource() -> ResourceKey {
    ResourceKey::new(BARBER, None)
}

pub fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("time")
}

pub fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .expect("datetime")
}

pub fn weekday_hours(buffer_minutes: i64) -> WorkingConstraints {
    WorkingConstraints {
        working_hours: DailyWindow::new(hm(9, 0), hm(17, 0)),
        working_days: (1..=5).collect(),
        break_times: Vec::new(),
        buffer_minutes,
    }
}

pub fn booking(id: &str, start: &str, minutes: i64) -> Appointment {
    Appointment {
        id: id.to_string(),
        start_at: Some(start.to_string()),
        end_at: None,
        duration_minutes: Some(minutes),
        client_identity: format!("client-{id}"),
        service_name: "Haircut".to_string(),
        barber_id: BARBER.to_string(),
        location_id: None,
        status: AppointmentStatus::Scheduled,
        version: 1,
        updated_at: None,
    }
}

/// The whole resource as JSON bytes, for before/after comparisons.
pub async fn snapshot_bytes(store: &SqliteAppointmentStore) -> Vec<u8> {
    let appointments = store
        .list_appointments(&resource(), at(1, 0, 0), at(31, 0, 0))
        .await
        .expect("snapshot");
    serde_json::to_vec(&appointments).expect("serialize snapshot")
}

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Report a stale version without writing.
    StaleVersion,
    /// Fail with a store error without writing.
    StoreError,
    /// Sleep before writing.
    DelayBefore(Duration),
    /// Write, then sleep before answering.
    DelayAfter(Duration),
}

/// SQLite store with per-appointment faults injected into `update_appointment`.
pub struct ScriptedStore {
    pub inner: SqliteAppointmentStore,
    faults: BTreeMap<String, Fault>,
    pub update_log: Mutex<Vec<String>>,
}

impl ScriptedStore {
    pub fn new(inner: SqliteAppointmentStore) -> Self {
        Self {
            inner,
            faults: BTreeMap::new(),
            update_log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fault(mut self, appointment_id: &str, fault: Fault) -> Self {
        self.faults.insert(appointment_id.to_string(), fault);
        self
    }

    pub fn updates(&self) -> Vec<String> {
        self.update_log.lock().expect("update log").clone()
    }
}

#[async_trait]
impl AppointmentStore for ScriptedStore {
    async fn fetch_appointment(&self, id: &str) -> AppResult<Option<Appointment>> {
        self.inner.fetch_appointment(id).await
    }

    async fn update_appointment(
        &self,
        id: &str,
        patch: &AppointmentPatch,
        expected_version: i64,
    ) -> AppResult<UpdateOutcome> {
        self.update_log.lock().expect("update log").push(id.to_string());
        match self.faults.get(id).copied() {
            Some(Fault::StaleVersion) => Ok(UpdateOutcome::VersionConflict {
                current: Some(expected_version + 1),
            }),
            Some(Fault::StoreError) => Err(AppError::database("disk I/O error")),
            Some(Fault::DelayBefore(delay)) => {
                tokio::time::sleep(delay).await;
                self.inner.update_appointment(id, patch, expected_version).await
            }
            Some(Fault::DelayAfter(delay)) => {
                let outcome = self.inner.update_appointment(id, patch, expected_version).await;
                tokio::time::sleep(delay).await;
                outcome
            }
            None => self.inner.update_appointment(id, patch, expected_version).await,
        }
    }

    async fn restore_appointment(
        &self,
        snapshot: &Appointment,
        expected_version: i64,
    ) -> AppResult<UpdateOutcome> {
        self.inner.restore_appointment(snapshot, expected_version).await
    }
}

#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .expect("audit events")
            .iter()
            .map(AuditEvent::name)
            .collect()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit events").clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: &AuditEvent) -> AppResult<()> {
        self.events.lock().expect("audit events").push(event.clone());
        Ok(())
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
