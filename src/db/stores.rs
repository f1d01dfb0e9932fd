use async_trait::async_trait;
use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::db::repositories::appointment_repository::{AppointmentRepository, AppointmentRow};
use crate::db::repositories::constraints_repository::ConstraintsRepository;
use crate::db::DbPool;
use crate::error::AppResult;
use crate::models::appointment::{Appointment, AppointmentPatch, ResourceKey};
use crate::models::constraints::WorkingConstraints;
use crate::services::collaborators::{
    AppointmentSource, AppointmentStore, ConstraintsSource, UpdateOutcome,
};
use crate::services::schedule_utils;

/// Appointment reads and version-checked writes backed by the `appointments` table.
#[derive(Clone, Debug)]
pub struct SqliteAppointmentStore {
    db: DbPool,
}

impl SqliteAppointmentStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn insert(&self, appointment: &Appointment) -> AppResult<()> {
        let row = AppointmentRow::from_record(appointment);
        self.db
            .with_connection(|conn| AppointmentRepository::insert(conn, &row))
    }

    fn outcome_after_miss(&self, id: &str, expected_version: i64) -> AppResult<UpdateOutcome> {
        let current = self
            .db
            .with_connection(|conn| AppointmentRepository::current_version(conn, id))?;
        match current {
            None => Ok(UpdateOutcome::NotFound),
            Some(version) => {
                warn!(
                    target: "app::db",
                    appointment_id = id,
                    expected = expected_version,
                    actual = version,
                    "appointment version moved"
                );
                Ok(UpdateOutcome::VersionConflict {
                    current: Some(version),
                })
            }
        }
    }
}

#[async_trait]
impl AppointmentSource for SqliteAppointmentStore {
    async fn list_appointments(
        &self,
        resource: &ResourceKey,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> AppResult<Vec<Appointment>> {
        let rows = self
            .db
            .with_connection(|conn| AppointmentRepository::list_for_resource(conn, resource))?;

        let mut appointments = Vec::with_capacity(rows.len());
        for row in rows {
            let appointment = row.into_record()?;
            if within_window(&appointment, from, to) {
                appointments.push(appointment);
            }
        }

        debug!(
            target: "app::db",
            resource = %resource,
            count = appointments.len(),
            "loaded appointment snapshot"
        );
        Ok(appointments)
    }
}

#[async_trait]
impl AppointmentStore for SqliteAppointmentStore {
    async fn fetch_appointment(&self, id: &str) -> AppResult<Option<Appointment>> {
        let row = self
            .db
            .with_connection(|conn| AppointmentRepository::find_by_id(conn, id))?;
        row.map(AppointmentRow::into_record).transpose()
    }

    async fn update_appointment(
        &self,
        id: &str,
        patch: &AppointmentPatch,
        expected_version: i64,
    ) -> AppResult<UpdateOutcome> {
        let changed = self.db.with_connection(|conn| {
            AppointmentRepository::update_if_version(conn, id, patch, expected_version)
        })?;

        if changed == 1 {
            return Ok(UpdateOutcome::Applied {
                version: expected_version + 1,
            });
        }
        self.outcome_after_miss(id, expected_version)
    }

    async fn restore_appointment(
        &self,
        snapshot: &Appointment,
        expected_version: i64,
    ) -> AppResult<UpdateOutcome> {
        let row = AppointmentRow::from_record(snapshot);
        let changed = self.db.with_connection(|conn| {
            AppointmentRepository::restore_if_version(conn, &row, expected_version)
        })?;

        if changed == 1 {
            return Ok(UpdateOutcome::Applied {
                version: snapshot.version,
            });
        }
        self.outcome_after_miss(&snapshot.id, expected_version)
    }
}

/// Records whose times cannot be read are always kept so the detector can
/// report them.
fn within_window(appointment: &Appointment, from: NaiveDateTime, to: NaiveDateTime) -> bool {
    let Some(start) = appointment
        .start_at
        .as_deref()
        .and_then(|raw| schedule_utils::parse_datetime(raw).ok())
    else {
        return true;
    };

    let end = appointment
        .end_at
        .as_deref()
        .and_then(|raw| schedule_utils::parse_datetime(raw).ok())
        .or_else(|| {
            appointment
                .duration_minutes
                .and_then(|minutes| schedule_utils::add_minutes(start, minutes).ok())
        })
        .unwrap_or(start);

    start < to && end.max(start) >= from
}

/// Per-resource constraints from the `working_constraints` table, falling
/// back to the defaults for resources never configured.
#[derive(Clone, Debug)]
pub struct SqliteConstraintsSource {
    db: DbPool,
}

impl SqliteConstraintsSource {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn save(&self, resource: &ResourceKey, constraints: &WorkingConstraints) -> AppResult<()> {
        self.db
            .with_connection(|conn| ConstraintsRepository::upsert(conn, resource, constraints))
    }
}

#[async_trait]
impl ConstraintsSource for SqliteConstraintsSource {
    async fn working_constraints(&self, resource: &ResourceKey) -> AppResult<WorkingConstraints> {
        let stored = self
            .db
            .with_connection(|conn| ConstraintsRepository::get(conn, resource))?;
        Ok(stored.unwrap_or_default())
    }
}
