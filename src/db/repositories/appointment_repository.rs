use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::error::{AppError, AppResult};
use crate::models::appointment::{Appointment, AppointmentPatch, AppointmentStatus, ResourceKey};

const BASE_SELECT: &str = r#"
    SELECT
        id,
        start_at,
        end_at,
        duration_minutes,
        client_identity,
        service_name,
        barber_id,
        location_id,
        status,
        version,
        updated_at
    FROM appointments
"#;

#[derive(Debug, Clone)]
pub struct AppointmentRow {
    pub id: String,
    pub start_at: Option<String>,
    pub end_at: Option<String>,
    pub duration_minutes: Option<i64>,
    pub client_identity: String,
    pub service_name: String,
    pub barber_id: String,
    pub location_id: Option<String>,
    pub status: String,
    pub version: i64,
    pub updated_at: Option<String>,
}

impl AppointmentRow {
    pub fn from_record(record: &Appointment) -> Self {
        Self {
            id: record.id.clone(),
            start_at: record.start_at.clone(),
            end_at: record.end_at.clone(),
            duration_minutes: record.duration_minutes,
            client_identity: record.client_identity.clone(),
            service_name: record.service_name.clone(),
            barber_id: record.barber_id.clone(),
            location_id: record.location_id.clone(),
            status: record.status.as_str().to_string(),
            version: record.version,
            updated_at: record.updated_at.clone(),
        }
    }

    pub fn into_record(self) -> AppResult<Appointment> {
        let status = AppointmentStatus::try_from(self.status.as_str())
            .map_err(|err| AppError::database(format!("appointment {}: {err}", self.id)))?;

        Ok(Appointment {
            id: self.id,
            start_at: self.start_at,
            end_at: self.end_at,
            duration_minutes: self.duration_minutes,
            client_identity: self.client_identity,
            service_name: self.service_name,
            barber_id: self.barber_id,
            location_id: self.location_id,
            status,
            version: self.version,
            updated_at: self.updated_at,
        })
    }
}

impl TryFrom<&Row<'_>> for AppointmentRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            start_at: row.get("start_at")?,
            end_at: row.get("end_at")?,
            duration_minutes: row.get("duration_minutes")?,
            client_identity: row.get("client_identity")?,
            service_name: row.get("service_name")?,
            barber_id: row.get("barber_id")?,
            location_id: row.get("location_id")?,
            status: row.get("status")?,
            version: row.get("version")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub struct AppointmentRepository;

impl AppointmentRepository {
    pub fn insert(conn: &Connection, row: &AppointmentRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO appointments (
                    id, start_at, end_at, duration_minutes, client_identity,
                    service_name, barber_id, location_id, status, version
                ) VALUES (
                    :id, :start_at, :end_at, :duration_minutes, :client_identity,
                    :service_name, :barber_id, :location_id, :status, :version
                )
            "#,
            named_params! {
                ":id": row.id,
                ":start_at": row.start_at,
                ":end_at": row.end_at,
                ":duration_minutes": row.duration_minutes,
                ":client_identity": row.client_identity,
                ":service_name": row.service_name,
                ":barber_id": row.barber_id,
                ":location_id": row.location_id,
                ":status": row.status,
                ":version": row.version,
            },
        )?;
        Ok(())
    }

    pub fn find_by_id(conn: &Connection, id: &str) -> AppResult<Option<AppointmentRow>> {
        let sql = format!("{BASE_SELECT} WHERE id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let row = stmt
            .query_row([id], |row| AppointmentRow::try_from(row))
            .optional()?;
        Ok(row)
    }

    /// All rows booked on `resource`, in start order. `IS` keeps a missing
    /// location matching only other missing locations.
    pub fn list_for_resource(
        conn: &Connection,
        resource: &ResourceKey,
    ) -> AppResult<Vec<AppointmentRow>> {
        let sql = format!(
            "{BASE_SELECT} WHERE barber_id = :barber_id AND location_id IS :location_id ORDER BY start_at ASC, id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                named_params! {
                    ":barber_id": resource.barber_id,
                    ":location_id": resource.location_id,
                },
                |row| AppointmentRow::try_from(row),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn current_version(conn: &Connection, id: &str) -> AppResult<Option<i64>> {
        let version = conn
            .query_row(
                "SELECT version FROM appointments WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version)
    }

    /// Applies `patch` only while the stored version still equals
    /// `expected_version`. Returns the number of rows written.
    pub fn update_if_version(
        conn: &Connection,
        id: &str,
        patch: &AppointmentPatch,
        expected_version: i64,
    ) -> AppResult<usize> {
        let changed = conn.execute(
            r#"
                UPDATE appointments SET
                    start_at = COALESCE(:start_at, start_at),
                    end_at = COALESCE(:end_at, end_at),
                    duration_minutes = COALESCE(:duration_minutes, duration_minutes),
                    status = COALESCE(:status, status),
                    version = version + 1,
                    updated_at = CURRENT_TIMESTAMP
                WHERE id = :id AND version = :expected_version
            "#,
            named_params! {
                ":id": id,
                ":start_at": patch.start_at,
                ":end_at": patch.end_at,
                ":duration_minutes": patch.duration_minutes,
                ":status": patch.status.map(|status| status.as_str()),
                ":expected_version": expected_version,
            },
        )?;
        Ok(changed)
    }

    /// Overwrites every mutable column with `row`, version included. The
    /// write time goes back to the row's own unless the row never had one.
    pub fn restore_if_version(
        conn: &Connection,
        row: &AppointmentRow,
        expected_version: i64,
    ) -> AppResult<usize> {
        let changed = conn.execute(
            r#"
                UPDATE appointments SET
                    start_at = :start_at,
                    end_at = :end_at,
                    duration_minutes = :duration_minutes,
                    client_identity = :client_identity,
                    service_name = :service_name,
                    barber_id = :barber_id,
                    location_id = :location_id,
                    status = :status,
                    version = :version,
                    updated_at = COALESCE(:updated_at, updated_at)
                WHERE id = :id AND version = :expected_version
            "#,
            named_params! {
                ":id": row.id,
                ":start_at": row.start_at,
                ":end_at": row.end_at,
                ":duration_minutes": row.duration_minutes,
                ":client_identity": row.client_identity,
                ":service_name": row.service_name,
                ":barber_id": row.barber_id,
                ":location_id": row.location_id,
                ":status": row.status,
                ":version": row.version,
                ":updated_at": row.updated_at,
                ":expected_version": expected_version,
            },
        )?;
        Ok(changed)
    }
}
