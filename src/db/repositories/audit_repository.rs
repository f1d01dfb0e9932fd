use std::convert::TryFrom;

use rusqlite::{named_params, Connection, Row};

use crate::error::{AppError, AppResult};
use crate::models::audit::AuditRecord;

#[derive(Debug, Clone)]
pub struct AuditEventRow {
    pub id: String,
    pub event_name: String,
    pub payload: String,
    pub recorded_at: String,
}

impl AuditEventRow {
    pub fn from_record(record: &AuditRecord) -> AppResult<Self> {
        Ok(Self {
            id: record.id.clone(),
            event_name: record.event_name.clone(),
            payload: serde_json::to_string(&record.payload)?,
            recorded_at: record.recorded_at.clone(),
        })
    }

    pub fn into_record(self) -> AppResult<AuditRecord> {
        let payload = serde_json::from_str(&self.payload).map_err(|err| {
            AppError::database(format!("audit event {} has a corrupt payload: {err}", self.id))
        })?;
        Ok(AuditRecord {
            id: self.id,
            event_name: self.event_name,
            payload,
            recorded_at: self.recorded_at,
        })
    }
}

impl TryFrom<&Row<'_>> for AuditEventRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            event_name: row.get("event_name")?,
            payload: row.get("payload")?,
            recorded_at: row.get("recorded_at")?,
        })
    }
}

pub struct AuditRepository;

impl AuditRepository {
    pub fn insert(conn: &Connection, row: &AuditEventRow) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO audit_events (id, event_name, payload, recorded_at)
                VALUES (:id, :event_name, :payload, :recorded_at)
            "#,
            named_params! {
                ":id": row.id,
                ":event_name": row.event_name,
                ":payload": row.payload,
                ":recorded_at": row.recorded_at,
            },
        )?;
        Ok(())
    }

    /// Events in the order they were recorded.
    pub fn list(conn: &Connection) -> AppResult<Vec<AuditEventRow>> {
        let mut stmt = conn.prepare(
            "SELECT id, event_name, payload, recorded_at FROM audit_events ORDER BY rowid ASC",
        )?;
        let rows = stmt
            .query_map([], |row| AuditEventRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_by_event(conn: &Connection, event_name: &str) -> AppResult<Vec<AuditEventRow>> {
        let mut stmt = conn.prepare(
            "SELECT id, event_name, payload, recorded_at FROM audit_events WHERE event_name = ?1 ORDER BY rowid ASC",
        )?;
        let rows = stmt
            .query_map([event_name], |row| AuditEventRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
