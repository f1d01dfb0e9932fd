use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::db::repositories::audit_repository::{AuditEventRow, AuditRepository};
use crate::db::DbPool;
use crate::error::AppResult;
use crate::models::audit::{AuditEvent, AuditRecord};
use crate::services::collaborators::AuditSink;

impl AuditRecord {
    pub fn from_event(event: &AuditEvent) -> AppResult<Self> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            event_name: event.name().to_string(),
            payload: serde_json::to_value(event)?,
            recorded_at: Utc::now().to_rfc3339(),
        })
    }
}

/// Writes audit events to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &AuditEvent) -> AppResult<()> {
        let payload = serde_json::to_string(event)?;
        info!(target: "app::audit", event = event.name(), %payload, "audit event");
        Ok(())
    }
}

/// Persists audit events as JSON rows in `audit_events`.
#[derive(Debug, Clone)]
pub struct SqliteAuditSink {
    db: DbPool,
}

impl SqliteAuditSink {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn list(&self) -> AppResult<Vec<AuditRecord>> {
        let rows = self.db.with_connection(AuditRepository::list)?;
        rows.into_iter().map(AuditEventRow::into_record).collect()
    }

    pub fn list_by_event(&self, event_name: &str) -> AppResult<Vec<AuditRecord>> {
        let rows = self
            .db
            .with_connection(|conn| AuditRepository::list_by_event(conn, event_name))?;
        rows.into_iter().map(AuditEventRow::into_record).collect()
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, event: &AuditEvent) -> AppResult<()> {
        let record = AuditRecord::from_event(event)?;
        let row = AuditEventRow::from_record(&record)?;
        self.db
            .with_connection(|conn| AuditRepository::insert(conn, &row))?;
        info!(
            target: "app::audit",
            event = %record.event_name,
            audit_id = %record.id,
            "audit event stored"
        );
        Ok(())
    }
}
