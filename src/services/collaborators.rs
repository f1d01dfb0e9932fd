use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::error::AppResult;
use crate::models::appointment::{Appointment, AppointmentPatch, ResourceKey};
use crate::models::audit::AuditEvent;
use crate::models::constraints::WorkingConstraints;

/// Read side of the appointment data: a snapshot for one resource and window.
#[async_trait]
pub trait AppointmentSource: Send + Sync {
    async fn list_appointments(
        &self,
        resource: &ResourceKey,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> AppResult<Vec<Appointment>>;
}

#[async_trait]
pub trait ConstraintsSource: Send + Sync {
    async fn working_constraints(&self, resource: &ResourceKey) -> AppResult<WorkingConstraints>;
}

/// Result of a version-checked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied { version: i64 },
    VersionConflict { current: Option<i64> },
    NotFound,
}

/// Write side used while applying resolutions.
///
/// Every write carries the version the caller read; a store must refuse the
/// write when the stored version differs and report it as a conflict rather
/// than an error.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn fetch_appointment(&self, id: &str) -> AppResult<Option<Appointment>>;

    async fn update_appointment(
        &self,
        id: &str,
        patch: &AppointmentPatch,
        expected_version: i64,
    ) -> AppResult<UpdateOutcome>;

    /// Writes `snapshot` back verbatim, version included.
    async fn restore_appointment(
        &self,
        snapshot: &Appointment,
        expected_version: i64,
    ) -> AppResult<UpdateOutcome>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> AppResult<()>;
}
