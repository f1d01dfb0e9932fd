use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::appointment::{Appointment, ResourceKey};
use crate::models::audit::AuditEvent;
use crate::models::conflict::{ConflictSeverity, ConflictType, DetectionReport};
use crate::models::constraints::WorkingConstraints;
use crate::models::optimization::OptimizationReport;
use crate::models::resolution::{ResolutionOutcome, ResolutionSelections};
use crate::models::settings::EngineSettings;
use crate::services::collaborators::{
    AppointmentSource, AppointmentStore, AuditSink, ConstraintsSource,
};
use crate::services::conflict_detector::ConflictDetector;
use crate::services::optimization_advisor::OptimizationAdvisor;
use crate::services::resolution_coordinator::ResolutionCoordinator;
use crate::services::solution_generator::SolutionGenerator;

/// One detection pass over one resource and window. The caller keeps it
/// while choosing solutions and hands it back to apply them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReview {
    pub resource: ResourceKey,
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
    pub constraints: WorkingConstraints,
    pub appointments: Vec<Appointment>,
    pub report: DetectionReport,
}

/// Ties the pure engine to its collaborators.
pub struct ConflictService {
    appointments: Arc<dyn AppointmentSource>,
    constraints: Arc<dyn ConstraintsSource>,
    audit: Arc<dyn AuditSink>,
    detector: ConflictDetector,
    coordinator: ResolutionCoordinator,
    advisor: OptimizationAdvisor,
}

impl ConflictService {
    pub fn new(
        appointments: Arc<dyn AppointmentSource>,
        constraints: Arc<dyn ConstraintsSource>,
        store: Arc<dyn AppointmentStore>,
        audit: Arc<dyn AuditSink>,
        settings: EngineSettings,
    ) -> AppResult<Self> {
        settings.validate()?;
        let generator =
            SolutionGenerator::default().with_alternative_slots(settings.alternative_slot_count);

        Ok(Self {
            coordinator: ResolutionCoordinator::from_settings(store, Arc::clone(&audit), &settings),
            detector: ConflictDetector::new(generator),
            advisor: OptimizationAdvisor::new(settings),
            appointments,
            constraints,
            audit,
        })
    }

    pub fn coordinator(&self) -> &ResolutionCoordinator {
        &self.coordinator
    }

    /// Loads a snapshot and its constraints, runs detection and records a
    /// `ConflictsDetected` event.
    pub async fn review(
        &self,
        resource: &ResourceKey,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> AppResult<ConflictReview> {
        if to <= from {
            return Err(AppError::validation("review window end must be after its start"));
        }

        let constraints = self.constraints.working_constraints(resource).await?;
        let appointments = self.appointments.list_appointments(resource, from, to).await?;
        let report = self.detector.detect(&appointments, &constraints)?;

        let mut by_severity: BTreeMap<ConflictSeverity, usize> = BTreeMap::new();
        let mut by_type: BTreeMap<ConflictType, usize> = BTreeMap::new();
        for conflict in &report.conflicts {
            *by_severity.entry(conflict.severity).or_default() += 1;
            *by_type.entry(conflict.conflict_type).or_default() += 1;
        }
        let event = AuditEvent::ConflictsDetected {
            total: report.conflicts.len(),
            by_severity,
            by_type,
            excluded_appointments: report.errors.len(),
        };
        if let Err(err) = self.audit.record(&event).await {
            warn!(target: "app::audit", event = event.name(), error = %err, "audit sink rejected event");
        }

        info!(
            target: "app::detector",
            resource = %resource,
            conflicts = report.conflicts.len(),
            "review prepared"
        );

        Ok(ConflictReview {
            resource: resource.clone(),
            from,
            to,
            constraints,
            appointments,
            report,
        })
    }

    /// Applies `selections` and records each selected conflict's final status
    /// on the review, so a settled conflict cannot be applied twice.
    pub async fn apply_resolutions(
        &self,
        review: &mut ConflictReview,
        selections: ResolutionSelections,
    ) -> AppResult<ResolutionOutcome> {
        let outcome = self
            .coordinator
            .apply_resolutions(&review.report.conflicts, selections)
            .await?;

        for conflict in &mut review.report.conflicts {
            if let Some(status) = outcome.conflict_statuses.get(&conflict.id) {
                conflict.status = *status;
            }
        }
        Ok(outcome)
    }

    /// Never fails: any error yields an empty report flagged as degraded,
    /// so advice problems cannot get in the way of conflict handling.
    pub async fn analyze_optimization(
        &self,
        resource: &ResourceKey,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> OptimizationReport {
        match self.try_analyze(resource, from, to).await {
            Ok(report) => report,
            Err(err) => {
                warn!(
                    target: "app::optimizer",
                    resource = %resource,
                    error = %err,
                    "optimization analysis unavailable"
                );
                OptimizationReport::unavailable(err.to_string())
            }
        }
    }

    /// Runs the advisor over an already loaded review.
    pub fn analyze_review(&self, review: &ConflictReview) -> OptimizationReport {
        self.advisor
            .analyze(&review.appointments, &review.constraints)
            .unwrap_or_else(|err| {
                warn!(target: "app::optimizer", error = %err, "optimization analysis unavailable");
                OptimizationReport::unavailable(err.to_string())
            })
    }

    async fn try_analyze(
        &self,
        resource: &ResourceKey,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> AppResult<OptimizationReport> {
        let constraints = self.constraints.working_constraints(resource).await?;
        let appointments = self.appointments.list_appointments(resource, from, to).await?;
        self.advisor.analyze(&appointments, &constraints)
    }
}
