use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::conflict::{ConflictSeverity, ConflictType};
use crate::models::solution::SolutionType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "PascalCase")]
pub enum AuditEvent {
    #[serde(rename_all = "camelCase")]
    ConflictsDetected {
        total: usize,
        by_severity: BTreeMap<ConflictSeverity, usize>,
        by_type: BTreeMap<ConflictType, usize>,
        excluded_appointments: usize,
    },
    #[serde(rename_all = "camelCase")]
    SolutionSelected {
        conflict_id: String,
        solution_id: String,
        solution_type: SolutionType,
    },
    #[serde(rename_all = "camelCase")]
    ConflictsResolved {
        conflicts: usize,
        changes: usize,
        solution_types: BTreeMap<SolutionType, usize>,
    },
    #[serde(rename_all = "camelCase")]
    ConflictResolutionFailed {
        conflicts: usize,
        reason: String,
        #[serde(default)]
        appointment_id: Option<String>,
        rolled_back: usize,
    },
}

impl AuditEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuditEvent::ConflictsDetected { .. } => "ConflictsDetected",
            AuditEvent::SolutionSelected { .. } => "SolutionSelected",
            AuditEvent::ConflictsResolved { .. } => "ConflictsResolved",
            AuditEvent::ConflictResolutionFailed { .. } => "ConflictResolutionFailed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: String,
    pub event_name: String,
    pub payload: serde_json::Value,
    pub recorded_at: String,
}
