use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    #[default]
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    /// Cancelled and no-show bookings no longer occupy the chair.
    pub fn holds_time(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::NoShow)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for AppointmentStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "scheduled" => Ok(AppointmentStatus::Scheduled),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "in_progress" => Ok(AppointmentStatus::InProgress),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            "no_show" => Ok(AppointmentStatus::NoShow),
            other => Err(format!("unsupported appointment status: {other}")),
        }
    }
}

/// The schedulable timeline an appointment occupies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct ResourceKey {
    pub barber_id: String,
    #[serde(default)]
    pub location_id: Option<String>,
}

impl ResourceKey {
    pub fn new(barber_id: impl Into<String>, location_id: Option<String>) -> Self {
        Self {
            barber_id: barber_id.into(),
            location_id,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location_id {
            Some(location) => write!(f, "{}@{}", self.barber_id, location),
            None => f.write_str(&self.barber_id),
        }
    }
}

/// Booking record as handed over by the booking system. Times are kept as
/// the raw strings the system stores so a rollback can write them back
/// unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    #[serde(default)]
    pub start_at: Option<String>,
    #[serde(default)]
    pub end_at: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
    pub client_identity: String,
    #[serde(default)]
    pub service_name: String,
    pub barber_id: String,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub status: AppointmentStatus,
    #[serde(default)]
    pub version: i64,
    /// Last write time as the store recorded it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Appointment {
    pub fn resource(&self) -> ResourceKey {
        ResourceKey::new(self.barber_id.clone(), self.location_id.clone())
    }
}

/// Field-level update sent to the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentPatch {
    #[serde(default)]
    pub start_at: Option<String>,
    #[serde(default)]
    pub end_at: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<i64>,
    #[serde(default)]
    pub status: Option<AppointmentStatus>,
}

impl AppointmentPatch {
    pub fn is_empty(&self) -> bool {
        self.start_at.is_none()
            && self.end_at.is_none()
            && self.duration_minutes.is_none()
            && self.status.is_none()
    }

    pub fn apply_to(&self, appointment: &mut Appointment) {
        if let Some(start_at) = &self.start_at {
            appointment.start_at = Some(start_at.clone());
        }
        if let Some(end_at) = &self.end_at {
            appointment.end_at = Some(end_at.clone());
        }
        if let Some(duration) = self.duration_minutes {
            appointment.duration_minutes = Some(duration);
        }
        if let Some(status) = self.status {
            appointment.status = status;
        }
    }
}
