use std::fmt;

use rusqlite;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, warn};

pub type AppResult<T> = Result<T, AppError>;

/// Reasons a selection set is rejected before any mutation starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SelectionError {
    EmptySelection,
    #[serde(rename_all = "camelCase")]
    UnknownConflict { conflict_id: String },
    #[serde(rename_all = "camelCase")]
    SolutionNotOffered {
        conflict_id: String,
        solution_id: String,
    },
    #[serde(rename_all = "camelCase")]
    CollidingSelections {
        appointment_id: String,
        first_conflict_id: String,
        second_conflict_id: String,
    },
}

impl SelectionError {
    pub fn code(&self) -> &'static str {
        match self {
            SelectionError::EmptySelection => "EMPTY_SELECTION",
            SelectionError::UnknownConflict { .. } => "UNKNOWN_CONFLICT",
            SelectionError::SolutionNotOffered { .. } => "SOLUTION_NOT_OFFERED",
            SelectionError::CollidingSelections { .. } => "COLLIDING_SELECTIONS",
        }
    }
}

impl fmt::Display for SelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionError::EmptySelection => f.write_str("no solutions were selected"),
            SelectionError::UnknownConflict { conflict_id } => {
                write!(f, "conflict {conflict_id} is not part of this review")
            }
            SelectionError::SolutionNotOffered {
                conflict_id,
                solution_id,
            } => write!(
                f,
                "solution {solution_id} was not offered for conflict {conflict_id}"
            ),
            SelectionError::CollidingSelections {
                appointment_id,
                first_conflict_id,
                second_conflict_id,
            } => write!(
                f,
                "colliding selections for appointment {appointment_id} (conflicts {first_conflict_id} and {second_conflict_id})"
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {message}")]
    Database { message: String },

    #[error("record not found")]
    NotFound,

    #[error("record conflict: {message}")]
    Conflict { message: String },

    #[error("validation failed: {message}")]
    Validation {
        message: String,
        details: Option<JsonValue>,
    },

    #[error("selection rejected: {0}")]
    Selection(SelectionError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("settings error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "app::validation", %message, "validation error");
        AppError::Validation {
            message,
            details: None,
        }
    }

    pub fn validation_with_details(message: impl Into<String>, details: JsonValue) -> Self {
        let message = message.into();
        warn!(target: "app::validation", %message, details = %details, "validation error with details");
        AppError::Validation {
            message,
            details: Some(details),
        }
    }

    pub fn selection(reason: SelectionError) -> Self {
        warn!(target: "app::resolution", code = reason.code(), reason = %reason, "selection rejected");
        AppError::Selection(reason)
    }

    pub fn selection_reason(&self) -> Option<&SelectionError> {
        match self {
            AppError::Selection(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "app::conflict", %message, "conflict error");
        AppError::Conflict { message }
    }

    pub fn not_found() -> Self {
        warn!(target: "app::db", "resource not found");
        AppError::NotFound
    }

    pub fn database(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(target: "app::db", %message, "database error");
        AppError::Database { message }
    }

    pub fn other(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(target: "app::other", %message, "other error");
        AppError::Other(message)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(error: rusqlite::Error) -> Self {
        use rusqlite::Error::{QueryReturnedNoRows, SqliteFailure};
        use rusqlite::ErrorCode;

        match &error {
            QueryReturnedNoRows => AppError::not_found(),
            SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
                AppError::conflict("unique or check constraint violated")
            }
            _ => {
                error!(target: "app::db", error = ?error, "sqlite error");
                AppError::database(error.to_string())
            }
        }
    }
}
