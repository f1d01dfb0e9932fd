//! Appointment conflict detection and resolution.
//!
//! Detection, solution proposal and optimisation analysis are pure functions
//! over a snapshot. [`ResolutionCoordinator`] is the only writer and applies
//! selected solutions as one all-or-nothing batch.

pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{AppError, AppResult, SelectionError};
pub use services::conflict_detector::{detect_conflicts, ConflictDetector};
pub use services::conflict_service::{ConflictReview, ConflictService};
pub use services::optimization_advisor::{analyze_optimization, OptimizationAdvisor};
pub use services::resolution_coordinator::ResolutionCoordinator;
pub use services::solution_generator::{propose_solutions, SolutionGenerator};
