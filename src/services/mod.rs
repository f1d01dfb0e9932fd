pub mod audit_service;
pub mod collaborators;
pub mod conflict_detector;
pub mod conflict_service;
pub mod optimization_advisor;
pub mod resolution_coordinator;
pub mod schedule_utils;
pub mod scoring;
pub mod severity;
pub mod solution_generator;
