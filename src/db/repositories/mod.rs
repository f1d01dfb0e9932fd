pub mod appointment_repository;
pub mod audit_repository;
pub mod constraints_repository;
pub mod settings_repository;
