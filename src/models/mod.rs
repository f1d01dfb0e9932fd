pub mod appointment;
pub mod audit;
pub mod conflict;
pub mod constraints;
pub mod optimization;
pub mod resolution;
pub mod settings;
pub mod solution;
