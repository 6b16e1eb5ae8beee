//! Rule-based configuration validation

pub mod checks;
pub mod engine;
pub mod report;
pub mod rules;

pub use engine::{EngineOptions, ValidateOptions, ValidationEngine};
pub use report::ValidationReport;
