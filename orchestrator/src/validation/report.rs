//! Merged validation verdict

use std::collections::BTreeMap;

use openapi_server::{DetailedValidation, ValidateResponse, ValidationError, ValidationRule};

/// Result of evaluating one field
#[derive(Debug, Clone)]
pub struct FieldOutcome {
    pub field: String,
    pub error: Option<ValidationError>,
    pub warnings: Vec<ValidationError>,
}

/// Merged result across every evaluated field.
///
/// `success` is true exactly when `errors` is empty; warnings never block.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub success: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationError>,
    /// Simple-form check name to `"ok"` or the first error message
    pub checks: BTreeMap<String, String>,
    pub duration_ms: u64,
}

impl ValidationReport {
    pub fn from_outcomes(outcomes: Vec<FieldOutcome>, duration_ms: u64) -> Self {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut checks = BTreeMap::new();

        for outcome in outcomes {
            let key = check_key(&outcome.field);
            warnings.extend(outcome.warnings);
            match outcome.error {
                Some(error) => {
                    // First error for a field wins, even across rules
                    let slot = checks.entry(key).or_insert_with(|| "ok".to_string());
                    if slot == "ok" {
                        *slot = error.message.clone();
                    }
                    errors.push(error);
                }
                None => {
                    checks.entry(key).or_insert_with(|| "ok".to_string());
                }
            }
        }

        Self {
            success: errors.is_empty(),
            errors,
            warnings,
            checks,
            duration_ms,
        }
    }

    /// First error recorded for `field`
    pub fn error_for(&self, field: &str) -> Option<&ValidationError> {
        self.errors.iter().find(|e| e.field == field)
    }

    pub fn to_simple(&self) -> ValidateResponse {
        ValidateResponse {
            ok: self.success,
            checks: self.checks.clone(),
        }
    }

    pub fn to_detailed(&self, client_side_rules: Vec<ValidationRule>) -> DetailedValidation {
        DetailedValidation {
            success: self.success,
            errors: self.errors.clone(),
            warnings: self.warnings.clone(),
            client_side_rules,
            duration_ms: self.duration_ms,
        }
    }
}

/// Simple-form key: the field path without its top-level section
pub fn check_key(field: &str) -> String {
    field
        .split_once('.')
        .map(|(_, rest)| rest.to_string())
        .unwrap_or_else(|| field.to_string())
}
