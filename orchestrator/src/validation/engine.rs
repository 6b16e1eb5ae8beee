//! Validation engine
//!
//! Two phases per field: cheap local checks (required, type, length, range,
//! pattern) and then the field's custom rules, which may do I/O. Fields are
//! independent; custom rules run concurrently across fields under a
//! semaphore, and sequentially (fail-fast) within a field.

use std::sync::Arc;
use std::time::{Duration, Instant};

use openapi_server::{FieldType, Severity, ValidationError};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::errors::{CollaboratorError, StackError};
use crate::models::config::shape_errors;
use crate::validation::checks::{CheckContext, CheckOutcome, CheckRegistry, Finding};
use crate::validation::report::{FieldOutcome, ValidationReport};
use crate::validation::rules::{expand_field, lookup, service_of, CompiledRule, RuleRegistry};

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Max custom-rule evaluations in flight
    pub max_concurrency: usize,

    /// Bound on a single custom check
    pub check_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            check_timeout: Duration::from_secs(5),
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOptions {
    /// Only evaluate fields present in the document
    pub partial: bool,

    /// Skip custom rules that call third-party service APIs
    pub skip_service_checks: bool,
}

impl ValidateOptions {
    /// Authoritative mode used before touching infrastructure
    pub fn full() -> Self {
        Self {
            partial: false,
            skip_service_checks: false,
        }
    }
}

/// Local-phase verdict for one field
enum Local {
    /// Absent in a partial document, or absent and optional
    Skip,
    Failed(ValidationError),
    Passed(Value),
}

pub struct ValidationEngine {
    rules: Arc<RuleRegistry>,
    checks: Arc<CheckRegistry>,
    http: reqwest::Client,
    options: EngineOptions,
}

impl ValidationEngine {
    pub fn new(
        rules: RuleRegistry,
        checks: CheckRegistry,
        options: EngineOptions,
    ) -> Result<Self, StackError> {
        checks.ensure_covers(&rules)?;
        let http = reqwest::Client::builder()
            .timeout(options.check_timeout)
            .build()?;
        Ok(Self {
            rules: Arc::new(rules),
            checks: Arc::new(checks),
            http,
            options,
        })
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    /// Evaluate `config` against every rule and merge the per-field results
    pub async fn validate(
        &self,
        config: &Value,
        last_applied: Option<&Value>,
        options: ValidateOptions,
    ) -> ValidationReport {
        let started = Instant::now();
        let document = Arc::new(config.clone());
        let last_applied = last_applied.map(|v| Arc::new(v.clone()));
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));

        let mut pending = Vec::new();
        for compiled in self.rules.rules() {
            for field in expand_field(&compiled.rule.field, config) {
                match check_local(compiled, &field, config, options.partial) {
                    Local::Skip => {}
                    Local::Failed(error) => {
                        pending.push(Pending::Done(FieldOutcome {
                            field,
                            error: Some(error),
                            warnings: Vec::new(),
                        }));
                    }
                    Local::Passed(value) => {
                        let rule_names: Vec<String> = compiled
                            .rule
                            .custom_rules
                            .iter()
                            .filter(|name| {
                                !(options.skip_service_checks
                                    && self
                                        .checks
                                        .get(name)
                                        .map(|c| c.calls_service())
                                        .unwrap_or(false))
                            })
                            .cloned()
                            .collect();

                        if rule_names.is_empty() {
                            pending.push(Pending::Done(FieldOutcome {
                                field,
                                error: None,
                                warnings: Vec::new(),
                            }));
                            continue;
                        }

                        let task = CustomTask {
                            field: field.clone(),
                            value,
                            rule_names,
                            document: document.clone(),
                            last_applied: last_applied.clone(),
                            checks: self.checks.clone(),
                            http: self.http.clone(),
                            timeout: self.options.check_timeout,
                        };
                        let sem = semaphore.clone();
                        let handle = tokio::spawn(async move {
                            let _permit = sem.acquire_owned().await.ok();
                            task.run().await
                        });
                        pending.push(Pending::Running(field, handle));
                    }
                }
            }
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for item in pending {
            match item {
                Pending::Done(outcome) => outcomes.push(outcome),
                Pending::Running(field, handle) => match handle.await {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => {
                        warn!("Custom checks for {} aborted: {}", field, e);
                        let error = to_error(
                            &field,
                            Severity::Error,
                            Finding::new("internal", format!("checks for {} aborted", field)),
                        );
                        outcomes.push(FieldOutcome {
                            field,
                            error: Some(error),
                            warnings: Vec::new(),
                        });
                    }
                },
            }
        }

        // Anything the rules let through must still decode as a StackConfig
        for (field, message) in shape_errors(config) {
            let prefix = format!("{}.", field);
            let covered = outcomes
                .iter()
                .any(|o| o.error.is_some() && (o.field == field || o.field.starts_with(&prefix)));
            if covered {
                continue;
            }
            let error = to_error(&field, Severity::Error, Finding::new("invalid_type", message));
            outcomes.push(FieldOutcome {
                field,
                error: Some(error),
                warnings: Vec::new(),
            });
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let report = ValidationReport::from_outcomes(outcomes, duration_ms);
        debug!(
            "Validation finished in {}ms: {} error(s), {} warning(s)",
            duration_ms,
            report.errors.len(),
            report.warnings.len()
        );
        report
    }
}

enum Pending {
    Done(FieldOutcome),
    Running(String, tokio::task::JoinHandle<FieldOutcome>),
}

/// Owned inputs for one field's custom rules
struct CustomTask {
    field: String,
    value: Value,
    rule_names: Vec<String>,
    document: Arc<Value>,
    last_applied: Option<Arc<Value>>,
    checks: Arc<CheckRegistry>,
    http: reqwest::Client,
    timeout: Duration,
}

impl CustomTask {
    async fn run(self) -> FieldOutcome {
        let ctx = CheckContext {
            field: &self.field,
            value: &self.value,
            service: service_of(&self.field),
            document: &self.document,
            last_applied: self.last_applied.as_deref(),
            http: &self.http,
        };

        let mut warnings = Vec::new();
        for name in &self.rule_names {
            let Some(check) = self.checks.get(name) else {
                let finding = Finding::new("internal", format!("unknown check '{}'", name));
                return self.outcome(Some(to_error(&self.field, Severity::Error, finding)), warnings);
            };

            let result = match tokio::time::timeout(self.timeout, check.check(&ctx)).await {
                Ok(result) => result,
                Err(_) => Err(CollaboratorError::Timeout(self.timeout.as_secs())),
            };

            match result {
                Ok(CheckOutcome::Pass) => {}
                Ok(CheckOutcome::Warn(finding)) => {
                    warnings.push(to_error(&self.field, Severity::Warning, finding));
                }
                Ok(CheckOutcome::Fail(finding)) => {
                    return self.outcome(Some(to_error(&self.field, Severity::Error, finding)), warnings);
                }
                Err(e) => {
                    debug!("Check {} on {} could not complete: {}", name, self.field, e);
                    let finding = Finding::new(
                        "check_unavailable",
                        format!("{} could not be verified: {}", name, e),
                    )
                    .with_suggestion("retry once the target is reachable");
                    return self.outcome(Some(to_error(&self.field, Severity::Error, finding)), warnings);
                }
            }
        }

        self.outcome(None, warnings)
    }

    fn outcome(&self, error: Option<ValidationError>, warnings: Vec<ValidationError>) -> FieldOutcome {
        FieldOutcome {
            field: self.field.clone(),
            error,
            warnings,
        }
    }
}

fn to_error(field: &str, severity: Severity, finding: Finding) -> ValidationError {
    ValidationError {
        field: field.to_string(),
        message: finding.message,
        severity,
        suggestions: finding.suggestions,
        code: finding.code,
    }
}

fn local_error(field: &str, code: &str, message: String) -> Local {
    Local::Failed(to_error(field, Severity::Error, Finding::new(code, message)))
}

/// Required, then type/length/range, then pattern
fn check_local(compiled: &CompiledRule, field: &str, doc: &Value, partial: bool) -> Local {
    let rule = &compiled.rule;
    let value = lookup(doc, field);
    let blank = match value {
        None => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    };

    if blank {
        // A partial document only speaks for the fields it carries
        if partial && value.is_none() {
            return Local::Skip;
        }
        if rule.required {
            return local_error(field, "required", "required".to_string());
        }
        if value.is_none() {
            return Local::Skip;
        }
    }

    let Some(value) = value else {
        return Local::Skip;
    };

    if !type_matches(rule.field_type, value) {
        return local_error(
            field,
            "invalid_type",
            format!("expected {}", type_name(rule.field_type)),
        );
    }

    let length = match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        _ => None,
    };
    if let Some(len) = length {
        if let Some(min) = rule.min_length {
            if len < min {
                return local_error(field, "too_short", format!("must be at least {} characters", min));
            }
        }
        if let Some(max) = rule.max_length {
            if len > max {
                return local_error(field, "too_long", format!("must be at most {} characters", max));
            }
        }
    }

    if let Some(number) = value.as_f64() {
        let (min, max) = match rule.field_type {
            FieldType::Port => (
                Some(rule.min_value.map_or(1.0, |m| m.max(1.0))),
                Some(rule.max_value.map_or(65535.0, |m| m.min(65535.0))),
            ),
            _ => (rule.min_value, rule.max_value),
        };
        let below = min.is_some_and(|m| number < m);
        let above = max.is_some_and(|m| number > m);
        if below || above {
            let message = match (min, max) {
                (Some(lo), Some(hi)) => format!("must be between {} and {}", lo, hi),
                (Some(lo), None) => format!("must be at least {}", lo),
                (None, Some(hi)) => format!("must be at most {}", hi),
                (None, None) => "out of range".to_string(),
            };
            return local_error(field, "out_of_range", message);
        }
    }

    if let (Some(pattern), Some(s)) = (&compiled.pattern, value.as_str()) {
        if !pattern.is_match(s) {
            return local_error(
                field,
                "pattern_mismatch",
                format!("does not match {}", pattern.as_str()),
            );
        }
    }

    Local::Passed(value.clone())
}

fn type_matches(field_type: FieldType, value: &Value) -> bool {
    match field_type {
        FieldType::String => value.is_string(),
        FieldType::Integer | FieldType::Port => value.is_i64() || value.is_u64(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Array => value.is_array(),
        FieldType::Object => value.is_object(),
        FieldType::Url => value
            .as_str()
            .map(|s| url::Url::parse(s).is_ok())
            .unwrap_or(false),
    }
}

fn type_name(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::String => "a string",
        FieldType::Integer => "an integer",
        FieldType::Port => "a port number",
        FieldType::Number => "a number",
        FieldType::Boolean => "true or false",
        FieldType::Array => "a list",
        FieldType::Object => "an object",
        FieldType::Url => "a valid URL",
    }
}
