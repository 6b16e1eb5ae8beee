//! Orchestrator API models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ================================= RUN EVENTS ==================================== //

/// Status carried by a single stage transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Running,
    Ok,
    Failed,
}

/// One stage transition within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: String,
    pub status: StageStatus,
    pub detail: Option<String>,
}

/// Terminal status of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub ok: bool,
    pub summary: Option<String>,
}

/// An element of a run's event stream.
///
/// Serialized with the SSE event name as the tag so that the same shape is
/// used on the wire and in recorded history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum RunEvent {
    Stage(StageEvent),
    Status(StatusEvent),
}

impl RunEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::Stage(_) => "stage",
            RunEvent::Status(_) => "status",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Status(_))
    }

    /// The payload alone, as sent in an SSE `data` field
    pub fn data_json(&self) -> String {
        let data = match self {
            RunEvent::Stage(event) => serde_json::to_string(event),
            RunEvent::Status(event) => serde_json::to_string(event),
        };
        data.unwrap_or_default()
    }
}

/// A run as shown to clients. `ok` is `null` while the run is in progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunView {
    pub run_id: String,
    pub target: String,
    pub ok: Option<bool>,
    pub summary: Option<String>,
    pub events: Vec<StageEvent>,
    pub config_digest: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ================================= VALIDATION ==================================== //

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A field-scoped validation finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub severity: Severity,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub code: String,
}

/// Declared type of a validated field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Url,
    Port,
}

/// Declarative per-field contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub field: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub custom_rules: Vec<String>,
}

/// Simple validation response (`POST /api/validate`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub ok: bool,
    pub checks: BTreeMap<String, String>,
}

/// Setup wizard validation request (`POST /api/setup/verify`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupVerifyRequest {
    pub config: serde_json::Value,
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub skip_service_checks: bool,
}

/// Detailed validation result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedValidation {
    pub success: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationError>,
    pub client_side_rules: Vec<ValidationRule>,
    pub duration_ms: u64,
}

/// Setup wizard validation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupVerifyResponse {
    pub success: bool,
    pub result: DetailedValidation,
    pub next_steps: Vec<String>,
    pub estimated_time: String,
}

// =================================== APPLY ======================================= //

/// Apply response (`POST /api/apply`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResponse {
    pub ok: bool,
    pub run_id: Option<String>,
    pub events: Vec<StageEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationError>,
}

/// Recent runs query (`GET /api/runs/recent`)
#[derive(Debug, Clone, Deserialize)]
pub struct RecentRunsQuery {
    pub limit: Option<usize>,
}

/// Recent runs response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentRunsResponse {
    pub runs: Vec<RunView>,
    pub total: usize,
}

// ================================== PREVIEW ====================================== //

/// One changed leaf field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub path: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
    pub affected_services: Vec<String>,
}

/// Blast radius of a candidate configuration (`POST /api/preview`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preview {
    pub changes: Vec<Change>,
    pub services_to_restart: Vec<String>,
    pub services_to_reconfigure: Vec<String>,
}

impl Preview {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

// =================================== MISC ======================================== //

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}
