//! Apply orchestrator: the façade behind every HTTP operation

use std::sync::Arc;

use openapi_server::{Preview, RecentRunsResponse, RunEvent, RunView, SetupVerifyResponse, ValidateResponse};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::errors::StackError;
use crate::impact::diff;
use crate::models::config::{config_digest, enabled_services_in};
use crate::pipeline::{Collaborators, Pipeline, PipelineInput, PipelineOutcome, PipelineSettings};
use crate::runs::{EventBroker, RunRegistry};
use crate::storage::BaselineStore;
use crate::validation::{ValidateOptions, ValidationEngine, ValidationReport};

/// Runs returned by the dashboard listing when no limit is given
pub const DEFAULT_RECENT_LIMIT: usize = 20;

/// Validates, previews and applies configurations against one target
pub struct ApplyOrchestrator {
    target: String,
    engine: Arc<ValidationEngine>,
    broker: Arc<EventBroker>,
    baseline: Arc<BaselineStore>,
    pipeline: Arc<Pipeline>,
}

impl ApplyOrchestrator {
    pub fn new(
        target: impl Into<String>,
        engine: Arc<ValidationEngine>,
        broker: Arc<EventBroker>,
        baseline: Arc<BaselineStore>,
        collaborators: Collaborators,
        settings: PipelineSettings,
    ) -> Self {
        let pipeline = Pipeline::new(engine.clone(), collaborators, broker.clone(), settings);
        Self {
            target: target.into(),
            engine,
            broker,
            baseline,
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        self.broker.registry()
    }

    /// Full validation against the last applied baseline
    pub async fn validate(&self, config: &Value) -> ValidationReport {
        let last_applied = self.baseline.get().await;
        self.engine
            .validate(config, last_applied.as_ref(), ValidateOptions::full())
            .await
    }

    /// `{ok, checks}` form
    pub async fn validate_simple(&self, config: &Value) -> ValidateResponse {
        self.validate(config).await.to_simple()
    }

    /// Detailed validation for the setup wizard
    pub async fn setup_verify(&self, config: &Value, options: ValidateOptions) -> SetupVerifyResponse {
        let last_applied = self.baseline.get().await;
        let report = self
            .engine
            .validate(config, last_applied.as_ref(), options)
            .await;

        let next_steps = next_steps(&report);
        let estimated_time = estimated_time(enabled_services_in(config).len());
        let result = report.to_detailed(self.engine.rules().client_side_rules());

        SetupVerifyResponse {
            success: report.success,
            result,
            next_steps,
            estimated_time,
        }
    }

    /// Change-impact of `candidate` against the last applied configuration
    pub async fn preview(&self, candidate: &Value) -> Preview {
        let previous = self
            .baseline
            .get()
            .await
            .unwrap_or_else(|| Value::Object(Default::default()));
        diff(&previous, candidate)
    }

    /// Start applying `config`.
    ///
    /// Returns the new run id as soon as the run is registered; progress is
    /// published through the broker.
    pub async fn apply(&self, config: Value) -> Result<String, StackError> {
        if let Some(run_id) = self.registry().running_run(&self.target) {
            return Err(StackError::Conflict {
                target: self.target.clone(),
                run_id,
            });
        }

        let last_applied = self.baseline.get().await;
        let report = self
            .engine
            .validate(&config, last_applied.as_ref(), ValidateOptions::full())
            .await;
        if !report.success {
            info!("Apply rejected with {} validation error(s)", report.errors.len());
            return Err(StackError::Validation(Box::new(report)));
        }

        // create_run re-checks for an in-flight run under the registry lock
        let run_id = self.registry().create_run(&self.target, &config_digest(&config))?;
        info!("Run {} started for target {}", run_id, self.target);

        let input = PipelineInput {
            run_id: run_id.clone(),
            document: config,
            last_applied,
        };
        tokio::spawn(supervise(
            self.pipeline.clone(),
            self.broker.clone(),
            self.baseline.clone(),
            input,
        ));

        Ok(run_id)
    }

    pub fn get_run(&self, run_id: &str) -> Result<RunView, StackError> {
        self.registry()
            .get(run_id)
            .map(|run| run.view())
            .ok_or_else(|| StackError::NotFound(format!("run {}", run_id)))
    }

    /// Newest runs first, capped at the retention count
    pub fn recent_runs(&self, limit: Option<usize>) -> RecentRunsResponse {
        let registry = self.registry();
        let limit = limit.unwrap_or(DEFAULT_RECENT_LIMIT).min(registry.retention());
        let runs: Vec<RunView> = registry.list_recent(limit).iter().map(|r| r.view()).collect();
        RecentRunsResponse {
            total: registry.len(),
            runs,
        }
    }

    pub fn subscribe(&self, run_id: &str) -> Result<mpsc::Receiver<RunEvent>, StackError> {
        self.broker.subscribe(run_id)
    }
}

/// Drive one run to its terminal state.
///
/// The pipeline runs in its own task so a panic still completes the run.
async fn supervise(
    pipeline: Arc<Pipeline>,
    broker: Arc<EventBroker>,
    baseline: Arc<BaselineStore>,
    input: PipelineInput,
) {
    let run_id = input.run_id.clone();
    let document = input.document.clone();

    let handle = tokio::spawn(async move { pipeline.run(&input).await });
    let mut outcome = match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("[{}] pipeline task aborted: {}", run_id, e);
            PipelineOutcome {
                ok: false,
                summary: format!("pipeline aborted: {}", e),
            }
        }
    };

    // A run only succeeds once its baseline is recorded
    if outcome.ok {
        if let Err(e) = baseline.save(&document).await {
            warn!("[{}] failed to persist applied configuration: {}", run_id, e);
            outcome.ok = false;
            outcome.summary.push_str(&format!("; failed to record applied configuration: {}", e));
        }
    }

    match broker.complete(&run_id, outcome.ok, Some(outcome.summary)) {
        Ok(run) => info!("Run {} finished (ok={})", run.run_id, outcome.ok),
        Err(e) => error!("[{}] failed to complete run: {}", run_id, e),
    }
}

fn next_steps(report: &ValidationReport) -> Vec<String> {
    if !report.success {
        let mut steps: Vec<String> = report
            .errors
            .iter()
            .map(|e| format!("Fix {}: {}", e.field, e.message))
            .collect();
        steps.push("Re-run verification".to_string());
        return steps;
    }

    let mut steps = Vec::new();
    if !report.warnings.is_empty() {
        steps.push(format!("Review {} warning(s)", report.warnings.len()));
    }
    steps.push("Preview the changes".to_string());
    steps.push("Apply the configuration".to_string());
    steps
}

/// Rough apply duration: image pulls and first boot dominate
fn estimated_time(enabled_services: usize) -> String {
    let secs = 60 + 30 * enabled_services as u64;
    let minutes = secs.div_ceil(60);
    if minutes == 1 {
        "about 1 minute".to_string()
    } else {
        format!("about {} minutes", minutes)
    }
}
