//! Stage pipeline execution

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::CollaboratorError;
use crate::impact::{diff, newly_enabled};
use crate::models::config::StackConfig;
use crate::pipeline::collaborators::{Collaborators, RenderedArtifacts};
use crate::pipeline::stages::{Stage, StageReporter};
use crate::runs::broker::EventBroker;
use crate::utils::{calc_exp_backoff, CooldownOptions};
use crate::validation::{ValidateOptions, ValidationEngine};

/// Pipeline timeouts and thresholds
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Bound on the renderer call
    pub render_timeout: Duration,

    /// Bound on the deployer call
    pub deploy_timeout: Duration,

    /// Bound on configuring a single service
    pub configure_timeout: Duration,

    /// How long a single service may take to report healthy
    pub verify_timeout: Duration,

    /// Poll spacing while waiting for health
    pub verify_backoff: CooldownOptions,

    /// Fraction of configure targets that may fail before the run fails
    pub configure_failure_threshold: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            render_timeout: Duration::from_secs(120),
            deploy_timeout: Duration::from_secs(600),
            configure_timeout: Duration::from_secs(60),
            verify_timeout: Duration::from_secs(120),
            verify_backoff: CooldownOptions::default(),
            configure_failure_threshold: 0.5,
        }
    }
}

/// Inputs of one run
#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub run_id: String,
    pub document: Value,
    pub last_applied: Option<Value>,
}

/// Terminal verdict of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub ok: bool,
    pub summary: String,
}

/// Result of the configure stage
#[derive(Debug, Default)]
struct ConfigureReport {
    failed: Vec<String>,
    detail: String,
    /// More targets failed than the threshold allows
    over_threshold: bool,
}

impl PipelineOutcome {
    fn failed(stage: Stage, detail: &str) -> Self {
        Self {
            ok: false,
            summary: format!("{} failed: {}", stage, detail),
        }
    }
}

/// validate → render → deploy → configure → verify
pub struct Pipeline {
    engine: Arc<ValidationEngine>,
    collaborators: Collaborators,
    broker: Arc<EventBroker>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        engine: Arc<ValidationEngine>,
        collaborators: Collaborators,
        broker: Arc<EventBroker>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            engine,
            collaborators,
            broker,
            settings,
        }
    }

    pub async fn run(&self, input: &PipelineInput) -> PipelineOutcome {
        let reporter = StageReporter::new(self.broker.clone(), input.run_id.clone());

        // 1. Validate
        reporter.running(Stage::Validate);
        let config = match self.validate(input).await {
            Ok((config, detail)) => {
                reporter.ok(Stage::Validate, Some(detail));
                config
            }
            Err(detail) => {
                reporter.failed(Stage::Validate, Some(detail.clone()));
                return PipelineOutcome::failed(Stage::Validate, &detail);
            }
        };

        // 2. Render
        reporter.running(Stage::Render);
        let artifacts = match self.render(&config).await {
            Ok(artifacts) => {
                reporter.ok(
                    Stage::Render,
                    Some(format!("wrote {}", artifacts.compose_path.display())),
                );
                artifacts
            }
            Err(detail) => {
                reporter.failed(Stage::Render, Some(detail.clone()));
                return PipelineOutcome::failed(Stage::Render, &detail);
            }
        };

        // 3. Deploy
        reporter.running(Stage::Deploy);
        let started = match self.deploy(&config, &artifacts).await {
            Ok(started) => {
                reporter.ok(Stage::Deploy, Some(format!("{} service(s) up", started.len())));
                started
            }
            Err(detail) => {
                reporter.failed(Stage::Deploy, Some(detail.clone()));
                return PipelineOutcome::failed(Stage::Deploy, &detail);
            }
        };

        // 4. Configure (best-effort; the threshold only decides the verdict)
        reporter.running(Stage::Configure);
        let configured = self.configure(input, &config).await;
        reporter.ok(Stage::Configure, Some(configured.detail.clone()));

        // 5. Verify (best-effort)
        reporter.running(Stage::Verify);
        let unhealthy = self.verify(&config).await;
        let verify_detail = if unhealthy.is_empty() {
            "all enabled services healthy".to_string()
        } else {
            format!("unhealthy: {}", unhealthy.join(", "))
        };
        reporter.ok(Stage::Verify, Some(verify_detail));

        let mut summary = format!("Applied {} service(s)", started.len());
        if !configured.failed.is_empty() {
            summary.push_str(&format!("; configuration failed for {}", configured.failed.join(", ")));
        }
        if configured.over_threshold {
            summary.push_str(&format!(
                " (more than {:.0}% of configured services)",
                self.settings.configure_failure_threshold * 100.0
            ));
        }
        if !unhealthy.is_empty() {
            summary.push_str(&format!(
                "; still unhealthy after {:?}: {}",
                self.settings.verify_timeout,
                unhealthy.join(", ")
            ));
        }
        let ok = !configured.over_threshold;
        info!("[{}] {} (ok={})", input.run_id, summary, ok);

        PipelineOutcome { ok, summary }
    }

    async fn validate(&self, input: &PipelineInput) -> Result<(StackConfig, String), String> {
        let report = self
            .engine
            .validate(&input.document, input.last_applied.as_ref(), ValidateOptions::full())
            .await;

        if !report.success {
            let fields: Vec<String> = report
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(fields.join("; "));
        }

        let config = StackConfig::from_value(&input.document).map_err(|e| e.to_string())?;
        let mut detail = format!("{} field(s) checked", report.checks.len());
        if !report.warnings.is_empty() {
            detail.push_str(&format!(", {} warning(s)", report.warnings.len()));
        }
        Ok((config, detail))
    }

    async fn render(&self, config: &StackConfig) -> Result<RenderedArtifacts, String> {
        with_timeout(
            self.settings.render_timeout,
            self.collaborators.renderer.render(config),
        )
        .await
        .map_err(|e| e.to_string())
    }

    async fn deploy(
        &self,
        config: &StackConfig,
        artifacts: &RenderedArtifacts,
    ) -> Result<Vec<String>, String> {
        let result = tokio::time::timeout(
            self.settings.deploy_timeout,
            self.collaborators.deployer.deploy(config, artifacts),
        )
        .await;

        match result {
            Ok(Ok(started)) => Ok(started),
            Ok(Err(failure)) => {
                let mut detail = if failure.failed.is_empty() {
                    failure.message.clone()
                } else {
                    format!("{} ({})", failure.message, failure.failed.join(", "))
                };
                if !failure.started.is_empty() {
                    detail.push_str(&format!("; started: {}", failure.started.join(", ")));
                }
                Err(detail)
            }
            Err(_) => {
                let mut detail = CollaboratorError::Timeout(self.settings.deploy_timeout.as_secs()).to_string();
                let running = with_timeout(
                    self.settings.configure_timeout,
                    self.collaborators.deployer.running(config, artifacts),
                )
                .await;
                match running {
                    Ok(started) if !started.is_empty() => {
                        detail.push_str(&format!("; started: {}", started.join(", ")));
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Could not list running services after deploy timeout: {}", e),
                }
                Err(detail)
            }
        }
    }

    /// Configure newly enabled services and those with reconfigure-class
    /// changes
    async fn configure(&self, input: &PipelineInput, config: &StackConfig) -> ConfigureReport {
        let previous = input.last_applied.clone().unwrap_or(Value::Object(Default::default()));
        let preview = diff(&previous, &input.document);

        let enabled = config.enabled_services();
        let mut targets: Vec<String> = newly_enabled(input.last_applied.as_ref(), &input.document)
            .into_iter()
            .chain(preview.services_to_reconfigure)
            .filter(|s| enabled.contains(s))
            .collect();
        targets.sort();
        targets.dedup();

        if targets.is_empty() {
            return ConfigureReport {
                detail: "nothing to configure".to_string(),
                ..Default::default()
            };
        }

        let results = join_all(targets.iter().map(|service| async move {
            let result = with_timeout(
                self.settings.configure_timeout,
                self.collaborators.configurator.configure(service, config),
            )
            .await;
            (service.clone(), result)
        }))
        .await;

        let failures: Vec<(String, CollaboratorError)> = results
            .into_iter()
            .filter_map(|(service, result)| result.err().map(|e| (service, e)))
            .collect();

        for (service, err) in &failures {
            warn!("[{}] configuring {} failed: {}", input.run_id, service, err);
        }

        let detail = if failures.is_empty() {
            format!("configured {}", targets.join(", "))
        } else {
            let failed: Vec<String> = failures.iter().map(|(s, e)| format!("{} ({})", s, e)).collect();
            format!(
                "configured {}/{}; failed: {}",
                targets.len() - failures.len(),
                targets.len(),
                failed.join(", ")
            )
        };

        let fraction = failures.len() as f64 / targets.len() as f64;
        ConfigureReport {
            failed: failures.into_iter().map(|(s, _)| s).collect(),
            detail,
            over_threshold: fraction > self.settings.configure_failure_threshold,
        }
    }

    /// Services that did not report healthy in time
    async fn verify(&self, config: &StackConfig) -> Vec<String> {
        let services = config.enabled_services();
        let results = join_all(services.iter().map(|service| async move {
            (service.clone(), self.wait_healthy(service, config).await)
        }))
        .await;

        results
            .into_iter()
            .filter(|(_, healthy)| !healthy)
            .map(|(service, _)| service)
            .collect()
    }

    async fn wait_healthy(&self, service: &str, config: &StackConfig) -> bool {
        let deadline = Instant::now() + self.settings.verify_timeout;
        let mut attempt = 0;
        loop {
            // A probe that hangs counts as unhealthy once the deadline passes
            let check = self.collaborators.health.is_healthy(service, config);
            match tokio::time::timeout_at(deadline, check).await {
                Ok(true) => {
                    debug!("{} healthy after {} attempt(s)", service, attempt + 1);
                    return true;
                }
                Ok(false) => {}
                Err(_) => {
                    debug!("{} health check still pending at the deadline", service);
                    return false;
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait = calc_exp_backoff(&self.settings.verify_backoff, attempt).min(deadline - now);
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

async fn with_timeout<T>(
    limit: Duration,
    fut: impl std::future::Future<Output = Result<T, CollaboratorError>>,
) -> Result<T, CollaboratorError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout(limit.as_secs())),
    }
}
