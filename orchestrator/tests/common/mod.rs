//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrstack::errors::{CollaboratorError, DeployFailure};
use arrstack::models::config::StackConfig;
use arrstack::orchestrator::ApplyOrchestrator;
use arrstack::pipeline::{
    Collaborators, Deployer, HealthProbe, PipelineSettings, RenderedArtifacts, Renderer,
    ServiceConfigurator,
};
use arrstack::runs::{EventBroker, RunRegistry};
use arrstack::storage::BaselineStore;
use arrstack::utils::CooldownOptions;
use arrstack::validation::checks::CheckRegistry;
use arrstack::validation::rules::RuleRegistry;
use arrstack::validation::{EngineOptions, ValidationEngine};
use async_trait::async_trait;
use openapi_server::RunEvent;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

pub const TARGET: &str = "local";

/// Rules without host- or network-dependent checks
pub const OFFLINE_RULES: &str = r#"[
    { "field": "paths.pool", "type": "string", "required": true, "min_length": 1, "pattern": "^/" },
    { "field": "runtime.puid", "type": "integer", "min_value": 0, "max_value": 65535 },
    { "field": "services.*.enabled", "type": "boolean", "required": true },
    { "field": "services.*.port", "type": "port", "required": true, "custom_rules": ["unique_port"] },
    { "field": "services.*.api_key", "type": "string", "custom_rules": ["api_key_format"] },
    { "field": "services.*.settings", "type": "object" },
    { "field": "policy.languages", "type": "array" }
]"#;

pub fn offline_engine() -> Arc<ValidationEngine> {
    let engine = ValidationEngine::new(
        RuleRegistry::from_json(OFFLINE_RULES).unwrap(),
        CheckRegistry::builtin("127.0.0.1"),
        EngineOptions::default(),
    )
    .unwrap();
    Arc::new(engine)
}

pub const SERVICES: &[(&str, u16)] = &[
    ("radarr", 7878),
    ("sonarr", 8989),
    ("lidarr", 8686),
    ("prowlarr", 9696),
    ("jellyfin", 8096),
];

/// A valid configuration with the five services above enabled
pub fn valid_config() -> Value {
    let services: serde_json::Map<String, Value> = SERVICES
        .iter()
        .map(|(name, port)| (name.to_string(), json!({ "enabled": true, "port": port })))
        .collect();
    json!({
        "paths": { "pool": "/mnt/pool" },
        "runtime": { "puid": 1000 },
        "services": services,
        "policy": { "languages": ["en"] }
    })
}

/// Pipeline bounds short enough for tests
pub fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        render_timeout: Duration::from_secs(5),
        deploy_timeout: Duration::from_secs(5),
        configure_timeout: Duration::from_secs(5),
        verify_timeout: Duration::from_millis(150),
        verify_backoff: CooldownOptions {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
        },
        configure_failure_threshold: 0.5,
    }
}

// ================================= FAKES ======================================== //

#[derive(Default)]
pub struct FakeRenderer {
    pub fail: bool,
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(&self, _config: &StackConfig) -> Result<RenderedArtifacts, CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::Failed("template error".to_string()));
        }
        Ok(RenderedArtifacts {
            compose_path: PathBuf::from("/tmp/deploy/docker-compose.yml"),
            env_path: PathBuf::from("/tmp/deploy/.env"),
        })
    }
}

/// Starts every enabled service except `failing`; optionally waits on a gate
#[derive(Default)]
pub struct FakeDeployer {
    pub failing: HashSet<String>,
    pub gate: Option<Arc<Notify>>,
    pub panic: bool,
    /// Reported by `running`
    pub running: Vec<String>,
}

#[async_trait]
impl Deployer for FakeDeployer {
    async fn deploy(
        &self,
        config: &StackConfig,
        _artifacts: &RenderedArtifacts,
    ) -> Result<Vec<String>, DeployFailure> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.panic {
            panic!("deployer crashed");
        }
        let (failed, started): (Vec<String>, Vec<String>) = config
            .enabled_services()
            .into_iter()
            .partition(|s| self.failing.contains(s));
        if failed.is_empty() {
            Ok(started)
        } else {
            Err(DeployFailure {
                message: "container exited".to_string(),
                started,
                failed,
            })
        }
    }

    async fn running(
        &self,
        _config: &StackConfig,
        _artifacts: &RenderedArtifacts,
    ) -> Result<Vec<String>, CollaboratorError> {
        Ok(self.running.clone())
    }
}

#[derive(Default)]
pub struct FakeConfigurator {
    pub failing: HashSet<String>,
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ServiceConfigurator for FakeConfigurator {
    async fn configure(&self, service: &str, _config: &StackConfig) -> Result<(), CollaboratorError> {
        self.calls.lock().unwrap().push(service.to_string());
        if self.failing.contains(service) {
            return Err(CollaboratorError::Failed(format!("{} rejected credentials", service)));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeHealth {
    pub unhealthy: HashSet<String>,
    /// Probes of these services never return
    pub hanging: HashSet<String>,
}

#[async_trait]
impl HealthProbe for FakeHealth {
    async fn is_healthy(&self, service: &str, _config: &StackConfig) -> bool {
        if self.hanging.contains(service) {
            std::future::pending::<()>().await;
        }
        !self.unhealthy.contains(service)
    }
}

pub fn names(list: &[&str]) -> HashSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Test harness around an orchestrator wired to fakes
pub struct Harness {
    pub orchestrator: Arc<ApplyOrchestrator>,
    pub broker: Arc<EventBroker>,
    pub baseline: Arc<BaselineStore>,
    pub configurator: Arc<FakeConfigurator>,
}

pub struct HarnessBuilder {
    pub renderer: FakeRenderer,
    pub deployer: FakeDeployer,
    pub configurator: FakeConfigurator,
    pub health: FakeHealth,
    pub baseline: Option<Value>,
    /// Replaces the in-memory baseline built from `baseline`
    pub store: Option<BaselineStore>,
    pub settings: PipelineSettings,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            renderer: FakeRenderer::default(),
            deployer: FakeDeployer::default(),
            configurator: FakeConfigurator::default(),
            health: FakeHealth::default(),
            baseline: None,
            store: None,
            settings: fast_settings(),
        }
    }
}

impl HarnessBuilder {
    pub fn build(self) -> Harness {
        let registry = Arc::new(RunRegistry::new(50));
        let broker = Arc::new(EventBroker::new(registry, 64));
        let baseline = Arc::new(
            self.store
                .unwrap_or_else(|| BaselineStore::in_memory(self.baseline)),
        );
        let configurator = Arc::new(self.configurator);
        let collaborators = Collaborators {
            renderer: Arc::new(self.renderer),
            deployer: Arc::new(self.deployer),
            configurator: configurator.clone(),
            health: Arc::new(self.health),
        };
        let orchestrator = Arc::new(ApplyOrchestrator::new(
            TARGET,
            offline_engine(),
            broker.clone(),
            baseline.clone(),
            collaborators,
            self.settings,
        ));
        Harness {
            orchestrator,
            broker,
            baseline,
            configurator,
        }
    }
}

/// Drain a subscription until it closes
pub async fn collect(mut rx: mpsc::Receiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    let drain = async {
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
    };
    tokio::time::timeout(Duration::from_secs(10), drain)
        .await
        .expect("event stream did not close");
    events
}

/// `(stage, status)` pairs of the stage events
pub fn stage_statuses(events: &[RunEvent]) -> Vec<(String, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            RunEvent::Stage(stage) => Some((
                stage.stage.clone(),
                serde_json::to_value(&stage.status).unwrap().as_str().unwrap().to_string(),
            )),
            RunEvent::Status(_) => None,
        })
        .collect()
}
