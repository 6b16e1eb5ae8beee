//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::{ComposeDeployer, ComposeRenderer, HttpHealthProbe, HttpServiceConfigurator};
use crate::errors::StackError;
use crate::filesys::file::File;
use crate::orchestrator::ApplyOrchestrator;
use crate::pipeline::Collaborators;
use crate::runs::{EventBroker, RunRegistry};
use crate::storage::BaselineStore;
use crate::validation::checks::CheckRegistry;
use crate::validation::rules::RuleRegistry;
use crate::validation::ValidationEngine;

/// Bound on a single health probe request
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the validation engine from the configured (or built-in) rules
pub async fn load_engine(options: &AppOptions) -> Result<ValidationEngine, StackError> {
    let rules = match &options.rules_file {
        Some(path) => {
            info!("Loading validation rules from {}", path.display());
            RuleRegistry::from_file(&File::new(path)).await?
        }
        None => RuleRegistry::builtin()?,
    };
    let checks = CheckRegistry::builtin(&options.services_host);
    ValidationEngine::new(rules, checks, options.engine.clone())
}

/// Default collaborators: docker compose plus HTTP service clients
pub fn default_collaborators(options: &AppOptions) -> Collaborators {
    Collaborators {
        renderer: Arc::new(ComposeRenderer::new(options.layout.deploy_dir())),
        deployer: Arc::new(ComposeDeployer),
        configurator: Arc::new(HttpServiceConfigurator::new(
            options.services_host.clone(),
            options.pipeline.configure_timeout,
        )),
        health: Arc::new(HttpHealthProbe::new(options.services_host.clone(), HEALTH_PROBE_TIMEOUT)),
    }
}

/// Main application state
pub struct AppState {
    pub orchestrator: Arc<ApplyOrchestrator>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, StackError> {
        info!("Initializing application state...");

        options.layout.setup().await?;

        let engine = Arc::new(load_engine(options).await?);
        info!("Loaded {} validation rule(s)", engine.rules().rules().len());

        let baseline = Arc::new(BaselineStore::load(options.layout.last_applied_file()).await?);
        let registry = Arc::new(RunRegistry::new(options.run_retention));
        let broker = Arc::new(EventBroker::new(registry, options.subscriber_buffer));

        let orchestrator = Arc::new(ApplyOrchestrator::new(
            options.target.clone(),
            engine,
            broker,
            baseline,
            default_collaborators(options),
            options.pipeline.clone(),
        ));

        Ok(Self { orchestrator })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), StackError> {
        info!("Shutting down application state...");
        if let Some(run_id) = self.orchestrator.registry().running_run(self.orchestrator.target()) {
            info!("Run {} still in progress; its events are not persisted", run_id);
        }
        Ok(())
    }
}
