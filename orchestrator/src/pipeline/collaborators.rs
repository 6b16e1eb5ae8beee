//! Contracts of the external collaborators driven by the pipeline

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{CollaboratorError, DeployFailure};
use crate::models::config::StackConfig;

/// Files produced by the renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifacts {
    pub compose_path: PathBuf,
    pub env_path: PathBuf,
}

/// Materializes compose/env artifacts from a configuration
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, config: &StackConfig) -> Result<RenderedArtifacts, CollaboratorError>;
}

/// Brings containers in line with the enabled services.
///
/// Returns the services that are up. On failure, reports which services
/// started and which did not.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(
        &self,
        config: &StackConfig,
        artifacts: &RenderedArtifacts,
    ) -> Result<Vec<String>, DeployFailure>;

    /// Services currently up, used to report a deploy that did not finish
    async fn running(
        &self,
        _config: &StackConfig,
        _artifacts: &RenderedArtifacts,
    ) -> Result<Vec<String>, CollaboratorError> {
        Ok(Vec::new())
    }
}

/// Applies in-service configuration (users, credentials, policy)
#[async_trait]
pub trait ServiceConfigurator: Send + Sync {
    async fn configure(&self, service: &str, config: &StackConfig) -> Result<(), CollaboratorError>;
}

/// One health check of one service
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn is_healthy(&self, service: &str, config: &StackConfig) -> bool;
}

/// The collaborator set a pipeline runs against
#[derive(Clone)]
pub struct Collaborators {
    pub renderer: Arc<dyn Renderer>,
    pub deployer: Arc<dyn Deployer>,
    pub configurator: Arc<dyn ServiceConfigurator>,
    pub health: Arc<dyn HealthProbe>,
}
