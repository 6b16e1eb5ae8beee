//! Apply pipeline

pub mod collaborators;
pub mod runner;
pub mod stages;

pub use collaborators::{
    Collaborators, Deployer, HealthProbe, RenderedArtifacts, Renderer, ServiceConfigurator,
};
pub use runner::{Pipeline, PipelineInput, PipelineOutcome, PipelineSettings};
pub use stages::Stage;
