//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::PipelineSettings;
use crate::runs::broker::DEFAULT_SUBSCRIBER_BUFFER;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::utils::CooldownOptions;
use crate::validation::EngineOptions;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Server configuration
    pub server: ServerOptions,

    /// Deployment target runs are serialized on
    pub target: String,

    /// Host the managed services are reachable on
    pub services_host: String,

    /// Replaces the built-in validation rules
    pub rules_file: Option<PathBuf>,

    pub engine: EngineOptions,

    pub pipeline: PipelineSettings,

    /// Runs kept in the registry
    pub run_retention: usize,

    /// Events buffered per stream subscriber
    pub subscriber_buffer: usize,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout: StorageLayout::new("/var/lib/arrstack"),
            server: ServerOptions::default(),
            target: "local".to_string(),
            services_host: "127.0.0.1".to_string(),
            rules_file: None,
            engine: EngineOptions::default(),
            pipeline: PipelineSettings::default(),
            run_retention: 50,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

impl From<&Settings> for AppOptions {
    fn from(settings: &Settings) -> Self {
        let pipeline = &settings.pipeline;
        Self {
            lifecycle: LifecycleOptions::default(),
            layout: StorageLayout::new(&settings.data_dir),
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            target: settings.target.clone(),
            services_host: settings.services_host.clone(),
            rules_file: settings.rules_file.clone(),
            engine: EngineOptions {
                max_concurrency: settings.validation.max_concurrency,
                check_timeout: Duration::from_secs(settings.validation.check_timeout_secs),
            },
            pipeline: PipelineSettings {
                render_timeout: Duration::from_secs(pipeline.render_timeout_secs),
                deploy_timeout: Duration::from_secs(pipeline.deploy_timeout_secs),
                configure_timeout: Duration::from_secs(pipeline.configure_timeout_secs),
                verify_timeout: Duration::from_secs(pipeline.verify_timeout_secs),
                verify_backoff: CooldownOptions {
                    base_delay: Duration::from_secs(pipeline.verify_interval_secs),
                    max_delay: Duration::from_secs(pipeline.verify_max_interval_secs),
                    ..CooldownOptions::default()
                },
                configure_failure_threshold: pipeline.configure_failure_threshold,
            },
            run_retention: settings.run_retention,
            subscriber_buffer: settings.subscriber_buffer,
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8700,
        }
    }
}
