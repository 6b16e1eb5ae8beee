//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::StackError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Orchestrator settings, read from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Directory for the rolling log file; no file sink when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Root of the state, deploy and logs directories
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Name of the deployment target runs are serialized on
    #[serde(default = "default_target")]
    pub target: String,

    /// Host the managed services are reachable on
    #[serde(default = "default_services_host")]
    pub services_host: String,

    /// Replaces the built-in validation rules
    #[serde(default)]
    pub rules_file: Option<PathBuf>,

    #[serde(default)]
    pub validation: ValidationSettings,

    #[serde(default)]
    pub pipeline: PipelineTimeouts,

    /// Number of runs kept in the registry
    #[serde(default = "default_run_retention")]
    pub run_retention: usize,

    /// Events buffered per stream subscriber before it is dropped
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/arrstack")
}

fn default_target() -> String {
    "local".to_string()
}

fn default_services_host() -> String {
    "127.0.0.1".to_string()
}

fn default_run_retention() -> usize {
    50
}

fn default_subscriber_buffer() -> usize {
    64
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            server: ServerSettings::default(),
            data_dir: default_data_dir(),
            target: default_target(),
            services_host: default_services_host(),
            rules_file: None,
            validation: ValidationSettings::default(),
            pipeline: PipelineTimeouts::default(),
            run_retention: default_run_retention(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl Settings {
    /// Read settings from `file`; a missing file yields defaults
    pub async fn load(file: &File) -> Result<Self, StackError> {
        if !file.exists().await {
            info!("Settings file {} not found, using defaults", file.path().display());
            return Ok(Self::default());
        }
        file.read_json().await
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8700
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Validation engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSettings {
    /// Custom checks running at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Bound on a single custom check
    #[serde(default = "default_check_timeout")]
    pub check_timeout_secs: u64,
}

fn default_max_concurrency() -> usize {
    8
}

fn default_check_timeout() -> u64 {
    5
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            check_timeout_secs: default_check_timeout(),
        }
    }
}

/// Collaborator bounds used by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTimeouts {
    #[serde(default = "default_render_timeout")]
    pub render_timeout_secs: u64,

    #[serde(default = "default_deploy_timeout")]
    pub deploy_timeout_secs: u64,

    /// Per service
    #[serde(default = "default_configure_timeout")]
    pub configure_timeout_secs: u64,

    /// Per service
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,

    /// First health poll delay; doubles up to `verify_max_interval_secs`
    #[serde(default = "default_verify_interval")]
    pub verify_interval_secs: u64,

    #[serde(default = "default_verify_max_interval")]
    pub verify_max_interval_secs: u64,

    /// Fraction of configure targets allowed to fail
    #[serde(default = "default_configure_threshold")]
    pub configure_failure_threshold: f64,
}

fn default_render_timeout() -> u64 {
    120
}

fn default_deploy_timeout() -> u64 {
    600
}

fn default_configure_timeout() -> u64 {
    60
}

fn default_verify_timeout() -> u64 {
    120
}

fn default_verify_interval() -> u64 {
    1
}

fn default_verify_max_interval() -> u64 {
    10
}

fn default_configure_threshold() -> f64 {
    0.5
}

impl Default for PipelineTimeouts {
    fn default() -> Self {
        Self {
            render_timeout_secs: default_render_timeout(),
            deploy_timeout_secs: default_deploy_timeout(),
            configure_timeout_secs: default_configure_timeout(),
            verify_timeout_secs: default_verify_timeout(),
            verify_interval_secs: default_verify_interval(),
            verify_max_interval_secs: default_verify_max_interval(),
            configure_failure_threshold: default_configure_threshold(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_use_defaults() {
        let settings: Settings = serde_json::from_str(
            r#"{ "log_level": "debug", "server": { "port": 9000 }, "pipeline": { "deploy_timeout_secs": 30 } }"#,
        )
        .unwrap();
        assert_eq!(settings.log_level, LogLevel::Debug);
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.pipeline.deploy_timeout_secs, 30);
        assert_eq!(settings.pipeline.render_timeout_secs, 120);
        assert_eq!(settings.run_retention, 50);
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&File::new(dir.path().join("settings.json"))).await.unwrap();
        assert_eq!(settings.target, "local");
        assert_eq!(settings.subscriber_buffer, 64);
    }
}
