//! Docker Compose renderer and deployer

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::errors::{CollaboratorError, DeployFailure};
use crate::filesys::dir::Dir;
use crate::models::config::{ServiceConfig, StackConfig};
use crate::pipeline::collaborators::{Deployer, RenderedArtifacts, Renderer};

pub const COMPOSE_FILE: &str = "docker-compose.yml";
pub const ENV_FILE: &str = ".env";

/// Port a service listens on inside its container
pub fn container_port(service: &str, host_port: u16) -> u16 {
    match service {
        "radarr" => 7878,
        "sonarr" => 8989,
        "lidarr" => 8686,
        "readarr" => 8787,
        "bazarr" => 6767,
        "prowlarr" => 9696,
        "jellyfin" => 8096,
        "jellyseerr" => 5055,
        "qbittorrent" => 8080,
        _ => host_port,
    }
}

fn default_image(service: &str) -> String {
    match service {
        "jellyfin" => "jellyfin/jellyfin:latest".to_string(),
        "jellyseerr" => "fallenbagel/jellyseerr:latest".to_string(),
        other => format!("lscr.io/linuxserver/{}:latest", other),
    }
}

#[derive(Debug, Serialize)]
struct ComposeFile {
    name: String,
    services: BTreeMap<String, ComposeService>,
}

#[derive(Debug, Serialize)]
struct ComposeService {
    image: String,
    container_name: String,
    restart: &'static str,
    env_file: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    environment: BTreeMap<String, String>,
    ports: Vec<String>,
    volumes: Vec<String>,
}

fn compose_service(name: &str, svc: &ServiceConfig, config: &StackConfig) -> ComposeService {
    let mut environment = BTreeMap::new();
    let proxy = svc
        .proxy_url
        .clone()
        .or_else(|| config.proxy.url.clone().filter(|_| config.proxy.enabled));
    if let Some(proxy) = proxy {
        environment.insert("HTTP_PROXY".to_string(), proxy.clone());
        environment.insert("HTTPS_PROXY".to_string(), proxy);
    }

    let mut volumes = Vec::new();
    if let Some(appdata) = &config.paths.appdata {
        volumes.push(format!("{}/{}:/config", appdata.trim_end_matches('/'), name));
    }
    if !config.paths.pool.is_empty() {
        volumes.push(format!("{}:/data", config.paths.pool));
    }
    if let Some(downloads) = &config.paths.downloads {
        volumes.push(format!("{}:/downloads", downloads));
    }

    ComposeService {
        image: svc.image.clone().unwrap_or_else(|| default_image(name)),
        container_name: format!("{}-{}", config.runtime.project_name, name),
        restart: "unless-stopped",
        env_file: vec![ENV_FILE.to_string()],
        environment,
        ports: vec![format!("{}:{}", svc.port, container_port(name, svc.port))],
        volumes,
    }
}

/// Build the compose document for the enabled services
pub fn render_compose(config: &StackConfig) -> Result<String, serde_yaml::Error> {
    let services = config
        .services
        .iter()
        .filter(|(_, svc)| svc.enabled)
        .map(|(name, svc)| (name.clone(), compose_service(name, svc, config)))
        .collect();

    serde_yaml::to_string(&ComposeFile {
        name: config.runtime.project_name.clone(),
        services,
    })
}

/// Build the `.env` file shared by every service
pub fn render_env(config: &StackConfig) -> String {
    format!(
        "COMPOSE_PROJECT_NAME={}\nPUID={}\nPGID={}\nTZ={}\n",
        config.runtime.project_name, config.runtime.puid, config.runtime.pgid, config.runtime.timezone
    )
}

/// Writes compose and env artifacts into the deploy directory
pub struct ComposeRenderer {
    deploy_dir: Dir,
}

impl ComposeRenderer {
    pub fn new(deploy_dir: Dir) -> Self {
        Self { deploy_dir }
    }
}

#[async_trait]
impl Renderer for ComposeRenderer {
    async fn render(&self, config: &StackConfig) -> Result<RenderedArtifacts, CollaboratorError> {
        let compose = render_compose(config)
            .map_err(|e| CollaboratorError::Failed(format!("failed to render compose file: {}", e)))?;
        let env = render_env(config);

        let compose_file = self.deploy_dir.file(COMPOSE_FILE);
        let env_file = self.deploy_dir.file(ENV_FILE);
        compose_file
            .write_atomic(compose.as_bytes())
            .await
            .map_err(|e| CollaboratorError::Failed(e.to_string()))?;
        env_file
            .write_atomic(env.as_bytes())
            .await
            .map_err(|e| CollaboratorError::Failed(e.to_string()))?;

        debug!("Rendered {} and {}", compose_file.path().display(), env_file.path().display());
        Ok(RenderedArtifacts {
            compose_path: compose_file.path().to_path_buf(),
            env_path: env_file.path().to_path_buf(),
        })
    }
}

/// Runs `docker compose up` against the rendered artifacts
pub struct ComposeDeployer;

impl ComposeDeployer {
    async fn compose(
        project: &str,
        artifacts: &RenderedArtifacts,
        args: &[&str],
    ) -> Result<Output, CollaboratorError> {
        let workdir: PathBuf = artifacts
            .compose_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let compose_path = artifacts.compose_path.to_string_lossy().to_string();
        let env_path = artifacts.env_path.to_string_lossy().to_string();
        let mut base = vec!["-p", project, "-f", &compose_path, "--env-file", &env_path];
        base.extend_from_slice(args);

        // Try 'docker compose' (plugin) first
        debug!("Running docker compose {}", args.join(" "));
        let output = Command::new("docker")
            .current_dir(&workdir)
            .arg("compose")
            .args(&base)
            .output()
            .await;

        match output {
            Ok(output) if !plugin_missing(&output) => Ok(output),
            plugin => {
                debug!("docker compose plugin unavailable, trying 'docker-compose'...");
                match Command::new("docker-compose")
                    .current_dir(&workdir)
                    .args(&base)
                    .output()
                    .await
                {
                    Ok(output) => Ok(output),
                    // Keep the plugin's own answer when there is one
                    Err(e) => match plugin {
                        Ok(output) => Ok(output),
                        Err(_) => Err(CollaboratorError::Unavailable(format!(
                            "failed to run docker compose: {}",
                            e
                        ))),
                    },
                }
            }
        }
    }

    async fn running_services(
        project: &str,
        artifacts: &RenderedArtifacts,
    ) -> Result<Vec<String>, CollaboratorError> {
        let output = Self::compose(
            project,
            artifacts,
            &["ps", "--services", "--filter", "status=running"],
        )
        .await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl Deployer for ComposeDeployer {
    async fn deploy(
        &self,
        config: &StackConfig,
        artifacts: &RenderedArtifacts,
    ) -> Result<Vec<String>, DeployFailure> {
        let project = config.runtime.project_name.as_str();
        info!("Deploying compose project '{}'", project);

        let up = Self::compose(project, artifacts, &["up", "-d", "--remove-orphans"]).await?;
        let running = Self::running_services(project, artifacts).await.unwrap_or_else(|e| {
            warn!("Could not list running services: {}", e);
            Vec::new()
        });

        let enabled = config.enabled_services();
        let (started, failed): (Vec<String>, Vec<String>) =
            enabled.into_iter().partition(|s| running.contains(s));

        if !up.status.success() || !failed.is_empty() {
            let stderr = String::from_utf8_lossy(&up.stderr);
            let message = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|| "docker compose up failed".to_string());
            error!("Deploy failed: {}", message);
            return Err(DeployFailure {
                message,
                started,
                failed,
            });
        }

        info!("Deployed {} service(s)", started.len());
        Ok(started)
    }

    async fn running(
        &self,
        config: &StackConfig,
        artifacts: &RenderedArtifacts,
    ) -> Result<Vec<String>, CollaboratorError> {
        Self::running_services(config.runtime.project_name.as_str(), artifacts).await
    }
}

/// The docker CLI answered but has no compose plugin
fn plugin_missing(output: &Output) -> bool {
    if output.status.success() {
        return false;
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    stderr.contains("is not a docker command") || stderr.contains("unknown command")
}
