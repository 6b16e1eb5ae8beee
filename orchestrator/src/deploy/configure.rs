//! In-service configuration over each service's HTTP API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{COOKIE, SET_COOKIE};
use serde_json::json;
use tracing::{debug, info};

use crate::errors::CollaboratorError;
use crate::models::config::{ServiceConfig, StackConfig};
use crate::pipeline::collaborators::ServiceConfigurator;

/// qBittorrent's first-boot web UI credentials
const QBITTORRENT_DEFAULT_USER: &str = "admin";
const QBITTORRENT_DEFAULT_PASSWORD: &str = "adminadmin";

/// Configures Jellyfin and qBittorrent; other services need nothing
pub struct HttpServiceConfigurator {
    client: reqwest::Client,
    host: String,
}

impl HttpServiceConfigurator {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            host: host.into(),
        }
    }

    fn base_url(&self, svc: &ServiceConfig) -> String {
        format!("http://{}:{}", self.host, svc.port)
    }

    /// Runs Jellyfin's start-up wizard: admin user, then completion
    async fn configure_jellyfin(&self, svc: &ServiceConfig) -> Result<(), CollaboratorError> {
        let (Some(username), Some(password)) = (&svc.username, &svc.password) else {
            debug!("jellyfin: no admin credentials, skipping start-up wizard");
            return Ok(());
        };
        let base = self.base_url(svc);

        let response = self
            .client
            .get(format!("{}/Startup/User", base))
            .send()
            .await
            .map_err(unavailable)?;
        if response.status().as_u16() == 401 {
            debug!("jellyfin: start-up wizard already completed");
            return Ok(());
        }

        self.expect_success(
            "jellyfin",
            self.client
                .post(format!("{}/Startup/User", base))
                .json(&json!({ "Name": username, "Password": password })),
        )
        .await?;
        self.expect_success("jellyfin", self.client.post(format!("{}/Startup/Complete", base)))
            .await?;

        info!("jellyfin: admin user '{}' created", username);
        Ok(())
    }

    /// Replaces qBittorrent's default web UI credentials
    async fn configure_qbittorrent(&self, svc: &ServiceConfig) -> Result<(), CollaboratorError> {
        let (Some(username), Some(password)) = (&svc.username, &svc.password) else {
            debug!("qbittorrent: no credentials, leaving defaults");
            return Ok(());
        };
        let base = self.base_url(svc);

        let cookie = match self
            .login_qbittorrent(&base, QBITTORRENT_DEFAULT_USER, QBITTORRENT_DEFAULT_PASSWORD)
            .await?
        {
            Some(cookie) => cookie,
            None => {
                // Credentials may already be in place from an earlier run
                if self.login_qbittorrent(&base, username, password).await?.is_some() {
                    debug!("qbittorrent: credentials already set");
                    return Ok(());
                }
                return Err(CollaboratorError::Failed("qbittorrent: login rejected".to_string()));
            }
        };

        let preferences = json!({ "web_ui_username": username, "web_ui_password": password });
        let mut request = self
            .client
            .post(format!("{}/api/v2/app/setPreferences", base))
            .form(&[("json", preferences.to_string())]);
        if !cookie.is_empty() {
            request = request.header(COOKIE, cookie);
        }
        self.expect_success("qbittorrent", request).await?;

        info!("qbittorrent: web UI credentials updated");
        Ok(())
    }

    /// Session cookie on success, `None` when the credentials are rejected
    async fn login_qbittorrent(
        &self,
        base: &str,
        username: &str,
        password: &str,
    ) -> Result<Option<String>, CollaboratorError> {
        let response = self
            .client
            .post(format!("{}/api/v2/auth/login", base))
            .header("Referer", base)
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .map_err(unavailable)?;

        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::to_string);
        let body = response.text().await.map_err(unavailable)?;

        Ok((body.trim() == "Ok.").then(|| cookie.unwrap_or_default()))
    }

    async fn expect_success(
        &self,
        service: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<(), CollaboratorError> {
        let response = request.send().await.map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(CollaboratorError::Failed(format!(
                "{}: unexpected status {}",
                service,
                response.status()
            )));
        }
        Ok(())
    }
}

fn unavailable(e: reqwest::Error) -> CollaboratorError {
    if e.is_timeout() {
        CollaboratorError::Unavailable(format!("request timed out: {}", e))
    } else {
        CollaboratorError::Unavailable(e.to_string())
    }
}

#[async_trait]
impl ServiceConfigurator for HttpServiceConfigurator {
    async fn configure(&self, service: &str, config: &StackConfig) -> Result<(), CollaboratorError> {
        let svc = config
            .service(service)
            .ok_or_else(|| CollaboratorError::Failed(format!("unknown service '{}'", service)))?;

        match service {
            "jellyfin" => self.configure_jellyfin(svc).await,
            "qbittorrent" => self.configure_qbittorrent(svc).await,
            _ => {
                debug!("{}: nothing to configure", service);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_services_without_setup_succeed() {
        let configurator = HttpServiceConfigurator::new("127.0.0.1", Duration::from_millis(200));
        let config = StackConfig::from_value(&json!({
            "services": {
                "radarr": { "enabled": true, "port": 7878 },
                "jellyfin": { "enabled": true, "port": 8096 }
            }
        }))
        .unwrap();
        assert!(configurator.configure("radarr", &config).await.is_ok());
        // no credentials, wizard is skipped without touching the network
        assert!(configurator.configure("jellyfin", &config).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_service_fails() {
        let configurator = HttpServiceConfigurator::new("127.0.0.1", Duration::from_millis(200));
        let config = StackConfig::default();
        let err = configurator.configure("plex", &config).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Failed(_)));
    }
}
