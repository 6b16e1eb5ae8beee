//! HTTP health probe

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::models::config::StackConfig;
use crate::pipeline::collaborators::HealthProbe;

/// Probes a service's published port over HTTP.
///
/// Any response below 500 counts as healthy: most services answer 401 or a
/// redirect on `/` until they are set up.
pub struct HttpHealthProbe {
    client: reqwest::Client,
    host: String,
}

impl HttpHealthProbe {
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
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn is_healthy(&self, service: &str, config: &StackConfig) -> bool {
        let Some(svc) = config.service(service) else {
            return false;
        };
        let url = format!("http://{}:{}/", self.host, svc.port);
        match self.client.get(&url).send().await {
            Ok(response) => {
                debug!("{} health: {}", service, response.status());
                !response.status().is_server_error()
            }
            Err(e) => {
                debug!("{} health probe failed: {}", service, e);
                false
            }
        }
    }
}
