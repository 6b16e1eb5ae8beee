//! Custom (possibly I/O-bound) validation checks
//!
//! Checks are dispatched by rule name through [`CheckRegistry`]. Adding a new
//! custom rule means implementing [`CustomCheck`] and registering it; the
//! engine's dispatch does not change.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::errors::{CollaboratorError, StackError};
use crate::validation::rules::{lookup, RuleRegistry};

/// Finding produced by a failing or degraded check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub code: String,
    pub message: String,
    pub suggestions: Vec<String>,
}

impl Finding {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Verdict of a single custom check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Pass,
    /// Degraded but usable; never blocks
    Warn(Finding),
    /// Unusable; stops evaluation of the field
    Fail(Finding),
}

/// Everything a check may look at
pub struct CheckContext<'a> {
    pub field: &'a str,
    pub value: &'a Value,
    /// Owning service for `services.<name>.*` fields
    pub service: Option<&'a str>,
    pub document: &'a Value,
    /// Last successfully applied document, if any
    pub last_applied: Option<&'a Value>,
    pub http: &'a reqwest::Client,
}

impl CheckContext<'_> {
    fn service_field(&self, doc: &Value, field: &str) -> Option<Value> {
        let service = self.service?;
        lookup(doc, &format!("services.{}.{}", service, field)).cloned()
    }

    /// Whether the owning service is enabled in the candidate document
    pub fn service_enabled(&self) -> bool {
        self.service_field(self.document, "enabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Whether the owning service was enabled in the last applied document
    pub fn service_deployed(&self) -> bool {
        self.last_applied
            .and_then(|doc| self.service_field(doc, "enabled"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn deployed_port(&self) -> Option<u64> {
        self.last_applied
            .and_then(|doc| self.service_field(doc, "port"))
            .and_then(|v| v.as_u64())
    }
}

/// A named server-side check
#[async_trait]
pub trait CustomCheck: Send + Sync {
    /// Rule name as referenced from `custom_rules`
    fn name(&self) -> &'static str;

    /// Whether the check calls a third-party service API
    fn calls_service(&self) -> bool {
        false
    }

    async fn check(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CollaboratorError>;
}

/// Rule name to check implementation
#[derive(Default, Clone)]
pub struct CheckRegistry {
    checks: HashMap<String, Arc<dyn CustomCheck>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in check. `services_host` is where outbound
    /// service checks reach the stack's published ports.
    pub fn builtin(services_host: &str) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PortAvailable));
        registry.register(Arc::new(UniquePort));
        registry.register(Arc::new(PathExists));
        registry.register(Arc::new(ApiKeyFormat));
        registry.register(Arc::new(ApiKeyValid::new(services_host)));
        registry
    }

    pub fn register(&mut self, check: Arc<dyn CustomCheck>) {
        self.checks.insert(check.name().to_string(), check);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CustomCheck>> {
        self.checks.get(name).cloned()
    }

    /// Fail if a rule references a check nobody registered
    pub fn ensure_covers(&self, rules: &RuleRegistry) -> Result<(), StackError> {
        let missing: Vec<&str> = rules
            .custom_rule_names()
            .into_iter()
            .filter(|name| !self.checks.contains_key(*name))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(StackError::ConfigError(format!(
                "Unknown custom rules: {}",
                missing.join(", ")
            )))
        }
    }
}

// =============================== BUILT-IN CHECKS ================================= //

/// Port is not bound on the host
pub struct PortAvailable;

#[async_trait]
impl CustomCheck for PortAvailable {
    fn name(&self) -> &'static str {
        "port_available"
    }

    async fn check(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CollaboratorError> {
        if !ctx.service_enabled() {
            return Ok(CheckOutcome::Pass);
        }
        let Some(port) = ctx.value.as_u64() else {
            return Ok(CheckOutcome::Pass);
        };

        // Our own running container holds the port it was deployed with
        if ctx.service_deployed() && ctx.deployed_port() == Some(port) {
            return Ok(CheckOutcome::Pass);
        }

        match tokio::net::TcpListener::bind(("0.0.0.0", port as u16)).await {
            Ok(_) => Ok(CheckOutcome::Pass),
            Err(e) if e.kind() == ErrorKind::AddrInUse => Ok(CheckOutcome::Fail(
                Finding::new("port_in_use", format!("port {} is already in use on this host", port))
                    .with_suggestion(format!("choose another port or stop the process bound to {}", port)),
            )),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Ok(CheckOutcome::Warn(
                Finding::new(
                    "port_privileged",
                    format!("port {} is privileged and could not be probed", port),
                ),
            )),
            Err(e) => Err(CollaboratorError::Unavailable(format!("probe of port {} failed: {}", port, e))),
        }
    }
}

/// No two enabled services claim the same port
pub struct UniquePort;

#[async_trait]
impl CustomCheck for UniquePort {
    fn name(&self) -> &'static str {
        "unique_port"
    }

    async fn check(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CollaboratorError> {
        if !ctx.service_enabled() {
            return Ok(CheckOutcome::Pass);
        }
        let Some(port) = ctx.value.as_u64() else {
            return Ok(CheckOutcome::Pass);
        };

        let claimants: Vec<&str> = ctx
            .document
            .get("services")
            .and_then(|s| s.as_object())
            .map(|services| {
                services
                    .iter()
                    .filter(|(_, svc)| svc.get("enabled").and_then(|e| e.as_bool()).unwrap_or(false))
                    .filter(|(_, svc)| svc.get("port").and_then(|p| p.as_u64()) == Some(port))
                    .map(|(name, _)| name.as_str())
                    .collect()
            })
            .unwrap_or_default();

        if claimants.len() < 2 {
            return Ok(CheckOutcome::Pass);
        }

        let names = join_names(&claimants);
        Ok(CheckOutcome::Fail(
            Finding::new("duplicate_port", format!("port {} is claimed by {}", port, names))
                .with_suggestion(format!("give each of {} its own port", claimants.join(", "))),
        ))
    }
}

/// Directory exists; warns on unusual permissions
pub struct PathExists;

#[async_trait]
impl CustomCheck for PathExists {
    fn name(&self) -> &'static str {
        "path_exists"
    }

    async fn check(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CollaboratorError> {
        let Some(path) = ctx.value.as_str() else {
            return Ok(CheckOutcome::Pass);
        };

        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(CheckOutcome::Fail(
                    Finding::new("path_not_found", format!("{} does not exist", path))
                        .with_suggestion(format!("mkdir -p {}", path)),
                ));
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Ok(CheckOutcome::Fail(Finding::new(
                    "path_inaccessible",
                    format!("{} cannot be accessed: {}", path, e),
                )));
            }
            Err(e) => {
                return Err(CollaboratorError::Unavailable(format!("stat {}: {}", path, e)));
            }
        };

        if !meta.is_dir() {
            return Ok(CheckOutcome::Fail(Finding::new(
                "not_a_directory",
                format!("{} is not a directory", path),
            )));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = meta.permissions().mode();
            if mode & 0o002 != 0 {
                return Ok(CheckOutcome::Warn(
                    Finding::new("world_writable", format!("{} is world-writable", path))
                        .with_suggestion(format!("chmod o-w {}", path)),
                ));
            }
            if mode & 0o200 == 0 {
                return Ok(CheckOutcome::Warn(
                    Finding::new("not_writable", format!("{} is not writable by its owner", path))
                        .with_suggestion(format!("chmod u+w {}", path)),
                ));
            }
        }

        Ok(CheckOutcome::Pass)
    }
}

/// API key looks like a 32-character hex token
pub struct ApiKeyFormat;

impl ApiKeyFormat {
    const KEY_LEN: usize = 32;

    fn is_well_formed(key: &str) -> bool {
        key.len() == Self::KEY_LEN && key.chars().all(|c| c.is_ascii_hexdigit())
    }
}

#[async_trait]
impl CustomCheck for ApiKeyFormat {
    fn name(&self) -> &'static str {
        "api_key_format"
    }

    async fn check(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CollaboratorError> {
        match ctx.value.as_str() {
            Some(key) if !Self::is_well_formed(key) => Ok(CheckOutcome::Fail(
                Finding::new("invalid_api_key_format", "API key must be 32 hexadecimal characters")
                    .with_suggestion("copy the key from Settings > General in the service UI"),
            )),
            _ => Ok(CheckOutcome::Pass),
        }
    }
}

/// API key is accepted by the live service
pub struct ApiKeyValid {
    host: String,
}

impl ApiKeyValid {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
        }
    }

    fn status_path(service: &str) -> Option<&'static str> {
        match service {
            "radarr" | "sonarr" => Some("/api/v3/system/status"),
            "lidarr" | "readarr" | "prowlarr" => Some("/api/v1/system/status"),
            _ => None,
        }
    }
}

#[async_trait]
impl CustomCheck for ApiKeyValid {
    fn name(&self) -> &'static str {
        "api_key_valid"
    }

    fn calls_service(&self) -> bool {
        true
    }

    async fn check(&self, ctx: &CheckContext<'_>) -> Result<CheckOutcome, CollaboratorError> {
        let (Some(service), Some(key)) = (ctx.service, ctx.value.as_str()) else {
            return Ok(CheckOutcome::Pass);
        };
        if !ctx.service_enabled() {
            return Ok(CheckOutcome::Pass);
        }
        let Some(path) = Self::status_path(service) else {
            return Ok(CheckOutcome::Pass);
        };

        if !ctx.service_deployed() {
            return Ok(CheckOutcome::Warn(Finding::new(
                "api_key_unverified",
                format!("{} is not deployed yet; the key is verified on a later apply", service),
            )));
        }

        let Some(port) = ctx.deployed_port() else {
            return Ok(CheckOutcome::Pass);
        };
        let url = format!("http://{}:{}{}", self.host, port, path);
        debug!("Verifying {} API key against {}", service, url);

        let response = ctx
            .http
            .get(&url)
            .header("X-Api-Key", key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CollaboratorError::Unavailable(format!("{} did not answer in time", service))
                } else {
                    CollaboratorError::Unavailable(format!("{}: {}", service, e))
                }
            })?;

        match response.status() {
            s if s.is_success() => Ok(CheckOutcome::Pass),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(CheckOutcome::Fail(
                Finding::new("api_key_rejected", format!("{} rejected the API key", service))
                    .with_suggestion(format!("copy the current key from {}", service)),
            )),
            s => Err(CollaboratorError::Failed(format!("{} answered {}", service, s))),
        }
    }
}

fn join_names(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [only] => only.to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx<'a>(
        field: &'a str,
        value: &'a Value,
        document: &'a Value,
        last_applied: Option<&'a Value>,
        http: &'a reqwest::Client,
    ) -> CheckContext<'a> {
        CheckContext {
            field,
            value,
            service: crate::validation::rules::service_of(field),
            document,
            last_applied,
            http,
        }
    }

    #[test]
    fn test_join_names() {
        assert_eq!(join_names(&["a"]), "a");
        assert_eq!(join_names(&["a", "b"]), "a and b");
        assert_eq!(join_names(&["a", "b", "c"]), "a, b and c");
    }

    #[tokio::test]
    async fn test_unique_port_names_every_claimant() {
        let doc = json!({"services": {
            "radarr": {"enabled": true, "port": 8080},
            "sonarr": {"enabled": true, "port": 8080},
            "lidarr": {"enabled": false, "port": 8080}
        }});
        let http = reqwest::Client::new();
        let value = json!(8080);
        let outcome = UniquePort
            .check(&ctx("services.radarr.port", &value, &doc, None, &http))
            .await
            .unwrap();
        match outcome {
            CheckOutcome::Fail(f) => {
                assert_eq!(f.code, "duplicate_port");
                assert_eq!(f.message, "port 8080 is claimed by radarr and sonarr");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let outcome = UniquePort
            .check(&ctx("services.lidarr.port", &value, &doc, None, &http))
            .await
            .unwrap();
        assert_eq!(outcome, CheckOutcome::Pass);
    }

    #[tokio::test]
    async fn test_port_available_detects_bound_port() {
        let listener = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let doc = json!({"services": {"radarr": {"enabled": true, "port": port}}});
        let value = json!(port);
        let http = reqwest::Client::new();

        let outcome = PortAvailable
            .check(&ctx("services.radarr.port", &value, &doc, None, &http))
            .await
            .unwrap();
        assert!(matches!(outcome, CheckOutcome::Fail(ref f) if f.code == "port_in_use"));

        // Held by the already deployed radarr
        let outcome = PortAvailable
            .check(&ctx("services.radarr.port", &value, &doc, Some(&doc), &http))
            .await
            .unwrap();
        assert_eq!(outcome, CheckOutcome::Pass);
    }

    #[tokio::test]
    async fn test_path_exists() {
        let dir = tempfile::tempdir().unwrap();
        let doc = json!({});
        let http = reqwest::Client::new();

        let present = json!(dir.path().to_string_lossy());
        let outcome = PathExists
            .check(&ctx("paths.pool", &present, &doc, None, &http))
            .await
            .unwrap();
        assert!(!matches!(outcome, CheckOutcome::Fail(_)));

        let missing = json!(dir.path().join("nope").to_string_lossy());
        let outcome = PathExists
            .check(&ctx("paths.pool", &missing, &doc, None, &http))
            .await
            .unwrap();
        assert!(matches!(outcome, CheckOutcome::Fail(ref f) if f.code == "path_not_found"));
    }

    #[tokio::test]
    async fn test_api_key_format() {
        let doc = json!({});
        let http = reqwest::Client::new();
        let check = ApiKeyFormat;

        let good = json!("0123456789abcdef0123456789ABCDEF");
        let outcome = check
            .check(&ctx("services.radarr.api_key", &good, &doc, None, &http))
            .await
            .unwrap();
        assert_eq!(outcome, CheckOutcome::Pass);

        let bad = json!("not-a-key-not-a-key-zz");
        let outcome = check
            .check(&ctx("services.radarr.api_key", &bad, &doc, None, &http))
            .await
            .unwrap();
        assert!(matches!(outcome, CheckOutcome::Fail(_)));
    }

    #[test]
    fn test_registry_coverage() {
        let rules = RuleRegistry::builtin().unwrap();
        assert!(CheckRegistry::builtin("127.0.0.1").ensure_covers(&rules).is_ok());
        assert!(CheckRegistry::new().ensure_covers(&rules).is_err());
    }
}
