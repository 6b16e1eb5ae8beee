//! Desired-state configuration document

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::StackError;
use crate::utils::sha256_hash;

/// Typed view of the desired-state document.
///
/// Validation and diffing work on the raw JSON value; this view is only built
/// once a document has passed validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,

    #[serde(default)]
    pub policy: PolicyConfig,
}

impl StackConfig {
    /// Build the typed view from a raw document
    pub fn from_value(value: &serde_json::Value) -> Result<Self, StackError> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Names of enabled services, sorted
    pub fn enabled_services(&self) -> Vec<String> {
        self.services
            .iter()
            .filter(|(_, s)| s.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.get(name)
    }
}

/// Host directories shared by the services
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Media pool root
    #[serde(default)]
    pub pool: String,

    /// Download client scratch space
    #[serde(default)]
    pub downloads: Option<String>,

    /// Per-service application data
    #[serde(default)]
    pub appdata: Option<String>,
}

/// Container runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_id")]
    pub puid: u32,

    #[serde(default = "default_id")]
    pub pgid: u32,

    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Compose project name
    #[serde(default = "default_project_name")]
    pub project_name: String,
}

fn default_id() -> u32 {
    1000
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_project_name() -> String {
    "arrstack".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            puid: default_id(),
            pgid: default_id(),
            timezone: default_timezone(),
            project_name: default_project_name(),
        }
    }
}

/// Outbound proxy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub url: Option<String>,
}

/// Per-service settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub port: u16,

    /// Image override; the renderer picks a default per service otherwise
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub proxy_url: Option<String>,

    /// Options a running service can absorb without a restart
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

/// Acquisition policy shared by the *arr services
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub languages: Vec<String>,

    #[serde(default)]
    pub quality_profile: Option<String>,

    #[serde(default)]
    pub max_size_gb: Option<f64>,
}

/// Paths at which `value` cannot be read as a [`StackConfig`], with the
/// decoder's message.
///
/// Sections are decoded one by one, and services one by one, so each error
/// names the narrowest part of the document that failed. An empty result
/// means [`StackConfig::from_value`] succeeds.
pub fn shape_errors(value: &serde_json::Value) -> Vec<(String, String)> {
    let Some(doc) = value.as_object() else {
        return vec![("document".to_string(), "expected an object".to_string())];
    };

    let mut errors = Vec::new();
    check_section::<PathsConfig>(doc, "paths", &mut errors);
    check_section::<RuntimeConfig>(doc, "runtime", &mut errors);
    check_section::<ProxyConfig>(doc, "proxy", &mut errors);
    check_section::<PolicyConfig>(doc, "policy", &mut errors);

    match doc.get("services") {
        Some(serde_json::Value::Object(services)) => {
            for (name, service) in services {
                if let Err(e) = ServiceConfig::deserialize(service) {
                    errors.push((format!("services.{}", name), e.to_string()));
                }
            }
        }
        Some(other) => {
            if let Err(e) = BTreeMap::<String, ServiceConfig>::deserialize(other) {
                errors.push(("services".to_string(), e.to_string()));
            }
        }
        None => {}
    }
    errors
}

fn check_section<'de, T: Deserialize<'de>>(
    doc: &'de serde_json::Map<String, serde_json::Value>,
    section: &str,
    errors: &mut Vec<(String, String)>,
) {
    if let Some(value) = doc.get(section) {
        if let Err(e) = T::deserialize(value) {
            errors.push((section.to_string(), e.to_string()));
        }
    }
}

/// Digest of a document's canonical JSON form.
///
/// `serde_json` maps are ordered, so equal documents hash equally.
pub fn config_digest(value: &serde_json::Value) -> String {
    let canonical = serde_json::to_vec(value).unwrap_or_default();
    sha256_hash(&canonical)
}

/// Names of enabled services in a raw document
pub fn enabled_services_in(value: &serde_json::Value) -> Vec<String> {
    value
        .get("services")
        .and_then(|s| s.as_object())
        .map(|services| {
            services
                .iter()
                .filter(|(_, svc)| svc.get("enabled").and_then(|e| e.as_bool()).unwrap_or(false))
                .map(|(name, _)| name.clone())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_applies_defaults() {
        let value = json!({
            "paths": { "pool": "/mnt/pool" },
            "services": {
                "radarr": { "enabled": true, "port": 7878 },
                "sonarr": { "enabled": false, "port": 8989 }
            }
        });
        let config = StackConfig::from_value(&value).unwrap();
        assert_eq!(config.runtime.puid, 1000);
        assert_eq!(config.runtime.project_name, "arrstack");
        assert_eq!(config.enabled_services(), vec!["radarr".to_string()]);
        assert_eq!(enabled_services_in(&value), vec!["radarr".to_string()]);
    }

    #[test]
    fn test_digest_is_stable() {
        let a = json!({"paths": {"pool": "/a"}, "policy": {"languages": ["en"]}});
        let b = json!({"policy": {"languages": ["en"]}, "paths": {"pool": "/a"}});
        assert_eq!(config_digest(&a), config_digest(&b));
        assert_ne!(config_digest(&a), config_digest(&json!({})));
    }

    #[test]
    fn test_shape_errors_name_the_failing_part() {
        let value = json!({
            "paths": { "pool": "/mnt/pool" },
            "runtime": "x",
            "services": {
                "radarr": { "enabled": true, "port": 7878 },
                "sonarr": { "enabled": true, "port": 70000 }
            },
            "policy": { "languages": [1, 2] }
        });
        let fields: Vec<String> = shape_errors(&value).into_iter().map(|(f, _)| f).collect();
        assert_eq!(fields, vec!["runtime", "policy", "services.sonarr"]);
        assert!(StackConfig::from_value(&value).is_err());

        let listed = json!({ "services": [] });
        assert_eq!(shape_errors(&listed)[0].0, "services");
        assert_eq!(shape_errors(&json!([1]))[0].0, "document");
    }

    #[test]
    fn test_no_shape_errors_means_decodable() {
        let value = json!({
            "paths": { "pool": "/mnt/pool" },
            "services": { "radarr": { "enabled": true, "port": 7878, "settings": { "a": 1 } } },
            "policy": { "languages": ["en"] },
            "extra": 1
        });
        assert!(shape_errors(&value).is_empty());
        assert!(StackConfig::from_value(&value).is_ok());
    }
}
