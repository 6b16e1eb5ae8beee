//! Static mapping from configuration sub-trees to affected services

use std::collections::BTreeSet;

use serde_json::Value;

/// Services that consume the shared acquisition policy
pub const POLICY_CONSUMERS: &[&str] = &["radarr", "sonarr", "lidarr", "readarr", "bazarr"];

/// How a change reaches a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpactClass {
    /// Container must be recreated (ports, enablement, credentials, mounts)
    Restart,
    /// A running service can absorb it
    Reconfigure,
}

/// Which services a sub-tree fans out to
#[derive(Debug, Clone, Copy)]
enum Scope {
    AllEnabled,
    Proxied,
    PolicyConsumers,
    OwningService,
}

const SUBTREES: &[(&str, Scope)] = &[
    ("paths", Scope::AllEnabled),
    ("runtime", Scope::AllEnabled),
    ("proxy", Scope::Proxied),
    ("policy", Scope::PolicyConsumers),
    ("services", Scope::OwningService),
];

/// Per-service fields a running service picks up without a restart
const RECONFIGURE_FIELDS: &[&str] = &["settings"];

/// Service sets computed over both snapshots, so that diffing in either
/// direction yields the same affected services
#[derive(Debug, Clone, Default)]
pub struct ServiceSets {
    pub enabled: BTreeSet<String>,
    pub proxied: BTreeSet<String>,
}

impl ServiceSets {
    pub fn from_snapshots(a: &Value, b: &Value) -> Self {
        let mut sets = Self::default();
        for doc in [a, b] {
            let Some(services) = doc.get("services").and_then(|s| s.as_object()) else {
                continue;
            };
            for (name, svc) in services {
                if svc.get("enabled").and_then(|e| e.as_bool()).unwrap_or(false) {
                    sets.enabled.insert(name.clone());
                }
                if svc.get("proxy_url").is_some_and(|p| !p.is_null()) {
                    sets.proxied.insert(name.clone());
                }
            }
        }
        sets
    }
}

/// Affected services and impact class of a changed leaf path
pub fn classify(path: &str, sets: &ServiceSets) -> (Vec<String>, ImpactClass) {
    let mut segments = path.split('.');
    let root = segments.next().unwrap_or_default();

    let Some((_, scope)) = SUBTREES.iter().find(|(prefix, _)| *prefix == root) else {
        return (Vec::new(), ImpactClass::Restart);
    };

    match scope {
        Scope::AllEnabled => (sets.enabled.iter().cloned().collect(), ImpactClass::Restart),
        Scope::Proxied => (sets.proxied.iter().cloned().collect(), ImpactClass::Restart),
        Scope::PolicyConsumers => (
            sets.enabled
                .iter()
                .filter(|s| POLICY_CONSUMERS.contains(&s.as_str()))
                .cloned()
                .collect(),
            ImpactClass::Reconfigure,
        ),
        Scope::OwningService => {
            let (Some(service), field) = (segments.next(), segments.next()) else {
                return (Vec::new(), ImpactClass::Restart);
            };
            let affected = if sets.enabled.contains(service) {
                vec![service.to_string()]
            } else {
                Vec::new()
            };
            let class = match field {
                Some(f) if RECONFIGURE_FIELDS.contains(&f) => ImpactClass::Reconfigure,
                _ => ImpactClass::Restart,
            };
            (affected, class)
        }
    }
}
