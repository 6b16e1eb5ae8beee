//! Declarative rule registry

use std::collections::BTreeSet;

use openapi_server::ValidationRule;
use regex::Regex;
use serde_json::Value;

use crate::errors::StackError;
use crate::filesys::file::File;

/// Rules shipped with the binary
const DEFAULT_RULES: &str = include_str!("../../rules/default.json");

/// A rule with its pattern compiled
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: ValidationRule,
    pub pattern: Option<Regex>,
}

/// Ordered set of field rules, loaded once at start-up
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    rules: Vec<CompiledRule>,
}

impl RuleRegistry {
    /// Registry built from the embedded default rules
    pub fn builtin() -> Result<Self, StackError> {
        Self::from_json(DEFAULT_RULES)
    }

    /// Load rules from a JSON array of rule records
    pub fn from_json(contents: &str) -> Result<Self, StackError> {
        let rules: Vec<ValidationRule> = serde_json::from_str(contents)?;
        Self::from_rules(rules)
    }

    /// Load rules from a file on disk
    pub async fn from_file(file: &File) -> Result<Self, StackError> {
        let contents = file.read_string().await?;
        Self::from_json(&contents)
    }

    pub fn from_rules(rules: Vec<ValidationRule>) -> Result<Self, StackError> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let pattern = match &rule.pattern {
                    Some(p) => Some(Regex::new(p).map_err(|e| {
                        StackError::ConfigError(format!("Invalid pattern for {}: {}", rule.field, e))
                    })?),
                    None => None,
                };
                Ok(CompiledRule { rule, pattern })
            })
            .collect::<Result<Vec<_>, StackError>>()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Rules as handed to clients for instant local feedback. Custom rules
    /// need server-side I/O and are stripped.
    pub fn client_side_rules(&self) -> Vec<ValidationRule> {
        self.rules
            .iter()
            .map(|c| ValidationRule {
                custom_rules: Vec::new(),
                ..c.rule.clone()
            })
            .collect()
    }

    /// Every custom rule name referenced by the registry
    pub fn custom_rule_names(&self) -> BTreeSet<&str> {
        self.rules
            .iter()
            .flat_map(|c| c.rule.custom_rules.iter().map(String::as_str))
            .collect()
    }
}

/// Expand a field pattern with `*` segments into the concrete paths present
/// in `doc`. Paths without wildcards are returned as-is.
pub fn expand_field(pattern: &str, doc: &Value) -> Vec<String> {
    let segments: Vec<&str> = pattern.split('.').collect();
    let mut out = Vec::new();
    expand_into(&segments, doc, String::new(), &mut out);
    out
}

fn expand_into(segments: &[&str], node: &Value, prefix: String, out: &mut Vec<String>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(prefix);
        return;
    };

    let join = |seg: &str| {
        if prefix.is_empty() {
            seg.to_string()
        } else {
            format!("{}.{}", prefix, seg)
        }
    };

    if *head == "*" {
        if let Some(map) = node.as_object() {
            for (key, child) in map {
                expand_into(rest, child, join(key), out);
            }
        }
    } else {
        let child = node.get(*head).unwrap_or(&Value::Null);
        expand_into(rest, child, join(head), out);
    }
}

/// Look up a dotted path; `null` is treated as absent
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(doc, |node, seg| node.get(seg))
        .filter(|v| !v.is_null())
}

/// Service name for a `services.<name>.*` path
pub fn service_of(path: &str) -> Option<&str> {
    let mut segments = path.split('.');
    match (segments.next(), segments.next()) {
        (Some("services"), Some(name)) => Some(name),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_rules_load() {
        let registry = RuleRegistry::builtin().unwrap();
        assert!(registry.rules().iter().any(|r| r.rule.field == "paths.pool"));
        assert!(registry.custom_rule_names().contains("unique_port"));
        assert!(registry
            .client_side_rules()
            .iter()
            .all(|r| r.custom_rules.is_empty()));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let result = RuleRegistry::from_json(r#"[{"field":"a","type":"string","pattern":"("}]"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_expand_wildcard() {
        let doc = json!({"services": {"sonarr": {"port": 1}, "radarr": {}}});
        assert_eq!(
            expand_field("services.*.port", &doc),
            vec!["services.radarr.port", "services.sonarr.port"]
        );
        assert_eq!(expand_field("paths.pool", &doc), vec!["paths.pool"]);
        assert!(expand_field("services.*.port", &json!({})).is_empty());
    }

    #[test]
    fn test_lookup_and_service_of() {
        let doc = json!({"paths": {"pool": "/p", "downloads": null}});
        assert_eq!(lookup(&doc, "paths.pool"), Some(&json!("/p")));
        assert_eq!(lookup(&doc, "paths.downloads"), None);
        assert_eq!(lookup(&doc, "paths.missing"), None);
        assert_eq!(service_of("services.radarr.port"), Some("radarr"));
        assert_eq!(service_of("paths.pool"), None);
    }
}
