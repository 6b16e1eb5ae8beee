//! Structural diff of two configuration snapshots

use std::collections::BTreeSet;

use openapi_server::{Change, Preview};
use serde_json::Value;

use crate::impact::mapping::{classify, ImpactClass, ServiceSets};

/// Leaf names whose values never leave the process in clear text
const REDACTED_FIELDS: &[&str] = &["api_key", "password"];
const REDACTED: &str = "********";

/// Diff `previous` against `candidate` and derive the blast radius
pub fn diff(previous: &Value, candidate: &Value) -> Preview {
    let mut leaves = Vec::new();
    walk(String::new(), previous, candidate, &mut leaves);

    let sets = ServiceSets::from_snapshots(previous, candidate);
    let mut restart = BTreeSet::new();
    let mut reconfigure = BTreeSet::new();

    let changes = leaves
        .into_iter()
        .map(|(path, old_value, new_value)| {
            let (affected, class) = classify(&path, &sets);
            match class {
                ImpactClass::Restart => restart.extend(affected.iter().cloned()),
                ImpactClass::Reconfigure => reconfigure.extend(affected.iter().cloned()),
            }
            let redact = path
                .rsplit('.')
                .next()
                .is_some_and(|leaf| REDACTED_FIELDS.contains(&leaf));
            Change {
                old_value: if redact { redacted(old_value) } else { old_value },
                new_value: if redact { redacted(new_value) } else { new_value },
                path,
                affected_services: affected,
            }
        })
        .collect();

    // Restart takes precedence
    let services_to_reconfigure = reconfigure.difference(&restart).cloned().collect();

    Preview {
        changes,
        services_to_restart: restart.into_iter().collect(),
        services_to_reconfigure,
    }
}

fn walk(path: String, old: &Value, new: &Value, out: &mut Vec<(String, Value, Value)>) {
    let descend = (old.is_object() || old.is_null())
        && (new.is_object() || new.is_null())
        && (old.is_object() || new.is_object());

    if !descend {
        if old != new {
            out.push((path, old.clone(), new.clone()));
        }
        return;
    }

    let keys: BTreeSet<&String> = [old, new]
        .iter()
        .filter_map(|v| v.as_object())
        .flat_map(|m| m.keys())
        .collect();

    for key in keys {
        let child_path = if path.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", path, key)
        };
        let old_child = old.get(key).unwrap_or(&Value::Null);
        let new_child = new.get(key).unwrap_or(&Value::Null);
        walk(child_path, old_child, new_child, out);
    }
}

fn redacted(value: Value) -> Value {
    if value.is_null() {
        value
    } else {
        Value::String(REDACTED.to_string())
    }
}
