//! Change-impact analysis

pub mod diff;
pub mod mapping;

pub use diff::diff;

use serde_json::Value;

use crate::models::config::enabled_services_in;

/// Services enabled in `candidate` but not in `previous`
pub fn newly_enabled(previous: Option<&Value>, candidate: &Value) -> Vec<String> {
    let before = previous.map(enabled_services_in).unwrap_or_default();
    enabled_services_in(candidate)
        .into_iter()
        .filter(|s| !before.contains(s))
        .collect()
}
