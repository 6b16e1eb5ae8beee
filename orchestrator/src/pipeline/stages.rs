//! Pipeline stages and their event reporting

use std::fmt;
use std::sync::Arc;

use openapi_server::{StageEvent, StageStatus};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::runs::broker::EventBroker;

/// Fixed, ordered pipeline steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Validate,
    Render,
    Deploy,
    Configure,
    Verify,
}

impl Stage {
    /// Execution order
    pub const ALL: [Stage; 5] = [
        Stage::Validate,
        Stage::Render,
        Stage::Deploy,
        Stage::Configure,
        Stage::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Render => "render",
            Stage::Deploy => "deploy",
            Stage::Configure => "configure",
            Stage::Verify => "verify",
        }
    }

    /// Whether a failure of this stage stops the pipeline
    pub fn is_fatal(&self) -> bool {
        matches!(self, Stage::Validate | Stage::Render | Stage::Deploy)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publishes stage transitions for one run
pub struct StageReporter {
    broker: Arc<EventBroker>,
    run_id: String,
}

impl StageReporter {
    pub fn new(broker: Arc<EventBroker>, run_id: impl Into<String>) -> Self {
        Self {
            broker,
            run_id: run_id.into(),
        }
    }

    pub fn running(&self, stage: Stage) {
        info!("[{}] {} started", self.run_id, stage);
        self.emit(stage, StageStatus::Running, None);
    }

    pub fn ok(&self, stage: Stage, detail: Option<String>) {
        info!("[{}] {} ok", self.run_id, stage);
        self.emit(stage, StageStatus::Ok, detail);
    }

    pub fn failed(&self, stage: Stage, detail: Option<String>) {
        warn!("[{}] {} failed: {}", self.run_id, stage, detail.as_deref().unwrap_or("-"));
        self.emit(stage, StageStatus::Failed, detail);
    }

    fn emit(&self, stage: Stage, status: StageStatus, detail: Option<String>) {
        let event = StageEvent {
            stage: stage.as_str().to_string(),
            status,
            detail,
        };
        if let Err(e) = self.broker.publish(&self.run_id, event) {
            error!("[{}] Failed to publish {} event: {}", self.run_id, stage, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_and_fatality() {
        let names: Vec<&str> = Stage::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["validate", "render", "deploy", "configure", "verify"]);
        assert!(Stage::Deploy.is_fatal());
        assert!(!Stage::Configure.is_fatal());
        assert!(!Stage::Verify.is_fatal());
    }
}
