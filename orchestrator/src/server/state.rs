//! Server state

use std::sync::Arc;

use crate::orchestrator::ApplyOrchestrator;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<ApplyOrchestrator>,
}

impl ServerState {
    pub fn new(orchestrator: Arc<ApplyOrchestrator>) -> Self {
        Self { orchestrator }
    }
}
