//! In-memory run registry

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use openapi_server::{RunView, StageEvent};
use tracing::{debug, error};

use crate::errors::StackError;
use crate::utils::generate_run_id;

/// Lifecycle of a run. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    /// Client representation: `null` while running
    pub fn as_ok(&self) -> Option<bool> {
        match self {
            RunStatus::Running => None,
            RunStatus::Success => Some(true),
            RunStatus::Failed => Some(false),
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != RunStatus::Running
    }
}

/// One execution of the apply pipeline
#[derive(Debug, Clone)]
pub struct Run {
    pub run_id: String,
    pub target: String,
    pub status: RunStatus,
    pub events: Vec<StageEvent>,
    pub summary: Option<String>,
    pub config_digest: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn view(&self) -> RunView {
        RunView {
            run_id: self.run_id.clone(),
            target: self.target.clone(),
            ok: self.status.as_ok(),
            summary: self.summary.clone(),
            events: self.events.clone(),
            config_digest: self.config_digest.clone(),
            created_at: self.created_at,
            finished_at: self.finished_at,
        }
    }
}

#[derive(Default)]
struct Inner {
    runs: HashMap<String, Run>,
    /// Creation order, oldest first
    order: VecDeque<String>,
    /// Target name to its in-flight run
    running: HashMap<String, String>,
}

/// Tracks recent runs and enforces one in-flight run per target.
///
/// Nothing survives a process restart.
pub struct RunRegistry {
    inner: RwLock<Inner>,
    retention: usize,
}

impl RunRegistry {
    pub fn new(retention: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            retention: retention.max(1),
        }
    }

    /// Register a new running run, or fail with `Conflict` if `target`
    /// already has one in flight
    pub fn create_run(&self, target: &str, config_digest: &str) -> Result<String, StackError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        if let Some(run_id) = inner.running.get(target) {
            return Err(StackError::Conflict {
                target: target.to_string(),
                run_id: run_id.clone(),
            });
        }

        let run_id = generate_run_id();
        let run = Run {
            run_id: run_id.clone(),
            target: target.to_string(),
            status: RunStatus::Running,
            events: Vec::new(),
            summary: None,
            config_digest: config_digest.to_string(),
            created_at: Utc::now(),
            finished_at: None,
        };
        inner.runs.insert(run_id.clone(), run);
        inner.order.push_back(run_id.clone());
        inner.running.insert(target.to_string(), run_id.clone());
        Self::evict(&mut inner, self.retention);

        debug!("Created run {} for target {}", run_id, target);
        Ok(run_id)
    }

    /// Append a stage event to a running run
    pub fn append_event(&self, run_id: &str, event: StageEvent) -> Result<(), StackError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let run = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StackError::NotFound(format!("run {}", run_id)))?;

        if run.status.is_terminal() {
            error!("Event appended to completed run {}: {:?}", run_id, event);
            return Err(StackError::RegistryInvariant(format!(
                "append to completed run {}",
                run_id
            )));
        }

        run.events.push(event);
        Ok(())
    }

    /// Move a run to its terminal state
    pub fn complete(&self, run_id: &str, ok: bool, summary: Option<String>) -> Result<Run, StackError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let run = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StackError::NotFound(format!("run {}", run_id)))?;

        if run.status.is_terminal() {
            error!("Run {} completed twice", run_id);
            return Err(StackError::RegistryInvariant(format!(
                "run {} already completed",
                run_id
            )));
        }

        run.status = if ok { RunStatus::Success } else { RunStatus::Failed };
        run.summary = summary;
        run.finished_at = Some(Utc::now());
        let run = run.clone();

        if inner.running.get(&run.target) == Some(&run.run_id) {
            inner.running.remove(&run.target);
        }
        Self::evict(&mut inner, self.retention);
        Ok(run)
    }

    pub fn get(&self, run_id: &str) -> Option<Run> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.runs.get(run_id).cloned()
    }

    /// Up to `limit` runs, newest first
    pub fn list_recent(&self, limit: usize) -> Vec<Run> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.runs.get(id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// In-flight run for `target`, if any
    pub fn running_run(&self, target: &str) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.running.get(target).cloned()
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the oldest terminal runs beyond the retention count. Running runs
    /// are never evicted.
    fn evict(inner: &mut Inner, retention: usize) {
        while inner.runs.len() > retention {
            let Some(pos) = inner
                .order
                .iter()
                .position(|id| inner.runs.get(id).is_some_and(|r| r.status.is_terminal()))
            else {
                return;
            };
            if let Some(id) = inner.order.remove(pos) {
                inner.runs.remove(&id);
                debug!("Evicted run {}", id);
            }
        }
    }
}
