//! Per-run event fan-out
//!
//! Every write to a run goes through the broker: appending to the registry
//! and delivering to live subscribers happen under the same lock that a new
//! subscriber takes to copy the backlog, so a subscriber sees the backlog
//! followed by live events with no gap and no duplicate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use openapi_server::{RunEvent, StageEvent, StatusEvent};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::StackError;
use crate::runs::registry::{Run, RunRegistry};

/// Default per-subscriber buffer beyond the backlog
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

pub struct EventBroker {
    registry: Arc<RunRegistry>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<RunEvent>>>>,
    buffer: usize,
}

impl EventBroker {
    pub fn new(registry: Arc<RunRegistry>, buffer: usize) -> Self {
        Self {
            registry,
            subscribers: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Record a stage event and deliver it to live subscribers.
    ///
    /// Never blocks: a subscriber whose buffer is full is dropped, which it
    /// observes as the stream closing before the terminal status event.
    pub fn publish(&self, run_id: &str, event: StageEvent) -> Result<(), StackError> {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        self.registry.append_event(run_id, event.clone())?;

        if let Some(senders) = subscribers.get_mut(run_id) {
            let event = RunEvent::Stage(event);
            senders.retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Dropping slow subscriber of run {}", run_id);
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
        Ok(())
    }

    /// Complete the run, deliver the terminal status event and close every
    /// subscriber stream
    pub fn complete(&self, run_id: &str, ok: bool, summary: Option<String>) -> Result<Run, StackError> {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let run = self.registry.complete(run_id, ok, summary)?;

        let status = RunEvent::Status(StatusEvent {
            ok,
            summary: run.summary.clone(),
        });
        if let Some(senders) = subscribers.remove(run_id) {
            debug!("Closing {} subscriber(s) of run {}", senders.len(), run_id);
            for tx in senders {
                if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(status.clone()) {
                    debug!("Subscriber of run {} full, closing without status", run_id);
                }
            }
        }
        Ok(run)
    }

    /// Attach to a run's stream: backlog first, then live events, ending
    /// with the terminal status event
    pub fn subscribe(&self, run_id: &str) -> Result<mpsc::Receiver<RunEvent>, StackError> {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let run = self
            .registry
            .get(run_id)
            .ok_or_else(|| StackError::NotFound(format!("run {}", run_id)))?;

        // Backlog and the status event always fit
        let (tx, rx) = mpsc::channel(run.events.len() + 1 + self.buffer);
        for event in &run.events {
            let _ = tx.try_send(RunEvent::Stage(event.clone()));
        }

        match run.status.as_ok() {
            Some(ok) => {
                let _ = tx.try_send(RunEvent::Status(StatusEvent {
                    ok,
                    summary: run.summary.clone(),
                }));
            }
            None => {
                subscribers.entry(run_id.to_string()).or_default().push(tx);
            }
        }

        Ok(rx)
    }

    /// Live subscriber count for a run
    pub fn subscriber_count(&self, run_id: &str) -> usize {
        let subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.get(run_id).map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openapi_server::StageStatus;

    fn stage(name: &str, status: StageStatus) -> StageEvent {
        StageEvent {
            stage: name.to_string(),
            status,
            detail: None,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<RunEvent>) -> Vec<RunEvent> {
        let mut out = Vec::new();
        while let Some(event) = rx.recv().await {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_backlog_then_live() {
        let registry = Arc::new(RunRegistry::new(10));
        let broker = EventBroker::new(registry.clone(), 8);
        let id = registry.create_run("local", "d").unwrap();

        broker.publish(&id, stage("validate", StageStatus::Running)).unwrap();
        let rx = broker.subscribe(&id).unwrap();
        broker.publish(&id, stage("validate", StageStatus::Ok)).unwrap();
        broker.complete(&id, true, Some("done".to_string())).unwrap();

        let events = drain(rx).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], RunEvent::Stage(stage("validate", StageStatus::Running)));
        assert_eq!(events[1], RunEvent::Stage(stage("validate", StageStatus::Ok)));
        assert!(events[2].is_terminal());
    }

    #[tokio::test]
    async fn test_subscribe_after_completion_replays_everything() {
        let registry = Arc::new(RunRegistry::new(10));
        let broker = EventBroker::new(registry.clone(), 8);
        let id = registry.create_run("local", "d").unwrap();
        broker.publish(&id, stage("validate", StageStatus::Running)).unwrap();
        broker.publish(&id, stage("validate", StageStatus::Failed)).unwrap();
        broker.complete(&id, false, Some("validate failed".to_string())).unwrap();

        let events = drain(broker.subscribe(&id).unwrap()).await;
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2],
            RunEvent::Status(StatusEvent {
                ok: false,
                summary: Some("validate failed".to_string())
            })
        );
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_dropped() {
        let registry = Arc::new(RunRegistry::new(10));
        let broker = EventBroker::new(registry.clone(), 1);
        let id = registry.create_run("local", "d").unwrap();
        let rx = broker.subscribe(&id).unwrap();

        // Capacity is 2 (status slot + buffer); the third publish overflows
        for _ in 0..3 {
            broker.publish(&id, stage("deploy", StageStatus::Running)).unwrap();
        }
        assert_eq!(broker.subscriber_count(&id), 0);
        broker.complete(&id, true, None).unwrap();

        let events = drain(rx).await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| !e.is_terminal()));
        // The registry still has the full history
        assert_eq!(registry.get(&id).unwrap().events.len(), 3);
    }

    #[tokio::test]
    async fn test_full_subscriber_closes_without_status() {
        let registry = Arc::new(RunRegistry::new(10));
        let broker = EventBroker::new(registry.clone(), 1);
        let id = registry.create_run("local", "d").unwrap();
        let rx = broker.subscribe(&id).unwrap();

        // Exactly fills the two slots, so the status event has no room
        for _ in 0..2 {
            broker.publish(&id, stage("deploy", StageStatus::Running)).unwrap();
        }
        assert_eq!(broker.subscriber_count(&id), 1);
        broker.complete(&id, true, None).unwrap();
        assert_eq!(broker.subscriber_count(&id), 0);

        let events = drain(rx).await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| !e.is_terminal()));
        assert_eq!(registry.get(&id).unwrap().status.as_ok(), Some(true));
    }

    #[test]
    fn test_unknown_run() {
        let broker = EventBroker::new(Arc::new(RunRegistry::new(10)), 8);
        assert!(matches!(broker.subscribe("nope"), Err(StackError::NotFound(_))));
    }
}
