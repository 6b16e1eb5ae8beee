//! Run registry and event broker under concurrency

use std::sync::Arc;
use std::thread;

use arrstack::errors::StackError;
use arrstack::runs::{EventBroker, RunRegistry};
use openapi_server::{RunEvent, StageEvent, StageStatus};

fn event(stage: &str, status: StageStatus) -> StageEvent {
    StageEvent {
        stage: stage.to_string(),
        status,
        detail: None,
    }
}

#[test]
fn test_racing_creates_admit_one_run() {
    let registry = Arc::new(RunRegistry::new(50));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = registry.clone();
            thread::spawn(move || registry.create_run("local", "digest"))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let created: Vec<&String> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(created.len(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, StackError::Conflict { .. })));
    assert_eq!(registry.running_run("local").as_ref(), Some(created[0]));
}

#[test]
fn test_targets_are_independent() {
    let registry = RunRegistry::new(50);
    registry.create_run("nas", "a").unwrap();
    registry.create_run("seedbox", "b").unwrap();
    assert!(registry.create_run("nas", "c").is_err());
}

#[tokio::test]
async fn test_concurrent_subscribers_get_identical_streams() {
    let registry = Arc::new(RunRegistry::new(50));
    let broker = Arc::new(EventBroker::new(registry.clone(), 64));
    let run_id = registry.create_run("local", "digest").unwrap();

    broker.publish(&run_id, event("validate", StageStatus::Running)).unwrap();
    let mut first = broker.subscribe(&run_id).unwrap();
    broker.publish(&run_id, event("validate", StageStatus::Ok)).unwrap();
    let mut second = broker.subscribe(&run_id).unwrap();
    broker.publish(&run_id, event("render", StageStatus::Running)).unwrap();
    broker.complete(&run_id, false, Some("render failed".to_string())).unwrap();

    let mut streams = Vec::new();
    for rx in [&mut first, &mut second] {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(serde_json::to_value(&event).unwrap());
        }
        streams.push(events);
    }

    assert_eq!(streams[0], streams[1]);
    assert_eq!(streams[0].len(), 4);
    assert_eq!(streams[0][3]["event"], "status");
    assert_eq!(streams[0][3]["data"]["ok"], false);
    assert_eq!(broker.subscriber_count(&run_id), 0);
}

#[tokio::test]
async fn test_dropped_subscriber_does_not_block_publisher() {
    let registry = Arc::new(RunRegistry::new(50));
    let broker = EventBroker::new(registry.clone(), 1);
    let run_id = registry.create_run("local", "digest").unwrap();

    let mut slow = broker.subscribe(&run_id).unwrap();
    for _ in 0..10 {
        broker.publish(&run_id, event("verify", StageStatus::Running)).unwrap();
    }
    broker.complete(&run_id, true, None).unwrap();

    // The slow subscriber sees a prefix and no terminal status
    let mut received = Vec::new();
    while let Some(event) = slow.recv().await {
        received.push(event);
    }
    assert!(received.len() < 11);
    assert!(!received.iter().any(RunEvent::is_terminal));

    // The run itself kept every event
    assert_eq!(registry.get(&run_id).unwrap().events.len(), 10);
}

#[test]
fn test_publish_after_complete_is_invariant_error() {
    let registry = Arc::new(RunRegistry::new(50));
    let broker = EventBroker::new(registry.clone(), 8);
    let run_id = registry.create_run("local", "digest").unwrap();
    broker.complete(&run_id, true, None).unwrap();

    let err = broker
        .publish(&run_id, event("verify", StageStatus::Ok))
        .unwrap_err();
    assert!(matches!(err, StackError::RegistryInvariant(_)));
}
