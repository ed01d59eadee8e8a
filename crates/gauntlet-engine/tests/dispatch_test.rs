// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dispatch queue integration tests: per-identity serialization, duplicate
//! policies, callback delivery, and worker-pool resilience.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Barrier;
use tokio::time::timeout;

use common::*;
use gauntlet_engine::dispatch::{
    DispatchHandler, DispatchQueue, DispatchQueueConfig, DuplicatePolicy,
};
use gauntlet_engine::error::{EngineError, Result};
use gauntlet_model::ClientProblem;

/// Configurable handler for exercising queue semantics.
struct TestHandler {
    processed: Arc<AtomicUsize>,
    delay: Duration,
    fail_ids: HashSet<String>,
    provisional: Option<Value>,
    barrier: Option<Arc<Barrier>>,
}

impl TestHandler {
    fn new(processed: Arc<AtomicUsize>) -> Self {
        Self {
            processed,
            delay: Duration::ZERO,
            fail_ids: HashSet::new(),
            provisional: None,
            barrier: None,
        }
    }
}

#[async_trait]
impl DispatchHandler for TestHandler {
    type Item = ClientProblem;
    type Outcome = Value;

    fn endpoint(&self) -> &'static str {
        "updated"
    }

    async fn validate(&self, item: &ClientProblem) -> Result<Option<Value>> {
        if item.client == "reject" {
            return Err(EngineError::NotFound);
        }
        Ok(self.provisional.clone())
    }

    async fn process(&self, item: &ClientProblem) -> Result<Value> {
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_ids.contains(item.id.as_str()) {
            return Err(EngineError::Other("boom".to_string()));
        }
        self.processed.fetch_add(1, Ordering::SeqCst);
        Ok(Value::String(item.id.clone()))
    }
}

fn config(policy: DuplicatePolicy) -> DispatchQueueConfig {
    init_tracing();
    DispatchQueueConfig {
        workers: 4,
        requeue_delay: Duration::from_millis(50),
        duplicate_policy: policy,
        starvation_warn_after: 20,
    }
}

fn item(id: &str) -> ClientProblem {
    client_problem(problem(id, "demo"))
}

#[tokio::test]
async fn empty_identity_is_rejected_at_enqueue() {
    let (callback, _rx) = ChannelCallback::new();
    let queue = DispatchQueue::start(
        TestHandler::new(Arc::new(AtomicUsize::new(0))),
        callback,
        config(DuplicatePolicy::Drop),
    );

    let err = queue.enqueue(item("")).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound));
}

#[tokio::test]
async fn validation_error_propagates_to_the_caller() {
    let (callback, _rx) = ChannelCallback::new();
    let queue = DispatchQueue::start(
        TestHandler::new(Arc::new(AtomicUsize::new(0))),
        callback,
        config(DuplicatePolicy::Drop),
    );

    let mut rejected = item("p-1");
    rejected.client = "reject".to_string();
    let err = queue.enqueue(rejected).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound));
}

#[tokio::test]
async fn result_is_delivered_by_callback() {
    let processed = Arc::new(AtomicUsize::new(0));
    let (callback, mut rx) = ChannelCallback::new();
    let queue = DispatchQueue::start(
        TestHandler::new(processed),
        callback,
        config(DuplicatePolicy::Drop),
    );

    queue.enqueue(item("p-1")).await.unwrap();

    let (client, endpoint, payload) = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(client, "game");
    assert_eq!(endpoint, "updated");
    assert_eq!(payload, Value::String("p-1".to_string()));
}

#[tokio::test]
async fn provisional_callback_fires_at_admission() {
    let processed = Arc::new(AtomicUsize::new(0));
    let (callback, mut rx) = ChannelCallback::new();

    let mut handler = TestHandler::new(processed);
    handler.provisional = Some(Value::String("registered".to_string()));
    handler.delay = Duration::from_millis(200);

    let queue = DispatchQueue::start(handler, callback, config(DuplicatePolicy::Drop));
    queue.enqueue(item("p-1")).await.unwrap();

    // the provisional callback arrives while the item is still processing
    let (_, _, payload) = timeout(Duration::from_millis(100), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload, Value::String("registered".to_string()));

    let (_, _, payload) = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload, Value::String("p-1".to_string()));
}

#[tokio::test]
async fn drop_policy_processes_a_duplicate_exactly_once() {
    let processed = Arc::new(AtomicUsize::new(0));
    let (callback, _rx) = ChannelCallback::new();

    let mut handler = TestHandler::new(processed.clone());
    handler.delay = Duration::from_millis(200);

    let queue = DispatchQueue::start(handler, callback, config(DuplicatePolicy::Drop));

    queue.enqueue(item("p-1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    queue.enqueue(item("p-1")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(processed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_policy_eventually_processes_every_submission() {
    let processed = Arc::new(AtomicUsize::new(0));
    let (callback, _rx) = ChannelCallback::new();

    let mut handler = TestHandler::new(processed.clone());
    handler.delay = Duration::from_millis(150);

    let queue = DispatchQueue::start(handler, callback, config(DuplicatePolicy::Retry));

    queue.enqueue(item("p-1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.enqueue(item("p-1")).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while processed.load(Ordering::SeqCst) < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    assert_eq!(processed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn different_identities_process_in_parallel() {
    let processed = Arc::new(AtomicUsize::new(0));
    let (callback, mut rx) = ChannelCallback::new();

    // both items must be in flight at once for the barrier to open
    let mut handler = TestHandler::new(processed.clone());
    handler.barrier = Some(Arc::new(Barrier::new(2)));

    let queue = DispatchQueue::start(handler, callback, config(DuplicatePolicy::Drop));
    queue.enqueue(item("p-1")).await.unwrap();
    queue.enqueue(item("p-2")).await.unwrap();

    for _ in 0..2 {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("parallel processing stalled")
            .unwrap();
    }
    assert_eq!(processed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn handler_errors_do_not_poison_the_pool() {
    let processed = Arc::new(AtomicUsize::new(0));
    let (callback, mut rx) = ChannelCallback::new();

    let mut handler = TestHandler::new(processed.clone());
    handler.fail_ids.insert("doomed".to_string());

    let queue = DispatchQueue::start(handler, callback, config(DuplicatePolicy::Drop));

    queue.enqueue(item("doomed")).await.unwrap();
    queue.enqueue(item("p-2")).await.unwrap();

    // only the healthy item produces a callback
    let (_, _, payload) = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload, Value::String("p-2".to_string()));
    assert_eq!(processed.load(Ordering::SeqCst), 1);

    // the failed identity was released and can be processed again
    queue.enqueue(item("doomed")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(queue.in_flight(), 0);
}

#[tokio::test]
async fn shutdown_stops_the_workers() {
    let processed = Arc::new(AtomicUsize::new(0));
    let (callback, _rx) = ChannelCallback::new();
    let queue = DispatchQueue::start(
        TestHandler::new(processed.clone()),
        callback,
        config(DuplicatePolicy::Drop),
    );

    queue.enqueue(item("p-1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    queue.shutdown();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(processed.load(Ordering::SeqCst), 1);
}
