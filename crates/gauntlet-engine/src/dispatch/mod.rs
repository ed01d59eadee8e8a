// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Concurrent dispatch queues.
//!
//! The dispatch queue is the engine's front door: it admits work items
//! keyed by an opaque identity, guarantees at most one in-flight
//! processing pass per identity, bounds total parallelism with a fixed
//! worker pool, and delivers each result to the origin client by callback.
//!
//! Duplicate arrivals for an identity already in flight are diverted to
//! the queue's [`DuplicatePolicy`]: the problem queue drops them (a retry
//! of a create is redundant), the grading queue defers and resubmits them
//! until processed (every submission must eventually be graded).

pub mod grading;
pub mod problem;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use gauntlet_model::{ClientProblem, ClientProblemFlag};

use crate::callback::CallbackTransport;
use crate::error::{EngineError, Result};

/// A work item addressed by identity and origin client.
pub trait QueueItem: Clone + Send + Sync + 'static {
    /// Dispatch identity; at most one pass per identity runs at a time.
    fn id(&self) -> &str;
    /// Origin client for callback delivery.
    fn client(&self) -> &str;
}

impl QueueItem for ClientProblem {
    fn id(&self) -> &str {
        &self.id
    }
    fn client(&self) -> &str {
        &self.client
    }
}

impl QueueItem for ClientProblemFlag {
    fn id(&self) -> &str {
        &self.id
    }
    fn client(&self) -> &str {
        &self.client
    }
}

/// The unit of work a queue runs, plus its validation hook and callback
/// endpoint.
#[async_trait]
pub trait DispatchHandler: Send + Sync + 'static {
    /// Item type this handler consumes.
    type Item: QueueItem;
    /// Result payload delivered by callback.
    type Outcome: Serialize + Send + Sync + 'static;

    /// Callback endpoint results are posted to.
    fn endpoint(&self) -> &'static str;

    /// Admission hook, run synchronously at enqueue time. A returned
    /// payload is fired immediately as a provisional callback (e.g. a
    /// `Registered` state carrying an ETA). An error rejects the enqueue.
    async fn validate(&self, item: &Self::Item) -> Result<Option<Self::Outcome>> {
        let _ = item;
        Ok(None)
    }

    /// Execute the unit of work. The returned payload must reflect state
    /// already persisted by the work itself.
    async fn process(&self, item: &Self::Item) -> Result<Self::Outcome>;
}

/// What a worker does with an item whose identity is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Discard the duplicate.
    Drop,
    /// Resubmit to the pool after a fixed delay, until processed.
    Retry,
}

/// Tuning for one dispatch queue.
#[derive(Debug, Clone)]
pub struct DispatchQueueConfig {
    /// Worker-pool size; total parallelism bound.
    pub workers: usize,
    /// Delay before a deferred duplicate re-enters the pool.
    pub requeue_delay: Duration,
    /// Duplicate handling for this queue.
    pub duplicate_policy: DuplicatePolicy,
    /// Emit a starvation warning after this many consecutive requeues of
    /// one identity.
    pub starvation_warn_after: u32,
}

impl Default for DispatchQueueConfig {
    fn default() -> Self {
        Self {
            workers: 20,
            requeue_delay: Duration::from_secs(3),
            duplicate_policy: DuplicatePolicy::Retry,
            starvation_warn_after: 20,
        }
    }
}

/// A bounded-parallelism dispatch queue over a [`DispatchHandler`].
pub struct DispatchQueue<H: DispatchHandler> {
    inner: Arc<QueueInner<H>>,
}

impl<H: DispatchHandler> Clone for DispatchQueue<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct QueueInner<H: DispatchHandler> {
    handler: H,
    callback: Arc<dyn CallbackTransport>,
    config: DispatchQueueConfig,
    tx: mpsc::UnboundedSender<H::Item>,
    active: Arc<Mutex<HashSet<String>>>,
    requeues: Mutex<HashMap<String, u32>>,
    shutdown_tx: watch::Sender<bool>,
}

impl<H: DispatchHandler> DispatchQueue<H> {
    /// Start the queue, spawning its worker pool.
    pub fn start(
        handler: H,
        callback: Arc<dyn CallbackTransport>,
        config: DispatchQueueConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        let inner = Arc::new(QueueInner {
            handler,
            callback,
            config,
            tx,
            active: Arc::new(Mutex::new(HashSet::new())),
            requeues: Mutex::new(HashMap::new()),
            shutdown_tx,
        });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker in 0..inner.config.workers.max(1) {
            let inner = inner.clone();
            let rx = rx.clone();
            let shutdown_rx = inner.shutdown_tx.subscribe();
            tokio::spawn(worker_loop(inner, rx, shutdown_rx, worker));
        }

        Self { inner }
    }

    /// Admit a work item.
    ///
    /// Fails when the item's identity is empty or the validation hook
    /// rejects it; otherwise the item enters the worker pool and the call
    /// returns immediately.
    pub async fn enqueue(&self, item: H::Item) -> Result<()> {
        if item.id().is_empty() {
            return Err(EngineError::NotFound);
        }

        if let Some(provisional) = self.inner.handler.validate(&item).await? {
            self.inner.fire_callback(item.client(), &provisional);
        }

        self.inner
            .tx
            .send(item)
            .map_err(|_| EngineError::Other("dispatch queue is shut down".to_string()))
    }

    /// Signal the worker pool to stop after in-flight items complete.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }

    /// Number of identities currently marked in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.active.lock().unwrap().len()
    }
}

async fn worker_loop<H: DispatchHandler>(
    inner: Arc<QueueInner<H>>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<H::Item>>>,
    mut shutdown_rx: watch::Receiver<bool>,
    worker: usize,
) {
    debug!(worker, "dispatch worker started");

    loop {
        let item = tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }

            item = async { rx.lock().await.recv().await } => item,
        };

        match item {
            Some(item) => inner.handle(item).await,
            None => break,
        }
    }

    debug!(worker, "dispatch worker stopped");
}

impl<H: DispatchHandler> QueueInner<H> {
    async fn handle(&self, item: H::Item) {
        let id = item.id().to_string();
        debug!(%id, "worker pulled item");

        let Some(guard) = ActiveGuard::try_acquire(self.active.clone(), &id) else {
            self.divert(item).await;
            return;
        };

        self.requeues.lock().unwrap().remove(&id);

        match self.handler.process(&item).await {
            Ok(outcome) => self.fire_callback(item.client(), &outcome),
            Err(e) => error!(error = %e, %id, "failed to process queue item"),
        }

        // the guard releases the identity even if process panicked
        drop(guard);
    }

    /// Apply the duplicate policy to an item whose identity is in flight.
    async fn divert(&self, item: H::Item) {
        let id = item.id().to_string();

        match self.config.duplicate_policy {
            DuplicatePolicy::Drop => {
                debug!(%id, "dropping duplicate while in flight");
            }
            DuplicatePolicy::Retry => {
                let attempts = {
                    let mut requeues = self.requeues.lock().unwrap();
                    let count = requeues.entry(id.clone()).or_insert(0);
                    *count += 1;
                    *count
                };
                if attempts % self.config.starvation_warn_after == 0 {
                    warn!(%id, attempts, "item still deferred behind an in-flight pass");
                }

                debug!(%id, attempts, "deferring duplicate, will resubmit");
                let tx = self.tx.clone();
                let delay = self.config.requeue_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if tx.send(item).is_err() {
                        debug!(%id, "queue shut down while item was deferred");
                    }
                });
            }
        }
    }

    /// Deliver a payload to the origin client, fire-and-forget.
    fn fire_callback(&self, client: &str, outcome: &H::Outcome) {
        let payload = match serde_json::to_value(outcome) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "failed to serialize callback payload");
                return;
            }
        };

        let callback = self.callback.clone();
        let client = client.to_string();
        let endpoint = self.handler.endpoint();
        tokio::spawn(async move {
            debug!(%client, endpoint, "sending callback");
            if let Err(e) = callback.post(&client, endpoint, &payload).await {
                error!(error = %e, %client, endpoint, "callback delivery failed");
            }
        });
    }
}

/// Marks an identity active for the lifetime of one processing pass and
/// releases it on drop, whatever happens inside the pass.
struct ActiveGuard {
    active: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl ActiveGuard {
    fn try_acquire(active: Arc<Mutex<HashSet<String>>>, id: &str) -> Option<Self> {
        let mut set = active.lock().unwrap();
        if !set.insert(id.to_string()) {
            return None;
        }
        drop(set);
        Some(Self {
            active,
            id: id.to_string(),
        })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.lock().unwrap().remove(&self.id);
    }
}
