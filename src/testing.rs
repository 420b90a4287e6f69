//! Test doubles for the storage engine boundary
//!
//! `MockStorageEngine` answers each operation from a responder table keyed by
//! [`EngineOperation`], records every call in order, and lets a test emit
//! mutation and terminal sync events as the real engine would.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

use crate::engine::{EngineContext, EngineEvent, StorageEngine, StorageEngineFactory, SyncOutcome};
use crate::error::{EngineError, EngineOperation, EngineResult};
use crate::model::{MutationEvent, QueryRequest};

/// Behavior for `start_sync`, `stop_sync` and `clear`
pub type LifecycleResponder = Arc<dyn Fn() -> EngineResult<()> + Send + Sync>;

/// Behavior for `query`
pub type QueryResponder = Arc<dyn Fn(&QueryRequest) -> EngineResult<Vec<serde_json::Value>> + Send + Sync>;

#[derive(Clone)]
enum Responder {
    Lifecycle(LifecycleResponder),
    Query(QueryResponder),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scriptable storage engine.
///
/// Without a responder every operation succeeds and `query` filters the
/// models stored with [`MockStorageEngine::insert_model`].
pub struct MockStorageEngine {
    responders: Mutex<HashMap<EngineOperation, Responder>>,
    latency: Mutex<HashMap<EngineOperation, Duration>>,
    calls: Mutex<Vec<EngineOperation>>,
    // Bumped after every recorded call so waiters can re-check
    call_version: watch::Sender<u64>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    models: Mutex<HashMap<String, Vec<serde_json::Value>>>,
    events: broadcast::Sender<EngineEvent>,
}

impl MockStorageEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        let (call_version, _) = watch::channel(0);
        Self {
            responders: Mutex::new(HashMap::new()),
            latency: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            call_version,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            models: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Script `start_sync`, `stop_sync` or `clear`
    pub fn respond_to<F>(&self, operation: EngineOperation, responder: F)
    where
        F: Fn() -> EngineResult<()> + Send + Sync + 'static,
    {
        lock(&self.responders).insert(operation, Responder::Lifecycle(Arc::new(responder)));
    }

    /// Script `query`
    pub fn respond_to_query<F>(&self, responder: F)
    where
        F: Fn(&QueryRequest) -> EngineResult<Vec<serde_json::Value>> + Send + Sync + 'static,
    {
        lock(&self.responders).insert(EngineOperation::Query, Responder::Query(Arc::new(responder)));
    }

    /// Make an operation fail with `error` every time
    pub fn fail(&self, operation: EngineOperation, error: EngineError) {
        match operation {
            EngineOperation::Query => self.respond_to_query(move |_| Err(error.clone())),
            _ => self.respond_to(operation, move || Err(error.clone())),
        }
    }

    /// Restore the default behavior for an operation
    pub fn reset_responder(&self, operation: EngineOperation) {
        lock(&self.responders).remove(&operation);
    }

    /// Delay an operation before it answers
    pub fn with_latency(&self, operation: EngineOperation, delay: Duration) {
        lock(&self.latency).insert(operation, delay);
    }

    /// Store a model for the default query behavior
    pub fn insert_model(&self, model_name: &str, model: serde_json::Value) {
        lock(&self.models)
            .entry(model_name.to_string())
            .or_default()
            .push(model);
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<EngineOperation> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, operation: EngineOperation) -> usize {
        lock(&self.calls).iter().filter(|op| **op == operation).count()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Wait until `operation` has been called at least `count` times.
    ///
    /// Returns `false` on timeout.
    pub async fn wait_for_calls(
        &self,
        operation: EngineOperation,
        count: usize,
        timeout: Duration,
    ) -> bool {
        let mut version = self.call_version.subscribe();
        let result = tokio::time::timeout(
            timeout,
            version.wait_for(|_| self.call_count(operation) >= count),
        )
        .await;
        matches!(result, Ok(Ok(_)))
    }

    /// Emit a mutation event on the engine's event stream
    pub fn emit_mutation(&self, event: MutationEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.events.send(EngineEvent::Mutation(event));
    }

    /// End the sync session successfully
    pub fn finish_sync(&self) {
        // Ignore send errors (no subscribers)
        let _ = self.events.send(EngineEvent::SyncTerminated(SyncOutcome::Completed));
    }

    /// End the sync session with an error
    pub fn fail_sync(&self, error: EngineError) {
        // Ignore send errors (no subscribers)
        let _ = self.events.send(EngineEvent::SyncTerminated(SyncOutcome::Failed(error)));
    }

    /// Highest number of engine calls that were running at the same time
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of live event subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    async fn record(&self, operation: EngineOperation) -> Option<Responder> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        lock(&self.calls).push(operation);
        self.call_version.send_modify(|version| *version += 1);

        let delay = lock(&self.latency).get(&operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        lock(&self.responders).get(&operation).cloned()
    }

    async fn lifecycle(&self, operation: EngineOperation) -> EngineResult<()> {
        match self.record(operation).await {
            Some(Responder::Lifecycle(responder)) => responder(),
            Some(Responder::Query(_)) | None => Ok(()),
        }
    }
}

impl Default for MockStorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageEngine for MockStorageEngine {
    async fn start_sync(&self) -> EngineResult<()> {
        self.lifecycle(EngineOperation::StartSync).await
    }

    async fn stop_sync(&self) -> EngineResult<()> {
        self.lifecycle(EngineOperation::StopSync).await
    }

    async fn clear(&self) -> EngineResult<()> {
        let result = self.lifecycle(EngineOperation::Clear).await;
        if result.is_ok() {
            lock(&self.models).clear();
        }
        result
    }

    async fn query(&self, request: &QueryRequest) -> EngineResult<Vec<serde_json::Value>> {
        match self.record(EngineOperation::Query).await {
            Some(Responder::Query(responder)) => responder(request),
            Some(Responder::Lifecycle(responder)) => responder().map(|_| Vec::new()),
            None => {
                let models = lock(&self.models);
                let stored = models.get(&request.schema.name).map(Vec::as_slice).unwrap_or(&[]);
                Ok(request.apply(stored))
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

/// Factory that hands out one shared [`MockStorageEngine`]
pub struct MockStorageEngineFactory {
    engine: Arc<MockStorageEngine>,
    constructions: AtomicUsize,
    failure: Mutex<Option<EngineError>>,
    last_context: Mutex<Option<EngineContext>>,
}

impl MockStorageEngineFactory {
    pub fn new(engine: Arc<MockStorageEngine>) -> Self {
        Self {
            engine,
            constructions: AtomicUsize::new(0),
            failure: Mutex::new(None),
            last_context: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<MockStorageEngine> {
        &self.engine
    }

    /// How many times an engine was requested
    pub fn construction_count(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    /// Make construction fail (`None` restores success)
    pub fn set_failure(&self, failure: Option<EngineError>) {
        *lock(&self.failure) = failure;
    }

    /// Context passed to the most recent construction
    pub fn last_context(&self) -> Option<EngineContext> {
        lock(&self.last_context).clone()
    }
}

impl StorageEngineFactory for MockStorageEngineFactory {
    fn create(&self, context: &EngineContext) -> EngineResult<Arc<dyn StorageEngine>> {
        if let Some(error) = lock(&self.failure).clone() {
            return Err(error);
        }
        self.constructions.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_context) = Some(context.clone());
        Ok(Arc::clone(&self.engine) as Arc<dyn StorageEngine>)
    }
}
