//! The DataStore plugin
//!
//! Client-facing entry point. Lifecycle calls are queued on the controller
//! the moment they are made and report back through an [`Operation`] future
//! or a completion callback.

mod controller;
mod operation;
mod state;
mod subscription;

pub use operation::{CompletionCallback, Operation};
pub use state::LifecycleState;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::{DataStoreConfig, PluginCollaborators};
use crate::engine::{EngineContext, StorageEngineFactory};
use crate::error::{DataStoreError, Result};
use crate::model::{Model, ModelRegistry, Pagination, QueryPredicate, QueryRequest};
use crate::publisher::{DataStorePublisher, MutationSubscription};
use controller::{Command, ControllerHandle};
use operation::Completion;

/// Offline-first DataStore plugin.
///
/// Cheap to clone; clones share the same controller and publisher.
///
/// # Example
///
/// ```rust,ignore
/// let plugin = DataStorePlugin::new(registry, factory, Arc::new(DataStorePublisher::new()));
/// plugin.configure(DataStoreConfig::default())?;
///
/// let mut events = plugin.observe("Post");
/// plugin.start().await?;
///
/// let drafts: Vec<Post> = plugin
///     .query(Some(QueryPredicate::eq("status", "draft")))
///     .await?;
///
/// plugin.stop().await?;
/// ```
#[derive(Clone)]
pub struct DataStorePlugin {
    inner: Arc<PluginInner>,
}

struct PluginInner {
    registry: Arc<ModelRegistry>,
    factory: Arc<dyn StorageEngineFactory>,
    publisher: Arc<DataStorePublisher>,
    collaborators: PluginCollaborators,
    controller: Mutex<ControllerSlot>,
}

/// The controller task is spawned on first `configure` and kept across
/// `reset`, so teardown and reconfiguration share one queue.
#[derive(Default)]
struct ControllerSlot {
    handle: Option<ControllerHandle>,
    configured: bool,
}

impl ControllerSlot {
    /// Handle accepting client operations, `None` while not configured
    fn active(&self) -> Option<&ControllerHandle> {
        self.handle.as_ref().filter(|_| self.configured)
    }
}

impl DataStorePlugin {
    /// Create an unconfigured plugin. No engine is built until first use.
    pub fn new(
        registry: ModelRegistry,
        factory: Arc<dyn StorageEngineFactory>,
        publisher: Arc<DataStorePublisher>,
    ) -> Self {
        Self::with_collaborators(registry, factory, publisher, PluginCollaborators::default())
    }

    pub fn with_collaborators(
        registry: ModelRegistry,
        factory: Arc<dyn StorageEngineFactory>,
        publisher: Arc<DataStorePublisher>,
        collaborators: PluginCollaborators,
    ) -> Self {
        Self {
            inner: Arc::new(PluginInner {
                registry: Arc::new(registry),
                factory,
                publisher,
                collaborators,
                controller: Mutex::new(ControllerSlot::default()),
            }),
        }
    }

    /// Move from `NotConfigured` to `Configured`.
    ///
    /// Does not build or start a storage engine. The first call must run
    /// inside a Tokio runtime; fails if the plugin is already configured.
    /// After a `reset` the new configuration takes effect once the reset has
    /// finished tearing down.
    pub fn configure(&self, config: DataStoreConfig) -> Result<()> {
        config.validate()?;

        let mut controller = self.lock_controller();
        if controller.configured {
            return Err(DataStoreError::Configuration(
                "DataStore plugin is already configured".into(),
            ));
        }

        match &controller.handle {
            Some(handle) => {
                if handle.configure(config).is_err() {
                    return Err(DataStoreError::Fatal("lifecycle controller stopped".into()));
                }
            }
            None => {
                let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
                    DataStoreError::Configuration(
                        "configure must be called within a Tokio runtime".into(),
                    )
                })?;
                let context = EngineContext {
                    registry: Arc::clone(&self.inner.registry),
                    config,
                    collaborators: self.inner.collaborators.clone(),
                };
                controller.handle = Some(ControllerHandle::spawn(
                    context,
                    Arc::clone(&self.inner.factory),
                    Arc::clone(&self.inner.publisher),
                    &runtime,
                ));
            }
        }
        controller.configured = true;

        info!(models = self.inner.registry.len(), "DataStore plugin configured");
        Ok(())
    }

    /// Configure from a plugin configuration object (`None` means defaults)
    pub fn configure_json(&self, value: Option<&serde_json::Value>) -> Result<()> {
        self.configure(DataStoreConfig::from_json(value)?)
    }

    /// Build the engine if needed and dispatch `start_sync`.
    ///
    /// Resolves once sync is dispatched, not once it has converged.
    pub fn start(&self) -> Operation<()> {
        self.submit(Command::Start)
    }

    /// Callback form of [`start`](Self::start); the callback runs on the
    /// controller task before the next queued operation begins.
    pub fn start_then<F>(&self, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.dispatch(Command::Start(Completion::callback(callback)));
    }

    /// Pause sync. The engine and all publisher subscriptions stay alive.
    pub fn stop(&self) -> Operation<()> {
        self.submit(Command::Stop)
    }

    /// Callback form of [`stop`](Self::stop); the callback runs on the
    /// controller task before the next queued operation begins.
    pub fn stop_then<F>(&self, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.dispatch(Command::Stop(Completion::callback(callback)));
    }

    /// Delete local data and release the engine
    pub fn clear(&self) -> Operation<()> {
        self.submit(Command::Clear)
    }

    /// Callback form of [`clear`](Self::clear); the callback runs on the
    /// controller task before the next queued operation begins.
    pub fn clear_then<F>(&self, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.dispatch(Command::Clear(Completion::callback(callback)));
    }

    /// Query raw model payloads, starting the engine first if none exists
    pub fn query_raw(
        &self,
        model_name: &str,
        predicate: Option<QueryPredicate>,
        pagination: Option<Pagination>,
    ) -> Operation<Vec<serde_json::Value>> {
        match self.resolve_query(model_name, predicate, pagination) {
            Ok(request) => self.submit(|completion| Command::Query { request, completion }),
            Err(e) => Operation::ready(Err(e)),
        }
    }

    /// Query typed models
    pub fn query<M: Model>(
        &self,
        predicate: Option<QueryPredicate>,
    ) -> impl Future<Output = Result<Vec<M>>> + Send + 'static {
        self.query_page(predicate, None)
    }

    pub fn query_page<M: Model>(
        &self,
        predicate: Option<QueryPredicate>,
        pagination: Option<Pagination>,
    ) -> impl Future<Output = Result<Vec<M>>> + Send + 'static {
        let operation = self.query_raw(M::model_name(), predicate, pagination);
        async move {
            operation
                .await?
                .into_iter()
                .map(|value| serde_json::from_value(value).map_err(DataStoreError::from))
                .collect()
        }
    }

    /// Callback form of [`query_raw`](Self::query_raw); the callback runs on
    /// the controller task before the next queued operation begins.
    pub fn query_then<F>(&self, model_name: &str, predicate: Option<QueryPredicate>, callback: F)
    where
        F: FnOnce(Result<Vec<serde_json::Value>>) + Send + 'static,
    {
        match self.resolve_query(model_name, predicate, None) {
            Ok(request) => self.dispatch(Command::Query {
                request,
                completion: Completion::callback(callback),
            }),
            Err(e) => callback(Err(e)),
        }
    }

    /// Return to `NotConfigured`.
    ///
    /// The operation in flight finishes; every operation still queued fails
    /// with `NotConfigured`. Then sync is stopped if running and the engine
    /// is released. The publisher is left untouched.
    pub fn reset(&self) -> Operation<()> {
        let (completion, operation) = Operation::channel();
        let rejected = {
            let mut controller = self.lock_controller();
            let Some(handle) = controller.active() else {
                debug!("Reset requested on an unconfigured plugin");
                return Operation::ready(Ok(()));
            };
            let rejected = handle.reset(completion).err();
            controller.configured = false;
            rejected
        };

        match rejected {
            Some(command) => {
                command.reject(DataStoreError::Fatal("lifecycle controller stopped".into()))
            }
            None => info!("DataStore plugin reset"),
        }
        operation
    }

    /// Reset, then finish the publisher
    pub fn shutdown(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let reset = self.reset();
        let publisher = Arc::clone(&self.inner.publisher);
        async move {
            let result = reset.await;
            publisher.finish();
            result
        }
    }

    pub fn state(&self) -> LifecycleState {
        match self.lock_controller().active().map(ControllerHandle::state) {
            // Reconfigured, previous teardown still queued
            Some(LifecycleState::NotConfigured) => LifecycleState::Configured,
            Some(state) => state,
            None => LifecycleState::NotConfigured,
        }
    }

    /// Receiver for lifecycle transitions as the controller applies them;
    /// `None` while not configured
    pub fn watch_state(&self) -> Option<watch::Receiver<LifecycleState>> {
        self.lock_controller().active().map(ControllerHandle::watch)
    }

    pub fn is_configured(&self) -> bool {
        self.lock_controller().configured
    }

    /// Whether a storage engine currently exists
    pub fn has_engine(&self) -> bool {
        self.state().has_engine()
    }

    pub fn publisher(&self) -> &Arc<DataStorePublisher> {
        &self.inner.publisher
    }

    /// Subscribe to every model's mutation events
    pub fn subscribe(&self) -> MutationSubscription {
        self.inner.publisher.subscribe()
    }

    /// Subscribe to one model's mutation events
    pub fn observe(&self, model_name: impl Into<String>) -> MutationSubscription {
        self.inner.publisher.subscribe_to_model(model_name)
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.inner.registry
    }

    // === Private Implementation ===

    fn submit<T, F>(&self, command: F) -> Operation<T>
    where
        F: FnOnce(Completion<T>) -> Command,
    {
        let (completion, operation) = Operation::channel();
        self.dispatch(command(completion));
        operation
    }

    /// Queue a command, or fail it on the caller's thread if it cannot run.
    ///
    /// The rejection happens after the lock is released so a callback may
    /// call back into the plugin.
    fn dispatch(&self, command: Command) {
        let rejected = {
            let controller = self.lock_controller();
            match controller.active() {
                Some(handle) => handle.send(command).err().map(|command| {
                    (command, DataStoreError::Fatal("lifecycle controller stopped".into()))
                }),
                None => Some((command, DataStoreError::NotConfigured)),
            }
        };

        if let Some((command, error)) = rejected {
            debug!(error = %error, "Rejecting DataStore operation");
            command.reject(error);
        }
    }

    fn resolve_query(
        &self,
        model_name: &str,
        predicate: Option<QueryPredicate>,
        pagination: Option<Pagination>,
    ) -> Result<QueryRequest> {
        if !self.is_configured() {
            return Err(DataStoreError::NotConfigured);
        }
        let schema = self
            .inner
            .registry
            .schema(model_name)
            .ok_or_else(|| DataStoreError::UnknownModel(model_name.to_string()))?;
        Ok(QueryRequest {
            schema,
            predicate,
            pagination,
        })
    }

    fn lock_controller(&self) -> MutexGuard<'_, ControllerSlot> {
        self.inner.controller.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
