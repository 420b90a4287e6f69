//! Lifecycle controller and operation gate
//!
//! One task owns the storage engine and drains a FIFO command queue. Each
//! command runs to completion, including its completion callback, before the
//! next one is taken, so:
//! - at most one lifecycle transition is in flight
//! - completions fire in the order operations were accepted
//! - an operation requested from inside a completion callback is queued
//!   behind it instead of re-entering the gate
//!
//! The task lives from the first `configure` until every plugin handle is
//! dropped. `reset` and any later `configure` go through the same queue, so a
//! reconfigured plugin never races the teardown of its previous
//! configuration. Client commands carry the epoch they were accepted in;
//! `reset` moves the epoch forward and every command still queued from the
//! old epoch fails with `NotConfigured`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::operation::Completion;
use super::state::{EngineSlot, LifecycleState, PluginState};
use super::subscription::EngineSubscription;
use crate::config::DataStoreConfig;
use crate::engine::{EngineContext, StorageEngineFactory, SyncOutcome};
use crate::error::{DataStoreError, EngineOperation, Result};
use crate::model::QueryRequest;
use crate::publisher::DataStorePublisher;

/// Requests processed by the controller task
pub(crate) enum Command {
    Start(Completion<()>),
    Stop(Completion<()>),
    Clear(Completion<()>),
    Query {
        request: QueryRequest,
        completion: Completion<Vec<serde_json::Value>>,
    },
    /// Raised by the engine subscription, never by clients
    SyncTerminated {
        generation: u64,
        session: u64,
        outcome: SyncOutcome,
    },
    /// Reconfigure after a reset
    Configure(DataStoreConfig),
    Reset(Completion<()>),
}

impl Command {
    /// Fail a command that will never run
    pub(crate) fn reject(self, error: DataStoreError) {
        match self {
            Command::Start(completion)
            | Command::Stop(completion)
            | Command::Clear(completion)
            | Command::Reset(completion) => completion.complete(Err(error)),
            Command::Query { completion, .. } => completion.complete(Err(error)),
            Command::SyncTerminated { .. } | Command::Configure(_) => {}
        }
    }
}

/// A command plus the configuration epoch it was accepted in.
///
/// Internal commands carry no epoch and are never rejected as stale.
pub(crate) struct Queued {
    epoch: Option<u64>,
    command: Command,
}

impl Queued {
    pub(crate) fn internal(command: Command) -> Self {
        Self {
            epoch: None,
            command,
        }
    }
}

/// Client-side handle to the controller task
pub(crate) struct ControllerHandle {
    commands: mpsc::UnboundedSender<Queued>,
    state: watch::Receiver<LifecycleState>,
    epoch: Arc<AtomicU64>,
}

impl ControllerHandle {
    pub(crate) fn spawn(
        context: EngineContext,
        factory: Arc<dyn StorageEngineFactory>,
        publisher: Arc<DataStorePublisher>,
        runtime: &Handle,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LifecycleState::Configured);
        let epoch = Arc::new(AtomicU64::new(0));

        let controller = LifecycleController {
            context,
            factory,
            publisher,
            state: PluginState::Configured,
            generation: 0,
            epoch: Arc::clone(&epoch),
            // Weak, so dropping every plugin handle ends the task
            commands: commands_tx.downgrade(),
            state_tx,
        };
        runtime.spawn(controller.run(commands_rx));

        Self {
            commands: commands_tx,
            state: state_rx,
            epoch,
        }
    }

    /// Queue a client command in the current epoch
    pub(crate) fn send(&self, command: Command) -> std::result::Result<(), Command> {
        let queued = Queued {
            epoch: Some(self.epoch.load(Ordering::SeqCst)),
            command,
        };
        self.commands.send(queued).map_err(|e| e.0.command)
    }

    pub(crate) fn configure(&self, config: DataStoreConfig) -> std::result::Result<(), Command> {
        self.send_internal(Command::Configure(config))
    }

    /// Invalidate every queued client command, then queue the teardown
    pub(crate) fn reset(&self, completion: Completion<()>) -> std::result::Result<(), Command> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.send_internal(Command::Reset(completion))
    }

    pub(crate) fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<LifecycleState> {
        self.state.clone()
    }

    fn send_internal(&self, command: Command) -> std::result::Result<(), Command> {
        self.commands
            .send(Queued::internal(command))
            .map_err(|e| e.0.command)
    }
}

struct LifecycleController {
    context: EngineContext,
    factory: Arc<dyn StorageEngineFactory>,
    publisher: Arc<DataStorePublisher>,
    state: PluginState,
    generation: u64,
    epoch: Arc<AtomicU64>,
    commands: mpsc::WeakUnboundedSender<Queued>,
    state_tx: watch::Sender<LifecycleState>,
}

impl LifecycleController {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Queued>) {
        info!("DataStore lifecycle controller running");

        while let Some(Queued { epoch, command }) = commands.recv().await {
            if let Some(epoch) = epoch {
                let current = self.epoch.load(Ordering::SeqCst);
                if epoch != current {
                    debug!(epoch, current, "Rejecting operation queued before reset");
                    command.reject(DataStoreError::NotConfigured);
                    continue;
                }
            }

            match command {
                Command::Start(completion) => {
                    let result = self.start().await;
                    completion.complete(result);
                }
                Command::Stop(completion) => {
                    let result = self.stop().await;
                    completion.complete(result);
                }
                Command::Clear(completion) => {
                    let result = self.clear().await;
                    completion.complete(result);
                }
                Command::Query { request, completion } => {
                    let result = self.query(request).await;
                    completion.complete(result);
                }
                Command::SyncTerminated {
                    generation,
                    session,
                    outcome,
                } => {
                    self.on_sync_terminated(generation, session, outcome).await;
                }
                Command::Configure(config) => {
                    self.context.config = config;
                    self.transition(PluginState::Configured);
                    info!("DataStore lifecycle controller reconfigured");
                }
                Command::Reset(completion) => {
                    self.teardown().await;
                    completion.complete(Ok(()));
                    info!("DataStore lifecycle controller reset");
                }
            }
        }

        // Every plugin handle was dropped
        self.teardown().await;
        debug!("DataStore lifecycle controller exiting, no handles left");
    }

    async fn start(&mut self) -> Result<()> {
        let mut slot = match std::mem::replace(&mut self.state, PluginState::Configured) {
            PluginState::Started(slot) => {
                debug!(generation = slot.generation, "Sync already started, nothing to dispatch");
                self.state = PluginState::Started(slot);
                return Ok(());
            }
            PluginState::Stopped(slot) => slot,
            PluginState::Configured => self.build_slot()?,
        };

        slot.begin_session().await;
        match slot.engine.start_sync().await {
            Ok(()) => {
                info!(
                    generation = slot.generation,
                    session = slot.session,
                    "Storage engine sync started"
                );
                self.transition(PluginState::Started(slot));
                Ok(())
            }
            Err(e) => {
                warn!(generation = slot.generation, error = %e, "Storage engine failed to start sync");
                self.transition(PluginState::Stopped(slot));
                Err(DataStoreError::engine(EngineOperation::StartSync, e))
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, PluginState::Configured) {
            PluginState::Configured => {
                debug!("Stop requested without a storage engine, nothing to do");
                Ok(())
            }
            PluginState::Stopped(slot) => {
                debug!(generation = slot.generation, "Sync already stopped");
                self.state = PluginState::Stopped(slot);
                Ok(())
            }
            PluginState::Started(slot) => match slot.engine.stop_sync().await {
                Ok(()) => {
                    info!(generation = slot.generation, "Storage engine sync stopped");
                    self.transition(PluginState::Stopped(slot));
                    Ok(())
                }
                Err(e) => {
                    warn!(generation = slot.generation, error = %e, "Storage engine failed to stop sync");
                    self.state = PluginState::Started(slot);
                    Err(DataStoreError::engine(EngineOperation::StopSync, e))
                }
            },
        }
    }

    async fn clear(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, PluginState::Configured) {
            PluginState::Configured => {
                let engine = self
                    .factory
                    .create(&self.context)
                    .map_err(DataStoreError::EngineConstruction)?;
                debug!("Clearing local store through a transient storage engine");
                let result = engine.clear().await;
                drop(engine);
                self.transition(PluginState::Configured);
                result.map_err(|e| {
                    warn!(error = %e, "Transient storage engine failed to clear");
                    DataStoreError::engine(EngineOperation::Clear, e)
                })
            }
            PluginState::Started(slot) | PluginState::Stopped(slot) => {
                let generation = slot.generation;
                let result = slot.engine.clear().await;
                // Releases the engine and aborts its subscription
                drop(slot);
                self.transition(PluginState::Configured);
                match result {
                    Ok(()) => {
                        info!(generation, "Storage engine cleared and released");
                        Ok(())
                    }
                    Err(e) => {
                        warn!(generation, error = %e, "Storage engine failed to clear, engine released");
                        Err(DataStoreError::engine(EngineOperation::Clear, e))
                    }
                }
            }
        }
    }

    async fn query(&mut self, request: QueryRequest) -> Result<Vec<serde_json::Value>> {
        let engine = match self.state.engine() {
            Some(engine) => engine,
            None => {
                debug!(model = %request.schema.name, "Query without a storage engine, starting it first");
                self.start().await?;
                self.state.engine().ok_or_else(|| {
                    DataStoreError::Fatal("storage engine missing after start".into())
                })?
            }
        };

        engine
            .query(&request)
            .await
            .map_err(|e| DataStoreError::engine(EngineOperation::Query, e))
    }

    /// The sync session ended on its own; settle the engine as if stopped
    async fn on_sync_terminated(&mut self, generation: u64, session: u64, outcome: SyncOutcome) {
        let slot = match std::mem::replace(&mut self.state, PluginState::Configured) {
            PluginState::Started(slot) if slot.generation == generation && slot.session == session => slot,
            other => {
                debug!(generation, session, "Ignoring terminal sync event for a session that is not running");
                self.state = other;
                return;
            }
        };

        match &outcome {
            SyncOutcome::Completed => info!(generation, session, "Sync session completed, stopping sync"),
            SyncOutcome::Failed(e) => warn!(generation, session, error = %e, "Sync session failed, stopping sync"),
        }

        if let Err(e) = slot.engine.stop_sync().await {
            warn!(generation, error = %e, "Failed to stop sync after terminal event");
        }
        // The session is over either way
        self.transition(PluginState::Stopped(slot));
    }

    async fn teardown(&mut self) {
        if let PluginState::Started(slot) = &self.state {
            if let Err(e) = slot.engine.stop_sync().await {
                warn!(generation = slot.generation, error = %e, "Failed to stop sync during teardown");
            }
        }
        self.state = PluginState::Configured;
        self.state_tx.send_replace(LifecycleState::NotConfigured);
    }

    fn build_slot(&mut self) -> Result<EngineSlot> {
        let engine = self
            .factory
            .create(&self.context)
            .map_err(|e| {
                warn!(error = %e, "Storage engine factory failed");
                DataStoreError::EngineConstruction(e)
            })?;

        self.generation += 1;
        let generation = self.generation;
        let subscription = EngineSubscription::spawn(
            engine.subscribe(),
            generation,
            self.commands.clone(),
            Arc::clone(&self.publisher),
        );
        info!(
            generation,
            models = self.context.registry.len(),
            "Storage engine constructed"
        );

        Ok(EngineSlot {
            engine,
            generation,
            session: 0,
            subscription,
        })
    }

    fn transition(&mut self, next: PluginState) {
        let lifecycle = next.lifecycle();
        self.state = next;
        self.state_tx.send_replace(lifecycle);
    }
}
