//! Engine event subscription
//!
//! One task per engine. Mutation events go straight to the publisher;
//! terminal sync events go back to the controller queue tagged with the
//! engine generation and the sync session they ended.
//!
//! Before every `start_sync` the controller opens a new session through a
//! [`SessionBoundary`]. The task drains whatever the engine already emitted,
//! tagging it with the old session, and only then acknowledges. A terminal
//! event from a session the client already restarted is therefore always
//! recognizable as stale.

use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::controller::{Command, Queued};
use crate::engine::EngineEvent;
use crate::publisher::DataStorePublisher;

/// Request to start tagging terminal events with `session`
pub(crate) struct SessionBoundary {
    pub(crate) session: u64,
    pub(crate) ack: oneshot::Sender<()>,
}

pub(crate) struct EngineSubscription {
    pub(crate) task: JoinHandle<()>,
    pub(crate) boundaries: mpsc::UnboundedSender<SessionBoundary>,
}

impl EngineSubscription {
    pub(crate) fn spawn(
        events: broadcast::Receiver<EngineEvent>,
        generation: u64,
        commands: mpsc::WeakUnboundedSender<Queued>,
        publisher: Arc<DataStorePublisher>,
    ) -> Self {
        let (boundaries_tx, boundaries_rx) = mpsc::unbounded_channel();
        let forwarder = Forwarder {
            generation,
            session: 0,
            commands,
            publisher,
        };
        Self {
            task: tokio::spawn(forwarder.run(events, boundaries_rx)),
            boundaries: boundaries_tx,
        }
    }
}

enum Next {
    Event(Result<EngineEvent, RecvError>),
    Boundary(Option<SessionBoundary>),
}

struct Forwarder {
    generation: u64,
    session: u64,
    commands: mpsc::WeakUnboundedSender<Queued>,
    publisher: Arc<DataStorePublisher>,
}

impl Forwarder {
    async fn run(
        mut self,
        mut events: broadcast::Receiver<EngineEvent>,
        mut boundaries: mpsc::UnboundedReceiver<SessionBoundary>,
    ) {
        loop {
            let next = tokio::select! {
                event = events.recv() => Next::Event(event),
                boundary = boundaries.recv() => Next::Boundary(boundary),
            };

            match next {
                Next::Event(Ok(event)) => {
                    if !self.forward(event) {
                        break;
                    }
                }
                Next::Event(Err(RecvError::Lagged(skipped))) => {
                    warn!(generation = self.generation, skipped, "Engine event subscription lagged, skipped events");
                }
                Next::Event(Err(RecvError::Closed)) => {
                    debug!(generation = self.generation, "Engine event stream closed");
                    break;
                }
                Next::Boundary(Some(boundary)) => {
                    if !self.drain(&mut events) {
                        break;
                    }
                    self.session = boundary.session;
                    let _ = boundary.ack.send(());
                }
                // Engine slot released
                Next::Boundary(None) => break,
            }
        }
    }

    /// Forward everything already emitted under the current session
    fn drain(&self, events: &mut broadcast::Receiver<EngineEvent>) -> bool {
        loop {
            match events.try_recv() {
                Ok(event) => {
                    if !self.forward(event) {
                        return false;
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(generation = self.generation, skipped, "Engine event subscription lagged, skipped events");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return true,
            }
        }
    }

    /// Returns `false` once the controller is gone
    fn forward(&self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::Mutation(event) => {
                if let Err(e) = self.publisher.send(event) {
                    debug!(generation = self.generation, error = %e, "Dropping mutation event");
                }
                true
            }
            EngineEvent::SyncTerminated(outcome) => {
                let Some(commands) = self.commands.upgrade() else {
                    return false;
                };
                commands
                    .send(Queued::internal(Command::SyncTerminated {
                        generation: self.generation,
                        session: self.session,
                        outcome,
                    }))
                    .is_ok()
            }
        }
    }
}
