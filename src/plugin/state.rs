//! Plugin lifecycle state

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

use super::subscription::{EngineSubscription, SessionBoundary};
use crate::engine::StorageEngine;

/// Observable lifecycle state of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// `configure` has not been called (or the plugin was reset)
    NotConfigured,
    /// Configured, no storage engine exists
    Configured,
    /// Engine exists and sync was dispatched
    Started,
    /// Engine exists, sync is paused; local queries still work
    Stopped,
}

impl LifecycleState {
    pub fn has_engine(&self) -> bool {
        matches!(self, LifecycleState::Started | LifecycleState::Stopped)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::NotConfigured => "not_configured",
            LifecycleState::Configured => "configured",
            LifecycleState::Started => "started",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// A live storage engine plus its event subscription.
///
/// Dropping the slot aborts the subscription, so the two always go away
/// together.
pub(crate) struct EngineSlot {
    pub(crate) engine: Arc<dyn StorageEngine>,
    /// Distinguishes engines built before and after a `clear`
    pub(crate) generation: u64,
    /// Bumped before every `start_sync`
    pub(crate) session: u64,
    pub(crate) subscription: EngineSubscription,
}

impl EngineSlot {
    /// Open the next sync session on the subscription.
    ///
    /// Returns once every event emitted so far is tagged with the previous
    /// session.
    pub(crate) async fn begin_session(&mut self) {
        self.session += 1;
        let (ack, acked) = oneshot::channel();
        let boundary = SessionBoundary {
            session: self.session,
            ack,
        };
        if self.subscription.boundaries.send(boundary).is_ok() {
            // Dropped ack means the subscription already ended
            let _ = acked.await;
        }
    }
}

impl Drop for EngineSlot {
    fn drop(&mut self) {
        self.subscription.task.abort();
    }
}

/// Controller-side state; an engine exists iff `Started` or `Stopped`
pub(crate) enum PluginState {
    Configured,
    Started(EngineSlot),
    Stopped(EngineSlot),
}

impl PluginState {
    pub(crate) fn lifecycle(&self) -> LifecycleState {
        match self {
            PluginState::Configured => LifecycleState::Configured,
            PluginState::Started(_) => LifecycleState::Started,
            PluginState::Stopped(_) => LifecycleState::Stopped,
        }
    }

    pub(crate) fn engine(&self) -> Option<Arc<dyn StorageEngine>> {
        match self {
            PluginState::Started(slot) | PluginState::Stopped(slot) => Some(Arc::clone(&slot.engine)),
            PluginState::Configured => None,
        }
    }
}
