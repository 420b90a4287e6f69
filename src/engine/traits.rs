//! Storage engine contract

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{EngineError, EngineResult};
use crate::model::{MutationEvent, QueryRequest};

/// How a remote sync session ended
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed,
    Failed(EngineError),
}

/// Events a storage engine reports to its owner
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A model was created, updated or deleted locally
    Mutation(MutationEvent),
    /// The sync session ended. Emitted once per session; a new session
    /// only begins with the next `start_sync`.
    SyncTerminated(SyncOutcome),
}

/// Local persistence paired with a remote synchronization session.
///
/// Each async method completes exactly once. Implementations are owned by the
/// plugin's lifecycle controller, which never calls two of them concurrently.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Begin (or resume) the remote sync session.
    ///
    /// Returns once the session is dispatched, not once it has converged.
    async fn start_sync(&self) -> EngineResult<()>;

    /// Pause the remote sync session; local data stays queryable
    async fn stop_sync(&self) -> EngineResult<()>;

    /// Delete all local data
    async fn clear(&self) -> EngineResult<()>;

    /// Run a query against local state
    async fn query(&self, request: &QueryRequest) -> EngineResult<Vec<serde_json::Value>>;

    /// Subscribe to mutation and sync-termination events
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
