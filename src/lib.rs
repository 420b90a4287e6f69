//! DataStore Plugin - Offline-First Model Sync
//!
//! Controls the lifecycle of a local storage engine that persists models and
//! syncs them with a remote API, and republishes the engine's mutation events
//! to any number of subscribers.
//!
//! - Lazy engine construction on first `start` or `query`
//! - A FIFO operation gate so lifecycle calls never overlap
//! - Automatic stop when a sync session ends on its own
//! - A multicast publisher that outlives engine restarts and `clear`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            DataStorePlugin              │
//! │   (configure / start / stop / clear /   │
//! │    query, queued in call order)         │
//! └────────────────┬────────────────────────┘
//!                  │ commands
//!                  ▼
//! ┌─────────────────────────────────────────┐
//! │          Lifecycle controller           │
//! │  Configured → Started ⇄ Stopped         │
//! └───────┬─────────────────────────┬───────┘
//!         │                         │
//!         ▼                         ▼
//! ┌───────────────┐  mutations  ┌─────────────────────┐
//! │ StorageEngine │────────────▶│ DataStorePublisher  │
//! │ (via factory) │             │ (multicast, no      │
//! └───────────────┘             │  replay)            │
//!                               └─────────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod plugin;
pub mod publisher;
pub mod testing;

// Re-export main types for convenience
pub use config::{DataStoreConfig, PluginCollaborators};
pub use engine::{EngineContext, EngineEvent, StorageEngine, StorageEngineFactory, SyncOutcome};
pub use error::{DataStoreError, EngineError, EngineOperation, EngineResult, Result};
pub use model::{
    Model, ModelRegistry, ModelSchema, MutationEvent, MutationType, Pagination, QueryPredicate,
    QueryRequest,
};
pub use plugin::{DataStorePlugin, LifecycleState, Operation};
pub use publisher::{DataStorePublisher, MutationSubscription, PublisherCompletion};
