//! Storage engine boundary
//!
//! The storage engine owns local persistence and the remote sync session. The
//! plugin only drives it through the trait below and builds it through a
//! factory.

mod factory;
mod traits;

pub use factory::{EngineContext, StorageEngineFactory};
pub use traits::{EngineEvent, StorageEngine, SyncOutcome};
