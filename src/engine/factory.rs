//! Storage engine construction

use std::sync::Arc;

use super::traits::StorageEngine;
use crate::config::{DataStoreConfig, PluginCollaborators};
use crate::error::EngineResult;
use crate::model::ModelRegistry;

/// Everything a factory needs to build an engine
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub registry: Arc<ModelRegistry>,
    pub config: DataStoreConfig,
    pub collaborators: PluginCollaborators,
}

/// Builds storage engines on demand.
///
/// Called lazily by the plugin on first `start`/`query`, again after every
/// `clear`, and for the transient engine used by `clear` when none exists.
pub trait StorageEngineFactory: Send + Sync {
    fn create(&self, context: &EngineContext) -> EngineResult<Arc<dyn StorageEngine>>;
}

impl<F> StorageEngineFactory for F
where
    F: Fn(&EngineContext) -> EngineResult<Arc<dyn StorageEngine>> + Send + Sync,
{
    fn create(&self, context: &EngineContext) -> EngineResult<Arc<dyn StorageEngine>> {
        self(context)
    }
}
