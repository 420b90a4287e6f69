//! Shared fixtures for the plugin integration tests

#![allow(dead_code)]

use datastore_plugin::model::FieldType;
use datastore_plugin::testing::{MockStorageEngine, MockStorageEngineFactory};
use datastore_plugin::{
    DataStoreConfig, DataStorePlugin, DataStorePublisher, Model, ModelRegistry, ModelSchema,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on any single await in these tests
pub const WAIT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "datastore_plugin=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub status: String,
}

impl Post {
    pub fn new(id: &str, title: &str, status: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            status: status.to_string(),
        }
    }
}

impl Model for Post {
    fn model_name() -> &'static str {
        "Post"
    }

    fn model_id(&self) -> String {
        self.id.clone()
    }
}

pub fn post_schema() -> ModelSchema {
    ModelSchema::new("Post")
        .with_field("title", FieldType::String, true)
        .with_field("status", FieldType::String, true)
}

pub fn registry() -> ModelRegistry {
    ModelRegistry::new("2024-01-01").with_schema(post_schema())
}

pub struct Harness {
    pub plugin: DataStorePlugin,
    pub engine: Arc<MockStorageEngine>,
    pub factory: Arc<MockStorageEngineFactory>,
    pub publisher: Arc<DataStorePublisher>,
}

/// Unconfigured plugin wired to a mock engine
pub fn harness() -> Harness {
    init_tracing();
    let engine = Arc::new(MockStorageEngine::new());
    let factory = Arc::new(MockStorageEngineFactory::new(Arc::clone(&engine)));
    let publisher = Arc::new(DataStorePublisher::new());
    let plugin = DataStorePlugin::new(registry(), factory.clone(), Arc::clone(&publisher));
    Harness {
        plugin,
        engine,
        factory,
        publisher,
    }
}

/// Plugin already in `Configured`
pub fn configured() -> Harness {
    let harness = harness();
    harness
        .plugin
        .configure(DataStoreConfig::default())
        .expect("configure should succeed");
    harness
}

/// Await with the shared timeout, panicking if it elapses
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("operation timed out")
}
