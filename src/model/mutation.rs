//! Mutation events

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::schema::{Model, SchemaRef};
use crate::error::{DataStoreError, Result};

/// Kind of change applied to a model instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationType {
    Create,
    Update,
    Delete,
}

impl fmt::Display for MutationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationType::Create => "create",
            MutationType::Update => "update",
            MutationType::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One create/update/delete applied to a locally tracked model.
///
/// Fields are private so an event cannot change after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    id: Uuid,
    model_id: String,
    model_schema: SchemaRef,
    mutation_type: MutationType,
    model: serde_json::Value,
    created_at: u64,
}

impl MutationEvent {
    /// Build an event from a raw model payload
    pub fn new(
        model_id: impl Into<String>,
        model_schema: SchemaRef,
        mutation_type: MutationType,
        model: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_id: model_id.into(),
            model_schema,
            mutation_type,
            model,
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }

    /// Build an event from a typed model
    pub fn from_model<M: Model>(
        model: &M,
        model_schema: SchemaRef,
        mutation_type: MutationType,
    ) -> Result<Self> {
        if model_schema.name != M::model_name() {
            return Err(DataStoreError::Configuration(format!(
                "schema {} does not describe model {}",
                model_schema.name,
                M::model_name()
            )));
        }
        let payload = serde_json::to_value(model)?;
        Ok(Self::new(model.model_id(), model_schema, mutation_type, payload))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn model_schema(&self) -> &SchemaRef {
        &self.model_schema
    }

    pub fn model_name(&self) -> &str {
        &self.model_schema.name
    }

    pub fn mutation_type(&self) -> MutationType {
        self.mutation_type
    }

    pub fn model(&self) -> &serde_json::Value {
        &self.model
    }

    /// Milliseconds since epoch when the event was built
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Decode the payload into a typed model
    pub fn decode<M: Model>(&self) -> Result<M> {
        if self.model_name() != M::model_name() {
            return Err(DataStoreError::Serialization(format!(
                "event carries {} but {} was requested",
                self.model_name(),
                M::model_name()
            )));
        }
        Ok(serde_json::from_value(self.model.clone())?)
    }
}
