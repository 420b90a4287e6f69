//! Model schemas and the model registry

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared reference to a registered schema
pub type SchemaRef = Arc<ModelSchema>;

/// Field value kinds understood by the storage engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Int,
    Double,
    Bool,
    Timestamp,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelField {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

/// Schema of a synced model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    /// Model name (e.g., "Post")
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<ModelField>,
    /// Name of the primary key field
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
}

fn default_primary_key() -> String {
    "id".to_string()
}

impl ModelSchema {
    /// Create a schema with only an `id` primary key
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: vec![ModelField {
                name: default_primary_key(),
                field_type: FieldType::String,
                required: true,
            }],
            primary_key: default_primary_key(),
        }
    }

    /// Add a field
    pub fn with_field(mut self, name: impl Into<String>, field_type: FieldType, required: bool) -> Self {
        self.fields.push(ModelField {
            name: name.into(),
            field_type,
            required,
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&ModelField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Read the primary key out of a JSON model payload
    pub fn model_id(&self, model: &serde_json::Value) -> Option<String> {
        match model.get(&self.primary_key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// A model type the plugin can store, query and publish
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize)]
/// struct Post { id: String, title: String }
///
/// impl Model for Post {
///     fn model_name() -> &'static str { "Post" }
///     fn model_id(&self) -> String { self.id.clone() }
/// }
/// ```
pub trait Model: Serialize + DeserializeOwned + Send + 'static {
    /// Name the schema is registered under
    fn model_name() -> &'static str;

    /// Primary key of this instance
    fn model_id(&self) -> String;
}

/// Model-registration metadata handed to the engine factory
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    version: String,
    schemas: BTreeMap<String, SchemaRef>,
}

impl ModelRegistry {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            schemas: BTreeMap::new(),
        }
    }

    /// Register a schema, replacing any schema with the same name
    pub fn register(&mut self, schema: ModelSchema) -> SchemaRef {
        let schema = Arc::new(schema);
        self.schemas.insert(schema.name.clone(), Arc::clone(&schema));
        schema
    }

    pub fn with_schema(mut self, schema: ModelSchema) -> Self {
        self.register(schema);
        self
    }

    /// Registry version; engines use it to detect schema changes
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn schema(&self, name: &str) -> Option<SchemaRef> {
        self.schemas.get(name).cloned()
    }

    pub fn schemas(&self) -> impl Iterator<Item = &SchemaRef> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
