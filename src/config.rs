//! Plugin configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{DataStoreError, Result};

/// DataStore configuration handed to the storage engine factory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStoreConfig {
    /// How often a full sync is requested, in seconds
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Maximum records pulled per model in one sync session
    #[serde(default = "default_sync_max_records")]
    pub sync_max_records: u32,

    /// Records per page when pulling from the remote
    #[serde(default = "default_sync_page_size")]
    pub sync_page_size: u32,

    /// Local database location (engine default when unset)
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn default_sync_interval() -> u64 { 86_400 }
fn default_sync_max_records() -> u32 { 10_000 }
fn default_sync_page_size() -> u32 { 1_000 }

impl Default for DataStoreConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval(),
            sync_max_records: default_sync_max_records(),
            sync_page_size: default_sync_page_size(),
            database_path: None,
        }
    }
}

impl DataStoreConfig {
    /// Build from a plugin configuration object.
    ///
    /// A missing configuration is valid and yields the defaults.
    pub fn from_json(value: Option<&serde_json::Value>) -> Result<Self> {
        let config = match value {
            None | Some(serde_json::Value::Null) => Self::default(),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| DataStoreError::Configuration(e.to_string()))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync_page_size == 0 {
            return Err(DataStoreError::Configuration(
                "sync_page_size must be greater than zero".into(),
            ));
        }
        if self.sync_max_records == 0 {
            return Err(DataStoreError::Configuration(
                "sync_max_records must be greater than zero".into(),
            ));
        }
        if self.sync_page_size > self.sync_max_records {
            return Err(DataStoreError::Configuration(format!(
                "sync_page_size ({}) exceeds sync_max_records ({})",
                self.sync_page_size, self.sync_max_records
            )));
        }
        Ok(())
    }
}

/// Keys of the API and auth plugins the storage engine talks through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginCollaborators {
    pub api_plugin_key: String,
    pub auth_plugin_key: String,
}

impl Default for PluginCollaborators {
    fn default() -> Self {
        Self {
            api_plugin_key: "awsAPIPlugin".to_string(),
            auth_plugin_key: "awsCognitoAuthPlugin".to_string(),
        }
    }
}
