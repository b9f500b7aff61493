//! Configuration loading functionality.
//!
//! This module provides the [`ConfigLoader`] type for loading the engine
//! configuration from YAML files.

use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::models::ExportFormat;

use super::types::{EngineConfig, EngineMetadata, MoneyConfig, ServerConfig};

/// Loads and provides access to engine configuration.
///
/// # Directory Structure
///
/// ```text
/// config/billing/
/// └── engine.yaml   # Engine metadata, timeouts, export and money settings
/// ```
///
/// # Example
///
/// ```no_run
/// use billing_engine::config::ConfigLoader;
///
/// let loader = ConfigLoader::load("./config/billing").unwrap();
/// println!("Loaded {} (source timeout {:?})", loader.engine().name, loader.source_timeout());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    config: EngineConfig,
}

impl ConfigLoader {
    /// Loads configuration from the specified directory.
    ///
    /// # Errors
    ///
    /// - `ConfigNotFound` if `engine.yaml` is missing
    /// - `ConfigParseError` if it is not valid YAML or lacks required fields
    pub fn load<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let engine_path = path.as_ref().join("engine.yaml");
        let config = Self::load_yaml::<EngineConfig>(&engine_path)?;
        Ok(Self { config })
    }

    /// Wraps an already-built configuration.
    pub fn from_config(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Loads and parses a YAML file.
    fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> EngineResult<T> {
        let path_str = path.display().to_string();

        let content = fs::read_to_string(path).map_err(|_| EngineError::ConfigNotFound {
            path: path_str.clone(),
        })?;

        serde_yaml::from_str(&content).map_err(|e| EngineError::ConfigParseError {
            path: path_str,
            message: e.to_string(),
        })
    }

    /// Returns the underlying configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the deployment metadata.
    pub fn engine(&self) -> &EngineMetadata {
        &self.config.engine
    }

    /// Returns the monetary settings.
    pub fn money(&self) -> &MoneyConfig {
        &self.config.money
    }

    /// Returns the HTTP server settings.
    pub fn server(&self) -> &ServerConfig {
        &self.config.server
    }

    /// Timeout applied to each activity source fetch.
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.config.processing.source_timeout_ms)
    }

    /// Timeout applied to each export sink write.
    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.config.export.sink_timeout_ms)
    }

    /// Configured source consumption order.
    pub fn source_order(&self) -> &[String] {
        &self.config.processing.source_order
    }

    /// Format used when an export request does not name one.
    pub fn default_export_format(&self) -> ExportFormat {
        self.config.export.default_format
    }

    /// Prefix of generated export file names.
    pub fn export_file_prefix(&self) -> &str {
        &self.config.export.file_prefix
    }

    /// Directory the file sink writes into.
    pub fn export_output_dir(&self) -> &str {
        &self.config.export.output_dir
    }
}
