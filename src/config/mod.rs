//! Configuration loading and management for the Billing Engine.
//!
//! This module loads the engine configuration from a YAML file: source
//! timeouts and order, export defaults, monetary rounding, and the HTTP bind
//! address.
//!
//! # Example
//!
//! ```no_run
//! use billing_engine::config::ConfigLoader;
//!
//! let config = ConfigLoader::load("./config/billing").unwrap();
//! println!("Loaded engine: {}", config.engine().name);
//! ```

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::{
    EngineConfig, EngineMetadata, ExportConfig, MoneyConfig, ProcessingConfig, ServerConfig,
};
