//! Configuration types for the billing engine.
//!
//! This module contains the strongly-typed configuration structures that
//! are deserialized from `engine.yaml`. Every section except `engine` has
//! defaults, so a minimal file only names the engine.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::calculation::{DEFAULT_CURRENCY_DECIMALS, TOTAL_TOLERANCE};
use crate::models::ExportFormat;

/// Metadata about the deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineMetadata {
    /// Human-readable name of the deployment.
    pub name: String,
    /// Version of the configuration.
    pub version: String,
}

/// Charge generation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    /// Timeout for one activity source fetch, in milliseconds.
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
    /// Order in which named sources are consumed. Sources not listed run
    /// after the listed ones, in registration order.
    #[serde(default)]
    pub source_order: Vec<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            source_timeout_ms: default_source_timeout_ms(),
            source_order: Vec::new(),
        }
    }
}

fn default_source_timeout_ms() -> u64 {
    10_000
}

/// Payroll export settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Timeout for one sink write, in milliseconds.
    #[serde(default = "default_sink_timeout_ms")]
    pub sink_timeout_ms: u64,
    /// Format used when a request does not name one.
    #[serde(default)]
    pub default_format: ExportFormat,
    /// Prefix of generated file names.
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// Directory the file sink writes into.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            sink_timeout_ms: default_sink_timeout_ms(),
            default_format: ExportFormat::default(),
            file_prefix: default_file_prefix(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_sink_timeout_ms() -> u64 {
    30_000
}

fn default_file_prefix() -> String {
    "payroll".to_string()
}

fn default_output_dir() -> String {
    "./exports".to_string()
}

/// Monetary settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MoneyConfig {
    /// Decimal places charge amounts are rounded to.
    #[serde(default = "default_currency_decimals")]
    pub currency_decimals: u32,
    /// Allowed gap between a total and its components.
    #[serde(default = "default_total_tolerance")]
    pub total_tolerance: Decimal,
}

impl Default for MoneyConfig {
    fn default() -> Self {
        Self {
            currency_decimals: default_currency_decimals(),
            total_tolerance: default_total_tolerance(),
        }
    }
}

fn default_currency_decimals() -> u32 {
    DEFAULT_CURRENCY_DECIMALS
}

fn default_total_tolerance() -> Decimal {
    TOTAL_TOLERANCE
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Returns `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

/// The complete engine configuration loaded from `engine.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Deployment metadata.
    pub engine: EngineMetadata,
    /// Charge generation settings.
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Payroll export settings.
    #[serde(default)]
    pub export: ExportConfig,
    /// Monetary settings.
    #[serde(default)]
    pub money: MoneyConfig,
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: EngineMetadata {
                name: "billing-engine".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            processing: ProcessingConfig::default(),
            export: ExportConfig::default(),
            money: MoneyConfig::default(),
            server: ServerConfig::default(),
        }
    }
}
