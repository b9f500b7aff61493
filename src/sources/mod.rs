//! External collaborators the engine consumes.
//!
//! Activity sources report billable activity (housing occupancy, trips,
//! manual entries); export sinks persist serialized payroll exports. Both are
//! traits so the service can plug in whatever systems hold that data.

mod manual;
mod sink;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::models::Activity;

pub use manual::ManualActivitySource;
pub use sink::{FileExportSink, MemoryExportSink};

/// Failure reported by an activity source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// The source could not be reached.
    #[error("source unavailable: {0}")]
    Unavailable(String),
    /// The source answered with data the engine cannot use.
    #[error("malformed activity: {0}")]
    Malformed(String),
}

/// Failure reported by an export sink.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("export sink write failed: {message}")]
pub struct SinkError {
    /// What went wrong.
    pub message: String,
}

/// A system that knows which staff activity happened during a period.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Name used in progress reports and failures (e.g. "housing").
    fn name(&self) -> &str;

    /// Returns every activity overlapping `[period_start, period_end]`,
    /// both days inclusive.
    async fn fetch_activity(
        &self,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<Vec<Activity>, SourceError>;
}

/// Destination for serialized payroll exports.
#[async_trait]
pub trait ExportSink: Send + Sync {
    /// Persists an artifact under `file_name`.
    async fn write(&self, file_name: &str, bytes: &[u8]) -> Result<(), SinkError>;
}
