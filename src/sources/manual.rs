//! Operator-entered activity.

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::Activity;

use super::{ActivitySource, SourceError};

/// An activity source holding entries typed in by operators, such as
/// one-off fees or damage charges.
#[derive(Debug)]
pub struct ManualActivitySource {
    name: String,
    entries: RwLock<Vec<Activity>>,
}

impl ManualActivitySource {
    /// Creates an empty source with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Records an entry. An entry with the same `source_id` replaces the old one.
    pub async fn record(&self, activity: Activity) {
        let mut entries = self.entries.write().await;
        entries.retain(|existing| existing.source_id != activity.source_id);
        debug!(
            source = %self.name,
            source_id = %activity.source_id,
            staff_id = %activity.staff_id,
            "Recorded manual activity"
        );
        entries.push(activity);
    }
}

#[async_trait]
impl ActivitySource for ManualActivitySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_activity(
        &self,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<Vec<Activity>, SourceError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|a| a.activity_end > period_start && a.activity_start <= period_end)
            .cloned()
            .collect())
    }
}
