//! Application state for the Billing Engine API.
//!
//! This module defines the shared application state that is available
//! to all request handlers.

use std::sync::Arc;

use crate::engine::BillingEngine;
use crate::sources::ManualActivitySource;

/// Shared application state.
///
/// Holds the engine and the manual activity source that
/// `POST /manual-activity` records into. The same source must be registered
/// with the engine for recorded activity to be charged.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<BillingEngine>,
    manual: Arc<ManualActivitySource>,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(engine: BillingEngine, manual: Arc<ManualActivitySource>) -> Self {
        Self {
            engine: Arc::new(engine),
            manual,
        }
    }

    /// Returns the engine.
    pub fn engine(&self) -> &BillingEngine {
        &self.engine
    }

    /// Returns the manual activity source.
    pub fn manual(&self) -> &ManualActivitySource {
        &self.manual
    }
}
