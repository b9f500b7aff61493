//! HTTP API module for the Billing Engine.
//!
//! This module exposes billing period administration, charge generation,
//! charge review and payroll export as REST endpoints.

mod handlers;
mod request;
mod response;
mod state;

pub use handlers::create_router;
pub use request::{CreatePeriodRequest, ExportRequest, ReschedulePeriodRequest};
pub use response::{ApiError, ApiErrorResponse, ProgressResponse};
pub use state::AppState;
