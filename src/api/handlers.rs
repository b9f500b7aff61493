//! HTTP request handlers for the Billing Engine API.
//!
//! This module contains the handler functions for all API endpoints.

use std::time::Instant;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::calculation::effective_base_rate;
use crate::error::{EngineError, EngineResult};
use crate::models::{Activity, ChargeFilter, ChargePatch};

use super::request::{CreatePeriodRequest, ExportRequest, ReschedulePeriodRequest};
use super::response::{ApiError, ApiErrorResponse, ProgressResponse};
use super::state::AppState;

/// Creates the API router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/periods",
            post(create_period_handler).get(list_periods_handler),
        )
        .route("/periods/:id", get(get_period_handler))
        .route("/periods/:id/dates", patch(reschedule_period_handler))
        .route("/periods/:id/process", post(process_handler))
        .route("/periods/:id/progress", get(progress_handler))
        .route("/periods/:id/export", post(export_handler))
        .route("/periods/:id/exports", get(list_exports_handler))
        .route("/periods/:id/cancel", post(cancel_handler))
        .route("/periods/:id/reactivate", post(reactivate_handler))
        .route("/periods/:id/charges", get(list_charges_handler))
        .route("/periods/:id/totals", get(totals_handler))
        .route("/charges/:id", patch(amend_charge_handler))
        .route("/manual-activity", post(manual_activity_handler))
        .with_state(state)
}

fn respond<T: Serialize>(status: StatusCode, body: T) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        Json(body),
    )
        .into_response()
}

/// Turns an engine result into a response, logging failures.
fn finish<T: Serialize>(
    correlation_id: Uuid,
    operation: &'static str,
    status: StatusCode,
    result: EngineResult<T>,
) -> Response {
    match result {
        Ok(body) => respond(status, body),
        Err(err) => {
            warn!(
                correlation_id = %correlation_id,
                operation = operation,
                code = err.code(),
                error = %err,
                "Request failed"
            );
            ApiErrorResponse::from(err).into_response()
        }
    }
}

fn json_rejection(correlation_id: Uuid, rejection: JsonRejection) -> Response {
    let error = match rejection {
        JsonRejection::JsonDataError(err) => {
            let body_text = err.body_text();
            warn!(
                correlation_id = %correlation_id,
                error = %body_text,
                "JSON data error"
            );
            if body_text.contains("missing field") {
                ApiError::new("VALIDATION_ERROR", body_text)
            } else {
                ApiError::malformed_json(body_text)
            }
        }
        JsonRejection::JsonSyntaxError(err) => {
            warn!(
                correlation_id = %correlation_id,
                error = %err,
                "JSON syntax error"
            );
            ApiError::malformed_json(format!("Invalid JSON syntax: {}", err))
        }
        JsonRejection::MissingJsonContentType(_) => {
            ApiError::new("MISSING_CONTENT_TYPE", "Content-Type must be application/json")
        }
        _ => ApiError::malformed_json("Failed to parse request body"),
    };
    ApiErrorResponse::bad_request(error).into_response()
}

/// Handler for `POST /periods`.
async fn create_period_handler(
    State(state): State<AppState>,
    payload: Result<Json<CreatePeriodRequest>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(correlation_id = %correlation_id, "Creating billing period");

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return json_rejection(correlation_id, rejection),
    };

    let result = state
        .engine()
        .create_period(&request.name, request.start_date, request.end_date)
        .await;
    finish(correlation_id, "create_period", StatusCode::CREATED, result)
}

/// Handler for `GET /periods`.
async fn list_periods_handler(State(state): State<AppState>) -> Response {
    let correlation_id = Uuid::new_v4();
    let result = state.engine().list_periods().await;
    finish(correlation_id, "list_periods", StatusCode::OK, result)
}

/// Handler for `GET /periods/:id`.
async fn get_period_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let correlation_id = Uuid::new_v4();
    let result = state.engine().get_period(id).await;
    finish(correlation_id, "get_period", StatusCode::OK, result)
}

/// Handler for `PATCH /periods/:id/dates`.
async fn reschedule_period_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<ReschedulePeriodRequest>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(correlation_id = %correlation_id, period_id = %id, "Rescheduling billing period");

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return json_rejection(correlation_id, rejection),
    };

    let result = state
        .engine()
        .reschedule_period(id, request.start_date, request.end_date)
        .await;
    finish(correlation_id, "reschedule_period", StatusCode::OK, result)
}

/// Handler for `POST /periods/:id/process`.
///
/// Accepts the run and returns immediately with 202; poll
/// `GET /periods/:id/progress` for the outcome.
async fn process_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(correlation_id = %correlation_id, period_id = %id, "Starting charge generation");

    let result = state.engine().start_processing(id).await;
    if result.is_ok() {
        info!(correlation_id = %correlation_id, period_id = %id, "Charge generation accepted");
    }
    finish(correlation_id, "start_processing", StatusCode::ACCEPTED, result)
}

/// Handler for `GET /periods/:id/progress`.
async fn progress_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let correlation_id = Uuid::new_v4();
    let engine = state.engine();

    let result = async {
        let period = engine.get_period(id).await?;
        let progress = engine.progress(id).await?;
        Ok::<_, EngineError>(ProgressResponse {
            period_id: period.id,
            status: period.status,
            progress,
        })
    }
    .await;
    finish(correlation_id, "progress", StatusCode::OK, result)
}

/// Handler for `POST /periods/:id/export`.
async fn export_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<ExportRequest>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(correlation_id = %correlation_id, period_id = %id, "Exporting billing period");

    let request = match payload {
        Ok(Json(request)) => request,
        Err(JsonRejection::MissingJsonContentType(_)) => ExportRequest::default(),
        Err(rejection) => return json_rejection(correlation_id, rejection),
    };

    let start_time = Instant::now();
    let engine = state.engine();
    let result = match request.export_date {
        Some(date) => engine.export_to_payroll_on(id, request.format, date).await,
        None => engine.export_to_payroll(id, request.format).await,
    };

    if let Ok(export) = &result {
        info!(
            correlation_id = %correlation_id,
            period_id = %id,
            export_id = %export.id,
            record_count = export.record_count,
            duration_us = start_time.elapsed().as_micros(),
            "Export completed successfully"
        );
    }
    finish(correlation_id, "export_to_payroll", StatusCode::CREATED, result)
}

/// Handler for `GET /periods/:id/exports`.
async fn list_exports_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let correlation_id = Uuid::new_v4();
    let result = state.engine().list_exports(id).await;
    finish(correlation_id, "list_exports", StatusCode::OK, result)
}

/// Handler for `POST /periods/:id/cancel`.
async fn cancel_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(correlation_id = %correlation_id, period_id = %id, "Cancelling billing period");
    let result = state.engine().cancel_period(id).await;
    finish(correlation_id, "cancel_period", StatusCode::OK, result)
}

/// Handler for `POST /periods/:id/reactivate`.
async fn reactivate_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(correlation_id = %correlation_id, period_id = %id, "Reactivating billing period");
    let result = state.engine().reactivate_period(id).await;
    finish(correlation_id, "reactivate_period", StatusCode::OK, result)
}

/// Handler for `GET /periods/:id/charges?staff_id=&type=&source_id=`.
async fn list_charges_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    query: Result<Query<ChargeFilter>, QueryRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();

    let filter = match query {
        Ok(Query(filter)) => filter,
        Err(rejection) => {
            warn!(correlation_id = %correlation_id, error = %rejection, "Query string error");
            return ApiErrorResponse::bad_request(ApiError::malformed_query(rejection.body_text()))
                .into_response();
        }
    };

    let result = state.engine().list_charges(id, &filter).await;
    finish(correlation_id, "list_charges", StatusCode::OK, result)
}

/// Handler for `GET /periods/:id/totals`.
async fn totals_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let correlation_id = Uuid::new_v4();
    let result = state.engine().get_totals(id).await;
    finish(correlation_id, "get_totals", StatusCode::OK, result)
}

/// Handler for `PATCH /charges/:id`.
async fn amend_charge_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<ChargePatch>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(correlation_id = %correlation_id, charge_id = %id, "Amending charge");

    let patch = match payload {
        Ok(Json(patch)) => patch,
        Err(rejection) => return json_rejection(correlation_id, rejection),
    };

    let result = state.engine().amend_charge(id, &patch).await;
    finish(correlation_id, "amend_charge", StatusCode::OK, result)
}

/// Handler for `POST /manual-activity`.
///
/// Records operator-entered activity; it is charged by the next processing
/// run of any period it overlaps.
async fn manual_activity_handler(
    State(state): State<AppState>,
    payload: Result<Json<Activity>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();

    let activity = match payload {
        Ok(Json(activity)) => activity,
        Err(rejection) => return json_rejection(correlation_id, rejection),
    };

    let result = validate_activity(&activity);
    if result.is_ok() {
        info!(
            correlation_id = %correlation_id,
            source_id = %activity.source_id,
            staff_id = %activity.staff_id,
            charge_type = %activity.charge_type,
            "Recording manual activity"
        );
        state.manual().record(activity.clone()).await;
    }
    finish(
        correlation_id,
        "record_manual_activity",
        StatusCode::ACCEPTED,
        result.map(|()| activity),
    )
}

fn validate_activity(activity: &Activity) -> EngineResult<()> {
    if activity.source_id.trim().is_empty() {
        return Err(EngineError::invalid_charge("source_id", "must not be empty"));
    }
    if activity.staff_id.trim().is_empty() {
        return Err(EngineError::invalid_charge("staff_id", "must not be empty"));
    }
    activity.span()?;
    effective_base_rate(activity)?;
    Ok(())
}
