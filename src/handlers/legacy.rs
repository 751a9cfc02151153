//! Legacy efinance lookups. These run hand-written parameterised
//! statements against the atlas store and return fixed-shape results; the
//! filter engine is never involved.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::{Extension, Json};
use serde_json::{json, Value};

use crate::domain::reports::{IsoSearchRequest, LegacyTotalsRequest};
use crate::error::{ApiError, RequestError};
use crate::handlers::simple_meta;
use crate::middleware::auth::RequestScope;
use crate::AppState;

pub async fn legacy_totals(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
    body: Result<Json<LegacyTotalsRequest>, JsonRejection>,
) -> Result<Json<Value>, RequestError> {
    let Json(request) = body.map_err(|rejection| {
        scope.wrap(ApiError::BadRequest(format!("Invalid request body: {}", rejection)))
    })?;

    let report = state
        .service
        .legacy_totals(&request)
        .await
        .map_err(|err| scope.wrap(err))?;

    Ok(Json(json!({
        "data": report,
        "meta": simple_meta(),
    })))
}

pub async fn legacy_lookup(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
    body: Result<Json<IsoSearchRequest>, JsonRejection>,
) -> Result<Json<Value>, RequestError> {
    let Json(request) = body.map_err(|rejection| {
        scope.wrap(ApiError::BadRequest(format!("Invalid request body: {}", rejection)))
    })?;

    let report = state
        .service
        .legacy_search(&request)
        .await
        .map_err(|err| scope.wrap(err))?;

    Ok(Json(json!({
        "data": report,
        "meta": simple_meta(),
    })))
}
