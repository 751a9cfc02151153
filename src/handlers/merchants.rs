use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Uri};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;

use crate::error::{ApiError, RequestError};
use crate::handlers::transactions::ListQuery;
use crate::handlers::{list_envelope, pagination_links, simple_meta};
use crate::middleware::auth::RequestScope;
use crate::query::filter;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    pub filter: Option<String>,
}

/// A caller may only read its own summary; the scope check precedes any
/// store work.
pub async fn merchant_summary(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
    Path(merchant_id): Path<String>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<Value>, RequestError> {
    let started = Instant::now();

    if merchant_id != scope.merchant_id {
        return Err(scope.wrap(ApiError::AuthorizationFailed(format!(
            "merchant {} requested summary of {}",
            scope.merchant_id, merchant_id
        ))));
    }

    let filter = filter::parse(query.filter.as_deref().unwrap_or(""))
        .map_err(|err| scope.wrap(err))?;

    let result = state
        .service
        .merchant_summary(&scope.merchant_id, &filter)
        .await
        .map_err(|err| scope.wrap(err))?;

    let summary = &result.summary;
    Ok(Json(json!({
        "data": {
            "merchant_id": summary.merchant_id,
            "merchant_name": summary.merchant_name,
            "summary": {
                "total_transactions": summary.total_transactions,
                "successful_transactions": summary.successful_transactions,
                "failed_transactions": summary.failed_transactions,
                "total_amount": summary.total_amount,
                "average_amount": summary.average_amount,
                "success_rate": summary.success_rate,
                "date_range": {
                    "from": rfc3339_or_null(summary.date_from),
                    "to": rfc3339_or_null(summary.date_to),
                },
            },
        },
        "meta": {
            "timestamp": Utc::now().to_rfc3339(),
            "version": crate::config::API_VERSION,
            "execution_time_ms": started.elapsed().as_millis() as u64,
            "cached": result.cached,
        },
    })))
}

/// The list endpoint narrowed to one merchant: the path id becomes an
/// implicit `merchant_id:eq` filter term.
pub async fn merchant_transactions(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
    uri: Uri,
    headers: HeaderMap,
    Path(merchant_id): Path<String>,
    Query(mut query): Query<ListQuery>,
) -> Result<Json<Value>, RequestError> {
    let started = Instant::now();

    let merchant_term = format!("merchant_id:eq:{}", merchant_id);
    query.filter = Some(match query.filter.take().filter(|f| !f.is_empty()) {
        Some(existing) => format!("{} AND {}", existing, merchant_term),
        None => merchant_term,
    });

    let params = super::transactions::parse_list_params(&query).map_err(|err| scope.wrap(err))?;

    let result = state
        .service
        .list_transactions(&scope.merchant_id, &params)
        .await
        .map_err(|err| scope.wrap(err))?;

    let links = pagination_links(&headers, &uri, result.page, result.total_pages);
    Ok(Json(list_envelope(
        &result,
        links,
        started.elapsed().as_millis() as u64,
        false,
    )))
}

/// Invalidation hook for scoped state changes: drops the merchant entry and
/// every scoped aggregate so the next summary recomputes from the store.
pub async fn invalidate_merchant_cache(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
    Path(merchant_id): Path<String>,
) -> Result<Json<Value>, RequestError> {
    if merchant_id != scope.merchant_id {
        return Err(scope.wrap(ApiError::AuthorizationFailed(format!(
            "merchant {} requested invalidation of {}",
            scope.merchant_id, merchant_id
        ))));
    }

    state.service.invalidate_scope(&merchant_id).await;
    Ok(Json(json!({
        "data": { "merchant_id": merchant_id, "invalidated": true },
        "meta": simple_meta(),
    })))
}

fn rfc3339_or_null(value: Option<DateTime<Utc>>) -> Value {
    value
        .map(|ts| Value::String(ts.to_rfc3339()))
        .unwrap_or(Value::Null)
}
