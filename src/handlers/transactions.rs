use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Uri};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Instant;

use crate::config::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::error::{ApiError, RequestError};
use crate::handlers::{list_envelope, pagination_links, parse_comma_separated, simple_meta};
use crate::middleware::auth::RequestScope;
use crate::query::catalog::QueryOptions;
use crate::query::search::SearchRequest;
use crate::query::{filter, sort, Pagination};
use crate::services::transaction_service::ListParams;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub fields: Option<String>,
    pub filter: Option<String>,
    pub sort: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
    pub timezone: Option<String>,
    pub pan_format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SingleQuery {
    pub fields: Option<String>,
    pub timezone: Option<String>,
    pub pan_format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RenderQuery {
    pub timezone: Option<String>,
    pub pan_format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TotalsParams {
    pub date: Option<String>,
    pub device_id: Option<String>,
    pub terminal_id: Option<String>,
    pub bank_terminal_id: Option<String>,
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, RequestError> {
    let started = Instant::now();
    let params = parse_list_params(&query).map_err(|err| scope.wrap(err))?;

    let result = state
        .service
        .list_transactions(&scope.merchant_id, &params)
        .await
        .map_err(|err| scope.wrap(err))?;

    tracing::debug!(
        request_id = %scope.request_id,
        merchant_id = %scope.merchant_id,
        rows = result.current_page_count,
        total = result.total_count,
        "transaction list served"
    );

    let links = pagination_links(&headers, &uri, result.page, result.total_pages);
    Ok(Json(list_envelope(
        &result,
        links,
        started.elapsed().as_millis() as u64,
        false,
    )))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
    Path(transaction_id): Path<String>,
    Query(query): Query<SingleQuery>,
) -> Result<Json<Value>, RequestError> {
    let fields = parse_comma_separated(query.fields.as_deref());
    let options = QueryOptions::from_params(query.timezone.as_deref(), query.pan_format.as_deref())
        .map_err(|err| scope.wrap(err))?;

    let transaction = state
        .service
        .get_transaction(&scope.merchant_id, &transaction_id, &fields, &options)
        .await
        .map_err(|err| scope.wrap(err))?;

    Ok(Json(json!({
        "data": transaction,
        "meta": simple_meta(),
    })))
}

pub async fn search_transactions(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
    uri: Uri,
    headers: HeaderMap,
    Query(render): Query<RenderQuery>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Value>, RequestError> {
    let started = Instant::now();
    let Json(request) = body.map_err(|rejection| {
        scope.wrap(ApiError::BadRequest(format!("Invalid request body: {}", rejection)))
    })?;

    let options = QueryOptions::from_params(render.timezone.as_deref(), render.pan_format.as_deref())
        .map_err(|err| scope.wrap(err))?;

    let result = state
        .service
        .search_transactions(&scope.merchant_id, &request, &options)
        .await
        .map_err(|err| scope.wrap(err))?;

    let links = pagination_links(&headers, &uri, result.page, result.total_pages);
    let mut envelope = list_envelope(&result, links, started.elapsed().as_millis() as u64, false);
    envelope["aggregations"] = compute_aggregations(&request, &result.rows);
    Ok(Json(envelope))
}

pub async fn transaction_totals(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
    Query(params): Query<TotalsParams>,
) -> Result<Json<Value>, RequestError> {
    let date = params
        .date
        .as_deref()
        .filter(|date| !date.is_empty())
        .ok_or_else(|| {
            scope.wrap(ApiError::BadRequest(
                "Date parameter is required (format: YYYY-MM-DD)".to_string(),
            ))
        })?;

    let report = state
        .service
        .transaction_totals(
            &scope.merchant_id,
            date,
            params.device_id.clone(),
            params.terminal_id.clone(),
            params.bank_terminal_id.clone(),
        )
        .await
        .map_err(|err| scope.wrap(err))?;

    Ok(Json(json!({
        "data": report,
        "meta": simple_meta(),
    })))
}

pub(crate) fn parse_list_params(query: &ListQuery) -> Result<ListParams, ApiError> {
    let page = match query.page.as_deref() {
        None | Some("") => 1,
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|page| *page >= 1)
            .ok_or_else(|| ApiError::BadRequest("Invalid page parameter".to_string()))?,
    };

    let limit = match query.limit.as_deref() {
        None | Some("") => DEFAULT_PAGE_SIZE,
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|limit| (1..=MAX_PAGE_SIZE).contains(limit))
            .ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "Invalid limit parameter (must be 1-{})",
                    MAX_PAGE_SIZE
                ))
            })?,
    };

    Ok(ListParams {
        filter: filter::parse(query.filter.as_deref().unwrap_or(""))?,
        fields: parse_comma_separated(query.fields.as_deref()),
        sort: sort::parse(query.sort.as_deref().unwrap_or(""))?,
        pagination: Pagination::new(page, limit),
        options: QueryOptions::from_params(query.timezone.as_deref(), query.pan_format.as_deref())?,
    })
}

/// Post-query reductions over the returned page. Rows projected without an
/// amount contribute zero, matching the raw rendering.
fn compute_aggregations(request: &SearchRequest, rows: &[Value]) -> Value {
    let mut aggregations = Map::new();
    let Some(requested) = &request.aggregations else {
        return Value::Object(aggregations);
    };

    let amounts: Vec<i64> = rows
        .iter()
        .map(|row| row.get("amount").and_then(Value::as_i64).unwrap_or(0))
        .collect();
    let total: i64 = amounts.iter().sum();

    if requested.contains_key("total_amount") {
        aggregations.insert("total_amount".to_string(), json!({ "value": total }));
    }
    if requested.contains_key("avg_amount") {
        let average = if amounts.is_empty() {
            0.0
        } else {
            total as f64 / amounts.len() as f64
        };
        aggregations.insert("avg_amount".to_string(), json!({ "value": average }));
    }

    Value::Object(aggregations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_params_apply_defaults() {
        let params = parse_list_params(&ListQuery::default()).unwrap();
        assert_eq!(params.pagination.page, 1);
        assert_eq!(params.pagination.limit, DEFAULT_PAGE_SIZE);
        assert!(params.fields.is_empty());
        assert!(params.filter.is_empty());
        assert_eq!(params.sort[0].field, "tx_date_time");
        assert_eq!(params.options.timezone, "UTC");
    }

    #[test]
    fn invalid_page_and_limit_are_bad_requests() {
        let query = ListQuery {
            page: Some("zero".to_string()),
            ..Default::default()
        };
        assert_eq!(parse_list_params(&query).unwrap_err().code(), "BAD_REQUEST");

        let query = ListQuery {
            page: Some("0".to_string()),
            ..Default::default()
        };
        assert_eq!(parse_list_params(&query).unwrap_err().code(), "BAD_REQUEST");

        let query = ListQuery {
            limit: Some("20000".to_string()),
            ..Default::default()
        };
        assert_eq!(parse_list_params(&query).unwrap_err().code(), "BAD_REQUEST");
    }

    #[test]
    fn filter_and_sort_errors_keep_their_codes() {
        let query = ListQuery {
            filter: Some("amount:like:100".to_string()),
            ..Default::default()
        };
        assert_eq!(parse_list_params(&query).unwrap_err().code(), "INVALID_FILTER");

        let query = ListQuery {
            sort: Some("amount:sideways".to_string()),
            ..Default::default()
        };
        assert_eq!(parse_list_params(&query).unwrap_err().code(), "INVALID_SORT");
    }

    #[test]
    fn aggregations_reduce_over_the_page() {
        let request: SearchRequest = serde_json::from_value(json!({
            "aggregations": {"total_amount": {}, "avg_amount": {}}
        }))
        .unwrap();
        let rows = vec![json!({"amount": 100}), json!({"amount": 300})];

        let aggregations = compute_aggregations(&request, &rows);
        assert_eq!(aggregations["total_amount"]["value"], 400);
        assert_eq!(aggregations["avg_amount"]["value"], 200.0);
    }

    #[test]
    fn aggregations_on_an_empty_page_are_zero() {
        let request: SearchRequest = serde_json::from_value(json!({
            "aggregations": {"avg_amount": {}}
        }))
        .unwrap();
        let aggregations = compute_aggregations(&request, &[]);
        assert_eq!(aggregations["avg_amount"]["value"], 0.0);
        assert!(aggregations.get("total_amount").is_none());
    }
}
