use axum::http::{HeaderMap, Uri};
use axum::{Extension, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::config::API_VERSION;
use crate::error::{ApiError, RequestError};
use crate::middleware::auth::RequestScope;
use crate::services::transaction_service::ListResult;

pub mod legacy;
pub mod merchants;
pub mod transactions;

/// Paginated response envelope shared by the list-shaped endpoints.
pub(crate) fn list_envelope(
    result: &ListResult,
    links: Value,
    execution_time_ms: u64,
    cached: bool,
) -> Value {
    json!({
        "data": result.rows,
        "meta": {
            "pagination": {
                "page": result.page,
                "limit": result.limit,
                "total": result.total_count,
                "total_pages": result.total_pages,
                "current_page_count": result.current_page_count,
                "has_next": result.has_next,
                "has_prev": result.has_prev,
            },
            "timestamp": Utc::now().to_rfc3339(),
            "version": API_VERSION,
            "execution_time_ms": execution_time_ms,
            "cached": cached,
        },
        "links": links,
    })
}

pub(crate) fn simple_meta() -> Value {
    json!({
        "timestamp": Utc::now().to_rfc3339(),
        "version": API_VERSION,
    })
}

/// Navigation links for a paginated response. The page parameter is
/// rewritten on the caller's own query string.
pub(crate) fn pagination_links(
    headers: &HeaderMap,
    uri: &Uri,
    page: i64,
    total_pages: i64,
) -> Value {
    let base = base_url(headers, uri);
    let query = uri.query().map(strip_page_param).unwrap_or_default();
    let last = total_pages.max(1);

    json!({
        "self": page_url(&base, &query, page),
        "first": page_url(&base, &query, 1),
        "last": page_url(&base, &query, last),
        "prev": if page > 1 { Value::String(page_url(&base, &query, page - 1)) } else { Value::Null },
        "next": if page < total_pages { Value::String(page_url(&base, &query, page + 1)) } else { Value::Null },
    })
}

fn base_url(headers: &HeaderMap, uri: &Uri) -> String {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok());
    match host {
        Some(host) => {
            let scheme = headers
                .get("x-forwarded-proto")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("http");
            format!("{}://{}{}", scheme, host, uri.path())
        }
        None => uri.path().to_string(),
    }
}

fn strip_page_param(query: &str) -> String {
    query
        .split('&')
        .filter(|pair| !pair.starts_with("page=") && !pair.is_empty())
        .collect::<Vec<_>>()
        .join("&")
}

fn page_url(base: &str, query: &str, page: i64) -> String {
    if query.is_empty() {
        format!("{}?page={}", base, page)
    } else {
        format!("{}?{}&page={}", base, query, page)
    }
}

pub(crate) fn parse_comma_separated(input: Option<&str>) -> Vec<String> {
    input
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Static service description.
pub async fn info() -> Json<Value> {
    Json(json!({
        "service": crate::config::SERVICE_NAME,
        "version": API_VERSION,
        "description": "RESTful API for transaction reporting",
        "endpoints": {
            "transactions": {
                "list": "GET /api/v2/transactions",
                "get": "GET /api/v2/transactions/:id",
                "search": "POST /api/v2/transactions/search",
                "totals": "GET /api/v2/transactions/totals",
            },
            "merchants": {
                "summary": "GET /api/v2/merchants/:id/summary",
                "transactions": "GET /api/v2/merchants/:id/transactions",
            },
            "system": {
                "health": "GET /api/v2/health",
                "info": "GET /api/v2/info",
            },
        },
        "features": [
            "Advanced filtering with operators (eq, ne, gt, gte, lt, lte, like, in, between)",
            "Field selection to reduce payload size",
            "Flexible sorting on any catalogued field",
            "Pagination with navigation links",
            "Merchant-specific transaction summaries",
        ],
    }))
}

pub async fn export_not_implemented(Extension(scope): Extension<RequestScope>) -> RequestError {
    scope.wrap(ApiError::NotImplemented("Transaction export"))
}

pub async fn batch_not_implemented(Extension(scope): Extension<RequestScope>) -> RequestError {
    scope.wrap(ApiError::NotImplemented("Batch operations"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_only_the_page_parameter() {
        assert_eq!(strip_page_param("page=3&limit=10"), "limit=10");
        assert_eq!(strip_page_param("limit=10&page=3&sort=amount"), "limit=10&sort=amount");
        assert_eq!(strip_page_param("page=3"), "");
    }

    #[test]
    fn page_urls_keep_the_remaining_query() {
        assert_eq!(page_url("/api/v2/transactions", "", 1), "/api/v2/transactions?page=1");
        assert_eq!(
            page_url("/api/v2/transactions", "limit=10", 2),
            "/api/v2/transactions?limit=10&page=2"
        );
    }

    #[test]
    fn links_mark_missing_neighbours_null() {
        let headers = HeaderMap::new();
        let uri: Uri = "/api/v2/transactions?limit=10&page=1".parse().unwrap();
        let links = pagination_links(&headers, &uri, 1, 3);

        assert_eq!(links["self"], "/api/v2/transactions?limit=10&page=1");
        assert_eq!(links["first"], "/api/v2/transactions?limit=10&page=1");
        assert_eq!(links["last"], "/api/v2/transactions?limit=10&page=3");
        assert!(links["prev"].is_null());
        assert_eq!(links["next"], "/api/v2/transactions?limit=10&page=2");
    }

    #[test]
    fn links_use_the_host_header_when_present() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::HOST, "api.example.com".parse().unwrap());
        let uri: Uri = "/api/v2/transactions".parse().unwrap();
        let links = pagination_links(&headers, &uri, 2, 2);

        assert_eq!(links["self"], "http://api.example.com/api/v2/transactions?page=2");
        assert_eq!(links["prev"], "http://api.example.com/api/v2/transactions?page=1");
        assert!(links["next"].is_null());
    }

    #[test]
    fn comma_separated_parsing_trims_and_drops_empties() {
        assert_eq!(
            parse_comma_separated(Some(" a, b ,,c ")),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(parse_comma_separated(None).is_empty());
        assert!(parse_comma_separated(Some("")).is_empty());
    }
}
