//! Request-id propagation, request/response logging, and the standard
//! response headers every endpoint carries.

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::time::Instant;

use crate::config::{API_VERSION, SERVICE_NAME};
use crate::error::generated_request_id;

/// The id correlating this request across logs and the error envelope.
/// Either the caller's `X-Request-ID` or a server-generated one.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

pub async fn request_meta(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(generated_request_id);

    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    req.extensions_mut().insert(RequestId(request_id.clone()));

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        "incoming request"
    );

    let mut response = next.run(req).await;

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "outgoing response"
    );

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert("x-request-id", value);
    }
    headers.insert("x-api-version", HeaderValue::from_static(API_VERSION));
    headers.insert("x-service-name", HeaderValue::from_static(SERVICE_NAME));

    // Best-effort rate-limit headers; real enforcement sits in front of the
    // service.
    headers.insert("x-ratelimit-limit", HeaderValue::from_static("1000"));
    headers.insert("x-ratelimit-remaining", HeaderValue::from_static("999"));
    if let Ok(value) = HeaderValue::from_str(&(Utc::now().timestamp() + 3600).to_string()) {
        headers.insert("x-ratelimit-reset", value);
    }
    headers.insert("x-ratelimit-window", HeaderValue::from_static("3600"));

    response
}
