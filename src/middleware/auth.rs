//! Resolves the caller's merchant scope from Basic credentials and makes it
//! available to every protected handler. Development mode fabricates a
//! fixed caller identity instead.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use uuid::Uuid;

use crate::error::{generated_request_id, ApiError, RequestError};
use crate::middleware::request_meta::RequestId;
use crate::AppState;

pub const DEV_MERCHANT_ID: &str = "9cda37a0-4813-11ef-95d7-c5ac867bb9fc";
const DEV_MERCHANT_NAME: &str = "NASS WALLET";
const SYSTEM_TEST_MERCHANT_ID: &str = "d1a3fefe-101d-11ea-8d71-362b9e155667";

/// Caller identity scoped to one request. Every query is confined to this
/// merchant's own data or the data it provisions.
#[derive(Debug, Clone)]
pub struct RequestScope {
    pub merchant_id: String,
    pub merchant_name: String,
    pub request_id: String,
}

impl RequestScope {
    pub fn wrap(&self, error: ApiError) -> RequestError {
        error.with_request_id(self.request_id.clone())
    }
}

pub async fn require_scope(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, RequestError> {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(generated_request_id);

    if state.config.is_dev_mode() {
        tracing::debug!(request_id = %request_id, "development mode: fabricating caller scope");
        req.extensions_mut().insert(RequestScope {
            merchant_id: DEV_MERCHANT_ID.to_string(),
            merchant_name: DEV_MERCHANT_NAME.to_string(),
            request_id,
        });
        return Ok(next.run(req).await);
    }

    let scope = resolve_scope(&req, request_id.clone()).map_err(|err| {
        tracing::warn!(request_id = %request_id, error = %err, "authentication rejected");
        err.with_request_id(request_id.clone())
    })?;

    req.extensions_mut().insert(scope);
    Ok(next.run(req).await)
}

fn resolve_scope(req: &Request, request_id: String) -> Result<RequestScope, ApiError> {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::AuthenticationFailed("missing Authorization header".to_string()))?;

    let encoded = header.strip_prefix("Basic ").ok_or_else(|| {
        ApiError::AuthenticationFailed("expected Basic authentication".to_string())
    })?;

    let decoded = BASE64
        .decode(encoded)
        .map_err(|_| ApiError::AuthenticationFailed("invalid base64 credentials".to_string()))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| ApiError::AuthenticationFailed("credentials are not valid utf-8".to_string()))?;

    let (merchant_id, _password) = decoded.split_once(':').ok_or_else(|| {
        ApiError::AuthenticationFailed("expected merchant_id:password credentials".to_string())
    })?;

    if !is_known_merchant(merchant_id) {
        return Err(ApiError::AuthenticationFailed(format!(
            "unknown merchant '{}'",
            merchant_id
        )));
    }

    Ok(RequestScope {
        merchant_id: merchant_id.to_string(),
        merchant_name: merchant_name(merchant_id),
        request_id,
    })
}

/// Credential verification proper lives in the upstream identity service;
/// here a caller is accepted when its id is the system test account or any
/// well-formed merchant UUID.
fn is_known_merchant(merchant_id: &str) -> bool {
    merchant_id == SYSTEM_TEST_MERCHANT_ID || Uuid::parse_str(merchant_id).is_ok()
}

fn merchant_name(merchant_id: &str) -> String {
    match merchant_id {
        DEV_MERCHANT_ID => DEV_MERCHANT_NAME.to_string(),
        SYSTEM_TEST_MERCHANT_ID => "System Test Merchant".to_string(),
        _ => "Unknown Merchant".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merchant_acceptance() {
        assert!(is_known_merchant(SYSTEM_TEST_MERCHANT_ID));
        assert!(is_known_merchant("9cda37a0-4813-11ef-95d7-c5ac867bb9fc"));
        assert!(!is_known_merchant("not-a-merchant"));
        assert!(!is_known_merchant(""));
    }

    #[test]
    fn known_names_resolve() {
        assert_eq!(merchant_name(DEV_MERCHANT_ID), DEV_MERCHANT_NAME);
        assert_eq!(
            merchant_name("11111111-2222-3333-4444-555555555555"),
            "Unknown Merchant"
        );
    }
}
