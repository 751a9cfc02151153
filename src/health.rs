//! Store availability probes behind the health endpoint. Both stores are
//! pinged concurrently under a hard timeout; the overall status degrades as
//! stores drop out.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use sqlx::{MySqlPool, PgPool};
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::config::{API_VERSION, SERVICE_NAME};
use crate::error::sanitize_message;
use crate::AppState;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
pub struct StoreHealth {
    pub status: &'static str,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StoreHealth {
    fn healthy(started: Instant) -> Self {
        StoreHealth {
            status: "healthy",
            latency_ms: started.elapsed().as_millis() as u64,
            error: None,
        }
    }

    fn unhealthy(started: Instant, error: String) -> Self {
        StoreHealth {
            status: "unhealthy",
            latency_ms: started.elapsed().as_millis() as u64,
            error: Some(sanitize_message(&error, "store unreachable")),
        }
    }

    fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

async fn check_portal(pool: &PgPool) -> StoreHealth {
    let started = Instant::now();
    match timeout(PROBE_TIMEOUT, sqlx::query("SELECT 1").execute(pool)).await {
        Ok(Ok(_)) => StoreHealth::healthy(started),
        Ok(Err(err)) => StoreHealth::unhealthy(started, err.to_string()),
        Err(_) => StoreHealth::unhealthy(started, "probe timed out".to_string()),
    }
}

async fn check_atlas(pool: &MySqlPool) -> StoreHealth {
    let started = Instant::now();
    match timeout(PROBE_TIMEOUT, sqlx::query("SELECT 1").execute(pool)).await {
        Ok(Ok(_)) => StoreHealth::healthy(started),
        Ok(Err(err)) => StoreHealth::unhealthy(started, err.to_string()),
        Err(_) => StoreHealth::unhealthy(started, "probe timed out".to_string()),
    }
}

/// `healthy` needs every configured store up; one missing store degrades,
/// losing the portal store is unhealthy.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();

    let portal = check_portal(state.db.portal());
    let atlas = state.db.atlas().map(check_atlas);

    let (portal, atlas) = match atlas {
        Some(atlas) => {
            let (portal, atlas) = tokio::join!(portal, atlas);
            (portal, Some(atlas))
        }
        None => (portal.await, None),
    };

    let atlas_healthy = atlas.as_ref().map(StoreHealth::is_healthy);
    let status = match (portal.is_healthy(), atlas_healthy) {
        (true, None | Some(true)) => "healthy",
        (true, Some(false)) => "degraded",
        (false, Some(true)) => "degraded",
        (false, _) => "unhealthy",
    };

    let http_status = if status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = json!({
        "status": status,
        "service": SERVICE_NAME,
        "version": API_VERSION,
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "latency_ms": started.elapsed().as_millis() as u64,
        "stores": {
            "portal": portal,
            "atlas": atlas,
        },
    });

    (http_status, Json(body))
}
