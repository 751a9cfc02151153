pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod query;
pub mod repositories;
pub mod services;

use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::db::DatabaseRouter;
use crate::repositories::SqlxTransactionRepository;
use crate::services::{CacheService, TransactionService};

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseRouter,
    pub service: Arc<TransactionService>,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(db: DatabaseRouter, cache: Arc<dyn CacheService>, config: Arc<Config>) -> Self {
        let repo = Arc::new(SqlxTransactionRepository::new(db.clone()));
        let service = Arc::new(TransactionService::new(repo, cache));
        AppState {
            db,
            service,
            config,
            start_time: Instant::now(),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/v2/transactions", get(handlers::transactions::list_transactions))
        .route("/api/v2/transactions/search", post(handlers::transactions::search_transactions))
        .route("/api/v2/transactions/totals", get(handlers::transactions::transaction_totals))
        .route("/api/v2/transactions/export", post(handlers::export_not_implemented))
        .route("/api/v2/transactions/batch", post(handlers::batch_not_implemented))
        .route("/api/v2/transactions/:id", get(handlers::transactions::get_transaction))
        .route("/api/v2/merchants/:merchant_id/summary", get(handlers::merchants::merchant_summary))
        .route(
            "/api/v2/merchants/:merchant_id/transactions",
            get(handlers::merchants::merchant_transactions),
        )
        .route(
            "/api/v2/merchants/:merchant_id/cache/invalidate",
            post(handlers::merchants::invalidate_merchant_cache),
        )
        .route("/api/v1/efinance/transactions/totals", post(handlers::legacy::legacy_totals))
        .route("/api/v1/efinance/transactions/lookup", post(handlers::legacy::legacy_lookup))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_scope,
        ));

    Router::new()
        .merge(protected)
        .route("/api/v2/health", get(health::health))
        .route("/api/v2/info", get(handlers::info))
        .layer(axum_middleware::from_fn(middleware::request_meta::request_meta))
        .with_state(state)
}
