use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use txreport::config::Config;
use txreport::db::{self, DatabaseRouter};
use txreport::services::{CacheService, NoOpCacheService, RedisCacheService};
use txreport::{create_app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let portal = db::create_portal_pool(&config).await?;
    tracing::info!(
        host = %config.portal.host,
        database = %config.portal.database,
        "portal store connection established"
    );

    let atlas = db::create_atlas_pool(&config);
    if atlas.is_none() {
        tracing::warn!("atlas store not configured; legacy endpoints will report unavailable");
    }
    let router = DatabaseRouter::new(portal, atlas);

    let cache: Arc<dyn CacheService> = if config.redis.enabled {
        match RedisCacheService::new(&config).await {
            Ok(cache) => {
                tracing::info!("cache backend connected");
                Arc::new(cache)
            }
            Err(err) => {
                tracing::warn!(error = %err, "cache unavailable, continuing without caching");
                Arc::new(NoOpCacheService)
            }
        }
    } else {
        tracing::info!("caching disabled by configuration");
        Arc::new(NoOpCacheService)
    };

    let state = AppState::new(router, cache, Arc::new(config.clone()));
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!(%addr, "server listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
