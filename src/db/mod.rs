use crate::config::Config;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgPool, PgPoolOptions};

pub mod retry;
pub mod router;

pub use router::{BackendHandle, DatabaseRouter};

/// Portal (primary) store pool. Required for the service to be useful, so
/// connection failure propagates.
pub async fn create_portal_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.portal_url())
        .await
}

/// Atlas (legacy) store pool, only consulted by the v1 efinance endpoints.
/// Connects lazily so an unreachable legacy store does not block startup.
pub fn create_atlas_pool(config: &Config) -> Option<MySqlPool> {
    let url = config.atlas_url()?;
    match MySqlPoolOptions::new().max_connections(10).connect_lazy(&url) {
        Ok(pool) => Some(pool),
        Err(err) => {
            tracing::warn!(error = %err, "atlas store unavailable, continuing without it");
            None
        }
    }
}
