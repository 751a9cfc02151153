//! Read-through cache for derived aggregates and reference entities.
//! Transaction lists and single reads are never cached: freshness wins over
//! hit rate. When the backend is unavailable at startup the no-op
//! implementation takes its place and every call site keeps working.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::Config;
use crate::domain::{Merchant, MerchantSummary};

#[async_trait]
pub trait CacheService: Send + Sync {
    async fn get_summary(&self, scope: &str, params: &[(String, String)])
        -> Option<MerchantSummary>;
    async fn set_summary(
        &self,
        scope: &str,
        params: &[(String, String)],
        summary: &MerchantSummary,
    );

    async fn get_merchant(&self, merchant_id: &str) -> Option<Merchant>;
    async fn set_merchant(&self, merchant: &Merchant);

    /// Drops the scoped merchant entry and every scoped aggregate key.
    async fn invalidate_merchant_scope(&self, merchant_id: &str);

    async fn ping(&self) -> bool;
}

/// Stable key: plain kind and scope segments (so scoped keys can be found by
/// prefix scan) plus a hash of the canonical, sorted parameter list.
pub fn derive_key(prefix: &str, kind: &str, scope: &str, params: &[(String, String)]) -> String {
    let mut sorted = params.to_vec();
    sorted.sort();

    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b"|");
    hasher.update(scope.as_bytes());
    for (name, value) in &sorted {
        hasher.update(b"|");
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());

    format!("{}{}:{}:{}", prefix, kind, scope, &digest[..16])
}

fn merchant_key(prefix: &str, merchant_id: &str) -> String {
    format!("{}merchant:{}", prefix, merchant_id)
}

pub struct RedisCacheService {
    conn: ConnectionManager,
    prefix: String,
    ttl_secs: u64,
}

impl RedisCacheService {
    /// Connects and verifies the backend with a PING. Failure here is the
    /// caller's cue to fall back to [`NoOpCacheService`].
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let client = redis::Client::open(config.redis_url())?;
        let dial_timeout = Duration::from_secs(config.redis.timeout_secs);
        let mut conn = tokio::time::timeout(dial_timeout, ConnectionManager::new(client)).await??;

        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;

        Ok(RedisCacheService {
            conn,
            prefix: config.redis.key_prefix.clone(),
            ttl_secs: config.redis.ttl_secs,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::warn!(key, error = %err, "discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache read failed");
                None
            }
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache serialisation failed");
                return;
            }
        };
        let mut conn = self.conn.clone();
        if let Err(err) = conn.set_ex::<_, _, ()>(key, raw, self.ttl_secs).await {
            tracing::warn!(key, error = %err, "cache write failed");
        }
    }

    async fn delete_pattern(&self, pattern: &str) {
        let mut scan_conn = self.conn.clone();
        let mut keys = Vec::new();
        match scan_conn.scan_match::<_, String>(pattern).await {
            Ok(mut iter) => {
                while let Some(key) = iter.next_item().await {
                    keys.push(key);
                }
            }
            Err(err) => {
                tracing::warn!(pattern, error = %err, "cache scan failed");
                return;
            }
        }

        if keys.is_empty() {
            return;
        }
        let mut conn = self.conn.clone();
        if let Err(err) = conn.del::<_, ()>(keys).await {
            tracing::warn!(pattern, error = %err, "cache invalidation failed");
        }
    }
}

#[async_trait]
impl CacheService for RedisCacheService {
    async fn get_summary(
        &self,
        scope: &str,
        params: &[(String, String)],
    ) -> Option<MerchantSummary> {
        let key = derive_key(&self.prefix, "summary", scope, params);
        self.get_json(&key).await
    }

    async fn set_summary(
        &self,
        scope: &str,
        params: &[(String, String)],
        summary: &MerchantSummary,
    ) {
        let key = derive_key(&self.prefix, "summary", scope, params);
        self.set_json(&key, summary).await;
    }

    async fn get_merchant(&self, merchant_id: &str) -> Option<Merchant> {
        let key = merchant_key(&self.prefix, merchant_id);
        self.get_json(&key).await
    }

    async fn set_merchant(&self, merchant: &Merchant) {
        let key = merchant_key(&self.prefix, &merchant.merchant_id);
        self.set_json(&key, merchant).await;
    }

    async fn invalidate_merchant_scope(&self, merchant_id: &str) {
        let mut conn = self.conn.clone();
        let key = merchant_key(&self.prefix, merchant_id);
        if let Err(err) = conn.del::<_, ()>(&key).await {
            tracing::warn!(key, error = %err, "cache invalidation failed");
        }

        let pattern = format!("{}summary:{}:*", self.prefix, merchant_id);
        self.delete_pattern(&pattern).await;
    }

    async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await.is_ok()
    }
}

/// Stands in when caching is disabled or the backend is unreachable.
pub struct NoOpCacheService;

#[async_trait]
impl CacheService for NoOpCacheService {
    async fn get_summary(
        &self,
        _scope: &str,
        _params: &[(String, String)],
    ) -> Option<MerchantSummary> {
        None
    }

    async fn set_summary(
        &self,
        _scope: &str,
        _params: &[(String, String)],
        _summary: &MerchantSummary,
    ) {
    }

    async fn get_merchant(&self, _merchant_id: &str) -> Option<Merchant> {
        None
    }

    async fn set_merchant(&self, _merchant: &Merchant) {}

    async fn invalidate_merchant_scope(&self, _merchant_id: &str) {}

    async fn ping(&self) -> bool {
        false
    }
}
