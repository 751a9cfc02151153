pub mod cache_service;
pub mod transaction_service;

pub use cache_service::{CacheService, NoOpCacheService, RedisCacheService};
pub use transaction_service::TransactionService;
