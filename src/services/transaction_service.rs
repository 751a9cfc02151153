//! Orchestrates a request: validates the projection, wraps store calls in
//! the retry harness, coordinates the cache for derived aggregates, and
//! shapes the pagination result.

use chrono::NaiveDate;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::db::retry::{retry_with_backoff, RetryConfig};
use crate::domain::reports::{
    IsoSearchReport, IsoSearchRequest, LegacyTotalsReport, LegacyTotalsRequest,
    TransactionTotalsReport,
};
use crate::domain::{Merchant, MerchantSummary};
use crate::error::ApiError;
use crate::query::catalog::{self, QueryOptions};
use crate::query::search::SearchRequest;
use crate::query::{filter::TransactionFilter, search, sort::SortKey, Pagination};
use crate::repositories::{TotalsQuery, TransactionRepository};
use crate::services::cache_service::CacheService;

#[derive(Debug, Clone)]
pub struct ListParams {
    pub filter: TransactionFilter,
    pub fields: Vec<String>,
    pub sort: Vec<SortKey>,
    pub pagination: Pagination,
    pub options: QueryOptions,
}

#[derive(Debug)]
pub struct ListResult {
    pub rows: Vec<Value>,
    pub total_count: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
    pub current_page_count: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

impl ListResult {
    fn new(rows: Vec<Value>, total_count: i64, pagination: Pagination) -> Self {
        let total_pages = if total_count == 0 {
            0
        } else {
            (total_count + pagination.limit - 1) / pagination.limit
        };
        ListResult {
            current_page_count: rows.len(),
            rows,
            total_count,
            page: pagination.page,
            limit: pagination.limit,
            total_pages,
            has_next: pagination.page < total_pages,
            has_prev: pagination.page > 1,
        }
    }
}

#[derive(Debug)]
pub struct SummaryResult {
    pub summary: MerchantSummary,
    pub cached: bool,
}

pub struct TransactionService {
    repo: Arc<dyn TransactionRepository>,
    cache: Arc<dyn CacheService>,
    retry: RetryConfig,
}

impl TransactionService {
    pub fn new(repo: Arc<dyn TransactionRepository>, cache: Arc<dyn CacheService>) -> Self {
        TransactionService {
            repo,
            cache,
            retry: RetryConfig::default(),
        }
    }

    /// Transaction lists are always read fresh; they are never cached.
    pub async fn list_transactions(
        &self,
        merchant_id: &str,
        params: &ListParams,
    ) -> Result<ListResult, ApiError> {
        catalog::validate_fields(&params.fields)?;

        let page = self
            .with_retry(|| {
                self.repo.list_transactions(
                    merchant_id,
                    &params.filter,
                    &params.fields,
                    &params.sort,
                    params.pagination,
                    &params.options,
                )
            })
            .await?;

        Ok(ListResult::new(page.rows, page.total_count, params.pagination))
    }

    pub async fn get_transaction(
        &self,
        merchant_id: &str,
        transaction_id: &str,
        fields: &[String],
        options: &QueryOptions,
    ) -> Result<Value, ApiError> {
        catalog::validate_fields(fields)?;

        let row = self
            .with_retry(|| self.repo.get_transaction(merchant_id, transaction_id, fields, options))
            .await?;

        row.ok_or_else(|| ApiError::TransactionNotFound(transaction_id.to_string()))
    }

    /// The search body reduces to the same list path: its query becomes a
    /// filter, its sort is validated against the same whitelist.
    pub async fn search_transactions(
        &self,
        merchant_id: &str,
        request: &SearchRequest,
        options: &QueryOptions,
    ) -> Result<ListResult, ApiError> {
        let filter = search::filter_from_query(request.query.as_ref());
        let sort = search::sort_keys(&request.sort)?;
        let pagination = Pagination::new(
            request.pagination.page.unwrap_or(1),
            request.pagination.limit.unwrap_or(crate::config::DEFAULT_PAGE_SIZE),
        );

        let params = ListParams {
            filter,
            fields: request.fields.clone(),
            sort,
            pagination,
            options: options.clone(),
        };
        self.list_transactions(merchant_id, &params).await
    }

    /// Read-through over the cache: the summary is a derived aggregate and
    /// safe to serve under a TTL.
    pub async fn merchant_summary(
        &self,
        merchant_id: &str,
        filter: &TransactionFilter,
    ) -> Result<SummaryResult, ApiError> {
        let params = filter.cache_params();

        if let Some(summary) = self.cache.get_summary(merchant_id, &params).await {
            return Ok(SummaryResult {
                summary,
                cached: true,
            });
        }

        let mut summary = self
            .with_retry(|| self.repo.merchant_summary(merchant_id, filter))
            .await?;

        // With no matching rows the aggregate cannot name the merchant;
        // the reference entity lookup fills that in when it can.
        if summary.merchant_name == "Unknown" {
            if let Some(merchant) = self.merchant(merchant_id).await {
                summary.merchant_name = merchant.merchant_name;
            }
        }

        self.cache.set_summary(merchant_id, &params, &summary).await;
        Ok(SummaryResult {
            summary,
            cached: false,
        })
    }

    /// Cached read-through for the merchant reference entity. Failures only
    /// cost the garnish, never the request.
    async fn merchant(&self, merchant_id: &str) -> Option<Merchant> {
        if let Some(merchant) = self.cache.get_merchant(merchant_id).await {
            return Some(merchant);
        }
        match self.with_retry(|| self.repo.get_merchant(merchant_id)).await {
            Ok(Some(merchant)) => {
                self.cache.set_merchant(&merchant).await;
                Some(merchant)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(merchant_id, error = %err, "merchant lookup failed");
                None
            }
        }
    }

    pub async fn transaction_totals(
        &self,
        merchant_id: &str,
        date: &str,
        device_id: Option<String>,
        terminal_id: Option<String>,
        bank_terminal_id: Option<String>,
    ) -> Result<TransactionTotalsReport, ApiError> {
        let date = parse_report_date(date)?;
        let query = TotalsQuery {
            date,
            device_id,
            terminal_id,
            bank_terminal_id,
        };
        self.with_retry(|| self.repo.transaction_totals(merchant_id, &query))
            .await
    }

    pub async fn legacy_totals(
        &self,
        request: &LegacyTotalsRequest,
    ) -> Result<LegacyTotalsReport, ApiError> {
        if !self.repo.has_legacy_store() {
            return Err(ApiError::ServiceUnavailable { retry_after: 60 });
        }
        parse_report_date(&request.date)?;
        self.with_retry(|| self.repo.legacy_totals(request)).await
    }

    pub async fn legacy_search(
        &self,
        request: &IsoSearchRequest,
    ) -> Result<IsoSearchReport, ApiError> {
        if !self.repo.has_legacy_store() {
            return Err(ApiError::ServiceUnavailable { retry_after: 60 });
        }
        if let Some(date) = request.date.as_deref().filter(|d| !d.is_empty()) {
            parse_report_date(date)?;
        }
        self.with_retry(|| self.repo.legacy_search(request)).await
    }

    /// Invalidation hook for state changes under a scope: the merchant entry
    /// and every scoped aggregate are dropped so the next read recomputes.
    pub async fn invalidate_scope(&self, merchant_id: &str) {
        self.cache.invalidate_merchant_scope(merchant_id).await;
    }

    /// Retry wrapper plus the final transient mapping: an exhausted
    /// transient failure surfaces as SERVICE_UNAVAILABLE, anything else
    /// keeps its class.
    async fn with_retry<T, Fut>(&self, operation: impl FnMut() -> Fut) -> Result<T, ApiError>
    where
        Fut: Future<Output = Result<T, ApiError>>,
    {
        retry_with_backoff(operation, self.retry, ApiError::is_transient)
            .await
            .map_err(|err| {
                if err.is_transient() {
                    tracing::error!(error = %err, "store unavailable after retries");
                    ApiError::ServiceUnavailable { retry_after: 30 }
                } else {
                    err
                }
            })
    }
}

fn parse_report_date(date: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| {
        ApiError::BadRequest(format!("Invalid date '{}', expected YYYY-MM-DD", date))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::reports::IsoSearchReport;
    use crate::repositories::{TransactionPage, TransactionRepository};
    use crate::services::cache_service::NoOpCacheService;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubRepository {
        list_calls: AtomicU32,
        summary_calls: AtomicU32,
        rows: Vec<Value>,
        total_count: i64,
        fail_transiently: bool,
    }

    fn transient() -> ApiError {
        ApiError::Database(sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        )))
    }

    #[async_trait]
    impl TransactionRepository for StubRepository {
        async fn list_transactions(
            &self,
            _merchant_id: &str,
            _filter: &TransactionFilter,
            _fields: &[String],
            _sort: &[SortKey],
            _pagination: Pagination,
            _options: &QueryOptions,
        ) -> Result<TransactionPage, ApiError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_transiently {
                return Err(transient());
            }
            Ok(TransactionPage {
                rows: self.rows.clone(),
                total_count: self.total_count,
            })
        }

        async fn get_transaction(
            &self,
            _merchant_id: &str,
            _transaction_id: &str,
            _fields: &[String],
            _options: &QueryOptions,
        ) -> Result<Option<Value>, ApiError> {
            Ok(None)
        }

        async fn merchant_summary(
            &self,
            merchant_id: &str,
            _filter: &TransactionFilter,
        ) -> Result<MerchantSummary, ApiError> {
            self.summary_calls.fetch_add(1, Ordering::SeqCst);
            Ok(MerchantSummary {
                merchant_id: merchant_id.to_string(),
                merchant_name: "Shop".to_string(),
                total_transactions: 4,
                successful_transactions: 3,
                total_amount: 400,
                ..Default::default()
            }
            .finalize())
        }

        async fn get_merchant(&self, _merchant_id: &str) -> Result<Option<Merchant>, ApiError> {
            Ok(None)
        }

        async fn transaction_totals(
            &self,
            _merchant_id: &str,
            query: &TotalsQuery,
        ) -> Result<TransactionTotalsReport, ApiError> {
            Ok(TransactionTotalsReport {
                date: query.date.format("%Y-%m-%d").to_string(),
                device_id: None,
                terminal_id: None,
                bank_terminal_id: None,
                totals: vec![],
            })
        }

        async fn legacy_totals(
            &self,
            request: &LegacyTotalsRequest,
        ) -> Result<LegacyTotalsReport, ApiError> {
            Ok(LegacyTotalsReport {
                date: request.date.clone(),
                device_id: None,
                totals: vec![],
            })
        }

        async fn legacy_search(
            &self,
            _request: &IsoSearchRequest,
        ) -> Result<IsoSearchReport, ApiError> {
            Ok(IsoSearchReport {
                transactions: vec![],
            })
        }

        fn has_legacy_store(&self) -> bool {
            false
        }
    }

    /// In-memory cache that records what was stored.
    #[derive(Default)]
    struct MemoryCache {
        summaries: Mutex<Option<MerchantSummary>>,
    }

    #[async_trait]
    impl CacheService for MemoryCache {
        async fn get_summary(
            &self,
            _scope: &str,
            _params: &[(String, String)],
        ) -> Option<MerchantSummary> {
            self.summaries.lock().unwrap().clone()
        }

        async fn set_summary(
            &self,
            _scope: &str,
            _params: &[(String, String)],
            summary: &MerchantSummary,
        ) {
            *self.summaries.lock().unwrap() = Some(summary.clone());
        }

        async fn get_merchant(&self, _merchant_id: &str) -> Option<Merchant> {
            None
        }

        async fn set_merchant(&self, _merchant: &Merchant) {}

        async fn invalidate_merchant_scope(&self, _merchant_id: &str) {
            *self.summaries.lock().unwrap() = None;
        }

        async fn ping(&self) -> bool {
            true
        }
    }

    fn service_with(repo: StubRepository, cache: Arc<dyn CacheService>) -> TransactionService {
        TransactionService::new(Arc::new(repo), cache)
    }

    fn default_params() -> ListParams {
        ListParams {
            filter: TransactionFilter::default(),
            fields: vec![],
            sort: vec![],
            pagination: Pagination::new(2, 10),
            options: QueryOptions::default(),
        }
    }

    #[tokio::test]
    async fn list_result_pagination_math() {
        let repo = StubRepository {
            rows: vec![json!({"amount": 1}); 10],
            total_count: 45,
            ..Default::default()
        };
        let service = service_with(repo, Arc::new(NoOpCacheService));

        let result = service
            .list_transactions("m-1", &default_params())
            .await
            .unwrap();

        assert_eq!(result.total_pages, 5);
        assert_eq!(result.current_page_count, 10);
        assert!(result.has_next);
        assert!(result.has_prev);
    }

    #[tokio::test]
    async fn invalid_field_is_rejected_before_the_store_is_touched() {
        let repo = StubRepository::default();
        let service = service_with(repo, Arc::new(NoOpCacheService));

        let mut params = default_params();
        params.fields = vec!["mystery_field".to_string()];

        let err = service.list_transactions("m-1", &params).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_FIELD");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_transient_failure_maps_to_service_unavailable() {
        let repo = StubRepository {
            fail_transiently: true,
            ..Default::default()
        };
        let service = service_with(repo, Arc::new(NoOpCacheService));

        let err = service
            .list_transactions("m-1", &default_params())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SERVICE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn missing_transaction_maps_to_not_found() {
        let service = service_with(StubRepository::default(), Arc::new(NoOpCacheService));
        let err = service
            .get_transaction("m-1", "tx-404", &[], &QueryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TRANSACTION_NOT_FOUND");
    }

    #[tokio::test]
    async fn summary_is_served_from_cache_on_the_second_read() {
        let cache = Arc::new(MemoryCache::default());
        let repo = StubRepository::default();
        let service = TransactionService::new(Arc::new(repo), cache.clone());

        let first = service
            .merchant_summary("m-1", &TransactionFilter::default())
            .await
            .unwrap();
        assert!(!first.cached);

        let second = service
            .merchant_summary("m-1", &TransactionFilter::default())
            .await
            .unwrap();
        assert!(second.cached);
        assert_eq!(second.summary.total_transactions, 4);
    }

    #[tokio::test]
    async fn invalidation_forces_a_recompute() {
        let cache = Arc::new(MemoryCache::default());
        let service = TransactionService::new(Arc::new(StubRepository::default()), cache.clone());

        service
            .merchant_summary("m-1", &TransactionFilter::default())
            .await
            .unwrap();
        service.invalidate_scope("m-1").await;

        let after = service
            .merchant_summary("m-1", &TransactionFilter::default())
            .await
            .unwrap();
        assert!(!after.cached);
    }

    #[tokio::test]
    async fn legacy_endpoints_require_the_legacy_store() {
        let service = service_with(StubRepository::default(), Arc::new(NoOpCacheService));
        let err = service
            .legacy_totals(&LegacyTotalsRequest {
                date: "2024-06-15".to_string(),
                device_id: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SERVICE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn totals_rejects_malformed_dates() {
        let service = service_with(StubRepository::default(), Arc::new(NoOpCacheService));
        let err = service
            .transaction_totals("m-1", "15-06-2024", None, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BAD_REQUEST");
    }
}
