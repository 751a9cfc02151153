//! Store access for transactions. The portal store answers every composed
//! query; the atlas store answers only the fixed-shape legacy lookups.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, MySqlPool, PgPool, QueryBuilder, Row};

use crate::db::{BackendHandle, DatabaseRouter};
use crate::domain::reports::{
    IsoSearchItem, IsoSearchReport, IsoSearchRequest, LegacyTotal, LegacyTotalsReport,
    LegacyTotalsRequest, TransactionTotal, TransactionTotalsReport,
};
use crate::domain::{CurrencyInfo, Merchant, MerchantSummary, MetaRef, Transaction, TxType};
use crate::error::ApiError;
use crate::query::catalog::{self, QueryOptions, ValueKind};
use crate::query::{composer, Pagination, SortKey, TransactionFilter};

#[derive(Debug)]
pub struct TransactionPage {
    pub rows: Vec<Value>,
    pub total_count: i64,
}

#[derive(Debug, Clone)]
pub struct TotalsQuery {
    pub date: NaiveDate,
    pub device_id: Option<String>,
    pub terminal_id: Option<String>,
    pub bank_terminal_id: Option<String>,
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn list_transactions(
        &self,
        merchant_id: &str,
        filter: &TransactionFilter,
        fields: &[String],
        sort: &[SortKey],
        pagination: Pagination,
        options: &QueryOptions,
    ) -> Result<TransactionPage, ApiError>;

    async fn get_transaction(
        &self,
        merchant_id: &str,
        transaction_id: &str,
        fields: &[String],
        options: &QueryOptions,
    ) -> Result<Option<Value>, ApiError>;

    async fn merchant_summary(
        &self,
        merchant_id: &str,
        filter: &TransactionFilter,
    ) -> Result<MerchantSummary, ApiError>;

    async fn get_merchant(&self, merchant_id: &str) -> Result<Option<Merchant>, ApiError>;

    async fn transaction_totals(
        &self,
        merchant_id: &str,
        query: &TotalsQuery,
    ) -> Result<TransactionTotalsReport, ApiError>;

    async fn legacy_totals(&self, request: &LegacyTotalsRequest)
        -> Result<LegacyTotalsReport, ApiError>;

    async fn legacy_search(&self, request: &IsoSearchRequest) -> Result<IsoSearchReport, ApiError>;

    /// Whether the legacy store is configured at all.
    fn has_legacy_store(&self) -> bool;
}

#[derive(Clone)]
pub struct SqlxTransactionRepository {
    router: DatabaseRouter,
}

impl SqlxTransactionRepository {
    pub fn new(router: DatabaseRouter) -> Self {
        SqlxTransactionRepository { router }
    }

    fn portal(&self) -> &PgPool {
        self.router.portal()
    }

    fn atlas(&self) -> Result<&MySqlPool, ApiError> {
        match self.router.select(true) {
            BackendHandle::Atlas(pool) => Ok(pool),
            BackendHandle::Portal(_) => Err(ApiError::ServiceUnavailable { retry_after: 60 }),
        }
    }
}

#[async_trait]
impl TransactionRepository for SqlxTransactionRepository {
    async fn list_transactions(
        &self,
        merchant_id: &str,
        filter: &TransactionFilter,
        fields: &[String],
        sort: &[SortKey],
        pagination: Pagination,
        options: &QueryOptions,
    ) -> Result<TransactionPage, ApiError> {
        let input = composer::ComposeInput {
            merchant_id,
            filter,
            fields,
            sort,
            pagination,
            options,
        };

        let mut list_qb = composer::list_query(&input)?;
        let rows = list_qb.build().fetch_all(self.portal()).await?;

        let mut count_qb = composer::count_query(merchant_id, filter);
        let total_count: i64 = count_qb
            .build_query_scalar()
            .fetch_one(self.portal())
            .await?;

        let rows = decode_rows(&rows, fields)?;
        Ok(TransactionPage { rows, total_count })
    }

    async fn get_transaction(
        &self,
        merchant_id: &str,
        transaction_id: &str,
        fields: &[String],
        options: &QueryOptions,
    ) -> Result<Option<Value>, ApiError> {
        let mut qb = composer::single_query(merchant_id, transaction_id, fields, options)?;
        let row = qb.build().fetch_optional(self.portal()).await?;

        match row {
            Some(row) => Ok(Some(decode_row(&row, fields)?)),
            None => Ok(None),
        }
    }

    async fn merchant_summary(
        &self,
        merchant_id: &str,
        filter: &TransactionFilter,
    ) -> Result<MerchantSummary, ApiError> {
        let mut qb = composer::summary_query(merchant_id, filter);
        let row: Option<SummaryRow> = qb
            .build_query_as()
            .fetch_optional(self.portal())
            .await?;

        let summary = match row {
            Some(row) => MerchantSummary {
                merchant_id: row.merchant_id.unwrap_or_else(|| merchant_id.to_string()),
                merchant_name: row.merchant_name.unwrap_or_else(|| "Unknown".to_string()),
                total_transactions: row.total_transactions,
                successful_transactions: row.successful_transactions.unwrap_or(0),
                total_amount: row.total_amount.unwrap_or(0),
                date_from: row.min_date,
                date_to: row.max_date,
                ..Default::default()
            },
            None => MerchantSummary {
                merchant_id: merchant_id.to_string(),
                merchant_name: "Unknown".to_string(),
                ..Default::default()
            },
        };

        Ok(summary.finalize())
    }

    async fn get_merchant(&self, merchant_id: &str) -> Result<Option<Merchant>, ApiError> {
        let merchant = sqlx::query_as::<_, MerchantRow>(
            "SELECT merchant_id, name, is_provisioner, provisioner_id \
             FROM merchants WHERE merchant_id = $1",
        )
        .bind(merchant_id)
        .fetch_optional(self.portal())
        .await?;

        Ok(merchant.map(MerchantRow::into_domain))
    }

    async fn transaction_totals(
        &self,
        merchant_id: &str,
        query: &TotalsQuery,
    ) -> Result<TransactionTotalsReport, ApiError> {
        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
            "SELECT p.payment_tx_type_id, COALESCE(pt.name, 'Unknown') AS type_name, \
             SUM(COALESCE(p.amount, 0))::BIGINT AS total_minor \
             FROM payment_tx_log p \
             LEFT JOIN payment_tx_types pt ON p.payment_tx_type_id = pt.payment_tx_type_id \
             LEFT JOIN merchants m ON p.merchant_id = m.merchant_id \
             WHERE DATE(p.created_at) = ",
        );
        qb.push_bind(query.date);
        qb.push(" AND (m.merchant_id = ");
        qb.push_bind(merchant_id.to_string());
        qb.push(" OR m.provisioner_id = ");
        qb.push_bind(merchant_id.to_string());
        qb.push(")");

        if let Some(device_id) = &query.device_id {
            qb.push(" AND p.device_id = ");
            qb.push_bind(device_id.clone());
        }
        if let Some(terminal_id) = &query.terminal_id {
            qb.push(" AND p.terminal_id = ");
            qb.push_bind(terminal_id.clone());
        }
        if let Some(bank_terminal_id) = &query.bank_terminal_id {
            qb.push(" AND p.bank_terminal_id = ");
            qb.push_bind(bank_terminal_id.clone());
        }
        qb.push(" GROUP BY p.payment_tx_type_id, pt.name ORDER BY p.payment_tx_type_id");

        let rows: Vec<(i32, String, i64)> = qb.build_query_as().fetch_all(self.portal()).await?;

        let totals = rows
            .into_iter()
            .map(|(type_id, type_name, total_minor)| TransactionTotal {
                trx_type: TxType::from_discriminator(type_id).label().to_string(),
                trx_descr: type_name,
                total_amount: total_minor as f64 / 100.0,
            })
            .collect();

        Ok(TransactionTotalsReport {
            date: query.date.format("%Y-%m-%d").to_string(),
            device_id: query.device_id.clone(),
            terminal_id: query.terminal_id.clone(),
            bank_terminal_id: query.bank_terminal_id.clone(),
            totals,
        })
    }

    async fn legacy_totals(
        &self,
        request: &LegacyTotalsRequest,
    ) -> Result<LegacyTotalsReport, ApiError> {
        let pool = self.atlas()?;

        let mut qb: QueryBuilder<'_, sqlx::MySql> = QueryBuilder::new(
            "SELECT TRIM(TRIM(BOTH '\"' FROM JSON_EXTRACT(trx_snd, '$.\"43\"'))) AS trx_descr, \
             CAST(SUM(trx_amt) AS SIGNED) AS total_minor \
             FROM iso_trx \
             WHERE DATE(trx_datetime) = ",
        );
        qb.push_bind(request.date.clone());
        qb.push(" AND trx_rsp_code = '00'");
        if let Some(device_id) = &request.device_id {
            qb.push(" AND TRIM(BOTH '\"' FROM JSON_EXTRACT(trx_snd, '$.\"42\"')) = ");
            qb.push_bind(device_id.clone());
        }
        qb.push(" GROUP BY trx_descr");

        let rows: Vec<(Option<String>, i64)> = qb.build_query_as().fetch_all(pool).await?;

        let totals = rows
            .into_iter()
            .map(|(descr, total_minor)| LegacyTotal {
                trx_descr: descr.unwrap_or_default(),
                total_amount_egp: total_minor as f64 / 100.0,
            })
            .collect();

        Ok(LegacyTotalsReport {
            date: request.date.clone(),
            device_id: request.device_id.clone(),
            totals,
        })
    }

    async fn legacy_search(&self, request: &IsoSearchRequest) -> Result<IsoSearchReport, ApiError> {
        let pool = self.atlas()?;

        let mut qb: QueryBuilder<'_, sqlx::MySql> = QueryBuilder::new(
            "SELECT DATE_FORMAT(trx_datetime, '%Y-%m-%d %H:%i:%s') AS datetime, \
             CAST(trx_stan AS SIGNED) AS stan, \
             COALESCE(trx_rrn, '') AS rrn, \
             LEFT(TRIM(BOTH '\"' FROM JSON_EXTRACT(trx_snd, '$.\"35\"')), 6) AS bin, \
             RIGHT(SUBSTRING_INDEX(SUBSTRING_INDEX(TRIM(BOTH '\"' FROM JSON_EXTRACT(trx_snd, '$.\"35\"')),'=',1),'D',1), 4) AS pan_id, \
             TRIM(TRIM(BOTH '\"' FROM JSON_EXTRACT(trx_snd, '$.\"42\"'))) AS device_id, \
             TRIM(TRIM(BOTH '\"' FROM JSON_EXTRACT(trx_snd, '$.\"41\"'))) AS group_id, \
             TRIM(TRIM(BOTH '\"' FROM JSON_EXTRACT(trx_snd, '$.\"43\"'))) AS trx_descr, \
             TRIM(TRIM(BOTH '\"' FROM JSON_EXTRACT(trx_snd, '$.\"3\"'))) AS trx_type, \
             TRIM(TRIM(BOTH '\"' FROM JSON_EXTRACT(JSON_EXTRACT(trx_snd, '$.\"request_meta\"'), '$.\"bank_group_id\"'))) AS bank_group_id, \
             TRIM(TRIM(BOTH '\"' FROM JSON_EXTRACT(JSON_EXTRACT(trx_snd, '$.\"request_meta\"'), '$.\"transaction_code\"'))) AS transaction_code, \
             TRIM(TRIM(BOTH '\"' FROM JSON_EXTRACT(JSON_EXTRACT(trx_snd, '$.\"request_meta\"'), '$.\"trx_id\"'))) AS tx_id, \
             CAST(trx_amt AS SIGNED) AS amount, \
             trx_rsp_code AS response_code, \
             COALESCE(trx_auth_code, '') AS auth_code \
             FROM iso_trx WHERE 1=1",
        );

        if let Some(date) = non_empty(&request.date) {
            qb.push(" AND DATE(trx_datetime) = ");
            qb.push_bind(date);
        }
        if let Some(device_id) = non_empty(&request.device_id) {
            qb.push(" AND TRIM(BOTH '\"' FROM JSON_EXTRACT(trx_snd, '$.\"42\"')) = ");
            qb.push_bind(device_id);
        }
        if let Some(trx_rrn) = non_empty(&request.trx_rrn) {
            qb.push(" AND trx_rrn = ");
            qb.push_bind(trx_rrn);
        }
        if let Some(amount) = request.amount.filter(|a| *a != 0) {
            qb.push(" AND trx_amt = ");
            qb.push_bind(amount);
        }
        if let Some(pan_id) = non_empty(&request.pan_id) {
            qb.push(
                " AND RIGHT(SUBSTRING_INDEX(SUBSTRING_INDEX(TRIM(BOTH '\"' FROM \
                 JSON_EXTRACT(trx_snd, '$.\"35\"')),'=',1),'D',1), 4) = ",
            );
            qb.push_bind(pan_id);
        }
        if let Some(group_id) = non_empty(&request.group_id) {
            qb.push(" AND TRIM(TRIM(BOTH '\"' FROM JSON_EXTRACT(trx_snd, '$.\"41\"'))) = ");
            qb.push_bind(group_id);
        }
        if let Some(bank_group_id) = non_empty(&request.bank_group_id) {
            qb.push(
                " AND TRIM(TRIM(BOTH '\"' FROM JSON_EXTRACT(JSON_EXTRACT(trx_snd, \
                 '$.\"request_meta\"'), '$.\"bank_group_id\"'))) = ",
            );
            qb.push_bind(bank_group_id);
        }
        if let Some(trx_descr) = non_empty(&request.trx_descr) {
            qb.push(" AND TRIM(TRIM(BOTH '\"' FROM JSON_EXTRACT(trx_snd, '$.\"43\"'))) = ");
            qb.push_bind(trx_descr);
        }
        if let Some(tx_id) = non_empty(&request.tx_id) {
            qb.push(
                " AND TRIM(TRIM(BOTH '\"' FROM JSON_EXTRACT(JSON_EXTRACT(trx_snd, \
                 '$.\"request_meta\"'), '$.\"trx_id\"'))) = ",
            );
            qb.push_bind(tx_id);
        }
        if let Some(response_code) = non_empty(&request.response_code) {
            qb.push(" AND trx_rsp_code = ");
            qb.push_bind(response_code);
        }
        qb.push(" ORDER BY trx_datetime");

        let rows: Vec<IsoRow> = qb.build_query_as().fetch_all(pool).await?;
        Ok(IsoSearchReport {
            transactions: rows.into_iter().map(IsoRow::into_item).collect(),
        })
    }

    fn has_legacy_store(&self) -> bool {
        self.router.has_atlas()
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|v| !v.is_empty()).map(str::to_string)
}

fn decode_rows(rows: &[PgRow], fields: &[String]) -> Result<Vec<Value>, ApiError> {
    rows.iter().map(|row| decode_row(row, fields)).collect()
}

fn decode_row(row: &PgRow, fields: &[String]) -> Result<Value, ApiError> {
    if fields.is_empty() {
        let row = TransactionRow::from_row(row)?;
        Ok(serde_json::to_value(row.into_domain())
            .map_err(|err| ApiError::Internal(err.to_string()))?)
    } else {
        project_row(row, fields)
    }
}

/// Reads an explicitly projected row back out by logical alias, using the
/// catalogue's value kinds.
fn project_row(row: &PgRow, fields: &[String]) -> Result<Value, ApiError> {
    let mut object = Map::new();

    for field in fields {
        let def = catalog::lookup(field).ok_or_else(|| ApiError::InvalidField(field.clone()))?;
        let value = match def.kind {
            ValueKind::Text => row
                .try_get::<Option<String>, _>(def.name)?
                .map(Value::String)
                .unwrap_or(Value::Null),
            ValueKind::Int8 => row
                .try_get::<Option<i64>, _>(def.name)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            ValueKind::Bool => row
                .try_get::<Option<bool>, _>(def.name)?
                .map(Value::Bool)
                .unwrap_or(Value::Null),
            ValueKind::Timestamp => row
                .try_get::<Option<DateTime<Utc>>, _>(def.name)?
                .map(|ts| Value::String(ts.to_rfc3339()))
                .unwrap_or(Value::Null),
            ValueKind::Json => row.try_get::<Option<Value>, _>(def.name)?.unwrap_or(Value::Null),
            ValueKind::Currency => {
                let code: Option<String> = row.try_get("currency_code")?;
                let name: Option<String> = row.try_get("currency_name")?;
                let exponent: Option<i32> = row.try_get("curr_delim")?;
                // The amount column is only present when projected; without
                // it the formatted amount renders zero.
                let amount = row
                    .try_get::<Option<i64>, _>("amount")
                    .ok()
                    .flatten()
                    .unwrap_or(0);
                match code {
                    Some(code) => {
                        let info = CurrencyInfo::new(
                            code,
                            name.unwrap_or_default(),
                            exponent.unwrap_or(0),
                            amount,
                        );
                        serde_json::to_value(info)
                            .map_err(|err| ApiError::Internal(err.to_string()))?
                    }
                    None => Value::Null,
                }
            }
        };
        object.insert(def.name.to_string(), value);
    }

    Ok(Value::Object(object))
}

/// Internal row shape for the full projection. Not exposed outside the
/// repository.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    payment_tx_log_id: String,
    payment_tx_type_id: i32,
    reversed_tx_log_id: Option<String>,
    rrn: String,
    stan: String,
    bin_id: Option<String>,
    pan_id: Option<String>,
    device_id: Option<String>,
    terminal_id: Option<String>,
    merchant_id: Option<String>,
    currency_code: String,
    amount: i64,
    auth_code: Option<String>,
    result_code: Option<String>,
    description: Option<String>,
    completed: bool,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    meta: Option<Value>,
    merchant_name: Option<String>,
    currency_name: Option<String>,
    curr_delim: Option<i32>,
}

impl TransactionRow {
    /// The result assembler: derives the display fields the store does not
    /// carry directly.
    fn into_domain(self) -> Transaction {
        let mut tx = Transaction {
            id: self.payment_tx_log_id,
            payment_tx_type_id: self.payment_tx_type_id,
            reversed_tx_log_id: self.reversed_tx_log_id,
            rrn: self.rrn,
            stan: self.stan,
            bin_id: self.bin_id,
            pan_id: self.pan_id,
            device_id: self.device_id,
            terminal_id: self.terminal_id,
            merchant_id: self.merchant_id,
            currency_code: self.currency_code,
            amount: self.amount,
            auth_code: self.auth_code,
            result_code: self.result_code,
            description: self.description,
            completed: self.completed,
            active: self.active,
            created_at: self.created_at,
            updated_at: self.updated_at,
            meta: self.meta,
            tx_type: String::new(),
            reversed: false,
            merchant_name: self.merchant_name,
            response_code: None,
            pan: None,
            user_ref: None,
            currency_info: None,
        };

        tx.tx_type = TxType::from_discriminator(tx.payment_tx_type_id).label().to_string();
        tx.reversed = tx.is_reversed();
        tx.response_code = tx.result_code.clone();
        tx.user_ref = MetaRef::from_meta(tx.meta.as_ref()).into_option();
        tx.pan = tx.compose_pan();

        if !tx.currency_code.is_empty() {
            tx.currency_info = Some(CurrencyInfo::new(
                tx.currency_code.clone(),
                self.currency_name.unwrap_or_default(),
                self.curr_delim.unwrap_or(0),
                tx.amount,
            ));
        }

        tx
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SummaryRow {
    merchant_id: Option<String>,
    merchant_name: Option<String>,
    total_transactions: i64,
    successful_transactions: Option<i64>,
    total_amount: Option<i64>,
    min_date: Option<DateTime<Utc>>,
    max_date: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct MerchantRow {
    merchant_id: String,
    name: String,
    is_provisioner: bool,
    provisioner_id: Option<String>,
}

impl MerchantRow {
    fn into_domain(self) -> Merchant {
        Merchant {
            merchant_id: self.merchant_id,
            merchant_name: self.name,
            is_provisioner: self.is_provisioner,
            provisioner_id: self.provisioner_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct IsoRow {
    datetime: String,
    stan: i64,
    rrn: String,
    bin: Option<String>,
    pan_id: Option<String>,
    device_id: Option<String>,
    group_id: Option<String>,
    trx_descr: Option<String>,
    trx_type: Option<String>,
    bank_group_id: Option<String>,
    transaction_code: Option<String>,
    tx_id: Option<String>,
    amount: i64,
    response_code: String,
    auth_code: String,
}

impl IsoRow {
    fn into_item(self) -> IsoSearchItem {
        IsoSearchItem {
            datetime: self.datetime,
            stan: self.stan,
            rrn: self.rrn,
            bin: self.bin,
            pan_id: self.pan_id,
            device_id: self.device_id,
            group_id: self.group_id,
            trx_descr: self.trx_descr,
            trx_type: self.trx_type,
            bank_group_id: self.bank_group_id,
            transaction_code: self.transaction_code,
            tx_id: self.tx_id,
            amount: self.amount,
            response_code: self.response_code,
            auth_code: self.auth_code,
        }
    }
}
