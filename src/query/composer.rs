//! Composes the parameterised list/count/single/summary statements for the
//! portal store from a parsed filter, sort, projection and caller scope.
//! User values only ever enter through bound parameters; the SQL text is
//! assembled exclusively from catalogue expressions.

use sqlx::{Postgres, QueryBuilder};

use crate::error::ApiError;
use crate::query::catalog::{self, QueryOptions, SqlExpr};
use crate::query::filter::TransactionFilter;
use crate::query::sort::SortKey;
use crate::query::Pagination;

/// Projection used when the caller does not narrow the field list: the full
/// row plus the joined merchant and currency columns.
pub const FULL_PROJECTION: &str = "p.payment_tx_log_id, p.payment_tx_type_id, \
p.reversed_tx_log_id, p.rrn, p.stan, p.bin_id, p.pan_id, p.device_id, p.terminal_id, \
p.merchant_id, p.currency_code, p.amount, p.auth_code, p.result_code, p.description, \
p.completed, p.active, p.created_at, p.updated_at, p.meta, \
m.name AS merchant_name, c.curr_short AS currency_name, c.curr_delim";

const MERCHANT_JOIN: &str = " FROM payment_tx_log p \
LEFT JOIN merchants m ON p.merchant_id = m.merchant_id";
const CURRENCY_JOIN: &str = " LEFT JOIN currency c ON p.currency_code = c.curr_code";

const TX_DATE_TIME_FORMAT: &str = "'YYYY-MM-DD\"T\"HH24:MI:SS.MS\"Z\"'";

#[derive(Debug)]
pub struct ComposeInput<'a> {
    pub merchant_id: &'a str,
    pub filter: &'a TransactionFilter,
    pub fields: &'a [String],
    pub sort: &'a [SortKey],
    pub pagination: Pagination,
    pub options: &'a QueryOptions,
}

/// List statement: `DISTINCT ON` the transaction id, scoped, filtered,
/// ordered and paginated.
pub fn list_query(input: &ComposeInput<'_>) -> Result<QueryBuilder<'static, Postgres>, ApiError> {
    let mut qb = QueryBuilder::new("SELECT DISTINCT ON (p.payment_tx_log_id) ");
    push_projection(&mut qb, input.fields, input.options)?;
    push_joins(&mut qb, needs_currency_join(input.fields));
    push_scope(&mut qb, input.merchant_id);
    push_filters(&mut qb, input.filter);
    push_order_by(&mut qb, input.sort)?;

    qb.push(" LIMIT ");
    qb.push_bind(input.pagination.limit);
    qb.push(" OFFSET ");
    qb.push_bind(input.pagination.offset());
    Ok(qb)
}

/// Count twin of the list statement: same joins and predicates, nothing
/// else.
pub fn count_query(
    merchant_id: &str,
    filter: &TransactionFilter,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*)");
    push_joins(&mut qb, true);
    push_scope(&mut qb, merchant_id);
    push_filters(&mut qb, filter);
    qb
}

/// Single-record statement: the list shape pinned to one transaction id.
pub fn single_query(
    merchant_id: &str,
    transaction_id: &str,
    fields: &[String],
    options: &QueryOptions,
) -> Result<QueryBuilder<'static, Postgres>, ApiError> {
    let mut qb = QueryBuilder::new("SELECT DISTINCT ON (p.payment_tx_log_id) ");
    push_projection(&mut qb, fields, options)?;
    push_joins(&mut qb, needs_currency_join(fields));
    push_scope(&mut qb, merchant_id);
    qb.push(" AND p.payment_tx_log_id = ");
    qb.push_bind(transaction_id.to_string());
    qb.push(" ORDER BY p.payment_tx_log_id LIMIT 1");
    Ok(qb)
}

/// Aggregate statement behind the merchant summary. Success is a result
/// code of 00 or 10.
pub fn summary_query(
    merchant_id: &str,
    filter: &TransactionFilter,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(
        "SELECT m.merchant_id, m.name AS merchant_name, \
         COUNT(*)::BIGINT AS total_transactions, \
         SUM(CASE WHEN p.result_code IN ('00', '10') THEN 1 ELSE 0 END)::BIGINT AS successful_transactions, \
         SUM(COALESCE(p.amount, 0))::BIGINT AS total_amount, \
         MIN(p.updated_at) AS min_date, \
         MAX(p.updated_at) AS max_date",
    );
    push_joins(&mut qb, false);
    push_scope(&mut qb, merchant_id);
    push_filters(&mut qb, filter);
    qb.push(" GROUP BY m.merchant_id, m.name");
    qb
}

fn needs_currency_join(fields: &[String]) -> bool {
    if fields.is_empty() {
        return true;
    }
    fields
        .iter()
        .filter_map(|field| catalog::lookup(field))
        .any(|def| def.needs_currency_join)
}

fn push_projection(
    qb: &mut QueryBuilder<'static, Postgres>,
    fields: &[String],
    options: &QueryOptions,
) -> Result<(), ApiError> {
    if fields.is_empty() {
        qb.push(FULL_PROJECTION);
        return Ok(());
    }

    let mut first = true;
    for field in fields {
        let def = catalog::lookup(field).ok_or_else(|| ApiError::InvalidField(field.clone()))?;
        if !first {
            qb.push(", ");
        }
        first = false;

        // currency_info expands to the code plus the joined currency columns.
        if def.name == "currency_info" {
            qb.push("p.currency_code, c.curr_short AS currency_name, c.curr_delim");
            continue;
        }

        match def.expr {
            SqlExpr::Col(col) => {
                qb.push(col);
                qb.push(" AS ");
                qb.push(def.name);
            }
            SqlExpr::Computed(sql) => {
                qb.push(sql);
                qb.push(" AS ");
                qb.push(def.name);
            }
            SqlExpr::TxDateTime => {
                qb.push("TO_CHAR(TIMEZONE(");
                qb.push_bind(options.timezone.clone());
                qb.push(", p.updated_at), ");
                qb.push(TX_DATE_TIME_FORMAT);
                qb.push(") AS tx_date_time");
            }
            SqlExpr::Pan => {
                qb.push(options.pan_format.sql());
                qb.push(" AS pan");
            }
        }
    }
    Ok(())
}

fn push_joins(qb: &mut QueryBuilder<'static, Postgres>, with_currency: bool) {
    qb.push(MERCHANT_JOIN);
    if with_currency {
        qb.push(CURRENCY_JOIN);
    }
}

/// Scope confinement: every statement starts its WHERE clause with the
/// caller's merchant-or-provisioner predicate.
fn push_scope(qb: &mut QueryBuilder<'static, Postgres>, merchant_id: &str) {
    qb.push(" WHERE (m.merchant_id = ");
    qb.push_bind(merchant_id.to_string());
    qb.push(" OR m.provisioner_id = ");
    qb.push_bind(merchant_id.to_string());
    qb.push(")");
}

fn push_filters(qb: &mut QueryBuilder<'static, Postgres>, filter: &TransactionFilter) {
    if let Some(merchant_id) = &filter.merchant_id {
        qb.push(" AND p.merchant_id = ");
        qb.push_bind(merchant_id.clone());
    }
    if let Some(device_id) = &filter.device_id {
        qb.push(" AND p.device_id = ");
        qb.push_bind(device_id.clone());
    }
    if let Some(response_code) = &filter.response_code {
        qb.push(" AND p.result_code = ");
        qb.push_bind(response_code.clone());
    }
    if let Some(currency_code) = &filter.currency_code {
        qb.push(" AND p.currency_code = ");
        qb.push_bind(currency_code.clone());
    }
    if let Some(tx_type_id) = filter.tx_type_id {
        qb.push(" AND p.payment_tx_type_id = ");
        qb.push_bind(tx_type_id);
    }
    if let Some(amount_min) = filter.amount_min {
        qb.push(" AND p.amount >= ");
        qb.push_bind(amount_min);
    }
    if let Some(amount_max) = filter.amount_max {
        qb.push(" AND p.amount <= ");
        qb.push_bind(amount_max);
    }
    if let Some(datetime_from) = filter.datetime_from {
        qb.push(" AND p.updated_at >= ");
        qb.push_bind(datetime_from);
    }
    if let Some(datetime_to) = filter.datetime_to {
        qb.push(" AND p.updated_at <= ");
        qb.push_bind(datetime_to);
    }
}

/// `DISTINCT ON` requires the ordering to lead with the distinct column;
/// user sort terms follow it.
fn push_order_by(
    qb: &mut QueryBuilder<'static, Postgres>,
    sort: &[SortKey],
) -> Result<(), ApiError> {
    qb.push(" ORDER BY p.payment_tx_log_id");
    if sort.is_empty() {
        qb.push(", p.updated_at DESC");
        return Ok(());
    }
    for key in sort {
        let expr = catalog::sort_expr(&key.field)
            .ok_or_else(|| ApiError::InvalidSort(format!("invalid sort field: {}", key.field)))?;
        qb.push(", ");
        qb.push(expr);
        qb.push(" ");
        qb.push(key.direction.as_sql());
    }
    Ok(())
}
