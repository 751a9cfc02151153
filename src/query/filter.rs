//! Parser for the filter expression language: whitespace-separated boolean
//! grouping over colon-delimited `field:op:value` comparisons, folded into a
//! normalised filter bag.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::domain::TxType;
use crate::error::ApiError;

/// The closed operator set. Anything else is rejected before a field is even
/// considered.
pub const OPERATORS: &[&str] = &[
    "eq", "ne", "gt", "gte", "lt", "lte", "like", "ilike", "in", "nin", "between", "isnull",
    "isnotnull",
];

/// Normalised output of the parser; constructed per request and discarded
/// with the response.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TransactionFilter {
    pub merchant_id: Option<String>,
    pub device_id: Option<String>,
    pub response_code: Option<String>,
    pub currency_code: Option<String>,
    pub tx_type_id: Option<i32>,
    pub amount_min: Option<i64>,
    pub amount_max: Option<i64>,
    pub datetime_from: Option<DateTime<Utc>>,
    pub datetime_to: Option<DateTime<Utc>>,
}

impl TransactionFilter {
    pub fn is_empty(&self) -> bool {
        *self == TransactionFilter::default()
    }

    /// Canonical parameter list for cache keying. Sorted by name so the
    /// derived key is stable across construction orders.
    pub fn cache_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(v) = &self.merchant_id {
            params.push(("merchant_id".to_string(), v.clone()));
        }
        if let Some(v) = &self.device_id {
            params.push(("device_id".to_string(), v.clone()));
        }
        if let Some(v) = &self.response_code {
            params.push(("response_code".to_string(), v.clone()));
        }
        if let Some(v) = &self.currency_code {
            params.push(("currency_code".to_string(), v.clone()));
        }
        if let Some(v) = self.tx_type_id {
            params.push(("tx_type_id".to_string(), v.to_string()));
        }
        if let Some(v) = self.amount_min {
            params.push(("amount_min".to_string(), v.to_string()));
        }
        if let Some(v) = self.amount_max {
            params.push(("amount_max".to_string(), v.to_string()));
        }
        if let Some(v) = self.datetime_from {
            params.push(("datetime_from".to_string(), v.to_rfc3339()));
        }
        if let Some(v) = self.datetime_to {
            params.push(("datetime_to".to_string(), v.to_rfc3339()));
        }
        params.sort();
        params
    }
}

/// Parses a filter expression. An empty input yields the empty filter.
pub fn parse(input: &str) -> Result<TransactionFilter, ApiError> {
    let mut filter = TransactionFilter::default();
    let input = input.trim();
    if input.is_empty() {
        return Ok(filter);
    }
    parse_conditions(input, &mut filter)?;
    Ok(filter)
}

fn parse_conditions(input: &str, filter: &mut TransactionFilter) -> Result<(), ApiError> {
    for conjunct in split_at_depth_zero(input, " AND ") {
        let conjunct = conjunct.trim();
        if conjunct.is_empty() {
            continue;
        }
        for alternative in split_at_depth_zero(conjunct, " OR ") {
            let alternative = alternative.trim();
            if alternative.is_empty() {
                continue;
            }
            if alternative.starts_with('(') && alternative.ends_with(')') {
                parse_conditions(&alternative[1..alternative.len() - 1], filter)?;
            } else {
                parse_condition(alternative, filter)?;
            }
        }
    }
    Ok(())
}

/// Splits on the delimiter only where the parenthesis depth is zero, so
/// grouped sub-expressions survive intact.
fn split_at_depth_zero<'a>(input: &'a str, delimiter: &str) -> Vec<&'a str> {
    let bytes = input.as_bytes();
    let delim = delimiter.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            _ if depth == 0 && bytes[i..].starts_with(delim) => {
                parts.push(&input[start..i]);
                i += delim.len();
                start = i;
            }
            _ => i += 1,
        }
    }
    parts.push(&input[start..]);
    parts
}

fn parse_condition(condition: &str, filter: &mut TransactionFilter) -> Result<(), ApiError> {
    // The value may itself contain colons; reassemble after the second one.
    let mut parts = condition.splitn(3, ':');
    let (field, operator, value) = match (parts.next(), parts.next(), parts.next()) {
        (Some(field), Some(operator), Some(value)) => (field, operator, value),
        _ => {
            return Err(ApiError::InvalidFilter(format!(
                "invalid filter condition: {}",
                condition
            )))
        }
    };

    if !OPERATORS.contains(&operator) {
        return Err(ApiError::InvalidFilter(format!(
            "invalid operator '{}' for field '{}'",
            operator, field
        )));
    }

    match field {
        "merchant_id" => filter.merchant_id = Some(eq_only(field, operator, value)?),
        "device_id" => filter.device_id = Some(eq_only(field, operator, value)?),
        "response_code" => filter.response_code = Some(eq_only(field, operator, value)?),
        "currency_code" => filter.currency_code = Some(eq_only(field, operator, value)?),
        "tx_log_type" => {
            let label = eq_only(field, operator, value)?;
            filter.tx_type_id = Some(TxType::discriminator_for_label(&label).ok_or_else(|| {
                ApiError::InvalidFilter(format!("unknown transaction type '{}'", label))
            })?);
        }
        "amount" => parse_amount_condition(operator, value, filter)?,
        "tx_date_time" => parse_date_condition(operator, value, filter)?,
        _ => {
            return Err(ApiError::InvalidFilter(format!(
                "unsupported filter field: {}",
                field
            )))
        }
    }

    Ok(())
}

fn eq_only(field: &str, operator: &str, value: &str) -> Result<String, ApiError> {
    if operator != "eq" {
        return Err(unsupported_pairing(field, operator));
    }
    Ok(value.to_string())
}

fn unsupported_pairing(field: &str, operator: &str) -> ApiError {
    ApiError::InvalidFilter(format!(
        "operator '{}' is not supported for field '{}'",
        operator, field
    ))
}

fn parse_amount_condition(
    operator: &str,
    value: &str,
    filter: &mut TransactionFilter,
) -> Result<(), ApiError> {
    match operator {
        "eq" => {
            let amount = parse_amount(value)?;
            filter.amount_min = Some(amount);
            filter.amount_max = Some(amount);
        }
        "gte" => filter.amount_min = Some(parse_amount(value)?),
        "lte" => filter.amount_max = Some(parse_amount(value)?),
        "between" => {
            let (low, high) = split_pair(value, "amount")?;
            filter.amount_min = Some(parse_amount(low.trim())?);
            filter.amount_max = Some(parse_amount(high.trim())?);
        }
        _ => return Err(unsupported_pairing("amount", operator)),
    }
    Ok(())
}

/// Dotted values are decimals in major units, scaled by 100; plain integers
/// are already minor units.
fn parse_amount(value: &str) -> Result<i64, ApiError> {
    let invalid = || ApiError::InvalidFilter(format!("invalid amount value: {}", value));
    if value.contains('.') {
        let amount: f64 = value.parse().map_err(|_| invalid())?;
        Ok((amount * 100.0).round() as i64)
    } else {
        value.parse().map_err(|_| invalid())
    }
}

fn parse_date_condition(
    operator: &str,
    value: &str,
    filter: &mut TransactionFilter,
) -> Result<(), ApiError> {
    match operator {
        "gte" => filter.datetime_from = Some(parse_datetime(value)?.0),
        "lte" => {
            let (date, date_only) = parse_datetime(value)?;
            filter.datetime_to = Some(if date_only { end_of_day(date) } else { date });
        }
        "between" => {
            let (from, to) = split_pair(value, "tx_date_time")?;
            filter.datetime_from = Some(parse_datetime(from.trim())?.0);
            let (date, date_only) = parse_datetime(to.trim())?;
            filter.datetime_to = Some(if date_only { end_of_day(date) } else { date });
        }
        _ => return Err(unsupported_pairing("tx_date_time", operator)),
    }
    Ok(())
}

fn split_pair<'a>(value: &'a str, field: &str) -> Result<(&'a str, &'a str), ApiError> {
    let mut parts = value.splitn(2, ',');
    match (parts.next(), parts.next()) {
        (Some(low), Some(high)) if !low.trim().is_empty() && !high.trim().is_empty() => {
            Ok((low, high))
        }
        _ => Err(ApiError::InvalidFilter(format!(
            "between operator for '{}' requires two comma-separated values",
            field
        ))),
    }
}

/// Accepted datetime shapes, tried in order. Naive values are taken as UTC.
/// The boolean marks date-only values so upper bounds can be widened to the
/// end of the day.
fn parse_datetime(value: &str) -> Result<(DateTime<Utc>, bool), ApiError> {
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Ok((date.with_timezone(&Utc), false));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok((naive.and_utc(), false));
        }
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Ok((date.and_time(NaiveTime::MIN).and_utc(), true));
        }
    }
    Err(ApiError::InvalidFilter(format!(
        "invalid date format: {}",
        value
    )))
}

/// Last representable instant of the day, so `lte:<date>` includes the whole
/// day.
fn end_of_day(midnight: DateTime<Utc>) -> DateTime<Utc> {
    midnight + Duration::days(1) - Duration::nanoseconds(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn empty_input_yields_empty_filter() {
        let filter = parse("").unwrap();
        assert!(filter.is_empty());
        assert!(parse("   ").unwrap().is_empty());
    }

    #[test]
    fn parses_conjunction_of_comparisons() {
        let filter = parse("response_code:eq:00 AND amount:gte:1000").unwrap();
        assert_eq!(filter.response_code.as_deref(), Some("00"));
        assert_eq!(filter.amount_min, Some(1000));
        assert_eq!(filter.amount_max, None);
    }

    #[test]
    fn value_may_contain_colons() {
        let filter = parse("tx_date_time:gte:2024-01-01T10:30:00").unwrap();
        assert_eq!(
            filter.datetime_from,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap())
        );
    }

    #[test]
    fn date_between_extends_upper_bound_to_end_of_day() {
        let filter = parse("tx_date_time:between:2024-01-01,2024-12-31").unwrap();
        assert_eq!(
            filter.datetime_from,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        let to = filter.datetime_to.unwrap();
        assert_eq!(to.to_rfc3339(), "2024-12-31T23:59:59.999999999+00:00");
    }

    #[test]
    fn date_lte_with_full_timestamp_is_not_extended() {
        let filter = parse("tx_date_time:lte:2024-12-31 12:00:00").unwrap();
        assert_eq!(
            filter.datetime_to,
            Some(Utc.with_ymd_and_hms(2024, 12, 31, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn slash_date_formats_are_accepted() {
        let filter = parse("tx_date_time:gte:2024/06/15 08:00:00 AND tx_date_time:lte:2024/06/16").unwrap();
        assert_eq!(
            filter.datetime_from,
            Some(Utc.with_ymd_and_hms(2024, 6, 15, 8, 0, 0).unwrap())
        );
        assert_eq!(
            filter.datetime_to.unwrap().to_rfc3339(),
            "2024-06-16T23:59:59.999999999+00:00"
        );
    }

    #[test]
    fn decimal_amounts_scale_to_minor_units() {
        let filter = parse("amount:between:10.50,99.99").unwrap();
        assert_eq!(filter.amount_min, Some(1050));
        assert_eq!(filter.amount_max, Some(9999));
    }

    #[test]
    fn amount_eq_pins_both_bounds() {
        let filter = parse("amount:eq:250").unwrap();
        assert_eq!(filter.amount_min, Some(250));
        assert_eq!(filter.amount_max, Some(250));
    }

    #[test]
    fn like_on_amount_is_an_unsupported_pairing() {
        let err = parse("amount:like:100").unwrap_err();
        assert_eq!(err.code(), "INVALID_FILTER");
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = parse("amount:foo:100").unwrap_err();
        assert_eq!(err.code(), "INVALID_FILTER");
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = parse("mystery_field:eq:x").unwrap_err();
        assert_eq!(err.code(), "INVALID_FILTER");
        assert!(err.to_string().contains("mystery_field"));
    }

    #[test]
    fn malformed_condition_is_rejected() {
        assert!(parse("response_code").is_err());
        assert!(parse("response_code:eq").is_err());
    }

    #[test]
    fn unknown_type_label_is_rejected() {
        let err = parse("tx_log_type:eq:chargeback").unwrap_err();
        assert_eq!(err.code(), "INVALID_FILTER");
    }

    #[test]
    fn type_label_maps_to_discriminator() {
        let filter = parse("tx_log_type:eq:mm purchase").unwrap();
        assert_eq!(filter.tx_type_id, Some(9));
    }

    #[test]
    fn bad_amount_and_bad_date_are_rejected() {
        assert!(parse("amount:gte:ten").is_err());
        assert!(parse("amount:gte:1.2.3").is_err());
        assert!(parse("tx_date_time:gte:yesterday").is_err());
        assert!(parse("tx_date_time:between:2024-01-01").is_err());
    }

    #[test]
    fn parenthesised_group_splits_on_or_only() {
        let filter = parse(
            "(tx_log_type:eq:payment OR tx_log_type:eq:refund) AND amount:lte:5000",
        )
        .unwrap();
        // The bag keeps the last alternative; the amount bound comes from
        // outside the group.
        assert_eq!(filter.tx_type_id, Some(3));
        assert_eq!(filter.amount_max, Some(5000));
    }

    #[test]
    fn and_inside_parentheses_does_not_split_the_group() {
        let parts = split_at_depth_zero("(a AND b) AND c", " AND ");
        assert_eq!(parts, vec!["(a AND b)", "c"]);

        let parts = split_at_depth_zero("a OR (b OR c)", " OR ");
        assert_eq!(parts, vec!["a", "(b OR c)"]);
    }

    #[test]
    fn cache_params_are_sorted_and_stable() {
        let filter = parse("response_code:eq:00 AND amount:gte:100 AND amount:lte:900").unwrap();
        let params = filter.cache_params();
        assert_eq!(
            params,
            vec![
                ("amount_max".to_string(), "900".to_string()),
                ("amount_min".to_string(), "100".to_string()),
                ("response_code".to_string(), "00".to_string()),
            ]
        );
    }
}
