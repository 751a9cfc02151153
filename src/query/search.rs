//! Advanced-search request body: a small subset of an Elasticsearch-like
//! query shape (`bool.must` of `term` and `range` clauses) folded into the
//! same normalised filter bag the list endpoint uses. Unrecognised clauses
//! are ignored.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::query::filter::TransactionFilter;
use crate::query::sort::{self, Direction, SortKey};

#[derive(Debug, Default, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Option<Value>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub sort: Vec<SortTerm>,
    #[serde(default)]
    pub pagination: PaginationBody,
    #[serde(default)]
    pub aggregations: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct SortTerm {
    pub field: String,
    #[serde(default)]
    pub direction: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaginationBody {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Converts the query body into a filter. `term` clauses over `merchant_id`
/// and `response_code` and `range` clauses over `amount` are honoured.
pub fn filter_from_query(query: Option<&Value>) -> TransactionFilter {
    let mut filter = TransactionFilter::default();

    let clauses = query
        .and_then(|q| q.get("bool"))
        .and_then(|b| b.get("must"))
        .and_then(Value::as_array);

    if let Some(clauses) = clauses {
        for clause in clauses {
            apply_clause(clause, &mut filter);
        }
    }
    filter
}

fn apply_clause(clause: &Value, filter: &mut TransactionFilter) {
    if let Some(term) = clause.get("term").and_then(Value::as_object) {
        for (field, value) in term {
            match (field.as_str(), value.as_str()) {
                ("merchant_id", Some(v)) => filter.merchant_id = Some(v.to_string()),
                ("response_code", Some(v)) => filter.response_code = Some(v.to_string()),
                _ => {}
            }
        }
    }

    if let Some(range) = clause.get("range").and_then(Value::as_object) {
        if let Some(amount) = range.get("amount").and_then(Value::as_object) {
            if let Some(gte) = amount.get("gte").and_then(Value::as_i64) {
                filter.amount_min = Some(gte);
            }
            if let Some(lte) = amount.get("lte").and_then(Value::as_i64) {
                filter.amount_max = Some(lte);
            }
        }
    }
}

/// Validates body sort terms against the same rules as the query-string
/// parser. Empty input falls back to the default sort.
pub fn sort_keys(terms: &[SortTerm]) -> Result<Vec<SortKey>, ApiError> {
    if terms.is_empty() {
        return Ok(sort::default_sort());
    }

    let mut keys = Vec::with_capacity(terms.len());
    for term in terms {
        let direction = match term.direction.as_deref() {
            None | Some("") | Some("asc") => Direction::Asc,
            Some("desc") => Direction::Desc,
            Some(other) => {
                return Err(ApiError::InvalidSort(format!(
                    "invalid sort direction '{}' for field '{}'",
                    other, term.field
                )))
            }
        };
        keys.push(SortKey {
            field: term.field.clone(),
            direction,
        });
    }
    sort::validate_keys(&keys)?;
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_term_and_range_clauses() {
        let query = json!({
            "bool": {
                "must": [
                    {"term": {"merchant_id": "m-1"}},
                    {"term": {"response_code": "00"}},
                    {"range": {"amount": {"gte": 100, "lte": 900}}}
                ]
            }
        });
        let filter = filter_from_query(Some(&query));
        assert_eq!(filter.merchant_id.as_deref(), Some("m-1"));
        assert_eq!(filter.response_code.as_deref(), Some("00"));
        assert_eq!(filter.amount_min, Some(100));
        assert_eq!(filter.amount_max, Some(900));
    }

    #[test]
    fn unrecognised_clauses_are_ignored() {
        let query = json!({
            "bool": {
                "must": [
                    {"match": {"description": "coffee"}},
                    {"term": {"currency_code": "710"}},
                    {"range": {"updated_at": {"gte": "2024-01-01"}}}
                ]
            }
        });
        let filter = filter_from_query(Some(&query));
        assert!(filter.is_empty());
    }

    #[test]
    fn missing_query_yields_empty_filter() {
        assert!(filter_from_query(None).is_empty());
        assert!(filter_from_query(Some(&json!({"match_all": {}}))).is_empty());
    }

    #[test]
    fn request_body_deserialises_with_defaults() {
        let request: SearchRequest = serde_json::from_value(json!({
            "query": {"bool": {"must": []}},
            "pagination": {"page": 2, "limit": 25},
            "aggregations": {"total_amount": {}, "avg_amount": {}}
        }))
        .unwrap();
        assert_eq!(request.pagination.page, Some(2));
        assert_eq!(request.pagination.limit, Some(25));
        assert!(request.fields.is_empty());
        assert_eq!(request.aggregations.unwrap().len(), 2);
    }

    #[test]
    fn body_sort_terms_are_validated() {
        let keys = sort_keys(&[SortTerm {
            field: "amount".to_string(),
            direction: Some("desc".to_string()),
        }])
        .unwrap();
        assert_eq!(keys[0].direction, Direction::Desc);

        let err = sort_keys(&[SortTerm {
            field: "amount".to_string(),
            direction: Some("sideways".to_string()),
        }])
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_SORT");

        let err = sort_keys(&[SortTerm {
            field: "mystery".to_string(),
            direction: None,
        }])
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_SORT");
    }

    #[test]
    fn empty_sort_falls_back_to_default() {
        let keys = sort_keys(&[]).unwrap();
        assert_eq!(keys[0].field, "tx_date_time");
    }
}
