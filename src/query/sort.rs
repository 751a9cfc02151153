//! Parser for the sort specification: comma-separated `field[:dir]` pairs
//! validated against the catalogue's sortable whitelist.

use crate::error::ApiError;
use crate::query::catalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

/// Default ordering when the caller supplies none: newest update first.
pub fn default_sort() -> Vec<SortKey> {
    vec![SortKey {
        field: "tx_date_time".to_string(),
        direction: Direction::Desc,
    }]
}

pub fn parse(input: &str) -> Result<Vec<SortKey>, ApiError> {
    if input.trim().is_empty() {
        return Ok(default_sort());
    }

    let mut keys = Vec::new();
    for term in input.split(',') {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }

        let mut parts = term.splitn(2, ':');
        let field = parts.next().unwrap_or_default();
        let direction = match parts.next() {
            None | Some("") => Direction::Asc,
            Some(dir) => match dir.to_lowercase().as_str() {
                "asc" => Direction::Asc,
                "desc" => Direction::Desc,
                other => {
                    return Err(ApiError::InvalidSort(format!(
                        "invalid sort direction '{}' for field '{}'",
                        other, field
                    )))
                }
            },
        };

        if !catalog::is_sortable(field) {
            return Err(ApiError::InvalidSort(format!("invalid sort field: {}", field)));
        }

        keys.push(SortKey {
            field: field.to_string(),
            direction,
        });
    }

    if keys.is_empty() {
        return Ok(default_sort());
    }
    Ok(keys)
}

/// Validates sort keys arriving pre-structured (the search body) against the
/// same whitelist as the string parser.
pub fn validate_keys(keys: &[SortKey]) -> Result<(), ApiError> {
    for key in keys {
        if !catalog::is_sortable(&key.field) {
            return Err(ApiError::InvalidSort(format!("invalid sort field: {}", key.field)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_default_descending_update_sort() {
        let keys = parse("").unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].field, "tx_date_time");
        assert_eq!(keys[0].direction, Direction::Desc);
    }

    #[test]
    fn direction_defaults_to_asc() {
        let keys = parse("amount").unwrap();
        assert_eq!(keys[0].direction, Direction::Asc);
    }

    #[test]
    fn parses_multiple_terms() {
        let keys = parse("tx_date_time:desc, amount:asc ,rrn").unwrap();
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0].field, "tx_date_time");
        assert_eq!(keys[0].direction, Direction::Desc);
        assert_eq!(keys[1].field, "amount");
        assert_eq!(keys[2].field, "rrn");
        assert_eq!(keys[2].direction, Direction::Asc);
    }

    #[test]
    fn rejects_unknown_direction() {
        let err = parse("amount:sideways").unwrap_err();
        assert_eq!(err.code(), "INVALID_SORT");
    }

    #[test]
    fn rejects_unknown_field() {
        let err = parse("mystery_field:asc").unwrap_err();
        assert_eq!(err.code(), "INVALID_SORT");
    }

    #[test]
    fn rejects_non_sortable_field() {
        let err = parse("currency_info").unwrap_err();
        assert_eq!(err.code(), "INVALID_SORT");
    }

    #[test]
    fn validates_structured_keys() {
        let keys = vec![SortKey {
            field: "amount".to_string(),
            direction: Direction::Desc,
        }];
        assert!(validate_keys(&keys).is_ok());

        let bad = vec![SortKey {
            field: "nope".to_string(),
            direction: Direction::Asc,
        }];
        assert!(validate_keys(&bad).is_err());
    }
}
