//! Registry of the logical fields callers may project, filter and sort by,
//! and their SQL renderings on the portal dialect. The catalogue is the
//! single source of truth for field validity: a name absent here is an
//! invalid field.

use crate::error::ApiError;

/// How the projected column decodes from a result row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Int8,
    Bool,
    Timestamp,
    Json,
    /// Expands to `currency_code`, `currency_name` and `curr_delim` and is
    /// reassembled into a currency object.
    Currency,
}

/// The SQL shape of a catalogue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlExpr {
    /// A plain column reference.
    Col(&'static str),
    /// A self-contained computed expression.
    Computed(&'static str),
    /// Update timestamp rendered in the caller's timezone; the timezone is
    /// always a bound parameter.
    TxDateTime,
    /// Masked card display per the caller's PAN format.
    Pan,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub expr: SqlExpr,
    pub kind: ValueKind,
    pub sortable: bool,
    pub needs_currency_join: bool,
}

pub const TX_LOG_TYPE_CASE: &str = "CASE WHEN p.payment_tx_type_id = 0 THEN 'payment' \
WHEN p.payment_tx_type_id = 1 THEN 'reversal' \
WHEN p.payment_tx_type_id = 2 THEN 'void' \
WHEN p.payment_tx_type_id = 3 THEN 'refund' \
WHEN p.payment_tx_type_id = 9 THEN 'mm purchase' \
WHEN p.payment_tx_type_id = 10 THEN 'mm refund' \
ELSE 'unknown' END";

pub const REVERSED_CASE: &str =
    "CASE WHEN p.reversed_tx_log_id IS NOT NULL THEN true ELSE false END";

pub const FIELDS: &[FieldDef] = &[
    FieldDef { name: "tx_log_id", expr: SqlExpr::Col("p.payment_tx_log_id"), kind: ValueKind::Text, sortable: true, needs_currency_join: false },
    FieldDef { name: "tx_log_type", expr: SqlExpr::Computed(TX_LOG_TYPE_CASE), kind: ValueKind::Text, sortable: true, needs_currency_join: false },
    FieldDef { name: "tx_date_time", expr: SqlExpr::TxDateTime, kind: ValueKind::Text, sortable: true, needs_currency_join: false },
    FieldDef { name: "amount", expr: SqlExpr::Col("p.amount"), kind: ValueKind::Int8, sortable: true, needs_currency_join: false },
    FieldDef { name: "merchant_id", expr: SqlExpr::Col("m.merchant_id"), kind: ValueKind::Text, sortable: true, needs_currency_join: false },
    FieldDef { name: "merchant_name", expr: SqlExpr::Col("m.name"), kind: ValueKind::Text, sortable: true, needs_currency_join: false },
    FieldDef { name: "device_id", expr: SqlExpr::Col("p.device_id"), kind: ValueKind::Text, sortable: true, needs_currency_join: false },
    FieldDef { name: "terminal_id", expr: SqlExpr::Col("p.terminal_id"), kind: ValueKind::Text, sortable: true, needs_currency_join: false },
    FieldDef { name: "response_code", expr: SqlExpr::Col("p.result_code"), kind: ValueKind::Text, sortable: true, needs_currency_join: false },
    FieldDef { name: "auth_code", expr: SqlExpr::Col("p.auth_code"), kind: ValueKind::Text, sortable: true, needs_currency_join: false },
    FieldDef { name: "rrn", expr: SqlExpr::Col("p.rrn"), kind: ValueKind::Text, sortable: true, needs_currency_join: false },
    FieldDef { name: "stan", expr: SqlExpr::Col("p.stan"), kind: ValueKind::Text, sortable: true, needs_currency_join: false },
    FieldDef { name: "pan", expr: SqlExpr::Pan, kind: ValueKind::Text, sortable: true, needs_currency_join: false },
    FieldDef { name: "reversed", expr: SqlExpr::Computed(REVERSED_CASE), kind: ValueKind::Bool, sortable: true, needs_currency_join: false },
    FieldDef { name: "user_ref", expr: SqlExpr::Computed("p.meta->>'reference'"), kind: ValueKind::Text, sortable: true, needs_currency_join: false },
    FieldDef { name: "meta", expr: SqlExpr::Col("p.meta"), kind: ValueKind::Json, sortable: true, needs_currency_join: false },
    FieldDef { name: "currency_code", expr: SqlExpr::Col("p.currency_code"), kind: ValueKind::Text, sortable: true, needs_currency_join: false },
    FieldDef { name: "currency_info", expr: SqlExpr::Col("p.currency_code"), kind: ValueKind::Currency, sortable: false, needs_currency_join: true },
    FieldDef { name: "description", expr: SqlExpr::Col("p.description"), kind: ValueKind::Text, sortable: true, needs_currency_join: false },
    FieldDef { name: "created_at", expr: SqlExpr::Col("p.created_at"), kind: ValueKind::Timestamp, sortable: true, needs_currency_join: false },
    FieldDef { name: "updated_at", expr: SqlExpr::Col("p.updated_at"), kind: ValueKind::Timestamp, sortable: true, needs_currency_join: false },
];

pub fn lookup(name: &str) -> Option<&'static FieldDef> {
    FIELDS.iter().find(|field| field.name == name)
}

pub fn is_sortable(name: &str) -> bool {
    lookup(name).map(|field| field.sortable).unwrap_or(false)
}

/// Expression a sort term orders by. `tx_date_time` sorts on the raw
/// timestamp, not its formatted rendering, so index order is preserved.
pub fn sort_expr(name: &str) -> Option<&'static str> {
    let field = lookup(name)?;
    if !field.sortable {
        return None;
    }
    Some(match field.expr {
        SqlExpr::Col(col) => col,
        SqlExpr::Computed(sql) => sql,
        SqlExpr::TxDateTime => "p.updated_at",
        SqlExpr::Pan => PanFormat::BinAndPan.sql(),
    })
}

/// Rejects any requested field name that the catalogue does not register.
pub fn validate_fields(fields: &[String]) -> Result<(), ApiError> {
    for field in fields {
        if lookup(field).is_none() {
            return Err(ApiError::InvalidField(field.clone()));
        }
    }
    Ok(())
}

/// Closed set of masked card renderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanFormat {
    #[default]
    BinAndPan,
    PanOnly,
}

impl PanFormat {
    /// Unknown selectors fall back to the default rendering.
    pub fn from_param(value: Option<&str>) -> Self {
        match value {
            Some("pan_id_only") => PanFormat::PanOnly,
            _ => PanFormat::BinAndPan,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PanFormat::BinAndPan => "bin_id_and_pan_id",
            PanFormat::PanOnly => "pan_id_only",
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            PanFormat::BinAndPan => {
                "CONCAT(SUBSTRING(p.bin_id,1,4),' ',SUBSTRING(p.bin_id,5,2),'** **** ',p.pan_id)"
            }
            PanFormat::PanOnly => "CONCAT('***** ',p.pan_id)",
        }
    }
}

/// Caller-controlled rendering options, validated before composition.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// IANA timezone name, already checked against the tz database.
    pub timezone: String,
    pub pan_format: PanFormat,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            timezone: "UTC".to_string(),
            pan_format: PanFormat::BinAndPan,
        }
    }
}

impl QueryOptions {
    pub fn from_params(timezone: Option<&str>, pan_format: Option<&str>) -> Result<Self, ApiError> {
        let timezone = match timezone {
            None | Some("") => "UTC".to_string(),
            Some(name) => {
                if name.parse::<chrono_tz::Tz>().is_err() {
                    return Err(ApiError::BadRequest(format!("Invalid timezone: {}", name)));
                }
                name.to_string()
            }
        };
        Ok(QueryOptions {
            timezone,
            pan_format: PanFormat::from_param(pan_format),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_expected_field_is_registered() {
        for name in [
            "tx_log_id",
            "tx_log_type",
            "tx_date_time",
            "amount",
            "merchant_id",
            "merchant_name",
            "device_id",
            "terminal_id",
            "response_code",
            "auth_code",
            "rrn",
            "stan",
            "pan",
            "reversed",
            "user_ref",
            "meta",
            "currency_code",
            "currency_info",
            "description",
            "created_at",
            "updated_at",
        ] {
            assert!(lookup(name).is_some(), "field {} should be registered", name);
        }
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(lookup("mystery_field").is_none());
        let err = validate_fields(&["amount".to_string(), "mystery_field".to_string()]).unwrap_err();
        assert_eq!(err.code(), "INVALID_FIELD");
    }

    #[test]
    fn currency_info_is_not_sortable() {
        assert!(!is_sortable("currency_info"));
        assert!(sort_expr("currency_info").is_none());
        assert!(is_sortable("updated_at"));
    }

    #[test]
    fn sort_expressions_map_through_the_catalogue() {
        assert_eq!(sort_expr("amount"), Some("p.amount"));
        assert_eq!(sort_expr("tx_date_time"), Some("p.updated_at"));
        assert_eq!(sort_expr("tx_log_type"), Some(TX_LOG_TYPE_CASE));
        assert!(sort_expr("nope").is_none());
    }

    #[test]
    fn pan_format_parses_with_default_fallback() {
        assert_eq!(PanFormat::from_param(Some("pan_id_only")), PanFormat::PanOnly);
        assert_eq!(PanFormat::from_param(Some("bin_id_and_pan_id")), PanFormat::BinAndPan);
        assert_eq!(PanFormat::from_param(Some("garbage")), PanFormat::BinAndPan);
        assert_eq!(PanFormat::from_param(None), PanFormat::BinAndPan);
    }

    #[test]
    fn query_options_validate_timezone() {
        let options = QueryOptions::from_params(Some("Africa/Johannesburg"), None).unwrap();
        assert_eq!(options.timezone, "Africa/Johannesburg");

        let default = QueryOptions::from_params(None, None).unwrap();
        assert_eq!(default.timezone, "UTC");

        let err = QueryOptions::from_params(Some("Mars/Olympus"), None).unwrap_err();
        assert_eq!(err.code(), "BAD_REQUEST");
    }
}
