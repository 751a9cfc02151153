//! Fixed-shape report payloads: per-type totals on the portal store and the
//! legacy efinance lookups on the atlas store.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionTotal {
    pub trx_type: String,
    pub trx_descr: String,
    pub total_amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionTotalsReport {
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_terminal_id: Option<String>,
    pub totals: Vec<TransactionTotal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyTotalsRequest {
    pub date: String,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyTotal {
    pub trx_descr: String,
    pub total_amount_egp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyTotalsReport {
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub totals: Vec<LegacyTotal>,
}

/// Search criteria for the legacy ISO transaction lookup. Empty or absent
/// members do not constrain the search.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IsoSearchRequest {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub trx_rrn: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub pan_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub bank_group_id: Option<String>,
    #[serde(default)]
    pub trx_descr: Option<String>,
    #[serde(default)]
    pub tx_id: Option<String>,
    #[serde(default)]
    pub response_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsoSearchItem {
    pub datetime: String,
    pub stan: i64,
    pub rrn: String,
    pub bin: Option<String>,
    pub pan_id: Option<String>,
    pub device_id: Option<String>,
    pub group_id: Option<String>,
    pub trx_descr: Option<String>,
    pub trx_type: Option<String>,
    pub bank_group_id: Option<String>,
    pub transaction_code: Option<String>,
    pub tx_id: Option<String>,
    pub amount: i64,
    pub response_code: String,
    pub auth_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsoSearchReport {
    pub transactions: Vec<IsoSearchItem>,
}
