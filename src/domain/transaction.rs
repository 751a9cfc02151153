use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transaction kind, discriminated by `payment_tx_type_id` in the portal
/// store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxType {
    Payment,
    Reversal,
    Void,
    Refund,
    MmPurchase,
    MmRefund,
    Unknown,
}

impl TxType {
    pub fn from_discriminator(id: i32) -> Self {
        match id {
            0 => TxType::Payment,
            1 => TxType::Reversal,
            2 => TxType::Void,
            3 => TxType::Refund,
            9 => TxType::MmPurchase,
            10 => TxType::MmRefund,
            _ => TxType::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TxType::Payment => "payment",
            TxType::Reversal => "reversal",
            TxType::Void => "void",
            TxType::Refund => "refund",
            TxType::MmPurchase => "mm purchase",
            TxType::MmRefund => "mm refund",
            TxType::Unknown => "unknown",
        }
    }

    /// Inverse of [`label`]; `unknown` is not addressable from a filter.
    pub fn discriminator_for_label(label: &str) -> Option<i32> {
        match label {
            "payment" => Some(0),
            "reversal" => Some(1),
            "void" => Some(2),
            "refund" => Some(3),
            "mm purchase" => Some(9),
            "mm refund" => Some(10),
            _ => None,
        }
    }
}

/// Outcome of looking up the user-facing reference inside transaction
/// metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaRef {
    Reference(String),
    None,
}

impl MetaRef {
    /// Extracts the string-valued `reference` key from the metadata object,
    /// if present and non-empty.
    pub fn from_meta(meta: Option<&Value>) -> Self {
        match meta.and_then(|m| m.get("reference")).and_then(Value::as_str) {
            Some(reference) if !reference.is_empty() => MetaRef::Reference(reference.to_string()),
            _ => MetaRef::None,
        }
    }

    pub fn into_option(self) -> Option<String> {
        match self {
            MetaRef::Reference(reference) => Some(reference),
            MetaRef::None => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "tx_log_id")]
    pub id: String,
    pub payment_tx_type_id: i32,
    pub reversed_tx_log_id: Option<String>,
    pub rrn: String,
    pub stan: String,
    pub bin_id: Option<String>,
    pub pan_id: Option<String>,
    pub device_id: Option<String>,
    pub terminal_id: Option<String>,
    pub merchant_id: Option<String>,
    pub currency_code: String,
    pub amount: i64,
    pub auth_code: Option<String>,
    pub result_code: Option<String>,
    pub description: Option<String>,
    pub completed: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub meta: Option<Value>,

    // Derived fields, filled by assembly after the row is read.
    #[serde(rename = "tx_log_type")]
    pub tx_type: String,
    pub reversed: bool,
    pub merchant_name: Option<String>,
    pub response_code: Option<String>,
    pub pan: Option<String>,
    pub user_ref: Option<String>,
    pub currency_info: Option<CurrencyInfo>,
}

impl Transaction {
    pub fn is_reversed(&self) -> bool {
        self.reversed_tx_log_id.is_some()
    }

    /// Masked card display from bin and tail. The bin must carry at least
    /// six characters or no PAN is exposed at all.
    pub fn compose_pan(&self) -> Option<String> {
        let bin = self.bin_id.as_deref().filter(|b| !b.is_empty())?;
        let tail = self.pan_id.as_deref().filter(|p| !p.is_empty())?;
        if bin.len() < 6 {
            return None;
        }
        Some(format!("{} {}** **** {}", &bin[..4], &bin[4..6], tail))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Merchant {
    pub merchant_id: String,
    pub merchant_name: String,
    pub is_provisioner: bool,
    pub provisioner_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyInfo {
    pub code: String,
    pub name: String,
    pub symbol: String,
    pub exponent: i32,
    pub formatted_amount: String,
}

impl CurrencyInfo {
    pub fn new(code: String, name: String, exponent: i32, amount: i64) -> Self {
        let symbol = "R".to_string();
        let formatted_amount = format_amount(&symbol, exponent, amount);
        CurrencyInfo {
            code,
            name,
            symbol,
            exponent,
            formatted_amount,
        }
    }
}

/// Renders an integer minor-unit amount as `<symbol> <major>.<minor>` with
/// the minor part zero-padded to the currency exponent. No fractional part
/// when the exponent is zero.
pub fn format_amount(symbol: &str, exponent: i32, amount: i64) -> String {
    let divisor = 10_i64.checked_pow(exponent.max(0) as u32).unwrap_or(1).max(1);
    let major = amount / divisor;
    let minor = (amount % divisor).abs();

    if exponent <= 0 {
        format!("{} {}", symbol, major)
    } else {
        format!("{} {}.{:0width$}", symbol, major, minor, width = exponent as usize)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MerchantSummary {
    pub merchant_id: String,
    pub merchant_name: String,
    pub total_transactions: i64,
    pub successful_transactions: i64,
    pub failed_transactions: i64,
    pub total_amount: i64,
    pub average_amount: f64,
    pub success_rate: f64,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl MerchantSummary {
    /// Derives the ratios from the raw counts. With no transactions both the
    /// average and the success rate are zero.
    pub fn finalize(mut self) -> Self {
        self.failed_transactions = self.total_transactions - self.successful_transactions;
        if self.total_transactions > 0 {
            self.average_amount = self.total_amount as f64 / self.total_transactions as f64;
            self.success_rate =
                self.successful_transactions as f64 / self.total_transactions as f64 * 100.0;
        } else {
            self.average_amount = 0.0;
            self.success_rate = 0.0;
        }
        self
    }
}
