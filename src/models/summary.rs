use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatType {
    Count,
    Amount,
}

/// Precomputed daily summary row written by the aggregation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub merchant_id: String,
    pub stat_type: StatType,
    pub value: serde_json::Value,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantContact {
    pub merchant_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}
