use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsQuery {
    /// Unix seconds, inclusive
    pub from: i64,
    /// Unix seconds, exclusive
    pub to: i64,
    /// 86400 | 864000 | 8640000 | 86400000 | "auto" (default)
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsEntry {
    pub period_start: DateTime<Utc>,
    pub resolution: i32,
    pub total_supply: Option<Decimal>,
    pub minted: Decimal,
    pub burned: Decimal,
    pub tx_count: i64,
    pub unique_senders: i64,
    pub unique_receivers: i64,
    pub total_transferred: Decimal,
    pub total_fees_native: Decimal,
    pub total_fees_usd: Decimal,
    pub start_block: Option<i64>,
    pub end_block: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub ticker: String,
    pub resolution: i32,
    pub data: Vec<MetricsEntry>,
}
