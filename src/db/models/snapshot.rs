use bigdecimal::BigDecimal;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::TokenMetric;

/// Market-wide figures derived from every reserve at one block.
///
/// Primary Key (PostgreSQL): block_number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketAggregate {
    pub network: String,
    pub chain_id: u64,
    pub block_number: u64,
    #[serde(rename = "timestamp")]
    pub timestamp_unix: i64,
    /// RFC 3339 rendering of `timestamp_unix`.
    pub date: String,

    #[serde(rename = "totalMarketSize")]
    pub total_market_size_usd: BigDecimal,
    #[serde(rename = "totalAvailable")]
    pub total_available_usd: BigDecimal,
    #[serde(rename = "totalBorrows")]
    pub total_borrows_usd: BigDecimal,
    pub average_utilization: BigDecimal,
    pub token_count: u32,
}

/// Every metric computed for one block: the aggregate plus one entry per reserve,
/// in the order the pool lists its reserves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(flatten)]
    pub market: MarketAggregate,
    pub token_metrics: Vec<TokenMetric>,
}

impl Snapshot {
    pub fn block_number(&self) -> u64 {
        self.market.block_number
    }

    pub fn token(&self, symbol: &str) -> Option<&TokenMetric> {
        self.token_metrics.iter().find(|t| t.symbol == symbol)
    }
}

/// Format a unix timestamp the way snapshot files carry it.
pub fn format_date(timestamp_unix: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp_unix, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}
