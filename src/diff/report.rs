use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::db::models::{Cap, TokenMetric};

/// Structured difference between two snapshots of the same market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub network: String,
    pub chain_id: u64,
    pub start_block: u64,
    pub end_block: u64,
    pub time_difference_seconds: i64,
    pub market_changes: MarketChanges,
    pub asset_changes: Vec<AssetChange>,
}

impl ComparisonReport {
    pub fn added(&self) -> impl Iterator<Item = &TokenMetric> {
        self.asset_changes.iter().filter_map(|c| match c {
            AssetChange::Added(metric) => Some(metric),
            _ => None,
        })
    }

    pub fn removed(&self) -> impl Iterator<Item = &str> {
        self.asset_changes.iter().filter_map(|c| match c {
            AssetChange::Removed { symbol, .. } => Some(symbol.as_str()),
            _ => None,
        })
    }

    pub fn changed(&self, symbol: &str) -> Option<&TokenDelta> {
        self.asset_changes.iter().find_map(|c| match c {
            AssetChange::Changed(delta) if delta.symbol == symbol => Some(delta),
            _ => None,
        })
    }
}

/// Percent changes of market-wide totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketChanges {
    pub total_market_size_change: BigDecimal,
    pub total_borrows_change: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum AssetChange {
    /// Present in both snapshots.
    Changed(TokenDelta),
    /// Only in the later snapshot; carries its full metrics.
    Added(TokenMetric),
    /// Only in the earlier snapshot.
    Removed {
        symbol: String,
        #[serde(rename = "token")]
        display_name: String,
    },
}

impl AssetChange {
    pub fn symbol(&self) -> &str {
        match self {
            AssetChange::Changed(delta) => &delta.symbol,
            AssetChange::Added(metric) => &metric.symbol,
            AssetChange::Removed { symbol, .. } => symbol,
        }
    }
}

/// Movement of one asset between two snapshots.
///
/// `*_change` fields are percent changes; `*_delta` fields are
/// percentage-point differences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDelta {
    pub symbol: String,

    #[serde(rename = "priceChange")]
    pub price_change: BigDecimal,
    pub liquidity_change: BigDecimal,
    #[serde(rename = "liquidityUSDChange")]
    pub liquidity_usd_change: BigDecimal,
    #[serde(rename = "totalSuppliedUSDChange")]
    pub total_supplied_usd_change: BigDecimal,
    #[serde(rename = "totalBorrowedUSDChange")]
    pub total_borrowed_usd_change: BigDecimal,

    pub utilization_delta: BigDecimal,
    #[serde(rename = "supplyAPYDelta")]
    pub supply_apy_delta: BigDecimal,
    #[serde(rename = "variableBorrowAPYDelta")]
    pub variable_borrow_apy_delta: BigDecimal,
    #[serde(rename = "stableBorrowAPYDelta")]
    pub stable_borrow_apy_delta: BigDecimal,

    /// Discrete settings that differ, one entry per field.
    pub field_changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "camelCase")]
pub enum FieldChange {
    BorrowEnabled { from: bool, to: bool },
    SupplyCap { from: Cap, to: Cap },
    BorrowCap { from: Cap, to: Cap },
    ReserveFactor { from: BigDecimal, to: BigDecimal },
    LiquidationThreshold { from: BigDecimal, to: BigDecimal },
    Incentivized { from: bool, to: bool },
}
