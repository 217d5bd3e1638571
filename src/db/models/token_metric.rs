use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use super::Cap;

/// One reserve's state at one block.
///
/// Primary Key (PostgreSQL): (block_number, asset_id)
/// JSON field names follow the snapshot file format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenMetric {
    // Identity
    #[serde(rename = "token")]
    pub display_name: String,
    pub symbol: String,

    // Price
    #[serde(rename = "priceInUSD")]
    pub price_usd: BigDecimal,

    // Balances (token units) and their USD values
    pub liquidity: BigDecimal,
    #[serde(rename = "liquidityUSD")]
    pub liquidity_usd: BigDecimal,
    #[serde(rename = "totalSupplied")]
    pub total_supplied: BigDecimal,
    #[serde(rename = "totalSuppliedUSD")]
    pub total_supplied_usd: BigDecimal,
    #[serde(rename = "totalBorrowed")]
    pub total_borrowed: BigDecimal,
    #[serde(rename = "totalBorrowedUSD")]
    pub total_borrowed_usd: BigDecimal,
    #[serde(rename = "utilizationRate")]
    pub utilization_rate: BigDecimal,
    /// Protocol treasury accrual, in token units.
    pub reserves: BigDecimal,

    // Risk configuration (percent)
    #[serde(rename = "reserveFactor")]
    pub reserve_factor: BigDecimal,
    #[serde(rename = "liquidationThreshold")]
    pub liquidation_threshold: BigDecimal,
    #[serde(rename = "borrowEnabled")]
    pub borrow_enabled: bool,
    #[serde(rename = "supplyCap")]
    pub supply_cap: Cap,
    #[serde(rename = "borrowCap")]
    pub borrow_cap: Cap,

    // Rates (APY, percent)
    #[serde(rename = "supplyAPY")]
    pub supply_apy: BigDecimal,
    #[serde(rename = "variableBorrowAPY")]
    pub variable_borrow_apy: BigDecimal,
    #[serde(rename = "stableBorrowAPY")]
    pub stable_borrow_apy: BigDecimal,

    /// True when a reward emission is live on the supply or debt side.
    #[serde(default)]
    pub incentivized: bool,
}
