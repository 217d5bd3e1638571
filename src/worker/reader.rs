use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use bigdecimal::BigDecimal;

use crate::error::ChainError;

/// Which block a read is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Latest,
    Number(u64),
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockRef::Latest => write!(f, "latest"),
            BlockRef::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Oracle base currency description.
///
/// Reserve prices are quoted in the oracle's base currency, scaled by
/// `market_reference_currency_unit`. `market_reference_currency_price_in_usd`
/// is that currency's USD price scaled by 1e8.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseCurrency {
    pub market_reference_currency_unit: BigDecimal,
    pub market_reference_currency_price_in_usd: BigDecimal,
}

/// Raw on-chain state of one reserve, exactly as the data provider returns it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReserve {
    pub underlying_asset: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,

    pub total_a_token: U256,
    pub total_stable_debt: U256,
    pub total_variable_debt: U256,
    pub accrued_to_treasury_scaled: U256,
    pub liquidity_index: U256,

    // Ray-denominated APRs
    pub liquidity_rate: U256,
    pub variable_borrow_rate: U256,
    pub stable_borrow_rate: U256,

    pub price_in_market_reference_currency: U256,

    // Basis points
    pub reserve_factor: U256,
    pub liquidation_threshold: U256,
    pub borrowing_enabled: bool,

    // Whole tokens; zero means the protocol applies no cap
    pub supply_cap: U256,
    pub borrow_cap: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncentiveSide {
    Supply,
    Borrow,
}

/// One reward emission configured on a reserve's aToken or variable debt token.
#[derive(Debug, Clone, PartialEq)]
pub struct RawIncentive {
    pub underlying_asset: Address,
    pub side: IncentiveSide,
    pub reward_token: Address,
    pub emission_per_second: U256,
    pub distribution_end: u64,
}

/// Everything read for one block.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMarketData {
    pub network: String,
    pub chain_id: u64,
    pub block_number: u64,
    pub timestamp: i64,
    pub base_currency: BaseCurrency,
    pub reserves: Vec<RawReserve>,
    pub incentives: Vec<RawIncentive>,
}

/// Source of raw market state.
///
/// Implementations perform no retries; retry policy belongs to the caller.
#[async_trait]
pub trait MarketReader: Send + Sync {
    /// Current chain head block number.
    async fn head(&self) -> Result<u64, ChainError>;

    /// Read every reserve and incentive record at `block`. All figures reflect
    /// the same block; `Latest` is resolved to a number before any market read.
    async fn fetch(&self, block: BlockRef) -> Result<RawMarketData, ChainError>;
}
