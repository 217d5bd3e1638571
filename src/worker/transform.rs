//! Raw reserve state -> canonical snapshot.
//!
//! Pure and deterministic: the same `RawMarketData` always yields an equal
//! `Snapshot`, which is what makes re-storing a block an exact replacement.

use alloy::primitives::U256;
use bigdecimal::BigDecimal;
use num_traits::Zero;
use rustc_hash::FxHashSet;

use crate::{
    db::models::{format_date, Cap, MarketAggregate, Snapshot, TokenMetric},
    utils::{
        bps_to_percent, conversion::big_pow10, humanize, percent_of, ray_mul,
        ray_to_apy_percent, round, scale_down, strip_nul, u256_to_decimal,
    },
    worker::reader::{BaseCurrency, RawMarketData, RawReserve},
};

/// Decimals of `market_reference_currency_price_in_usd`.
const USD_PRICE_DECIMALS: u8 = 8;

/// Largest value the reserve configuration bitmap can hold for a cap (36 bits).
/// Caps at or above it, like a zero cap, mean "no cap".
pub const MAX_VALID_CAP: u64 = 68_719_476_735;

/// Build the snapshot for one block.
pub fn transform(raw: &RawMarketData) -> Snapshot {
    let incentivized: FxHashSet<_> = raw
        .incentives
        .iter()
        .filter(|i| !i.emission_per_second.is_zero() && i.distribution_end as i64 > raw.timestamp)
        .map(|i| i.underlying_asset)
        .collect();

    let mut seen = FxHashSet::default();
    let token_metrics: Vec<TokenMetric> = raw
        .reserves
        .iter()
        .map(|reserve| {
            let symbol = unique_symbol(&mut seen, reserve);
            token_metric(
                reserve,
                symbol,
                &raw.base_currency,
                incentivized.contains(&reserve.underlying_asset),
            )
        })
        .collect();

    let market = aggregate(raw, &token_metrics);

    Snapshot {
        market,
        token_metrics,
    }
}

/// Convert an oracle price quoted in the market reference currency to USD.
pub fn price_usd(price_in_reference: U256, base: &BaseCurrency) -> BigDecimal {
    if base.market_reference_currency_unit.is_zero() {
        return BigDecimal::zero();
    }

    round(
        u256_to_decimal(price_in_reference) * &base.market_reference_currency_price_in_usd
            / big_pow10(USD_PRICE_DECIMALS)
            / &base.market_reference_currency_unit,
    )
}

/// Symbol a reserve is keyed by in the store and in comparisons.
///
/// ERC-20 symbols are not unique, so a symbol already taken by an earlier
/// reserve in list order gets the reserve's underlying address appended.
fn unique_symbol(seen: &mut FxHashSet<String>, reserve: &RawReserve) -> String {
    let symbol = strip_nul(&reserve.symbol);
    if seen.insert(symbol.clone()) {
        return symbol;
    }

    let tagged = format!("{}-{}", symbol, reserve.underlying_asset);
    seen.insert(tagged.clone());
    tagged
}

/// Map the protocol's cap encoding to `Cap`.
pub fn normalize_cap(raw: U256) -> Cap {
    if raw.is_zero() || raw >= U256::from(MAX_VALID_CAP) {
        Cap::Unbounded
    } else {
        Cap::Limited(u256_to_decimal(raw))
    }
}

fn token_metric(
    reserve: &RawReserve,
    symbol: String,
    base: &BaseCurrency,
    incentivized: bool,
) -> TokenMetric {
    let price = price_usd(reserve.price_in_market_reference_currency, base);

    let total_supplied = humanize(reserve.total_a_token, reserve.decimals);
    let total_borrowed = humanize(
        reserve
            .total_stable_debt
            .saturating_add(reserve.total_variable_debt),
        reserve.decimals,
    );
    let liquidity = &total_supplied - &total_borrowed;

    let reserves = scale_down(
        &ray_mul(reserve.accrued_to_treasury_scaled, reserve.liquidity_index),
        reserve.decimals,
    );

    TokenMetric {
        display_name: strip_nul(&reserve.name),
        symbol,
        total_supplied_usd: &total_supplied * &price,
        total_borrowed_usd: &total_borrowed * &price,
        liquidity_usd: &liquidity * &price,
        utilization_rate: percent_of(&total_borrowed, &total_supplied),
        price_usd: price,
        liquidity,
        total_supplied,
        total_borrowed,
        reserves,
        reserve_factor: bps_to_percent(reserve.reserve_factor),
        liquidation_threshold: bps_to_percent(reserve.liquidation_threshold),
        borrow_enabled: reserve.borrowing_enabled,
        supply_cap: normalize_cap(reserve.supply_cap),
        borrow_cap: normalize_cap(reserve.borrow_cap),
        supply_apy: ray_to_apy_percent(reserve.liquidity_rate),
        variable_borrow_apy: ray_to_apy_percent(reserve.variable_borrow_rate),
        stable_borrow_apy: ray_to_apy_percent(reserve.stable_borrow_rate),
        incentivized,
    }
}

fn aggregate(raw: &RawMarketData, token_metrics: &[TokenMetric]) -> MarketAggregate {
    let total_market_size_usd: BigDecimal =
        token_metrics.iter().map(|t| &t.total_supplied_usd).sum();
    let total_borrows_usd: BigDecimal = token_metrics.iter().map(|t| &t.total_borrowed_usd).sum();

    MarketAggregate {
        network: strip_nul(&raw.network),
        chain_id: raw.chain_id,
        block_number: raw.block_number,
        timestamp_unix: raw.timestamp,
        date: format_date(raw.timestamp),
        total_available_usd: &total_market_size_usd - &total_borrows_usd,
        average_utilization: percent_of(&total_borrows_usd, &total_market_size_usd),
        total_market_size_usd,
        total_borrows_usd,
        token_count: token_metrics.len() as u32,
    }
}
