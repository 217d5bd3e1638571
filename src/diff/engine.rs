use std::collections::{BTreeMap, BTreeSet};

use bigdecimal::BigDecimal;
use num_traits::Zero;

use crate::{
    db::models::{Snapshot, TokenMetric},
    diff::report::{AssetChange, ComparisonReport, FieldChange, MarketChanges, TokenDelta},
    utils::round,
};

/// Percent change from `from` to `to`.
///
/// Zero to zero is 0 and zero to anything else is 100; otherwise the change is
/// taken relative to `|from|` so a move towards zero from a negative base is
/// still reported as an increase.
pub fn percent_change(from: &BigDecimal, to: &BigDecimal) -> BigDecimal {
    if from.is_zero() {
        return if to.is_zero() {
            BigDecimal::zero()
        } else {
            BigDecimal::from(100)
        };
    }

    round((to - from) / from.abs() * BigDecimal::from(100))
}

fn point_delta(from: &BigDecimal, to: &BigDecimal) -> BigDecimal {
    round(to - from)
}

/// Compare an earlier snapshot `a` with a later snapshot `b`.
///
/// Assets are reported in symbol order, so equal inputs always give an
/// identical report.
pub fn compare(a: &Snapshot, b: &Snapshot) -> ComparisonReport {
    let before: BTreeMap<&str, &TokenMetric> =
        a.token_metrics.iter().map(|t| (t.symbol.as_str(), t)).collect();
    let after: BTreeMap<&str, &TokenMetric> =
        b.token_metrics.iter().map(|t| (t.symbol.as_str(), t)).collect();

    let symbols: BTreeSet<&str> = before.keys().chain(after.keys()).copied().collect();

    let asset_changes = symbols
        .into_iter()
        .filter_map(|symbol| match (before.get(symbol), after.get(symbol)) {
            (Some(x), Some(y)) => Some(AssetChange::Changed(token_delta(x, y))),
            (None, Some(y)) => Some(AssetChange::Added((*y).clone())),
            (Some(x), None) => Some(AssetChange::Removed {
                symbol: x.symbol.clone(),
                display_name: x.display_name.clone(),
            }),
            (None, None) => None,
        })
        .collect();

    ComparisonReport {
        network: b.market.network.clone(),
        chain_id: b.market.chain_id,
        start_block: a.block_number(),
        end_block: b.block_number(),
        time_difference_seconds: b.market.timestamp_unix - a.market.timestamp_unix,
        market_changes: MarketChanges {
            total_market_size_change: percent_change(
                &a.market.total_market_size_usd,
                &b.market.total_market_size_usd,
            ),
            total_borrows_change: percent_change(
                &a.market.total_borrows_usd,
                &b.market.total_borrows_usd,
            ),
        },
        asset_changes,
    }
}

fn token_delta(x: &TokenMetric, y: &TokenMetric) -> TokenDelta {
    TokenDelta {
        symbol: y.symbol.clone(),
        price_change: percent_change(&x.price_usd, &y.price_usd),
        liquidity_change: percent_change(&x.liquidity, &y.liquidity),
        liquidity_usd_change: percent_change(&x.liquidity_usd, &y.liquidity_usd),
        total_supplied_usd_change: percent_change(&x.total_supplied_usd, &y.total_supplied_usd),
        total_borrowed_usd_change: percent_change(&x.total_borrowed_usd, &y.total_borrowed_usd),
        utilization_delta: point_delta(&x.utilization_rate, &y.utilization_rate),
        supply_apy_delta: point_delta(&x.supply_apy, &y.supply_apy),
        variable_borrow_apy_delta: point_delta(&x.variable_borrow_apy, &y.variable_borrow_apy),
        stable_borrow_apy_delta: point_delta(&x.stable_borrow_apy, &y.stable_borrow_apy),
        field_changes: field_changes(x, y),
    }
}

fn field_changes(x: &TokenMetric, y: &TokenMetric) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    if x.borrow_enabled != y.borrow_enabled {
        changes.push(FieldChange::BorrowEnabled {
            from: x.borrow_enabled,
            to: y.borrow_enabled,
        });
    }
    if x.supply_cap != y.supply_cap {
        changes.push(FieldChange::SupplyCap {
            from: x.supply_cap.clone(),
            to: y.supply_cap.clone(),
        });
    }
    if x.borrow_cap != y.borrow_cap {
        changes.push(FieldChange::BorrowCap {
            from: x.borrow_cap.clone(),
            to: y.borrow_cap.clone(),
        });
    }
    if x.reserve_factor != y.reserve_factor {
        changes.push(FieldChange::ReserveFactor {
            from: x.reserve_factor.clone(),
            to: y.reserve_factor.clone(),
        });
    }
    if x.liquidation_threshold != y.liquidation_threshold {
        changes.push(FieldChange::LiquidationThreshold {
            from: x.liquidation_threshold.clone(),
            to: y.liquidation_threshold.clone(),
        });
    }
    if x.incentivized != y.incentivized {
        changes.push(FieldChange::Incentivized {
            from: x.incentivized,
            to: y.incentivized,
        });
    }

    changes
}
