use std::{collections::BTreeSet, str::FromStr};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use deadpool_postgres::Transaction;
use log::{debug, error, info};
use rustc_hash::FxHashMap;
use tokio_postgres::{types::ToSql, IsolationLevel, Row};

use crate::{
    db::{
        models::{Cap, MarketAggregate, Snapshot, TokenMetric},
        postgres::PostgresStore,
        SnapshotStore,
    },
    error::StoreError,
    utils::strip_nul,
};

/// Registry key of a symbol: lower-cased, non-alphanumerics replaced by `_`.
pub fn asset_key(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

/// Bound on `<key>_<n>` suffixes tried when two symbols share a key.
const MAX_KEY_SUFFIX: u32 = 100;

const MARKET_COLUMNS: &str = r#"
    block_number, network, chain_id, timestamp_unix, date,
    total_market_size_usd::TEXT AS total_market_size_usd,
    total_available_usd::TEXT AS total_available_usd,
    total_borrows_usd::TEXT AS total_borrows_usd,
    average_utilization::TEXT AS average_utilization,
    token_count
"#;

const TOKEN_COLS_PER_ROW: usize = 23;
const TOKEN_BATCH_SIZE: usize = 500;

/// Placeholder casts of the `token_metrics` insert, in column order.
/// Decimals travel as text so no precision is lost on the way in.
const TOKEN_CASTS: [&str; TOKEN_COLS_PER_ROW] = [
    "",                // block_number
    "",                // asset_id
    "",                // position
    "",                // timestamp_unix
    "",                // display_name
    "::TEXT::NUMERIC", // price_usd
    "::TEXT::NUMERIC", // liquidity
    "::TEXT::NUMERIC", // liquidity_usd
    "::TEXT::NUMERIC", // total_supplied
    "::TEXT::NUMERIC", // total_supplied_usd
    "::TEXT::NUMERIC", // total_borrowed
    "::TEXT::NUMERIC", // total_borrowed_usd
    "::TEXT::NUMERIC", // utilization_rate
    "::TEXT::NUMERIC", // reserves
    "::TEXT::NUMERIC", // reserve_factor
    "::TEXT::NUMERIC", // liquidation_threshold
    "",                // borrow_enabled
    "::TEXT::NUMERIC", // supply_cap
    "::TEXT::NUMERIC", // borrow_cap
    "::TEXT::NUMERIC", // supply_apy
    "::TEXT::NUMERIC", // variable_borrow_apy
    "::TEXT::NUMERIC", // stable_borrow_apy
    "",                // incentivized
];

/// Owned text renderings of one token row, kept alive while the insert runs.
struct TokenRow {
    asset_id: i32,
    position: i32,
    display_name: String,
    amounts: [String; 11],
    borrow_enabled: bool,
    supply_cap: Option<String>,
    borrow_cap: Option<String>,
    rates: [String; 3],
    incentivized: bool,
}

impl TokenRow {
    fn new(token: &TokenMetric, asset_id: i32, position: usize) -> Self {
        Self {
            asset_id,
            position: position as i32,
            display_name: strip_nul(&token.display_name),
            amounts: [
                token.price_usd.to_string(),
                token.liquidity.to_string(),
                token.liquidity_usd.to_string(),
                token.total_supplied.to_string(),
                token.total_supplied_usd.to_string(),
                token.total_borrowed.to_string(),
                token.total_borrowed_usd.to_string(),
                token.utilization_rate.to_string(),
                token.reserves.to_string(),
                token.reserve_factor.to_string(),
                token.liquidation_threshold.to_string(),
            ],
            borrow_enabled: token.borrow_enabled,
            supply_cap: token.supply_cap.limit().map(|v| v.to_string()),
            borrow_cap: token.borrow_cap.limit().map(|v| v.to_string()),
            rates: [
                token.supply_apy.to_string(),
                token.variable_borrow_apy.to_string(),
                token.stable_borrow_apy.to_string(),
            ],
            incentivized: token.incentivized,
        }
    }
}

fn decimal(row: &Row, column: &str) -> Result<BigDecimal, StoreError> {
    let text: String = get(row, column)?;
    BigDecimal::from_str(&text).map_err(|e| StoreError::Decode(format!("{}: {}", column, e)))
}

fn cap(row: &Row, column: &str) -> Result<Cap, StoreError> {
    let text: Option<String> = get(row, column)?;
    let limit = text
        .map(|t| BigDecimal::from_str(&t))
        .transpose()
        .map_err(|e| StoreError::Decode(format!("{}: {}", column, e)))?;
    Ok(Cap::from(limit))
}

fn get<'a, T: tokio_postgres::types::FromSql<'a>>(row: &'a Row, column: &str) -> Result<T, StoreError> {
    row.try_get(column)
        .map_err(|e| StoreError::Decode(format!("{}: {}", column, e)))
}

fn market_from_row(row: &Row) -> Result<MarketAggregate, StoreError> {
    let block_number: i64 = get(row, "block_number")?;
    let chain_id: i64 = get(row, "chain_id")?;
    let token_count: i32 = get(row, "token_count")?;

    Ok(MarketAggregate {
        network: get(row, "network")?,
        chain_id: chain_id as u64,
        block_number: block_number as u64,
        timestamp_unix: get(row, "timestamp_unix")?,
        date: get(row, "date")?,
        total_market_size_usd: decimal(row, "total_market_size_usd")?,
        total_available_usd: decimal(row, "total_available_usd")?,
        total_borrows_usd: decimal(row, "total_borrows_usd")?,
        average_utilization: decimal(row, "average_utilization")?,
        token_count: token_count as u32,
    })
}

fn token_from_row(row: &Row) -> Result<TokenMetric, StoreError> {
    Ok(TokenMetric {
        display_name: get(row, "display_name")?,
        symbol: get(row, "symbol")?,
        price_usd: decimal(row, "price_usd")?,
        liquidity: decimal(row, "liquidity")?,
        liquidity_usd: decimal(row, "liquidity_usd")?,
        total_supplied: decimal(row, "total_supplied")?,
        total_supplied_usd: decimal(row, "total_supplied_usd")?,
        total_borrowed: decimal(row, "total_borrowed")?,
        total_borrowed_usd: decimal(row, "total_borrowed_usd")?,
        utilization_rate: decimal(row, "utilization_rate")?,
        reserves: decimal(row, "reserves")?,
        reserve_factor: decimal(row, "reserve_factor")?,
        liquidation_threshold: decimal(row, "liquidation_threshold")?,
        borrow_enabled: get(row, "borrow_enabled")?,
        supply_cap: cap(row, "supply_cap")?,
        borrow_cap: cap(row, "borrow_cap")?,
        supply_apy: decimal(row, "supply_apy")?,
        variable_borrow_apy: decimal(row, "variable_borrow_apy")?,
        stable_borrow_apy: decimal(row, "stable_borrow_apy")?,
        incentivized: get(row, "incentivized")?,
    })
}

impl PostgresStore {
    // ==================== ASSETS ====================

    /// Resolve asset ids for `symbols`, registering unknown ones inside `tx`.
    ///
    /// Returns every id plus the subset resolved from the database, which the
    /// caller adds to the cache once `tx` has committed.
    async fn resolve_assets(
        &self,
        tx: &Transaction<'_>,
        symbols: &[&str],
    ) -> Result<(FxHashMap<String, i32>, Vec<(String, i32)>), StoreError> {
        let mut ids = FxHashMap::default();
        let mut resolved = Vec::new();

        // Sorted so concurrent registrations take row locks in the same order.
        let unique: BTreeSet<&str> = symbols.iter().copied().collect();

        for symbol in unique {
            if let Some(id) = self.assets.get(symbol).await {
                ids.insert(symbol.to_string(), id);
                continue;
            }

            let id = self.register_asset(tx, symbol).await?;
            ids.insert(symbol.to_string(), id);
            resolved.push((symbol.to_string(), id));
        }

        Ok((ids, resolved))
    }

    async fn register_asset(&self, tx: &Transaction<'_>, symbol: &str) -> Result<i32, StoreError> {
        let symbol = strip_nul(symbol);
        let base_key = asset_key(&symbol);

        for n in 1..=MAX_KEY_SUFFIX {
            if let Some(row) = tx
                .query_opt("SELECT asset_id FROM lendwatch.assets WHERE symbol = $1", &[&symbol])
                .await?
            {
                return Ok(row.get(0));
            }

            let key = if n == 1 { base_key.clone() } else { format!("{}_{}", base_key, n) };
            let inserted = tx
                .query_opt(
                    r#"
                    INSERT INTO lendwatch.assets (symbol, table_key) VALUES ($1, $2)
                    ON CONFLICT DO NOTHING
                    RETURNING asset_id
                    "#,
                    &[&symbol, &key],
                )
                .await?;

            if let Some(row) = inserted {
                info!("Registered asset {} as {}", symbol, key);
                return Ok(row.get(0));
            }
        }

        Err(StoreError::Unavailable(format!(
            "No free registry key for asset {}",
            symbol
        )))
    }

    // ==================== TOKEN METRICS ====================

    async fn write_token_rows(
        tx: &Transaction<'_>,
        block_number: i64,
        timestamp_unix: i64,
        rows: &[TokenRow],
    ) -> Result<(), StoreError> {
        for (chunk_index, chunk) in rows.chunks(TOKEN_BATCH_SIZE).enumerate() {
            // Build VALUES placeholders: ($1,$2,...,$23), ($24,...,$46), ...
            let values_clauses: Vec<String> = (0..chunk.len())
                .map(|i| {
                    let start = i * TOKEN_COLS_PER_ROW + 1;
                    let placeholders: Vec<String> = TOKEN_CASTS
                        .iter()
                        .enumerate()
                        .map(|(j, cast)| format!("${}{}", start + j, cast))
                        .collect();
                    format!("({})", placeholders.join(", "))
                })
                .collect();

            let query = format!(
                r#"
                INSERT INTO lendwatch.token_metrics (
                    block_number, asset_id, position, timestamp_unix, display_name,
                    price_usd, liquidity, liquidity_usd, total_supplied, total_supplied_usd,
                    total_borrowed, total_borrowed_usd, utilization_rate, reserves,
                    reserve_factor, liquidation_threshold, borrow_enabled, supply_cap, borrow_cap,
                    supply_apy, variable_borrow_apy, stable_borrow_apy, incentivized
                ) VALUES {}
                ON CONFLICT (block_number, asset_id) DO UPDATE SET
                    position = EXCLUDED.position,
                    timestamp_unix = EXCLUDED.timestamp_unix,
                    display_name = EXCLUDED.display_name,
                    price_usd = EXCLUDED.price_usd,
                    liquidity = EXCLUDED.liquidity,
                    liquidity_usd = EXCLUDED.liquidity_usd,
                    total_supplied = EXCLUDED.total_supplied,
                    total_supplied_usd = EXCLUDED.total_supplied_usd,
                    total_borrowed = EXCLUDED.total_borrowed,
                    total_borrowed_usd = EXCLUDED.total_borrowed_usd,
                    utilization_rate = EXCLUDED.utilization_rate,
                    reserves = EXCLUDED.reserves,
                    reserve_factor = EXCLUDED.reserve_factor,
                    liquidation_threshold = EXCLUDED.liquidation_threshold,
                    borrow_enabled = EXCLUDED.borrow_enabled,
                    supply_cap = EXCLUDED.supply_cap,
                    borrow_cap = EXCLUDED.borrow_cap,
                    supply_apy = EXCLUDED.supply_apy,
                    variable_borrow_apy = EXCLUDED.variable_borrow_apy,
                    stable_borrow_apy = EXCLUDED.stable_borrow_apy,
                    incentivized = EXCLUDED.incentivized
                "#,
                values_clauses.join(", ")
            );

            let mut params: Vec<&(dyn ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * TOKEN_COLS_PER_ROW);

            for row in chunk {
                params.push(&block_number);
                params.push(&row.asset_id);
                params.push(&row.position);
                params.push(&timestamp_unix);
                params.push(&row.display_name);
                for amount in &row.amounts {
                    params.push(amount);
                }
                params.push(&row.borrow_enabled);
                params.push(&row.supply_cap);
                params.push(&row.borrow_cap);
                for rate in &row.rates {
                    params.push(rate);
                }
                params.push(&row.incentivized);
            }

            tx.execute(&query, &params).await.map_err(|e| {
                error!(
                    "Failed to write token rows (chunk {}) of block {}: {:?}",
                    chunk_index, block_number, e
                );
                e
            })?;
        }

        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for PostgresStore {
    async fn ensure_schema(&self, known_symbols: &[String]) -> Result<(), StoreError> {
        self.migrate()
            .await
            .map_err(|e| StoreError::Unavailable(format!("{:#}", e)))?;

        if known_symbols.is_empty() {
            return Ok(());
        }

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let symbols: Vec<&str> = known_symbols.iter().map(String::as_str).collect();
        let (_, resolved) = self.resolve_assets(&tx, &symbols).await?;
        tx.commit().await?;

        for (symbol, id) in resolved {
            self.assets.insert(symbol, id).await;
        }

        info!("Asset registry holds {} known symbols", known_symbols.len());
        Ok(())
    }

    async fn put(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let market = &snapshot.market;
        let block_number = market.block_number as i64;
        let chain_id = market.chain_id as i64;
        let token_count = market.token_count as i32;

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // Serializes writers of the same block; released on commit or rollback.
        tx.execute("SELECT pg_advisory_xact_lock($1)", &[&block_number])
            .await?;

        tx.execute(
            r#"
            INSERT INTO lendwatch.market_snapshots (
                block_number, network, chain_id, timestamp_unix, date,
                total_market_size_usd, total_available_usd, total_borrows_usd,
                average_utilization, token_count
            ) VALUES (
                $1, $2, $3, $4, $5,
                $6::TEXT::NUMERIC, $7::TEXT::NUMERIC, $8::TEXT::NUMERIC,
                $9::TEXT::NUMERIC, $10
            )
            ON CONFLICT (block_number) DO UPDATE SET
                network = EXCLUDED.network,
                chain_id = EXCLUDED.chain_id,
                timestamp_unix = EXCLUDED.timestamp_unix,
                date = EXCLUDED.date,
                total_market_size_usd = EXCLUDED.total_market_size_usd,
                total_available_usd = EXCLUDED.total_available_usd,
                total_borrows_usd = EXCLUDED.total_borrows_usd,
                average_utilization = EXCLUDED.average_utilization,
                token_count = EXCLUDED.token_count
            "#,
            &[
                &block_number,
                &strip_nul(&market.network),
                &chain_id,
                &market.timestamp_unix,
                &market.date,
                &market.total_market_size_usd.to_string(),
                &market.total_available_usd.to_string(),
                &market.total_borrows_usd.to_string(),
                &market.average_utilization.to_string(),
                &token_count,
            ],
        )
        .await?;

        let symbols: Vec<&str> = snapshot.token_metrics.iter().map(|t| t.symbol.as_str()).collect();
        let (ids, resolved) = self.resolve_assets(&tx, &symbols).await?;

        let rows: Vec<TokenRow> = snapshot
            .token_metrics
            .iter()
            .enumerate()
            .filter_map(|(position, token)| {
                ids.get(&token.symbol)
                    .map(|id| TokenRow::new(token, *id, position))
            })
            .collect();
        let present: Vec<i32> = rows.iter().map(|r| r.asset_id).collect();

        // Assets missing from this snapshot lose their row for the block.
        let removed = tx
            .execute(
                "DELETE FROM lendwatch.token_metrics WHERE block_number = $1 AND asset_id <> ALL($2)",
                &[&block_number, &present],
            )
            .await?;

        Self::write_token_rows(&tx, block_number, market.timestamp_unix, &rows).await?;

        tx.commit().await?;

        for (symbol, id) in resolved {
            self.assets.insert(symbol, id).await;
        }

        debug!(
            "Stored block {}: {} token rows, {} stale rows removed",
            block_number,
            rows.len(),
            removed
        );
        Ok(())
    }

    async fn get_recent(&self, limit: i64) -> Result<Vec<MarketAggregate>, StoreError> {
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT {} FROM lendwatch.market_snapshots ORDER BY block_number DESC LIMIT $1",
            MARKET_COLUMNS
        );

        let rows = client.query(&query, &[&limit.max(0)]).await?;
        rows.iter().map(market_from_row).collect()
    }

    async fn get_snapshot_at_block(&self, block_number: u64) -> Result<Snapshot, StoreError> {
        let block = block_number as i64;
        let mut client = self.pool.get().await?;

        // Aggregate and token rows come from one consistent view.
        let tx = client
            .build_transaction()
            .isolation_level(IsolationLevel::RepeatableRead)
            .read_only(true)
            .start()
            .await?;

        let query = format!(
            "SELECT {} FROM lendwatch.market_snapshots WHERE block_number = $1",
            MARKET_COLUMNS
        );
        let market = match tx.query_opt(&query, &[&block]).await? {
            Some(row) => market_from_row(&row)?,
            None => return Err(StoreError::NotFound(block_number)),
        };

        let rows = tx
            .query(
                r#"
                SELECT
                    a.symbol, t.display_name,
                    t.price_usd::TEXT AS price_usd,
                    t.liquidity::TEXT AS liquidity,
                    t.liquidity_usd::TEXT AS liquidity_usd,
                    t.total_supplied::TEXT AS total_supplied,
                    t.total_supplied_usd::TEXT AS total_supplied_usd,
                    t.total_borrowed::TEXT AS total_borrowed,
                    t.total_borrowed_usd::TEXT AS total_borrowed_usd,
                    t.utilization_rate::TEXT AS utilization_rate,
                    t.reserves::TEXT AS reserves,
                    t.reserve_factor::TEXT AS reserve_factor,
                    t.liquidation_threshold::TEXT AS liquidation_threshold,
                    t.borrow_enabled,
                    t.supply_cap::TEXT AS supply_cap,
                    t.borrow_cap::TEXT AS borrow_cap,
                    t.supply_apy::TEXT AS supply_apy,
                    t.variable_borrow_apy::TEXT AS variable_borrow_apy,
                    t.stable_borrow_apy::TEXT AS stable_borrow_apy,
                    t.incentivized
                FROM lendwatch.token_metrics t
                JOIN lendwatch.assets a ON a.asset_id = t.asset_id
                WHERE t.block_number = $1
                ORDER BY t.position
                "#,
                &[&block],
            )
            .await?;

        let token_metrics = rows
            .iter()
            .map(token_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        tx.commit().await?;

        Ok(Snapshot {
            market,
            token_metrics,
        })
    }

    async fn latest_block(&self) -> Result<Option<u64>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one("SELECT MAX(block_number) FROM lendwatch.market_snapshots", &[])
            .await?;
        let latest: Option<i64> = row.get(0);
        Ok(latest.map(|b| b as u64))
    }
}
