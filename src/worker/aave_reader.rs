use std::{fmt::Display, future::IntoFuture, time::Duration};

use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    primitives::{Address, U256},
    providers::{DynProvider, Provider, ProviderBuilder, MULTICALL3_ADDRESS},
    sol_types::SolCall,
};
use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info};
use url::Url;

use crate::{
    abis::{
        Call3, IAaveOracle, IAggregatorV3, IERC20Metadata, IMulticall3, IPool,
        IPoolAddressesProvider, IPoolDataProvider, IRewardsController, McResult,
    },
    config::ChainSettings,
    error::ChainError,
    utils::{conversion::big_pow10, i256_to_decimal, u256_to_decimal},
    worker::reader::{
        BaseCurrency, BlockRef, IncentiveSide, MarketReader, RawIncentive, RawMarketData,
        RawReserve,
    },
};

/// Oracle prices and the reference currency USD price are normalized to 8 decimals.
const USD_PRICE_DECIMALS: u8 = 8;

/// Reserves per multicall; each reserve costs `CALLS_PER_RESERVE` sub-calls.
const MULTICALL_BATCH_SIZE: usize = 20;

const CALLS_PER_RESERVE: usize = 6;

/// Upper bound of sub-calls per aggregate3 request for incentive reads.
const MAX_CALLS_PER_MULTICALL: usize = 120;

/// Contracts resolved from the PoolAddressesProvider at a given block.
#[derive(Debug, Clone, Copy)]
struct MarketContracts {
    pool: Address,
    data_provider: Address,
    oracle: Address,
}

/// Debt and supply tokens of a reserve, needed to look up reward emissions.
#[derive(Debug, Clone, Copy)]
struct ReserveTokens {
    underlying: Address,
    a_token: Address,
    variable_debt_token: Address,
}

/// Aave v3 market reader over JSON-RPC.
///
/// Resolves addresses-provider -> pool -> reserve list at the requested block,
/// then reads reserve configuration, state, caps and token addresses for every
/// reserve through Multicall3, pinned to that same block.
pub struct AaveReader {
    provider: DynProvider,
    network: String,
    chain_id: u64,
    addresses_provider: Address,
    rewards_controller: Option<Address>,
    reference_usd_feed: Option<Address>,
    call_timeout: Duration,
}

fn parse_address(value: &str, field: &str) -> anyhow::Result<Address> {
    value
        .parse()
        .with_context(|| format!("Invalid address for chain.{}: {}", field, value))
}

fn call3(target: Address, data: Vec<u8>) -> Call3 {
    Call3 {
        target,
        allowFailure: true,
        callData: data.into(),
    }
}

/// Decode a required multicall sub-result.
fn decode<C: SolCall>(result: &McResult, asset: Address, what: &str) -> Result<C::Return, ChainError> {
    if !result.success {
        return Err(ChainError::Unavailable(format!(
            "{} reverted for reserve {}",
            what, asset
        )));
    }
    C::abi_decode_returns(&result.returnData).map_err(|e| {
        ChainError::Unavailable(format!("Failed to decode {} for reserve {}: {}", what, asset, e))
    })
}

/// Decode an optional multicall sub-result.
fn decode_opt<C: SolCall>(result: &McResult) -> Option<C::Return> {
    if !result.success {
        return None;
    }
    C::abi_decode_returns(&result.returnData).ok()
}

impl AaveReader {
    pub fn new(settings: &ChainSettings) -> anyhow::Result<Self> {
        let url = Url::parse(&settings.rpc_url).context("Invalid RPC URL")?;

        let client = ProviderBuilder::new().connect_http(url);

        let provider = DynProvider::new(client);

        let addresses_provider =
            parse_address(&settings.pool_addresses_provider, "pool_addresses_provider")?;
        let rewards_controller = settings
            .rewards_controller
            .as_deref()
            .map(|a| parse_address(a, "rewards_controller"))
            .transpose()?;
        let reference_usd_feed = settings
            .reference_usd_feed
            .as_deref()
            .map(|a| parse_address(a, "reference_usd_feed"))
            .transpose()?;

        Ok(Self {
            provider,
            network: settings.network.clone(),
            chain_id: settings.chain_id,
            addresses_provider,
            rewards_controller,
            reference_usd_feed,
            call_timeout: Duration::from_millis(settings.rpc_timeout_ms),
        })
    }

    /// Await an RPC call with the configured timeout, mapping every failure to
    /// `ChainError::Unavailable`.
    async fn timed<F, T, E>(&self, what: &str, call: F) -> Result<T, ChainError>
    where
        F: IntoFuture<Output = Result<T, E>>,
        E: Display,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ChainError::Unavailable(format!("{}: {}", what, e))),
            Err(_) => Err(ChainError::Unavailable(format!(
                "{} timed out after {:?}",
                what, self.call_timeout
            ))),
        }
    }

    async fn block_timestamp(&self, number: u64) -> Result<i64, ChainError> {
        let block = self
            .timed(
                "eth_getBlockByNumber",
                self.provider
                    .get_block_by_number(BlockNumberOrTag::Number(number)),
            )
            .await?
            .ok_or(ChainError::BlockNotFound(number))?;

        Ok(block.header.timestamp as i64)
    }

    async fn resolve_market(&self, at: BlockId) -> Result<MarketContracts, ChainError> {
        let provider = IPoolAddressesProvider::new(self.addresses_provider, &self.provider);

        let pool = self
            .timed("getPool", provider.getPool().block(at).call())
            .await?;
        let data_provider = self
            .timed(
                "getPoolDataProvider",
                provider.getPoolDataProvider().block(at).call(),
            )
            .await?;
        let oracle = self
            .timed("getPriceOracle", provider.getPriceOracle().block(at).call())
            .await?;

        Ok(MarketContracts {
            pool,
            data_provider,
            oracle,
        })
    }

    async fn read_base_currency(
        &self,
        oracle: Address,
        at: BlockId,
    ) -> Result<BaseCurrency, ChainError> {
        let oracle = IAaveOracle::new(oracle, &self.provider);

        let base = self
            .timed("BASE_CURRENCY", oracle.BASE_CURRENCY().block(at).call())
            .await?;
        let unit = self
            .timed(
                "BASE_CURRENCY_UNIT",
                oracle.BASE_CURRENCY_UNIT().block(at).call(),
            )
            .await?;

        // The zero address marks a USD-denominated oracle.
        let price_in_usd = if base == Address::ZERO {
            big_pow10(USD_PRICE_DECIMALS)
        } else {
            let feed = self.reference_usd_feed.ok_or_else(|| {
                ChainError::Unavailable(format!(
                    "Oracle base currency {} is not USD and chain.reference_usd_feed is not set",
                    base
                ))
            })?;
            let feed = IAggregatorV3::new(feed, &self.provider);
            let answer = self
                .timed("latestAnswer", feed.latestAnswer().block(at).call())
                .await?;
            let decimals = self
                .timed("decimals", feed.decimals().block(at).call())
                .await?;

            i256_to_decimal(answer) * big_pow10(USD_PRICE_DECIMALS) / big_pow10(decimals)
        };

        Ok(BaseCurrency {
            market_reference_currency_unit: u256_to_decimal(unit),
            market_reference_currency_price_in_usd: price_in_usd,
        })
    }

    async fn aggregate(&self, calls: Vec<Call3>, at: BlockId) -> Result<Vec<McResult>, ChainError> {
        let expected = calls.len();
        let multicall = IMulticall3::new(MULTICALL3_ADDRESS, &self.provider);

        let results = self
            .timed("aggregate3", multicall.aggregate3(calls).block(at).call())
            .await?;

        if results.len() != expected {
            return Err(ChainError::Unavailable(format!(
                "aggregate3 returned {} results for {} calls",
                results.len(),
                expected
            )));
        }

        Ok(results)
    }

    async fn read_reserve_chunk(
        &self,
        assets: &[Address],
        prices: &[U256],
        data_provider: Address,
        at: BlockId,
    ) -> Result<Vec<(RawReserve, ReserveTokens)>, ChainError> {
        let mut calls = Vec::with_capacity(assets.len() * CALLS_PER_RESERVE);

        for asset in assets {
            let asset = *asset;
            calls.push(call3(asset, IERC20Metadata::symbolCall {}.abi_encode()));
            calls.push(call3(asset, IERC20Metadata::nameCall {}.abi_encode()));
            calls.push(call3(
                data_provider,
                IPoolDataProvider::getReserveConfigurationDataCall { asset }.abi_encode(),
            ));
            calls.push(call3(
                data_provider,
                IPoolDataProvider::getReserveDataCall { asset }.abi_encode(),
            ));
            calls.push(call3(
                data_provider,
                IPoolDataProvider::getReserveCapsCall { asset }.abi_encode(),
            ));
            calls.push(call3(
                data_provider,
                IPoolDataProvider::getReserveTokensAddressesCall { asset }.abi_encode(),
            ));
        }

        let results = self.aggregate(calls, at).await?;

        let mut reserves = Vec::with_capacity(assets.len());

        for (i, (asset, price)) in assets.iter().zip(prices.iter()).enumerate() {
            let asset = *asset;
            let base_idx = i * CALLS_PER_RESERVE;

            // Some tokens return bytes32 metadata; fall back to the address.
            let symbol = decode_opt::<IERC20Metadata::symbolCall>(&results[base_idx])
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| asset.to_string());
            let name = decode_opt::<IERC20Metadata::nameCall>(&results[base_idx + 1])
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| symbol.clone());

            let config = decode::<IPoolDataProvider::getReserveConfigurationDataCall>(
                &results[base_idx + 2],
                asset,
                "getReserveConfigurationData",
            )?;
            let data = decode::<IPoolDataProvider::getReserveDataCall>(
                &results[base_idx + 3],
                asset,
                "getReserveData",
            )?;
            let caps = decode::<IPoolDataProvider::getReserveCapsCall>(
                &results[base_idx + 4],
                asset,
                "getReserveCaps",
            )?;
            let tokens = decode::<IPoolDataProvider::getReserveTokensAddressesCall>(
                &results[base_idx + 5],
                asset,
                "getReserveTokensAddresses",
            )?;

            debug!(
                "Reserve {} ({}) supplied={} variable_debt={} price={}",
                symbol, asset, data.totalAToken, data.totalVariableDebt, price
            );

            reserves.push((
                RawReserve {
                    underlying_asset: asset,
                    symbol,
                    name,
                    decimals: config.decimals.saturating_to::<u8>(),
                    total_a_token: data.totalAToken,
                    total_stable_debt: data.totalStableDebt,
                    total_variable_debt: data.totalVariableDebt,
                    accrued_to_treasury_scaled: data.accruedToTreasuryScaled,
                    liquidity_index: data.liquidityIndex,
                    liquidity_rate: data.liquidityRate,
                    variable_borrow_rate: data.variableBorrowRate,
                    stable_borrow_rate: data.stableBorrowRate,
                    price_in_market_reference_currency: *price,
                    reserve_factor: config.reserveFactor,
                    liquidation_threshold: config.liquidationThreshold,
                    borrowing_enabled: config.borrowingEnabled,
                    supply_cap: caps.supplyCap,
                    borrow_cap: caps.borrowCap,
                },
                ReserveTokens {
                    underlying: asset,
                    a_token: tokens.aTokenAddress,
                    variable_debt_token: tokens.variableDebtTokenAddress,
                },
            ));
        }

        Ok(reserves)
    }

    async fn read_incentives(
        &self,
        rewards_controller: Address,
        tokens: &[ReserveTokens],
        at: BlockId,
    ) -> Result<Vec<RawIncentive>, ChainError> {
        // (underlying, side, incentivized token)
        let targets: Vec<(Address, IncentiveSide, Address)> = tokens
            .iter()
            .flat_map(|t| {
                [
                    (t.underlying, IncentiveSide::Supply, t.a_token),
                    (t.underlying, IncentiveSide::Borrow, t.variable_debt_token),
                ]
            })
            .collect();

        // Stage 1: reward tokens per incentivized token
        let mut rewarded = Vec::new();
        for chunk in targets.chunks(MAX_CALLS_PER_MULTICALL) {
            let calls = chunk
                .iter()
                .map(|(_, _, token)| {
                    call3(
                        rewards_controller,
                        IRewardsController::getRewardsByAssetCall { asset: *token }.abi_encode(),
                    )
                })
                .collect();

            let results = self.aggregate(calls, at).await?;
            for (target, result) in chunk.iter().zip(results.iter()) {
                let rewards =
                    decode_opt::<IRewardsController::getRewardsByAssetCall>(result).unwrap_or_default();
                for reward in rewards {
                    rewarded.push((*target, reward));
                }
            }
        }

        // Stage 2: emission data per (token, reward)
        let mut incentives = Vec::with_capacity(rewarded.len());
        for chunk in rewarded.chunks(MAX_CALLS_PER_MULTICALL) {
            let calls = chunk
                .iter()
                .map(|((_, _, token), reward)| {
                    call3(
                        rewards_controller,
                        IRewardsController::getRewardsDataCall {
                            asset: *token,
                            reward: *reward,
                        }
                        .abi_encode(),
                    )
                })
                .collect();

            let results = self.aggregate(calls, at).await?;
            for (((underlying, side, _), reward), result) in chunk.iter().zip(results.iter()) {
                let Some(data) = decode_opt::<IRewardsController::getRewardsDataCall>(result) else {
                    debug!("No rewards data for {} reward {}", underlying, reward);
                    continue;
                };

                incentives.push(RawIncentive {
                    underlying_asset: *underlying,
                    side: *side,
                    reward_token: *reward,
                    emission_per_second: data.emissionPerSecond,
                    distribution_end: data.distributionEnd.saturating_to::<u64>(),
                });
            }
        }

        Ok(incentives)
    }
}

#[async_trait]
impl MarketReader for AaveReader {
    async fn head(&self) -> Result<u64, ChainError> {
        self.timed("eth_blockNumber", self.provider.get_block_number())
            .await
    }

    async fn fetch(&self, block: BlockRef) -> Result<RawMarketData, ChainError> {
        let head = self.head().await?;
        let number = match block {
            BlockRef::Latest => head,
            BlockRef::Number(n) if n > head => return Err(ChainError::BlockNotFound(n)),
            BlockRef::Number(n) => n,
        };

        let timestamp = self.block_timestamp(number).await?;
        let at = BlockId::number(number);

        let contracts = self.resolve_market(at).await?;

        let pool = IPool::new(contracts.pool, &self.provider);
        let assets = self
            .timed("getReservesList", pool.getReservesList().block(at).call())
            .await?;

        let base_currency = self.read_base_currency(contracts.oracle, at).await?;

        let oracle = IAaveOracle::new(contracts.oracle, &self.provider);
        let prices = self
            .timed(
                "getAssetsPrices",
                oracle.getAssetsPrices(assets.clone()).block(at).call(),
            )
            .await?;
        if prices.len() != assets.len() {
            return Err(ChainError::Unavailable(format!(
                "Oracle returned {} prices for {} reserves",
                prices.len(),
                assets.len()
            )));
        }

        // Chunks are read concurrently; try_join_all keeps them in reserve-list order.
        let chunks = assets
            .chunks(MULTICALL_BATCH_SIZE)
            .zip(prices.chunks(MULTICALL_BATCH_SIZE))
            .map(|(chunk_assets, chunk_prices)| {
                self.read_reserve_chunk(chunk_assets, chunk_prices, contracts.data_provider, at)
            });

        let mut reserves = Vec::with_capacity(assets.len());
        let mut tokens = Vec::with_capacity(assets.len());
        for (reserve, reserve_tokens) in futures::future::try_join_all(chunks)
            .await?
            .into_iter()
            .flatten()
        {
            reserves.push(reserve);
            tokens.push(reserve_tokens);
        }

        let incentives = match self.rewards_controller {
            Some(controller) => self.read_incentives(controller, &tokens, at).await?,
            None => Vec::new(),
        };

        info!(
            "Read {} reserves and {} incentive records at block {}",
            reserves.len(),
            incentives.len(),
            number
        );

        Ok(RawMarketData {
            network: self.network.clone(),
            chain_id: self.chain_id,
            block_number: number,
            timestamp,
            base_currency,
            reserves,
            incentives,
        })
    }
}
