use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// PostgreSQL database connection configuration.
///
/// Used for storing:
/// - Market aggregates per block
/// - The asset registry
/// - Per-asset metrics per block
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    16
}

/// Chain access and lending market addresses.
#[derive(Debug, Deserialize, Clone)]
pub struct ChainSettings {
    pub rpc_url: String,
    /// Human readable network label written into every snapshot (e.g. "base").
    pub network: String,
    pub chain_id: u64,
    /// PoolAddressesProvider of the market; everything else is resolved from it.
    pub pool_addresses_provider: String,
    /// RewardsController used for incentive records. No incentives are read when unset.
    #[serde(default)]
    pub rewards_controller: Option<String>,
    /// Chainlink feed pricing the oracle's base currency in USD.
    /// Only needed for markets whose oracle is not USD denominated.
    #[serde(default)]
    pub reference_usd_feed: Option<String>,
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,
}

fn default_rpc_timeout() -> u64 {
    30_000
}

/// Where the poller starts its block cursor.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// Start at the live chain head; blocks produced while the process was down are skipped.
    #[default]
    ChainHead,
    /// Start at `max(last stored block, head - safety_margin)` and ingest every
    /// block after it in order, `max_blocks_per_tick` at a time, until the
    /// head is reached. Blocks older than the safety margin are not backfilled.
    Resume,
}

/// Retry policy applied to chain reads and store writes inside a poller tick.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    200
}

fn default_max_delay() -> u64 {
    5_000
}

/// Continuous ingestion loop configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct PollerSettings {
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
    /// Wait applied once a new head is seen, to tolerate provider propagation lag.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    #[serde(default)]
    pub start: StartPolicy,
    #[serde(default)]
    pub safety_margin: u64,
    /// Upper bound on blocks ingested by one tick under `StartPolicy::Resume`.
    #[serde(default = "default_max_blocks_per_tick")]
    pub max_blocks_per_tick: u64,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            settle_delay_ms: default_settle_delay(),
            start: StartPolicy::default(),
            safety_margin: 0,
            max_blocks_per_tick: default_max_blocks_per_tick(),
            retry: RetrySettings::default(),
        }
    }
}

fn default_poll_interval() -> u64 {
    2_000
}

fn default_settle_delay() -> u64 {
    1_000
}

fn default_max_blocks_per_tick() -> u64 {
    50
}

/// Snapshot and comparison JSON output.
#[derive(Debug, Deserialize, Clone)]
pub struct OutputSettings {
    #[serde(default = "default_output_dir")]
    pub dir: String,
    #[serde(default = "default_write_files")]
    pub write_files: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            write_files: default_write_files(),
        }
    }
}

fn default_output_dir() -> String {
    "snapshots".to_string()
}

fn default_write_files() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MarketSettings {
    /// Symbols registered by `init` before any snapshot is stored.
    #[serde(default)]
    pub tracked_symbols: Vec<String>,
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup, with `LENDWATCH__<SECTION>__<KEY>`
/// environment variables taking precedence.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub postgres: PostgresSettings,
    pub chain: ChainSettings,
    #[serde(default)]
    pub poller: PollerSettings,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub market: MarketSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file("config")
    }

    pub fn from_file(name: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(name))
            .add_source(Environment::with_prefix("LENDWATCH").separator("__"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn parse(yaml: &str) -> Settings {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_fill_optional_sections() {
        let settings = parse(
            r#"
postgres:
  host: localhost
  port: 5432
  user: lendwatch
  password: secret
  database: lendwatch
chain:
  rpc_url: http://localhost:8545
  network: base
  chain_id: 8453
  pool_addresses_provider: "0xe20fCBdBfFC4Dd138cE8b2E6FBb6CB49777ad64D"
"#,
        );

        assert_eq!(settings.postgres.pool_size, 16);
        assert_eq!(settings.poller.interval_ms, 2_000);
        assert_eq!(settings.poller.start, StartPolicy::ChainHead);
        assert_eq!(settings.poller.max_blocks_per_tick, 50);
        assert_eq!(settings.poller.retry.max_attempts, 3);
        assert_eq!(settings.output.dir, "snapshots");
        assert!(settings.output.write_files);
        assert!(settings.chain.rewards_controller.is_none());
        assert!(settings.market.tracked_symbols.is_empty());
    }

    #[test]
    fn test_resume_policy_and_retry_overrides() {
        let settings = parse(
            r#"
postgres:
  host: localhost
  port: 5432
  user: u
  password: p
  database: d
chain:
  rpc_url: http://localhost:8545
  network: mainnet
  chain_id: 1
  pool_addresses_provider: "0x2f39d218133AFaB8F2B819B1066c7E434Ad94E9e"
poller:
  start: resume
  safety_margin: 50
  max_blocks_per_tick: 10
  retry:
    max_attempts: 7
market:
  tracked_symbols: [WETH, USDC]
"#,
        );

        assert_eq!(settings.poller.start, StartPolicy::Resume);
        assert_eq!(settings.poller.safety_margin, 50);
        assert_eq!(settings.poller.max_blocks_per_tick, 10);
        assert_eq!(settings.poller.retry.max_attempts, 7);
        assert_eq!(settings.poller.retry.base_delay_ms, 200);
        assert_eq!(settings.market.tracked_symbols, vec!["WETH", "USDC"]);
    }
}
