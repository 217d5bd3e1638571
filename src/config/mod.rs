#[allow(clippy::module_inception)]
mod config;

pub use config::{
    ChainSettings, MarketSettings, OutputSettings, PollerSettings, PostgresSettings,
    RetrySettings, Settings, StartPolicy,
};
