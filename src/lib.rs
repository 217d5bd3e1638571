pub mod abis;
pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod output;
pub mod utils;
pub mod worker;

pub use config::Settings;
pub use db::{PostgresStore, SnapshotStore};
pub use diff::{compare, ComparisonReport};
pub use error::{ChainError, PipelineError, StoreError};
pub use output::{ComparisonFile, SnapshotFiles};
pub use worker::{AaveReader, MarketReader, Poller};
