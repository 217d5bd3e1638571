use async_trait::async_trait;

use crate::error::StoreError;

pub mod models;
pub mod postgres;

#[cfg(test)]
pub(crate) mod memory;

pub use models::{Cap, MarketAggregate, Snapshot, TokenMetric};
pub use postgres::PostgresStore;

/// Durable snapshot storage keyed by block number.
///
/// A block holds at most one snapshot; storing it again replaces it as a whole.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Create the schema if missing and register `known_symbols` in the asset
    /// registry. Safe to call any number of times.
    async fn ensure_schema(&self, known_symbols: &[String]) -> Result<(), StoreError>;

    /// Atomically write or replace the snapshot of its block.
    async fn put(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// Up to `limit` market aggregates, newest block first.
    async fn get_recent(&self, limit: i64) -> Result<Vec<MarketAggregate>, StoreError>;

    /// Full snapshot of `block_number`, or `StoreError::NotFound`.
    async fn get_snapshot_at_block(&self, block_number: u64) -> Result<Snapshot, StoreError>;

    /// Highest stored block, if any.
    async fn latest_block(&self) -> Result<Option<u64>, StoreError>;
}
