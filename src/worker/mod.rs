pub mod aave_reader;
pub mod poller;
pub mod reader;
pub mod transform;

pub use aave_reader::AaveReader;
pub use poller::{fetch_snapshot, ingest_block, Poller, PollerState, SnapshotSink, TickOutcome};
pub use reader::{BlockRef, MarketReader, RawMarketData};
pub use transform::transform;
