mod cap;
mod snapshot;
mod token_metric;

pub use cap::Cap;
pub use snapshot::{format_date, MarketAggregate, Snapshot};
pub use token_metric::TokenMetric;
