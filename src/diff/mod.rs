pub mod engine;
pub mod report;

pub use engine::{compare, percent_change};
pub use report::{AssetChange, ComparisonReport, FieldChange, MarketChanges, TokenDelta};
