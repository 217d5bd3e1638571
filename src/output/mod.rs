pub mod files;

pub use files::{ComparisonFile, SnapshotFiles};
