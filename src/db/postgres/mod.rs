mod client;
mod ops;

pub use client::PostgresStore;
pub use ops::asset_key;
