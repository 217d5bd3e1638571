pub mod conversion;
pub mod retry;

// ============================================
// Re-exports
// ============================================

// Conversion utilities
pub use conversion::{
    bps_to_percent, humanize, i256_to_decimal, percent_of, ray_mul, ray_to_apy_percent, round,
    scale_down, strip_nul, u256_to_decimal, DECIMAL_SCALE,
};

// Retry utilities
pub use retry::{backoff_delay, with_retry};
