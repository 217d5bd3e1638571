//! Fixed-point conversion utilities.
//!
//! On-chain figures arrive as U256 integers scaled by token decimals, rays (1e27)
//! or basis points. Everything is converted through BigDecimal and rounded to a
//! fixed scale so the same input always renders to the same decimal.

use alloy::primitives::{I256, U256};
use bigdecimal::{BigDecimal, RoundingMode};
use num_bigint::{BigInt, Sign};
use num_traits::{FromPrimitive, ToPrimitive, Zero};
use once_cell::sync::Lazy;
use std::str::FromStr;

/// Scale every derived amount is rounded to.
pub const DECIMAL_SCALE: i64 = 18;

/// Scale for APY figures; they come out of f64 compounding.
pub const RATE_SCALE: i64 = 10;

pub const RAY_DECIMALS: u8 = 27;

pub const SECONDS_PER_YEAR: f64 = 31_536_000.0;

// ============================================
// U256 Conversions
// ============================================

/// Convert alloy U256 to an exact BigDecimal integer.
pub fn u256_to_decimal(value: U256) -> BigDecimal {
    let bytes: [u8; 32] = value.to_le_bytes();
    let big_int = BigInt::from_bytes_le(Sign::Plus, &bytes);
    BigDecimal::from(big_int)
}

/// Convert a signed feed answer to BigDecimal.
pub fn i256_to_decimal(value: I256) -> BigDecimal {
    BigDecimal::from_str(&value.to_string()).unwrap_or_default()
}

/// Convert a raw token amount into whole token units.
///
/// # Example
/// ```ignore
/// let value = U256::from(1_500_000u64); // 1.5 USDC
/// assert_eq!(humanize(value, 6), BigDecimal::from_str("1.5").unwrap());
/// ```
pub fn humanize(value: U256, decimals: u8) -> BigDecimal {
    scale_down(&u256_to_decimal(value), decimals)
}

/// Divide by 10^decimals and round to `DECIMAL_SCALE`.
pub fn scale_down(value: &BigDecimal, decimals: u8) -> BigDecimal {
    let adjusted = if decimals == 0 { value.clone() } else { value / big_pow10(decimals) };
    round(adjusted)
}

// ============================================
// Rates
// ============================================

/// Basis points (1e4 = 100%) to percent.
pub fn bps_to_percent(bps: U256) -> BigDecimal {
    round(u256_to_decimal(bps) / BigDecimal::from(100))
}

/// Ray-denominated APR to a per-second compounded APY, in percent.
pub fn ray_to_apy_percent(rate: U256) -> BigDecimal {
    let apr = scale_down(&u256_to_decimal(rate), RAY_DECIMALS);
    let apr = apr.to_f64().unwrap_or(0.0);
    if apr <= 0.0 || !apr.is_finite() {
        return BigDecimal::zero();
    }

    let apy = ((1.0 + apr / SECONDS_PER_YEAR).powf(SECONDS_PER_YEAR) - 1.0) * 100.0;

    BigDecimal::from_f64(apy)
        .map(|v| trim(v.with_scale_round(RATE_SCALE, RoundingMode::HalfEven)))
        .unwrap_or_default()
}

/// Multiply a ray-scaled index into an amount: `amount * index / 1e27`.
pub fn ray_mul(amount: U256, index: U256) -> BigDecimal {
    u256_to_decimal(amount) * u256_to_decimal(index) / big_pow10(RAY_DECIMALS)
}

// ============================================
// Rounding
// ============================================

/// Round half-even to `DECIMAL_SCALE` and strip trailing zeros.
pub fn round(value: BigDecimal) -> BigDecimal {
    trim(value.with_scale_round(DECIMAL_SCALE, RoundingMode::HalfEven))
}

/// Strip trailing fractional zeros without turning integers into exponents.
fn trim(value: BigDecimal) -> BigDecimal {
    let normalized = value.normalized();
    let (_, scale) = normalized.as_bigint_and_exponent();
    if scale < 0 {
        normalized.with_scale(0)
    } else {
        normalized
    }
}

/// `numerator / denominator * 100`, or zero when the denominator is zero.
pub fn percent_of(numerator: &BigDecimal, denominator: &BigDecimal) -> BigDecimal {
    if denominator.is_zero() {
        return BigDecimal::zero();
    }
    round(numerator / denominator * BigDecimal::from(100))
}

// ============================================
// Text
// ============================================

/// Remove NUL bytes, which PostgreSQL text columns reject.
pub fn strip_nul(s: &str) -> String {
    s.replace('\0', "")
}

// ============================================
// Internal Helpers
// ============================================

static POW10_CACHE: Lazy<[BigDecimal; 28]> =
    Lazy::new(|| std::array::from_fn(|i| BigDecimal::from(BigInt::from(10u32).pow(i as u32))));

/// Compute 10^exp as BigDecimal.
pub(crate) fn big_pow10(exp: u8) -> BigDecimal {
    if (exp as usize) < POW10_CACHE.len() {
        POW10_CACHE[exp as usize].clone()
    } else {
        BigDecimal::from(BigInt::from(10u32).pow(exp as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_strip_nul() {
        assert_eq!(strip_nul("US\0DC\0"), "USDC");
        assert_eq!(strip_nul("Wrapped Ether"), "Wrapped Ether");
    }

    #[test]
    fn test_humanize_respects_decimals() {
        assert_eq!(humanize(U256::from(1_500_000u64), 6), dec("1.5"));
        assert_eq!(humanize(U256::from(42u64), 0), dec("42"));
        let one_eth = U256::from(10u64).pow(U256::from(18u64));
        assert_eq!(humanize(one_eth, 18), dec("1"));
    }

    #[test]
    fn test_u256_max_is_exact() {
        let max = u256_to_decimal(U256::MAX);
        assert_eq!(max, dec(&U256::MAX.to_string()));
    }

    #[test]
    fn test_bps_to_percent() {
        assert_eq!(bps_to_percent(U256::from(8250u64)), dec("82.5"));
        assert_eq!(bps_to_percent(U256::from(1000u64)), dec("10"));
    }

    #[test]
    fn test_zero_rate_has_zero_apy() {
        assert_eq!(ray_to_apy_percent(U256::ZERO), BigDecimal::zero());
    }

    #[test]
    fn test_apy_compounds_above_apr() {
        // 5% APR in ray
        let rate = U256::from(5u64) * U256::from(10u64).pow(U256::from(25u64));
        let apy = ray_to_apy_percent(rate);
        assert!(apy > dec("5.12"));
        assert!(apy < dec("5.13"));
    }

    #[test]
    fn test_percent_of_zero_denominator() {
        assert_eq!(percent_of(&dec("5"), &BigDecimal::zero()), BigDecimal::zero());
        assert_eq!(percent_of(&dec("400"), &dec("1000")), dec("40"));
    }

    #[test]
    fn test_ray_mul() {
        let ray = U256::from(10u64).pow(U256::from(27u64));
        let index = ray + ray / U256::from(10u64); // 1.1
        assert_eq!(ray_mul(U256::from(100u64), index), dec("110"));
    }
}
