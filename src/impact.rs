//! Price impact between two price samples.

use crate::errors::{AppError, Result};
use bigdecimal::BigDecimal;
use ethers::types::U256;
use num_bigint::{BigInt, Sign};
use num_traits::{ToPrimitive, Zero};
use std::str::FromStr;

/// Parts-per-million scale used for the integer step.
const PPM: u32 = 1_000_000;
/// PPM to percent.
const PPM_PER_PERCENT: f64 = 10_000.0;

pub(crate) fn u256_to_bigint(value: U256) -> BigInt {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    BigInt::from_bytes_be(Sign::Plus, &bytes)
}

/// Saturates above `U256::MAX`; negative values clamp to zero.
pub(crate) fn bigint_to_u256(value: &BigInt) -> U256 {
    if value.sign() != Sign::Plus {
        return U256::zero();
    }
    let (_, bytes) = value.to_bytes_be();
    if bytes.len() > 32 {
        return U256::MAX;
    }
    U256::from_big_endian(&bytes)
}

/// Percentage change from `before` to `after`, four decimal places.
///
/// The delta is scaled to parts per million with exact integer arithmetic
/// (truncating toward zero) before the single conversion to `f64`. A zero
/// `before` yields `0.0`.
pub fn price_impact_percent(before: U256, after: U256) -> f64 {
    if before.is_zero() {
        return 0.0;
    }
    let before = u256_to_bigint(before);
    let after = u256_to_bigint(after);
    let ppm: BigInt = (after - &before) * BigInt::from(PPM) / before;
    if ppm.is_zero() {
        return 0.0;
    }
    ppm.to_f64().unwrap_or(f64::NAN) / PPM_PER_PERCENT
}

/// Raw token amount rendered with its decimals, for logs and report details.
pub fn format_units(amount: U256, decimals: u8) -> String {
    let value = BigDecimal::new(u256_to_bigint(amount), i64::from(decimals)).normalized();
    // Whole amounts normalize to a negative scale; print them without an exponent.
    let (_, scale) = value.as_bigint_and_exponent();
    if scale < 0 {
        value.with_scale(0).to_string()
    } else {
        value.to_string()
    }
}

/// Parse a human amount such as `"0.25"` into raw units. Extra precision is truncated.
pub fn parse_units(amount: &str, decimals: u8) -> Result<U256> {
    let value = BigDecimal::from_str(amount.trim())
        .map_err(|err| AppError::Config(format!("invalid amount `{amount}`: {err}")))?;
    let scaled = (value * BigDecimal::new(BigInt::from(1u8), -i64::from(decimals))).with_scale(0);
    let (raw, _) = scaled.into_bigint_and_exponent();
    if raw.sign() == Sign::Minus {
        return Err(AppError::Config(format!("negative amount `{amount}`")));
    }
    Ok(bigint_to_u256(&raw))
}
