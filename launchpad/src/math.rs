//! Checked fixed-point helpers shared by the vault and the sale engine.
//!
//! All helpers floor. Overflow and division by zero are reported, never saturated.

use crate::{error::LaunchpadError, Balance};

/// Basis points denominator (100% == 10_000 bps).
pub const BPS_DENOM: u128 = 10_000;

/// Largest contribution-token decimal scale accepted; 10^30 leaves headroom in u128 products.
pub const MAX_DECIMALS: u8 = 30;

/// Compute (a * b) / d with checked u128 arithmetic.
pub fn mul_div(a: u128, b: u128, d: u128) -> Result<u128, LaunchpadError> {
    if d == 0 {
        return Err(LaunchpadError::MathOverflow);
    }
    a.checked_mul(b)
        .map(|p| p / d)
        .ok_or(LaunchpadError::MathOverflow)
}

/// `amount * bps / 10_000`, floored.
pub fn bps_of(amount: Balance, bps: u16) -> Result<Balance, LaunchpadError> {
    mul_div(amount, bps as u128, BPS_DENOM)
}

pub fn checked_add(a: Balance, b: Balance) -> Result<Balance, LaunchpadError> {
    a.checked_add(b).ok_or(LaunchpadError::MathOverflow)
}

pub fn checked_sub(a: Balance, b: Balance) -> Result<Balance, LaunchpadError> {
    a.checked_sub(b).ok_or(LaunchpadError::MathOverflow)
}

/// Shares minted for a deposit of `amount` into a pool holding `total_underlying`.
/// An empty pool (no shares or no underlying) mints 1:1.
pub fn shares_for_deposit(
    amount: Balance,
    total_shares: Balance,
    total_underlying: Balance,
) -> Result<Balance, LaunchpadError> {
    if total_shares == 0 || total_underlying == 0 {
        return Ok(amount);
    }
    mul_div(amount, total_shares, total_underlying)
}

/// Underlying value of `shares` in a pool of `total_shares` backed by `total_underlying`.
pub fn underlying_for_shares(
    shares: Balance,
    total_shares: Balance,
    total_underlying: Balance,
) -> Result<Balance, LaunchpadError> {
    if total_shares == 0 {
        return Ok(0);
    }
    mul_div(shares, total_underlying, total_shares)
}

/// 10^decimals as u128.
pub fn pow10(decimals: u8) -> Result<u128, LaunchpadError> {
    if decimals > MAX_DECIMALS {
        return Err(LaunchpadError::InvalidConfig(format!(
            "decimals {decimals} > {MAX_DECIMALS}"
        )));
    }
    10u128.checked_pow(decimals as u32).ok_or(LaunchpadError::MathOverflow)
}

/// Sale tokens bought by `contributed` base units of the contribution token.
/// `rate` is sale-token base units per whole contribution token.
pub fn tokens_for_contribution(
    contributed: Balance,
    rate: Balance,
    decimals: u8,
) -> Result<Balance, LaunchpadError> {
    mul_div(contributed, rate, pow10(decimals)?)
}

/// Contribution-token base units needed to buy `tokens` sale tokens (floored).
pub fn contribution_for_tokens(
    tokens: Balance,
    rate: Balance,
    decimals: u8,
) -> Result<Balance, LaunchpadError> {
    if rate == 0 {
        return Err(LaunchpadError::InvalidConfig("rate must be > 0".into()));
    }
    mul_div(tokens, pow10(decimals)?, rate)
}
