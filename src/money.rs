//! Monetary amount helpers
//!
//! All amounts in the system are fixed-point decimals with 2 fractional
//! digits. Normalization happens once at the intake boundary; everything
//! downstream can assume a well-formed amount.

use rust_decimal::Decimal;

/// Number of fractional digits carried by every monetary amount.
pub const MONEY_SCALE: u32 = 2;

/// Normalize an amount to the canonical 2-decimal-place representation.
///
/// Uses banker's rounding, matching NUMERIC(15,2) column behavior.
pub fn normalize(amount: Decimal) -> Decimal {
    amount.round_dp(MONEY_SCALE)
}

/// A valid transaction amount is strictly positive and survives
/// normalization without collapsing to zero (e.g. 0.001 is invalid).
pub fn is_valid_amount(amount: Decimal) -> bool {
    amount > Decimal::ZERO && normalize(amount) > Decimal::ZERO
}
