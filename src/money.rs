//! Money
//!
//! Amounts are carried as full-precision [`Decimal`]s everywhere inside the
//! engine. Conversion to [`Money`] (and therefore rounding) only happens when a
//! value leaves the engine through a read model.

use num_traits::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rusty_money::{
    Money,
    iso::{Currency, EUR, GBP, INR, NPR, USD},
};
use thiserror::Error;

/// Decimal places kept when presenting an amount.
pub const PRESENTATION_DP: u32 = 2;

/// Currency used when a session does not name one.
pub const DEFAULT_CURRENCY_CODE: &str = "NPR";

/// Errors converting engine amounts into presentable money.
#[derive(Debug, Error, PartialEq)]
pub enum AmountError {
    /// The currency code is not one the engine prices in.
    #[error("unknown currency code: {0}")]
    UnknownCurrency(String),

    /// The rounded amount does not fit in minor units.
    #[error("amount {0} cannot be represented in minor units")]
    Overflow(Decimal),
}

/// Resolve a supported ISO currency from its alpha code.
///
/// # Errors
///
/// Returns [`AmountError::UnknownCurrency`] for codes outside the supported set.
pub fn currency_from_code(code: &str) -> Result<&'static Currency, AmountError> {
    match code.trim().to_ascii_uppercase().as_str() {
        "NPR" => Ok(NPR),
        "INR" => Ok(INR),
        "USD" => Ok(USD),
        "GBP" => Ok(GBP),
        "EUR" => Ok(EUR),
        other => Err(AmountError::UnknownCurrency(other.to_string())),
    }
}

/// Round an amount for display.
#[must_use]
pub fn round_for_display(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(PRESENTATION_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Clamp an amount at zero.
#[must_use]
pub fn non_negative(amount: Decimal) -> Decimal {
    amount.max(Decimal::ZERO)
}

/// Convert a full-precision amount into presentable [`Money`].
///
/// # Errors
///
/// Returns [`AmountError::Overflow`] when the rounded amount does not fit in
/// `i64` minor units.
pub fn present(
    amount: Decimal,
    currency: &'static Currency,
) -> Result<Money<'static, Currency>, AmountError> {
    let minor = round_for_display(amount)
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|value| value.trunc().to_i64())
        .ok_or(AmountError::Overflow(amount))?;

    Ok(Money::from_minor(minor, currency))
}
