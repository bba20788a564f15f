//! Cart errors

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{
    coupons::CouponRejection,
    fees::FeeError,
    ids::{CartItemId, CartVendorId, MenuItemId, UserId, VendorId},
    loyalty::LoyaltyError,
    money::AmountError,
};

/// Errors surfaced by cart mutations and reads.
#[derive(Debug, Error)]
pub enum CartError {
    /// Quantities must be at least one.
    #[error("invalid quantity {0}; must be at least 1")]
    InvalidQuantity(i64),

    /// Unit prices must not be negative.
    #[error("invalid unit price {0}; must not be negative")]
    InvalidPrice(Decimal),

    /// Line discounts must not be negative.
    #[error("invalid discount amount {0}; must not be negative")]
    InvalidDiscount(Decimal),

    /// A delivery distance was negative or not finite.
    #[error(transparent)]
    InvalidDistance(#[from] FeeError),

    /// No line for this menu item exists in the vendor group.
    #[error("menu item {0} is not in the cart")]
    ItemNotFound(MenuItemId),

    /// No line with this id exists in the session.
    #[error("cart item {0} not found")]
    CartItemNotFound(CartItemId),

    /// The vendor group does not exist in the user's active session.
    #[error("cart vendor {0} not found")]
    CartVendorNotFound(CartVendorId),

    /// The vendor is unknown to the vendor directory, or not in the cart.
    #[error("vendor {0} not found")]
    VendorNotFound(VendorId),

    /// The vendor does not deliver.
    #[error("vendor {0} does not offer delivery")]
    DeliveryUnavailable(VendorId),

    /// The user has no active session.
    #[error("user {0} has no active cart")]
    NoActiveSession(UserId),

    /// Checkout needs at least one line.
    #[error("cart for user {0} is empty")]
    EmptyCart(UserId),

    /// A coupon is already applied to the session.
    #[error("coupon {0} is already applied to this cart")]
    CouponAlreadyApplied(String),

    /// The coupon was rejected by the catalog.
    #[error("coupon {code} is invalid: {reason}")]
    CouponInvalid {
        /// The rejected code
        code: String,

        /// Why it was rejected
        reason: CouponRejection,
    },

    /// The vendor group changed under the caller; retry with a fresh read.
    #[error("cart vendor {cart_vendor} was modified concurrently (expected version {expected}, found {actual})")]
    ConcurrentModification {
        /// Vendor group that conflicted
        cart_vendor: CartVendorId,

        /// Version the caller based its change on
        expected: u64,

        /// Version found at commit time
        actual: u64,
    },

    /// Loyalty bookkeeping failed.
    #[error(transparent)]
    Loyalty(#[from] LoyaltyError),

    /// An amount could not be presented.
    #[error(transparent)]
    Amount(#[from] AmountError),
}

impl CartError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_version_conflicts_are_retryable() {
        let conflict = CartError::ConcurrentModification {
            cart_vendor: CartVendorId::generate(),
            expected: 1,
            actual: 2,
        };

        assert!(conflict.is_retryable());
        assert!(!CartError::InvalidQuantity(0).is_retryable());
        assert!(!CartError::ItemNotFound(MenuItemId::from("momo")).is_retryable());
    }

    #[test]
    fn distance_errors_convert() {
        let err = CartError::from(FeeError::InvalidDistance(-1.0));

        assert!(matches!(err, CartError::InvalidDistance(_)));
        assert_eq!(err.to_string(), "invalid delivery distance: -1 km");
    }
}
