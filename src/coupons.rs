//! Coupons
//!
//! Coupon validation belongs to an external catalog behind [`CouponResolver`].
//! The engine only receives a resolved discount and the vendor it targets,
//! then decides whether the session may take it.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use jiff::Timestamp;
use mockall::automock;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{
    cart::errors::CartError,
    ids::{CartVendorId, SessionId, UserId, VendorId},
};

/// A normalised (trimmed, upper-case) coupon code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CouponCode(String);

impl CouponCode {
    /// Normalise a raw code.
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    /// The normalised code
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CouponCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CouponCode {
    fn from(code: String) -> Self {
        Self::new(code)
    }
}

impl From<&str> for CouponCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl From<CouponCode> for String {
    fn from(code: CouponCode) -> Self {
        code.0
    }
}

/// One vendor group's subtotal, as seen when a coupon is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorSubtotal {
    /// Vendor
    pub vendor: VendorId,

    /// Items subtotal at resolution time
    pub subtotal: Decimal,
}

/// Everything a catalog needs to resolve a code.
#[derive(Debug, Clone, PartialEq)]
pub struct CouponContext {
    /// Session the code is applied to
    pub session: SessionId,

    /// Owning user
    pub user: UserId,

    /// Code as entered
    pub code: CouponCode,

    /// Vendor the user asked to apply it to, if any
    pub requested_vendor: Option<VendorId>,

    /// Non-empty vendor groups in the session
    pub vendors: Vec<VendorSubtotal>,

    /// Resolution time
    pub now: Timestamp,
}

impl CouponContext {
    /// Subtotal for one vendor, if it is in the cart.
    #[must_use]
    pub fn subtotal_for(&self, vendor: &VendorId) -> Option<Decimal> {
        self.vendors
            .iter()
            .find(|entry| &entry.vendor == vendor)
            .map(|entry| entry.subtotal)
    }
}

/// A catalog's answer: how much to take off, and from which vendor.
#[derive(Debug, Clone, PartialEq)]
pub struct CouponResolution {
    /// Discount to write into the vendor group
    pub discount_amount: Decimal,

    /// Vendor the discount applies to
    pub target_vendor: VendorId,
}

/// Why a catalog refused a code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponRejection {
    /// No coupon with this code exists.
    #[error("no such coupon")]
    NotFound,

    /// The coupon is switched off.
    #[error("coupon is not active")]
    Inactive,

    /// The coupon is restricted to another vendor.
    #[error("coupon is not valid for vendor {0}")]
    WrongVendor(VendorId),

    /// The coupon's target vendor is not in the cart.
    #[error("vendor {0} is not in the cart")]
    VendorNotInCart(VendorId),

    /// The cart has nothing to discount.
    #[error("cart is empty")]
    EmptyCart,

    /// Outside the validity window.
    #[error("coupon is not valid at this time")]
    OutsideValidity,

    /// The user has used the coupon as often as allowed.
    #[error("coupon usage limit reached")]
    UsageLimitReached,

    /// The subtotal is below the coupon minimum.
    #[error("order subtotal {subtotal} is below the minimum {minimum}")]
    MinimumNotMet {
        /// Required subtotal
        minimum: Decimal,

        /// Actual subtotal
        subtotal: Decimal,
    },

    /// The catalog produced a negative discount.
    #[error("resolved discount {0} is negative")]
    NegativeDiscount(Decimal),

    /// The catalog could not be reached.
    #[error("coupon catalog unavailable: {0}")]
    Unavailable(String),
}

/// External coupon catalog.
#[automock]
#[async_trait]
pub trait CouponResolver: Send + Sync {
    /// Validate a code against the cart and price its discount.
    async fn resolve(&self, context: &CouponContext) -> Result<CouponResolution, CouponRejection>;

    /// Record that `user` redeemed `code` in a placed order.
    async fn record_usage(&self, user: &UserId, code: &CouponCode) -> Result<(), CouponRejection>;
}

/// What to do when a coupon is applied to a session that already has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CouponPolicy {
    /// Refuse with [`CartError::CouponAlreadyApplied`].
    #[default]
    Reject,

    /// Move the discount to the new coupon.
    Replace,
}

/// A coupon held by a session.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedCoupon {
    /// Code
    pub code: CouponCode,

    /// Vendor group carrying the discount
    pub cart_vendor: CartVendorId,

    /// Vendor carrying the discount
    pub vendor: VendorId,

    /// Discount written into the group
    pub discount: Decimal,
}

/// Validates and admits coupons for a session.
#[derive(Clone)]
pub struct CouponEngine {
    resolver: Arc<dyn CouponResolver>,
    policy: CouponPolicy,
}

impl fmt::Debug for CouponEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CouponEngine")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl CouponEngine {
    /// Create an engine over a catalog.
    pub fn new(resolver: Arc<dyn CouponResolver>, policy: CouponPolicy) -> Self {
        Self { resolver, policy }
    }

    /// Re-apply policy in force
    pub fn policy(&self) -> CouponPolicy {
        self.policy
    }

    /// Decide whether `code` may be applied given the session's current coupon.
    ///
    /// Returns the coupon that must be displaced, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::CouponAlreadyApplied`] under [`CouponPolicy::Reject`]
    /// when the session already holds a coupon, or under either policy when it
    /// already holds this very code.
    pub fn admit<'a>(
        &self,
        current: Option<&'a AppliedCoupon>,
        code: &CouponCode,
    ) -> Result<Option<&'a AppliedCoupon>, CartError> {
        match (current, self.policy) {
            (None, _) => Ok(None),
            (Some(applied), CouponPolicy::Replace) if &applied.code != code => Ok(Some(applied)),
            (Some(applied), _) => Err(CartError::CouponAlreadyApplied(applied.code.to_string())),
        }
    }

    /// Resolve a code against the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::CouponInvalid`] if the catalog rejects the code,
    /// targets a vendor not in the cart, or returns a negative discount.
    pub async fn resolve(&self, context: &CouponContext) -> Result<CouponResolution, CartError> {
        let invalid = |reason| CartError::CouponInvalid {
            code: context.code.to_string(),
            reason,
        };

        let resolution = self.resolver.resolve(context).await.map_err(invalid)?;

        if context.subtotal_for(&resolution.target_vendor).is_none() {
            return Err(invalid(CouponRejection::VendorNotInCart(
                resolution.target_vendor,
            )));
        }

        if resolution.discount_amount.is_sign_negative() && !resolution.discount_amount.is_zero() {
            return Err(invalid(CouponRejection::NegativeDiscount(
                resolution.discount_amount,
            )));
        }

        Ok(resolution)
    }

    /// Tell the catalog a coupon was redeemed.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::CouponInvalid`] if the catalog refuses the usage.
    pub async fn record_usage(&self, user: &UserId, code: &CouponCode) -> Result<(), CartError> {
        self.resolver
            .record_usage(user, code)
            .await
            .map_err(|reason| CartError::CouponInvalid {
                code: code.to_string(),
                reason,
            })
    }
}

/// How a coupon computes its discount.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CouponDiscount {
    /// Percentage of the vendor subtotal, optionally capped.
    Percent {
        /// Percentage, e.g. `20` for 20%
        value: Decimal,

        /// Upper bound on the discount
        #[serde(default)]
        max_discount: Option<Decimal>,
    },

    /// Fixed amount.
    Flat {
        /// Amount off
        value: Decimal,
    },
}

impl CouponDiscount {
    /// Discount for a given subtotal.
    #[must_use]
    pub fn amount(&self, subtotal: Decimal) -> Decimal {
        match *self {
            Self::Percent {
                value,
                max_discount,
            } => {
                let discount = value / Decimal::ONE_HUNDRED * subtotal;

                max_discount.map_or(discount, |cap| discount.min(cap))
            }
            Self::Flat { value } => value,
        }
    }
}

/// A coupon as held by [`InMemoryCouponCatalog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    /// Code
    pub code: CouponCode,

    /// Restrict to one vendor; `None` means any vendor
    #[serde(default)]
    pub vendor: Option<VendorId>,

    /// Discount rule
    pub discount: CouponDiscount,

    /// Minimum vendor subtotal
    #[serde(default)]
    pub min_order_amount: Decimal,

    /// Redemptions allowed per user
    #[serde(default = "Coupon::default_per_user_limit")]
    pub per_user_limit: u32,

    /// Valid from (inclusive)
    #[serde(default)]
    pub starts_at: Option<Timestamp>,

    /// Valid until (inclusive)
    #[serde(default)]
    pub ends_at: Option<Timestamp>,

    /// Whether the coupon can be used at all
    #[serde(default = "Coupon::default_active")]
    pub active: bool,
}

impl Coupon {
    fn default_per_user_limit() -> u32 {
        1
    }

    fn default_active() -> bool {
        true
    }

    /// An active, unrestricted coupon usable once per user.
    pub fn new(code: impl Into<CouponCode>, discount: CouponDiscount) -> Self {
        Self {
            code: code.into(),
            vendor: None,
            discount,
            min_order_amount: Decimal::ZERO,
            per_user_limit: Self::default_per_user_limit(),
            starts_at: None,
            ends_at: None,
            active: true,
        }
    }

    fn is_valid_at(&self, now: Timestamp) -> bool {
        self.starts_at.is_none_or(|start| now >= start) && self.ends_at.is_none_or(|end| now <= end)
    }
}

/// Reference in-process coupon catalog.
#[derive(Debug, Default)]
pub struct InMemoryCouponCatalog {
    coupons: RwLock<FxHashMap<CouponCode, Coupon>>,
    usages: RwLock<FxHashMap<(CouponCode, UserId), u32>>,
}

impl InMemoryCouponCatalog {
    /// A catalog holding `coupons`.
    pub fn new(coupons: impl IntoIterator<Item = Coupon>) -> Self {
        Self {
            coupons: RwLock::new(
                coupons
                    .into_iter()
                    .map(|coupon| (coupon.code.clone(), coupon))
                    .collect(),
            ),
            usages: RwLock::default(),
        }
    }

    /// Add or replace a coupon.
    pub async fn insert(&self, coupon: Coupon) {
        self.coupons.write().await.insert(coupon.code.clone(), coupon);
    }

    /// Times `user` has redeemed `code`.
    pub async fn usage_count(&self, user: &UserId, code: &CouponCode) -> u32 {
        self.usages
            .read()
            .await
            .get(&(code.clone(), user.clone()))
            .copied()
            .unwrap_or_default()
    }

    /// Pick the vendor a coupon lands on: its own vendor if restricted, the
    /// requested vendor if given, otherwise the largest subtotal.
    fn target(coupon: &Coupon, context: &CouponContext) -> Result<VendorSubtotal, CouponRejection> {
        let wanted = match (&coupon.vendor, &context.requested_vendor) {
            (Some(restricted), Some(requested)) if restricted != requested => {
                return Err(CouponRejection::WrongVendor(requested.clone()));
            }
            (Some(vendor), _) | (None, Some(vendor)) => Some(vendor),
            (None, None) => None,
        };

        match wanted {
            Some(vendor) => context
                .vendors
                .iter()
                .find(|entry| &entry.vendor == vendor)
                .cloned()
                .ok_or_else(|| CouponRejection::VendorNotInCart(vendor.clone())),
            None => context
                .vendors
                .iter()
                .max_by_key(|entry| entry.subtotal)
                .cloned()
                .ok_or(CouponRejection::EmptyCart),
        }
    }
}

#[async_trait]
impl CouponResolver for InMemoryCouponCatalog {
    async fn resolve(&self, context: &CouponContext) -> Result<CouponResolution, CouponRejection> {
        let coupon = self
            .coupons
            .read()
            .await
            .get(&context.code)
            .cloned()
            .ok_or(CouponRejection::NotFound)?;

        if !coupon.active {
            return Err(CouponRejection::Inactive);
        }

        let target = Self::target(&coupon, context)?;

        if !coupon.is_valid_at(context.now) {
            return Err(CouponRejection::OutsideValidity);
        }

        if self.usage_count(&context.user, &coupon.code).await >= coupon.per_user_limit {
            return Err(CouponRejection::UsageLimitReached);
        }

        if target.subtotal < coupon.min_order_amount {
            return Err(CouponRejection::MinimumNotMet {
                minimum: coupon.min_order_amount,
                subtotal: target.subtotal,
            });
        }

        Ok(CouponResolution {
            discount_amount: coupon.discount.amount(target.subtotal),
            target_vendor: target.vendor,
        })
    }

    async fn record_usage(&self, user: &UserId, code: &CouponCode) -> Result<(), CouponRejection> {
        if !self.coupons.read().await.contains_key(code) {
            return Err(CouponRejection::NotFound);
        }

        let mut usages = self.usages.write().await;
        let count = usages.entry((code.clone(), user.clone())).or_default();
        *count = count.saturating_add(1);

        Ok(())
    }
}
