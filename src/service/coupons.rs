//! Coupon application

use jiff::Timestamp;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::{
    cart::{errors::CartError, session::SessionHandle},
    coupons::{AppliedCoupon, CouponCode, CouponContext, CouponRejection, VendorSubtotal},
    ids::{CartVendorId, UserId, VendorId},
    service::{CartAggregationService, commit_change, ensure_active},
};

/// A code to apply, optionally aimed at one vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponRequest {
    /// Code as typed by the user
    pub code: CouponCode,

    /// Vendor the user wants discounted; the catalog decides when absent
    pub vendor: Option<VendorId>,
}

impl CouponRequest {
    /// Apply `code` wherever the catalog sees fit.
    pub fn new(code: impl Into<CouponCode>) -> Self {
        Self {
            code: code.into(),
            vendor: None,
        }
    }

    /// Ask for the discount to land on `vendor`.
    #[must_use]
    pub fn for_vendor(mut self, vendor: impl Into<VendorId>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }
}

/// Group versions observed while building a coupon context.
type SeenGroups = FxHashMap<VendorId, (CartVendorId, u64)>;

impl CartAggregationService {
    /// Resolve a code with the catalog and write its discount into one vendor group.
    ///
    /// The catalog is consulted without holding any cart lock. If the target
    /// group changes before the discount is written, the code is re-resolved
    /// against the new subtotal, up to `max_retries` times.
    ///
    /// # Errors
    ///
    /// - [`CartError::NoActiveSession`] if the user has no cart.
    /// - [`CartError::CouponAlreadyApplied`] if the policy refuses a second coupon.
    /// - [`CartError::CouponInvalid`] if the catalog rejects the code or the cart is empty.
    /// - [`CartError::ConcurrentModification`] once retries are exhausted.
    #[tracing::instrument(
        name = "cart.service.apply_coupon",
        skip_all,
        fields(user = %user, code = %request.code),
        err
    )]
    pub async fn apply_coupon(
        &self,
        user: &UserId,
        request: CouponRequest,
    ) -> Result<AppliedCoupon, CartError> {
        let session = self.active(user).await?;
        let mut attempt = 0;

        loop {
            match self.try_apply_coupon(&session, &request).await {
                Err(err @ CartError::ConcurrentModification { .. })
                    if attempt < self.config.max_retries =>
                {
                    attempt += 1;
                    debug!(attempt, error = %err, "coupon target changed, resolving again");
                }
                result => return result,
            }
        }
    }

    async fn try_apply_coupon(
        &self,
        session: &SessionHandle,
        request: &CouponRequest,
    ) -> Result<AppliedCoupon, CartError> {
        self.coupons
            .admit(session.coupon.lock().await.as_ref(), &request.code)?;

        let (context, seen) = coupon_context(session, request).await?;
        let resolution = self.coupons.resolve(&context).await?;

        let &(id, version) = seen.get(&resolution.target_vendor).ok_or_else(|| {
            CartError::CouponInvalid {
                code: request.code.to_string(),
                reason: CouponRejection::VendorNotInCart(resolution.target_vendor.clone()),
            }
        })?;

        let mut coupon = session.coupon.lock().await;

        let displaced = self
            .coupons
            .admit(coupon.as_ref(), &request.code)?
            .map(|applied| applied.cart_vendor)
            .filter(|&displaced| displaced != id);

        let groups = session.groups.read().await;
        ensure_active(&groups, session)?;

        let slot = groups.slot(id).ok_or(CartError::CartVendorNotFound(id))?;
        let mut target = slot.lock().await;

        target.check_version(Some(version))?;

        let previous_slot = displaced.and_then(|displaced| groups.slot(displaced));
        let mut previous = match &previous_slot {
            Some(slot) => Some(slot.lock().await),
            None => None,
        };

        // Every lock is held; nothing below awaits.
        if let Some(previous) = previous.as_deref_mut() {
            previous.clear_coupon_discount();
            previous.commit();
        }

        commit_change(&mut target, Some(version), |next| {
            next.set_coupon_discount(resolution.discount_amount);
            Ok(())
        })?;

        let applied = AppliedCoupon {
            code: request.code.clone(),
            cart_vendor: id,
            vendor: target.vendor().clone(),
            discount: resolution.discount_amount,
        };

        *coupon = Some(applied.clone());

        info!(
            cart_vendor = %id,
            vendor = %applied.vendor,
            discount = %applied.discount,
            replaced = displaced.is_some(),
            "applied coupon"
        );

        Ok(applied)
    }

    /// Drop the session's coupon and its discount.
    ///
    /// Returns the removed coupon, or `None` if none was applied.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::NoActiveSession`] if the user has no cart.
    #[tracing::instrument(name = "cart.service.remove_coupon", skip_all, fields(user = %user), err)]
    pub async fn remove_coupon(&self, user: &UserId) -> Result<Option<AppliedCoupon>, CartError> {
        let session = self.active(user).await?;

        let mut coupon = session.coupon.lock().await;
        let groups = session.groups.read().await;
        ensure_active(&groups, &session)?;

        let Some(applied) = coupon.clone() else {
            return Ok(None);
        };

        if let Some(slot) = groups.slot(applied.cart_vendor) {
            let mut group = slot.lock().await;

            commit_change(&mut group, None, |next| {
                next.clear_coupon_discount();
                Ok(())
            })?;
        }

        *coupon = None;

        info!(code = %applied.code, vendor = %applied.vendor, "removed coupon");

        Ok(Some(applied))
    }
}

/// Capture non-empty vendor subtotals and the versions they were read at.
async fn coupon_context(
    session: &SessionHandle,
    request: &CouponRequest,
) -> Result<(CouponContext, SeenGroups), CartError> {
    let groups = session.groups.read().await;
    ensure_active(&groups, session)?;

    let mut vendors = Vec::with_capacity(groups.len());
    let mut seen = SeenGroups::default();

    for slot in groups.slots() {
        let group = slot.lock().await;

        if group.is_empty() {
            continue;
        }

        vendors.push(VendorSubtotal {
            vendor: group.vendor().clone(),
            subtotal: group.totals().subtotal,
        });

        seen.insert(group.vendor().clone(), (group.id(), group.version()));
    }

    if vendors.is_empty() {
        return Err(CartError::CouponInvalid {
            code: request.code.to_string(),
            reason: CouponRejection::EmptyCart,
        });
    }

    let context = CouponContext {
        session: session.id,
        user: session.user.clone(),
        code: request.code.clone(),
        requested_vendor: request.vendor.clone(),
        vendors,
        now: Timestamp::now(),
    };

    Ok((context, seen))
}
