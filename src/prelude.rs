//! Platter prelude.
//!
//! Convenience exports for common library consumers.

pub use crate::{
    cart::{
        errors::CartError,
        items::{CartItem, NewCartItem},
        session::{CartSession, EmptyVendorPolicy, SessionStatus},
        vendor::{CartVendor, QuantityChange},
    },
    config::{ConfigError, EngineConfig},
    coupons::{
        AppliedCoupon, Coupon, CouponCode, CouponContext, CouponDiscount, CouponEngine,
        CouponPolicy, CouponRejection, CouponResolution, CouponResolver, InMemoryCouponCatalog,
    },
    fees::{DeliveryEstimate, DeliveryQuote, Distance, FeeError, FeeSchedule},
    geo::{Coordinates, distance_km},
    ids::{CartItemId, CartVendorId, MenuItemId, SessionId, UserId, VendorId},
    loyalty::{
        EntryKind, InMemoryLoyaltyBook, LedgerEntry, LoyaltyBook, LoyaltyError, LoyaltyLedger,
        LoyaltyPolicy, LoyaltyPreview,
    },
    service::{CartAggregationService, Collaborators, CouponRequest, QuantityAdjustment},
    summary::{CartSnapshot, CheckoutSummary, VendorGroupSnapshot, VendorTotalsView},
    totals::{SessionTotals, TotalsWarning, VendorCharges, VendorTotals, calculate_vendor_totals},
    vendors::{InMemoryVendorDirectory, VendorDirectory, VendorProfile},
};
