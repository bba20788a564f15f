//! Vendor and session totals
//!
//! Totals are always derived from a vendor group's items and charges. They are
//! cached on the group but never treated as a source of truth.

use rust_decimal::Decimal;
use smallvec::SmallVec;
use thiserror::Error;

use crate::{cart::items::CartItem, money::non_negative};

/// Vendor-level charges copied from the vendor profile.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VendorCharges {
    /// Flat service charge
    pub service_charge: Decimal,

    /// Flat VAT amount
    pub vat: Decimal,

    /// Standing vendor discount
    pub discount: Decimal,
}

/// Non-fatal conditions found while computing totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TotalsWarning {
    /// Discounts consumed the whole gross total; the total was floored at zero.
    #[error("discount {discount} exceeds gross total {gross}; total clamped to 0")]
    DiscountExceedsTotal {
        /// Combined vendor and coupon discount
        discount: Decimal,

        /// Subtotal plus delivery, VAT and service charge
        gross: Decimal,
    },
}

/// Derived totals for one vendor group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VendorTotals {
    /// Sum of clamped line subtotals
    pub subtotal: Decimal,

    /// Delivery charge, zero until quoted
    pub delivery_charge: Decimal,

    /// Vendor service charge
    pub service_charge: Decimal,

    /// VAT
    pub vat: Decimal,

    /// Standing vendor discount
    pub vendor_discount: Decimal,

    /// Discount from an applied coupon
    pub coupon_discount: Decimal,

    /// Grand total for the group, never negative
    pub total: Decimal,

    /// Sum of line quantities
    pub item_count: u64,

    /// Non-fatal conditions
    pub warnings: SmallVec<[TotalsWarning; 1]>,
}

impl VendorTotals {
    /// Everything taken off the gross total.
    #[must_use]
    pub fn discount(&self) -> Decimal {
        self.vendor_discount + self.coupon_discount
    }

    /// Whether the discount had to be clamped.
    #[must_use]
    pub fn is_clamped(&self) -> bool {
        self.warnings
            .iter()
            .any(|warning| matches!(warning, TotalsWarning::DiscountExceedsTotal { .. }))
    }
}

/// Compute totals for one vendor group.
///
/// `total = subtotal + delivery + vat + service_charge - discount`, floored at
/// zero. A group with no items levies no charges at all. A missing delivery
/// charge counts as zero.
#[must_use]
pub fn calculate_vendor_totals(
    items: &[CartItem],
    charges: &VendorCharges,
    delivery_charge: Option<Decimal>,
    coupon_discount: Decimal,
) -> VendorTotals {
    if items.is_empty() {
        return VendorTotals::default();
    }

    let subtotal: Decimal = items.iter().map(CartItem::subtotal).sum();
    let item_count = items.iter().map(|item| u64::from(item.quantity())).sum();
    let delivery_charge = delivery_charge.unwrap_or_default();

    let gross = subtotal + delivery_charge + charges.vat + charges.service_charge;
    let discount = charges.discount + coupon_discount;
    let raw_total = gross - discount;

    let mut warnings = SmallVec::new();

    if discount > Decimal::ZERO && raw_total <= Decimal::ZERO {
        warnings.push(TotalsWarning::DiscountExceedsTotal { discount, gross });
    }

    VendorTotals {
        subtotal,
        delivery_charge,
        service_charge: charges.service_charge,
        vat: charges.vat,
        vendor_discount: charges.discount,
        coupon_discount,
        total: non_negative(raw_total),
        item_count,
        warnings,
    }
}

/// Session-level rollups folded over every vendor group.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionTotals {
    /// Sum of vendor subtotals
    pub overall_subtotal: Decimal,

    /// Sum of delivery charges
    pub total_delivery: Decimal,

    /// Sum of service charges
    pub total_service_charge: Decimal,

    /// Sum of VAT
    pub total_vat: Decimal,

    /// Sum of vendor and coupon discounts
    pub total_discount: Decimal,

    /// Sum of vendor totals
    pub grand_total: Decimal,

    /// Sum of every line quantity
    pub item_count: u64,
}

impl SessionTotals {
    /// Fold vendor totals into session rollups.
    pub fn fold<'a>(totals: impl IntoIterator<Item = &'a VendorTotals>) -> Self {
        totals.into_iter().fold(Self::default(), |acc, vendor| Self {
            overall_subtotal: acc.overall_subtotal + vendor.subtotal,
            total_delivery: acc.total_delivery + vendor.delivery_charge,
            total_service_charge: acc.total_service_charge + vendor.service_charge,
            total_vat: acc.total_vat + vendor.vat,
            total_discount: acc.total_discount + vendor.discount(),
            grand_total: acc.grand_total + vendor.total,
            item_count: acc.item_count.saturating_add(vendor.item_count),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::ids::MenuItemId;

    use super::*;

    fn item(price: i64, quantity: u32) -> CartItem {
        CartItem::new(
            MenuItemId::from("dal-bhat"),
            quantity,
            Decimal::new(price, 0),
            Decimal::ZERO,
            None,
        )
    }

    #[test]
    fn total_adds_charges_and_subtracts_discounts() {
        let charges = VendorCharges {
            service_charge: Decimal::new(20, 0),
            vat: Decimal::new(65, 0),
            discount: Decimal::new(35, 0),
        };

        let totals = calculate_vendor_totals(
            &[item(250, 2)],
            &charges,
            Some(Decimal::new(50, 0)),
            Decimal::new(10, 0),
        );

        assert_eq!(totals.subtotal, Decimal::new(500, 0));
        assert_eq!(totals.total, Decimal::new(590, 0));
        assert_eq!(totals.discount(), Decimal::new(45, 0));
        assert_eq!(totals.item_count, 2);
        assert!(totals.warnings.is_empty());
    }

    #[test]
    fn missing_delivery_counts_as_zero() {
        let totals =
            calculate_vendor_totals(&[item(300, 1)], &VendorCharges::default(), None, Decimal::ZERO);

        assert_eq!(totals.delivery_charge, Decimal::ZERO);
        assert_eq!(totals.total, Decimal::new(300, 0));
    }

    #[test]
    fn discount_consuming_gross_clamps_and_warns() {
        let totals = calculate_vendor_totals(
            &[item(100, 1)],
            &VendorCharges::default(),
            Some(Decimal::new(50, 0)),
            Decimal::new(150, 0),
        );

        assert_eq!(totals.total, Decimal::ZERO);
        assert!(totals.is_clamped());
        assert_eq!(
            totals.warnings.first(),
            Some(&TotalsWarning::DiscountExceedsTotal {
                discount: Decimal::new(150, 0),
                gross: Decimal::new(150, 0),
            })
        );
    }

    #[test]
    fn oversized_discount_never_goes_negative() {
        let totals = calculate_vendor_totals(
            &[item(100, 1)],
            &VendorCharges::default(),
            None,
            Decimal::new(1_000, 0),
        );

        assert_eq!(totals.total, Decimal::ZERO);
        assert!(totals.is_clamped());
    }

    #[test]
    fn empty_group_levies_nothing() {
        let charges = VendorCharges {
            service_charge: Decimal::new(20, 0),
            vat: Decimal::new(13, 0),
            discount: Decimal::new(5, 0),
        };

        let totals = calculate_vendor_totals(&[], &charges, Some(Decimal::new(50, 0)), Decimal::ONE);

        assert_eq!(totals, VendorTotals::default());
    }

    #[test]
    fn recomputation_is_idempotent() {
        let items = [item(120, 3), item(80, 1)];
        let charges = VendorCharges {
            vat: Decimal::new(13, 0),
            ..VendorCharges::default()
        };

        let first = calculate_vendor_totals(&items, &charges, Some(Decimal::new(70, 0)), Decimal::ZERO);
        let second =
            calculate_vendor_totals(&items, &charges, Some(Decimal::new(70, 0)), Decimal::ZERO);

        assert_eq!(first, second);
    }

    #[test]
    fn session_fold_sums_every_vendor() {
        let a = calculate_vendor_totals(
            &[item(500, 1)],
            &VendorCharges::default(),
            Some(Decimal::new(50, 0)),
            Decimal::ZERO,
        );
        let b = calculate_vendor_totals(
            &[item(100, 3)],
            &VendorCharges::default(),
            Some(Decimal::new(70, 0)),
            Decimal::ZERO,
        );

        let session = SessionTotals::fold([&a, &b]);

        assert_eq!(session.overall_subtotal, Decimal::new(800, 0));
        assert_eq!(session.total_delivery, Decimal::new(120, 0));
        assert_eq!(session.grand_total, Decimal::new(920, 0));
        assert_eq!(session.item_count, 4);
    }

    #[test]
    fn session_fold_of_nothing_is_zero() {
        assert_eq!(SessionTotals::fold(std::iter::empty()), SessionTotals::default());
    }

    proptest::proptest! {
        #[test]
        fn total_follows_the_formula_floored_at_zero(
            prices in proptest::collection::vec((0i64..100_000, 1u32..20), 1..6),
            service_charge in 0i64..5_000,
            vat in 0i64..5_000,
            discount in 0i64..50_000,
            coupon in 0i64..50_000,
            delivery in proptest::option::of(0i64..50_000),
        ) {
            let items: Vec<CartItem> = prices
                .iter()
                .map(|&(price, quantity)| item(price, quantity))
                .collect();

            let charges = VendorCharges {
                service_charge: Decimal::new(service_charge, 2),
                vat: Decimal::new(vat, 2),
                discount: Decimal::new(discount, 2),
            };
            let delivery = delivery.map(|cents| Decimal::new(cents, 2));
            let coupon = Decimal::new(coupon, 2);

            let first = calculate_vendor_totals(&items, &charges, delivery, coupon);
            let second = calculate_vendor_totals(&items, &charges, delivery, coupon);

            let expected = first.subtotal
                + first.delivery_charge
                + first.vat
                + first.service_charge
                - first.discount();

            proptest::prop_assert_eq!(&first, &second);
            proptest::prop_assert_eq!(first.total, expected.max(Decimal::ZERO));
            proptest::prop_assert!(first.total >= Decimal::ZERO);
            proptest::prop_assert_eq!(first.is_clamped(), first.discount() > Decimal::ZERO && expected <= Decimal::ZERO);
        }
    }
}
