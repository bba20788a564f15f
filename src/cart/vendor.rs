//! Cart Vendors
//!
//! A [`CartVendor`] is one vendor's group of lines within a session. Every
//! mutation ends in [`CartVendor::commit`], which re-derives the cached totals
//! and bumps the version.

use rust_decimal::Decimal;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::{
    cart::{
        errors::CartError,
        items::{CartItem, NewCartItem},
    },
    fees::DeliveryQuote,
    geo::Coordinates,
    ids::{CartItemId, CartVendorId, MenuItemId, VendorId},
    totals::{TotalsWarning, VendorCharges, VendorTotals, calculate_vendor_totals},
};

/// What an [`CartVendor::adjust_quantity`] call did to the line.
#[derive(Debug, Clone, PartialEq)]
pub enum QuantityChange {
    /// An existing line's quantity changed.
    Updated(CartItem),

    /// No line existed, so one was added with the delta as its quantity.
    Inserted(CartItem),

    /// The quantity fell to zero or below and the line was removed.
    Removed(CartItem),
}

impl QuantityChange {
    /// The line as it stands after the change; `None` once removed.
    #[must_use]
    pub fn item(&self) -> Option<&CartItem> {
        match self {
            Self::Updated(item) | Self::Inserted(item) => Some(item),
            Self::Removed(_) => None,
        }
    }
}

/// One vendor's lines within a session.
#[derive(Debug, Clone)]
pub struct CartVendor {
    id: CartVendorId,
    vendor: VendorId,
    location: Coordinates,
    delivery_available: bool,
    items: SmallVec<[CartItem; 4]>,
    charges: VendorCharges,
    delivery: Option<DeliveryQuote>,
    coupon_discount: Decimal,
    totals: VendorTotals,
    version: u64,
}

impl CartVendor {
    /// A new, empty group for a delivering vendor.
    pub(crate) fn new(vendor: VendorId, location: Coordinates, charges: VendorCharges) -> Self {
        Self {
            id: CartVendorId::generate(),
            vendor,
            location,
            delivery_available: true,
            items: SmallVec::new(),
            charges,
            delivery: None,
            coupon_discount: Decimal::ZERO,
            totals: VendorTotals::default(),
            version: 0,
        }
    }

    /// Mark the vendor as pickup only, or delivering again.
    #[must_use]
    pub(crate) fn with_delivery_available(mut self, delivery_available: bool) -> Self {
        self.delivery_available = delivery_available;
        self
    }

    /// Group identifier
    pub fn id(&self) -> CartVendorId {
        self.id
    }

    /// Vendor this group belongs to
    pub fn vendor(&self) -> &VendorId {
        &self.vendor
    }

    /// Vendor pickup location
    pub fn location(&self) -> Coordinates {
        self.location
    }

    /// Whether the vendor delivers; pickup-only groups are never quoted
    pub fn delivery_available(&self) -> bool {
        self.delivery_available
    }

    /// Lines in insertion order
    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    /// Profile charges
    pub fn charges(&self) -> &VendorCharges {
        &self.charges
    }

    /// Last delivery quote, if any
    pub fn delivery(&self) -> Option<&DeliveryQuote> {
        self.delivery.as_ref()
    }

    /// Delivery charge; `None` until quoted
    pub fn delivery_charge(&self) -> Option<Decimal> {
        self.delivery.map(|quote| quote.fee)
    }

    /// Discount written by an applied coupon
    pub fn coupon_discount(&self) -> Decimal {
        self.coupon_discount
    }

    /// Cached totals as of the last commit
    pub fn totals(&self) -> &VendorTotals {
        &self.totals
    }

    /// Monotonic version, bumped on every commit
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether the group has no lines.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Find a line by menu item.
    pub fn find(&self, menu_item: &MenuItemId) -> Option<&CartItem> {
        self.items.iter().find(|item| item.menu_item() == menu_item)
    }

    /// Reject a stale caller.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::ConcurrentModification`] if `expected` is given and
    /// does not match the current version.
    pub fn check_version(&self, expected: Option<u64>) -> Result<(), CartError> {
        match expected {
            Some(expected) if expected != self.version => Err(CartError::ConcurrentModification {
                cart_vendor: self.id,
                expected,
                actual: self.version,
            }),
            _ => Ok(()),
        }
    }

    /// Insert a line, or overwrite the existing line for the same menu item.
    pub(crate) fn upsert_item(&mut self, line: &NewCartItem, quantity: u32) -> CartItem {
        if let Some(existing) = self
            .items
            .iter_mut()
            .find(|item| item.menu_item() == &line.menu_item)
        {
            existing.replace(line, quantity);

            return existing.clone();
        }

        let item = CartItem::new(
            line.menu_item.clone(),
            quantity,
            line.unit_price,
            line.discount_amount.unwrap_or_default(),
            line.special_instructions.clone(),
        );

        self.items.push(item.clone());

        item
    }

    /// Apply a signed delta to a line's quantity.
    ///
    /// A missing line with a positive delta is inserted at `unit_price`
    /// (zero when not given). A line whose quantity would fall to zero or below
    /// is removed.
    ///
    /// # Errors
    ///
    /// - [`CartError::ItemNotFound`] if the line is missing and `delta <= 0`.
    /// - [`CartError::InvalidQuantity`] if the result does not fit a quantity.
    pub(crate) fn adjust_quantity(
        &mut self,
        menu_item: &MenuItemId,
        delta: i64,
        unit_price: Option<Decimal>,
    ) -> Result<QuantityChange, CartError> {
        let Some(position) = self
            .items
            .iter()
            .position(|item| item.menu_item() == menu_item)
        else {
            if delta <= 0 {
                return Err(CartError::ItemNotFound(menu_item.clone()));
            }

            let quantity = u32::try_from(delta).map_err(|_err| CartError::InvalidQuantity(delta))?;

            let item = CartItem::new(
                menu_item.clone(),
                quantity,
                unit_price.unwrap_or_default(),
                Decimal::ZERO,
                None,
            );

            self.items.push(item.clone());

            return Ok(QuantityChange::Inserted(item));
        };

        let Some(item) = self.items.get_mut(position) else {
            return Err(CartError::ItemNotFound(menu_item.clone()));
        };

        let next = i64::from(item.quantity()).saturating_add(delta);

        if next <= 0 {
            return Ok(QuantityChange::Removed(self.items.remove(position)));
        }

        let quantity = u32::try_from(next).map_err(|_err| CartError::InvalidQuantity(next))?;

        item.set_quantity(quantity);

        Ok(QuantityChange::Updated(item.clone()))
    }

    /// Remove a line by id.
    pub(crate) fn delete_item(&mut self, id: CartItemId) -> Option<CartItem> {
        let position = self.items.iter().position(|item| item.id() == id)?;

        Some(self.items.remove(position))
    }

    pub(crate) fn set_delivery(&mut self, quote: DeliveryQuote) {
        self.delivery = Some(quote);
    }

    pub(crate) fn set_coupon_discount(&mut self, discount: Decimal) {
        self.coupon_discount = discount;
    }

    pub(crate) fn clear_coupon_discount(&mut self) {
        self.coupon_discount = Decimal::ZERO;
    }

    /// Re-derive the cached totals and bump the version.
    pub(crate) fn commit(&mut self) {
        self.totals = calculate_vendor_totals(
            &self.items,
            &self.charges,
            self.delivery_charge(),
            self.coupon_discount,
        );

        self.version = self.version.saturating_add(1);

        for warning in &self.totals.warnings {
            match warning {
                TotalsWarning::DiscountExceedsTotal { discount, gross } => warn!(
                    cart_vendor = %self.id,
                    vendor = %self.vendor,
                    discount = %discount,
                    gross = %gross,
                    "discount exceeds vendor total; clamped to zero"
                ),
            }
        }

        debug!(
            cart_vendor = %self.id,
            vendor = %self.vendor,
            version = self.version,
            items = self.items.len(),
            total = %self.totals.total,
            "committed cart vendor"
        );
    }
}
