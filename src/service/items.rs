//! Line item mutations

use rust_decimal::Decimal;
use tracing::debug;

use crate::{
    cart::{
        errors::CartError,
        items::{CartItem, NewCartItem},
        session::{EmptyVendorPolicy, SessionHandle},
        vendor::{CartVendor, QuantityChange},
    },
    ids::{CartItemId, CartVendorId, MenuItemId, UserId},
    service::{CartAggregationService, commit_change, ensure_active},
};

/// A signed quantity change for one line.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantityAdjustment {
    /// Vendor group holding the line
    pub cart_vendor: CartVendorId,

    /// Menu item of the line
    pub menu_item: MenuItemId,

    /// Signed change
    pub delta: i64,

    /// Price used if the line does not exist yet; zero when absent
    pub unit_price: Option<Decimal>,

    /// Reject unless the group is still at this version
    pub expected_version: Option<u64>,
}

impl QuantityAdjustment {
    /// Adjust `menu_item` in `cart_vendor` by `delta`.
    pub fn new(cart_vendor: CartVendorId, menu_item: impl Into<MenuItemId>, delta: i64) -> Self {
        Self {
            cart_vendor,
            menu_item: menu_item.into(),
            delta,
            unit_price: None,
            expected_version: None,
        }
    }

    /// Price for a line created by this adjustment.
    #[must_use]
    pub fn with_unit_price(mut self, unit_price: Decimal) -> Self {
        self.unit_price = Some(unit_price);
        self
    }

    /// Guard against a stale view of the group.
    #[must_use]
    pub fn expecting_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

impl CartAggregationService {
    /// Add a line, or overwrite the existing line for the same menu item.
    ///
    /// Opens a session and creates the vendor group as needed. Instructions
    /// and discount left unset on `line` keep their stored values.
    ///
    /// # Errors
    ///
    /// - [`CartError::InvalidQuantity`], [`CartError::InvalidPrice`] or
    ///   [`CartError::InvalidDiscount`] for a bad line; nothing is written.
    /// - [`CartError::VendorNotFound`] if the vendor is unknown to the directory.
    #[tracing::instrument(
        name = "cart.service.upsert_item",
        skip_all,
        fields(user = %user, vendor = %line.vendor, menu_item = %line.menu_item),
        err
    )]
    pub async fn upsert_item(&self, user: &UserId, line: NewCartItem) -> Result<CartItem, CartError> {
        let quantity = line.validate()?;

        loop {
            let session = self.active_or_open(user).await;

            match self.upsert_in(&session, &line, quantity).await {
                // Checkout or abandonment raced us; the next pass opens a fresh session.
                Err(CartError::NoActiveSession(_)) => self.retire(&session).await,
                result => return result,
            }
        }
    }

    async fn upsert_in(
        &self,
        session: &SessionHandle,
        line: &NewCartItem,
        quantity: u32,
    ) -> Result<CartItem, CartError> {
        {
            let groups = session.groups.read().await;
            ensure_active(&groups, session)?;

            if let Some(slot) = groups.slot_for(&line.vendor) {
                let mut group = slot.lock().await;

                return commit_change(&mut group, None, |next| {
                    Ok(next.upsert_item(line, quantity))
                });
            }
        }

        let profile = self
            .vendors
            .profile(&line.vendor)
            .await
            .ok_or_else(|| CartError::VendorNotFound(line.vendor.clone()))?;

        let groups = session.groups.write().await;
        ensure_active(&groups, session)?;

        // Another request may have created the group while the profile was fetched.
        if let Some(slot) = groups.slot_for(&line.vendor) {
            let _groups = groups.downgrade();
            let mut group = slot.lock().await;

            return commit_change(&mut group, None, |next| {
                Ok(next.upsert_item(line, quantity))
            });
        }

        let mut groups = groups;
        let mut group = CartVendor::new(line.vendor.clone(), profile.location, profile.charges())
            .with_delivery_available(profile.delivery_available);
        let item = group.upsert_item(line, quantity);
        let id = groups.insert(group);

        debug!(cart_vendor = %id, vendor = %line.vendor, "opened vendor group");

        Ok(item)
    }

    /// Apply a signed delta to a line's quantity.
    ///
    /// A missing line with a positive delta is inserted; a line whose quantity
    /// would fall to zero or below is removed.
    ///
    /// # Errors
    ///
    /// - [`CartError::NoActiveSession`] if the user has no cart.
    /// - [`CartError::CartVendorNotFound`] if the group is not in the session.
    /// - [`CartError::ItemNotFound`] if the line is missing and `delta <= 0`.
    /// - [`CartError::ConcurrentModification`] if `expected_version` is stale.
    #[tracing::instrument(
        name = "cart.service.adjust_quantity",
        skip_all,
        fields(
            user = %user,
            cart_vendor = %adjustment.cart_vendor,
            menu_item = %adjustment.menu_item,
            delta = adjustment.delta
        ),
        err
    )]
    pub async fn adjust_quantity(
        &self,
        user: &UserId,
        adjustment: QuantityAdjustment,
    ) -> Result<QuantityChange, CartError> {
        let session = self.active(user).await?;

        let (change, emptied) = {
            let groups = session.groups.read().await;
            ensure_active(&groups, &session)?;

            let slot = groups
                .slot(adjustment.cart_vendor)
                .ok_or(CartError::CartVendorNotFound(adjustment.cart_vendor))?;

            let mut group = slot.lock().await;

            let change = commit_change(&mut group, adjustment.expected_version, |next| {
                next.adjust_quantity(
                    &adjustment.menu_item,
                    adjustment.delta,
                    adjustment.unit_price,
                )
            })?;

            (change, group.is_empty().then_some(group.version()))
        };

        if let Some(version) = emptied {
            self.release_emptied(&session, adjustment.cart_vendor, version)
                .await;
        }

        Ok(change)
    }

    /// Remove a line by id.
    ///
    /// # Errors
    ///
    /// - [`CartError::NoActiveSession`] if the user has no cart.
    /// - [`CartError::CartItemNotFound`] if no group holds the line; repeat
    ///   deletes fail this way.
    /// - [`CartError::ConcurrentModification`] if `expected_version` is stale.
    #[tracing::instrument(
        name = "cart.service.delete_item",
        skip_all,
        fields(user = %user, item = %item),
        err
    )]
    pub async fn delete_item(
        &self,
        user: &UserId,
        item: CartItemId,
        expected_version: Option<u64>,
    ) -> Result<CartItem, CartError> {
        let session = self.active(user).await?;

        let (deleted, id, emptied) = {
            let groups = session.groups.read().await;
            ensure_active(&groups, &session)?;

            let mut found = None;

            for slot in groups.slots() {
                let mut group = slot.lock().await;

                if group.items().iter().all(|line| line.id() != item) {
                    continue;
                }

                let deleted = commit_change(&mut group, expected_version, |next| {
                    next.delete_item(item)
                        .ok_or(CartError::CartItemNotFound(item))
                })?;

                found = Some((deleted, group.id(), group.is_empty().then_some(group.version())));
                break;
            }

            found.ok_or(CartError::CartItemNotFound(item))?
        };

        if let Some(version) = emptied {
            self.release_emptied(&session, id, version).await;
        }

        Ok(deleted)
    }

    /// Tidy up a group that lost its last line.
    ///
    /// An empty group takes no discount, so a coupon it carried is released
    /// under either policy. Under [`EmptyVendorPolicy::Remove`] the group is
    /// dropped too. Skipped if the group changed since it was emptied.
    async fn release_emptied(&self, session: &SessionHandle, id: CartVendorId, version: u64) {
        let mut coupon = session.coupon.lock().await;
        let mut groups = session.groups.write().await;

        if !groups.is_active() {
            return;
        }

        let Some(slot) = groups.slot(id) else {
            return;
        };

        let vendor = {
            let mut group = slot.lock().await;

            if !group.is_empty() || group.version() != version {
                return;
            }

            if let Some(released) = coupon.take_if(|applied| applied.cart_vendor == id) {
                group.clear_coupon_discount();
                group.commit();

                debug!(code = %released.code, cart_vendor = %id, "released coupon from empty vendor group");
            }

            group.vendor().clone()
        };

        if self.config.empty_vendors == EmptyVendorPolicy::Remove {
            groups.remove(id);

            debug!(cart_vendor = %id, vendor = %vendor, "removed empty vendor group");
        }
    }
}
