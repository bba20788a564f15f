//! Delivery quotes and per-vendor totals

use tracing::debug;

use crate::{
    cart::errors::CartError,
    fees::DeliveryQuote,
    geo::Coordinates,
    ids::{UserId, VendorId},
    service::{CartAggregationService, commit_change, ensure_active},
    summary::{VendorGroupSnapshot, VendorTotalsView},
};

impl CartAggregationService {
    /// Price delivery from a vendor to an address and store the fee on the
    /// vendor's group.
    ///
    /// # Errors
    ///
    /// - [`CartError::VendorNotFound`] if the vendor is unknown or not in the cart.
    /// - [`CartError::DeliveryUnavailable`] if the vendor does not deliver.
    /// - [`CartError::InvalidDistance`] if the coordinates are not usable.
    #[tracing::instrument(
        name = "cart.service.quote_delivery",
        skip_all,
        fields(user = %user, vendor = %vendor),
        err
    )]
    pub async fn quote_delivery(
        &self,
        user: &UserId,
        vendor: &VendorId,
        address: &Coordinates,
    ) -> Result<DeliveryQuote, CartError> {
        let session = self.active(user).await?;

        let profile = self
            .vendors
            .profile(vendor)
            .await
            .ok_or_else(|| CartError::VendorNotFound(vendor.clone()))?;

        if !profile.delivery_available {
            return Err(CartError::DeliveryUnavailable(vendor.clone()));
        }

        let quote = self.config.fees.quote(&profile.location, address)?;

        let groups = session.groups.read().await;
        ensure_active(&groups, &session)?;

        let slot = groups
            .slot_for(vendor)
            .ok_or_else(|| CartError::VendorNotFound(vendor.clone()))?;

        let mut group = slot.lock().await;

        commit_change(&mut group, None, |next| {
            next.set_delivery(quote);
            Ok(())
        })?;

        debug!(
            distance_km = %quote.distance.km(),
            fee = %quote.fee,
            eta = %quote.eta,
            "quoted delivery"
        );

        Ok(quote)
    }

    /// Current totals for one vendor, presented for checkout.
    ///
    /// # Errors
    ///
    /// - [`CartError::VendorNotFound`] if the vendor is not in the cart.
    /// - [`CartError::Amount`] if an amount cannot be presented.
    pub async fn vendor_totals(
        &self,
        user: &UserId,
        vendor: &VendorId,
    ) -> Result<VendorTotalsView, CartError> {
        let session = self.active(user).await?;

        let coupon = session.coupon.lock().await.clone();
        let groups = session.groups.read().await;

        let slot = groups
            .slot_for(vendor)
            .ok_or_else(|| CartError::VendorNotFound(vendor.clone()))?;

        let snapshot = VendorGroupSnapshot::from(&*slot.lock().await);

        Ok(VendorTotalsView::new(
            &snapshot,
            session.currency,
            coupon.as_ref(),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use rusty_money::{Money, iso::NPR};
    use testresult::TestResult;

    use super::*;
    use crate::{
        cart::items::NewCartItem,
        service::test_support::{HOME, service},
    };

    #[tokio::test]
    async fn quote_from_the_same_point_is_free() -> TestResult {
        let service = service()?;
        let user = UserId::from("sita");
        let vendor = VendorId::from("momo-house");

        service
            .upsert_item(&user, NewCartItem::new("momo-house", "momo", 1, Decimal::new(200, 0)))
            .await?;

        let quote = service.quote_delivery(&user, &vendor, &HOME).await?;

        assert!(quote.distance.is_zero());
        assert_eq!(quote.fee, Decimal::ZERO);
        assert_eq!(quote.eta.to_string(), "15-25 min");

        Ok(())
    }

    #[tokio::test]
    async fn quote_is_stored_on_the_group() -> TestResult {
        let service = service()?;
        let user = UserId::from("sita");
        let vendor = VendorId::from("thakali");

        service
            .upsert_item(&user, NewCartItem::new("thakali", "thali", 1, Decimal::new(300, 0)))
            .await?;

        // 0.027 degrees of latitude is about 3 km
        let quote = service.quote_delivery(&user, &vendor, &HOME).await?;
        let view = service.vendor_totals(&user, &vendor).await?;

        assert!(quote.fee > Decimal::new(50, 0));
        assert_eq!(view.delivery_fee, crate::money::present(quote.fee, NPR)?);
        assert_eq!(
            view.total,
            crate::money::present(Decimal::new(300, 0) + quote.fee, NPR)?
        );
        assert_eq!(view.eta_label(), quote.eta.to_string());
        assert_ne!(view.total, Money::from_minor(30_000, NPR));

        Ok(())
    }

    #[tokio::test]
    async fn pickup_only_vendor_cannot_be_quoted() -> TestResult {
        let service = service()?;
        let user = UserId::from("sita");

        service
            .upsert_item(&user, NewCartItem::new("pickup-only", "tea", 1, Decimal::new(40, 0)))
            .await?;

        let result = service
            .quote_delivery(&user, &VendorId::from("pickup-only"), &HOME)
            .await;

        assert!(matches!(result, Err(CartError::DeliveryUnavailable(_))));

        Ok(())
    }

    #[tokio::test]
    async fn vendor_not_in_cart_cannot_be_quoted() -> TestResult {
        let service = service()?;
        let user = UserId::from("sita");

        service
            .upsert_item(&user, NewCartItem::new("momo-house", "momo", 1, Decimal::new(200, 0)))
            .await?;

        let result = service
            .quote_delivery(&user, &VendorId::from("thakali"), &HOME)
            .await;

        assert!(matches!(result, Err(CartError::VendorNotFound(_))));

        Ok(())
    }

    #[tokio::test]
    async fn non_finite_address_is_rejected() -> TestResult {
        let service = service()?;
        let user = UserId::from("sita");

        service
            .upsert_item(&user, NewCartItem::new("momo-house", "momo", 1, Decimal::new(200, 0)))
            .await?;

        let result = service
            .quote_delivery(
                &user,
                &VendorId::from("momo-house"),
                &Coordinates::new(f64::INFINITY, 85.0),
            )
            .await;

        assert!(matches!(result, Err(CartError::InvalidDistance(_))));

        Ok(())
    }
}
