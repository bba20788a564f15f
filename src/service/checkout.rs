//! Loyalty preview, checkout and abandonment

use jiff::Timestamp;
use tracing::{debug, info};

use crate::{
    cart::{
        errors::CartError,
        session::{CartSession, SessionStatus},
        vendor::CartVendor,
    },
    fees::DeliveryQuote,
    geo::Coordinates,
    ids::UserId,
    loyalty::LoyaltyPreview,
    service::{CartAggregationService, commit_change, ensure_active, read_snapshot},
    summary::{CartSnapshot, CheckoutSummary, VendorGroupSnapshot},
};

impl CartAggregationService {
    /// Points the current cart would earn and what the balance could buy.
    ///
    /// # Errors
    ///
    /// - [`CartError::NoActiveSession`] if the user has no cart.
    /// - [`CartError::Loyalty`] if the balance cannot be read.
    pub async fn loyalty_preview(&self, user: &UserId) -> Result<LoyaltyPreview, CartError> {
        let session = self.active(user).await?;
        let snapshot = read_snapshot(&session).await;
        let balance = self.loyalty.balance(user).await?;

        Ok(LoyaltyPreview {
            points_balance: balance,
            points_earnable: self.ledger.points_earned(snapshot.totals.grand_total),
            max_redeemable_discount: self
                .ledger
                .max_redeemable_discount(balance, snapshot.totals.overall_subtotal),
        })
    }

    /// Quote delivery for every vendor, freeze the session and record the
    /// points it earns.
    ///
    /// Quoting and freezing happen under one set of locks with nothing awaited
    /// in between, so every group frozen with the session is priced from the
    /// same address. Vendors that do not deliver are treated as pickup and
    /// carry no fee. A coupon whose group has emptied is dropped rather than
    /// redeemed. Once the session is frozen it stays checked out even if
    /// coupon or loyalty bookkeeping fails afterwards; those failures are
    /// returned.
    ///
    /// # Errors
    ///
    /// - [`CartError::NoActiveSession`] if the user has no cart.
    /// - [`CartError::EmptyCart`] if no vendor has a line; nothing is written.
    /// - [`CartError::InvalidDistance`] if the address is not usable; nothing is written.
    /// - [`CartError::CouponInvalid`] or [`CartError::Loyalty`] from bookkeeping.
    #[tracing::instrument(name = "cart.service.checkout", skip_all, fields(user = %user), err)]
    pub async fn checkout(
        &self,
        user: &UserId,
        address: &Coordinates,
    ) -> Result<CheckoutSummary, CartError> {
        let session = self.active(user).await?;

        let snapshot = {
            let mut coupon = session.coupon.lock().await;
            let mut groups = session.groups.write().await;
            ensure_active(&groups, &session)?;

            let slots: Vec<_> = groups.slots().cloned().collect();
            let mut locked = Vec::with_capacity(slots.len());

            for slot in &slots {
                locked.push(slot.lock().await);
            }

            // Every lock is held; nothing below awaits.
            if locked.iter().all(|group| group.is_empty()) {
                return Err(CartError::EmptyCart(user.clone()));
            }

            let quotes = locked
                .iter()
                .map(|group| self.quote_for(group, address))
                .collect::<Result<Vec<_>, _>>()?;

            for (group, quote) in locked.iter_mut().zip(quotes) {
                if let Some(quote) = quote {
                    commit_change(group, None, |next| {
                        next.set_delivery(quote);
                        Ok(())
                    })?;
                }
            }

            let redeemable = coupon.as_ref().is_some_and(|applied| {
                locked
                    .iter()
                    .any(|group| group.id() == applied.cart_vendor && !group.is_empty())
            });

            if !redeemable {
                if let Some(dropped) = coupon.take() {
                    debug!(code = %dropped.code, "coupon target is empty; not redeeming");
                }
            }

            groups.set_status(SessionStatus::CheckedOut);

            let vendors = locked
                .iter()
                .map(|group| VendorGroupSnapshot::from(&**group))
                .collect();

            CartSnapshot::new(session.header(SessionStatus::CheckedOut, coupon.clone()), vendors)
        };

        self.retire(&session).await;

        if let Some(applied) = &snapshot.session.applied_coupon {
            self.coupons.record_usage(user, &applied.code).await?;
        }

        let grand_total = snapshot.totals.grand_total;
        let balance = self.loyalty.balance(user).await?;
        let entry = self
            .ledger
            .earn(user, balance, grand_total, session.id.to_string());
        let ledger_entry = self.loyalty.record(entry).await?;

        let vendors = snapshot
            .vendors
            .iter()
            .filter(|group| !group.items.is_empty())
            .map(|group| snapshot.vendor_view(group))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            session = %session.id,
            vendors = vendors.len(),
            grand_total = %grand_total,
            points = ledger_entry.points_change,
            "checked out"
        );

        Ok(CheckoutSummary {
            points_earned: self.ledger.points_earned(grand_total),
            snapshot,
            vendors,
            ledger_entry,
            checked_out_at: Timestamp::now(),
        })
    }

    /// Delivery quote for one group at checkout; `None` for empty or pickup-only groups.
    fn quote_for(
        &self,
        group: &CartVendor,
        address: &Coordinates,
    ) -> Result<Option<DeliveryQuote>, CartError> {
        if group.is_empty() {
            return Ok(None);
        }

        if !group.delivery_available() {
            debug!(vendor = %group.vendor(), "vendor is pickup only; no delivery quote");
            return Ok(None);
        }

        Ok(Some(self.config.fees.quote(&group.location(), address)?))
    }

    /// Mark the user's active session abandoned.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::NoActiveSession`] if the user has no cart.
    #[tracing::instrument(name = "cart.service.abandon", skip_all, fields(user = %user), err)]
    pub async fn abandon(&self, user: &UserId) -> Result<CartSession, CartError> {
        let session = self.active(user).await?;

        let header = {
            let coupon = session.coupon.lock().await;
            let mut groups = session.groups.write().await;
            ensure_active(&groups, &session)?;

            groups.set_status(SessionStatus::Abandoned);

            session.header(SessionStatus::Abandoned, coupon.clone())
        };

        self.retire(&session).await;

        info!(session = %session.id, "abandoned cart");

        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;
    use testresult::TestResult;

    use super::*;
    use crate::{
        cart::{items::NewCartItem, session::EmptyVendorPolicy},
        config::EngineConfig,
        coupons::{CouponRejection, CouponResolution, MockCouponResolver},
        ids::VendorId,
        loyalty::{EntryKind, InMemoryLoyaltyBook, LoyaltyError, MockLoyaltyBook},
        service::{
            Collaborators,
            coupons::CouponRequest,
            test_support::{HOME, directory, service},
        },
        vendors::{VendorDirectory, VendorProfile},
    };

    fn line(vendor: &str, menu_item: &str, price: Decimal) -> NewCartItem {
        NewCartItem::new(vendor, menu_item, 1, price)
    }

    fn service_over(
        coupons: MockCouponResolver,
        loyalty: MockLoyaltyBook,
    ) -> Result<CartAggregationService, crate::config::ConfigError> {
        CartAggregationService::new(
            EngineConfig::default(),
            Collaborators {
                vendors: Arc::new(directory()),
                coupons: Arc::new(coupons),
                loyalty: Arc::new(loyalty),
            },
        )
    }

    #[tokio::test]
    async fn preview_floors_points_and_caps_redemption() -> TestResult {
        let service = CartAggregationService::new(
            EngineConfig::default(),
            Collaborators {
                vendors: Arc::new(directory()),
                coupons: Arc::new(MockCouponResolver::new()),
                loyalty: Arc::new(InMemoryLoyaltyBook::with_balances([(
                    UserId::from("sita"),
                    10_000,
                )])),
            },
        )?;
        let user = UserId::from("sita");

        service
            .upsert_item(&user, line("momo-house", "feast", Decimal::new(12_599, 1)))
            .await?;

        let preview = service.loyalty_preview(&user).await?;

        assert_eq!(preview.points_balance, 10_000);
        assert_eq!(preview.points_earnable, 1259);
        // 10,000 points are worth 100, under the 20% cap of 251.98
        assert_eq!(preview.max_redeemable_discount, Decimal::ONE_HUNDRED);

        Ok(())
    }

    #[tokio::test]
    async fn checkout_freezes_and_earns() -> TestResult {
        let service = service()?;
        let user = UserId::from("sita");

        service
            .upsert_item(&user, line("momo-house", "momo", Decimal::new(500, 0)))
            .await?;
        service
            .upsert_item(&user, line("thakali", "thali", Decimal::new(300, 0)))
            .await?;

        let summary = service.checkout(&user, &HOME).await?;

        assert_eq!(summary.snapshot.session.status, SessionStatus::CheckedOut);
        assert_eq!(summary.vendors.len(), 2);
        assert_eq!(summary.ledger_entry.kind, EntryKind::Earn);
        assert_eq!(summary.points_earned, summary.ledger_entry.balance_after);
        assert!(summary.snapshot.totals.total_delivery > Decimal::ZERO);

        assert!(matches!(
            service.snapshot(&user).await,
            Err(CartError::NoActiveSession(_))
        ));

        service
            .upsert_item(&user, line("momo-house", "momo", Decimal::new(500, 0)))
            .await?;

        let fresh = service.snapshot(&user).await?;
        assert_ne!(fresh.session.id, summary.snapshot.session.id);
        assert_eq!(fresh.session.status, SessionStatus::Active);

        Ok(())
    }

    #[tokio::test]
    async fn pickup_vendors_check_out_without_delivery() -> TestResult {
        let service = service()?;
        let user = UserId::from("sita");

        service
            .upsert_item(&user, line("pickup-only", "tea", Decimal::new(40, 0)))
            .await?;

        let summary = service.checkout(&user, &Coordinates::new(27.8, 85.4)).await?;

        assert_eq!(summary.snapshot.totals.total_delivery, Decimal::ZERO);
        assert_eq!(summary.snapshot.totals.grand_total, Decimal::new(40, 0));

        Ok(())
    }

    #[tokio::test]
    async fn empty_cart_cannot_check_out() -> TestResult {
        let service = service()?;
        let user = UserId::from("sita");

        let item = service
            .upsert_item(&user, line("momo-house", "momo", Decimal::new(500, 0)))
            .await?;
        service.delete_item(&user, item.id(), None).await?;

        let result = service.checkout(&user, &HOME).await;

        assert!(matches!(result, Err(CartError::EmptyCart(_))));
        assert_eq!(
            service.snapshot(&user).await?.session.status,
            SessionStatus::Active
        );

        Ok(())
    }

    #[tokio::test]
    async fn bad_address_leaves_session_active() -> TestResult {
        let service = service()?;
        let user = UserId::from("sita");

        service
            .upsert_item(&user, line("momo-house", "momo", Decimal::new(500, 0)))
            .await?;

        let result = service
            .checkout(&user, &Coordinates::new(f64::NAN, 85.0))
            .await;

        assert!(matches!(result, Err(CartError::InvalidDistance(_))));

        let snapshot = service.snapshot(&user).await?;
        assert_eq!(snapshot.session.status, SessionStatus::Active);
        assert_eq!(snapshot.totals.total_delivery, Decimal::ZERO);

        Ok(())
    }

    #[tokio::test]
    async fn checkout_records_coupon_usage() -> TestResult {
        let mut coupons = MockCouponResolver::new();
        coupons.expect_resolve().once().returning(|_| {
            Ok(CouponResolution {
                discount_amount: Decimal::new(100, 0),
                target_vendor: VendorId::from("momo-house"),
            })
        });
        coupons
            .expect_record_usage()
            .once()
            .withf(|user, code| user.as_str() == "sita" && code.as_str() == "WELCOME")
            .returning(|_, _| Ok(()));

        let mut loyalty = MockLoyaltyBook::new();
        loyalty.expect_balance().returning(|_| Ok(0));
        loyalty.expect_record().once().returning(Ok);

        let service = service_over(coupons, loyalty)?;
        let user = UserId::from("sita");

        service
            .upsert_item(&user, line("momo-house", "momo", Decimal::new(500, 0)))
            .await?;
        service
            .apply_coupon(&user, CouponRequest::new("welcome"))
            .await?;

        let summary = service.checkout(&user, &HOME).await?;

        assert_eq!(summary.snapshot.totals.grand_total, Decimal::new(400, 0));
        assert_eq!(summary.points_earned, 400);

        Ok(())
    }

    #[tokio::test]
    async fn loyalty_failure_surfaces_after_freezing() -> TestResult {
        let mut coupons = MockCouponResolver::new();
        coupons.expect_record_usage().never();

        let mut loyalty = MockLoyaltyBook::new();
        loyalty.expect_balance().returning(|_| Ok(0));
        loyalty
            .expect_record()
            .returning(|_| Err(LoyaltyError::Unavailable("timeout".to_string())));

        let service = service_over(coupons, loyalty)?;
        let user = UserId::from("sita");

        service
            .upsert_item(&user, line("momo-house", "momo", Decimal::new(500, 0)))
            .await?;

        let result = service.checkout(&user, &HOME).await;

        assert!(matches!(
            result,
            Err(CartError::Loyalty(LoyaltyError::Unavailable(_)))
        ));
        assert!(matches!(
            service.snapshot(&user).await,
            Err(CartError::NoActiveSession(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn coupon_usage_rejection_surfaces() -> TestResult {
        let mut coupons = MockCouponResolver::new();
        coupons.expect_resolve().returning(|_| {
            Ok(CouponResolution {
                discount_amount: Decimal::new(50, 0),
                target_vendor: VendorId::from("momo-house"),
            })
        });
        coupons
            .expect_record_usage()
            .returning(|_, _| Err(CouponRejection::UsageLimitReached));

        let mut loyalty = MockLoyaltyBook::new();
        loyalty.expect_record().never();

        let service = service_over(coupons, loyalty)?;
        let user = UserId::from("sita");

        service
            .upsert_item(&user, line("momo-house", "momo", Decimal::new(500, 0)))
            .await?;
        service.apply_coupon(&user, CouponRequest::new("ONCE")).await?;

        let result = service.checkout(&user, &HOME).await;

        assert!(matches!(
            result,
            Err(CartError::CouponInvalid {
                reason: CouponRejection::UsageLimitReached,
                ..
            })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn coupon_on_an_emptied_group_is_not_redeemed() -> TestResult {
        let mut coupons = MockCouponResolver::new();
        coupons.expect_resolve().once().returning(|_| {
            Ok(CouponResolution {
                discount_amount: Decimal::new(150, 0),
                target_vendor: VendorId::from("momo-house"),
            })
        });
        coupons.expect_record_usage().never();

        let mut loyalty = MockLoyaltyBook::new();
        loyalty.expect_balance().returning(|_| Ok(0));
        loyalty.expect_record().once().returning(Ok);

        let config = EngineConfig {
            empty_vendors: EmptyVendorPolicy::Retain,
            ..EngineConfig::default()
        };
        let service = CartAggregationService::new(
            config,
            Collaborators {
                vendors: Arc::new(directory()),
                coupons: Arc::new(coupons),
                loyalty: Arc::new(loyalty),
            },
        )?;
        let user = UserId::from("sita");

        let momo = service
            .upsert_item(&user, line("momo-house", "momo", Decimal::new(500, 0)))
            .await?;
        service
            .upsert_item(&user, line("thakali", "thali", Decimal::new(400, 0)))
            .await?;
        service.apply_coupon(&user, CouponRequest::new("flat150")).await?;
        service.delete_item(&user, momo.id(), None).await?;

        let summary = service.checkout(&user, &HOME).await?;

        assert_eq!(summary.snapshot.session.applied_coupon, None);
        assert_eq!(summary.snapshot.totals.total_discount, Decimal::ZERO);
        assert_eq!(summary.vendors.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn checkout_quotes_from_the_group_without_the_directory() -> TestResult {
        let vendors = Arc::new(directory());
        let service = CartAggregationService::new(
            EngineConfig::default(),
            Collaborators {
                vendors: Arc::clone(&vendors) as Arc<dyn VendorDirectory>,
                coupons: Arc::new(MockCouponResolver::new()),
                loyalty: Arc::new(InMemoryLoyaltyBook::default()),
            },
        )?;
        let user = UserId::from("sita");

        service
            .upsert_item(&user, line("momo-house", "momo", Decimal::new(500, 0)))
            .await?;
        service
            .upsert_item(&user, line("pickup-only", "tea", Decimal::new(40, 0)))
            .await?;

        // Directory changes after a group opens do not reach it.
        vendors
            .insert(VendorProfile {
                delivery_available: false,
                ..VendorProfile::new("momo-house", HOME)
            })
            .await;

        let summary = service.checkout(&user, &HOME).await?;

        let momo = summary
            .snapshot
            .vendor(&VendorId::from("momo-house"))
            .ok_or("missing momo-house")?;
        let tea = summary
            .snapshot
            .vendor(&VendorId::from("pickup-only"))
            .ok_or("missing pickup-only")?;

        assert!(momo.delivery.is_some());
        assert!(tea.delivery.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn abandon_retires_the_session() -> TestResult {
        let service = service()?;
        let user = UserId::from("sita");

        service
            .upsert_item(&user, line("momo-house", "momo", Decimal::new(500, 0)))
            .await?;

        let header = service.abandon(&user).await?;

        assert_eq!(header.status, SessionStatus::Abandoned);
        assert!(matches!(
            service.abandon(&user).await,
            Err(CartError::NoActiveSession(_))
        ));

        Ok(())
    }
}
