//! Cart aggregation service
//!
//! The only way to mutate a cart. Each user has at most one active session;
//! sessions are opened lazily on the first add and retired on checkout or
//! abandonment.

use std::{fmt, sync::Arc};

use rustc_hash::FxHashMap;
use rusty_money::iso::Currency;
use tokio::sync::RwLock;

use crate::{
    cart::{
        errors::CartError,
        session::{SessionHandle, SessionStatus, VendorGroups},
        vendor::CartVendor,
    },
    config::{ConfigError, EngineConfig},
    coupons::{CouponEngine, CouponResolver},
    ids::UserId,
    loyalty::{LoyaltyBook, LoyaltyLedger},
    summary::{CartSnapshot, VendorGroupSnapshot},
    vendors::VendorDirectory,
};

mod checkout;
mod coupons;
mod delivery;
mod items;

pub use coupons::CouponRequest;
pub use items::QuantityAdjustment;

/// External collaborators the service calls out to.
#[derive(Clone)]
pub struct Collaborators {
    /// Vendor profiles
    pub vendors: Arc<dyn VendorDirectory>,

    /// Coupon catalog
    pub coupons: Arc<dyn CouponResolver>,

    /// Loyalty bookkeeping
    pub loyalty: Arc<dyn LoyaltyBook>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Orchestrates cart mutations, totals, coupons, delivery and loyalty.
pub struct CartAggregationService {
    config: EngineConfig,
    currency: &'static Currency,
    vendors: Arc<dyn VendorDirectory>,
    coupons: CouponEngine,
    loyalty: Arc<dyn LoyaltyBook>,
    ledger: LoyaltyLedger,
    sessions: RwLock<FxHashMap<UserId, Arc<SessionHandle>>>,
}

impl fmt::Debug for CartAggregationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CartAggregationService")
            .field("config", &self.config)
            .field("coupons", &self.coupons)
            .finish_non_exhaustive()
    }
}

impl CartAggregationService {
    /// Create a service.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            currency: config.currency()?,
            coupons: CouponEngine::new(collaborators.coupons, config.coupons),
            ledger: LoyaltyLedger::new(config.loyalty.clone()),
            vendors: collaborators.vendors,
            loyalty: collaborators.loyalty,
            sessions: RwLock::default(),
            config,
        })
    }

    /// Configuration in force
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Loyalty arithmetic in force
    pub fn ledger(&self) -> &LoyaltyLedger {
        &self.ledger
    }

    /// The user's active session.
    async fn active(&self, user: &UserId) -> Result<Arc<SessionHandle>, CartError> {
        self.sessions
            .read()
            .await
            .get(user)
            .cloned()
            .ok_or_else(|| CartError::NoActiveSession(user.clone()))
    }

    /// The user's active session, opening one if there is none.
    async fn active_or_open(&self, user: &UserId) -> Arc<SessionHandle> {
        if let Some(session) = self.sessions.read().await.get(user) {
            return Arc::clone(session);
        }

        let mut sessions = self.sessions.write().await;

        Arc::clone(
            sessions
                .entry(user.clone())
                .or_insert_with(|| Arc::new(SessionHandle::open(user.clone(), self.currency))),
        )
    }

    /// Stop routing the user to `session`, if it is still their active one.
    async fn retire(&self, session: &Arc<SessionHandle>) {
        let mut sessions = self.sessions.write().await;

        if sessions
            .get(&session.user)
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            sessions.remove(&session.user);
        }
    }

    /// Read every group in the session.
    pub async fn snapshot(&self, user: &UserId) -> Result<CartSnapshot, CartError> {
        let session = self.active(user).await?;

        Ok(read_snapshot(&session).await)
    }
}

/// Read a session one vendor at a time.
async fn read_snapshot(session: &SessionHandle) -> CartSnapshot {
    let coupon = session.coupon.lock().await.clone();
    let groups = session.groups.read().await;

    let vendors = read_groups(&groups).await;

    CartSnapshot::new(session.header(groups.status(), coupon), vendors)
}

async fn read_groups(groups: &VendorGroups) -> Vec<VendorGroupSnapshot> {
    let mut vendors = Vec::with_capacity(groups.len());

    for slot in groups.slots() {
        vendors.push(VendorGroupSnapshot::from(&*slot.lock().await));
    }

    vendors
}

fn ensure_active(groups: &VendorGroups, session: &SessionHandle) -> Result<(), CartError> {
    if groups.status() == SessionStatus::Active {
        Ok(())
    } else {
        Err(CartError::NoActiveSession(session.user.clone()))
    }
}

/// Apply `change` to a copy of `current`, commit it, and swap it in.
///
/// Nothing here awaits, so a caller cancelled while waiting for the lock
/// leaves the group exactly as it was.
fn commit_change<R>(
    current: &mut CartVendor,
    expected_version: Option<u64>,
    change: impl FnOnce(&mut CartVendor) -> Result<R, CartError>,
) -> Result<R, CartError> {
    current.check_version(expected_version)?;

    let mut next = current.clone();
    let outcome = change(&mut next)?;

    next.commit();
    *current = next;

    Ok(outcome)
}
