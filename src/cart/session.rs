//! Cart Sessions
//!
//! A session owns an arena of vendor groups. Each group sits behind its own
//! lock so mutations on different vendors never wait on each other.

use std::{fmt, sync::Arc};

use jiff::Timestamp;
use rustc_hash::FxHashMap;
use rusty_money::iso::Currency;
use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use tokio::sync::{Mutex, RwLock};

use crate::{
    cart::vendor::CartVendor,
    coupons::AppliedCoupon,
    ids::{CartVendorId, SessionId, UserId, VendorId},
};

new_key_type! {
    /// Arena slot of a vendor group; never leaves the session
    struct CartVendorKey;
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepting mutations
    #[default]
    Active,

    /// Frozen by checkout
    CheckedOut,

    /// Left behind by the user
    Abandoned,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::CheckedOut => "checked_out",
            Self::Abandoned => "abandoned",
        })
    }
}

/// What happens to a vendor group once its last line is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyVendorPolicy {
    /// Keep the empty group; it levies no charges.
    #[default]
    Retain,

    /// Drop the group from the session.
    Remove,
}

/// Session header as seen by readers.
#[derive(Debug, Clone, PartialEq)]
pub struct CartSession {
    /// Session identifier
    pub id: SessionId,

    /// Owning user
    pub user: UserId,

    /// Lifecycle state
    pub status: SessionStatus,

    /// Currency every amount in the session is priced in
    pub currency: &'static Currency,

    /// Applied coupon, if any
    pub applied_coupon: Option<AppliedCoupon>,

    /// When the session was opened
    pub created_at: Timestamp,
}

pub(crate) type VendorSlot = Arc<Mutex<CartVendor>>;

/// The vendor arena plus the session status it guards.
///
/// Groups are addressed by their [`CartVendorId`]. Arena keys are reused
/// from one session to the next, so they stay private to this type.
#[derive(Debug, Default)]
pub(crate) struct VendorGroups {
    status: SessionStatus,
    slots: SlotMap<CartVendorKey, VendorSlot>,
    by_id: FxHashMap<CartVendorId, CartVendorKey>,
    by_vendor: FxHashMap<VendorId, CartVendorKey>,
}

impl VendorGroups {
    pub(crate) fn status(&self) -> SessionStatus {
        self.status
    }

    pub(crate) fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub(crate) fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    pub(crate) fn slot(&self, id: CartVendorId) -> Option<VendorSlot> {
        self.by_id
            .get(&id)
            .and_then(|&key| self.slots.get(key))
            .cloned()
    }

    pub(crate) fn slot_for(&self, vendor: &VendorId) -> Option<VendorSlot> {
        self.by_vendor
            .get(vendor)
            .and_then(|&key| self.slots.get(key))
            .cloned()
    }

    /// Every group, in arena order.
    pub(crate) fn slots(&self) -> impl Iterator<Item = &VendorSlot> {
        self.slots.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Commit a new group's totals and add it to the arena.
    pub(crate) fn insert(&mut self, mut group: CartVendor) -> CartVendorId {
        group.commit();

        let id = group.id();
        let vendor = group.vendor().clone();
        let key = self.slots.insert(Arc::new(Mutex::new(group)));

        self.by_id.insert(id, key);
        self.by_vendor.insert(vendor, key);

        id
    }

    pub(crate) fn remove(&mut self, id: CartVendorId) -> Option<VendorSlot> {
        let key = self.by_id.remove(&id)?;
        self.by_vendor.retain(|_vendor, &mut indexed| indexed != key);

        self.slots.remove(key)
    }
}

/// Shared state for one session.
///
/// Locks are always taken in field order: `coupon`, then `groups`, then
/// vendor slots. Only a holder of `coupon` may lock more than one slot at a
/// time.
#[derive(Debug)]
pub(crate) struct SessionHandle {
    pub(crate) id: SessionId,
    pub(crate) user: UserId,
    pub(crate) currency: &'static Currency,
    pub(crate) created_at: Timestamp,
    pub(crate) coupon: Mutex<Option<AppliedCoupon>>,
    pub(crate) groups: RwLock<VendorGroups>,
}

impl SessionHandle {
    pub(crate) fn open(user: UserId, currency: &'static Currency) -> Self {
        Self {
            id: SessionId::generate(),
            user,
            currency,
            created_at: Timestamp::now(),
            coupon: Mutex::new(None),
            groups: RwLock::new(VendorGroups::default()),
        }
    }

    pub(crate) fn header(
        &self,
        status: SessionStatus,
        applied_coupon: Option<AppliedCoupon>,
    ) -> CartSession {
        CartSession {
            id: self.id,
            user: self.user.clone(),
            status,
            currency: self.currency,
            applied_coupon,
            created_at: self.created_at,
        }
    }
}
