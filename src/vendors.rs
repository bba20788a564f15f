//! Vendor profiles
//!
//! Charge fields and location come from the vendor service and are read-only
//! here.

use async_trait::async_trait;
use mockall::automock;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{geo::Coordinates, ids::VendorId, totals::VendorCharges};

/// The parts of a vendor profile the pricing engine reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorProfile {
    /// Vendor
    pub vendor_id: VendorId,

    /// Flat service charge per order
    #[serde(default)]
    pub service_charge: Decimal,

    /// Flat VAT amount per order
    #[serde(default)]
    pub vat: Decimal,

    /// Standing discount per order
    #[serde(default)]
    pub discount: Decimal,

    /// Whether the vendor delivers at all
    #[serde(default = "VendorProfile::delivers_by_default")]
    pub delivery_available: bool,

    /// Pickup location
    #[serde(default)]
    pub location: Coordinates,
}

impl VendorProfile {
    fn delivers_by_default() -> bool {
        true
    }

    /// A delivering vendor with no charges.
    pub fn new(vendor_id: impl Into<VendorId>, location: Coordinates) -> Self {
        Self {
            vendor_id: vendor_id.into(),
            service_charge: Decimal::ZERO,
            vat: Decimal::ZERO,
            discount: Decimal::ZERO,
            delivery_available: true,
            location,
        }
    }

    /// Charges copied into a vendor group.
    #[must_use]
    pub fn charges(&self) -> VendorCharges {
        VendorCharges {
            service_charge: self.service_charge,
            vat: self.vat,
            discount: self.discount,
        }
    }
}

/// External vendor service.
#[automock]
#[async_trait]
pub trait VendorDirectory: Send + Sync {
    /// Look up a vendor; `None` if unknown.
    async fn profile(&self, vendor: &VendorId) -> Option<VendorProfile>;
}

/// Reference in-process vendor directory.
#[derive(Debug, Default)]
pub struct InMemoryVendorDirectory {
    profiles: RwLock<FxHashMap<VendorId, VendorProfile>>,
}

impl InMemoryVendorDirectory {
    /// A directory holding `profiles`.
    pub fn new(profiles: impl IntoIterator<Item = VendorProfile>) -> Self {
        Self {
            profiles: RwLock::new(
                profiles
                    .into_iter()
                    .map(|profile| (profile.vendor_id.clone(), profile))
                    .collect(),
            ),
        }
    }

    /// Add or replace a profile.
    pub async fn insert(&self, profile: VendorProfile) {
        self.profiles
            .write()
            .await
            .insert(profile.vendor_id.clone(), profile);
    }
}

#[async_trait]
impl VendorDirectory for InMemoryVendorDirectory {
    async fn profile(&self, vendor: &VendorId) -> Option<VendorProfile> {
        self.profiles.read().await.get(vendor).cloned()
    }
}
