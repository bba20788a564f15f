//! Fixtures
//!
//! YAML cart scenarios: a vendor directory, a coupon catalog, opening loyalty
//! balances, and one or more carts to build and check out.

use std::{fs, path::PathBuf, sync::Arc};

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{
    cart::{errors::CartError, items::NewCartItem},
    config::{ConfigError, EngineConfig},
    coupons::{Coupon, CouponCode, InMemoryCouponCatalog},
    geo::Coordinates,
    ids::{MenuItemId, UserId, VendorId},
    loyalty::InMemoryLoyaltyBook,
    service::{CartAggregationService, Collaborators, CouponRequest, QuantityAdjustment},
    summary::CheckoutSummary,
    vendors::{InMemoryVendorDirectory, VendorProfile},
};

/// Fixture Parsing Errors
#[derive(Debug, Error)]
pub enum FixtureError {
    /// IO error reading fixture files
    #[error("Failed to read fixture file: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_norway::Error),

    /// The engine refused the configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A cart operation in the scenario failed
    #[error(transparent)]
    Cart(#[from] CartError),

    /// An adjustment names a vendor the cart does not hold
    #[error("Adjustment references vendor {0}, which is not in the cart")]
    VendorNotInCart(VendorId),
}

/// A line to add with [`CartAggregationService::upsert_item`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScenarioLine {
    /// Vendor selling the item
    pub vendor: VendorId,

    /// Menu item
    pub menu_item: MenuItemId,

    /// Quantity
    #[serde(default = "ScenarioLine::default_quantity")]
    pub quantity: i64,

    /// Unit price snapshot
    pub unit_price: Decimal,

    /// Flat line discount
    #[serde(default)]
    pub discount: Option<Decimal>,

    /// Free-form note
    #[serde(default)]
    pub instructions: Option<String>,
}

impl ScenarioLine {
    fn default_quantity() -> i64 {
        1
    }
}

impl From<&ScenarioLine> for NewCartItem {
    fn from(line: &ScenarioLine) -> Self {
        Self {
            vendor: line.vendor.clone(),
            menu_item: line.menu_item.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            discount_amount: line.discount,
            special_instructions: line.instructions.clone(),
        }
    }
}

/// A signed quantity change applied after the lines are added.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScenarioAdjustment {
    /// Vendor holding the line
    pub vendor: VendorId,

    /// Menu item of the line
    pub menu_item: MenuItemId,

    /// Signed change
    pub delta: i64,

    /// Price if the line does not exist yet
    #[serde(default)]
    pub unit_price: Option<Decimal>,
}

/// A coupon to apply before checkout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScenarioCoupon {
    /// Code
    pub code: CouponCode,

    /// Preferred vendor
    #[serde(default)]
    pub vendor: Option<VendorId>,
}

/// One user's cart from first add to checkout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScenarioCart {
    /// Cart owner
    pub user: UserId,

    /// Lines, added in order
    pub items: Vec<ScenarioLine>,

    /// Quantity changes, applied in order
    #[serde(default)]
    pub adjustments: Vec<ScenarioAdjustment>,

    /// Coupon to apply
    #[serde(default)]
    pub coupon: Option<ScenarioCoupon>,

    /// Delivery address used at checkout
    pub address: Coordinates,
}

/// A complete scenario file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Scenario {
    /// Vendor directory
    pub vendors: Vec<VendorProfile>,

    /// Coupon catalog
    #[serde(default)]
    pub coupons: Vec<Coupon>,

    /// Opening loyalty balances
    #[serde(default)]
    pub loyalty: FxHashMap<UserId, u64>,

    /// Carts to build and check out
    pub carts: Vec<ScenarioCart>,
}

impl Scenario {
    /// Parse a scenario document.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Yaml`] if the document is malformed.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, FixtureError> {
        Ok(serde_norway::from_str(yaml)?)
    }

    /// In-memory collaborators seeded from this scenario.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            vendors: Arc::new(InMemoryVendorDirectory::new(self.vendors.iter().cloned())),
            coupons: Arc::new(InMemoryCouponCatalog::new(self.coupons.iter().cloned())),
            loyalty: Arc::new(InMemoryLoyaltyBook::with_balances(
                self.loyalty
                    .iter()
                    .map(|(user, points)| (user.clone(), *points)),
            )),
        }
    }

    /// A service over this scenario's collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Config`] if `config` is invalid.
    pub fn service(&self, config: EngineConfig) -> Result<CartAggregationService, FixtureError> {
        Ok(CartAggregationService::new(config, self.collaborators())?)
    }

    /// Build and check out every cart, in order.
    ///
    /// # Errors
    ///
    /// Returns the first [`FixtureError`] encountered.
    pub async fn run(
        &self,
        service: &CartAggregationService,
    ) -> Result<Vec<CheckoutSummary>, FixtureError> {
        let mut summaries = Vec::with_capacity(self.carts.len());

        for cart in &self.carts {
            summaries.push(run_cart(service, cart).await?);
        }

        Ok(summaries)
    }
}

async fn run_cart(
    service: &CartAggregationService,
    cart: &ScenarioCart,
) -> Result<CheckoutSummary, FixtureError> {
    for line in &cart.items {
        service.upsert_item(&cart.user, line.into()).await?;
    }

    for adjustment in &cart.adjustments {
        let cart_vendor = service
            .snapshot(&cart.user)
            .await?
            .vendor(&adjustment.vendor)
            .map(|group| group.id)
            .ok_or_else(|| FixtureError::VendorNotInCart(adjustment.vendor.clone()))?;

        let mut change =
            QuantityAdjustment::new(cart_vendor, adjustment.menu_item.clone(), adjustment.delta);
        change.unit_price = adjustment.unit_price;

        service.adjust_quantity(&cart.user, change).await?;
    }

    if let Some(coupon) = &cart.coupon {
        service
            .apply_coupon(
                &cart.user,
                CouponRequest {
                    code: coupon.code.clone(),
                    vendor: coupon.vendor.clone(),
                },
            )
            .await?;
    }

    debug!(user = %cart.user, lines = cart.items.len(), "scenario cart built");

    Ok(service.checkout(&cart.user, &cart.address).await?)
}

/// Loads scenario files by name.
#[derive(Debug, Clone)]
pub struct Fixture {
    /// Base path for fixture files
    base_path: PathBuf,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    /// Create a loader rooted at `./fixtures`
    pub fn new() -> Self {
        Self::with_base_path("./fixtures")
    }

    /// Create a loader rooted at `base_path`
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Load `<base>/scenarios/<name>.yml`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn scenario(&self, name: &str) -> Result<Scenario, FixtureError> {
        let file_path = self.base_path.join("scenarios").join(format!("{name}.yml"));

        Scenario::from_yaml_str(&fs::read_to_string(file_path)?)
    }

    /// Load `<base>/config/<name>.yml`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn config(&self, name: &str) -> Result<EngineConfig, FixtureError> {
        let file_path = self.base_path.join("config").join(format!("{name}.yml"));

        Ok(EngineConfig::from_yaml_file(file_path)?)
    }
}
