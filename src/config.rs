//! Engine configuration

use std::{fs, path::Path};

use rust_decimal::Decimal;
use rusty_money::iso::Currency;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    cart::session::EmptyVendorPolicy,
    coupons::CouponPolicy,
    fees::FeeSchedule,
    loyalty::LoyaltyPolicy,
    money::{AmountError, DEFAULT_CURRENCY_CODE, currency_from_code},
};

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading the config file
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("failed to parse config YAML: {0}")]
    Yaml(#[from] serde_norway::Error),

    /// Unsupported currency
    #[error(transparent)]
    Currency(#[from] AmountError),

    /// A value is out of range
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,

        /// What is wrong with it
        reason: &'static str,
    },
}

/// Tunables for the pricing engine. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delivery fee and ETA schedule
    pub fees: FeeSchedule,

    /// Loyalty accrual and redemption
    pub loyalty: LoyaltyPolicy,

    /// Coupon re-apply behaviour
    pub coupons: CouponPolicy,

    /// Fate of vendor groups whose last line is removed
    pub empty_vendors: EmptyVendorPolicy,

    /// Bounded retries for optimistic version conflicts
    pub max_retries: u32,

    /// ISO code new sessions are priced in
    pub currency: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fees: FeeSchedule::default(),
            loyalty: LoyaltyPolicy::default(),
            coupons: CouponPolicy::default(),
            empty_vendors: EmptyVendorPolicy::default(),
            max_retries: 3,
            currency: DEFAULT_CURRENCY_CODE.to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the YAML is malformed or a value is out of range.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_norway::from_str(yaml)?;

        config.validate()?;

        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, or as [`Self::from_yaml_str`].
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_yaml_str(&fs::read_to_string(path)?)
    }

    /// Resolved session currency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Currency`] for an unsupported code.
    pub fn currency(&self) -> Result<&'static Currency, ConfigError> {
        Ok(currency_from_code(&self.currency)?)
    }

    /// Check every value is in range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = [
            ("fees.base_fee", self.fees.base_fee),
            ("fees.per_km_fee", self.fees.per_km_fee),
            ("fees.base_fee_radius_km", self.fees.base_fee_radius_km),
            ("fees.base_eta_minutes", self.fees.base_eta_minutes),
            ("fees.per_km_eta_minutes", self.fees.per_km_eta_minutes),
            ("loyalty.point_value", self.loyalty.point_value),
            ("loyalty.points_per_unit", self.loyalty.points_per_unit),
        ];

        for (field, value) in non_negative {
            if value < Decimal::ZERO {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must not be negative",
                });
            }
        }

        let ratio = self.loyalty.redemption_cap_ratio;

        if ratio < Decimal::ZERO || ratio > Decimal::ONE {
            return Err(ConfigError::Invalid {
                field: "loyalty.redemption_cap_ratio",
                reason: "must be between 0 and 1",
            });
        }

        self.currency()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rusty_money::iso::{INR, NPR};
    use testresult::TestResult;

    use super::*;

    #[test]
    fn defaults_match_observed_constants() -> TestResult {
        let config = EngineConfig::default();

        assert_eq!(config.fees.base_fee, Decimal::new(50, 0));
        assert_eq!(config.fees.per_km_fee, Decimal::new(10, 0));
        assert_eq!(config.fees.eta_window_minutes, 10);
        assert_eq!(config.loyalty.point_value, Decimal::new(1, 2));
        assert_eq!(config.loyalty.redemption_cap_ratio, Decimal::new(2, 1));
        assert_eq!(config.coupons, CouponPolicy::Reject);
        assert_eq!(config.empty_vendors, EmptyVendorPolicy::Retain);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.currency()?, NPR);

        Ok(())
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() -> TestResult {
        let config = EngineConfig::from_yaml_str(
            "fees:\n  per_km_fee: 12.5\ncoupons: replace\ncurrency: inr\n",
        )?;

        assert_eq!(config.fees.per_km_fee, Decimal::new(125, 1));
        assert_eq!(config.fees.base_fee, Decimal::new(50, 0));
        assert_eq!(config.coupons, CouponPolicy::Replace);
        assert_eq!(config.currency()?, INR);

        Ok(())
    }

    #[test]
    fn empty_document_is_default() -> TestResult {
        assert_eq!(EngineConfig::from_yaml_str("{}")?, EngineConfig::default());

        Ok(())
    }

    #[test]
    fn negative_fee_is_rejected() {
        let result = EngineConfig::from_yaml_str("fees:\n  base_fee: -1\n");

        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "fees.base_fee",
                ..
            })
        ));
    }

    #[test]
    fn cap_ratio_above_one_is_rejected() {
        let result = EngineConfig::from_yaml_str("loyalty:\n  redemption_cap_ratio: 1.5\n");

        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn unknown_currency_is_rejected() {
        let result = EngineConfig::from_yaml_str("currency: XYZ\n");

        assert!(matches!(result, Err(ConfigError::Currency(_))));
    }

    #[test]
    fn loads_from_file() -> TestResult {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "max_retries: 5")?;

        let config = EngineConfig::from_yaml_file(file.path())?;

        assert_eq!(config.max_retries, 5);

        Ok(())
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = EngineConfig::from_yaml_file("/definitely/not/here.yml");

        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
