//! Delivery fees and ETAs
//!
//! Pure functions from a validated [`Distance`] to a delivery fee and an
//! estimated delivery window, parameterised by a [`FeeSchedule`].

use std::fmt;

use num_traits::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::Coordinates;

/// Errors raised when pricing a delivery.
#[derive(Debug, Error, PartialEq)]
pub enum FeeError {
    /// The distance was negative or not a finite number.
    #[error("invalid delivery distance: {0} km")]
    InvalidDistance(f64),
}

/// A non-negative, finite distance in kilometres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Distance(Decimal);

impl Distance {
    /// No distance; the "address not resolved yet" case.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Validate a distance measured in kilometres.
    ///
    /// Finite values beyond the range of [`Decimal`] saturate at its maximum.
    ///
    /// # Errors
    ///
    /// Returns [`FeeError::InvalidDistance`] for negative, NaN or infinite input.
    pub fn from_km(km: f64) -> Result<Self, FeeError> {
        if !km.is_finite() || km < 0.0 {
            return Err(FeeError::InvalidDistance(km));
        }

        let km = Decimal::from_f64_retain(km)
            .or_else(|| Decimal::from_f64(km))
            .unwrap_or(Decimal::MAX);

        Ok(Self(km))
    }

    /// Validate a distance already held as a decimal.
    ///
    /// # Errors
    ///
    /// Returns [`FeeError::InvalidDistance`] for negative input.
    pub fn from_decimal(km: Decimal) -> Result<Self, FeeError> {
        if km.is_sign_negative() && !km.is_zero() {
            return Err(FeeError::InvalidDistance(km.to_f64().unwrap_or(f64::NAN)));
        }

        Ok(Self(km.abs()))
    }

    /// Kilometres as a decimal.
    #[must_use]
    pub fn km(&self) -> Decimal {
        self.0
    }

    /// Whether this is the zero distance.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

/// Tunable delivery pricing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeSchedule {
    /// Flat fee for any delivery within the base radius
    pub base_fee: Decimal,

    /// Fee per kilometre beyond the base radius
    pub per_km_fee: Decimal,

    /// Radius covered by the base fee
    pub base_fee_radius_km: Decimal,

    /// Minutes every delivery takes regardless of distance
    pub base_eta_minutes: Decimal,

    /// Minutes added per kilometre
    pub per_km_eta_minutes: Decimal,

    /// Width of the quoted delivery window
    pub eta_window_minutes: u32,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            base_fee: Decimal::new(50, 0),
            per_km_fee: Decimal::new(10, 0),
            base_fee_radius_km: Decimal::ONE,
            base_eta_minutes: Decimal::new(15, 0),
            per_km_eta_minutes: Decimal::TWO,
            eta_window_minutes: 10,
        }
    }
}

impl FeeSchedule {
    /// Delivery fee for a distance.
    ///
    /// Zero distance is free, anything up to the base radius costs the base
    /// fee, and every kilometre beyond it adds the per-km fee. Amounts
    /// saturate rather than overflow.
    #[must_use]
    pub fn delivery_fee(&self, distance: Distance) -> Decimal {
        let km = distance.km();

        if km.is_zero() {
            return Decimal::ZERO;
        }

        if km <= self.base_fee_radius_km {
            return self.base_fee;
        }

        (km - self.base_fee_radius_km)
            .checked_mul(self.per_km_fee)
            .and_then(|extra| extra.checked_add(self.base_fee))
            .unwrap_or(Decimal::MAX)
    }

    /// Estimated delivery window for a distance.
    #[must_use]
    pub fn estimated_delivery_time(&self, distance: Distance) -> DeliveryEstimate {
        let min_minutes = distance
            .km()
            .checked_mul(self.per_km_eta_minutes)
            .and_then(|travel| travel.checked_add(self.base_eta_minutes))
            .map(|minutes| minutes.ceil())
            .and_then(|minutes| minutes.to_u32())
            .unwrap_or(u32::MAX);

        DeliveryEstimate {
            min_minutes,
            max_minutes: min_minutes.saturating_add(self.eta_window_minutes),
        }
    }

    /// Price a delivery between two points.
    ///
    /// # Errors
    ///
    /// Returns [`FeeError::InvalidDistance`] if the coordinates do not produce a
    /// finite distance.
    pub fn quote(&self, from: &Coordinates, to: &Coordinates) -> Result<DeliveryQuote, FeeError> {
        let distance = Distance::from_km(from.distance_to(to))?;

        Ok(DeliveryQuote {
            distance,
            fee: self.delivery_fee(distance),
            eta: self.estimated_delivery_time(distance),
        })
    }
}

/// A delivery time window in whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryEstimate {
    /// Earliest expected arrival
    pub min_minutes: u32,

    /// Latest expected arrival
    pub max_minutes: u32,
}

impl fmt::Display for DeliveryEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} min", self.min_minutes, self.max_minutes)
    }
}

/// Fee and ETA for one vendor-to-address delivery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeliveryQuote {
    /// Great-circle distance
    pub distance: Distance,

    /// Delivery fee (full precision)
    pub fee: Decimal,

    /// Delivery window
    pub eta: DeliveryEstimate,
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;

    fn km(value: f64) -> Result<Distance, FeeError> {
        Distance::from_km(value)
    }

    #[test]
    fn zero_distance_is_free() {
        let schedule = FeeSchedule::default();

        assert_eq!(schedule.delivery_fee(Distance::ZERO), Decimal::ZERO);
    }

    #[test]
    fn within_first_kilometre_costs_base_fee() -> TestResult {
        let schedule = FeeSchedule::default();

        assert_eq!(schedule.delivery_fee(km(0.5)?), Decimal::new(50, 0));
        assert_eq!(schedule.delivery_fee(km(1.0)?), Decimal::new(50, 0));

        Ok(())
    }

    #[test]
    fn beyond_first_kilometre_adds_per_km_fee() -> TestResult {
        let schedule = FeeSchedule::default();

        assert_eq!(schedule.delivery_fee(km(3.0)?), Decimal::new(70, 0));
        assert_eq!(schedule.delivery_fee(km(2.5)?), Decimal::new(65, 0));

        Ok(())
    }

    #[test]
    fn fee_is_continuous_at_the_base_radius() -> TestResult {
        let schedule = FeeSchedule::default();

        let at = schedule.delivery_fee(km(1.0)?);
        let just_above = schedule.delivery_fee(km(1.000_001)?);

        assert!(just_above - at < Decimal::new(1, 3), "{just_above} vs {at}");

        Ok(())
    }

    #[test]
    fn negative_and_non_finite_distances_are_rejected() {
        assert_eq!(km(-0.1), Err(FeeError::InvalidDistance(-0.1)));
        assert!(km(f64::NAN).is_err());
        assert!(km(f64::INFINITY).is_err());
        assert!(Distance::from_decimal(Decimal::new(-1, 0)).is_err());
    }

    #[test]
    fn huge_distances_saturate_instead_of_failing() -> TestResult {
        let schedule = FeeSchedule::default();
        let far = km(f64::MAX)?;

        assert_eq!(schedule.delivery_fee(far), Decimal::MAX);
        assert_eq!(schedule.estimated_delivery_time(far).min_minutes, u32::MAX);
        assert_eq!(schedule.estimated_delivery_time(far).max_minutes, u32::MAX);

        Ok(())
    }

    #[test]
    fn eta_for_zero_distance_is_fifteen_to_twenty_five() {
        let eta = FeeSchedule::default().estimated_delivery_time(Distance::ZERO);

        assert_eq!(eta.min_minutes, 15);
        assert_eq!(eta.max_minutes, 25);
        assert_eq!(eta.to_string(), "15-25 min");
    }

    #[test]
    fn eta_rounds_partial_minutes_up() -> TestResult {
        let eta = FeeSchedule::default().estimated_delivery_time(km(2.3)?);

        // 15 + 4.6 = 19.6 -> 20
        assert_eq!(eta.to_string(), "20-30 min");

        Ok(())
    }

    #[test]
    fn quote_between_identical_points_is_free() -> TestResult {
        let here = Coordinates::new(27.7172, 85.3240);
        let quote = FeeSchedule::default().quote(&here, &here)?;

        assert!(quote.distance.is_zero());
        assert_eq!(quote.fee, Decimal::ZERO);
        assert_eq!(quote.eta.to_string(), "15-25 min");

        Ok(())
    }

    #[test]
    fn custom_schedule_is_respected() -> TestResult {
        let schedule = FeeSchedule {
            base_fee: Decimal::new(30, 0),
            per_km_fee: Decimal::new(5, 0),
            base_fee_radius_km: Decimal::TWO,
            ..FeeSchedule::default()
        };

        assert_eq!(schedule.delivery_fee(km(2.0)?), Decimal::new(30, 0));
        assert_eq!(schedule.delivery_fee(km(4.0)?), Decimal::new(40, 0));

        Ok(())
    }
}
