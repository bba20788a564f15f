//! Platter
//!
//! Platter is a multi-vendor cart pricing and delivery-fee engine for food
//! delivery marketplaces. Lines are grouped per vendor, each group carries
//! its own versioned totals, and a session rolls them up alongside delivery
//! quotes, one coupon, and loyalty accrual.

pub mod cart;
pub mod config;
pub mod coupons;
pub mod fees;
pub mod fixtures;
pub mod geo;
pub mod ids;
pub mod loyalty;
pub mod money;
pub mod prelude;
pub mod service;
pub mod summary;
pub mod totals;
pub mod utils;
pub mod vendors;
