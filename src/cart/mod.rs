//! Cart
//!
//! Sessions, their vendor groups, and the lines inside them.

pub mod errors;
pub mod items;
pub mod session;
pub mod vendor;
