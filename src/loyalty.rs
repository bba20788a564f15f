//! Loyalty points
//!
//! [`LoyaltyLedger`] does the arithmetic: how many points an order earns and
//! how much discount a balance can buy. Balances and the transaction history
//! live in an external [`LoyaltyBook`]; the ledger only builds the entries it
//! should record.

use std::fmt;

use async_trait::async_trait;
use jiff::Timestamp;
use mockall::automock;
use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{ids::UserId, money::non_negative};

/// Errors from loyalty bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoyaltyError {
    /// A redemption asked for more points than the user holds.
    #[error("insufficient points: requested {requested}, available {available}")]
    InsufficientPoints {
        /// Points asked for
        requested: u64,

        /// Points held
        available: u64,
    },

    /// An entry's `balance_after` disagrees with the book.
    #[error("ledger entry expects balance {expected}, book holds {actual}")]
    BalanceMismatch {
        /// Balance claimed by the entry
        expected: u64,

        /// Balance the book computes
        actual: u64,
    },

    /// The bookkeeping service failed.
    #[error("loyalty service unavailable: {0}")]
    Unavailable(String),
}

/// Tunable loyalty parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoyaltyPolicy {
    /// Currency value of one point
    pub point_value: Decimal,

    /// Largest share of a subtotal points may pay for
    pub redemption_cap_ratio: Decimal,

    /// Points earned per whole currency unit spent
    pub points_per_unit: Decimal,
}

impl Default for LoyaltyPolicy {
    fn default() -> Self {
        Self {
            point_value: Decimal::new(1, 2),
            redemption_cap_ratio: Decimal::new(20, 2),
            points_per_unit: Decimal::ONE,
        }
    }
}

/// Kind of ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    /// Points accrued from an order
    Earn,

    /// Points spent as a discount
    Redeem,

    /// Manual correction
    Adjust,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Earn => "EARN",
            Self::Redeem => "REDEEM",
            Self::Adjust => "ADJUST",
        })
    }
}

/// One loyalty transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Account holder
    pub user: UserId,

    /// Transaction kind
    pub kind: EntryKind,

    /// Signed change in points
    pub points_change: i64,

    /// Balance once applied
    pub balance_after: u64,

    /// Human-readable reason
    pub reason: String,

    /// Order or session the entry relates to
    pub reference: Option<String>,

    /// When the entry was built
    pub performed_at: Timestamp,
}

/// Points accrual and redemption arithmetic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoyaltyLedger {
    policy: LoyaltyPolicy,
}

impl LoyaltyLedger {
    /// Create a ledger with `policy`.
    pub fn new(policy: LoyaltyPolicy) -> Self {
        Self { policy }
    }

    /// Policy in force
    pub fn policy(&self) -> &LoyaltyPolicy {
        &self.policy
    }

    /// Points earned by an order total, truncated to whole points.
    #[must_use]
    pub fn points_earned(&self, order_total: Decimal) -> u64 {
        non_negative(order_total)
            .checked_mul(self.policy.points_per_unit)
            .unwrap_or(Decimal::MAX)
            .floor()
            .to_u64()
            .unwrap_or(u64::MAX)
    }

    /// Largest discount `available_points` can buy against `subtotal`.
    ///
    /// `min(points * point_value, subtotal * redemption_cap_ratio)`
    #[must_use]
    pub fn max_redeemable_discount(&self, available_points: u64, subtotal: Decimal) -> Decimal {
        let by_points = Decimal::from(available_points)
            .checked_mul(self.policy.point_value)
            .unwrap_or(Decimal::MAX);

        let by_cap = non_negative(subtotal)
            .checked_mul(self.policy.redemption_cap_ratio)
            .unwrap_or(Decimal::MAX);

        non_negative(by_points.min(by_cap))
    }

    /// Build an `Earn` entry for a placed order.
    pub fn earn(
        &self,
        user: &UserId,
        balance: u64,
        order_total: Decimal,
        reference: impl Into<String>,
    ) -> LedgerEntry {
        let points = self.points_earned(order_total);

        LedgerEntry {
            user: user.clone(),
            kind: EntryKind::Earn,
            points_change: i64::try_from(points).unwrap_or(i64::MAX),
            balance_after: balance.saturating_add(points),
            reason: format!("earned on order total {order_total}"),
            reference: Some(reference.into()),
            performed_at: Timestamp::now(),
        }
    }

    /// Build a `Redeem` entry spending `points`.
    ///
    /// # Errors
    ///
    /// Returns [`LoyaltyError::InsufficientPoints`] if `points` exceeds `balance`.
    pub fn redeem(
        &self,
        user: &UserId,
        balance: u64,
        points: u64,
        reference: impl Into<String>,
    ) -> Result<LedgerEntry, LoyaltyError> {
        let balance_after = balance
            .checked_sub(points)
            .ok_or(LoyaltyError::InsufficientPoints {
                requested: points,
                available: balance,
            })?;

        Ok(LedgerEntry {
            user: user.clone(),
            kind: EntryKind::Redeem,
            points_change: i64::try_from(points).map_or(i64::MIN, |points| -points),
            balance_after,
            reason: format!("redeemed {points} points"),
            reference: Some(reference.into()),
            performed_at: Timestamp::now(),
        })
    }

    /// Build an `Adjust` entry; negative changes floor the balance at zero.
    pub fn adjust(
        &self,
        user: &UserId,
        balance: u64,
        change: i64,
        reason: impl Into<String>,
    ) -> LedgerEntry {
        let balance_after = balance.saturating_add_signed(change);
        let applied = i128::from(balance_after) - i128::from(balance);

        LedgerEntry {
            user: user.clone(),
            kind: EntryKind::Adjust,
            points_change: i64::try_from(applied).unwrap_or(change),
            balance_after,
            reason: reason.into(),
            reference: None,
            performed_at: Timestamp::now(),
        }
    }
}

/// Checkout-time loyalty estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoyaltyPreview {
    /// Points currently held
    pub points_balance: u64,

    /// Points the current grand total would earn
    pub points_earnable: u64,

    /// Discount the balance could buy against the current subtotal
    pub max_redeemable_discount: Decimal,
}

/// External loyalty bookkeeping service.
#[automock]
#[async_trait]
pub trait LoyaltyBook: Send + Sync {
    /// Current points balance.
    async fn balance(&self, user: &UserId) -> Result<u64, LoyaltyError>;

    /// Append an entry and return it as stored.
    async fn record(&self, entry: LedgerEntry) -> Result<LedgerEntry, LoyaltyError>;
}

#[derive(Debug, Default)]
struct Book {
    balances: FxHashMap<UserId, u64>,
    entries: Vec<LedgerEntry>,
}

/// Reference in-process loyalty book.
#[derive(Debug, Default)]
pub struct InMemoryLoyaltyBook {
    book: Mutex<Book>,
}

impl InMemoryLoyaltyBook {
    /// A book with opening balances.
    pub fn with_balances(balances: impl IntoIterator<Item = (UserId, u64)>) -> Self {
        Self {
            book: Mutex::new(Book {
                balances: balances.into_iter().collect(),
                entries: Vec::new(),
            }),
        }
    }

    /// Every entry recorded for `user`, oldest first.
    pub async fn entries(&self, user: &UserId) -> Vec<LedgerEntry> {
        self.book
            .lock()
            .await
            .entries
            .iter()
            .filter(|entry| &entry.user == user)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LoyaltyBook for InMemoryLoyaltyBook {
    async fn balance(&self, user: &UserId) -> Result<u64, LoyaltyError> {
        Ok(self
            .book
            .lock()
            .await
            .balances
            .get(user)
            .copied()
            .unwrap_or_default())
    }

    async fn record(&self, entry: LedgerEntry) -> Result<LedgerEntry, LoyaltyError> {
        let mut book = self.book.lock().await;
        let current = book.balances.get(&entry.user).copied().unwrap_or_default();
        let actual = current.saturating_add_signed(entry.points_change);

        if actual != entry.balance_after {
            return Err(LoyaltyError::BalanceMismatch {
                expected: entry.balance_after,
                actual,
            });
        }

        book.balances.insert(entry.user.clone(), actual);
        book.entries.push(entry.clone());

        Ok(entry)
    }
}
