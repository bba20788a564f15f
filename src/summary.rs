//! Read models
//!
//! Everything the engine hands to checkout and the UI. Amounts are converted
//! to [`Money`] (and therefore rounded) only here.

use std::{fmt::Write as _, io};

use jiff::Timestamp;
use rust_decimal::Decimal;
use rusty_money::{Money, iso::Currency};
use smallvec::SmallVec;
use tabled::{
    builder::Builder,
    grid::config::HorizontalLine,
    settings::{
        Alignment, Color, Style, Theme,
        object::{Columns, Rows},
    },
};
use thiserror::Error;

use crate::{
    cart::{
        items::CartItem,
        session::CartSession,
        vendor::CartVendor,
    },
    coupons::{AppliedCoupon, CouponCode},
    fees::{DeliveryEstimate, DeliveryQuote},
    ids::{CartVendorId, VendorId},
    loyalty::LedgerEntry,
    money::{AmountError, present},
    totals::{SessionTotals, TotalsWarning, VendorTotals},
};

/// Errors rendering a summary.
#[derive(Debug, Error)]
pub enum SummaryError {
    /// An amount could not be presented.
    #[error(transparent)]
    Amount(#[from] AmountError),

    /// Writing to the output failed.
    #[error("failed to write summary: {0}")]
    Io(#[from] io::Error),
}

/// A vendor group as of one read.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorGroupSnapshot {
    /// Group identifier
    pub id: CartVendorId,

    /// Vendor
    pub vendor: VendorId,

    /// Version at read time; pass back as `expected_version` to guard writes
    pub version: u64,

    /// Lines
    pub items: Vec<CartItem>,

    /// Derived totals
    pub totals: VendorTotals,

    /// Last delivery quote
    pub delivery: Option<DeliveryQuote>,
}

impl From<&CartVendor> for VendorGroupSnapshot {
    fn from(group: &CartVendor) -> Self {
        Self {
            id: group.id(),
            vendor: group.vendor().clone(),
            version: group.version(),
            items: group.items().to_vec(),
            totals: group.totals().clone(),
            delivery: group.delivery().copied(),
        }
    }
}

/// A whole session as of one read.
///
/// Vendor groups are read one at a time, so the snapshot is consistent per
/// vendor but not across vendors.
#[derive(Debug, Clone, PartialEq)]
pub struct CartSnapshot {
    /// Session header
    pub session: CartSession,

    /// Vendor groups in arena order
    pub vendors: Vec<VendorGroupSnapshot>,

    /// Session rollups
    pub totals: SessionTotals,
}

impl CartSnapshot {
    pub(crate) fn new(session: CartSession, vendors: Vec<VendorGroupSnapshot>) -> Self {
        let totals = SessionTotals::fold(vendors.iter().map(|group| &group.totals));

        Self {
            session,
            vendors,
            totals,
        }
    }

    /// Group for a vendor, if present.
    #[must_use]
    pub fn vendor(&self, vendor: &VendorId) -> Option<&VendorGroupSnapshot> {
        self.vendors.iter().find(|group| &group.vendor == vendor)
    }

    /// Number of lines across every vendor.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.vendors.iter().map(|group| group.items.len()).sum()
    }

    /// Rollups converted to money.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError`] if an amount overflows minor units.
    pub fn presented_totals(&self) -> Result<PresentedTotals, AmountError> {
        let currency = self.session.currency;

        Ok(PresentedTotals {
            overall_subtotal: present(self.totals.overall_subtotal, currency)?,
            total_delivery: present(self.totals.total_delivery, currency)?,
            total_discount: present(self.totals.total_discount, currency)?,
            grand_total: present(self.totals.grand_total, currency)?,
            item_count: self.totals.item_count,
        })
    }

    /// Per-vendor view for one vendor group.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError`] if an amount overflows minor units.
    pub fn vendor_view(
        &self,
        group: &VendorGroupSnapshot,
    ) -> Result<VendorTotalsView, AmountError> {
        VendorTotalsView::new(group, self.session.currency, self.session.applied_coupon.as_ref())
    }

    /// Render the cart as a table followed by the session rollups.
    ///
    /// # Errors
    ///
    /// Returns [`SummaryError`] if an amount cannot be presented or the write fails.
    pub fn write_to(&self, mut out: impl io::Write) -> Result<(), SummaryError> {
        let mut builder = Builder::default();
        let mut boundaries: SmallVec<[usize; 8]> = SmallVec::new();
        let currency = self.session.currency;

        builder.push_record(["", "Item", "Qty", "Unit Price", "Discount", "Subtotal"]);

        let mut row = 1;

        for group in &self.vendors {
            boundaries.push(row);
            row += push_group_rows(&mut builder, group, currency)?;
        }

        write_table(&mut out, builder, &boundaries)?;
        write_totals(&mut out, self)?;

        Ok(())
    }
}

/// Session rollups as money.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresentedTotals {
    /// Sum of vendor subtotals
    pub overall_subtotal: Money<'static, Currency>,

    /// Sum of delivery charges
    pub total_delivery: Money<'static, Currency>,

    /// Sum of vendor and coupon discounts
    pub total_discount: Money<'static, Currency>,

    /// Sum of vendor totals
    pub grand_total: Money<'static, Currency>,

    /// Sum of line quantities
    pub item_count: u64,
}

/// Delivery and totals for one vendor, as shown at checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorTotalsView {
    /// Group identifier
    pub cart_vendor: CartVendorId,

    /// Vendor
    pub vendor: VendorId,

    /// Group version
    pub version: u64,

    /// Currency of every amount below
    pub currency: &'static Currency,

    /// Items subtotal
    pub subtotal: Money<'static, Currency>,

    /// Quoted distance, if any
    pub distance_km: Option<Decimal>,

    /// Delivery fee, zero until quoted
    pub delivery_fee: Money<'static, Currency>,

    /// Service charge
    pub service_charge: Money<'static, Currency>,

    /// VAT
    pub vat: Money<'static, Currency>,

    /// Standing vendor discount
    pub vendor_discount: Money<'static, Currency>,

    /// Coupon discount
    pub coupon_discount: Money<'static, Currency>,

    /// Vendor total
    pub total: Money<'static, Currency>,

    /// Delivery window, if quoted
    pub eta: Option<DeliveryEstimate>,

    /// Coupon carried by this group
    pub coupon_code: Option<CouponCode>,

    /// Non-fatal conditions
    pub warnings: SmallVec<[TotalsWarning; 1]>,
}

impl VendorTotalsView {
    /// Present a group snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError`] if an amount overflows minor units.
    pub fn new(
        group: &VendorGroupSnapshot,
        currency: &'static Currency,
        coupon: Option<&AppliedCoupon>,
    ) -> Result<Self, AmountError> {
        let totals = &group.totals;

        Ok(Self {
            cart_vendor: group.id,
            vendor: group.vendor.clone(),
            version: group.version,
            currency,
            subtotal: present(totals.subtotal, currency)?,
            distance_km: group.delivery.map(|quote| quote.distance.km()),
            delivery_fee: present(totals.delivery_charge, currency)?,
            service_charge: present(totals.service_charge, currency)?,
            vat: present(totals.vat, currency)?,
            vendor_discount: present(totals.vendor_discount, currency)?,
            coupon_discount: present(totals.coupon_discount, currency)?,
            total: present(totals.total, currency)?,
            eta: group.delivery.map(|quote| quote.eta),
            coupon_code: coupon
                .filter(|coupon| coupon.cart_vendor == group.id)
                .map(|coupon| coupon.code.clone()),
            warnings: totals.warnings.clone(),
        })
    }

    /// ETA label such as `"15-25 min"`, empty until quoted.
    #[must_use]
    pub fn eta_label(&self) -> String {
        self.eta.map(|eta| eta.to_string()).unwrap_or_default()
    }
}

/// What checkout hands to order creation.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSummary {
    /// The frozen session
    pub snapshot: CartSnapshot,

    /// Per-vendor delivery and totals
    pub vendors: Vec<VendorTotalsView>,

    /// Points earned by the grand total
    pub points_earned: u64,

    /// Ledger entry recorded for the order
    pub ledger_entry: LedgerEntry,

    /// When the session was frozen
    pub checked_out_at: Timestamp,
}

impl CheckoutSummary {
    /// Render the frozen cart followed by the loyalty line.
    ///
    /// # Errors
    ///
    /// Returns [`SummaryError`] if an amount cannot be presented or the write fails.
    pub fn write_to(&self, mut out: impl io::Write) -> Result<(), SummaryError> {
        self.snapshot.write_to(&mut out)?;

        for view in &self.vendors {
            writeln!(
                out,
                " {} delivery {} ({})",
                view.vendor,
                view.delivery_fee,
                view.eta_label()
            )?;
        }

        writeln!(
            out,
            " Loyalty: +{} points (balance {})\n",
            self.points_earned, self.ledger_entry.balance_after
        )?;

        Ok(())
    }
}

/// Pushes a vendor heading, its lines and its charges; returns rows written.
fn push_group_rows(
    builder: &mut Builder,
    group: &VendorGroupSnapshot,
    currency: &'static Currency,
) -> Result<usize, AmountError> {
    let totals = &group.totals;
    let mut rows = 0;

    builder.push_record([
        String::new(),
        format!("\x1b[1m{}\x1b[0m (v{})", group.vendor, group.version),
        String::new(),
        String::new(),
        String::new(),
        String::new(),
    ]);
    rows += 1;

    for (idx, item) in group.items.iter().enumerate() {
        builder.push_record([
            format!("#{:<3}", idx + 1),
            item.menu_item().to_string(),
            item.quantity().to_string(),
            present(item.unit_price(), currency)?.to_string(),
            if item.discount_amount().is_zero() {
                String::new()
            } else {
                format!("-{}", present(item.discount_amount(), currency)?)
            },
            present(item.subtotal(), currency)?.to_string(),
        ]);
        rows += 1;
    }

    let charges = [
        ("Delivery", totals.delivery_charge, false),
        ("Service charge", totals.service_charge, false),
        ("VAT", totals.vat, false),
        ("Discount", totals.discount(), true),
    ];

    for (label, amount, negative) in charges {
        if amount.is_zero() {
            continue;
        }

        let amount = present(amount, currency)?;

        builder.push_record([
            String::new(),
            label.to_string(),
            String::new(),
            String::new(),
            String::new(),
            if negative {
                format!("-{amount}")
            } else {
                amount.to_string()
            },
        ]);
        rows += 1;
    }

    builder.push_record([
        String::new(),
        "Vendor total".to_string(),
        totals.item_count.to_string(),
        String::new(),
        String::new(),
        present(totals.total, currency)?.to_string(),
    ]);
    rows += 1;

    Ok(rows)
}

fn write_table(
    out: &mut impl io::Write,
    builder: Builder,
    boundaries: &[usize],
) -> Result<(), SummaryError> {
    let mut table = builder.build();
    let mut theme = Theme::from(Style::modern_rounded());
    let separator = HorizontalLine::new(Some('─'), Some('┼'), Some('├'), Some('┤'));

    theme.remove_horizontal_lines();
    theme.insert_horizontal_line(1, separator);

    for &row in boundaries {
        if row > 1 {
            theme.insert_horizontal_line(row, separator);
        }
    }

    table.with(theme);
    table.modify(Rows::first(), Color::BOLD);
    table.modify(Columns::new(2..6), Alignment::right());

    writeln!(out, "\n{}", colorize_borders(&table.to_string()))?;

    Ok(())
}

fn write_totals(out: &mut impl io::Write, snapshot: &CartSnapshot) -> Result<(), SummaryError> {
    let totals = snapshot.presented_totals()?;

    let lines = [
        (" Subtotal:".to_string(), format!("{}  ", totals.overall_subtotal)),
        (" Delivery:".to_string(), format!("{}  ", totals.total_delivery)),
        (" Discounts:".to_string(), format!("-{}  ", totals.total_discount)),
        (
            " \x1b[1mGrand total:\x1b[0m".to_string(),
            format!("\x1b[1m{}  \x1b[0m", totals.grand_total),
        ),
        (" Items:".to_string(), format!("{}  ", totals.item_count)),
    ];

    let label_width = lines
        .iter()
        .map(|(label, _)| visible_width(label))
        .max()
        .unwrap_or_default();

    let value_width = lines
        .iter()
        .map(|(_, value)| visible_width(value))
        .max()
        .unwrap_or_default();

    for (label, value) in &lines {
        let label_pad = label_width.saturating_sub(visible_width(label));
        let value_pad = value_width.saturating_sub(visible_width(value));

        writeln!(
            out,
            "{:label_pad$}{label}  {:value_pad$}{value}",
            "", ""
        )?;
    }

    if let Some(coupon) = &snapshot.session.applied_coupon {
        writeln!(out, " Coupon {} on {}", coupon.code, coupon.vendor)?;
    }

    writeln!(out)?;

    Ok(())
}

/// Wraps runs of box-drawing characters (U+2500..U+257F) in dark grey.
fn colorize_borders(table: &str) -> String {
    let mut out = String::with_capacity(table.len() + 256);
    let mut in_run = false;

    for ch in table.chars() {
        let box_char = ('\u{2500}'..='\u{257F}').contains(&ch);

        if box_char != in_run {
            _ = out.write_str(if box_char { "\x1b[90m" } else { "\x1b[0m" });
            in_run = box_char;
        }

        out.push(ch);
    }

    if in_run {
        _ = out.write_str("\x1b[0m");
    }

    out
}

/// Width of a string ignoring ANSI escapes.
fn visible_width(s: &str) -> usize {
    let mut width = 0usize;
    let mut in_escape = false;

    for ch in s.chars() {
        if in_escape {
            in_escape = !ch.is_ascii_alphabetic();
        } else if ch == '\x1b' {
            in_escape = true;
        } else {
            width += 1;
        }
    }

    width
}
