//! Cart Items

use rust_decimal::Decimal;

use crate::{
    cart::errors::CartError,
    ids::{CartItemId, MenuItemId, VendorId},
    money::non_negative,
};

/// One menu-item line within a vendor group.
///
/// The unit price is a snapshot taken when the line was added; it is never
/// re-read from the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CartItem {
    id: CartItemId,
    menu_item: MenuItemId,
    quantity: u32,
    unit_price: Decimal,
    discount_amount: Decimal,
    special_instructions: Option<String>,
}

impl CartItem {
    pub(crate) fn new(
        menu_item: MenuItemId,
        quantity: u32,
        unit_price: Decimal,
        discount_amount: Decimal,
        special_instructions: Option<String>,
    ) -> Self {
        Self {
            id: CartItemId::generate(),
            menu_item,
            quantity,
            unit_price,
            discount_amount,
            special_instructions,
        }
    }

    /// Line identifier
    pub fn id(&self) -> CartItemId {
        self.id
    }

    /// Catalog item this line refers to
    pub fn menu_item(&self) -> &MenuItemId {
        &self.menu_item
    }

    /// Quantity, always at least one
    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    /// Unit price snapshot
    pub fn unit_price(&self) -> Decimal {
        self.unit_price
    }

    /// Discount taken off the whole line
    pub fn discount_amount(&self) -> Decimal {
        self.discount_amount
    }

    /// Free-text instructions for the kitchen
    pub fn special_instructions(&self) -> Option<&str> {
        self.special_instructions.as_deref()
    }

    /// Line subtotal: `unit_price * quantity - discount_amount`, clamped at zero.
    pub fn subtotal(&self) -> Decimal {
        non_negative(self.unit_price * Decimal::from(self.quantity) - self.discount_amount)
    }

    pub(crate) fn set_quantity(&mut self, quantity: u32) {
        self.quantity = quantity;
    }

    pub(crate) fn replace(&mut self, line: &NewCartItem, quantity: u32) {
        self.quantity = quantity;
        self.unit_price = line.unit_price;

        if let Some(instructions) = &line.special_instructions {
            self.special_instructions = Some(instructions.clone());
        }

        if let Some(discount) = line.discount_amount {
            self.discount_amount = discount;
        }
    }
}

/// A line to add to (or overwrite in) a vendor group.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCartItem {
    /// Vendor selling the item
    pub vendor: VendorId,

    /// Catalog item
    pub menu_item: MenuItemId,

    /// Requested quantity
    pub quantity: i64,

    /// Menu price snapshot supplied by the caller
    pub unit_price: Decimal,

    /// Optional discount on the whole line
    pub discount_amount: Option<Decimal>,

    /// Optional kitchen instructions
    pub special_instructions: Option<String>,
}

impl NewCartItem {
    /// A line with no discount or instructions.
    pub fn new(
        vendor: impl Into<VendorId>,
        menu_item: impl Into<MenuItemId>,
        quantity: i64,
        unit_price: Decimal,
    ) -> Self {
        Self {
            vendor: vendor.into(),
            menu_item: menu_item.into(),
            quantity,
            unit_price,
            discount_amount: None,
            special_instructions: None,
        }
    }

    /// Set a line discount.
    #[must_use]
    pub fn with_discount(mut self, discount: Decimal) -> Self {
        self.discount_amount = Some(discount);
        self
    }

    /// Set kitchen instructions.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.special_instructions = Some(instructions.into());
        self
    }

    /// Validate the line and return its quantity.
    ///
    /// # Errors
    ///
    /// - [`CartError::InvalidQuantity`] if the quantity is below one or too large.
    /// - [`CartError::InvalidPrice`] if the unit price is negative.
    /// - [`CartError::InvalidDiscount`] if the discount is negative.
    pub fn validate(&self) -> Result<u32, CartError> {
        let quantity = u32::try_from(self.quantity)
            .ok()
            .filter(|quantity| *quantity >= 1)
            .ok_or(CartError::InvalidQuantity(self.quantity))?;

        if self.unit_price.is_sign_negative() && !self.unit_price.is_zero() {
            return Err(CartError::InvalidPrice(self.unit_price));
        }

        if let Some(discount) = self.discount_amount
            && discount.is_sign_negative()
            && !discount.is_zero()
        {
            return Err(CartError::InvalidDiscount(discount));
        }

        Ok(quantity)
    }
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;

    fn momo(quantity: i64, price: i64) -> NewCartItem {
        NewCartItem::new("momo-house", "steam-momo", quantity, Decimal::new(price, 0))
    }

    #[test]
    fn subtotal_is_price_times_quantity_less_discount() -> TestResult {
        let line = momo(3, 120).with_discount(Decimal::new(40, 0));
        let quantity = line.validate()?;
        let item = CartItem::new(
            line.menu_item.clone(),
            quantity,
            line.unit_price,
            Decimal::new(40, 0),
            None,
        );

        assert_eq!(item.subtotal(), Decimal::new(320, 0));

        Ok(())
    }

    #[test]
    fn subtotal_clamps_at_zero() {
        let item = CartItem::new(
            MenuItemId::from("tea"),
            1,
            Decimal::new(30, 0),
            Decimal::new(45, 0),
            None,
        );

        assert_eq!(item.subtotal(), Decimal::ZERO);
    }

    #[test]
    fn subtotal_keeps_full_precision() {
        let item = CartItem::new(
            MenuItemId::from("lassi"),
            3,
            Decimal::new(3333, 4),
            Decimal::ZERO,
            None,
        );

        assert_eq!(item.subtotal(), Decimal::new(9999, 4));
    }

    #[test]
    fn zero_and_negative_quantities_are_rejected() {
        assert!(matches!(
            momo(0, 100).validate(),
            Err(CartError::InvalidQuantity(0))
        ));
        assert!(matches!(
            momo(-2, 100).validate(),
            Err(CartError::InvalidQuantity(-2))
        ));
    }

    #[test]
    fn oversized_quantity_is_rejected() {
        let line = momo(i64::from(u32::MAX) + 1, 100);

        assert!(matches!(line.validate(), Err(CartError::InvalidQuantity(_))));
    }

    #[test]
    fn negative_price_is_rejected() {
        assert!(matches!(
            momo(1, -1).validate(),
            Err(CartError::InvalidPrice(_))
        ));
    }

    #[test]
    fn zero_price_is_allowed() -> TestResult {
        assert_eq!(momo(2, 0).validate()?, 2);

        Ok(())
    }

    #[test]
    fn negative_discount_is_rejected() {
        let line = momo(1, 100).with_discount(Decimal::new(-5, 0));

        assert!(matches!(line.validate(), Err(CartError::InvalidDiscount(_))));
    }

    #[test]
    fn replace_overwrites_price_and_quantity_but_keeps_unset_fields() -> TestResult {
        let mut item = CartItem::new(
            MenuItemId::from("steam-momo"),
            1,
            Decimal::new(100, 0),
            Decimal::new(10, 0),
            Some("extra chutney".to_string()),
        );

        let line = momo(4, 110);
        item.replace(&line, line.validate()?);

        assert_eq!(item.quantity(), 4);
        assert_eq!(item.unit_price(), Decimal::new(110, 0));
        assert_eq!(item.discount_amount(), Decimal::new(10, 0));
        assert_eq!(item.special_instructions(), Some("extra chutney"));

        Ok(())
    }

    #[test]
    fn replace_overwrites_given_instructions() -> TestResult {
        let mut item = CartItem::new(
            MenuItemId::from("steam-momo"),
            1,
            Decimal::new(100, 0),
            Decimal::ZERO,
            Some("extra chutney".to_string()),
        );

        let line = momo(2, 100).with_instructions("no onions");
        item.replace(&line, line.validate()?);

        assert_eq!(item.special_instructions(), Some("no onions"));

        Ok(())
    }
}
