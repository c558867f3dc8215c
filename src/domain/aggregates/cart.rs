//! Cart Aggregate
//!
//! The cart a session checks out with, and the snapshot that travels through the
//! payment processor as session metadata until payment is confirmed.

use serde::{Deserialize, Serialize};
use crate::domain::aggregates::order::{LineItem, NewOrder};
use crate::domain::aggregates::product::Product;
use crate::domain::value_objects::{CustomerContact, Money, MoneyError, PaymentReference, ProductId, SessionId, ShippingAddress};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default)]
    pub size: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Cart {
    session_id: SessionId,
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new(session_id: SessionId) -> Self { Self { session_id, lines: vec![] } }

    pub fn session_id(&self) -> &SessionId { &self.session_id }
    pub fn lines(&self) -> &[CartLine] { &self.lines }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }

    pub fn add_line(&mut self, line: CartLine) -> Result<(), CartError> {
        if line.quantity == 0 { return Err(CartError::ZeroQuantity); }
        if let Some(existing) = self.lines.iter_mut().find(|l| l.product_id == line.product_id && l.size == line.size) {
            existing.quantity = existing.quantity.saturating_add(line.quantity);
        } else {
            self.lines.push(line);
        }
        Ok(())
    }

    /// Units of `product_id` across all sizes; holds are per product.
    pub fn quantity_of(&self, product_id: ProductId) -> u32 {
        self.lines.iter().filter(|l| l.product_id == product_id).map(|l| l.quantity).sum()
    }

    /// Prices every line from the catalog, freezing name and unit price.
    pub fn price(&self, catalog: &[Product]) -> Result<Vec<LineItem>, CartError> {
        self.lines.iter().map(|l| {
            let product = catalog.iter().find(|p| p.id == l.product_id).ok_or(CartError::UnknownProduct(l.product_id))?;
            Ok(product.snapshot_line(l.quantity, l.size.clone()))
        }).collect()
    }
}

/// Flat-fee shipping waived above a threshold.
#[derive(Clone, Debug)]
pub struct ShippingPolicy {
    pub flat_fee: Money,
    pub free_above: Money,
}

impl ShippingPolicy {
    pub fn charge_for(&self, subtotal: &Money) -> Result<Money, MoneyError> {
        if subtotal.exceeds(&self.free_above)? || *subtotal == self.free_above {
            Ok(Money::zero(subtotal.currency()))
        } else {
            Ok(self.flat_fee.clone())
        }
    }
}

/// Cart state frozen at checkout; becomes an order once payment is confirmed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSnapshot {
    pub session_id: SessionId,
    pub user_id: Option<String>,
    pub customer: CustomerContact,
    pub shipping_address: ShippingAddress,
    pub items: Vec<LineItem>,
    pub shipping: Money,
    pub discount: Money,
}

impl CheckoutSnapshot {
    pub fn subtotal(&self) -> Result<Money, MoneyError> {
        self.items.iter().try_fold(Money::zero(self.shipping.currency()), |acc, i| acc.add(&i.subtotal))
    }

    pub fn into_new_order(self, payment_reference: PaymentReference) -> NewOrder {
        NewOrder {
            user_id: self.user_id,
            customer: self.customer,
            shipping_address: self.shipping_address,
            items: self.items,
            shipping: self.shipping,
            discount: self.discount,
            payment_reference,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CartError { ZeroQuantity, UnknownProduct(ProductId) }
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroQuantity => write!(f, "Quantity must be positive"),
            Self::UnknownProduct(id) => write!(f, "Product {id} not found"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn cart() -> Cart { Cart::new(SessionId::new("s-1").unwrap()) }

    #[test]
    fn test_cart_operations() {
        let mut cart = cart();
        cart.add_line(CartLine { product_id: ProductId(1), quantity: 2, size: None }).unwrap();
        cart.add_line(CartLine { product_id: ProductId(1), quantity: 1, size: None }).unwrap();
        cart.add_line(CartLine { product_id: ProductId(1), quantity: 1, size: Some("L".into()) }).unwrap();
        assert_eq!(cart.lines().len(), 2);
        assert_eq!(cart.lines()[0].quantity, 3); // Merged
        assert_eq!(cart.quantity_of(ProductId(1)), 4);
        assert_eq!(cart.add_line(CartLine { product_id: ProductId(2), quantity: 0, size: None }), Err(CartError::ZeroQuantity));
    }

    #[test]
    fn test_price_snapshots_catalog() {
        let mut cart = cart();
        cart.add_line(CartLine { product_id: ProductId(1), quantity: 2, size: None }).unwrap();
        let catalog = vec![Product { id: ProductId(1), name: "Mug".into(), price: Money::eur(Decimal::new(12, 0)), stock: 9 }];
        let items = cart.price(&catalog).unwrap();
        assert_eq!(items[0].subtotal.amount(), Decimal::new(24, 0));
        cart.add_line(CartLine { product_id: ProductId(5), quantity: 1, size: None }).unwrap();
        assert_eq!(cart.price(&catalog), Err(CartError::UnknownProduct(ProductId(5))));
    }

    #[test]
    fn test_shipping_policy() {
        let policy = ShippingPolicy { flat_fee: Money::eur(Decimal::new(495, 2)), free_above: Money::eur(Decimal::new(50, 0)) };
        assert_eq!(policy.charge_for(&Money::eur(Decimal::new(20, 0))).unwrap().amount(), Decimal::new(495, 2));
        assert!(policy.charge_for(&Money::eur(Decimal::new(50, 0))).unwrap().is_zero());
    }
}
